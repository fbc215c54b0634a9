use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::StoreError;

mod memkv;
mod sledkv;

pub use memkv::MemStore;
pub use sledkv::SledStore;

/// Durable keyed store the operation log is built on.
///
/// `kv_commit` must apply all writes atomically: a concurrent `kv_get` sees
/// either none or all of them. Durable stores return from `kv_commit` only
/// after the writes reached stable media.
pub trait KvStore: Send + Sync {
    fn kv_get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;
    fn kv_commit(&self, writes: Vec<(Bytes, Bytes)>) -> Result<(), StoreError>;

    fn size_on_disk(&self) -> Result<u64, StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// Write transaction staged in memory until `commit`.
///
/// Reads see the transaction's own writes first. Dropping the transaction
/// without committing discards every staged write.
pub struct WriteTxn<'a, S: KvStore + ?Sized> {
    store: &'a S,
    staged: BTreeMap<Bytes, Bytes>,
}

impl<'a, S: KvStore + ?Sized> WriteTxn<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        if let Some(v) = self.staged.get(key) {
            return Ok(Some(v.clone()));
        }

        self.store.kv_get(key)
    }

    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.staged.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn commit(self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        self.store.kv_commit(self.staged.into_iter().collect())
    }
}
