//! In-memory store with the same atomic commit contract as `SledStore`.
//! Nothing is durable; used by tests and for injecting commit failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use super::KvStore;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
    fail_commits: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail until reset.
    #[cfg(test)]
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemStore {
    fn kv_get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn kv_commit(&self, writes: Vec<(Bytes, Bytes)>) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            warn!("reject commit of {} keys", writes.len());
            return Err(StoreError::CommitRejected);
        }

        let mut data = self.data.write();
        data.extend(writes);

        Ok(())
    }

    fn size_on_disk(&self) -> Result<u64, StoreError> {
        let data = self.data.read();
        Ok(data.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
