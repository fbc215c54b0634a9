use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use super::KvStore;
use crate::config::OpLogOptions;
use crate::error::StoreError;

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    sync_writes: bool,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, options: &OpLogOptions) -> Result<Self, StoreError> {
        info!(
            "open sled store at {:?}, sync_writes: {}",
            path.as_ref(),
            options.sync_writes
        );

        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(options.cache_capacity)
            .open()?;

        Ok(Self {
            db,
            sync_writes: options.sync_writes,
        })
    }
}

impl KvStore for SledStore {
    fn kv_get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let iv = self.db.get(key)?;
        Ok(iv.map(|v| Bytes::copy_from_slice(&v)))
    }

    fn kv_commit(&self, writes: Vec<(Bytes, Bytes)>) -> Result<(), StoreError> {
        let count = writes.len();

        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            batch.insert(&key[..], &value[..]);
        }
        self.db.apply_batch(batch)?;

        if self.sync_writes {
            let flushed = self.db.flush()?;
            debug!("commit {count} keys, flushed {flushed} bytes");
        }

        Ok(())
    }

    fn size_on_disk(&self) -> Result<u64, StoreError> {
        Ok(self.db.size_on_disk()?)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
