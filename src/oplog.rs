//! Durable, strictly sequenced operation log.
//!
//! Every administrative change is appended here before it is applied to live
//! state. Sequence numbers start at 1 and have no gaps. An append is one
//! store transaction: the entries, the max-sequence record and the callbacks
//! that apply each operation all succeed, or nothing of the batch is
//! persisted.
//!
//! Persisted layout:
//! - `maxSeqKey` holds the decimal max sequence, `0` for an empty log.
//! - `"1"`, `"2"`, ... hold the JSON encoded operation of that sequence.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::callback::{CallbackRegistry, Priority};
use crate::config::OpLogOptions;
use crate::error::{OpLogError, OperationFailure, OperationFailureKind, StoreError};
use crate::operation::Operation;
use crate::store::{KvStore, SledStore, WriteTxn};

pub const MAX_SEQ_KEY: &str = "maxSeqKey";

fn seq_key(seq: u64) -> String {
    format!("{seq}")
}

pub struct OpLog<S: KvStore = SledStore> {
    // guards every mutation and the callbacks a mutation triggers
    lock: RwLock<()>,
    store: S,
    callbacks: CallbackRegistry,
    path: PathBuf,
}

impl OpLog<SledStore> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, &OpLogOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: &OpLogOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .inspect_err(|e| error!("failed to create oplog directory {path:?}, err: {e}"))?;

        let fresh = fs::read_dir(path)?.next().is_none();
        debug!("operation logs path: {path:?}, fresh: {fresh}");

        let store = SledStore::open(path, options)?;

        Self::init(store, path.to_path_buf(), fresh)
    }
}

impl<S: KvStore> OpLog<S> {
    /// Build a log over an already opened store. A store without a
    /// max-sequence record is treated as new.
    pub fn with_store(store: S, path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let fresh = store.kv_get(MAX_SEQ_KEY.as_bytes())?.is_none();
        Self::init(store, path.into(), fresh)
    }

    fn init(store: S, path: PathBuf, fresh: bool) -> Result<Self, StoreError> {
        let op = Self {
            lock: RwLock::new(()),
            store,
            callbacks: CallbackRegistry::new(),
            path,
        };

        if fresh {
            // so a missing record is never confused with an empty log
            let mut txn = WriteTxn::new(&op.store);
            Self::write_max_seq(&mut txn, 0);
            txn.commit()
                .inspect_err(|e| error!("BUG: commit initial transaction failed, err: {e}"))?;
        }

        info!(
            "operation log opened at {:?}, max sequence: {}",
            op.path,
            op.read_max_seq()
        );

        Ok(op)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes the store occupies on disk; advisory.
    pub fn size(&self) -> u64 {
        self.store
            .size_on_disk()
            .inspect_err(|e| warn!("failed to read oplog size, err: {e}"))
            .unwrap_or(0)
    }

    pub fn max_seq(&self) -> u64 {
        let _guard = self.lock.read();
        self.read_max_seq()
    }

    pub fn min_seq(&self) -> u64 {
        let _guard = self.lock.read();
        // entries are never purged yet, so the oldest retained one is always 1
        if self.read_max_seq() > 0 {
            1
        } else {
            0
        }
    }

    /// Append `operations` at `start_seq`, which must be `max_seq() + 1`.
    ///
    /// Every registered callback runs for every operation, in registry order,
    /// before the batch commits. The first callback failure discards the
    /// whole batch. Effects callbacks already had on live state for earlier
    /// operations of the batch are not undone.
    pub fn append(&self, start_seq: u64, operations: &[Operation]) -> Result<(), OpLogError> {
        if operations.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.write();

        let mut txn = WriteTxn::new(&self.store);
        let max_seq = Self::parse_max_seq(txn.get(MAX_SEQ_KEY.as_bytes()));

        if start_seq == 0 {
            return Err(OpLogError::ZeroSequence);
        }

        let expected = max_seq.checked_add(1).ok_or_else(|| {
            error!("BUG: max sequence {max_seq} has no successor");
            OpLogError::SeqOverflow { max_seq }
        })?;

        if start_seq > expected {
            return Err(OpLogError::InvalidSeq {
                start_seq,
                expected,
            });
        } else if start_seq < expected {
            return Err(OpLogError::SeqConflict {
                start_seq,
                expected,
            });
        }

        let callbacks = self.callbacks.snapshot();

        for (idx, operation) in operations.iter().enumerate() {
            let seq = start_seq
                .checked_add(idx as u64)
                .ok_or(OpLogError::SeqOverflow { max_seq })?;

            let content = operation
                .content()
                .map_err(|source| OpLogError::InvalidContent { seq, source })?;

            let buf = serde_json::to_vec(operation).map_err(|source| {
                error!("BUG: marshal operation (sequence={seq}) failed, err: {source}");
                OpLogError::Codec { seq, source }
            })?;

            txn.set(seq_key(seq), buf);
            Self::write_max_seq(&mut txn, seq);

            debug!("stage operation (sequence={seq}): {content}");

            for cb in callbacks.iter() {
                if let Err(failure) = cb.invoke(seq, operation) {
                    error!(
                        "operation (sequence={seq}) failed in callback {}, failure: {failure}",
                        cb.name()
                    );
                    if failure.kind == OperationFailureKind::None {
                        error!("BUG: operation callback returns error without a certain failure type");
                    }

                    return Err(OpLogError::OperationFailed {
                        seq,
                        callback: cb.name().to_string(),
                        failure,
                    });
                }
            }
        }

        txn.commit().map_err(|e| {
            error!("BUG: commit transaction failed, err: {e}");
            OpLogError::Commit(e)
        })?;

        debug!(
            "appended operations {}..={}",
            start_seq,
            start_seq + operations.len() as u64 - 1
        );

        Ok(())
    }

    /// Operations `start_seq..=min(max_seq, start_seq + count_limit - 1)`.
    ///
    /// Starting past `max_seq` is not an error: nothing new yet.
    pub fn retrieve(&self, start_seq: u64, count_limit: u64) -> Result<Vec<Operation>, OpLogError> {
        // committed entries never change, no lock needed
        let max_seq = self.read_max_seq();

        if start_seq == 0 {
            return Err(OpLogError::ZeroSequence);
        }

        if start_seq > max_seq || count_limit == 0 {
            return Ok(Vec::new());
        }

        let end = max_seq.min(start_seq.saturating_add(count_limit - 1));
        let mut ret = Vec::new();

        for seq in start_seq..=end {
            let buf = self
                .store
                .kv_get(seq_key(seq).as_bytes())
                .inspect_err(|e| error!("get operation (sequence={seq}) failed, err: {e}"))?;

            let buf = match buf {
                Some(buf) if !buf.is_empty() => buf,
                _ => {
                    error!("BUG: get empty operation (sequence={seq}) below max sequence {max_seq}");
                    return Err(OpLogError::MissingEntry { seq, max_seq });
                }
            };

            let operation: Operation = serde_json::from_slice(&buf).map_err(|source| {
                error!("BUG: unmarshal operation (sequence={seq}) failed, err: {source}");
                OpLogError::Codec { seq, source }
            })?;

            ret.push(operation);
        }

        Ok(ret)
    }

    pub fn add_appended_callback<F>(&self, name: impl Into<String>, callback: F, priority: Priority)
    where
        F: Fn(u64, &Operation) -> Result<(), OperationFailure> + Send + Sync + 'static,
    {
        let _guard = self.lock.write();
        self.callbacks.add(name, callback, priority);
    }

    pub fn remove_appended_callback(&self, name: &str) {
        let _guard = self.lock.write();
        self.callbacks.remove(name);
    }

    pub fn appended_callbacks(&self) -> Vec<String> {
        self.callbacks.names()
    }

    pub fn close(self) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        info!("close operation log at {:?}", self.path);
        self.store.flush()
    }

    fn read_max_seq(&self) -> u64 {
        Self::parse_max_seq(self.store.kv_get(MAX_SEQ_KEY.as_bytes()))
    }

    // unreadable or missing records degrade to an empty log
    fn parse_max_seq(raw: Result<Option<Bytes>, StoreError>) -> u64 {
        let raw = match raw {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return 0,
            Err(e) => {
                error!("get max sequence failed, err: {e}");
                return 0;
            }
        };

        match std::str::from_utf8(&raw).ok().and_then(|s| s.parse::<u64>().ok()) {
            Some(ms) => ms,
            None => {
                error!("BUG: parse max sequence {:?} failed", raw);
                0
            }
        }
    }

    fn write_max_seq(txn: &mut WriteTxn<'_, S>, ms: u64) {
        txn.set(MAX_SEQ_KEY, format!("{ms}"));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::error::ClusterError;
    use crate::operation::{PipelineSpec, RoutableSpec};
    use crate::store::MemStore;

    fn routable(name: &str) -> Operation {
        Operation::create_routable(RoutableSpec {
            name: name.to_string(),
            kind: "HTTPServer".to_string(),
            config: json!({"port": 80, "maxConnections": 10}),
        })
    }

    fn pipeline(name: &str) -> Operation {
        Operation::create_pipeline(PipelineSpec {
            name: name.to_string(),
            kind: "HTTPPipeline".to_string(),
            routables: vec!["web".to_string()],
            config: json!({}),
        })
    }

    fn mem_log() -> OpLog<MemStore> {
        OpLog::with_store(MemStore::new(), "mem").unwrap()
    }

    #[test]
    fn test_empty_log() {
        let log = mem_log();
        assert_eq!(log.max_seq(), 0);
        assert_eq!(log.min_seq(), 0);
        assert!(log.retrieve(1, 10).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_conflict_scenario() {
        let log = mem_log();
        let (a, b, c) = (routable("a"), routable("b"), pipeline("c"));

        log.append(1, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(log.max_seq(), 2);
        assert_eq!(log.min_seq(), 1);

        let err = log.append(2, &[c.clone()]).unwrap_err();
        assert_eq!(err.cluster_error(), ClusterError::SeqConflict);
        assert_eq!(log.max_seq(), 2);

        log.append(3, &[c.clone()]).unwrap();
        assert_eq!(log.max_seq(), 3);

        assert_eq!(log.retrieve(1, 10).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn test_append_gap() {
        let log = mem_log();
        let err = log.append(5, &[routable("x")]).unwrap_err();
        assert_eq!(err.cluster_error(), ClusterError::InvalidSeq);
        assert_eq!(log.max_seq(), 0);
        assert!(log.retrieve(1, 10).unwrap().is_empty());

        log.append(1, &[routable("x")]).unwrap();
        assert_eq!(log.max_seq(), 1);
        assert_eq!(log.retrieve(1, 10).unwrap(), vec![routable("x")]);
    }

    #[test]
    fn test_append_zero_sequence() {
        let log = mem_log();
        let err = log.append(0, &[routable("x")]).unwrap_err();
        assert!(matches!(err, OpLogError::ZeroSequence));
        assert_eq!(err.cluster_error(), ClusterError::Internal);
    }

    #[test]
    fn test_append_empty_batch() {
        let log = mem_log();
        log.append(1, &[]).unwrap();
        // even a wrong start sequence is a no-op for an empty batch
        log.append(9, &[]).unwrap();
        assert_eq!(log.max_seq(), 0);
    }

    #[test]
    fn test_append_invalid_content_persists_nothing() {
        let log = mem_log();
        let err = log
            .append(1, &[routable("a"), Operation::default(), routable("c")])
            .unwrap_err();
        assert!(matches!(err, OpLogError::InvalidContent { seq: 2, .. }));
        assert_eq!(err.cluster_error(), ClusterError::InvalidContent);
        assert_eq!(log.max_seq(), 0);

        let both: Operation = serde_json::from_str(
            r#"{"deleteRoutable": {"name": "a"}, "deletePipeline": {"name": "b"}}"#,
        )
        .unwrap();
        let err = log.append(1, &[both]).unwrap_err();
        assert_eq!(err.cluster_error(), ClusterError::InvalidContent);

        log.append(1, &[routable("a")]).unwrap();
        assert_eq!(log.max_seq(), 1);
        assert_eq!(log.retrieve(1, 10).unwrap(), vec![routable("a")]);
    }

    #[test]
    fn test_callback_failure_aborts_whole_batch() {
        let log = mem_log();
        log.append(1, &[routable("base")]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        log.add_appended_callback(
            "apply",
            move |seq, _| {
                s.lock().unwrap().push(seq);
                if seq == 4 {
                    return Err(OperationFailure::conflict("third operation conflicts"));
                }
                Ok(())
            },
            Priority::NORMAL,
        );

        let batch: Vec<_> = (0..5).map(|i| routable(&format!("r{i}"))).collect();
        let err = log.append(2, &batch).unwrap_err();

        assert_eq!(err.cluster_error(), ClusterError::ConflictFailure);
        assert!(matches!(err, OpLogError::OperationFailed { seq: 4, .. }));
        // callbacks for the first two operations already ran
        assert_eq!(*seen.lock().unwrap(), vec![2, 3, 4]);
        assert_eq!(log.max_seq(), 1);
        assert!(log.retrieve(2, 10).unwrap().is_empty());

        log.remove_appended_callback("apply");
        log.append(2, &batch).unwrap();
        assert_eq!(log.max_seq(), 6);
        assert_eq!(log.retrieve(2, 10).unwrap(), batch);
    }

    #[test]
    fn test_callback_failure_without_kind_is_internal() {
        let log = mem_log();
        log.add_appended_callback(
            "broken",
            |_, _| Err(OperationFailure::new(OperationFailureKind::None, "no reason")),
            Priority::NORMAL,
        );

        let res = log.append(1, &[routable("a")]);
        assert_eq!(ClusterError::of(&res), ClusterError::Internal);
        assert_eq!(log.max_seq(), 0);
    }

    #[test]
    fn test_callbacks_run_in_priority_order() {
        let log = mem_log();
        let order = Arc::new(Mutex::new(Vec::new()));

        let callbacks = [
            ("late", Priority::LAST),
            ("early", Priority::FIRST),
            ("mid", Priority::NORMAL),
        ];
        for (name, priority) in callbacks {
            let o = order.clone();
            log.add_appended_callback(
                name,
                move |seq, _| {
                    o.lock().unwrap().push(format!("{name}:{seq}"));
                    Ok(())
                },
                priority,
            );
        }

        log.append(1, &[routable("a"), routable("b")]).unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["early:1", "mid:1", "late:1", "early:2", "mid:2", "late:2"]
        );
        assert_eq!(log.appended_callbacks(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_commit_failure_is_internal() {
        let store = MemStore::new();
        let log = OpLog::with_store(store, "mem").unwrap();

        log.store.set_fail_commits(true);
        let err = log.append(1, &[routable("a")]).unwrap_err();
        assert!(matches!(err, OpLogError::Commit(_)));
        assert_eq!(err.cluster_error(), ClusterError::Internal);

        log.store.set_fail_commits(false);
        assert_eq!(log.max_seq(), 0);
        log.append(1, &[routable("a")]).unwrap();
        assert_eq!(log.max_seq(), 1);
    }

    #[test]
    fn test_retrieve_ranges() {
        let log = mem_log();
        let ops: Vec<_> = (1..=5).map(|i| routable(&format!("r{i}"))).collect();
        log.append(1, &ops).unwrap();

        assert_eq!(log.retrieve(2, 2).unwrap(), ops[1..3].to_vec());
        assert_eq!(log.retrieve(4, 100).unwrap(), ops[3..].to_vec());
        assert_eq!(log.retrieve(5, 1).unwrap(), ops[4..].to_vec());
        assert!(log.retrieve(6, 10).unwrap().is_empty());
        assert!(log.retrieve(1, 0).unwrap().is_empty());
        assert_eq!(log.retrieve(3, u64::MAX).unwrap(), ops[2..].to_vec());

        let err = log.retrieve(0, 10).unwrap_err();
        assert_eq!(err.cluster_error(), ClusterError::Internal);
    }

    #[test]
    fn test_retrieve_missing_entry_is_internal() {
        let store = MemStore::new();
        let mut txn = WriteTxn::new(&store);
        txn.set(MAX_SEQ_KEY, "3");
        txn.set("1", serde_json::to_vec(&routable("a")).unwrap());
        txn.set("3", serde_json::to_vec(&routable("c")).unwrap());
        txn.commit().unwrap();

        let log = OpLog::with_store(store, "mem").unwrap();
        assert_eq!(log.retrieve(1, 1).unwrap().len(), 1);

        let err = log.retrieve(1, 3).unwrap_err();
        assert!(matches!(err, OpLogError::MissingEntry { seq: 2, max_seq: 3 }));
        assert_eq!(err.cluster_error(), ClusterError::Internal);
    }

    #[test]
    fn test_retrieve_corrupt_entry_is_internal() {
        let store = MemStore::new();
        let mut txn = WriteTxn::new(&store);
        txn.set(MAX_SEQ_KEY, "1");
        txn.set("1", "not json");
        txn.commit().unwrap();

        let log = OpLog::with_store(store, "mem").unwrap();
        let err = log.retrieve(1, 1).unwrap_err();
        assert!(matches!(err, OpLogError::Codec { seq: 1, .. }));
    }

    #[test]
    fn test_corrupt_max_seq_reads_as_empty() {
        let store = MemStore::new();
        let mut txn = WriteTxn::new(&store);
        txn.set(MAX_SEQ_KEY, "garbage");
        txn.commit().unwrap();

        let log = OpLog::with_store(store, "mem").unwrap();
        assert_eq!(log.max_seq(), 0);
        assert_eq!(log.min_seq(), 0);
    }

    #[test]
    fn test_exhausted_max_seq_rejects_append() {
        let store = MemStore::new();
        let mut txn = WriteTxn::new(&store);
        txn.set(MAX_SEQ_KEY, format!("{}", u64::MAX));
        txn.commit().unwrap();

        let log = OpLog::with_store(store, "mem").unwrap();
        assert_eq!(log.max_seq(), u64::MAX);

        for start in [1, u64::MAX] {
            let err = log.append(start, &[routable("a")]).unwrap_err();
            assert!(matches!(err, OpLogError::SeqOverflow { max_seq: u64::MAX }));
            assert_eq!(err.cluster_error(), ClusterError::Internal);
        }
        assert_eq!(log.max_seq(), u64::MAX);
    }

    #[test]
    fn test_concurrent_appends_stay_contiguous() {
        let log = mem_log();
        let appended = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let log = &log;
                let appended = &appended;
                scope.spawn(move || {
                    for i in 0..25 {
                        let op = routable(&format!("t{t}-{i}"));
                        loop {
                            match log.append(log.max_seq() + 1, &[op.clone()]) {
                                Ok(()) => break,
                                Err(e) if e.cluster_error().is_sequence_error() => continue,
                                Err(e) => panic!("unexpected error: {e}"),
                            }
                        }
                        appended.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(appended.load(Ordering::SeqCst), 100);
        assert_eq!(log.max_seq(), 100);

        let ops = log.retrieve(1, 1000).unwrap();
        assert_eq!(ops.len(), 100);
        // per writer, its own operations appear in submission order
        for t in 0..4 {
            let prefix = format!("t{t}-");
            let names: Vec<_> = ops
                .iter()
                .map(|op| op.content().unwrap().target().to_string())
                .filter(|name| name.starts_with(&prefix))
                .collect();
            let expected: Vec<_> = (0..25).map(|i| format!("t{t}-{i}")).collect();
            assert_eq!(names, expected);
        }
    }

    #[test]
    fn test_restart_durability() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog");
        let ops: Vec<_> = (1..=3).map(|i| routable(&format!("r{i}"))).collect();

        {
            let log = OpLog::open(&path).unwrap();
            assert_eq!(log.max_seq(), 0);
            log.append(1, &ops[..2]).unwrap();
            log.append(3, &ops[2..]).unwrap();
            log.close().unwrap();
        }

        let log = OpLog::open(&path).unwrap();
        assert_eq!(log.path(), path.as_path());
        assert_eq!(log.max_seq(), 3);
        assert_eq!(log.min_seq(), 1);
        assert_eq!(log.retrieve(1, 10).unwrap(), ops);
        assert!(log.size() > 0);

        log.append(4, &[pipeline("p")]).unwrap();
        assert_eq!(log.max_seq(), 4);
        log.close().unwrap();
    }

    #[test]
    fn test_failed_append_not_visible_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog");

        {
            let log = OpLog::open(&path).unwrap();
            log.append(1, &[routable("a")]).unwrap();
            log.add_appended_callback(
                "reject",
                |_, _| Err(OperationFailure::not_acceptable("rejected")),
                Priority::NORMAL,
            );
            let res = log.append(2, &[routable("b"), routable("c")]);
            assert_eq!(ClusterError::of(&res), ClusterError::NotAcceptableFailure);
            log.close().unwrap();
        }

        let log = OpLog::open(&path).unwrap();
        assert_eq!(log.max_seq(), 1);
        assert_eq!(log.retrieve(1, 10).unwrap(), vec![routable("a")]);
    }
}
