use std::sync::Arc;

use arc_swap::ArcSwap;
use derivative::Derivative;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::OperationFailure;
use crate::operation::Operation;

/// Applies one appended operation to live state.
pub type OperationAppended = dyn Fn(u64, &Operation) -> Result<(), OperationFailure> + Send + Sync;

/// Invocation priority, lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const FIRST: Priority = Priority(i32::MIN);
    pub const NORMAL: Priority = Priority(0);
    pub const LAST: Priority = Priority(i32::MAX);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct CallbackEntry {
    name: String,
    priority: Priority,
    // first-insertion order, breaks priority ties
    ordinal: u64,
    #[derivative(Debug = "ignore")]
    callback: Arc<OperationAppended>,
}

impl CallbackEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn invoke(&self, seq: u64, operation: &Operation) -> Result<(), OperationFailure> {
        (self.callback)(seq, operation)
    }
}

struct Writer {
    next_ordinal: u64,
}

/// Named callbacks kept in invocation order.
///
/// Readers take lock-free snapshots; a snapshot never changes after it is
/// taken, whatever `add`/`remove` run afterwards.
pub struct CallbackRegistry {
    entries: ArcSwap<Vec<CallbackEntry>>,
    writer: Mutex<Writer>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(Writer { next_ordinal: 0 }),
        }
    }

    /// Insert, or replace the callback and priority registered under `name`.
    pub fn add<F>(&self, name: impl Into<String>, callback: F, priority: Priority)
    where
        F: Fn(u64, &Operation) -> Result<(), OperationFailure> + Send + Sync + 'static,
    {
        let name = name.into();
        let callback: Arc<OperationAppended> = Arc::new(callback);

        let mut writer = self.writer.lock();
        let mut entries = (**self.entries.load()).clone();

        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            debug!("replace appended callback {name}, priority: {:?}", priority);
            entry.callback = callback;
            entry.priority = priority;
        } else {
            debug!("add appended callback {name}, priority: {:?}", priority);
            entries.push(CallbackEntry {
                name,
                priority,
                ordinal: writer.next_ordinal,
                callback,
            });
            writer.next_ordinal += 1;
        }

        entries.sort_by_key(|e| (e.priority, e.ordinal));
        self.entries.store(Arc::new(entries));
    }

    /// Remove the callback registered under `name`; unknown names are ignored.
    pub fn remove(&self, name: &str) {
        let _writer = self.writer.lock();
        let current = self.entries.load_full();

        if !current.iter().any(|e| e.name == name) {
            return;
        }

        debug!("remove appended callback {name}");
        let entries = current
            .iter()
            .filter(|e| e.name != name)
            .cloned()
            .collect::<Vec<_>>();
        self.entries.store(Arc::new(entries));
    }

    pub fn snapshot(&self) -> Arc<Vec<CallbackEntry>> {
        self.entries.load_full()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.load().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}
