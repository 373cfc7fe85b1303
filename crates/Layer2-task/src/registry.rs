//! Result registry - task id -> pending handle sender
//!
//! Entries are inserted before a task is enqueued and removed by the single
//! resolution (or discard) of that task, so the map only ever holds in-flight
//! work.

use crate::handle::TaskHandle;
use crate::task::{TaskId, TaskResult};
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pending results keyed by task id
#[derive(Clone, Default)]
pub struct ResultRegistry {
    pending: Arc<Mutex<HashMap<TaskId, oneshot::Sender<TaskResult>>>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pending entry for `id` and return its handle
    pub fn register(&self, id: TaskId, correlation_id: impl Into<String>) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().insert(id, tx).is_some() {
            warn!("Task {} was already registered, replacing its entry", id);
        }
        TaskHandle::new(id, correlation_id.into(), rx)
    }

    /// Resolve and remove the entry for `id`
    ///
    /// Returns `false` when the task was not pending, so a second resolution
    /// is a no-op.
    pub fn resolve(&self, id: TaskId, result: TaskResult) -> bool {
        let Some(sender) = self.pending.lock().remove(&id) else {
            return false;
        };
        if sender.send(result).is_err() {
            debug!("Task {} resolved after every handle was dropped", id);
        }
        true
    }

    /// Remove the entry without a result; waiting handles see a failure
    pub fn discard(&self, id: TaskId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
