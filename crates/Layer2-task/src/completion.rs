//! Completion stream - push feed of finished tasks
//!
//! Events are published after the task's handle has been resolved, in
//! completion order. Clones of [`CompletionStream`] share one feed: each
//! event is delivered to exactly one consumer.

use crate::task::TaskResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// One finished task
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    /// Correlation id given at submission (or the task id)
    pub correlation_id: String,

    /// The task's result, identical to what its handle yields
    pub result: TaskResult,

    /// When the event was published
    pub completed_at: DateTime<Utc>,
}

/// Publishing side, owned by the dispatcher
#[derive(Clone)]
pub(crate) struct CompletionPublisher {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl CompletionPublisher {
    pub(crate) fn publish(&self, correlation_id: String, result: TaskResult) {
        trace!("Publishing completion for {}", correlation_id);
        let event = CompletionEvent {
            correlation_id,
            result,
            completed_at: Utc::now(),
        };
        // Every stream clone may be gone; the event is then simply unobserved.
        let _ = self.tx.send(event);
    }
}

/// Consuming side of the feed
#[derive(Clone)]
pub struct CompletionStream {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<CompletionEvent>>>,
}

impl CompletionStream {
    /// Next event; `None` once the dispatcher is gone and the feed is drained
    pub async fn recv(&self) -> Option<CompletionEvent> {
        self.rx.lock().await.recv().await
    }

    /// Next event if one is ready right now
    pub fn try_recv(&self) -> Option<CompletionEvent> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}

pub(crate) fn channel() -> (CompletionPublisher, CompletionStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CompletionPublisher { tx },
        CompletionStream {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
