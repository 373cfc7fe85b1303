//! Pending result handle returned by `submit`

use crate::task::{TaskId, TaskResult};
use futures::channel::oneshot;
use futures::future::Shared;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

const DROPPED: &str = "task was dropped before its worker reported a result";

/// Future resolving to the task's [`TaskResult`]
///
/// Cloning is cheap and every clone yields the same result, so the handle
/// can be awaited any number of times.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    correlation_id: String,
    inner: Shared<oneshot::Receiver<TaskResult>>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        correlation_id: String,
        receiver: oneshot::Receiver<TaskResult>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            inner: receiver.shared(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Result if already available, without waiting
    pub fn peek(&self) -> Option<TaskResult> {
        self.inner.clone().now_or_never().map(into_result)
    }

    pub fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }
}

fn into_result(received: Result<TaskResult, oneshot::Canceled>) -> TaskResult {
    received.unwrap_or_else(|_| TaskResult::failure(DROPPED))
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx).map(into_result)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("correlation_id", &self.correlation_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_awaiting_twice_yields_same_result() {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(TaskId::new(), "job".into(), rx);
        assert!(!handle.is_resolved());

        tx.send(TaskResult::success(json!(3))).unwrap();

        let first = handle.clone().await;
        let second = handle.clone().await;
        assert_eq!(first, second);
        assert_eq!(handle.peek(), Some(TaskResult::success(json!(3))));
    }

    #[tokio::test]
    async fn test_dropped_sender_resolves_to_failure() {
        let (tx, rx) = oneshot::channel::<TaskResult>();
        let handle = TaskHandle::new(TaskId::new(), "job".into(), rx);
        drop(tx);

        let result = handle.await;
        assert!(!result.success);
        assert_eq!(result.error_message(), Some(DROPPED));
    }
}
