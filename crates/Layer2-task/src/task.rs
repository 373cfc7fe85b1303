//! Task definition and result types

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Full hyphenated form, used as the default correlation id
    pub fn to_full_string(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A task waiting in the submission queue
///
/// Built once at submission and consumed by the dispatch loop.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Registered name of the computation to run
    pub computation: String,

    /// Input handed to the computation inside the worker
    pub payload: serde_json::Value,

    /// Caller label, defaults to the full task id
    pub correlation_id: String,

    /// When the task was submitted
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task
    pub fn new(
        computation: impl Into<String>,
        payload: serde_json::Value,
        correlation_id: Option<String>,
    ) -> Self {
        let id = TaskId::new();
        Self {
            id,
            computation: computation.into(),
            payload,
            correlation_id: correlation_id.unwrap_or_else(|| id.to_full_string()),
            submitted_at: Utc::now(),
        }
    }
}

/// Outcome of one task
///
/// Produced exactly once, either by the worker or by the dispatcher when the
/// worker could not report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the computation returned normally
    pub success: bool,

    /// Serialized computation output
    #[serde(default)]
    pub value: Option<serde_json::Value>,

    /// Error description, including the backtrace when one was captured
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskResult {
    /// Create a success result
    pub fn success(value: serde_json::Value) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
        }
    }

    /// Create a failure result
    pub fn failure(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error.push_str("unknown failure");
        }
        Self {
            success: false,
            value: None,
            error: Some(error),
        }
    }

    /// Error message, if the task failed
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Decode the output value into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        if !self.success {
            anyhow::bail!(
                "task failed: {}",
                self.error.as_deref().unwrap_or("unknown failure")
            );
        }
        let value = self.value.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}
