//! Built-in computations
//!
//! Shipped in the `mpdispatch-worker` binary and the CLI; also what the
//! integration tests drive real worker processes with.

use crate::computation::{Computation, ComputationRegistry};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every built-in computation
pub fn registry() -> ComputationRegistry {
    ComputationRegistry::new()
        .with(SumSquares)
        .with(Fail)
        .with(Panic)
        .with(Exit)
        .with(Span)
        .with(Linger)
}

/// `sum(i * i for i in 0..n)`, wrapping at `u64::MAX`
pub fn sum_of_squares(n: u64) -> u64 {
    (0..n).fold(0u64, |acc, i| acc.wrapping_add(i.wrapping_mul(i)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumInput {
    pub n: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumOutput {
    #[serde(default)]
    pub uid: Option<String>,
    pub result: u64,
}

/// CPU-bound sum of squares
pub struct SumSquares;

#[async_trait]
impl Computation for SumSquares {
    const NAME: &'static str = "sum_squares";
    type Input = SumInput;
    type Output = SumOutput;

    async fn run(&self, input: SumInput) -> anyhow::Result<SumOutput> {
        let result = sum_of_squares(input.n);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(SumOutput {
            uid: input.uid,
            result,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailInput {
    #[serde(default)]
    pub message: Option<String>,
}

/// Always returns an error
pub struct Fail;

#[async_trait]
impl Computation for Fail {
    const NAME: &'static str = "fail";
    type Input = FailInput;
    type Output = ();

    async fn run(&self, input: FailInput) -> anyhow::Result<()> {
        let message = input
            .message
            .unwrap_or_else(|| "computation failed on purpose".to_string());
        anyhow::bail!(message)
    }
}

/// Always panics
pub struct Panic;

#[async_trait]
impl Computation for Panic {
    const NAME: &'static str = "panic";
    type Input = FailInput;
    type Output = ();

    async fn run(&self, input: FailInput) -> anyhow::Result<()> {
        let message = input
            .message
            .unwrap_or_else(|| "computation panicked on purpose".to_string());
        panic!("{}", message);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitInput {
    pub code: i32,
}

/// Terminates the worker without replying, like a crash would
pub struct Exit;

#[async_trait]
impl Computation for Exit {
    const NAME: &'static str = "exit";
    type Input = ExitInput;
    type Output = ();

    async fn run(&self, input: ExitInput) -> anyhow::Result<()> {
        std::process::exit(input.code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanInput {
    pub millis: u64,
}

/// When and where a [`Span`] ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanOutput {
    pub pid: u32,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
}

/// Sleeps on the worker's runtime and reports its own lifetime
pub struct Span;

#[async_trait]
impl Computation for Span {
    const NAME: &'static str = "span";
    type Input = SpanInput;
    type Output = SpanOutput;

    async fn run(&self, input: SpanInput) -> anyhow::Result<SpanOutput> {
        let started_at_ms = Utc::now().timestamp_millis();
        tokio::time::sleep(Duration::from_millis(input.millis)).await;
        Ok(SpanOutput {
            pid: std::process::id(),
            started_at_ms,
            finished_at_ms: Utc::now().timestamp_millis(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LingerInput {
    pub millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LingerOutput {
    pub replied_at_ms: i64,
}

/// Replies at once, leaving blocking work running behind it
pub struct Linger;

#[async_trait]
impl Computation for Linger {
    const NAME: &'static str = "linger";
    type Input = LingerInput;
    type Output = LingerOutput;

    async fn run(&self, input: LingerInput) -> anyhow::Result<LingerOutput> {
        let millis = input.millis;
        // Never awaited; keeps running after the reply.
        let _ = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(millis));
        });
        Ok(LingerOutput {
            replied_at_ms: Utc::now().timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::execute;
    use serde_json::json;

    #[test]
    fn test_sum_of_squares_matches_closed_form() {
        for n in [0u64, 1, 2, 10, 1_000, 100_000] {
            let expected = if n == 0 { 0 } else { (n - 1) * n * (2 * n - 1) / 6 };
            assert_eq!(sum_of_squares(n), expected, "n = {}", n);
        }
    }

    #[test]
    fn test_registry_names() {
        assert_eq!(
            registry().names(),
            vec!["exit", "fail", "linger", "panic", "span", "sum_squares"]
        );
    }

    #[tokio::test]
    async fn test_sum_squares_in_process() {
        let result = execute(&registry(), "sum_squares", json!({ "n": 4, "uid": "u-1" })).await;
        let output: SumOutput = result.decode().unwrap();
        assert_eq!(
            output,
            SumOutput {
                uid: Some("u-1".into()),
                result: 14
            }
        );
    }

    #[tokio::test]
    async fn test_fail_uses_message() {
        let result = execute(&registry(), "fail", json!({ "message": "nope" })).await;
        assert!(!result.success);
        assert!(result.error_message().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_span_reports_ordered_timestamps() {
        let result = execute(&registry(), "span", json!({ "millis": 5 })).await;
        let span: SpanOutput = result.decode().unwrap();
        assert_eq!(span.pid, std::process::id());
        assert!(span.finished_at_ms >= span.started_at_ms);
    }
}
