//! Dispatcher integration tests - real worker processes
//!
//! `cargo test -p mpdispatch-task --test dispatcher_test`

use chrono::Utc;
use mpdispatch_foundation::Error;
use mpdispatch_task::builtin::{
    sum_of_squares, Exit, ExitInput, Fail, FailInput, Linger, LingerInput, LingerOutput, Panic,
    Span, SpanInput, SpanOutput, SumInput, SumOutput, SumSquares,
};
use mpdispatch_task::{Dispatcher, DispatcherConfig, WorkerCommand};
use serde_json::json;
use std::time::{Duration, Instant};

fn dispatcher(max_processes: usize) -> Dispatcher {
    let worker = WorkerCommand::new(env!("CARGO_BIN_EXE_mpdispatch-worker"));
    Dispatcher::new(DispatcherConfig::new(worker).with_max_processes(max_processes))
        .expect("dispatcher")
}

/// Workers are reaped after their handle resolves
async fn wait_until_idle(dispatcher: &Dispatcher) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.running() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers still running");
}

fn sum(n: u64) -> SumInput {
    SumInput {
        n,
        uid: Some(format!("uid-{}", n)),
    }
}

#[tokio::test]
async fn test_sum_tasks_respect_limit() {
    let dispatcher = dispatcher(2);
    let inputs = [1_000u64, 2_000, 3_000, 4_000];

    let handles: Vec<_> = inputs
        .iter()
        .map(|n| dispatcher.submit::<SumSquares>(&sum(*n)).unwrap())
        .collect();

    for (n, handle) in inputs.iter().zip(handles) {
        let result = handle.await;
        assert!(result.success, "task failed: {:?}", result.error);
        let output: SumOutput = result.decode().unwrap();
        assert_eq!(output.result, sum_of_squares(*n));
        assert_eq!(output.uid, Some(format!("uid-{}", n)));
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.submitted, 4);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.failed, 0);
    assert!(stats.peak_running >= 1 && stats.peak_running <= 2);
    assert_eq!(stats.max_processes, 2);
    assert_eq!(dispatcher.pending_count(), 0);

    wait_until_idle(&dispatcher).await;
    assert_eq!(dispatcher.running(), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_slot_runs_tasks_one_after_another() {
    let dispatcher = dispatcher(1);

    let handles: Vec<_> = (0..3)
        .map(|_| dispatcher.submit::<Span>(&SpanInput { millis: 100 }).unwrap())
        .collect();

    let mut spans = Vec::new();
    for handle in handles {
        let span: SpanOutput = handle.await.decode().unwrap();
        spans.push(span);
    }
    spans.sort_by_key(|s| s.started_at_ms);

    for pair in spans.windows(2) {
        assert!(
            pair[0].finished_at_ms <= pair[1].started_at_ms,
            "workers overlapped: {:?}",
            pair
        );
        assert_ne!(pair[0].pid, pair[1].pid);
    }
    assert_eq!(dispatcher.stats().peak_running, 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_does_not_poison_later_tasks() {
    let dispatcher = dispatcher(1);

    let failed = dispatcher
        .submit::<Fail>(&FailInput {
            message: Some("bad input".into()),
        })
        .unwrap()
        .await;
    assert!(!failed.success);
    assert!(failed.value.is_none());
    assert!(failed.error_message().unwrap().contains("bad input"));

    let ok = dispatcher.submit::<SumSquares>(&sum(10)).unwrap().await;
    assert!(ok.success);
    assert_eq!(ok.decode::<SumOutput>().unwrap().result, 285);

    let stats = dispatcher.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_worker_exit_without_reply_is_failure() {
    let dispatcher = dispatcher(2);

    let result = dispatcher
        .submit::<Exit>(&ExitInput { code: 3 })
        .unwrap()
        .await;
    assert!(!result.success);
    let message = result.error_message().unwrap();
    assert!(message.contains("channel closed before a result was sent"));
    assert_eq!(dispatcher.running(), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_worker_panic_is_failure() {
    let dispatcher = dispatcher(2);

    let result = dispatcher
        .submit::<Panic>(&FailInput {
            message: Some("worker blew up".into()),
        })
        .unwrap()
        .await;
    assert!(!result.success);
    let message = result.error_message().unwrap();
    assert!(message.starts_with("Worker panicked"));
    assert!(message.contains("worker blew up"));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_computation_is_failure() {
    let dispatcher = dispatcher(1);

    let result = dispatcher
        .submit_raw("no_such_thing", json!({}), None)
        .unwrap()
        .await;
    assert!(!result.success);
    assert!(result
        .error_message()
        .unwrap()
        .contains("unknown computation `no_such_thing`"));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_completion_stream_delivers_each_task_once() {
    let dispatcher = dispatcher(3);
    let completions = dispatcher.completions();

    let mut expected: Vec<String> = (0..5).map(|i| format!("job-{}", i)).collect();
    for (i, id) in expected.iter().enumerate() {
        dispatcher
            .submit_correlated::<SumSquares>(&sum(i as u64 * 100), id.clone())
            .unwrap();
    }
    let anonymous = dispatcher.submit::<SumSquares>(&sum(7)).unwrap();
    assert_eq!(anonymous.correlation_id(), anonymous.id().to_full_string());
    expected.push(anonymous.correlation_id().to_string());

    let mut seen = Vec::new();
    for _ in 0..expected.len() {
        let event = completions.recv().await.unwrap();
        assert!(event.result.success);
        seen.push(event.correlation_id);
    }

    dispatcher.shutdown().await.unwrap();
    assert!(completions.try_recv().is_none());

    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_handle_can_be_awaited_twice() {
    let dispatcher = dispatcher(1);

    let handle = dispatcher.submit::<SumSquares>(&sum(12)).unwrap();

    let first = handle.clone().await;
    let second = handle.clone().await;
    assert_eq!(first, second);
    assert!(handle.is_resolved());
    assert_eq!(handle.peek(), Some(first));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_zero_processes_is_config_error() {
    let worker = WorkerCommand::new(env!("CARGO_BIN_EXE_mpdispatch-worker"));
    let err = Dispatcher::new(DispatcherConfig::new(worker).with_max_processes(0))
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_work() {
    let dispatcher = dispatcher(2);

    let handles: Vec<_> = (0..4)
        .map(|_| dispatcher.submit::<Span>(&SpanInput { millis: 50 }).unwrap())
        .collect();

    dispatcher.shutdown().await.unwrap();

    for handle in handles {
        let result = handle.peek().expect("resolved before shutdown returned");
        assert!(result.success);
    }
}

#[tokio::test]
async fn test_completion_event_follows_resolution() {
    let dispatcher = dispatcher(1);
    let completions = dispatcher.completions();

    let handle = dispatcher
        .submit_correlated::<SumSquares>(&sum(20), "watched")
        .unwrap();

    let event = completions.recv().await.unwrap();
    assert_eq!(event.correlation_id, "watched");
    assert!(handle.is_resolved());
    assert_eq!(handle.peek(), Some(event.result));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_message_carries_backtrace() {
    let worker = WorkerCommand::new(env!("CARGO_BIN_EXE_mpdispatch-worker"))
        .env("RUST_LIB_BACKTRACE", "1");
    let dispatcher =
        Dispatcher::new(DispatcherConfig::new(worker).with_max_processes(1)).unwrap();

    let result = dispatcher
        .submit::<Fail>(&FailInput::default())
        .unwrap()
        .await;
    assert!(!result.success);
    let message = result.error_message().unwrap();
    assert!(message.starts_with("Worker failed: computation failed on purpose"));
    assert!(message.contains("Backtrace"), "no backtrace in: {}", message);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leftover_blocking_work_does_not_delay_result() {
    let dispatcher = dispatcher(1);

    let output: LingerOutput = dispatcher
        .submit::<Linger>(&LingerInput { millis: 3_000 })
        .unwrap()
        .await
        .decode()
        .unwrap();
    let delay_ms = Utc::now().timestamp_millis() - output.replied_at_ms;
    assert!(delay_ms < 1_500, "result delivered {} ms after the reply", delay_ms);

    // The worker exits without waiting for the blocking sleep.
    let started = Instant::now();
    dispatcher.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1_500));
}
