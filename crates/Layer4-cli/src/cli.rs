//! Subcommand implementations

use anyhow::Context;
use futures::future::join_all;
use mpdispatch_foundation::{JsonStore, PoolSettings, CONFIG_FILE};
use mpdispatch_task::builtin::{sum_of_squares, SumInput, SumOutput, SumSquares};
use mpdispatch_task::Dispatcher;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Save `settings` as the store's config file; refuses to overwrite unless forced
pub fn init_config(
    store: &JsonStore,
    settings: &PoolSettings,
    force: bool,
) -> anyhow::Result<PathBuf> {
    let path = store.file_path(CONFIG_FILE);
    if store.exists(CONFIG_FILE) && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    store.save(CONFIG_FILE, settings)?;
    info!("Wrote settings to {}", path.display());
    Ok(path)
}

/// Run a single computation and print its result as JSON
///
/// Returns whether the computation succeeded.
pub async fn run_once(
    dispatcher: &Dispatcher,
    computation: &str,
    payload: &str,
    correlation_id: Option<String>,
) -> anyhow::Result<bool> {
    let payload: serde_json::Value = serde_json::from_str(payload)
        .with_context(|| format!("--payload is not valid JSON: {}", payload))?;

    let handle = dispatcher.submit_raw(computation, payload, correlation_id)?;
    info!("Submitted {} as {}", computation, handle.correlation_id());

    let result = handle.await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

/// Submit `tasks` sums and print each completion as it arrives
pub async fn sum(dispatcher: &Dispatcher, tasks: u64, n: u64) -> anyhow::Result<()> {
    let completions = dispatcher.completions();

    for i in 0..tasks {
        let uid = format!("sum-{}", i);
        let input = SumInput {
            n: n.saturating_add(i),
            uid: Some(uid.clone()),
        };
        dispatcher.submit_correlated::<SumSquares>(&input, uid)?;
    }

    for _ in 0..tasks {
        let Some(event) = completions.recv().await else {
            break;
        };
        let time = event.completed_at.format("%H:%M:%S%.3f");
        match event.result.decode::<SumOutput>() {
            Ok(output) => println!("{}  {:<10} {}", time, event.correlation_id, output.result),
            Err(e) => println!("{}  {:<10} failed: {:#}", time, event.correlation_id, e),
        }
    }

    let stats = dispatcher.stats();
    println!(
        "\n{} completed, {} failed, peak {} of {} workers",
        stats.completed, stats.failed, stats.peak_running, stats.max_processes
    );
    Ok(())
}

/// Time `tasks` sums in workers, then the same sums inline
///
/// A heartbeat ticks once a second on this runtime. It keeps ticking while
/// workers run and goes quiet while the inline pass holds the thread.
pub async fn bench(dispatcher: &Dispatcher, tasks: u64, n: u64) -> anyhow::Result<()> {
    let started = Instant::now();
    let heartbeat = tokio::spawn(heartbeat(started));

    let handles = (0..tasks)
        .map(|_| dispatcher.submit::<SumSquares>(&SumInput { n, uid: None }))
        .collect::<Result<Vec<_>, _>>()?;
    let results = join_all(handles).await;
    let dispatched = started.elapsed();

    let mut dispatched_total = 0u64;
    for result in &results {
        let output: SumOutput = result.decode()?;
        dispatched_total = dispatched_total.wrapping_add(output.result);
    }
    println!("workers: {} tasks in {:.2?}", tasks, dispatched);

    let inline_started = Instant::now();
    let inline_total = (0..tasks).fold(0u64, |acc, _| acc.wrapping_add(sum_of_squares(n)));
    let inline = inline_started.elapsed();
    println!("inline:  {} tasks in {:.2?}", tasks, inline);

    heartbeat.abort();

    anyhow::ensure!(
        dispatched_total == inline_total,
        "worker results disagree with inline results ({} != {})",
        dispatched_total,
        inline_total
    );
    if !dispatched.is_zero() {
        println!(
            "speedup: {:.2}x with {} workers",
            inline.as_secs_f64() / dispatched.as_secs_f64(),
            dispatcher.max_processes()
        );
    }
    Ok(())
}

async fn heartbeat(started: Instant) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        println!("heartbeat +{:.1}s", started.elapsed().as_secs_f64());
    }
}
