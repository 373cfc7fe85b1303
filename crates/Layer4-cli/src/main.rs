//! mpdispatch CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use mpdispatch_foundation::{init_logging, EnvReader, JsonStore, PoolSettings};
use mpdispatch_task::{builtin, worker, Dispatcher, DispatcherConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// mpdispatch - run computations in a bounded pool of worker processes
#[derive(Parser, Debug)]
#[command(name = "mpdispatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Maximum worker processes running at once
    #[arg(short = 'j', long, global = true)]
    max_processes: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one computation in a worker and print its result
    Run {
        /// Registered computation name (see `list`)
        computation: String,

        /// JSON payload handed to the computation
        #[arg(short, long, default_value = "null")]
        payload: String,

        /// Correlation id reported with the result
        #[arg(long)]
        id: Option<String>,
    },
    /// Fan out sum-of-squares tasks and print completions as they arrive
    Sum {
        /// Number of tasks
        #[arg(short, long, default_value = "8")]
        tasks: u64,

        /// Upper bound of the first task's sum; each task adds its index
        #[arg(short, long, default_value = "1000000")]
        n: u64,
    },
    /// Compare dispatching to workers with running the same work inline
    Bench {
        /// Number of tasks
        #[arg(short, long, default_value = "8")]
        tasks: u64,

        /// Upper bound of each sum
        #[arg(short, long, default_value = "50000000")]
        n: u64,
    },
    /// List the built-in computations
    List,
    /// Write the effective settings to `.mpdispatch/config.json`
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let computations = builtin::registry();

    // Spawned by a dispatcher: serve one request, nothing else.
    if worker::is_worker_process() {
        let mut settings = PoolSettings::default();
        settings.apply_env(&EnvReader::process());
        settings.log.file = None;
        if let Err(e) = init_logging(&settings.log) {
            eprintln!("mpdispatch worker: {}", e);
        }
        return worker::serve(&computations);
    }

    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&settings.log) {
        eprintln!("Warning: {}", e);
    }

    match args.command {
        Command::List => {
            for name in computations.names() {
                println!("{}", name);
            }
            return ExitCode::SUCCESS;
        }
        Command::Init { force } => {
            let written = JsonStore::current_project()
                .map_err(anyhow::Error::from)
                .and_then(|store| cli::init_config(&store, &settings, force));
            return match written {
                Ok(path) => {
                    println!("Wrote {}", path.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    ExitCode::FAILURE
                }
            };
        }
        _ => {}
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(args.command, &settings)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config file and environment first, then command-line flags
fn load_settings(args: &Args) -> anyhow::Result<PoolSettings> {
    let mut settings = PoolSettings::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        let mut settings = PoolSettings::default();
        settings.apply_env(&EnvReader::process());
        settings
    });

    if let Some(max) = args.max_processes {
        settings = settings.with_max_processes(max);
    }
    if args.debug {
        settings.log.level = "DEBUG".to_string();
    }
    if let Some(file) = &args.log_file {
        settings.log.file = Some(file.clone());
    }

    settings.validate()?;
    Ok(settings)
}

async fn dispatch(command: Command, settings: &PoolSettings) -> anyhow::Result<ExitCode> {
    let dispatcher = Dispatcher::new(DispatcherConfig::from_settings(settings)?)?;

    let code = match command {
        Command::Run {
            computation,
            payload,
            id,
        } => {
            if cli::run_once(&dispatcher, &computation, &payload, id).await? {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Sum { tasks, n } => {
            cli::sum(&dispatcher, tasks, n).await?;
            ExitCode::SUCCESS
        }
        Command::Bench { tasks, n } => {
            cli::bench(&dispatcher, tasks, n).await?;
            ExitCode::SUCCESS
        }
        Command::List | Command::Init { .. } => ExitCode::SUCCESS,
    };

    dispatcher.shutdown().await?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "mpdispatch",
            "sum",
            "--tasks",
            "3",
            "-j",
            "2",
            "--debug",
        ])
        .unwrap();
        assert_eq!(args.max_processes, Some(2));
        assert!(args.debug);
        assert!(matches!(args.command, Command::Sum { tasks: 3, n: 1_000_000 }));
    }

    #[test]
    fn test_run_defaults_to_null_payload() {
        let args = Args::try_parse_from(["mpdispatch", "run", "fail"]).unwrap();
        match args.command {
            Command::Run {
                computation,
                payload,
                id,
            } => {
                assert_eq!(computation, "fail");
                assert_eq!(payload, "null");
                assert!(id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
