mod cli;
mod format;
mod shutdown;
mod task_run;

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskforge_engine::{RunEvent, RunnerConfig, TestSuite, start_suite};

use crate::cli::{Cli, Command, RunArgs, parse_test_ref};
use crate::format::{summary_line, test_line};
use crate::shutdown::{ShutdownEvent, spawn_ctrl_c_handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run(args).await?,
        Command::TaskRun(args) => task_run::run(args).await?,
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn default_logdir() -> PathBuf {
    PathBuf::from("taskforge-logs").join(format!(
        "job-{}",
        Utc::now().format("%Y-%m-%dT%H.%M.%S")
    ))
}

async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let tests = args.refs.iter().map(|r| parse_test_ref(r)).collect();
    let suite = TestSuite::new(args.suite_name.clone(), tests);

    let logdir = args.logdir.clone().unwrap_or_else(default_logdir);
    let config = RunnerConfig {
        status_server_uri: args.status_server_uri.clone(),
        spawner: args.spawner.clone(),
        max_parallel_tasks: args.max_parallel_tasks as usize,
        shuffle: args.shuffle,
        job_timeout: args.job_timeout,
        task_timeout: args.task_timeout,
        base_logdir: logdir.clone(),
        store_debug: args.store_debug,
    };

    println!(
        "taskforge {} | {} tests | parallel={}",
        env!("CARGO_PKG_VERSION"),
        suite.tests.len(),
        config.max_parallel_tasks
    );

    let handle = start_suite(config, suite);
    let mut events = handle.subscribe();
    let mut shutdown_rx = spawn_ctrl_c_handler();

    loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        eprintln!(
                            "Interrupt requested, collating what finished (press CTRL+C again to exit immediately)."
                        );
                        handle.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        eprintln!("Interrupt requested again, exiting immediately.");
                        std::process::exit(130);
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                match evt {
                    RunEvent::Started | RunEvent::StopRequested => {}
                    RunEvent::TestStarted { id, .. } => {
                        println!("{id}: STARTED");
                    }
                    RunEvent::TestEnded { id, result, time_elapsed } => {
                        println!("{}", test_line(&id, result, time_elapsed));
                    }
                    RunEvent::Warning { message } => {
                        eprintln!("warning: {message}");
                    }
                    RunEvent::Error { message } => {
                        eprintln!("error: {message}");
                    }
                    RunEvent::Stopped => break,
                }
            }
        }
    }

    let summary = handle.wait().await?;
    println!("{}", summary_line(&summary.result_stats));
    println!("JOB LOG : {}", logdir.display());

    use taskforge_core::message::TestResult;
    let failures = summary.result_stats.get(&TestResult::Fail).copied().unwrap_or(0)
        + summary.result_stats.get(&TestResult::Error).copied().unwrap_or(0);
    if summary.interrupted {
        Ok(130)
    } else if failures > 0 {
        Ok(1)
    } else {
        Ok(0)
    }
}
