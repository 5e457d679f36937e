use std::path::Path;
use std::process::Stdio;

use anyhow::Context as _;
use tokio::process::Command;

use crate::message::{StatusMessage, TestResult};
use crate::reporter::StatusReporter;
use crate::runnable::Runnable;

/// Outcome of executing a runnable payload locally.
struct PayloadOutcome {
    result: TestResult,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Executes a runnable and reports its life cycle to every status service.
///
/// This is the body of a spawned task: it is what `taskforge task-run` does
/// in a child process and what the in-process spawner does on the engine's
/// own runtime. The exit path is always a `finished` record; the caller's
/// exit code is not part of the contract.
pub async fn run_runnable(
    runnable: &Runnable,
    task_id: &str,
    status_services: &[String],
    output_dir: &Path,
) -> anyhow::Result<TestResult> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("create task output dir {}", output_dir.display()))?;

    let mut reporter = StatusReporter::connect(status_services).await;
    reporter
        .send(&StatusMessage::started(
            task_id,
            output_dir.to_string_lossy(),
        ))
        .await?;
    reporter.send(&StatusMessage::running(task_id)).await?;

    let outcome = execute(runnable).await;

    // The task's own copy of its output, independent of what the status
    // records carry.
    tokio::fs::write(output_dir.join("stdout"), &outcome.stdout).await?;
    tokio::fs::write(output_dir.join("stderr"), &outcome.stderr).await?;

    reporter
        .send(&StatusMessage::finished(
            task_id,
            outcome.result,
            &outcome.stdout,
            &outcome.stderr,
        ))
        .await?;
    reporter.close().await;

    Ok(outcome.result)
}

async fn execute(runnable: &Runnable) -> PayloadOutcome {
    match runnable.kind.as_str() {
        "noop" => PayloadOutcome {
            result: TestResult::Pass,
            stdout: Vec::new(),
            stderr: Vec::new(),
        },
        "exec" => execute_command(runnable).await,
        other => PayloadOutcome {
            result: TestResult::Error,
            stdout: Vec::new(),
            stderr: format!("no runner for kind {other:?}\n").into_bytes(),
        },
    }
}

async fn execute_command(runnable: &Runnable) -> PayloadOutcome {
    let output = Command::new(&runnable.uri)
        .args(&runnable.args)
        .envs(&runnable.kwargs)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) => PayloadOutcome {
            result: if output.status.success() {
                TestResult::Pass
            } else {
                TestResult::Fail
            },
            stdout: output.stdout,
            stderr: output.stderr,
        },
        Err(err) => PayloadOutcome {
            result: TestResult::Error,
            stdout: Vec::new(),
            stderr: format!("could not run {}: {err}\n", runnable.uri).into_bytes(),
        },
    }
}
