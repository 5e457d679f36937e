use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom as _;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use taskforge_core::message::{StatusMessage, TestResult};

use crate::api::{RunEvent, RunHandle, RunnerConfig, SuiteSummary, TaskReport, TestSuite};
use crate::runtime::RuntimeTask;
use crate::spawner;
use crate::state::TaskStateMachine;
use crate::status::repo::StatusRepo;
use crate::status::server::StatusServer;
use crate::worker::Worker;

/// How long to let trailing status records land before the server is
/// drained and the repository is read.
const SETTLE: Duration = Duration::from_millis(100);

/// Grace period for draining in-flight status connections.
const SERVER_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub(crate) struct RunInner {
    pub(crate) event_tx: broadcast::Sender<RunEvent>,
    stop_tx: watch::Sender<bool>,
    stop_requested: AtomicBool,
}

impl RunInner {
    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            let _ = self.event_tx.send(RunEvent::StopRequested);
            let _ = self.stop_tx.send(true);
        }
    }

    fn emit(&self, event: RunEvent) {
        let _ = self.event_tx.send(event);
    }
}

pub(crate) fn start_suite(config: RunnerConfig, suite: TestSuite) -> RunHandle {
    let (event_tx, _) = broadcast::channel::<RunEvent>(1024);
    let (stop_tx, _) = watch::channel(false);

    let inner = Arc::new(RunInner {
        event_tx,
        stop_tx,
        stop_requested: AtomicBool::new(false),
    });

    let join = tokio::spawn(run_suite(inner.clone(), config, suite));
    RunHandle { inner, join }
}

async fn run_suite(
    inner: Arc<RunInner>,
    config: RunnerConfig,
    suite: TestSuite,
) -> anyhow::Result<SuiteSummary> {
    inner.emit(RunEvent::Started);

    let result = run_suite_inner(&inner, &config, suite).await;
    if let Err(err) = &result {
        inner.emit(RunEvent::Error {
            message: format!("run error: {err:#}"),
        });
    }
    inner.emit(RunEvent::Stopped);
    result
}

async fn run_suite_inner(
    inner: &Arc<RunInner>,
    config: &RunnerConfig,
    suite: TestSuite,
) -> anyhow::Result<SuiteSummary> {
    let spawner = spawner::by_name(&config.spawner)?;
    let repo = Arc::new(StatusRepo::new(inner.event_tx.clone()));

    // Bind before seeding: tasks must be handed the endpoint actually
    // bound, not the one configured (a TCP port of 0 picks a free port).
    let server = StatusServer::bind(&config.status_server_uri, repo.clone()).await?;
    let status_uri = server.uri().to_string();
    let server = server.start();

    let mut tasks = seed_tasks(&suite, &status_uri);
    if config.shuffle {
        tasks.shuffle(&mut rand::thread_rng());
    }
    let total_tasks = tasks.len();

    let tsm = Arc::new(TaskStateMachine::new(tasks));
    let max_running = config.max_parallel_tasks.max(1);

    let mut workers = JoinSet::new();
    for _ in 0..max_running + 2 {
        let worker = Worker::new(
            tsm.clone(),
            spawner.clone(),
            max_running,
            config.task_timeout,
        );
        workers.spawn(async move { worker.run().await });
    }

    let mut interrupted = false;
    {
        let mut stop_rx = inner.stop_tx.subscribe();
        tokio::select! {
            _ = drain(&mut workers) => {}
            _ = stop_rx.wait_for(|stop| *stop) => {
                interrupted = true;
            }
            _ = sleep_or_forever(config.job_timeout) => {
                interrupted = true;
                inner.emit(RunEvent::Warning {
                    message: "job timeout reached, abandoning remaining tasks".to_string(),
                });
            }
        }
    }
    if interrupted {
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }

    // Let trailing status records land, then stop accepting and drain, so
    // collation reads a repository the wire can no longer change.
    tokio::time::sleep(SETTLE).await;
    server.shutdown(SERVER_DRAIN_GRACE).await;

    let finished = tsm.take_finished().await;
    tracing::debug!(
        "collating {} finished of {} total tasks (interrupted: {interrupted})",
        finished.len(),
        total_tasks,
    );
    let summary = collate(inner, config, &repo, &finished, interrupted).await;
    Ok(summary)
}

fn seed_tasks(suite: &TestSuite, status_uri: &str) -> Vec<RuntimeTask> {
    let no_digits = suite.tests.len().to_string().len();
    suite
        .tests
        .iter()
        .enumerate()
        .map(|(index, runnable)| {
            let id = taskforge_core::id::TaskId::new(
                &suite.name,
                index as u32 + 1,
                &runnable.uri,
                no_digits,
            );
            RuntimeTask::new(id, runnable.clone(), vec![status_uri.to_string()])
        })
        .collect()
}

async fn drain(workers: &mut JoinSet<()>) {
    while workers.join_next().await.is_some() {}
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}

async fn collate(
    inner: &Arc<RunInner>,
    config: &RunnerConfig,
    repo: &StatusRepo,
    finished: &[RuntimeTask],
    interrupted: bool,
) -> SuiteSummary {
    let mut reports = Vec::with_capacity(finished.len());
    let mut synthesized: HashMap<TestResult, usize> = HashMap::new();
    let mut write_jobs = Vec::with_capacity(finished.len());

    // Reverse order: the last tasks to finish get the most settling time
    // and their reports come out first.
    for task in finished.iter().rev() {
        let id = task.id.to_string();
        let records = repo.get_task_data(&id).unwrap_or_default();

        let terminal = records
            .iter()
            .rev()
            .find(|m| m.status.as_deref() == Some("finished") && m.result.is_some());
        let result = match terminal.and_then(|m| m.parsed_result()) {
            Some(result) => result,
            None => {
                // Labelled failure, or a task that vanished without a
                // terminal record: synthesize an error.
                *synthesized.entry(TestResult::Error).or_default() += 1;
                TestResult::Error
            }
        };

        let time_start = records.first().and_then(|m| m.time);
        let time_end = terminal.and_then(|m| m.time);
        let time_elapsed = match (time_start, time_end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        };

        if repo.claim_end_notification(&id) {
            inner.emit(RunEvent::TestEnded {
                id: id.clone(),
                result,
                time_elapsed,
            });
        }

        reports.push(TaskReport {
            id,
            result,
            label: task.label.map(|l| l.to_string()),
            time_start,
            time_end,
            time_elapsed,
            output_dir: records.iter().find_map(|m| m.output_dir.clone()),
        });
        write_jobs.push((task.id.str_filesystem(), records));
    }

    let base = config.base_logdir.join("test-results");
    let store_debug = config.store_debug;
    let warnings = tokio::task::spawn_blocking(move || {
        let mut warnings = Vec::new();
        for (fs_id, records) in write_jobs {
            if let Err(err) = populate_task_logdir(&base, &fs_id, &records, store_debug) {
                warnings.push(format!("could not write results for {fs_id}: {err:#}"));
            }
        }
        warnings
    })
    .await
    .unwrap_or_default();
    for message in warnings {
        inner.emit(RunEvent::Warning { message });
    }

    let mut result_stats = repo.result_stats();
    for (result, count) in synthesized {
        *result_stats.entry(result).or_default() += count;
    }

    SuiteSummary {
        interrupted,
        result_stats,
        tasks: reports,
    }
}

/// Writes the per-task output layout:
/// `<base>/<fs-id>/{stdout,stderr,data[,debug]}`.
fn populate_task_logdir(
    base: &Path,
    fs_id: &str,
    records: &[StatusMessage],
    store_debug: bool,
) -> anyhow::Result<()> {
    let task_path = base.join(fs_id);
    std::fs::create_dir_all(&task_path)?;

    if let Some(last) = records.last() {
        if let Some(stdout) = last.stdout_bytes() {
            std::fs::write(task_path.join("stdout"), stdout)?;
        }
        if let Some(stderr) = last.stderr_bytes() {
            std::fs::write(task_path.join("stderr"), stderr)?;
        }
    }

    if let Some(output_dir) = records.iter().find_map(|m| m.output_dir.as_deref()) {
        std::fs::write(task_path.join("data"), format!("{output_dir}\n"))?;
    }

    if store_debug {
        let json = serde_json::to_string(records)?;
        std::fs::write(task_path.join("debug"), json)?;
    }

    Ok(())
}
