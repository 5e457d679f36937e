//! Public API types for the `taskforge` scheduling engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use taskforge_core::message::TestResult;
use taskforge_core::runnable::Runnable;

/// Configuration for one suite run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Endpoint the status server binds and tasks report to. `HOST:PORT`
    /// is TCP; anything without a `:` is a filesystem socket path. A TCP
    /// port of 0 picks a free port; tasks are handed the actual one.
    pub status_server_uri: String,

    /// Which spawner variant starts the tasks (`process` or `inprocess`).
    pub spawner: String,

    /// Cap on tasks running at once. The engine drives the run with
    /// `max_parallel_tasks + 2` workers.
    pub max_parallel_tasks: usize,

    /// Randomize task order at seeding.
    pub shuffle: bool,

    /// Wall-clock cap on the entire suite. The summary carries the
    /// interrupted marker when it fires; collation still runs.
    pub job_timeout: Option<Duration>,

    /// Soft per-task deadline; an expired task is finished as timed out
    /// and its payload is killed.
    pub task_timeout: Duration,

    /// Job log directory; per-task output lands under
    /// `<base_logdir>/test-results/<task-fs-id>/`.
    pub base_logdir: PathBuf,

    /// Also write a `debug` file per task with the full status record log.
    pub store_debug: bool,
}

impl RunnerConfig {
    /// Default status server endpoint.
    pub const DEFAULT_STATUS_SERVER_URI: &'static str = "127.0.0.1:8888";

    /// Default spawner variant.
    pub const DEFAULT_SPAWNER: &'static str = "process";

    /// Default soft per-task deadline.
    pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(15);

    /// A configuration with defaults for everything but the log directory:
    /// process spawner, CPU-count parallelism, 15 s task deadline.
    pub fn new(base_logdir: impl Into<PathBuf>) -> Self {
        Self {
            status_server_uri: Self::DEFAULT_STATUS_SERVER_URI.to_string(),
            spawner: Self::DEFAULT_SPAWNER.to_string(),
            max_parallel_tasks: default_parallel_tasks(),
            shuffle: false,
            job_timeout: None,
            task_timeout: Self::DEFAULT_TASK_TIMEOUT,
            base_logdir: base_logdir.into(),
            store_debug: false,
        }
    }
}

/// Number of CPUs, the default running-task cap.
pub fn default_parallel_tasks() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A named, ordered bag of runnables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    /// Suite name, embedded in every task identifier.
    pub name: String,
    /// The tasks to run.
    pub tests: Vec<Runnable>,
}

impl TestSuite {
    /// A suite named `name` over `tests`.
    pub fn new(name: impl Into<String>, tests: Vec<Runnable>) -> Self {
        Self {
            name: name.into(),
            tests,
        }
    }
}

/// Run event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// The run started.
    Started,
    /// A stop was requested; the run will be collated as interrupted.
    StopRequested,
    /// A task reported `started`.
    TestStarted {
        /// Task id.
        id: String,
        /// The task's advertised output directory.
        output_dir: String,
    },
    /// A task reported a terminal record, or collation synthesized one.
    TestEnded {
        /// Task id.
        id: String,
        /// Terminal result.
        result: TestResult,
        /// Seconds between the task's first and terminal records, when
        /// both carried timestamps.
        time_elapsed: Option<f64>,
    },
    /// A non-fatal problem worth surfacing.
    Warning {
        /// Warning message.
        message: String,
    },
    /// A fatal problem; the run is ending early.
    Error {
        /// Error message.
        message: String,
    },
    /// The run is over; the summary is available from the handle.
    Stopped,
}

/// Per-task entry of a [`SuiteSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task id.
    pub id: String,
    /// Terminal result; synthesized as `error` for tasks that never sent
    /// a terminal record.
    pub result: TestResult,
    /// Scheduler label, when the task did not finish normally
    /// (e.g. `FAILED ON TRIAGE`).
    pub label: Option<String>,
    /// Timestamp of the task's first status record.
    pub time_start: Option<f64>,
    /// Timestamp of the task's terminal record.
    pub time_end: Option<f64>,
    /// `time_end - time_start`, when both are known.
    pub time_elapsed: Option<f64>,
    /// The task's advertised output directory, when it reported one.
    pub output_dir: Option<String>,
}

/// Final outcome of a suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    /// Whether the run was cut short by the job timeout or a stop request.
    pub interrupted: bool,
    /// Number of tasks per terminal result, synthesized results included.
    pub result_stats: HashMap<TestResult, usize>,
    /// One entry per finished task, in collation order.
    pub tasks: Vec<TaskReport>,
}

/// Handle to a suite run in progress.
pub struct RunHandle {
    pub(crate) inner: std::sync::Arc<crate::runner::RunInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<SuiteSummary>>,
}

impl RunHandle {
    /// Subscribe to the run event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Request an interrupt: workers are abandoned, the summary carries the
    /// interrupted marker, collation still runs.
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the run to finish and return its summary.
    pub async fn wait(self) -> anyhow::Result<SuiteSummary> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("run task join error: {err}")),
        }
    }
}

/// Start a suite run on the current runtime.
pub fn start_suite(config: RunnerConfig, suite: TestSuite) -> RunHandle {
    crate::runner::start_suite(config, suite)
}
