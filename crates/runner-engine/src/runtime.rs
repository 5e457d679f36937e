use std::fmt;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use taskforge_core::id::TaskId;
use taskforge_core::runnable::Runnable;

/// Diagnostic label attached to a task by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskLabel {
    /// Deferred in `ready` because all running slots were taken.
    Waiting,
    /// Requirement check rejected the task.
    FailedOnTriage,
    /// The spawner could not start the task.
    FailedOnStart,
    /// The per-task deadline elapsed while the task was running.
    TimedOut,
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskLabel::Waiting => "WAITING",
            TaskLabel::FailedOnTriage => "FAILED ON TRIAGE",
            TaskLabel::FailedOnStart => "FAILED ON START",
            TaskLabel::TimedOut => "FAILED W/ TIMEOUT",
        })
    }
}

/// Handle to a task spawned as a child process.
pub(crate) struct ProcessHandle {
    pub(crate) child: Child,
    /// Cached exit, so repeated waits return immediately. A wait error is
    /// recorded as an exit with no status.
    pub(crate) exit: Option<Option<ExitStatus>>,
}

/// Handle to a task running as a future on the engine's own runtime.
pub(crate) struct InProcessHandle {
    pub(crate) done: watch::Receiver<bool>,
    pub(crate) abort: AbortHandle,
}

/// What the spawner stored when it started the task.
pub(crate) enum SpawnHandle {
    Process(ProcessHandle),
    InProcess(InProcessHandle),
}

/// A runnable plus the mutable scheduling state the engine attaches to it.
///
/// Owned by exactly one state-machine queue at a time, except while a worker
/// is carrying it between queues. `spawn_handle` is set once, by the spawner,
/// during the start phase.
pub(crate) struct RuntimeTask {
    pub(crate) id: TaskId,
    pub(crate) runnable: Runnable,
    pub(crate) spawn_handle: Option<SpawnHandle>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) label: Option<TaskLabel>,
    /// Status services the spawned payload must report to.
    pub(crate) status_services: Vec<String>,
}

impl RuntimeTask {
    pub(crate) fn new(id: TaskId, runnable: Runnable, status_services: Vec<String>) -> Self {
        Self {
            id,
            runnable,
            spawn_handle: None,
            deadline: None,
            label: None,
            status_services,
        }
    }
}

impl fmt::Debug for RuntimeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeTask")
            .field("id", &self.id.to_string())
            .field("kind", &self.runnable.kind)
            .field("label", &self.label)
            .field("has_handle", &self.spawn_handle.is_some())
            .finish()
    }
}
