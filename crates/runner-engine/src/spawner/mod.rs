use std::sync::Arc;

use async_trait::async_trait;

use crate::runtime::RuntimeTask;

mod inprocess;
mod process;

pub(crate) use inprocess::InProcessSpawner;
pub(crate) use process::ProcessSpawner;

/// Requirement value that the engine itself satisfies.
const CORE_REQUIREMENT: &str = "taskforge";

/// The capability set every spawner variant implements.
///
/// `is_task_alive` is the single source of truth for liveness; the state
/// machine never infers it from timers alone.
#[async_trait]
pub(crate) trait Spawner: Send + Sync {
    /// Registry name, matched against the `spawner` config option.
    fn name(&self) -> &'static str;

    /// Whether this spawner can execute runnables of `kind`.
    fn can_handle(&self, kind: &str) -> bool;

    /// Starts the task and stores its spawn handle. Returns `false` when
    /// the task could not be started; the state machine finishes it as
    /// `FAILED ON START`.
    async fn spawn_task(&self, task: &mut RuntimeTask) -> bool;

    /// Waits until the spawn handle is known to have completed. Does not
    /// consume the handle; once completed, returns immediately on every
    /// later call. A wait error counts as completion.
    async fn wait_task(&self, task: &mut RuntimeTask);

    /// True while the spawn handle exists and has not terminated.
    fn is_task_alive(&self, task: &mut RuntimeTask) -> bool;

    /// Forcibly terminates the task. Called when the per-task deadline
    /// fires, so a timed-out payload does not outlive its slot.
    async fn kill_task(&self, task: &mut RuntimeTask);

    /// Evaluates the runnable's declared requirements, and whether this
    /// spawner handles its kind at all.
    async fn check_task_requirements(&self, task: &RuntimeTask) -> bool {
        if !self.can_handle(&task.runnable.kind) {
            return false;
        }
        requirements_ok(task)
    }
}

/// An empty requirement list passes; a `core = taskforge` requirement is
/// satisfied by construction; anything else is unknown and fails.
fn requirements_ok(task: &RuntimeTask) -> bool {
    task.runnable
        .requirements
        .iter()
        .all(|req| req.kind == "core" && req.value == CORE_REQUIREMENT)
}

/// Build-time spawner registry; selection is by name.
pub(crate) fn by_name(name: &str) -> anyhow::Result<Arc<dyn Spawner>> {
    match name {
        "process" => Ok(Arc::new(ProcessSpawner::new())),
        "inprocess" => Ok(Arc::new(InProcessSpawner::new())),
        other => anyhow::bail!("unknown spawner {other:?} (available: process, inprocess)"),
    }
}
