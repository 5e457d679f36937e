use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::watch;

use taskforge_core::run::run_runnable;

use crate::runtime::{InProcessHandle, RuntimeTask, SpawnHandle};
use crate::spawner::Spawner;

/// Runs each task as a future on the engine's own runtime.
///
/// The payload still reports through the status channel, exactly like a
/// child process would; the spawn handle is a completion watch plus an
/// abort handle.
pub(crate) struct InProcessSpawner {
    base_dir: PathBuf,
}

impl InProcessSpawner {
    pub(crate) fn new() -> Self {
        Self {
            base_dir: std::env::temp_dir().join(format!("taskforge-{}", std::process::id())),
        }
    }
}

#[async_trait]
impl Spawner for InProcessSpawner {
    fn name(&self) -> &'static str {
        "inprocess"
    }

    fn can_handle(&self, kind: &str) -> bool {
        matches!(kind, "noop" | "exec")
    }

    async fn spawn_task(&self, task: &mut RuntimeTask) -> bool {
        let (done_tx, done_rx) = watch::channel(false);
        let runnable = task.runnable.clone();
        let id = task.id.to_string();
        let status_services = task.status_services.clone();
        let output_dir = self.base_dir.join(task.id.str_filesystem());

        let join = tokio::spawn(async move {
            if let Err(err) = run_runnable(&runnable, &id, &status_services, &output_dir).await {
                tracing::warn!("in-process task {id} failed: {err:#}");
            }
            let _ = done_tx.send(true);
        });

        task.spawn_handle = Some(SpawnHandle::InProcess(InProcessHandle {
            done: done_rx,
            abort: join.abort_handle(),
        }));
        true
    }

    async fn wait_task(&self, task: &mut RuntimeTask) {
        let Some(SpawnHandle::InProcess(handle)) = task.spawn_handle.as_mut() else {
            return;
        };
        // A closed channel means the payload was aborted or panicked;
        // either way it is done.
        let _ = handle.done.wait_for(|done| *done).await;
    }

    fn is_task_alive(&self, task: &mut RuntimeTask) -> bool {
        let Some(SpawnHandle::InProcess(handle)) = task.spawn_handle.as_mut() else {
            return false;
        };
        !*handle.done.borrow() && handle.done.has_changed().is_ok()
    }

    async fn kill_task(&self, task: &mut RuntimeTask) {
        if let Some(SpawnHandle::InProcess(handle)) = task.spawn_handle.as_mut() {
            handle.abort.abort();
        }
    }
}
