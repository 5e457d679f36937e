use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use taskforge_core::runnable::task_command_args;

use crate::runtime::{ProcessHandle, RuntimeTask, SpawnHandle};
use crate::spawner::Spawner;

/// Runs each task as a child process: `<runner-bin> task-run <task-args>`.
///
/// The child reports its result over the status channel; its exit code is
/// never consulted.
pub(crate) struct ProcessSpawner {
    runner_bin: String,
}

impl ProcessSpawner {
    pub(crate) fn new() -> Self {
        // The engine and the task entry point live in the same binary.
        let runner_bin = std::env::current_exe()
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "taskforge".to_string());
        Self { runner_bin }
    }

    #[cfg(test)]
    pub(crate) fn with_runner_bin(runner_bin: impl Into<String>) -> Self {
        Self {
            runner_bin: runner_bin.into(),
        }
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    fn name(&self) -> &'static str {
        "process"
    }

    fn can_handle(&self, kind: &str) -> bool {
        matches!(kind, "noop" | "exec")
    }

    async fn spawn_task(&self, task: &mut RuntimeTask) -> bool {
        let id = task.id.to_string();
        let args = task_command_args(&task.runnable, &id, &task.status_services);

        let spawned = Command::new(&self.runner_bin)
            .arg("task-run")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                task.spawn_handle = Some(SpawnHandle::Process(ProcessHandle { child, exit: None }));
                true
            }
            Err(err) => {
                tracing::warn!("could not spawn {id}: {err}");
                false
            }
        }
    }

    async fn wait_task(&self, task: &mut RuntimeTask) {
        let Some(SpawnHandle::Process(handle)) = task.spawn_handle.as_mut() else {
            return;
        };
        if handle.exit.is_some() {
            return;
        }
        match handle.child.wait().await {
            Ok(status) => handle.exit = Some(Some(status)),
            // A wait error means the child is gone one way or another.
            Err(err) => {
                tracing::debug!("wait on {} failed: {err}", task.id);
                handle.exit = Some(None);
            }
        }
    }

    fn is_task_alive(&self, task: &mut RuntimeTask) -> bool {
        let Some(SpawnHandle::Process(handle)) = task.spawn_handle.as_mut() else {
            return false;
        };
        if handle.exit.is_some() {
            return false;
        }
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                handle.exit = Some(Some(status));
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    async fn kill_task(&self, task: &mut RuntimeTask) {
        let Some(SpawnHandle::Process(handle)) = task.spawn_handle.as_mut() else {
            return;
        };
        if handle.exit.is_none() {
            if let Err(err) = handle.child.kill().await {
                tracing::debug!("kill on {} failed: {err}", task.id);
            }
            handle.exit = Some(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use taskforge_core::id::TaskId;
    use taskforge_core::runnable::Runnable;

    fn task() -> RuntimeTask {
        RuntimeTask::new(
            TaskId::new("t", 1, "noop", 1),
            Runnable::new("noop", "noop"),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn missing_binary_fails_the_start() {
        let spawner = ProcessSpawner::with_runner_bin("/no/such/runner");
        let mut task = task();
        assert!(!spawner.spawn_task(&mut task).await);
        assert!(task.spawn_handle.is_none());
        assert!(!spawner.is_task_alive(&mut task));
    }

    #[tokio::test]
    async fn wait_is_repeatable_after_exit() {
        // Stand in an arbitrary short-lived command for the runner binary;
        // only handle mechanics are under test here.
        let spawner = ProcessSpawner::with_runner_bin("/bin/true");
        let mut task = task();
        assert!(spawner.spawn_task(&mut task).await);

        spawner.wait_task(&mut task).await;
        assert!(!spawner.is_task_alive(&mut task));
        spawner.wait_task(&mut task).await;
        assert!(!spawner.is_task_alive(&mut task));
    }

    #[tokio::test]
    async fn kill_terminates_a_long_running_child() {
        let spawner = ProcessSpawner::new();
        let mut task = task();
        // Hand-build the handle around a genuinely lingering child; only
        // the kill/liveness mechanics are under test here.
        let child = Command::new("/bin/sh")
            .args(["-c", "sleep 30"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        task.spawn_handle = Some(SpawnHandle::Process(ProcessHandle { child, exit: None }));

        assert!(spawner.is_task_alive(&mut task));
        spawner.kill_task(&mut task).await;
        assert!(!spawner.is_task_alive(&mut task));
    }
}
