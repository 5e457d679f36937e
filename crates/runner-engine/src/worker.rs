use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::runtime::{RuntimeTask, TaskLabel};
use crate::spawner::Spawner;
use crate::state::TaskStateMachine;

/// Cap on tasks undergoing triage at once.
const MAX_TRIAGING: usize = 8;

/// Upper bound on one monitor wait, so a popped task re-enters `started`
/// promptly and the running-slot count stays accurate.
const MONITOR_POLL: Duration = Duration::from_millis(100);

/// Backoff when a full cycle found nothing to do.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// A cooperative driver that performs one step of each phase transition per
/// cycle: requested → triaging → ready → started → finished.
///
/// Any worker may pick up any task; there is no per-task ownership. The
/// state-machine mutex is held only across queue operations.
pub(crate) struct Worker {
    tsm: Arc<TaskStateMachine>,
    spawner: Arc<dyn Spawner>,
    max_triaging: usize,
    max_running: usize,
    task_timeout: Duration,
}

impl Worker {
    pub(crate) fn new(
        tsm: Arc<TaskStateMachine>,
        spawner: Arc<dyn Spawner>,
        max_running: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            tsm,
            spawner,
            max_triaging: MAX_TRIAGING,
            max_running,
            task_timeout,
        }
    }

    /// Pushes tasks forward until every task has finished.
    pub(crate) async fn run(&self) {
        loop {
            if self.tsm.complete().await {
                break;
            }
            let mut progress = self.bootstrap().await;
            progress |= self.triage().await;
            progress |= self.start().await;
            progress |= self.monitor().await;
            if !progress {
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
        }
    }

    /// Reads from `requested`, moves into `triaging`.
    async fn bootstrap(&self) -> bool {
        let mut q = self.tsm.lock().await;
        if q.triaging.len() >= self.max_triaging {
            return false;
        }
        match q.requested.pop_back() {
            Some(task) => {
                q.triaging.push_back(task);
                true
            }
            None => false,
        }
    }

    /// Reads from `triaging`, moves into either `ready` or `finished`.
    async fn triage(&self) -> bool {
        let Some(task) = self.tsm.lock().await.triaging.pop_back() else {
            return false;
        };
        let mut task = task;

        let ok = self.spawner.check_task_requirements(&task).await;

        let mut q = self.tsm.lock().await;
        if ok {
            q.ready.push_back(task);
        } else {
            task.label = Some(TaskLabel::FailedOnTriage);
            q.finished.push_back(task);
        }
        true
    }

    /// Reads from `ready`, moves into either `started` or `finished`.
    async fn start(&self) -> bool {
        let mut task = {
            let mut q = self.tsm.lock().await;
            let Some(mut task) = q.ready.pop_back() else {
                return false;
            };
            // Global rate limit on running tasks. The slot is claimed
            // before the lock is released, so concurrent starts cannot
            // overshoot the cap.
            if q.running_slots() >= self.max_running {
                task.label = Some(TaskLabel::Waiting);
                q.ready.push_front(task);
                return true;
            }
            q.starting += 1;
            task
        };

        let start_ok = self.spawner.spawn_task(&mut task).await;

        let mut q = self.tsm.lock().await;
        q.starting -= 1;
        if start_ok {
            task.label = None;
            task.deadline = Some(Instant::now() + self.task_timeout);
            q.started.push_back(task);
        } else {
            task.label = Some(TaskLabel::FailedOnStart);
            q.finished.push_back(task);
        }
        true
    }

    /// Reads from `started`, moves into `finished`.
    async fn monitor(&self) -> bool {
        let mut task = {
            let mut q = self.tsm.lock().await;
            let Some(task) = q.started.pop_back() else {
                return false;
            };
            // The task keeps occupying its running slot while popped.
            q.monitoring += 1;
            task
        };

        let now = Instant::now();
        let wait_until = match task.deadline {
            Some(deadline) => deadline.min(now + MONITOR_POLL),
            None => now + MONITOR_POLL,
        };
        let _ = tokio::time::timeout_at(wait_until, self.spawner.wait_task(&mut task)).await;

        let timed_out = task.deadline.is_some_and(|deadline| Instant::now() > deadline);
        if timed_out {
            // The payload does not get to outlive its slot.
            self.spawner.kill_task(&mut task).await;
            task.label = Some(TaskLabel::TimedOut);
            let mut q = self.tsm.lock().await;
            q.monitoring -= 1;
            q.finished.push_back(task);
        } else if !self.spawner.is_task_alive(&mut task) {
            let mut q = self.tsm.lock().await;
            q.monitoring -= 1;
            q.finished.push_back(task);
        } else {
            let mut q = self.tsm.lock().await;
            q.monitoring -= 1;
            q.started.push_front(task);
        }
        true
    }
}
