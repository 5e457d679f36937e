use std::collections::VecDeque;

use tokio::sync::{Mutex, MutexGuard};

use crate::runtime::RuntimeTask;

/// The five disjoint phases a task moves through.
///
/// All mutations happen through [`TaskStateMachine::lock`]; the mutex is held
/// only across queue operations, never across a spawn or wait call.
#[derive(Default)]
pub(crate) struct TaskQueues {
    pub(crate) requested: VecDeque<RuntimeTask>,
    pub(crate) triaging: VecDeque<RuntimeTask>,
    pub(crate) ready: VecDeque<RuntimeTask>,
    pub(crate) started: VecDeque<RuntimeTask>,
    pub(crate) finished: VecDeque<RuntimeTask>,
    /// Running slots claimed by workers that are currently inside
    /// `spawn_task`, before the task lands in `started`. Counted against
    /// the cap so concurrent starts cannot overshoot it.
    pub(crate) starting: usize,
    /// Running slots held by workers that popped a task from `started` and
    /// are waiting on its handle. Those tasks are still occupying their
    /// slot even though they are out of the queue.
    pub(crate) monitoring: usize,
}

impl TaskQueues {
    /// Occupied running slots: tasks in `started` plus slots claimed by
    /// in-flight start and monitor steps.
    pub(crate) fn running_slots(&self) -> usize {
        self.started.len() + self.starting + self.monitoring
    }
}

/// Represents all phases that a task can go through in its life.
pub(crate) struct TaskStateMachine {
    queues: Mutex<TaskQueues>,
}

impl TaskStateMachine {
    pub(crate) fn new(tasks: Vec<RuntimeTask>) -> Self {
        Self {
            queues: Mutex::new(TaskQueues {
                requested: tasks.into(),
                ..TaskQueues::default()
            }),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, TaskQueues> {
        self.queues.lock().await
    }

    /// True once nothing is left outside `finished`.
    pub(crate) async fn complete(&self) -> bool {
        let q = self.queues.lock().await;
        q.requested.is_empty()
            && q.triaging.is_empty()
            && q.ready.is_empty()
            && q.started.is_empty()
            && q.starting == 0
            && q.monitoring == 0
    }

    /// Drains the `finished` queue, in the order tasks arrived there.
    pub(crate) async fn take_finished(&self) -> Vec<RuntimeTask> {
        let mut q = self.queues.lock().await;
        q.finished.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use taskforge_core::id::TaskId;
    use taskforge_core::runnable::Runnable;

    fn task(number: u32) -> RuntimeTask {
        RuntimeTask::new(
            TaskId::new("t", number, "noop", 2),
            Runnable::new("noop", "noop"),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn complete_only_when_all_queues_drain() {
        let tsm = TaskStateMachine::new(vec![task(1), task(2)]);
        assert!(!tsm.complete().await);

        {
            let mut q = tsm.lock().await;
            let t = q.requested.pop_back().unwrap();
            q.finished.push_back(t);
        }
        assert!(!tsm.complete().await);

        {
            let mut q = tsm.lock().await;
            let t = q.requested.pop_back().unwrap();
            q.finished.push_back(t);
        }
        assert!(tsm.complete().await);
        assert_eq!(tsm.take_finished().await.len(), 2);
    }

    #[tokio::test]
    async fn claimed_slots_keep_the_machine_incomplete() {
        let tsm = TaskStateMachine::new(Vec::new());
        {
            let mut q = tsm.lock().await;
            q.starting = 1;
        }
        assert!(!tsm.complete().await);
        {
            let mut q = tsm.lock().await;
            q.starting = 0;
        }
        assert!(tsm.complete().await);
    }
}
