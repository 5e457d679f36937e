use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::broadcast;

use taskforge_core::message::{StatusMessage, TestResult};

use crate::api::RunEvent;

/// A status record could not be accepted.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StatusError {
    /// The record lacks a key required for its status.
    #[error("status message missing required data: {0}")]
    MissingData(&'static str),
    /// A terminal record carried a result label outside the known set.
    #[error("unrecognized result in status message: {0:?}")]
    UnknownResult(String),
}

#[derive(Default)]
struct RepoInner {
    /// Every record ever received, per task id, in arrival order.
    all_data: HashMap<String, Vec<StatusMessage>>,
    /// Most up-to-date status per task, determined by the timestamp
    /// embedded in the record, not by arrival order.
    latest: HashMap<String, (String, f64)>,
    /// Task ids per terminal result.
    by_result: HashMap<TestResult, HashSet<String>>,
    started_notified: HashSet<String>,
    ended_notified: HashSet<String>,
}

impl RepoInner {
    fn update_latest(&mut self, msg: &StatusMessage) {
        let (Some(id), Some(status), Some(time)) = (&msg.id, &msg.status, msg.time) else {
            return;
        };
        match self.latest.get(id) {
            Some((_, current)) if time <= *current => {}
            _ => {
                self.latest.insert(id.clone(), (status.clone(), time));
            }
        }
    }

    fn append(&mut self, id: &str, msg: StatusMessage) {
        self.all_data.entry(id.to_string()).or_default().push(msg);
    }
}

/// Maintains tasks' status related data and provides aggregated info.
///
/// Safe to call from any number of connection handlers; every method is
/// serialized internally. Observer notifications go out through the run's
/// broadcast channel, at most once per task and event kind.
pub(crate) struct StatusRepo {
    inner: Mutex<RepoInner>,
    events: broadcast::Sender<RunEvent>,
}

impl StatusRepo {
    pub(crate) fn new(events: broadcast::Sender<RunEvent>) -> Self {
        Self {
            inner: Mutex::new(RepoInner::default()),
            events,
        }
    }

    /// Ingests one decoded record.
    pub(crate) fn process_message(&self, msg: StatusMessage) -> Result<(), StatusError> {
        let id = msg.id.clone().ok_or(StatusError::MissingData("id"))?;
        let mut inner = self.inner.lock().expect("status repo lock");
        inner.update_latest(&msg);

        match msg.status.as_deref() {
            Some("started") => {
                let output_dir = msg
                    .output_dir
                    .clone()
                    .ok_or(StatusError::MissingData("output_dir"))?;
                inner.append(&id, msg);
                if inner.started_notified.insert(id.clone()) {
                    let _ = self.events.send(RunEvent::TestStarted { id, output_dir });
                }
            }
            Some("finished") => {
                let raw = msg.result.clone().ok_or(StatusError::MissingData("result"))?;
                let result: TestResult =
                    raw.parse().map_err(|_| StatusError::UnknownResult(raw))?;
                let time_end = msg.time;
                inner.append(&id, msg);
                inner.by_result.entry(result).or_default().insert(id.clone());
                if inner.ended_notified.insert(id.clone()) {
                    let time_start = inner
                        .all_data
                        .get(&id)
                        .and_then(|records| records.first())
                        .and_then(|first| first.time);
                    let time_elapsed = match (time_start, time_end) {
                        (Some(start), Some(end)) => Some(end - start),
                        _ => None,
                    };
                    let _ = self.events.send(RunEvent::TestEnded {
                        id,
                        result,
                        time_elapsed,
                    });
                }
            }
            _ => inner.append(&id, msg),
        }
        Ok(())
    }

    /// Returns all data on a given task, by its id.
    pub(crate) fn get_task_data(&self, task_id: &str) -> Option<Vec<StatusMessage>> {
        self.inner
            .lock()
            .expect("status repo lock")
            .all_data
            .get(task_id)
            .cloned()
    }

    /// Returns the latest *appended* record for a task.
    pub(crate) fn get_latest_task_data(&self, task_id: &str) -> Option<StatusMessage> {
        self.inner
            .lock()
            .expect("status repo lock")
            .all_data
            .get(task_id)
            .and_then(|records| records.last().cloned())
    }

    /// Returns the authoritative status of a task: the record with the
    /// maximum embedded timestamp.
    pub(crate) fn get_task_status(&self, task_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("status repo lock")
            .latest
            .get(task_id)
            .map(|(status, _)| status.clone())
    }

    /// Number of tasks per terminal result.
    pub(crate) fn result_stats(&self) -> HashMap<TestResult, usize> {
        self.inner
            .lock()
            .expect("status repo lock")
            .by_result
            .iter()
            .map(|(result, ids)| (*result, ids.len()))
            .collect()
    }

    /// Claims the end-test notification for a task. Returns true when the
    /// caller is the first to claim it and should emit the event.
    pub(crate) fn claim_end_notification(&self, task_id: &str) -> bool {
        self.inner
            .lock()
            .expect("status repo lock")
            .ended_notified
            .insert(task_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (StatusRepo, broadcast::Receiver<RunEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (StatusRepo::new(tx), rx)
    }

    fn record(id: &str, status: &str, time: f64) -> StatusMessage {
        StatusMessage {
            id: Some(id.to_string()),
            status: Some(status.to_string()),
            time: Some(time),
            ..StatusMessage::default()
        }
    }

    #[test]
    fn latest_follows_embedded_time_not_arrival() {
        let (repo, _rx) = repo();

        let mut started = record("x", "started", 100.0);
        started.output_dir = Some("/tmp/x".to_string());
        repo.process_message(started).unwrap();
        repo.process_message(record("x", "running", 150.0)).unwrap();
        let mut finished = record("x", "finished", 120.0);
        finished.result = Some("pass".to_string());
        repo.process_message(finished).unwrap();

        assert_eq!(repo.get_task_data("x").unwrap().len(), 3);
        assert_eq!(repo.get_task_status("x").as_deref(), Some("running"));
        assert_eq!(
            repo.get_latest_task_data("x").unwrap().status.as_deref(),
            Some("finished")
        );
        assert_eq!(repo.result_stats()[&TestResult::Pass], 1);
    }

    #[test]
    fn missing_id_is_rejected_without_state_change() {
        let (repo, _rx) = repo();
        let msg = StatusMessage {
            status: Some("running".to_string()),
            time: Some(1.0),
            ..StatusMessage::default()
        };
        assert!(matches!(
            repo.process_message(msg),
            Err(StatusError::MissingData("id"))
        ));
        assert!(repo.result_stats().is_empty());
    }

    #[test]
    fn started_requires_output_dir() {
        let (repo, _rx) = repo();
        assert!(matches!(
            repo.process_message(record("x", "started", 1.0)),
            Err(StatusError::MissingData("output_dir"))
        ));
        // The record was not appended to the log.
        assert!(repo.get_task_data("x").is_none());
    }

    #[test]
    fn finished_requires_a_known_result() {
        let (repo, _rx) = repo();
        assert!(matches!(
            repo.process_message(record("x", "finished", 1.0)),
            Err(StatusError::MissingData("result"))
        ));
        let mut msg = record("x", "finished", 1.0);
        msg.result = Some("exploded".to_string());
        assert!(matches!(
            repo.process_message(msg),
            Err(StatusError::UnknownResult(_))
        ));
    }

    #[test]
    fn result_bucketing_is_idempotent() {
        let (repo, _rx) = repo();
        let mut msg = record("x", "finished", 1.0);
        msg.result = Some("PASS".to_string());
        repo.process_message(msg.clone()).unwrap();
        repo.process_message(msg).unwrap();
        assert_eq!(repo.result_stats()[&TestResult::Pass], 1);
    }

    #[test]
    fn observers_fire_once_per_task_and_kind() {
        let (repo, mut rx) = repo();

        let mut started = record("x", "started", 1.0);
        started.output_dir = Some("/tmp/x".to_string());
        repo.process_message(started.clone()).unwrap();
        repo.process_message(started).unwrap();

        let mut finished = record("x", "finished", 3.5);
        finished.result = Some("pass".to_string());
        repo.process_message(finished.clone()).unwrap();
        repo.process_message(finished).unwrap();

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RunEvent::TestStarted { id, .. } if id == "x"));
        match &events[1] {
            RunEvent::TestEnded {
                id,
                result,
                time_elapsed,
            } => {
                assert_eq!(id, "x");
                assert_eq!(*result, TestResult::Pass);
                assert_eq!(*time_elapsed, Some(2.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Collation cannot claim it again either.
        assert!(!repo.claim_end_notification("x"));
        assert!(repo.claim_end_notification("y"));
    }
}
