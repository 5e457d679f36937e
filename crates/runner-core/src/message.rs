use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

/// Seconds since a process-local monotonic epoch.
///
/// Records emitted by one task all carry timestamps from the same process,
/// so comparisons within a task id are meaningful; comparisons across
/// processes are not, and nothing relies on them.
pub fn monotonic_secs() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Terminal outcome of a test task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// The test passed.
    Pass,
    /// The test ran to completion and failed.
    Fail,
    /// The test could not run or run infrastructure broke.
    Error,
    /// The test was skipped.
    Skip,
    /// The test passed with warnings.
    Warn,
    /// The test was cancelled.
    Cancel,
    /// The run was interrupted while the test was active.
    Interrupted,
}

impl TestResult {
    /// Lowercase wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestResult::Pass => "pass",
            TestResult::Fail => "fail",
            TestResult::Error => "error",
            TestResult::Skip => "skip",
            TestResult::Warn => "warn",
            TestResult::Cancel => "cancel",
            TestResult::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a result label from the wire.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized test result: {0:?}")]
pub struct ParseResultError(pub String);

impl FromStr for TestResult {
    type Err = ParseResultError;

    // Case-insensitive, matching what remote runners actually send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Ok(TestResult::Pass),
            "fail" => Ok(TestResult::Fail),
            "error" => Ok(TestResult::Error),
            "skip" => Ok(TestResult::Skip),
            "warn" => Ok(TestResult::Warn),
            "cancel" => Ok(TestResult::Cancel),
            "interrupted" => Ok(TestResult::Interrupted),
            _ => Err(ParseResultError(s.to_string())),
        }
    }
}

/// One self-describing status record, as carried on the wire.
///
/// Decoding is lenient: every field is optional at this level and unknown
/// keys are preserved in `extra`. Required-field validation happens in the
/// status repository, which knows which fields each `status` value needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Task id the record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Status label: `started`, `running`, `finished`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Seconds since the sender's monotonic epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    /// Terminal result, present only on `finished` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// The task's own output directory, required on `started` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// base64-encoded captured stdout, on terminal records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// base64-encoded captured stderr, on terminal records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Any keys this version does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StatusMessage {
    /// A `started` record carrying the task's advertised output directory.
    pub fn started(id: impl Into<String>, output_dir: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: Some("started".to_string()),
            time: Some(monotonic_secs()),
            output_dir: Some(output_dir.into()),
            ..Self::default()
        }
    }

    /// A `running` heartbeat record.
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: Some("running".to_string()),
            time: Some(monotonic_secs()),
            ..Self::default()
        }
    }

    /// A terminal `finished` record with captured output.
    pub fn finished(
        id: impl Into<String>,
        result: TestResult,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Self {
        Self {
            id: Some(id.into()),
            status: Some("finished".to_string()),
            time: Some(monotonic_secs()),
            result: Some(result.to_string()),
            stdout: (!stdout.is_empty()).then(|| B64.encode(stdout)),
            stderr: (!stderr.is_empty()).then(|| B64.encode(stderr)),
            ..Self::default()
        }
    }

    /// Decodes one newline-delimited frame. Surrounding whitespace is
    /// ignored.
    pub fn decode(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame.trim())
    }

    /// Encodes this record as one wire frame, newline included.
    pub fn encode(&self) -> serde_json::Result<String> {
        let mut frame = serde_json::to_string(self)?;
        frame.push('\n');
        Ok(frame)
    }

    /// Captured stdout bytes, if present and decodable.
    pub fn stdout_bytes(&self) -> Option<Vec<u8>> {
        self.stdout.as_deref().and_then(|s| B64.decode(s).ok())
    }

    /// Captured stderr bytes, if present and decodable.
    pub fn stderr_bytes(&self) -> Option<Vec<u8>> {
        self.stderr.as_deref().and_then(|s| B64.decode(s).ok())
    }

    /// The terminal result parsed from the wire label, if any.
    pub fn parsed_result(&self) -> Option<TestResult> {
        self.result.as_deref().and_then(|r| r.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_unknown_keys() {
        let msg =
            StatusMessage::decode(r#"{"id": "1-x", "status": "running", "time": 1.5, "pid": 42}"#)
                .unwrap();
        assert_eq!(msg.id.as_deref(), Some("1-x"));
        assert_eq!(msg.status.as_deref(), Some("running"));
        assert_eq!(msg.time, Some(1.5));
        assert_eq!(msg.extra.get("pid"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn decode_tolerates_missing_id() {
        let msg = StatusMessage::decode(r#"{"status": "running", "time": 1.0}"#).unwrap();
        assert!(msg.id.is_none());
    }

    #[test]
    fn finished_record_encodes_output_as_base64() {
        let msg = StatusMessage::finished("1-x", TestResult::Pass, b"out", b"");
        assert_eq!(msg.stdout_bytes().as_deref(), Some(b"out".as_slice()));
        assert!(msg.stderr.is_none());
        assert!(msg.encode().unwrap().ends_with('\n'));
    }

    #[test]
    fn result_parse_is_case_insensitive() {
        assert_eq!("PASS".parse::<TestResult>().unwrap(), TestResult::Pass);
        assert_eq!("Warn".parse::<TestResult>().unwrap(), TestResult::Warn);
        assert!("maybe".parse::<TestResult>().is_err());
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = monotonic_secs();
        let b = monotonic_secs();
        assert!(b >= a);
    }
}
