use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An immutable description of a unit of work.
///
/// The scheduler does not interpret `kind` beyond handing the runnable to a
/// spawner that claims capability for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runnable {
    /// Runnable kind, e.g. `noop` or `exec`.
    pub kind: String,
    /// What to run: a command path for `exec`, ignored for `noop`.
    pub uri: String,
    /// Positional arguments, passed as argv to `exec` payloads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Keyword arguments, exported as environment variables to `exec`
    /// payloads.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<String, String>,
    /// Free-form tags. Carried but not interpreted by the scheduler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Requirements evaluated during triage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,
}

impl Runnable {
    /// A runnable with just a kind and a URI.
    pub fn new(kind: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            uri: uri.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            tags: Vec::new(),
            requirements: Vec::new(),
        }
    }
}

/// A declared requirement of a runnable, checked before the task may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Requirement kind. Only `core` is recognized.
    pub kind: String,
    /// Requirement value, e.g. `taskforge`.
    pub value: String,
}

/// Serializes a runnable plus its reporting endpoints into the argument
/// vector understood by `taskforge task-run`.
pub fn task_command_args(
    runnable: &Runnable,
    task_id: &str,
    status_services: &[String],
) -> Vec<String> {
    let mut args = vec![
        "--id".to_string(),
        task_id.to_string(),
        "--kind".to_string(),
        runnable.kind.clone(),
        "--uri".to_string(),
        runnable.uri.clone(),
    ];
    for arg in &runnable.args {
        args.push("--arg".to_string());
        args.push(arg.clone());
    }
    for (key, value) in &runnable.kwargs {
        args.push("--kwarg".to_string());
        args.push(format!("{key}={value}"));
    }
    for uri in status_services {
        args.push("--status-server".to_string());
        args.push(uri.clone());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_args_round_trip_shape() {
        let mut runnable = Runnable::new("exec", "/bin/true");
        runnable.args = vec!["-v".to_string()];
        runnable.kwargs.insert("LANG".to_string(), "C".to_string());

        let args = task_command_args(&runnable, "s-01-/bin/true", &["127.0.0.1:8888".to_string()]);
        assert_eq!(
            args,
            vec![
                "--id",
                "s-01-/bin/true",
                "--kind",
                "exec",
                "--uri",
                "/bin/true",
                "--arg",
                "-v",
                "--kwarg",
                "LANG=C",
                "--status-server",
                "127.0.0.1:8888",
            ]
        );
    }

    #[test]
    fn optional_fields_are_skipped_in_json() {
        let runnable = Runnable::new("noop", "noop");
        let json = serde_json::to_string(&runnable).unwrap();
        assert_eq!(json, r#"{"kind":"noop","uri":"noop"}"#);
    }
}
