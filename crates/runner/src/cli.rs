use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use taskforge_core::runnable::Runnable;
use taskforge_engine::RunnerConfig;
use taskforge_engine::api::default_parallel_tasks;

fn parse_duration_secs(input: &str) -> Result<Duration, String> {
    let secs: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("invalid number of seconds: {input:?}"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("invalid duration: {input:?}"))
}

fn parse_kwarg(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {input:?}"))
}

fn default_max_parallel() -> u16 {
    default_parallel_tasks().min(512) as u16
}

/// Turns a test reference into a runnable: `noop`, `noop:<anything>`,
/// `exec:<command>`, or a bare command path.
pub fn parse_test_ref(reference: &str) -> Runnable {
    if reference == "noop" {
        return Runnable::new("noop", "noop");
    }
    if let Some((kind, rest)) = reference.split_once(':') {
        if matches!(kind, "noop" | "exec") {
            return Runnable::new(kind, rest);
        }
    }
    Runnable::new("exec", reference)
}

#[derive(Debug, Parser)]
#[command(name = "taskforge", version, about = "concurrent test-task runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a suite of test tasks.
    Run(RunArgs),
    /// Entry point for a single spawned task (used by the process spawner).
    #[command(name = "task-run", hide = true)]
    TaskRun(TaskRunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Test references: `noop`, `exec:/bin/true`, or a bare command path.
    #[arg(required = true)]
    pub refs: Vec<String>,

    #[arg(long, env = "TASKFORGE_SUITE_NAME", default_value = "suite")]
    pub suite_name: String,

    /// Endpoint for the status server: HOST:PORT, or a socket path.
    #[arg(
        long,
        env = "TASKFORGE_STATUS_SERVER_URI",
        default_value = RunnerConfig::DEFAULT_STATUS_SERVER_URI
    )]
    pub status_server_uri: String,

    /// Spawner variant: `process` or `inprocess`.
    #[arg(long, env = "TASKFORGE_SPAWNER", default_value = RunnerConfig::DEFAULT_SPAWNER)]
    pub spawner: String,

    /// Number of tasks allowed to run in parallel.
    #[arg(
        short = 'p',
        long,
        env = "TASKFORGE_MAX_PARALLEL_TASKS",
        default_value_t = default_max_parallel(),
        value_parser = clap::value_parser!(u16).range(1..=512)
    )]
    pub max_parallel_tasks: u16,

    /// Randomize task order.
    #[arg(long, env = "TASKFORGE_SHUFFLE", default_value_t = false)]
    pub shuffle: bool,

    /// Wall-clock cap on the whole run, in seconds.
    #[arg(long, value_name = "SECONDS", value_parser = parse_duration_secs)]
    pub job_timeout: Option<Duration>,

    /// Soft per-task deadline, in seconds.
    #[arg(long, value_name = "SECONDS", default_value = "15", value_parser = parse_duration_secs)]
    pub task_timeout: Duration,

    /// Job log directory. Defaults to a timestamped directory under
    /// `taskforge-logs/`.
    #[arg(long, env = "TASKFORGE_LOGDIR")]
    pub logdir: Option<PathBuf>,

    /// Also keep a per-task `debug` file with every status record received.
    #[arg(long, default_value_t = false)]
    pub store_debug: bool,
}

#[derive(Debug, Args)]
pub struct TaskRunArgs {
    /// Task id to report as.
    #[arg(long)]
    pub id: String,

    /// Runnable kind.
    #[arg(long)]
    pub kind: String,

    /// Runnable URI.
    #[arg(long)]
    pub uri: String,

    /// Positional payload arguments.
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// KEY=VALUE pairs exported to the payload environment.
    #[arg(long = "kwarg", value_parser = parse_kwarg)]
    pub kwargs: Vec<(String, String)>,

    /// Status services to report to; may be given multiple times.
    #[arg(long = "status-server")]
    pub status_servers: Vec<String>,

    /// Where to put the task's own output. Defaults to a directory under
    /// the system temp dir.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_resolve_to_runnables() {
        let noop = parse_test_ref("noop");
        assert_eq!((noop.kind.as_str(), noop.uri.as_str()), ("noop", "noop"));

        let exec = parse_test_ref("exec:/bin/true");
        assert_eq!((exec.kind.as_str(), exec.uri.as_str()), ("exec", "/bin/true"));

        let bare = parse_test_ref("/bin/true");
        assert_eq!((bare.kind.as_str(), bare.uri.as_str()), ("exec", "/bin/true"));
    }

    #[test]
    fn kwarg_parser_requires_an_equals_sign() {
        assert_eq!(
            parse_kwarg("LANG=C").unwrap(),
            ("LANG".to_string(), "C".to_string())
        );
        assert!(parse_kwarg("LANG").is_err());
    }

    #[test]
    fn duration_parser_accepts_fractions() {
        assert_eq!(
            parse_duration_secs("0.5").unwrap(),
            Duration::from_millis(500)
        );
        assert!(parse_duration_secs("never").is_err());
    }

    #[test]
    fn task_run_surface_parses() {
        let cli = Cli::parse_from([
            "taskforge",
            "task-run",
            "--id",
            "s-1-noop",
            "--kind",
            "noop",
            "--uri",
            "noop",
            "--status-server",
            "127.0.0.1:8888",
            "--kwarg",
            "LANG=C",
        ]);
        let Command::TaskRun(args) = cli.command else {
            panic!("expected task-run");
        };
        assert_eq!(args.id, "s-1-noop");
        assert_eq!(args.status_servers, ["127.0.0.1:8888"]);
        assert_eq!(args.kwargs, [("LANG".to_string(), "C".to_string())]);
    }
}
