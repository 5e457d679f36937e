use std::path::PathBuf;

use taskforge_core::run::run_runnable;
use taskforge_core::runnable::Runnable;

use crate::cli::TaskRunArgs;

fn fs_safe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn default_output_dir(task_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "taskforge-task-{}-{}",
        std::process::id(),
        fs_safe(task_id)
    ))
}

/// Body of `taskforge task-run`: execute one runnable and report its life
/// cycle to the listed status services.
///
/// The exit code is always 0 when the payload could be driven at all; the
/// scheduler reads results from the status stream, not from exit codes.
pub async fn run(args: TaskRunArgs) -> anyhow::Result<i32> {
    let runnable = Runnable {
        kind: args.kind,
        uri: args.uri,
        args: args.args,
        kwargs: args.kwargs.into_iter().collect(),
        tags: Vec::new(),
        requirements: Vec::new(),
    };
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| default_output_dir(&args.id));

    run_runnable(&runnable, &args.id, &args.status_servers, &output_dir).await?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_is_filesystem_safe() {
        let dir = default_output_dir("s-1-/bin/true");
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("s-1-_bin_true"));
        assert!(!name.contains('/'));
    }
}
