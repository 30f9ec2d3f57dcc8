//! Child process execution with a bounded wait.

use simflow_core::SimflowError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Exit status and captured streams of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout of a successful run, or an error carrying stderr.
    pub fn into_stdout(self, command: &str) -> Result<String, SimflowError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(SimflowError::ExternalTool {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}

/// Run `program` to completion, draining stdout and stderr together.
///
/// The child is killed if it outlives `timeout`.
pub async fn run_command(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, SimflowError> {
    let command_line = display_command(program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| SimflowError::ExternalTool {
        command: command_line.clone(),
        status: None,
        stderr: e.to_string(),
    })?;

    tracing::debug!(command = %command_line, "running scheduler command");

    // On timeout the future owning the child is dropped, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(SimflowError::ExternalTool {
                command: command_line,
                status: None,
                stderr: format!("failed to wait: {e}"),
            });
        }
        Err(_) => {
            tracing::warn!(command = %command_line, timeout_secs = timeout.as_secs(), "command timed out");
            return Err(SimflowError::ExternalTool {
                command: command_line,
                status: None,
                stderr: format!("timed out after {}s", timeout.as_secs()),
            });
        }
    };

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Space-joined command line.
pub(crate) fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(all(test, unix))]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let output = run_command("sh", &sh("echo out; echo err >&2"), None, Duration::from_secs(10))
            .await
            .expect("run");

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let output = run_command("sh", &sh("echo nope >&2; exit 3"), None, Duration::from_secs(10))
            .await
            .expect("run");

        assert_eq!(output.status, Some(3));
        match output.into_stdout("sh") {
            Err(SimflowError::ExternalTool { status, stderr, .. }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr.trim(), "nope");
            }
            other => panic!("expected ExternalTool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let result = run_command("sh", &sh("sleep 5"), None, Duration::from_millis(100)).await;
        assert!(matches!(
            result,
            Err(SimflowError::ExternalTool { status: None, .. })
        ));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let result = run_command(
            "simflow-no-such-program",
            &[],
            None,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(SimflowError::ExternalTool { .. })));
    }

    #[test]
    fn command_line_is_space_joined() {
        assert_eq!(
            display_command("sbatch", &["-a".to_string(), "0-9%5".to_string()]),
            "sbatch -a 0-9%5"
        );
    }
}
