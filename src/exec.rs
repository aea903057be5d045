//! External actor commands.
//!
//! Some operations (filter moves, detector ramps) are carried out by a separate
//! actor process. The personality runs the configured wrapper program through the
//! shell, relays stdout line by line, and kills the process once its time limit
//! expires.

use crate::config::ExecConfig;
use crate::error::{AppResult, PersonalityError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One command addressed to an actor.
#[derive(Clone, Debug, PartialEq)]
pub struct ActorCommand {
    pub actor: String,
    pub command: String,
    pub time_limit: Duration,
}

impl ActorCommand {
    pub fn new(actor: impl Into<String>, command: impl Into<String>, time_limit: Duration) -> Self {
        Self {
            actor: actor.into(),
            command: command.into(),
            time_limit,
        }
    }

    /// Shell line handed to `sh -c`.
    pub fn command_line(&self, one_cmd: &str) -> String {
        format!(
            "{} {} --level=i --timelim={:.1} {}",
            one_cmd,
            self.actor,
            self.time_limit.as_secs_f64(),
            self.command
        )
    }
}

/// Collected stdout of a finished command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    pub lines: Vec<String>,
    /// True when output stopped being collected at the line cap.
    pub truncated: bool,
}

/// Run an actor command with the wrapper configured in `config`.
pub async fn run_actor_command<F>(
    config: &ExecConfig,
    command: &ActorCommand,
    on_line: F,
) -> AppResult<ExecOutput>
where
    F: FnMut(&str) + Send,
{
    let line = command.command_line(&config.one_cmd);
    run_shell(&line, command.time_limit, config.max_output_lines, on_line).await
}

/// Run `command_line` through `sh -c`, calling `on_line` for every stdout line.
///
/// At most `max_lines` lines are collected; stdout is closed after that. A process
/// still running after `time_limit` is killed.
pub async fn run_shell<F>(
    command_line: &str,
    time_limit: Duration,
    max_lines: usize,
    mut on_line: F,
) -> AppResult<ExecOutput>
where
    F: FnMut(&str) + Send,
{
    info!("Executing: {}", command_line);

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PersonalityError::ExternalCommand(format!("failed to spawn '{}': {}", command_line, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                warn!("stderr: {}", line);
                lines.push(line);
            }
        }
        lines
    });

    let work = async {
        let mut output = ExecOutput::default();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout).lines();
            while let Some(line) = reader.next_line().await? {
                if output.lines.len() >= max_lines {
                    output.truncated = true;
                    break;
                }
                debug!("stdout: {}", line);
                on_line(&line);
                output.lines.push(line);
            }
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((output, status))
    };
    let result = timeout(time_limit, work).await;

    let (output, status) = match result {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            child.kill().await.ok();
            return Err(PersonalityError::ExternalCommand(format!(
                "'{}' failed: {}",
                command_line, e
            )));
        }
        Err(_) => {
            warn!("'{}' exceeded {:?}; killing", command_line, time_limit);
            child.kill().await.ok();
            return Err(PersonalityError::ExternalCommand(format!(
                "'{}' timed out after {:.1}s",
                command_line,
                time_limit.as_secs_f64()
            )));
        }
    };

    let stderr_lines = stderr_task.await.unwrap_or_default();

    if output.truncated {
        warn!("Output of '{}' truncated at {} lines", command_line, max_lines);
    }

    // A capped reader closes stdout early; the resulting SIGPIPE is not a failure.
    if !status.success() && !output.truncated {
        let detail = stderr_lines.last().cloned().unwrap_or_default();
        return Err(PersonalityError::ExternalCommand(format!(
            "'{}' exited with {}: {}",
            command_line,
            status.code().map_or_else(|| "signal".to_string(), |c| c.to_string()),
            detail
        )));
    }

    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let cmd = ActorCommand::new("hx", "ramp nreset=1 nread=3", Duration::from_millis(26_000));
        assert_eq!(
            cmd.command_line("oneCmd.py"),
            "oneCmd.py hx --level=i --timelim=26.0 ramp nreset=1 nread=3"
        );
    }

    #[tokio::test]
    async fn test_lines_are_relayed() {
        let mut seen = Vec::new();
        let output = run_shell("echo one; echo two", Duration::from_secs(5), 1000, |l| {
            seen.push(l.to_string())
        })
        .await
        .unwrap();
        assert_eq!(output.lines, ["one", "two"]);
        assert_eq!(seen, ["one", "two"]);
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_output_capped() {
        let output = run_shell("seq 1 50", Duration::from_secs(5), 10, |_| {})
            .await
            .unwrap();
        assert_eq!(output.lines.len(), 10);
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let err = run_shell("echo bad >&2; exit 3", Duration::from_secs(5), 10, |_| {})
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exited with 3"), "{}", text);
        assert!(text.contains("bad"), "{}", text);
    }

    #[tokio::test]
    async fn test_time_limit_kills_process() {
        let start = std::time::Instant::now();
        let err = run_shell("sleep 30", Duration::from_millis(200), 10, |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
