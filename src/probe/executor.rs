use crate::config::SshConfig;
use crate::probe::command::shell_quote;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start remote shell '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to wait for remote shell: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote shell failed ({status}){detail}")]
    Exit { status: String, detail: String },
    #[error("remote shell timed out after {}", format_limit(.0))]
    Timeout(Duration),
}

fn format_limit(limit: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*limit)
}

/// Raw outcome of one remote invocation.
///
/// `stdout` is kept even when `error` is set: a late failure still leaves
/// sections worth parsing.
#[derive(Debug, Default)]
pub struct Execution {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub error: Option<ExecError>,
}

impl Execution {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(stdout: impl Into<Vec<u8>>, error: ExecError) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, address: &str, command: &str) -> Execution;
}

/// Runs the composite command through the `ssh` client (or a compatible
/// program), as `<program> <args..> <address> "bash -c '<command>'"`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl SshExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(cfg: &SshConfig) -> Self {
        Self::new(cfg.program.clone(), cfg.args.clone(), cfg.timeout())
    }

    async fn run(&self, address: &str, command: &str) -> Execution {
        let remote = format!("bash -c {}", shell_quote(command));
        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .arg(address)
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                return Execution::failed(
                    Vec::new(),
                    ExecError::Spawn {
                        program: self.program.clone(),
                        source,
                    },
                )
            }
        };

        // The buffers outlive the timeout so a killed session keeps what it
        // already printed.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let waited = {
            let collect = async {
                let (out, err) = tokio::join!(
                    drain(stdout_pipe, &mut stdout),
                    drain(stderr_pipe, &mut stderr)
                );
                match out.and(err) {
                    Ok(()) => child.wait().await,
                    Err(err) => Err(err),
                }
            };
            match self.timeout {
                Some(limit) => time::timeout(limit, collect)
                    .await
                    .map_err(|_elapsed| ExecError::Timeout(limit)),
                None => Ok(collect.await),
            }
        };

        let error = match waited {
            Ok(Ok(status)) if status.success() => None,
            Ok(Ok(status)) => Some(ExecError::Exit {
                status: status.to_string(),
                detail: stderr_detail(&stderr),
            }),
            Ok(Err(err)) => Some(ExecError::Io(err)),
            Err(timeout) => {
                if let Err(err) = child.kill().await {
                    debug!(address = %address, error = %err, "failed to kill timed out remote shell");
                }
                Some(timeout)
            }
        };

        Execution {
            stdout,
            stderr,
            error,
        }
    }
}

/// Reads a pipe to EOF in chunks, so bytes read before a cancellation stay in `buf`.
async fn drain<R>(pipe: Option<R>, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 4096];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, address: &str, command: &str) -> Execution {
        let execution = self.run(address, command).await;
        if !execution.stderr.is_empty() {
            debug!(
                address = %address,
                stderr = %String::from_utf8_lossy(&execution.stderr),
                "remote shell wrote to stderr"
            );
        }
        execution
    }
}

/// Last non-empty stderr line, formatted as a message suffix.
fn stderr_detail(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(|line| format!(": {line}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    // `sh -c <script> sh <address> <remote>`: the fake transport sees the
    // address as $1 and the remote command line as $2.
    fn sh_executor(script: &str, timeout: Option<Duration>) -> SshExecutor {
        SshExecutor::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_run() {
        let executor = sh_executor(r#"printf 'up\n---@@@---\n'"#, None);
        let execution = executor.execute("root@web-1", "uptime").await;
        assert!(execution.error.is_none());
        assert_eq!(execution.stdout, b"up\n---@@@---\n");
    }

    #[tokio::test]
    async fn passes_address_and_quoted_command() {
        let executor = sh_executor(r#"printf '%s|%s' "$1" "$2""#, None);
        let execution = executor.execute("root@web-1", "uptime && df -h").await;
        assert!(execution.error.is_none());
        assert_eq!(
            String::from_utf8_lossy(&execution.stdout),
            "root@web-1|bash -c 'uptime && df -h'"
        );
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_stdout_and_reports_stderr() {
        let executor = sh_executor("echo partial; echo 'Connection refused' >&2; exit 255", None);
        let execution = executor.execute("web-1", "uptime").await;
        assert_eq!(execution.stdout, b"partial\n");
        assert_eq!(execution.stderr, b"Connection refused\n");
        let message = execution.error.expect("exit error").to_string();
        assert!(message.starts_with("remote shell failed ("), "{message}");
        assert!(message.ends_with(": Connection refused"), "{message}");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let executor = SshExecutor::new("/nonexistent/ssh-binary", Vec::new(), None);
        let execution = executor.execute("web-1", "uptime").await;
        assert!(execution.stdout.is_empty());
        assert!(matches!(execution.error, Some(ExecError::Spawn { .. })));
    }

    #[tokio::test]
    async fn hung_session_times_out() {
        let executor = sh_executor("sleep 5", Some(Duration::from_millis(100)));
        let execution = executor.execute("web-1", "uptime").await;
        let err = execution.error.expect("timeout error");
        assert!(matches!(err, ExecError::Timeout(_)));
        assert_eq!(err.to_string(), "remote shell timed out after 100ms");
    }

    #[tokio::test]
    async fn timeout_keeps_output_printed_before_the_limit() {
        let executor = sh_executor(
            r#"printf 'up\n---@@@---\nfs\n---@@@---\n'; echo 'still waiting' >&2; sleep 5"#,
            Some(Duration::from_millis(300)),
        );
        let started = std::time::Instant::now();
        let execution = executor.execute("web-1", "uptime").await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(execution.error, Some(ExecError::Timeout(_))));
        assert_eq!(execution.stdout, b"up\n---@@@---\nfs\n---@@@---\n");
        assert_eq!(execution.stderr, b"still waiting\n");
    }

    #[test]
    fn stderr_detail_takes_last_line() {
        assert_eq!(stderr_detail(b""), "");
        assert_eq!(stderr_detail(b"warning\nfatal: boom\n\n"), ": fatal: boom");
    }
}
