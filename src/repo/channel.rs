/*
 * qvm-task - Task package manager for the Qubes OS admin domain.
 * Copyright (C) 2025  qvm-task contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! qrexec channel to the repository service in the UpdateVM.
//!
//! Everything read back from the channel comes from a less trusted domain,
//! so both output streams are bounded and the whole call has a deadline.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{TaskError, TaskResult};

/// Raw result of one service call
#[derive(Debug, Clone, Default)]
pub struct ChannelOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// Maximum bytes accepted from each output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub stdout: usize,
    pub stderr: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            stdout: 1 << 20,
            stderr: 1 << 10,
        }
    }
}

/// A request/response channel to a named service
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send `payload` to `service`, close its input and collect its output
    async fn call(&self, service: &str, payload: &[u8]) -> TaskResult<ChannelOutput>;
}

/// Channel that runs a local client program, by default
/// `qvm-run --pass-io --no-gui --service -- <target> <service>`
#[derive(Debug, Clone)]
pub struct QrexecChannel {
    program: String,
    leading_args: Vec<String>,
    target: String,
    timeout: Duration,
    limits: OutputLimits,
}

impl QrexecChannel {
    /// Channel to `target` through `qvm-run`
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_command(
            "qvm-run",
            vec!["--pass-io".to_string(), "--no-gui".to_string(), "--service".to_string()],
            target,
        )
    }

    /// Channel through an arbitrary client; `-- <target> <service>` is appended
    pub fn with_command(program: impl Into<String>, leading_args: Vec<String>, target: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
            target: target.into(),
            timeout: Duration::from_secs(300),
            limits: OutputLimits::default(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: OutputLimits) -> Self {
        self.limits = limits;
        self
    }

    fn args(&self, service: &str) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("--".to_string());
        args.push(self.target.clone());
        args.push(service.to_string());
        args
    }
}

#[async_trait]
impl Channel for QrexecChannel {
    async fn call(&self, service: &str, payload: &[u8]) -> TaskResult<ChannelOutput> {
        debug!(program = %self.program, target = %self.target, service, "opening qrexec channel");

        let mut child = Command::new(&self.program)
            .args(self.args(service))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TaskError::ChannelSpawn {
                program: self.program.clone(),
                source,
            })?;

        let outcome = tokio::time::timeout(self.timeout, exchange(&mut child, service, payload, self.limits)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                Err(TaskError::ChannelTimeout {
                    service: service.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Send the request, then drain both output streams and reap the child
async fn exchange(child: &mut Child, service: &str, payload: &[u8], limits: OutputLimits) -> TaskResult<ChannelOutput> {
    // The whole request goes out, and stdin is closed, before any output is
    // drained.
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(payload).await {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(TaskError::channel_io(service, "failed to send the request", e));
            }
            debug!("remote closed its input early");
        }
    }

    let (stdout, stderr) = tokio::try_join!(
        read_bounded(child.stdout.take(), service, limits.stdout),
        read_diagnostics(child.stderr.take(), service, limits.stderr),
    )?;

    let status = child
        .wait()
        .await
        .map_err(|e| TaskError::channel_io(service, "failed to wait for the channel", e))?;

    Ok(ChannelOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
    })
}

/// Read a stream completely, failing once it exceeds `limit` bytes
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, service: &str, limit: usize) -> TaskResult<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        reader
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| TaskError::channel_io(service, "failed to read stdout", e))?;
    }
    if buf.len() > limit {
        return Err(TaskError::ChannelOverflow {
            service: service.to_string(),
            stream: "stdout",
            limit,
        });
    }
    Ok(buf)
}

/// Read up to `limit` bytes of diagnostics and discard the rest
async fn read_diagnostics<R: AsyncRead + Unpin>(reader: Option<R>, service: &str, limit: usize) -> TaskResult<Vec<u8>> {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(buf);
    };

    (&mut reader)
        .take(limit as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| TaskError::channel_io(service, "failed to read stderr", e))?;

    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink())
        .await
        .map_err(|e| TaskError::channel_io(service, "failed to read stderr", e))?;
    if dropped > 0 {
        warn!("discarded {} bytes of qrexec diagnostics beyond the {} byte limit", dropped, limit);
    }
    Ok(buf)
}

/// Check the exit code and decode stdout as 7-bit text.
///
/// On failure every stderr line is logged and the call fails without
/// looking at stdout.
pub fn into_response(service: &str, output: ChannelOutput) -> TaskResult<String> {
    if output.exit_code != 0 {
        let stderr = sanitize_diagnostics(&output.stderr);
        let stderr = stderr.trim_end();
        for line in stderr.lines() {
            warn!("[qrexec] {}", line);
        }
        return Err(TaskError::ChannelFailed {
            service: service.to_string(),
            exit_code: output.exit_code,
            stderr: stderr.to_string(),
        });
    }

    if !output.stdout.is_ascii() {
        return Err(TaskError::ChannelDecode {
            service: service.to_string(),
            stream: "stdout",
        });
    }
    String::from_utf8(output.stdout).map_err(|_| TaskError::ChannelDecode {
        service: service.to_string(),
        stream: "stdout",
    })
}

/// Make remote diagnostics safe to print on a terminal
pub fn sanitize_diagnostics(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            b'\n' | b'\t' => b as char,
            0x20..=0x7e => b as char,
            _ => '_',
        })
        .collect()
}

/// Look up the global UpdateVM with `qubes-prefs`
pub async fn default_target() -> TaskResult<String> {
    let output = Command::new("qubes-prefs")
        .arg("updatevm")
        .output()
        .await
        .map_err(|e| TaskError::Config {
            message: format!("cannot run qubes-prefs to find the UpdateVM: {}", e),
        })?;

    let target = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || target.is_empty() || target == "None" {
        return Err(TaskError::Config {
            message: "no UpdateVM is configured; pass --updatevm".to_string(),
        });
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// A channel backed by `sh -c <script>`; the script sees the target and
    /// service as `$1` and `$2`.
    fn shell(script: &str) -> QrexecChannel {
        QrexecChannel::with_command("sh", vec!["-c".to_string(), script.to_string()], "sys-net")
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let channel = shell(r#"cat; printf '%s %s' "$1" "$2" >&2"#);
        let output = channel.call("qubes.TemplateSearch", b"payload\n").await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, b"payload\n");
        assert_eq!(output.stderr, b"sys-net qubes.TemplateSearch");
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let channel = shell("cat >/dev/null; echo 'repo unreachable' >&2; exit 1");
        let output = channel.call("qubes.TemplateSearch", b"x").await.unwrap();
        assert_eq!(output.exit_code, 1);

        let err = into_response("qubes.TemplateSearch", output).unwrap_err();
        match err {
            TaskError::ChannelFailed { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "repo unreachable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stdout_overflow_fails() {
        let channel = shell("cat >/dev/null; head -c 100 /dev/zero | tr '\\0' 'a'").limits(OutputLimits {
            stdout: 64,
            stderr: 64,
        });
        let err = channel.call("svc", b"").await.unwrap_err();
        assert!(matches!(err, TaskError::ChannelOverflow { stream: "stdout", limit: 64, .. }));
    }

    #[tokio::test]
    async fn test_stdout_at_limit_is_accepted() {
        let channel = shell("cat >/dev/null; head -c 64 /dev/zero | tr '\\0' 'a'").limits(OutputLimits {
            stdout: 64,
            stderr: 64,
        });
        let output = channel.call("svc", b"").await.unwrap();
        assert_eq!(output.stdout.len(), 64);
    }

    #[tokio::test]
    async fn test_stderr_truncated() {
        let channel = shell("cat >/dev/null; head -c 5000 /dev/zero | tr '\\0' 'e' >&2").limits(OutputLimits {
            stdout: 64,
            stderr: 16,
        });
        let output = channel.call("svc", b"").await.unwrap();
        assert_eq!(output.stderr.len(), 16);
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_timeout() {
        let channel = shell("sleep 5").timeout(Duration::from_millis(200));
        let err = channel.call("svc", b"").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let channel = QrexecChannel::with_command("/nonexistent/qvm-run", vec![], "sys-net");
        let err = channel.call("svc", b"").await.unwrap_err();
        assert!(matches!(err, TaskError::ChannelSpawn { .. }));
        assert_eq!(err.kind(), ErrorKind::Channel);
    }

    #[test]
    fn test_non_ascii_stdout_rejected() {
        let output = ChannelOutput {
            stdout: "naïve|".as_bytes().to_vec(),
            stderr: Vec::new(),
            exit_code: 0,
        };
        let err = into_response("svc", output).unwrap_err();
        assert!(matches!(err, TaskError::ChannelDecode { stream: "stdout", .. }));
    }

    #[test]
    fn test_sanitize_diagnostics() {
        assert_eq!(sanitize_diagnostics(b"ok\x1b[31mred\xff\n"), "ok_[31mred_\n");
    }

    #[test]
    fn test_qvm_run_arguments() {
        let channel = QrexecChannel::new("sys-firewall");
        assert_eq!(
            channel.args("qubes.TemplateSearch"),
            vec!["--pass-io", "--no-gui", "--service", "--", "sys-firewall", "qubes.TemplateSearch"]
        );
    }
}
