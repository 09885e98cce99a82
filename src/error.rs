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

//! Error types for repository queries, the qrexec channel and the CLI glue.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for qvm-task operations
#[derive(Debug, Error)]
pub enum TaskError {
    /// A request argument would corrupt the line-oriented query payload
    #[error("Malformed {what}: {reason}")]
    InvalidRequest { what: String, reason: String },

    /// A repository definition file could not be read
    #[error("Failed to read repository file '{}'", .path.display())]
    RepoFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The channel process could not be started
    #[error("Failed to start qrexec channel '{program}'")]
    ChannelSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O on an open channel failed
    #[error("qrexec call '{service}' failed: {message}")]
    ChannelIo {
        service: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The remote service exited unsuccessfully
    #[error("qrexec call '{service}' failed with exit code {exit_code}{}", stderr_suffix(.stderr))]
    ChannelFailed {
        service: String,
        exit_code: i32,
        stderr: String,
    },

    /// The remote service wrote more than we are willing to buffer
    #[error("qrexec call '{service}' exceeded the {limit} byte limit on {stream}")]
    ChannelOverflow {
        service: String,
        stream: &'static str,
        limit: usize,
    },

    /// The response was not 7-bit text
    #[error("qrexec call '{service}' returned non-ASCII data on {stream}")]
    ChannelDecode {
        service: String,
        stream: &'static str,
    },

    /// The remote service did not finish in time
    #[error("qrexec call '{service}' timed out after {timeout_secs} seconds")]
    ChannelTimeout { service: String, timeout_secs: u64 },

    /// The response violated the record grammar
    #[error("qrexec call '{service}' failed: unexpected data format")]
    Protocol { service: String, detail: String },

    /// The release version could not be determined
    #[error("Unable to determine the Qubes release: {reason}")]
    Release { reason: String },

    /// Another instance holds the lock
    #[error("Another qvm-task instance is running (lock file '{}')", .path.display())]
    Locked { path: PathBuf },

    /// The lock file could not be opened or locked
    #[error("Lock file error for '{}'", .path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No package matched a spec
    #[error("No task package matches '{spec}'")]
    NotFound { spec: String },

    /// The update command failed
    #[error("Installation failed: '{command}' exited with {}", exit_code_label(.exit_code))]
    InstallFailed {
        command: String,
        exit_code: Option<i32>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Coarse failure classes, as seen by callers and mapped to exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Channel,
    Timeout,
    Protocol,
    Release,
    Lock,
    NotFound,
    Install,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Channel => write!(f, "channel"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Protocol => write!(f, "protocol"),
            ErrorKind::Release => write!(f, "release"),
            ErrorKind::Lock => write!(f, "lock"),
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Install => write!(f, "install"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

impl ErrorKind {
    /// Process exit code reported by the CLI for this kind
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 1,
            ErrorKind::Validation => 3,
            ErrorKind::Channel => 4,
            ErrorKind::Protocol => 5,
            ErrorKind::Timeout => 6,
            ErrorKind::Lock => 7,
            ErrorKind::NotFound => 8,
            ErrorKind::Install => 9,
            ErrorKind::Release => 10,
        }
    }
}

impl TaskError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::InvalidRequest { .. } | TaskError::RepoFile { .. } => ErrorKind::Validation,
            TaskError::ChannelSpawn { .. }
            | TaskError::ChannelIo { .. }
            | TaskError::ChannelFailed { .. }
            | TaskError::ChannelOverflow { .. }
            | TaskError::ChannelDecode { .. } => ErrorKind::Channel,
            TaskError::ChannelTimeout { .. } => ErrorKind::Timeout,
            TaskError::Protocol { .. } => ErrorKind::Protocol,
            TaskError::Release { .. } => ErrorKind::Release,
            TaskError::Locked { .. } | TaskError::LockIo { .. } => ErrorKind::Lock,
            TaskError::NotFound { .. } => ErrorKind::NotFound,
            TaskError::InstallFailed { .. } => ErrorKind::Install,
            TaskError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Create a request validation error
    pub fn invalid(what: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::InvalidRequest {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error; the detail is kept for logs only
    pub fn protocol(service: impl Into<String>, detail: impl Into<String>) -> Self {
        TaskError::Protocol {
            service: service.into(),
            detail: detail.into(),
        }
    }

    /// Create a channel I/O error
    pub fn channel_io(service: impl Into<String>, message: impl Into<String>, source: std::io::Error) -> Self {
        TaskError::ChannelIo {
            service: service.into(),
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Result type alias for qvm-task operations
pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaskError::NotFound {
            spec: "split-gpg".to_string(),
        };
        assert_eq!(format!("{}", err), "No task package matches 'split-gpg'");
    }

    #[test]
    fn test_protocol_error_hides_detail() {
        let err = TaskError::protocol("qubes.TemplateSearch", "field 6 is not a number");
        assert_eq!(
            format!("{}", err),
            "qrexec call 'qubes.TemplateSearch' failed: unexpected data format"
        );
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_channel_kinds() {
        let failed = TaskError::ChannelFailed {
            service: "qubes.TemplateSearch".to_string(),
            exit_code: 1,
            stderr: "repo unreachable".to_string(),
        };
        assert_eq!(failed.kind(), ErrorKind::Channel);

        let timeout = TaskError::ChannelTimeout {
            service: "qubes.TemplateSearch".to_string(),
            timeout_secs: 5,
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_ne!(failed.kind().exit_code(), timeout.kind().exit_code());
    }

    #[test]
    fn test_channel_failed_display() {
        let with_stderr = TaskError::ChannelFailed {
            service: "qubes.TemplateSearch".to_string(),
            exit_code: 1,
            stderr: "repo unreachable".to_string(),
        };
        assert_eq!(
            format!("{}", with_stderr),
            "qrexec call 'qubes.TemplateSearch' failed with exit code 1: repo unreachable"
        );

        let silent = TaskError::ChannelFailed {
            service: "qubes.TemplateSearch".to_string(),
            exit_code: 2,
            stderr: String::new(),
        };
        assert_eq!(
            format!("{}", silent),
            "qrexec call 'qubes.TemplateSearch' failed with exit code 2"
        );
    }

    #[test]
    fn test_install_failed_display() {
        let err = TaskError::InstallFailed {
            command: "qubes-dom0-update".to_string(),
            exit_code: None,
        };
        assert_eq!(
            format!("{}", err),
            "Installation failed: 'qubes-dom0-update' exited with a signal"
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(format!("{}", ErrorKind::NotFound), "not-found");
        assert_eq!(format!("{}", ErrorKind::Validation), "validation");
    }
}
