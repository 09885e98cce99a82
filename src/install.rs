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

//! Hands resolved task packages to the dom0 update tool.

use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use crate::error::{TaskError, TaskResult};
use crate::repo::PackageRecord;

/// Runs `qubes-dom0-update` (or a configured replacement)
#[derive(Debug, Clone)]
pub struct Installer {
    command: String,
    prefix: String,
    use_sudo: bool,
}

impl Installer {
    pub fn new(command: impl Into<String>, prefix: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            command: command.into(),
            prefix: prefix.into(),
            use_sudo,
        }
    }

    /// Full command line for installing `records`
    pub fn command_line(&self, records: &[PackageRecord], assume_yes: bool, elevate: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(records.len() + 3);
        if elevate {
            argv.push("sudo".to_string());
        }
        argv.push(self.command.clone());
        if assume_yes {
            argv.push("-y".to_string());
        }
        argv.extend(records.iter().map(|r| r.nvr(&self.prefix)));
        argv
    }

    /// Whether the command has to go through sudo
    fn needs_sudo(&self) -> bool {
        self.use_sudo && unsafe { libc::geteuid() } != 0 && which::which("sudo").is_ok()
    }

    /// Install `records`, with the terminal handed over to the update tool
    pub async fn install(&self, records: &[PackageRecord], assume_yes: bool) -> TaskResult<()> {
        let argv = self.command_line(records, assume_yes, self.needs_sudo());
        let command_line = argv.join(" ");
        info!("running {}", command_line);

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| TaskError::Config {
                message: format!("cannot run '{}': {}", argv[0], e),
            })?;

        if !status.success() {
            return Err(TaskError::InstallFailed {
                command: command_line,
                exit_code: status.code(),
            });
        }
        Ok(())
    }
}
