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

//! Configuration management with validation and defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{TaskError, TaskResult};
use crate::lock::DEFAULT_LOCK_FILE;
use crate::repo::DEFAULT_SERVICE;

/// Main configuration structure for qvm-task
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix that marks an rpm as a task package
    pub package_prefix: String,

    /// Repository definitions sent along with every query
    pub repo_files: Vec<PathBuf>,

    /// qrexec service answering repository queries
    pub service: String,

    /// Domain to query (empty = ask qubes-prefs)
    pub update_vm: String,

    /// Release version (empty = detect)
    pub releasever: String,

    /// Instance lock file
    pub lock_file: PathBuf,

    /// Channel configuration
    pub channel: ChannelConfig,

    /// Installer configuration
    pub install: InstallConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package_prefix: "3isec-qubes-".to_string(),
            repo_files: vec![PathBuf::from("/etc/yum.repos.d/3isec-dom0.repo")],
            service: DEFAULT_SERVICE.to_string(),
            update_vm: String::new(),
            releasever: String::new(),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            channel: ChannelConfig::default(),
            install: InstallConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// qrexec channel configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Client program
    pub command: String,

    /// Arguments placed before `-- <target> <service>`
    pub args: Vec<String>,

    /// Deadline for one call in seconds
    pub timeout_secs: u64,

    /// Maximum response size in bytes
    pub stdout_limit: usize,

    /// Maximum diagnostics kept in bytes
    pub stderr_limit: usize,

    /// Always ask the UpdateVM to refresh its metadata
    pub force_refresh: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command: "qvm-run".to_string(),
            args: vec!["--pass-io".to_string(), "--no-gui".to_string(), "--service".to_string()],
            timeout_secs: 300,
            stdout_limit: 1 << 20,
            stderr_limit: 1 << 10,
            force_refresh: true,
        }
    }
}

/// Installer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// dom0 update tool
    pub command: String,

    /// Go through sudo when not root
    pub use_sudo: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            command: "qubes-dom0-update".to_string(),
            use_sudo: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (empty = no file logging)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. /etc/qvm-task/qvm-task.toml (system-wide)
    /// 2. ~/.config/qvm-task/config.toml (user)
    /// 3. Environment variables (QVM_TASK_*)
    pub fn load() -> TaskResult<Self> {
        let mut config = Config::default();

        config = config.merge_file(Path::new("/etc/qvm-task/qvm-task.toml"))?;
        if let Some(config_dir) = dirs::config_dir() {
            config = config.merge_file(&config_dir.join("qvm-task").join("config.toml"))?;
        }

        config = config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Merge a config file if it exists; a file that exists but does not
    /// parse is an error
    fn merge_file(self, path: &Path) -> TaskResult<Self> {
        if !path.exists() {
            return Ok(self);
        }
        let content = fs::read_to_string(path).map_err(|e| TaskError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let parsed = toml::from_str::<Config>(&content).map_err(|e| TaskError::Config {
            message: format!("invalid {}: {}", path.display(), e),
        })?;
        debug!("loaded configuration from {}", path.display());
        Ok(self.merge(parsed))
    }

    /// Merge another config into this one (other takes precedence for non-default values)
    fn merge(mut self, other: Config) -> Self {
        let default = Config::default();

        if other.package_prefix != default.package_prefix {
            self.package_prefix = other.package_prefix;
        }
        if other.repo_files != default.repo_files {
            self.repo_files = other.repo_files;
        }
        if other.service != default.service {
            self.service = other.service;
        }
        if other.update_vm != default.update_vm {
            self.update_vm = other.update_vm;
        }
        if other.releasever != default.releasever {
            self.releasever = other.releasever;
        }
        if other.lock_file != default.lock_file {
            self.lock_file = other.lock_file;
        }

        self.channel = self.channel.merge(other.channel);
        self.install = self.install.merge(other.install);
        self.logging = self.logging.merge(other.logging);

        self
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = var("QVM_TASK_UPDATEVM") {
            self.update_vm = val;
        }

        if let Some(val) = var("QVM_TASK_RELEASEVER") {
            self.releasever = val;
        }

        if let Some(val) = var("QVM_TASK_PREFIX") {
            self.package_prefix = val;
        }

        if let Some(val) = var("QVM_TASK_REPO_FILES") {
            self.repo_files = val.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect();
        }

        if let Some(val) = var("QVM_TASK_TIMEOUT") {
            match val.parse() {
                Ok(n) => self.channel.timeout_secs = n,
                Err(_) => warn!("ignoring QVM_TASK_TIMEOUT={:?}: not a number", val),
            }
        }

        if let Some(val) = var("QVM_TASK_FORCE_REFRESH") {
            self.channel.force_refresh = val == "1" || val.to_lowercase() == "true";
        }

        if let Some(val) = var("QVM_TASK_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> TaskResult<()> {
        let invalid = |message: &str| {
            Err(TaskError::Config {
                message: message.to_string(),
            })
        };

        if self.package_prefix.is_empty() {
            return invalid("package_prefix must not be empty");
        }
        if self.package_prefix.contains(['|', '\n', '*', '?', '[']) {
            return invalid("package_prefix must be a plain name");
        }
        if self.repo_files.is_empty() {
            return invalid("at least one repository file is required");
        }
        if self.service.is_empty() || self.service.contains(char::is_whitespace) {
            return invalid("service must be a single qrexec service name");
        }
        if self.releasever.contains('\n') {
            return invalid("releasever must not contain a newline");
        }
        if self.channel.command.is_empty() {
            return invalid("channel.command must not be empty");
        }
        if self.channel.timeout_secs == 0 {
            return invalid("channel.timeout_secs must be at least 1");
        }
        if self.channel.stdout_limit == 0 || self.channel.stderr_limit == 0 {
            return invalid("channel output limits must be at least 1 byte");
        }
        if self.install.command.is_empty() {
            return invalid("install.command must not be empty");
        }
        Ok(())
    }
}

impl ChannelConfig {
    fn merge(mut self, other: ChannelConfig) -> Self {
        let default = ChannelConfig::default();

        if other.command != default.command {
            self.command = other.command;
        }
        if other.args != default.args {
            self.args = other.args;
        }
        if other.timeout_secs != default.timeout_secs {
            self.timeout_secs = other.timeout_secs;
        }
        if other.stdout_limit != default.stdout_limit {
            self.stdout_limit = other.stdout_limit;
        }
        if other.stderr_limit != default.stderr_limit {
            self.stderr_limit = other.stderr_limit;
        }
        if other.force_refresh != default.force_refresh {
            self.force_refresh = other.force_refresh;
        }

        self
    }
}

impl InstallConfig {
    fn merge(mut self, other: InstallConfig) -> Self {
        let default = InstallConfig::default();

        if other.command != default.command {
            self.command = other.command;
        }
        if other.use_sudo != default.use_sudo {
            self.use_sudo = other.use_sudo;
        }

        self
    }
}

impl LoggingConfig {
    fn merge(mut self, other: LoggingConfig) -> Self {
        if other.level != LoggingConfig::default().level {
            self.level = other.level;
        }
        if other.file.is_some() {
            self.file = other.file;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.package_prefix, "3isec-qubes-");
        assert_eq!(config.service, "qubes.TemplateSearch");
        assert!(config.channel.force_refresh);
        assert_eq!(config.channel.stdout_limit, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.channel.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.package_prefix = "3isec-*".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.repo_files.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_merge() {
        let parsed: Config = toml::from_str(
            r#"
            update_vm = "sys-firewall"
            repo_files = ["/etc/yum.repos.d/task.repo"]

            [channel]
            timeout_secs = 30
            force_refresh = false
            "#,
        )
        .unwrap();

        let config = Config::default().merge(parsed);
        assert_eq!(config.update_vm, "sys-firewall");
        assert_eq!(config.repo_files, vec![PathBuf::from("/etc/yum.repos.d/task.repo")]);
        assert_eq!(config.channel.timeout_secs, 30);
        assert!(!config.channel.force_refresh);
        assert_eq!(config.channel.command, "qvm-run");
        assert_eq!(config.install.command, "qubes-dom0-update");
    }

    #[test]
    fn test_merge_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default().merge_file(&path).unwrap();
        assert_eq!(config.update_vm, "");

        fs::write(&path, "service = \"my.Search\"\n").unwrap();
        let config = Config::default().merge_file(&path).unwrap();
        assert_eq!(config.service, "my.Search");

        fs::write(&path, "service = [\n").unwrap();
        assert!(Config::default().merge_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QVM_TASK_UPDATEVM", "sys-whonix"),
            ("QVM_TASK_REPO_FILES", "/a.repo:/b.repo"),
            ("QVM_TASK_TIMEOUT", "12"),
            ("QVM_TASK_FORCE_REFRESH", "0"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.update_vm, "sys-whonix");
        assert_eq!(config.repo_files, vec![PathBuf::from("/a.repo"), PathBuf::from("/b.repo")]);
        assert_eq!(config.channel.timeout_secs, 12);
        assert!(!config.channel.force_refresh);
    }
}
