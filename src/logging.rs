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

//! Logging and observability with tracing support.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Effective level: `-q` wins, each `-v` raises the configured level by one
pub fn effective_level(configured: &str, verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    let base = LEVELS
        .iter()
        .position(|l| l.eq_ignore_ascii_case(configured.trim()))
        .unwrap_or(1);
    LEVELS[(base + verbose as usize).min(LEVELS.len() - 1)]
}

/// Initialize logging on stderr, plus an optional log file.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, log_file: Option<&Path>) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = || {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .compact()
    };

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let file_layer = fmt::layer().with_writer(file).with_ansi(false).with_target(true);

            tracing_subscriber::registry()
                .with(filter())
                .with(console())
                .with(file_layer)
                .init();
            return;
        }
    }

    // Fallback to console-only
    tracing_subscriber::registry().with(filter()).with(console()).init();
}

/// Span covering one CLI command
#[macro_export]
macro_rules! span_command {
    ($name:expr) => {
        tracing::info_span!("command", name = $name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level("warn", 0, false), "warn");
        assert_eq!(effective_level("warn", 1, false), "info");
        assert_eq!(effective_level("warn", 2, false), "debug");
        assert_eq!(effective_level("info", 9, false), "trace");
        assert_eq!(effective_level("debug", 3, true), "error");
        assert_eq!(effective_level("bogus", 0, false), "warn");
        assert_eq!(effective_level("INFO", 0, false), "info");
    }
}
