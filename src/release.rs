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

//! Qubes release detection for `--releasever`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{TaskError, TaskResult};

const MARKER_FILE: &str = "/usr/share/qubes/marker-vm";
const OS_RELEASE: &str = "/etc/os-release";

/// Finds the release of the running Qubes system
#[derive(Debug, Clone)]
pub struct ReleaseResolver {
    marker: PathBuf,
    os_release: PathBuf,
}

impl Default for ReleaseResolver {
    fn default() -> Self {
        Self::with_paths(MARKER_FILE, OS_RELEASE)
    }
}

impl ReleaseResolver {
    pub fn with_paths(marker: impl Into<PathBuf>, os_release: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
            os_release: os_release.into(),
        }
    }

    pub fn resolve(&self) -> TaskResult<String> {
        if let Some(version) = read_optional(&self.marker)?.as_deref().and_then(marker_version) {
            debug!(source = %self.marker.display(), "release {}", version);
            return Ok(version);
        }

        let content = read_optional(&self.os_release)?.ok_or_else(|| TaskError::Release {
            reason: format!("neither {} nor {} exists", self.marker.display(), self.os_release.display()),
        })?;
        let version = os_release_version(&content).ok_or_else(|| TaskError::Release {
            reason: format!("{} does not describe a Qubes system", self.os_release.display()),
        })?;
        debug!(source = %self.os_release.display(), "release {}", version);
        Ok(version)
    }
}

fn read_optional(path: &Path) -> TaskResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TaskError::Release {
            reason: format!("cannot read {}: {}", path.display(), e),
        }),
    }
}

/// First line that is neither blank nor a comment
fn marker_version(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

/// `VERSION_ID` of an os-release file whose `ID` names Qubes
fn os_release_version(content: &str) -> Option<String> {
    let mut id = None;
    let mut version = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "ID" => id = Some(value.to_string()),
            "VERSION_ID" => version = Some(value.to_string()),
            _ => {}
        }
    }

    if id?.contains("qubes") {
        version.filter(|v| !v.is_empty())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> ReleaseResolver {
        ReleaseResolver::with_paths(dir.path().join("marker-vm"), dir.path().join("os-release"))
    }

    #[test]
    fn test_marker_file_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("marker-vm"), "# Qubes marker\n\n4.2\n").unwrap();
        fs::write(dir.path().join("os-release"), "ID=qubes\nVERSION_ID=4.1\n").unwrap();
        assert_eq!(resolver(&dir).resolve().unwrap(), "4.2");
    }

    #[test]
    fn test_os_release_fallback() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("os-release"),
            "NAME=\"Qubes OS\"\nID=\"qubes\"\nVERSION_ID=\"4.2\"\n",
        )
        .unwrap();
        assert_eq!(resolver(&dir).resolve().unwrap(), "4.2");
    }

    #[test]
    fn test_comment_only_marker_falls_back() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("marker-vm"), "# nothing here\n").unwrap();
        fs::write(dir.path().join("os-release"), "ID=qubes\nVERSION_ID=4.3\n").unwrap();
        assert_eq!(resolver(&dir).resolve().unwrap(), "4.3");
    }

    #[test]
    fn test_non_qubes_system() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("os-release"), "ID=fedora\nVERSION_ID=40\n").unwrap();
        let err = resolver(&dir).resolve().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Release);
    }

    #[test]
    fn test_nothing_to_read() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(resolver(&dir).resolve(), Err(TaskError::Release { .. })));
    }
}
