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

//! Single-instance lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{TaskError, TaskResult};

/// Default lock file location
pub const DEFAULT_LOCK_FILE: &str = "/var/tmp/qvm-task.lck";

/// Exclusive advisory lock, released when dropped
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without waiting
    pub fn acquire(path: &Path) -> TaskResult<Self> {
        let lock_io = |source| TaskError::LockIo {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(path)
            .map_err(lock_io)?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(TaskError::Locked {
                    path: path.to_path_buf(),
                });
            }
            return Err(lock_io(err));
        }

        debug!(path = %path.display(), "instance lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qvm-task.lck");
        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_contention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qvm-task.lck");

        let held = InstanceLock::acquire(&path).unwrap();
        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(matches!(err, TaskError::Locked { .. }));
        assert_eq!(err.kind(), ErrorKind::Lock);

        drop(held);
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_unwritable_location() {
        let err = InstanceLock::acquire(Path::new("/nonexistent/dir/qvm-task.lck")).unwrap_err();
        assert!(matches!(err, TaskError::LockIo { .. }));
    }
}
