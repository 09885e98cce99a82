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

//! Query payload for the repository search service.
//!
//! The service reads option lines up to a `---` line, then treats the rest
//! of its input as yum repository definitions.

use std::fs;
use std::path::PathBuf;

use crate::error::{TaskError, TaskResult};

/// Line that separates the options from the repository definitions
pub const TERMINATOR: &str = "---";

/// One repository query, consumed by [`QueryRequest::build`]
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub refresh: bool,
    pub release_version: String,
    pub spec: String,
    pub repo_files: Vec<PathBuf>,
}

impl QueryRequest {
    /// Serialize the request into the channel payload.
    ///
    /// With `force_refresh` the `--refresh` line is sent whatever `refresh`
    /// says; the remote keeps no metadata cache we could rely on.
    pub fn build(self, force_refresh: bool) -> TaskResult<String> {
        check_spec(&self.spec)?;
        check_newline(&self.release_version, "--releasever")?;

        let mut payload = String::new();
        if self.refresh || force_refresh {
            payload.push_str("--refresh\n");
        }
        payload.push_str(&format!("--releasever={}\n", self.release_version));
        payload.push_str(&self.spec);
        payload.push('\n');
        payload.push_str(TERMINATOR);
        payload.push('\n');

        for path in &self.repo_files {
            let contents = fs::read_to_string(path).map_err(|source| TaskError::RepoFile {
                path: path.clone(),
                source,
            })?;
            payload.push_str(&contents);
            payload.push('\n');
        }

        Ok(payload)
    }
}

/// Reject a spec that would break the option section of the payload
pub fn check_spec(spec: &str) -> TaskResult<()> {
    if spec == TERMINATOR {
        return Err(TaskError::invalid(
            "package spec",
            format!("argument should not be '{}'", TERMINATOR),
        ));
    }
    check_newline(spec, "package spec")
}

fn check_newline(value: &str, what: &str) -> TaskResult<()> {
    if value.contains('\n') {
        return Err(TaskError::invalid(what, "argument should not contain '\\n'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn request(spec: &str, repo_files: Vec<PathBuf>) -> QueryRequest {
        QueryRequest {
            refresh: false,
            release_version: "4.2".to_string(),
            spec: spec.to_string(),
            repo_files,
        }
    }

    fn repo_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_payload_layout() {
        let first = repo_file("[task-a]\nbaseurl=https://a.example/\n");
        let second = repo_file("[task-b]\nbaseurl=https://b.example/");
        let payload = request(
            "3isec-qubes-*",
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        )
        .build(true)
        .unwrap();

        assert_eq!(
            payload,
            "--refresh\n--releasever=4.2\n3isec-qubes-*\n---\n\
             [task-a]\nbaseurl=https://a.example/\n\n\
             [task-b]\nbaseurl=https://b.example/\n"
        );
    }

    #[test]
    fn test_refresh_line_emitted_once() {
        let mut req = request("*", vec![]);
        req.refresh = true;
        let payload = req.build(true).unwrap();
        assert_eq!(payload.matches("--refresh\n").count(), 1);
    }

    #[test]
    fn test_refresh_honoured_when_not_forced() {
        let payload = request("*", vec![]).build(false).unwrap();
        assert_eq!(payload, "--releasever=4.2\n*\n---\n");

        let mut req = request("*", vec![]);
        req.refresh = true;
        assert!(req.build(false).unwrap().starts_with("--refresh\n"));
    }

    #[test]
    fn test_rejects_terminator_spec() {
        let err = request("---", vec![]).build(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_rejects_newlines() {
        let err = request("foo\n---", vec![]).build(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut req = request("foo", vec![]);
        req.release_version = "4.2\n--refresh".to_string();
        assert_eq!(req.build(true).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_unreadable_repo_file() {
        let err = request("*", vec![PathBuf::from("/nonexistent/qvm-task.repo")])
            .build(true)
            .unwrap_err();
        assert!(matches!(err, TaskError::RepoFile { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
