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

//! Parser for repository search responses.
//!
//! Each record is eleven `|`-separated fields terminated by `|\n`:
//!
//! ```text
//! name|epoch|version|release|reponame|dlsize|buildtime|licence|url|summary|description|
//! ```
//!
//! Summary and description may span lines, so records are split on the
//! terminator rather than on newlines. A single bad record rejects the whole
//! response.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::package::{Evr, PackageRecord};
use super::spec::SpecMatcher;
use crate::error::{TaskError, TaskResult};

/// Record terminator
pub const RECORD_DELIMITER: &str = "|\n";

/// Fields per record
pub const FIELD_COUNT: usize = 11;

/// Build time format used on the wire
pub const BUILD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[A-Za-z0-9._+][A-Za-z0-9._+-]*\z").expect("name grammar"));
static EVR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\A[A-Za-z0-9._+~]*\z").expect("evr grammar"));
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A[0-9]{4}-[0-9]{1,2}-[0-9]{1,2} [0-9]{1,2}:[0-9]{1,2}\z").expect("date grammar")
});
static LICENSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[A-Za-z0-9._+()][A-Za-z0-9._+()-]*\z").expect("license grammar"));

/// Parses and validates responses for one service
#[derive(Debug, Clone)]
pub struct ResponseParser {
    service: String,
    prefix: String,
    matcher: SpecMatcher,
}

impl ResponseParser {
    pub fn new(service: impl Into<String>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            service: service.into(),
            matcher: SpecMatcher::new(prefix.clone()),
            prefix,
        }
    }

    /// Parse a complete response, keeping task packages that match `spec`
    pub fn parse(&self, raw: &str, spec: &str) -> TaskResult<Vec<PackageRecord>> {
        let mut chunks: Vec<&str> = raw.split(RECORD_DELIMITER).collect();
        // Whatever follows the last terminator is not a record
        chunks.pop();

        let mut records = Vec::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            match self.parse_record(chunk, spec) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(detail) => {
                    debug!(record = index, "rejecting response: {}", detail);
                    return Err(TaskError::protocol(&self.service, detail));
                }
            }
        }

        debug!("parsed {} matching task packages", records.len());
        Ok(records)
    }

    /// Parse one record; `Ok(None)` means the record is out of scope
    fn parse_record(&self, chunk: &str, spec: &str) -> Result<Option<PackageRecord>, String> {
        let fields: Vec<&str> = chunk.split('|').collect();
        let [name, epoch, version, release, repository, download_size, build_time, license, url, summary, description]: [&str; FIELD_COUNT] =
            fields
                .try_into()
                .map_err(|f: Vec<&str>| format!("expected {} fields, got {}", FIELD_COUNT, f.len()))?;

        let Some(short_name) = name.strip_prefix(self.prefix.as_str()) else {
            return Ok(None);
        };

        if !NAME_RE.is_match(short_name) {
            return Err("invalid package name".to_string());
        }
        for value in [epoch, version, release] {
            if !EVR_RE.is_match(value) {
                return Err("invalid epoch, version or release".to_string());
            }
        }
        if !NAME_RE.is_match(repository) {
            return Err("invalid repository name".to_string());
        }
        let download_size: u64 = download_size
            .parse()
            .map_err(|_| "invalid download size".to_string())?;
        if !DATE_RE.is_match(build_time) {
            return Err("invalid build time".to_string());
        }
        let build_time = NaiveDateTime::parse_from_str(build_time, BUILD_TIME_FORMAT)
            .map_err(|e| format!("unparsable build time: {}", e))?
            .and_utc();
        if !LICENSE_RE.is_match(license) {
            return Err("invalid license".to_string());
        }

        if self.matcher.matches(name, epoch, version, release, spec).is_none() {
            return Ok(None);
        }

        Ok(Some(PackageRecord {
            name: short_name.to_string(),
            evr: Evr::new(epoch, version, release),
            repository: repository.to_string(),
            download_size,
            build_time,
            license: license.to_string(),
            url: url.to_string(),
            summary: summary.to_string(),
            description: description.to_string(),
        }))
    }
}
