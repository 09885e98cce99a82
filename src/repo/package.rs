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

//! Package records and RPM-style version ordering.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Epoch, version and release of a package.
///
/// Equality follows rpm ordering: `1.01` equals `1.1` and an empty epoch
/// equals `0`.
#[derive(Debug, Clone, Serialize)]
pub struct Evr {
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl Evr {
    pub fn new(epoch: impl Into<String>, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
        }
    }

    /// An empty epoch compares like `0`
    fn epoch_or_zero(&self) -> &str {
        if self.epoch.is_empty() {
            "0"
        } else {
            &self.epoch
        }
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.epoch.is_empty() {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}", self.version, self.release)
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        rpmvercmp(self.epoch_or_zero(), other.epoch_or_zero())
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| rpmvercmp(&self.release, &other.release))
    }
}

impl PartialEq for Evr {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Evr {}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings the way rpm does.
///
/// Strings are walked as alternating runs of digits and letters; separators
/// only delimit runs. Numeric runs compare by value, alphabetic runs
/// lexically, and a numeric run is newer than an alphabetic one. `~` sorts
/// before anything (including the end of the string), `^` after the end but
/// before any further segment.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    fn is_separator(c: u8) -> bool {
        !c.is_ascii_alphanumeric() && c != b'~' && c != b'^'
    }

    loop {
        while let Some((&c, rest)) = one.split_first() {
            if !is_separator(c) {
                break;
            }
            one = rest;
        }
        while let Some((&c, rest)) = two.split_first() {
            if !is_separator(c) {
                break;
            }
            two = rest;
        }

        let one_tilde = one.first() == Some(&b'~');
        let two_tilde = two.first() == Some(&b'~');
        if one_tilde || two_tilde {
            if !one_tilde {
                return Ordering::Greater;
            }
            if !two_tilde {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        let one_caret = one.first() == Some(&b'^');
        let two_caret = two.first() == Some(&b'^');
        if one_caret || two_caret {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if !one_caret {
                return Ordering::Greater;
            }
            if !two_caret {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let take = |s: &[u8]| -> usize {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };
        let len_one = take(one);
        let len_two = take(two);
        let (seg_one, rest_one) = one.split_at(len_one);
        let (seg_two, rest_two) = two.split_at(len_two);

        if seg_two.is_empty() {
            return if numeric { Ordering::Greater } else { Ordering::Less };
        }

        let ord = if numeric {
            let trim = |s: &[u8]| -> usize { s.iter().take_while(|&&c| c == b'0').count() };
            let seg_one = &seg_one[trim(seg_one)..];
            let seg_two = &seg_two[trim(seg_two)..];
            seg_one.len().cmp(&seg_two.len()).then_with(|| seg_one.cmp(seg_two))
        } else {
            seg_one.cmp(seg_two)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        one = rest_one;
        two = rest_two;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

/// A task package available from the repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    /// Name with the task-package prefix removed
    pub name: String,
    #[serde(flatten)]
    pub evr: Evr,
    pub repository: String,
    pub download_size: u64,
    pub build_time: DateTime<Utc>,
    pub license: String,
    pub url: String,
    pub summary: String,
    pub description: String,
}

impl PackageRecord {
    /// Full package name as known to rpm
    pub fn package_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.name)
    }

    /// `name-version-release` with the prefix, as passed to the update tool
    pub fn nvr(&self, prefix: &str) -> String {
        format!("{}-{}-{}", self.package_name(prefix), self.evr.version, self.evr.release)
    }
}

/// Keep only the newest record of every package name, sorted by name
pub fn latest_by_name(records: Vec<PackageRecord>) -> Vec<PackageRecord> {
    let mut latest: Vec<PackageRecord> = Vec::new();
    for record in records {
        match latest.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => {
                if record.evr > existing.evr {
                    *existing = record;
                }
            }
            None => latest.push(record),
        }
    }
    latest.sort_by(|a, b| a.name.cmp(&b.name));
    latest
}

/// Sum of the download sizes, saturating at `u64::MAX`
pub fn total_download_size(records: &[PackageRecord]) -> u64 {
    records.iter().fold(0u64, |total, r| total.saturating_add(r.download_size))
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
