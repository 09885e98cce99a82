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

//! Task packages already installed in dom0.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::repo::{Evr, PackageRecord};

const QUERY_FORMAT: &str = "%{NAME}|%{EPOCHNUM}|%{VERSION}|%{RELEASE}\\n";

/// Installed task packages, keyed by name without the prefix
#[derive(Debug, Clone, Default)]
pub struct InstalledSet {
    packages: HashMap<String, Evr>,
}

/// How a repository record relates to the local system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Installed,
    Upgradable,
    Available,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageStatus::Installed => write!(f, "installed"),
            PackageStatus::Upgradable => write!(f, "upgradable"),
            PackageStatus::Available => write!(f, "available"),
        }
    }
}

impl InstalledSet {
    /// Ask rpm for every installed package carrying `prefix`.
    ///
    /// Advisory only: when rpm is missing or fails the set is empty.
    pub async fn query(prefix: &str) -> Self {
        let output = Command::new("rpm")
            .args(["-qa", "--queryformat", QUERY_FORMAT])
            .arg(format!("{}*", prefix))
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let set = Self::parse(&String::from_utf8_lossy(&output.stdout), prefix);
                debug!("{} task packages installed", set.len());
                set
            }
            Ok(output) => {
                warn!("rpm query exited with {:?}; installed state unknown", output.status.code());
                Self::default()
            }
            Err(e) => {
                warn!("cannot run rpm ({}); installed state unknown", e);
                Self::default()
            }
        }
    }

    /// Parse `name|epoch|version|release` lines
    pub fn parse(output: &str, prefix: &str) -> Self {
        let mut packages = HashMap::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split('|').collect();
            let &[name, epoch, version, release] = fields.as_slice() else {
                warn!("skipping unexpected rpm output line: {:?}", line);
                continue;
            };
            let Some(short) = name.strip_prefix(prefix).filter(|s| !s.is_empty()) else {
                warn!("skipping unexpected rpm output line: {:?}", line);
                continue;
            };
            packages.insert(short.to_string(), Evr::new(epoch, version, release));
        }
        Self { packages }
    }

    pub fn get(&self, name: &str) -> Option<&Evr> {
        self.packages.get(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn status_of(&self, record: &PackageRecord) -> PackageStatus {
        match self.get(&record.name) {
            None => PackageStatus::Available,
            Some(installed) if record.evr > *installed => PackageStatus::Upgradable,
            Some(_) => PackageStatus::Installed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(name: &str, epoch: &str, version: &str, release: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            evr: Evr::new(epoch, version, release),
            repository: "3isec-dom0".to_string(),
            download_size: 1,
            build_time: Utc::now(),
            license: "GPL".to_string(),
            url: String::new(),
            summary: String::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_parse_rpm_output() {
        let out = "3isec-qubes-vpn|0|1.2|1.fc37\n3isec-qubes-mirage|1|0.9|2\n\n";
        let set = InstalledSet::parse(out, "3isec-qubes-");
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("vpn"), Some(&Evr::new("0", "1.2", "1.fc37")));
        assert_eq!(set.get("mirage"), Some(&Evr::new("1", "0.9", "2")));
    }

    #[test]
    fn test_bad_lines_skipped() {
        let out = "3isec-qubes-vpn|0|1.2\nkernel|0|6.1|1\n3isec-qubes-|0|1|1\n3isec-qubes-ok|0|1|1\n";
        let set = InstalledSet::parse(out, "3isec-qubes-");
        assert_eq!(set.len(), 1);
        assert!(set.get("ok").is_some());
    }

    #[test]
    fn test_status() {
        let set = InstalledSet::parse("3isec-qubes-vpn|0|1.2|1\n", "3isec-qubes-");
        assert_eq!(set.status_of(&record("vpn", "0", "1.2", "1")), PackageStatus::Installed);
        assert_eq!(set.status_of(&record("vpn", "0", "1.10", "1")), PackageStatus::Upgradable);
        assert_eq!(set.status_of(&record("vpn", "0", "1.1", "9")), PackageStatus::Installed);
        assert_eq!(set.status_of(&record("mirage", "0", "1", "1")), PackageStatus::Available);
    }

    #[test]
    fn test_empty_epoch_equals_zero() {
        let set = InstalledSet::parse("3isec-qubes-vpn|0|1.2|1\n", "3isec-qubes-");
        assert_eq!(set.status_of(&record("vpn", "", "1.2", "1")), PackageStatus::Installed);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(PackageStatus::Upgradable.to_string(), "upgradable");
    }
}
