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

//! Keyword search over repository records.

use crate::repo::PackageRecord;

/// Where a keyword was found; lower is a better hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Relevance {
    ExactName,
    Name,
    Summary,
    Other,
}

/// Best relevance of `record` over all keywords, if any keyword matches
pub fn relevance(record: &PackageRecord, keywords: &[String]) -> Option<Relevance> {
    let name = record.name.to_lowercase();
    let summary = record.summary.to_lowercase();
    let description = record.description.to_lowercase();
    let url = record.url.to_lowercase();

    keywords
        .iter()
        .map(|k| k.to_lowercase())
        .filter_map(|k| {
            if name == k {
                Some(Relevance::ExactName)
            } else if name.contains(&k) {
                Some(Relevance::Name)
            } else if summary.contains(&k) {
                Some(Relevance::Summary)
            } else if description.contains(&k) || url.contains(&k) {
                Some(Relevance::Other)
            } else {
                None
            }
        })
        .min()
}

/// Records matching any keyword, best hits first, then by name
pub fn search(records: Vec<PackageRecord>, keywords: &[String]) -> Vec<(Relevance, PackageRecord)> {
    let mut hits: Vec<(Relevance, PackageRecord)> = records
        .into_iter()
        .filter_map(|r| relevance(&r, keywords).map(|rel| (rel, r)))
        .collect();
    hits.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.name.cmp(&b.name)));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::Evr;
    use chrono::Utc;

    fn record(name: &str, summary: &str, description: &str, url: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            evr: Evr::new("0", "1", "1"),
            repository: "3isec-dom0".to_string(),
            download_size: 1,
            build_time: Utc::now(),
            license: "GPL".to_string(),
            url: url.to_string(),
            summary: summary.to_string(),
            description: description.to_string(),
        }
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_ranking() {
        let records = vec![
            record("zulip", "chat", "talks to a vpn", "https://zulip.com"),
            record("vpn-wireguard", "tunnel", "", ""),
            record("mullvad", "VPN qube", "", ""),
            record("vpn", "tunnel", "", ""),
            record("office", "documents", "", ""),
        ];
        let hits = search(records, &keywords(&["VPN"]));
        let names: Vec<&str> = hits.iter().map(|(_, r)| r.name.as_str()).collect();
        assert_eq!(names, vec!["vpn", "vpn-wireguard", "mullvad", "zulip"]);
        assert_eq!(hits[0].0, Relevance::ExactName);
        assert_eq!(hits[3].0, Relevance::Other);
    }

    #[test]
    fn test_best_keyword_counts() {
        let r = record("mirage", "firewall", "", "");
        assert_eq!(relevance(&r, &keywords(&["firewall", "mirage"])), Some(Relevance::ExactName));
        assert_eq!(relevance(&r, &keywords(&["nothing"])), None);
    }

    #[test]
    fn test_url_match() {
        let r = record("split", "", "", "https://qubes.3isec.org/tasks");
        assert_eq!(relevance(&r, &keywords(&["3isec"])), Some(Relevance::Other));
    }
}
