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

//! Package spec matching.
//!
//! A spec selects packages by name, optionally pinned to a version:
//! `name`, `name-version`, `name-version-release` or
//! `name-epoch:version-release`. The name part may be a shell glob.
//! Since package names may themselves contain dashes, every reading of the
//! spec is tried, most literal first.

use glob::Pattern;

/// Components of one reading of a spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecComponents {
    pub name: String,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
}

impl SpecComponents {
    fn name_only(name: &str) -> Self {
        Self {
            name: name.to_string(),
            epoch: None,
            version: None,
            release: None,
        }
    }
}

/// A successful match: the reading that matched and its rank (0 is best)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMatch {
    pub priority: usize,
    pub components: SpecComponents,
}

/// Split a spec into its possible readings, most literal first
pub fn interpretations(spec: &str) -> Vec<SpecComponents> {
    let mut forms = vec![SpecComponents::name_only(spec)];

    if let Some((head, release)) = spec.rsplit_once('-') {
        if let Some((name, ev)) = head.rsplit_once('-') {
            // name-epoch:version-release, or name-version-release
            let (epoch, version) = match ev.split_once(':') {
                Some((e, v)) => (Some(e.to_string()), v),
                None => (None, ev),
            };
            if !name.is_empty() {
                forms.push(SpecComponents {
                    name: name.to_string(),
                    epoch,
                    version: Some(version.to_string()),
                    release: Some(release.to_string()),
                });
            }
        }

        // name-epoch:version, or name-version
        let (epoch, version) = match release.split_once(':') {
            Some((e, v)) => (Some(e.to_string()), v),
            None => (None, release),
        };
        if !head.is_empty() {
            forms.push(SpecComponents {
                name: head.to_string(),
                epoch,
                version: Some(version.to_string()),
                release: None,
            });
        }
    }

    forms
}

/// Matches candidate packages against user specs.
///
/// Candidate names are the full rpm names; a spec may name a package with or
/// without the task-package prefix.
#[derive(Debug, Clone)]
pub struct SpecMatcher {
    prefix: String,
}

impl SpecMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Evaluate `spec` against one candidate package
    pub fn matches(&self, name: &str, epoch: &str, version: &str, release: &str, spec: &str) -> Option<SpecMatch> {
        let short_name = name.strip_prefix(self.prefix.as_str()).filter(|_| !self.prefix.is_empty());

        interpretations(spec)
            .into_iter()
            .enumerate()
            .find(|(_, form)| {
                let name_ok = glob_match(&form.name, name)
                    || short_name.is_some_and(|short| glob_match(&form.name, short));
                name_ok
                    && form.epoch.as_deref().map_or(true, |e| e == epoch)
                    && form.version.as_deref().map_or(true, |v| v == version)
                    && form.release.as_deref().map_or(true, |r| r == release)
            })
            .map(|(priority, components)| SpecMatch { priority, components })
    }
}

/// Shell-style glob match; an invalid pattern only matches itself
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(candidate),
        Err(_) => pattern == candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> SpecMatcher {
        SpecMatcher::new("myprefix-")
    }

    #[test]
    fn test_bare_name_matches_without_prefix() {
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "foo").is_some());
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "myprefix-foo").is_some());
    }

    #[test]
    fn test_version_mismatch() {
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "foo-2.0").is_none());
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "foo-1.0").is_some());
    }

    #[test]
    fn test_glob_name() {
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "f*").is_some());
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "fo?").is_some());
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "[a-f]oo").is_some());
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "b*").is_none());
        assert!(matcher().matches("myprefix-foo", "0", "1.0", "1", "*").is_some());
    }

    #[test]
    fn test_full_evr() {
        let m = matcher();
        let hit = m.matches("myprefix-foo", "2", "1.0", "3", "foo-2:1.0-3").unwrap();
        assert_eq!(hit.components.epoch.as_deref(), Some("2"));
        assert_eq!(hit.components.version.as_deref(), Some("1.0"));
        assert_eq!(hit.components.release.as_deref(), Some("3"));
        assert!(m.matches("myprefix-foo", "1", "1.0", "3", "foo-2:1.0-3").is_none());
        assert!(m.matches("myprefix-foo", "2", "1.0", "3", "foo-1.0-3").is_some());
        assert!(m.matches("myprefix-foo", "2", "1.0", "3", "foo-1.0-4").is_none());
    }

    #[test]
    fn test_dashed_name_prefers_name_reading() {
        let m = matcher();
        let hit = m.matches("myprefix-split-gpg", "0", "1.0", "1", "split-gpg").unwrap();
        assert_eq!(hit.priority, 0);
        assert_eq!(hit.components.version, None);
    }

    #[test]
    fn test_name_only_ignores_version_fields() {
        assert!(matcher().matches("myprefix-foo", "", "", "", "foo").is_some());
    }

    #[test]
    fn test_invalid_glob_is_literal() {
        assert!(matcher().matches("myprefix-a[b", "0", "1", "1", "a[b").is_some());
        assert!(matcher().matches("myprefix-ab", "0", "1", "1", "a[b").is_none());
    }

    #[test]
    fn test_interpretations() {
        let forms = interpretations("foo-1:2.0-3");
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0].name, "foo-1:2.0-3");
        assert_eq!(forms[1].name, "foo");
        assert_eq!(forms[2].name, "foo-1:2.0");
        assert_eq!(forms[2].version.as_deref(), Some("3"));
        assert_eq!(interpretations("foo").len(), 1);
    }
}
