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

//! Repository query client.

use std::path::PathBuf;
use tracing::{debug, info_span, Instrument};

use super::channel::{self, Channel};
use super::package::PackageRecord;
use super::parser::ResponseParser;
use super::payload::{self, QueryRequest};
use crate::error::{TaskError, TaskResult};

/// Service answering repository searches in the UpdateVM
pub const DEFAULT_SERVICE: &str = "qubes.TemplateSearch";

/// Queries the task repositories through a channel.
///
/// A failed query is never retried: the remote side is not trusted to
/// correct itself.
pub struct RepoClient<C: Channel> {
    channel: C,
    service: String,
    prefix: String,
    repo_files: Vec<PathBuf>,
    release_version: String,
    force_refresh: bool,
    parser: ResponseParser,
}

impl<C: Channel> RepoClient<C> {
    pub fn new(
        channel: C,
        service: impl Into<String>,
        prefix: impl Into<String>,
        repo_files: Vec<PathBuf>,
        release_version: impl Into<String>,
    ) -> Self {
        let service = service.into();
        let prefix = prefix.into();
        Self {
            parser: ResponseParser::new(service.clone(), prefix.clone()),
            channel,
            service,
            prefix,
            repo_files,
            release_version: release_version.into(),
            force_refresh: true,
        }
    }

    /// Send `--refresh` only when the caller asks for it
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Spec as sent to the remote: short names get the task prefix so the
    /// search stays inside the task packages
    fn wire_spec(&self, spec: &str) -> String {
        if spec.starts_with(&self.prefix) {
            spec.to_string()
        } else {
            format!("{}{}", self.prefix, spec)
        }
    }

    /// List the task packages matching `spec`
    pub async fn query(&self, refresh: bool, spec: &str) -> TaskResult<Vec<PackageRecord>> {
        let span = info_span!("query", service = %self.service, spec);
        async {
            payload::check_spec(spec)?;
            let payload = QueryRequest {
                refresh,
                release_version: self.release_version.clone(),
                spec: self.wire_spec(spec),
                repo_files: self.repo_files.clone(),
            }
            .build(self.force_refresh)?;
            debug!("sending {} byte request", payload.len());

            let output = self.channel.call(&self.service, payload.as_bytes()).await?;
            let response = channel::into_response(&self.service, output)?;
            debug!("received {} byte response", response.len());

            self.parser.parse(&response, spec)
        }
        .instrument(span)
        .await
    }

    /// Query several specs, merging the results without duplicates
    pub async fn query_all(&self, refresh: bool, specs: &[String]) -> TaskResult<Vec<PackageRecord>> {
        let mut merged: Vec<PackageRecord> = Vec::new();
        for (i, spec) in specs.iter().enumerate() {
            // Only the first request needs to refresh the metadata
            for record in self.query(refresh && i == 0, spec).await? {
                if !merged.contains(&record) {
                    merged.push(record);
                }
            }
        }
        Ok(merged)
    }

    /// The newest package matching `spec`
    pub async fn resolve(&self, refresh: bool, spec: &str) -> TaskResult<PackageRecord> {
        self.query(refresh, spec)
            .await?
            .into_iter()
            .max_by(|a, b| a.evr.cmp(&b.evr))
            .ok_or_else(|| TaskError::NotFound { spec: spec.to_string() })
    }
}
