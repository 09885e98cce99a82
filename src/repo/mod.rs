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

//! Remote task repository support.
//!
//! The admin domain has no network access, so repository queries are
//! forwarded to the UpdateVM over qrexec:
//! - payload building and validation
//! - a bounded, deadline-limited channel transport
//! - strict parsing of the returned records
//! - package spec matching

pub mod channel;
pub mod client;
pub mod package;
pub mod parser;
pub mod payload;
pub mod spec;

pub use channel::{OutputLimits, QrexecChannel};
pub use client::{RepoClient, DEFAULT_SERVICE};
pub use package::{format_size, latest_by_name, total_download_size, Evr, PackageRecord};
