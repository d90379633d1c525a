//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Zi.
//! The Zi project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! Audit records emitted once per request, whatever its outcome.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ZiRequestContext;
use crate::errors::ZiError;
use crate::pipeline::ZiRunSummary;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZiAuditRecord {
    pub request_id: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    /// 200 on success, 304 when the caller's copy was current, otherwise the
    /// error's status code.
    pub status: u16,
    pub rows: u64,
    pub bytes: u64,
    pub time_to_first_byte: Option<Duration>,
    pub duration: Duration,
    pub warnings: usize,
    #[serde(default)]
    pub from_cache: bool,
    pub error: Option<String>,
}

impl ZiAuditRecord {
    pub fn succeeded(request: &ZiRequestContext, summary: &ZiRunSummary) -> Self {
        Self {
            request_id: request.request_id.clone(),
            path: request.path.clone(),
            timestamp: Utc::now(),
            status: if summary.not_modified { 304 } else { 200 },
            rows: summary.rows,
            bytes: summary.bytes,
            time_to_first_byte: summary.time_to_first_byte,
            duration: summary.duration,
            warnings: summary.warnings,
            from_cache: summary.from_cache,
            error: None,
        }
    }

    pub fn failed(request: &ZiRequestContext, error: &ZiError, bytes: u64) -> Self {
        Self {
            request_id: request.request_id.clone(),
            path: request.path.clone(),
            timestamp: Utc::now(),
            status: error.status_code(),
            rows: 0,
            bytes,
            time_to_first_byte: None,
            duration: request.started.elapsed(),
            warnings: 0,
            from_cache: false,
            error: Some(error.to_string()),
        }
    }
}

/// Receives audit records; persistence is up to the implementation.
pub trait ZiAuditSink: Send + Sync {
    fn record(&self, record: ZiAuditRecord);
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct ZiNullAuditSink;

impl ZiAuditSink for ZiNullAuditSink {
    fn record(&self, _record: ZiAuditRecord) {}
}

/// Keeps records in memory, mostly for tests.
#[derive(Debug, Default)]
pub struct ZiMemoryAuditSink {
    records: Mutex<Vec<ZiAuditRecord>>,
}

impl ZiMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ZiAuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ZiAuditSink for ZiMemoryAuditSink {
    fn record(&self, record: ZiAuditRecord) {
        log::debug!(
            "audit.record: request audited - request_id={}, status={}, bytes={}",
            record.request_id,
            record.status,
            record.bytes
        );
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
