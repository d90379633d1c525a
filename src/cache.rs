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

//! # Ziq Output Cache Index
//!
//! Remembers which complete cache artifacts exist and until when each may be
//! served. An entry is recorded only after its artifact was renamed into
//! place; lookups ignore entries whose expiry has passed. The index lives in
//! memory, so artifacts written by an earlier process are never served.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One servable artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZiCacheEntry {
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub rows: u64,
    pub bytes: u64,
}

impl ZiCacheEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }
}

#[derive(Debug, Default)]
pub struct ZiCacheIndex {
    entries: Mutex<HashMap<PathBuf, ZiCacheEntry>>,
}

impl ZiCacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, ZiCacheEntry>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records `entry`, replacing any entry for the same path.
    ///
    /// Returns the other entries that had expired by `entry.created`; their
    /// files are the caller's to delete.
    pub fn record(&self, entry: ZiCacheEntry) -> Vec<ZiCacheEntry> {
        let now = entry.created;
        let mut entries = self.entries();
        entries.remove(&entry.path);
        let expired: Vec<PathBuf> = entries
            .values()
            .filter(|e| !e.is_valid_at(now))
            .map(|e| e.path.clone())
            .collect();
        let pruned = expired
            .iter()
            .filter_map(|path| entries.remove(path))
            .collect();
        log::debug!(
            "cache.index.record: artifact recorded - path={}, expires={}, rows={}",
            entry.path.display(),
            entry.expires,
            entry.rows
        );
        entries.insert(entry.path.clone(), entry);
        pruned
    }

    /// The entry for `path` if it is still valid at `now`.
    pub fn lookup(&self, path: &Path, now: DateTime<Utc>) -> Option<ZiCacheEntry> {
        self.entries()
            .get(path)
            .filter(|entry| entry.is_valid_at(now))
            .cloned()
    }

    pub fn remove(&self, path: &Path) -> Option<ZiCacheEntry> {
        self.entries().remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
