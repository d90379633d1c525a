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

//! # Ziq Credentials Cache
//!
//! A read-mostly map from caller identity to fetched credentials, each entry
//! valid for a fixed time. Reads share the lock; a miss fetches outside the
//! lock, so two racing misses for the same key may both fetch. The later
//! insert wins.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::errors::Result;

struct ZiCredentialsEntry<T> {
    value: T,
    expires: Instant,
}

pub struct ZiCredentialsCache<T: Clone + Send + Sync> {
    ttl: Duration,
    entries: RwLock<HashMap<String, ZiCredentialsEntry<T>>>,
}

impl<T: Clone + Send + Sync> ZiCredentialsCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached value for `key` if it has not expired.
    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        log::debug!("credentials.fetch: cache miss - key={}", key);
        let value = fetch().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn insert(&self, key: &str, value: T) {
        let expires = Instant::now() + self.ttl;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires > Instant::now());
        entries.insert(key.to_string(), ZiCredentialsEntry { value, expires });
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
