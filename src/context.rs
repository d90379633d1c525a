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

//! # Ziq Context Module
//!
//! Per-request state: who is asking ([`ZiRequestContext`]) and what a running
//! pipeline may look up ([`ZiPipelineContext`]): prepared arguments, resolved
//! endpoints and a warning counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::argument::ZiArgumentInstance;
use crate::errors::{Result, ZiError};

/// Identity and parameters of the request being served.
#[derive(Clone, Debug)]
pub struct ZiRequestContext {
    pub request_id: String,
    pub client_ip: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub username: Option<String>,
    /// Raw query parameters, each possibly repeated.
    pub args: HashMap<String, Vec<String>>,
    /// Validator from the request's `If-Modified-Since` header.
    pub if_modified_since: Option<DateTime<Utc>>,
    pub started: Instant,
}

impl ZiRequestContext {
    pub fn new(request_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            client_ip: None,
            host: None,
            path: path.into(),
            issuer: None,
            subject: None,
            username: None,
            args: HashMap::new(),
            if_modified_since: None,
            started: Instant::now(),
        }
    }

    pub fn client_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn if_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(since);
        self
    }

    /// Appends a raw value for a query parameter.
    pub fn arg(mut self, name: &str, value: &str) -> Self {
        self.args
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }
}

/// Connection details for a named data endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZiEndpoint {
    pub key: String,
    #[serde(default = "default_endpoint_type", rename = "type")]
    pub endpoint_type: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_endpoint_type() -> String {
    "SQL".to_string()
}

impl ZiEndpoint {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint_type: default_endpoint_type(),
            url: url.into(),
            username: None,
            password: None,
        }
    }
}

/// Shared, read-mostly state for one running pipeline.
#[derive(Clone)]
pub struct ZiPipelineContext {
    request: Arc<ZiRequestContext>,
    arguments: Arc<HashMap<String, ZiArgumentInstance>>,
    endpoints: Arc<RwLock<HashMap<String, ZiEndpoint>>>,
    warnings: Arc<AtomicUsize>,
}

impl ZiPipelineContext {
    pub fn new(
        request: ZiRequestContext,
        arguments: HashMap<String, ZiArgumentInstance>,
        endpoints: HashMap<String, ZiEndpoint>,
    ) -> Self {
        Self {
            request: Arc::new(request),
            arguments: Arc::new(arguments),
            endpoints: Arc::new(RwLock::new(endpoints)),
            warnings: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn request(&self) -> &ZiRequestContext {
        &self.request
    }

    pub fn arguments(&self) -> &HashMap<String, ZiArgumentInstance> {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&ZiArgumentInstance> {
        self.arguments.get(name)
    }

    /// Looks up an endpoint; an unresolved key is always fatal.
    pub async fn endpoint(&self, key: &str) -> Result<ZiEndpoint> {
        self.endpoints.read().await.get(key).cloned().ok_or_else(|| {
            ZiError::validation(format!("endpoint '{key}' is not defined for this pipeline"))
        })
    }

    /// Adds or replaces an endpoint, as dynamic endpoint resolution does.
    pub async fn insert_endpoint(&self, endpoint: ZiEndpoint) {
        self.endpoints
            .write()
            .await
            .insert(endpoint.key.clone(), endpoint);
    }

    pub async fn endpoint_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.endpoints.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn add_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }
}
