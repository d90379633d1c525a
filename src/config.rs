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

//! # Ziq Engine Configuration
//!
//! Settings shared by every pipeline an executor runs. A configuration can be
//! built fluently, read from YAML, or read from a JSON value in which any
//! missing or malformed field falls back to its default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// What to do with a dynamic endpoint row that cannot be turned into an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZiDynamicEndpointPolicy {
    /// Fail the whole pipeline with the endpoint error.
    #[default]
    FailPipeline,
    /// Skip the row, log it and count a warning.
    SkipRow,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZiEngineConfig {
    /// Directory cache artifacts are written to; `None` disables caching.
    pub output_cache_dir: Option<PathBuf>,
    /// Per-sink count of queued, unwritten buffers before a sink reports full.
    pub write_queue_max_size: usize,
    /// In-memory byte budget for a sort before it spills runs to disk.
    pub sort_memory_limit: usize,
    pub blocking_pool_size: usize,
    pub dynamic_endpoint_policy: ZiDynamicEndpointPolicy,
    /// How long completed audit rows are retained for rate limiting.
    pub rate_limit_retention_secs: u64,
}

impl Default for ZiEngineConfig {
    fn default() -> Self {
        Self {
            output_cache_dir: None,
            write_queue_max_size: 64,
            sort_memory_limit: 16 * 1024 * 1024,
            blocking_pool_size: num_cpus::get().max(1),
            dynamic_endpoint_policy: ZiDynamicEndpointPolicy::FailPipeline,
            rate_limit_retention_secs: 24 * 60 * 60,
        }
    }
}

impl ZiEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let builder: ZiEngineConfigBuilder = serde_yaml::from_str(text)?;
        Ok(builder.build())
    }

    /// Lenient JSON loader; an unreadable document yields the defaults.
    pub fn from_json(value: &Value) -> Self {
        let builder: ZiEngineConfigBuilder =
            serde_json::from_value(value.clone()).unwrap_or_default();
        builder.build()
    }

    pub fn output_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_cache_dir = Some(dir.into());
        self
    }

    pub fn write_queue_max_size(mut self, size: usize) -> Self {
        self.write_queue_max_size = size.max(1);
        self
    }

    pub fn sort_memory_limit(mut self, bytes: usize) -> Self {
        self.sort_memory_limit = bytes;
        self
    }

    pub fn blocking_pool_size(mut self, size: usize) -> Self {
        self.blocking_pool_size = size.max(1);
        self
    }

    pub fn dynamic_endpoint_policy(mut self, policy: ZiDynamicEndpointPolicy) -> Self {
        self.dynamic_endpoint_policy = policy;
        self
    }

    pub fn rate_limit_retention_secs(mut self, secs: u64) -> Self {
        self.rate_limit_retention_secs = secs;
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ZiEngineConfigBuilder {
    output_cache_dir: Option<PathBuf>,
    write_queue_max_size: Option<usize>,
    sort_memory_limit: Option<usize>,
    blocking_pool_size: Option<usize>,
    dynamic_endpoint_policy: Option<ZiDynamicEndpointPolicy>,
    rate_limit_retention_secs: Option<u64>,
}

impl ZiEngineConfigBuilder {
    fn build(self) -> ZiEngineConfig {
        let base = ZiEngineConfig::default();
        ZiEngineConfig {
            output_cache_dir: self.output_cache_dir.or(base.output_cache_dir),
            write_queue_max_size: self
                .write_queue_max_size
                .unwrap_or(base.write_queue_max_size)
                .max(1),
            sort_memory_limit: self.sort_memory_limit.unwrap_or(base.sort_memory_limit),
            blocking_pool_size: self
                .blocking_pool_size
                .unwrap_or(base.blocking_pool_size)
                .max(1),
            dynamic_endpoint_policy: self
                .dynamic_endpoint_policy
                .unwrap_or(base.dynamic_endpoint_policy),
            rate_limit_retention_secs: self
                .rate_limit_retention_secs
                .unwrap_or(base.rate_limit_retention_secs),
        }
    }
}
