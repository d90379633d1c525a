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

//! # Ziq Definition Module
//!
//! Plain-data pipeline definitions. A [`ZiPipelineDefn`] is what a loader
//! produces from a definition file; the executor turns it into a running
//! [`ZiPipelineInstance`](crate::pipeline::ZiPipelineInstance).
//!
//! ```yaml
//! arguments:
//!   - name: minimum
//!     type: Integer
//!     optional: true
//! source:
//!   type: test
//!   config: { row_count: 1000 }
//! processors:
//!   - type: filter
//!     condition: args.minimum
//!     config: { field: value, op: ge, value: 10 }
//!   - type: limit
//!     config: { count: 100 }
//! formats:
//!   - type: delimited
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::argument::{ZiArgumentDefn, ZiArgumentInstance};
use crate::errors::{Result, ZiError};
use crate::ratelimit::ZiRateLimitRule;
use crate::sources::dynamic::ZiEndpointFields;

/// One source, processor or format in a definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZiStageDefn {
    /// Factory name, e.g. `"limit"`.
    #[serde(rename = "type")]
    pub stage_type: String,
    /// `args.<name>` or `!args.<name>`; the stage is skipped when false.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl ZiStageDefn {
    pub fn new(stage_type: impl Into<String>, config: Value) -> Self {
        Self {
            stage_type: stage_type.into(),
            condition: None,
            config,
        }
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether this stage takes part in the request with these arguments.
    pub fn is_enabled(&self, arguments: &HashMap<String, ZiArgumentInstance>) -> Result<bool> {
        match self.condition.as_deref() {
            None => Ok(true),
            Some(condition) => evaluate_condition(condition, arguments),
        }
    }
}

fn evaluate_condition(
    condition: &str,
    arguments: &HashMap<String, ZiArgumentInstance>,
) -> Result<bool> {
    let condition = condition.trim();
    let (negated, rest) = match condition.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, condition),
    };
    let name = rest
        .strip_prefix("args.")
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_alphanumeric() || c == '_'))
        .ok_or_else(|| {
            ZiError::validation(format!(
                "unsupported condition '{condition}', expected 'args.<name>' or '!args.<name>'"
            ))
        })?;
    let present = arguments.get(name).is_some_and(|arg| !arg.is_empty());
    Ok(present != negated)
}

/// A lookup pipeline whose rows become endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZiDynamicEndpointDefn {
    pub source: ZiStageDefn,
    #[serde(default)]
    pub processors: Vec<ZiStageDefn>,
    #[serde(flatten)]
    pub fields: ZiEndpointFields,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZiPipelineDefn {
    #[serde(default)]
    pub arguments: Vec<ZiArgumentDefn>,
    #[serde(default)]
    pub dynamic_endpoints: Vec<ZiDynamicEndpointDefn>,
    pub source: ZiStageDefn,
    #[serde(default)]
    pub processors: Vec<ZiStageDefn>,
    #[serde(default)]
    pub formats: Vec<ZiStageDefn>,
    #[serde(default)]
    pub rate_limit_rules: Vec<ZiRateLimitRule>,
    /// How long a generated response may be served again from the output cache.
    #[serde(default)]
    pub cache_duration_secs: Option<u64>,
}

impl ZiPipelineDefn {
    pub fn new(source: ZiStageDefn) -> Self {
        Self {
            arguments: Vec::new(),
            dynamic_endpoints: Vec::new(),
            source,
            processors: Vec::new(),
            formats: Vec::new(),
            rate_limit_rules: Vec::new(),
            cache_duration_secs: None,
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn argument(mut self, defn: ZiArgumentDefn) -> Self {
        self.arguments.push(defn);
        self
    }

    pub fn dynamic_endpoint(mut self, defn: ZiDynamicEndpointDefn) -> Self {
        self.dynamic_endpoints.push(defn);
        self
    }

    pub fn processor(mut self, defn: ZiStageDefn) -> Self {
        self.processors.push(defn);
        self
    }

    pub fn format(mut self, defn: ZiStageDefn) -> Self {
        self.formats.push(defn);
        self
    }

    pub fn rate_limit_rule(mut self, rule: ZiRateLimitRule) -> Self {
        self.rate_limit_rules.push(rule);
        self
    }

    pub fn cache_duration_secs(mut self, secs: u64) -> Self {
        self.cache_duration_secs = Some(secs);
        self
    }

    /// Output caching applies only with a non-zero duration.
    pub fn cache_duration(&self) -> Option<Duration> {
        self.cache_duration_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Structural checks that do not depend on a request.
    pub fn validate(&self) -> Result<()> {
        if self.formats.is_empty() {
            return Err(ZiError::validation("pipeline defines no formats"));
        }
        let mut seen = std::collections::HashSet::new();
        for arg in &self.arguments {
            if arg.name.is_empty() {
                return Err(ZiError::validation("argument with no name"));
            }
            if !seen.insert(arg.name.as_str()) {
                return Err(ZiError::validation(format!(
                    "argument '{}' is defined more than once",
                    arg.name
                )));
            }
        }
        for (index, rule) in self.rate_limit_rules.iter().enumerate() {
            rule.validate().map_err(|e| {
                ZiError::validation(format!("rate limit rule {index} is invalid: {e}"))
            })?;
        }
        Ok(())
    }
}
