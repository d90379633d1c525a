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

//! # Dynamic Endpoints
//!
//! Before the main pipeline starts, a lookup pipeline may produce rows that
//! each describe an endpoint. Every row is turned into a [`ZiEndpoint`] and
//! added to the pipeline context under its key.
//!
//! A row that cannot be turned into an endpoint yields a per-key
//! [`ZiError::Endpoint`]. Under
//! [`ZiDynamicEndpointPolicy::FailPipeline`] the first such error fails the
//! request; under [`ZiDynamicEndpointPolicy::SkipRow`] the row is skipped and
//! counted as a warning.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ZiDynamicEndpointPolicy;
use crate::context::{ZiEndpoint, ZiPipelineContext};
use crate::errors::{Result, ZiError};
use crate::record::{ZiDataRow, ZiValue};
use crate::stage::{ZiChain, ZiProcessor, ZiRowPull, ZiSource};

/// Which lookup columns carry each endpoint attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZiEndpointFields {
    /// Key used when a row carries none.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_url_field")]
    pub url_field: String,
    #[serde(default = "default_type_field")]
    pub type_field: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
}

fn default_key_field() -> String {
    "key".to_string()
}

fn default_url_field() -> String {
    "url".to_string()
}

fn default_type_field() -> String {
    "type".to_string()
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

impl Default for ZiEndpointFields {
    fn default() -> Self {
        Self {
            key: None,
            key_field: default_key_field(),
            url_field: default_url_field(),
            type_field: default_type_field(),
            username_field: default_username_field(),
            password_field: default_password_field(),
        }
    }
}

fn text(row: &ZiDataRow, field: &str) -> Option<String> {
    match row.get(field) {
        None | Some(ZiValue::Null) => None,
        Some(value) => {
            let s = value.to_string();
            (!s.is_empty()).then_some(s)
        }
    }
}

/// Converts one lookup row into an endpoint.
pub fn endpoint_from_row(row: &ZiDataRow, fields: &ZiEndpointFields) -> Result<ZiEndpoint> {
    let key = match text(row, &fields.key_field).or_else(|| fields.key.clone()) {
        Some(key) => key,
        None if !row.contains_key(&fields.key_field) => {
            return Err(ZiError::endpoint(
                "",
                format!(
                    "no field named '{}' in lookup row and no default key",
                    fields.key_field
                ),
            ))
        }
        None => return Err(ZiError::endpoint("", "no key specified for dynamic endpoint")),
    };

    let url = text(row, &fields.url_field)
        .ok_or_else(|| ZiError::endpoint(&key, format!("no url in field '{}'", fields.url_field)))?;

    let mut endpoint = ZiEndpoint::new(key, url);
    if let Some(endpoint_type) = text(row, &fields.type_field) {
        endpoint.endpoint_type = endpoint_type;
    }
    endpoint.username = text(row, &fields.username_field);
    endpoint.password = text(row, &fields.password_field);
    Ok(endpoint)
}

/// Runs a lookup pipeline and registers the endpoints it yields.
pub struct ZiDynamicEndpointResolver {
    fields: ZiEndpointFields,
    policy: ZiDynamicEndpointPolicy,
}

impl ZiDynamicEndpointResolver {
    pub fn new(fields: ZiEndpointFields, policy: ZiDynamicEndpointPolicy) -> Self {
        Self { fields, policy }
    }

    /// Returns the number of endpoints added to `ctx`.
    pub async fn resolve(
        &self,
        ctx: &ZiPipelineContext,
        mut source: Box<dyn ZiSource>,
        mut processors: Vec<Box<dyn ZiProcessor>>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let result = self
            .run(ctx, source.as_mut(), &mut processors, cancel)
            .await;
        source.close().await;
        for processor in processors.iter_mut() {
            processor.close().await;
        }
        result
    }

    async fn run(
        &self,
        ctx: &ZiPipelineContext,
        source: &mut dyn ZiSource,
        processors: &mut [Box<dyn ZiProcessor>],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut types = source.initialize(ctx).await?;
        for processor in processors.iter_mut() {
            types = processor.initialize(&types)?;
        }

        let mut chain = ZiChain::new(source, processors);
        let mut added = 0;
        loop {
            let row = tokio::select! {
                row = chain.pull() => row?,
                _ = cancel.cancelled() => return Err(ZiError::cancelled("dynamic endpoint lookup cancelled")),
            };
            let Some(row) = row else { break };

            match endpoint_from_row(&row, &self.fields) {
                Ok(endpoint) => {
                    log::debug!(
                        "endpoint.dynamic.add: endpoint resolved - request_id={}, key={}, type={}",
                        ctx.request().request_id,
                        endpoint.key,
                        endpoint.endpoint_type
                    );
                    ctx.insert_endpoint(endpoint).await;
                    added += 1;
                }
                Err(err) => match self.policy {
                    ZiDynamicEndpointPolicy::FailPipeline => {
                        log::error!(
                            "endpoint.dynamic.failed: unable to process dynamic endpoint - request_id={}, error={}",
                            ctx.request().request_id,
                            err
                        );
                        return Err(err);
                    }
                    ZiDynamicEndpointPolicy::SkipRow => {
                        log::warn!(
                            "endpoint.dynamic.skip: lookup row skipped - request_id={}, error={}",
                            ctx.request().request_id,
                            err
                        );
                        ctx.add_warning();
                    }
                },
            }
        }
        Ok(added)
    }
}
