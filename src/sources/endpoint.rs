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

//! # Endpoint Source
//!
//! Reads rows from a named endpoint through a synchronous driver. The driver
//! is supplied per endpoint type as a [`ZiEndpointConnector`]; Ziq never
//! speaks a database protocol itself.
//!
//! Every driver call (connect, fetch, close) runs on the
//! [`ZiBlockingPool`](crate::blocking::ZiBlockingPool). Rows are fetched in
//! batches of `fetch_size` so a pipeline pays one pool round trip per batch
//! rather than per row.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::argument::ZiArgumentInstance;
use crate::blocking::ZiBlockingPool;
use crate::context::{ZiEndpoint, ZiPipelineContext};
use crate::errors::{Result, ZiError};
use crate::record::ZiDataRow;
use crate::stage::{config_str, ZiSource, ZiSourceFactory};
use crate::types::{ZiColumnDefn, ZiTypes, ZiTypesRef};

const DEFAULT_FETCH_SIZE: usize = 100;

/// A forward-only result set held by a driver. All calls may block.
pub trait ZiRowCursor: Send {
    fn columns(&self) -> Vec<ZiColumnDefn>;

    fn next_row(&mut self) -> Result<Option<ZiDataRow>>;

    fn close(&mut self) {}
}

/// Opens cursors for one endpoint type. All calls may block.
pub trait ZiEndpointConnector: Send + Sync {
    fn open(
        &self,
        endpoint: &ZiEndpoint,
        query: &str,
        arguments: &HashMap<String, ZiArgumentInstance>,
    ) -> Result<Box<dyn ZiRowCursor>>;
}

/// Connectors keyed by endpoint type, e.g. `"SQL"`.
pub type ZiConnectors = HashMap<String, Arc<dyn ZiEndpointConnector>>;

pub struct ZiEndpointSource {
    endpoint_key: String,
    query: String,
    fetch_size: usize,
    connectors: Arc<ZiConnectors>,
    pool: ZiBlockingPool,
    cursor: Option<Box<dyn ZiRowCursor>>,
    buffered: VecDeque<ZiDataRow>,
    exhausted: bool,
}

impl ZiEndpointSource {
    pub fn new(
        endpoint_key: impl Into<String>,
        query: impl Into<String>,
        connectors: Arc<ZiConnectors>,
        pool: ZiBlockingPool,
    ) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            query: query.into(),
            fetch_size: DEFAULT_FETCH_SIZE,
            connectors,
            pool,
            cursor: None,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = size.max(1);
        self
    }

    fn fail(&self, err: ZiError) -> ZiError {
        match err {
            ZiError::Source { .. } | ZiError::Cancelled(_) => err,
            other => ZiError::source(format!("endpoint:{}", self.endpoint_key), other.to_string()),
        }
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let Some(mut cursor) = self.cursor.take() else {
            self.exhausted = true;
            return Ok(());
        };
        let fetch_size = self.fetch_size;
        let (cursor, batch) = self
            .pool
            .run(move || {
                let mut batch = Vec::with_capacity(fetch_size);
                let mut done = false;
                while batch.len() < fetch_size {
                    match cursor.next_row() {
                        Ok(Some(row)) => batch.push(row),
                        Ok(None) => {
                            done = true;
                            break;
                        }
                        Err(err) => {
                            cursor.close();
                            return Err(err);
                        }
                    }
                }
                if done {
                    cursor.close();
                    Ok((None, batch))
                } else {
                    Ok((Some(cursor), batch))
                }
            })
            .await
            .map_err(|e| {
                self.exhausted = true;
                e
            })?;
        self.exhausted = cursor.is_none();
        self.cursor = cursor;
        self.buffered.extend(batch);
        Ok(())
    }
}

#[async_trait]
impl ZiSource for ZiEndpointSource {
    fn name(&self) -> &str {
        "endpoint"
    }

    async fn initialize(&mut self, ctx: &ZiPipelineContext) -> Result<ZiTypesRef> {
        let endpoint = ctx.endpoint(&self.endpoint_key).await?;
        let connector = self
            .connectors
            .get(&endpoint.endpoint_type)
            .cloned()
            .ok_or_else(|| {
                ZiError::validation(format!(
                    "no connector registered for endpoint type '{}'",
                    endpoint.endpoint_type
                ))
            })?;

        log::debug!(
            "source.endpoint.open: opening cursor - request_id={}, endpoint={}, type={}",
            ctx.request().request_id,
            endpoint.key,
            endpoint.endpoint_type
        );

        let query = self.query.clone();
        let arguments = ctx.arguments().clone();
        let cursor = self
            .pool
            .run(move || connector.open(&endpoint, &query, &arguments))
            .await
            .map_err(|e| self.fail(e))?;

        let types = ZiTypes::from_defns(cursor.columns()).into_ref();
        self.cursor = Some(cursor);
        Ok(types)
    }

    async fn next(&mut self) -> Result<Option<ZiDataRow>> {
        if self.buffered.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_batch().await {
                return Err(self.fail(err));
            }
        }
        Ok(self.buffered.pop_front())
    }

    async fn close(&mut self) {
        self.buffered.clear();
        self.exhausted = true;
        if let Some(mut cursor) = self.cursor.take() {
            let closed = self
                .pool
                .run(move || {
                    cursor.close();
                    Ok(())
                })
                .await;
            if let Err(err) = closed {
                log::warn!(
                    "source.endpoint.close_failed: cursor close failed - endpoint={}, error={}",
                    self.endpoint_key,
                    err
                );
            }
        }
    }
}

/// Builds endpoint sources that share the given drivers and pool.
///
/// Config: `{"endpoint": "key", "query": "...", "fetch_size": 100}`.
pub fn endpoint_source_factory(connectors: Arc<ZiConnectors>, pool: ZiBlockingPool) -> ZiSourceFactory {
    Arc::new(move |config: &Value| -> Result<Box<dyn ZiSource>> {
        let endpoint = config_str(config, "endpoint source", "endpoint")?;
        let query = config_str(config, "endpoint source", "query")?;
        let fetch_size = config
            .get("fetch_size")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_FETCH_SIZE);
        Ok(Box::new(
            ZiEndpointSource::new(endpoint, query, connectors.clone(), pool.clone())
                .fetch_size(fetch_size),
        ))
    })
}
