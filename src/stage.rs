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

//! # Ziq Stage Module
//!
//! This module defines the three stage contracts a pipeline is assembled
//! from and the pull chain that links them.
//!
//! ## Stage Design
//!
//! Ziq follows a pull-based, one-row-at-a-time model. The orchestrator asks
//! the last processor for a row; each processor asks its upstream, down to
//! the source. Nothing is produced that the format has not asked for, so the
//! only throttle a pipeline needs is the output sink's queue.
//!
//! - [`ZiSource`]: declares a schema, then yields rows until exhausted
//! - [`ZiProcessor`]: derives an output schema once, then transforms,
//!   drops or reorders rows pulled from upstream
//! - [`ZiFormat`]: serialises each row into a [`ZiWriteStream`]
//!
//! ## Implementing a Processor
//!
//! ```rust
//! use async_trait::async_trait;
//! use ziq::errors::Result;
//! use ziq::record::ZiDataRow;
//! use ziq::stage::{ZiProcessor, ZiRowPull};
//! use ziq::types::{ZiTypes, ZiTypesRef};
//!
//! struct Passthrough;
//!
//! #[async_trait]
//! impl ZiProcessor for Passthrough {
//!     fn name(&self) -> &str {
//!         "passthrough"
//!     }
//!
//!     fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
//!         Ok(input.clone())
//!     }
//!
//!     async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
//!         upstream.pull().await
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ZiPipelineContext;
use crate::errors::{Result, ZiError};
use crate::record::ZiDataRow;
use crate::stream::ZiWriteStream;
use crate::types::ZiTypesRef;

/// Produces a finite, forward-only sequence of rows.
#[async_trait]
pub trait ZiSource: Send {
    fn name(&self) -> &str;

    /// Opens the source and declares the columns its rows carry.
    async fn initialize(&mut self, ctx: &ZiPipelineContext) -> Result<ZiTypesRef>;

    /// Next row, or `None` once exhausted.
    async fn next(&mut self) -> Result<Option<ZiDataRow>>;

    /// Releases the source; called once, whether or not it was exhausted.
    async fn close(&mut self) {}
}

/// Something a processor can pull rows from.
#[async_trait]
pub trait ZiRowPull: Send {
    async fn pull(&mut self) -> Result<Option<ZiDataRow>>;
}

/// Transforms a row stream pulled from upstream.
#[async_trait]
pub trait ZiProcessor: Send {
    fn name(&self) -> &str;

    /// Checks the input schema and returns the schema this processor emits.
    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef>;

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>>;

    async fn close(&mut self) {}
}

/// Serialises rows to a byte sink.
#[async_trait]
pub trait ZiFormat: Send {
    fn name(&self) -> &str;

    fn extension(&self) -> &str;

    fn media_type(&self) -> &str;

    fn initialize(&mut self, types: &ZiTypesRef) -> Result<()>;

    async fn write_row(&mut self, row: &ZiDataRow, sink: &mut dyn ZiWriteStream) -> Result<()>;

    /// Writes any trailer; called once after the last row.
    async fn finish(&mut self, sink: &mut dyn ZiWriteStream) -> Result<()>;
}

pub type ZiSourceFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn ZiSource>> + Send + Sync>;
pub type ZiProcessorFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn ZiProcessor>> + Send + Sync>;
pub type ZiFormatFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn ZiFormat>> + Send + Sync>;

/// A source followed by processors, pulled from the last processor.
pub struct ZiChain<'a> {
    source: &'a mut dyn ZiSource,
    processors: &'a mut [Box<dyn ZiProcessor>],
}

impl<'a> ZiChain<'a> {
    pub fn new(source: &'a mut dyn ZiSource, processors: &'a mut [Box<dyn ZiProcessor>]) -> Self {
        Self { source, processors }
    }
}

#[async_trait]
impl<'a> ZiRowPull for ZiChain<'a> {
    async fn pull(&mut self) -> Result<Option<ZiDataRow>> {
        match self.processors.split_last_mut() {
            None => self.source.next().await,
            Some((last, rest)) => {
                let mut upstream = ZiChain {
                    source: &mut *self.source,
                    processors: rest,
                };
                last.next(&mut upstream).await
            }
        }
    }
}

/// Reads an unsigned integer config field, the way every stage factory does.
pub fn config_u64(config: &Value, stage: &str, field: &str) -> Result<u64> {
    config
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| ZiError::validation(format!("{stage} requires unsigned integer '{field}'")))
}

/// Reads a required string config field.
pub fn config_str<'v>(config: &'v Value, stage: &str, field: &str) -> Result<&'v str> {
    config
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ZiError::validation(format!("{stage} requires string '{field}'")))
}

/// Reads a required array of strings.
pub fn config_str_list(config: &Value, stage: &str, field: &str) -> Result<Vec<String>> {
    let items = config
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| ZiError::validation(format!("{stage} requires array '{field}'")))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ZiError::validation(format!("{stage} '{field}' must contain strings")))
        })
        .collect()
}
