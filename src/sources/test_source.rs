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

//! Generated rows for load and backpressure checks: `row_count` rows of
//! `{value: Integer}` plus a constant `name` column when one is configured.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ZiPipelineContext;
use crate::errors::{Result, ZiError};
use crate::record::ZiDataRow;
use crate::stage::{config_u64, ZiSource};
use crate::types::{ZiDataType, ZiTypes, ZiTypesRef};

/// Observes a test source from outside the pipeline.
#[derive(Clone, Debug, Default)]
pub struct ZiTestSourceProbe {
    produced: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ZiTestSourceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ZiTestSource {
    row_count: u32,
    delay: Option<Duration>,
    name: Option<String>,
    next_value: u32,
    probe: ZiTestSourceProbe,
}

impl ZiTestSource {
    pub fn new(row_count: u32) -> Self {
        Self {
            row_count,
            delay: None,
            name: None,
            next_value: 0,
            probe: ZiTestSourceProbe::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn with_probe(mut self, probe: ZiTestSourceProbe) -> Self {
        self.probe = probe;
        self
    }
}

#[async_trait]
impl ZiSource for ZiTestSource {
    fn name(&self) -> &str {
        "test"
    }

    async fn initialize(&mut self, ctx: &ZiPipelineContext) -> Result<ZiTypesRef> {
        let mut types = ZiTypes::new();
        types.put_if_absent("value", ZiDataType::Integer);
        if self.name.is_some() {
            types.put_if_absent("name", ZiDataType::String);
        }
        log::debug!(
            "source.test.initialize: generating rows - request_id={}, rows={}",
            ctx.request().request_id,
            self.row_count
        );
        Ok(types.into_ref())
    }

    async fn next(&mut self) -> Result<Option<ZiDataRow>> {
        if self.next_value >= self.row_count {
            return Ok(None);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let value = i32::try_from(self.next_value)
            .map_err(|_| ZiError::source("test", "row count exceeds Integer range"))?;
        self.next_value += 1;

        let mut row = ZiDataRow::with_capacity(2);
        row.put("value", value);
        if let Some(name) = &self.name {
            row.put("name", name.as_str());
        }
        self.probe.produced.fetch_add(1, Ordering::SeqCst);
        Ok(Some(row))
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Config: `{"row_count": 1000, "delay_ms": 0, "name": "optional"}`.
pub fn test_source_factory(config: &Value) -> Result<Box<dyn ZiSource>> {
    let row_count = config_u64(config, "test source", "row_count")?;
    let row_count = u32::try_from(row_count)
        .map_err(|_| ZiError::validation("test source 'row_count' is too large"))?;
    let delay_ms = config.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
    let mut source = ZiTestSource::new(row_count).with_delay(Duration::from_millis(delay_ms));
    if let Some(name) = config.get("name").and_then(Value::as_str) {
        source = source.with_name(name);
    }
    Ok(Box::new(source))
}
