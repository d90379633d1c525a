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

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::record::ZiDataRow;
use crate::stage::{config_u64, ZiProcessor, ZiRowPull};
use crate::types::ZiTypesRef;

/// Discards the first `skip` rows.
#[derive(Debug)]
pub struct ZiOffset {
    skip: u64,
    skipped: u64,
}

impl ZiOffset {
    pub fn new(skip: u64) -> Self {
        Self { skip, skipped: 0 }
    }
}

#[async_trait]
impl ZiProcessor for ZiOffset {
    fn name(&self) -> &str {
        "offset"
    }

    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
        Ok(input.clone())
    }

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
        while self.skipped < self.skip {
            if upstream.pull().await?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        upstream.pull().await
    }
}

pub fn offset_factory(config: &Value) -> Result<Box<dyn ZiProcessor>> {
    let skip = config_u64(config, "offset", "offset")?;
    Ok(Box::new(ZiOffset::new(skip)))
}
