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

/// Passes at most `count` rows, then stops pulling from upstream.
#[derive(Debug)]
pub struct ZiLimit {
    count: u64,
    emitted: u64,
}

impl ZiLimit {
    pub fn new(count: u64) -> Self {
        Self { count, emitted: 0 }
    }
}

#[async_trait]
impl ZiProcessor for ZiLimit {
    fn name(&self) -> &str {
        "limit"
    }

    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
        Ok(input.clone())
    }

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
        if self.emitted >= self.count {
            return Ok(None);
        }
        let row = upstream.pull().await?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }
}

pub fn limit_factory(config: &Value) -> Result<Box<dyn ZiProcessor>> {
    let count = config_u64(config, "limit", "count")?;
    Ok(Box::new(ZiLimit::new(count)))
}
