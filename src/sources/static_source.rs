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

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ZiPipelineContext;
use crate::errors::{Result, ZiError};
use crate::record::{ZiDataRow, ZiValue};
use crate::stage::ZiSource;
use crate::types::{ZiColumnDefn, ZiDataType, ZiTypes, ZiTypesRef};

/// Emits rows declared in the pipeline definition.
#[derive(Debug)]
pub struct ZiStaticSource {
    types: ZiTypesRef,
    rows: VecDeque<ZiDataRow>,
}

impl ZiStaticSource {
    /// Builds the source, converting every literal to its column type up front.
    pub fn new(columns: Vec<ZiColumnDefn>, literals: &[Vec<Value>]) -> Result<Self> {
        let types = ZiTypes::from_defns(columns);
        let mut rows = VecDeque::with_capacity(literals.len());
        for (index, literal) in literals.iter().enumerate() {
            if literal.len() > types.len() {
                return Err(ZiError::validation(format!(
                    "static row #{index} has {} values but only {} columns are declared",
                    literal.len(),
                    types.len()
                )));
            }
            let mut row = ZiDataRow::with_capacity(types.len());
            for (pos, defn) in types.iter().enumerate() {
                let value = match literal.get(pos) {
                    Some(v) => ZiValue::cast_json(defn.data_type, v).map_err(|e| {
                        ZiError::validation(format!(
                            "static row #{index} column '{}': {e}",
                            defn.name
                        ))
                    })?,
                    None => ZiValue::Null,
                };
                row.put(defn.name.clone(), value);
            }
            rows.push_back(row);
        }
        Ok(Self {
            types: types.into_ref(),
            rows,
        })
    }
}

#[async_trait]
impl ZiSource for ZiStaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn initialize(&mut self, _ctx: &ZiPipelineContext) -> Result<ZiTypesRef> {
        Ok(self.types.clone())
    }

    async fn next(&mut self) -> Result<Option<ZiDataRow>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) {
        self.rows.clear();
    }
}

/// Config: `{"types": [{"name": "id", "type": "Integer"}], "rows": [[1], [2]]}`.
pub fn static_source_factory(config: &Value) -> Result<Box<dyn ZiSource>> {
    let columns = config
        .get("types")
        .and_then(Value::as_array)
        .ok_or_else(|| ZiError::validation("static source requires array 'types'"))?
        .iter()
        .map(|column| {
            let name = column
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ZiError::validation("static source column requires 'name'"))?;
            let data_type = column
                .get("type")
                .and_then(Value::as_str)
                .map(ZiDataType::parse)
                .transpose()?
                .unwrap_or(ZiDataType::String);
            Ok(ZiColumnDefn::new(name, data_type))
        })
        .collect::<Result<Vec<_>>>()?;

    let rows = match config.get("rows") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(rows)) => rows
            .iter()
            .map(|row| {
                row.as_array()
                    .cloned()
                    .ok_or_else(|| ZiError::validation("static source rows must be arrays"))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(ZiError::validation("static source 'rows' must be an array")),
    };

    Ok(Box::new(ZiStaticSource::new(columns, &rows)?))
}
