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

//! Column projection: `map` relabels columns, `without` drops them.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{Result, ZiError};
use crate::record::ZiDataRow;
use crate::stage::{config_str_list, ZiProcessor, ZiRowPull};
use crate::types::{ZiColumnDefn, ZiTypes, ZiTypesRef};

/// Renames columns; a relabel to the empty string drops the column.
#[derive(Debug)]
pub struct ZiFieldMap {
    relabels: HashMap<String, String>,
}

impl ZiFieldMap {
    pub fn new(relabels: Vec<(String, String)>) -> Self {
        Self {
            relabels: relabels.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ZiProcessor for ZiFieldMap {
    fn name(&self) -> &str {
        "map"
    }

    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
        for from in self.relabels.keys() {
            input.require("map", from)?;
        }

        let mut seen = HashSet::new();
        let mut defns = Vec::with_capacity(input.len());
        for defn in input.iter() {
            let name = self
                .relabels
                .get(&defn.name)
                .map(String::as_str)
                .unwrap_or(defn.name.as_str());
            if name.is_empty() {
                continue;
            }
            if !seen.insert(name.to_string()) {
                return Err(ZiError::schema(format!(
                    "map produces column '{name}' more than once"
                )));
            }
            defns.push(ZiColumnDefn {
                name: name.to_string(),
                ..defn.clone()
            });
        }
        Ok(ZiTypes::from_defns(defns).into_ref())
    }

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
        let Some(row) = upstream.pull().await? else {
            return Ok(None);
        };
        let mut out = ZiDataRow::with_capacity(row.len());
        for (name, value) in row {
            match self.relabels.get(&name) {
                Some(to) if to.is_empty() => {}
                Some(to) => {
                    out.put(to.clone(), value);
                }
                None => {
                    out.put(name, value);
                }
            }
        }
        Ok(Some(out))
    }
}

/// Removes the listed columns.
#[derive(Debug)]
pub struct ZiFieldWithout {
    fields: Vec<String>,
}

impl ZiFieldWithout {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

#[async_trait]
impl ZiProcessor for ZiFieldWithout {
    fn name(&self) -> &str {
        "without"
    }

    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
        for field in &self.fields {
            input.require("without", field)?;
        }
        let defns = input
            .iter()
            .filter(|d| !self.fields.contains(&d.name))
            .cloned();
        Ok(ZiTypes::from_defns(defns).into_ref())
    }

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
        let Some(mut row) = upstream.pull().await? else {
            return Ok(None);
        };
        for field in &self.fields {
            row.remove(field);
        }
        Ok(Some(row))
    }
}

/// Config: `{"relabels": {"old": "new", "dropped": ""}}`, or an array of
/// `{"source": "old", "name": "new"}` objects when order matters.
pub fn map_factory(config: &Value) -> Result<Box<dyn ZiProcessor>> {
    let relabels = match config.get("relabels") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(from, to)| {
                to.as_str()
                    .map(|to| (from.clone(), to.to_string()))
                    .ok_or_else(|| ZiError::validation("map relabels must be strings"))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let from = item.get("source").and_then(Value::as_str);
                let to = item.get("name").and_then(Value::as_str);
                match (from, to) {
                    (Some(from), Some(to)) => Ok((from.to_string(), to.to_string())),
                    _ => Err(ZiError::validation(
                        "map relabel entries require 'source' and 'name'",
                    )),
                }
            })
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(ZiError::validation("map requires 'relabels'")),
    };
    Ok(Box::new(ZiFieldMap::new(relabels)))
}

/// Config: `{"fields": ["a", "b"]}`.
pub fn without_factory(config: &Value) -> Result<Box<dyn ZiProcessor>> {
    let fields = config_str_list(config, "without", "fields")?;
    Ok(Box::new(ZiFieldWithout::new(fields)))
}
