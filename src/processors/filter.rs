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

//! Row filters comparing one column against a literal.
//!
//! Config: `{"field": "age", "op": "ge", "value": 18}`. The literal is
//! converted to the column's declared type when the processor initialises,
//! so a literal that cannot be compared is reported before any row flows.
//! Comparisons involving a null column value never match, apart from
//! `is_null`.

use std::cmp::Ordering;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::errors::{Result, ZiError};
use crate::record::{ZiDataRow, ZiValue};
use crate::stage::{config_str, ZiProcessor, ZiRowPull};
use crate::types::{ZiDataType, ZiTypesRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZiFilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    NotNull,
    Regex,
}

impl ZiFilterOp {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "eq" => Ok(ZiFilterOp::Eq),
            "ne" => Ok(ZiFilterOp::Ne),
            "lt" => Ok(ZiFilterOp::Lt),
            "le" => Ok(ZiFilterOp::Le),
            "gt" => Ok(ZiFilterOp::Gt),
            "ge" => Ok(ZiFilterOp::Ge),
            "is_null" => Ok(ZiFilterOp::IsNull),
            "not_null" => Ok(ZiFilterOp::NotNull),
            "regex" => Ok(ZiFilterOp::Regex),
            other => Err(ZiError::validation(format!("unknown filter op '{other}'"))),
        }
    }

    fn needs_literal(&self) -> bool {
        !matches!(self, ZiFilterOp::IsNull | ZiFilterOp::NotNull | ZiFilterOp::Regex)
    }
}

#[derive(Debug)]
pub struct ZiFilter {
    field: String,
    op: ZiFilterOp,
    literal: Value,
    typed: ZiValue,
    pattern: Option<Regex>,
}

impl ZiFilter {
    pub fn new(field: impl Into<String>, op: ZiFilterOp, literal: Value) -> Result<Self> {
        let pattern = match op {
            ZiFilterOp::Regex => {
                let text = literal
                    .as_str()
                    .ok_or_else(|| ZiError::validation("regex filter requires a string 'value'"))?;
                Some(Regex::new(text)?)
            }
            _ => None,
        };
        if op.needs_literal() && literal.is_null() {
            return Err(ZiError::validation(format!(
                "filter op {op:?} requires a non-null 'value'"
            )));
        }
        Ok(Self {
            field: field.into(),
            op,
            literal,
            typed: ZiValue::Null,
            pattern,
        })
    }

    fn matches(&self, row: &ZiDataRow) -> bool {
        let value = row.get(&self.field).unwrap_or(&ZiValue::Null);
        match self.op {
            ZiFilterOp::IsNull => value.is_null(),
            ZiFilterOp::NotNull => !value.is_null(),
            _ if value.is_null() => false,
            ZiFilterOp::Regex => self
                .pattern
                .as_ref()
                .map_or(false, |re| re.is_match(&value.to_string())),
            op => {
                let ord = value.compare(&self.typed);
                match op {
                    ZiFilterOp::Eq => ord == Ordering::Equal,
                    ZiFilterOp::Ne => ord != Ordering::Equal,
                    ZiFilterOp::Lt => ord == Ordering::Less,
                    ZiFilterOp::Le => ord != Ordering::Greater,
                    ZiFilterOp::Gt => ord == Ordering::Greater,
                    ZiFilterOp::Ge => ord != Ordering::Less,
                    _ => false,
                }
            }
        }
    }
}

#[async_trait]
impl ZiProcessor for ZiFilter {
    fn name(&self) -> &str {
        "filter"
    }

    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
        let data_type = input.require("filter", &self.field)?;
        if self.op.needs_literal() {
            self.typed = match data_type {
                ZiDataType::Null => ZiValue::from_json(&self.literal)?,
                other => ZiValue::cast_json(other, &self.literal).map_err(|e| {
                    ZiError::schema(format!("filter on '{}': {e}", self.field))
                })?,
            };
        }
        Ok(input.clone())
    }

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
        while let Some(row) = upstream.pull().await? {
            if self.matches(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

pub fn filter_factory(config: &Value) -> Result<Box<dyn ZiProcessor>> {
    let field = config_str(config, "filter", "field")?;
    let op = ZiFilterOp::parse(config_str(config, "filter", "op")?)?;
    let literal = config.get("value").cloned().unwrap_or(Value::Null);
    Ok(Box::new(ZiFilter::new(field, op, literal)?))
}
