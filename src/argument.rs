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

//! # Ziq Argument Module
//!
//! Named request inputs declared by a pipeline definition. Raw query-string
//! values are turned into an immutable [`ZiArgumentInstance`] once, before a
//! pipeline is built, so every stage sees the same typed values.
//!
//! ## Arity
//!
//! | optional | multi_valued | accepted value count |
//! |----------|--------------|----------------------|
//! | no       | no           | exactly one          |
//! | yes      | no           | zero or one          |
//! | any      | yes          | zero or more         |
//!
//! A declared `default_value` stands in when no value is supplied.

use std::collections::HashMap;
use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ZiError};
use crate::record::ZiValue;
use crate::types::ZiDataType;

/// Types an argument may be declared with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZiArgumentType {
    Boolean,
    Date,
    DateTime,
    Double,
    Integer,
    Long,
    #[default]
    String,
    Time,
}

impl ZiArgumentType {
    pub fn data_type(&self) -> ZiDataType {
        match self {
            ZiArgumentType::Boolean => ZiDataType::Boolean,
            ZiArgumentType::Date => ZiDataType::Date,
            ZiArgumentType::DateTime => ZiDataType::DateTime,
            ZiArgumentType::Double => ZiDataType::Double,
            ZiArgumentType::Integer => ZiDataType::Integer,
            ZiArgumentType::Long => ZiDataType::Long,
            ZiArgumentType::String => ZiDataType::String,
            ZiArgumentType::Time => ZiDataType::Time,
        }
    }
}

/// Declared schema of one argument.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZiArgumentDefn {
    pub name: String,
    #[serde(default, rename = "type")]
    pub arg_type: ZiArgumentType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub multi_valued: bool,
    /// Ignored arguments are accepted on the request but never prepared.
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub minimum_value: Option<String>,
    #[serde(default)]
    pub maximum_value: Option<String>,
    #[serde(default)]
    pub permitted_values_regex: Option<String>,
}

impl ZiArgumentDefn {
    pub fn new(name: impl Into<String>, arg_type: ZiArgumentType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            ..Default::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn minimum_value(mut self, value: impl Into<String>) -> Self {
        self.minimum_value = Some(value.into());
        self
    }

    pub fn maximum_value(mut self, value: impl Into<String>) -> Self {
        self.maximum_value = Some(value.into());
        self
    }

    pub fn permitted_values_regex(mut self, pattern: impl Into<String>) -> Self {
        self.permitted_values_regex = Some(pattern.into());
        self
    }
}

/// A validated, typed argument value set.
#[derive(Clone, Debug, PartialEq)]
pub struct ZiArgumentInstance {
    defn: ZiArgumentDefn,
    values: Vec<ZiValue>,
}

impl ZiArgumentInstance {
    /// Validates raw values against the declaration and parses them.
    pub fn new(defn: ZiArgumentDefn, raw: &[String]) -> Result<Self> {
        let name = defn.name.clone();
        let mut supplied: Vec<String> = raw.to_vec();
        if supplied.is_empty() {
            if let Some(default) = &defn.default_value {
                supplied.push(default.clone());
            }
        }

        if !defn.multi_valued {
            if supplied.len() > 1 {
                return Err(ZiError::argument(format!(
                    "argument '{name}' accepts a single value but {} were supplied",
                    supplied.len()
                )));
            }
            if supplied.is_empty() && !defn.optional {
                return Err(ZiError::argument(format!(
                    "argument '{name}' is required but no value was supplied"
                )));
            }
        }

        let permitted = match &defn.permitted_values_regex {
            Some(pattern) => Some(Regex::new(&format!("^(?:{pattern})$"))?),
            None => None,
        };

        let data_type = defn.arg_type.data_type();
        let minimum = bound(&name, data_type, defn.minimum_value.as_deref())?;
        let maximum = bound(&name, data_type, defn.maximum_value.as_deref())?;

        let mut values = Vec::with_capacity(supplied.len());
        for text in &supplied {
            if let Some(re) = &permitted {
                if !re.is_match(text) {
                    return Err(ZiError::argument(format!(
                        "argument '{name}' value '{text}' does not match the permitted values"
                    )));
                }
            }
            let value = ZiValue::parse(data_type, text)
                .map_err(|e| ZiError::argument(format!("argument '{name}': {e}")))?;
            if let Some(min) = &minimum {
                if value.compare(min) == Ordering::Less {
                    return Err(ZiError::argument(format!(
                        "argument '{name}' value '{text}' is below the minimum {min}"
                    )));
                }
            }
            if let Some(max) = &maximum {
                if value.compare(max) == Ordering::Greater {
                    return Err(ZiError::argument(format!(
                        "argument '{name}' value '{text}' is above the maximum {max}"
                    )));
                }
            }
            values.push(value);
        }

        Ok(Self { defn, values })
    }

    pub fn name(&self) -> &str {
        &self.defn.name
    }

    pub fn defn(&self) -> &ZiArgumentDefn {
        &self.defn
    }

    pub fn values(&self) -> &[ZiValue] {
        &self.values
    }

    /// First value, the only one for single-valued arguments.
    pub fn value(&self) -> Option<&ZiValue> {
        self.values.first()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn bound(name: &str, data_type: ZiDataType, text: Option<&str>) -> Result<Option<ZiValue>> {
    text.map(|t| {
        ZiValue::parse(data_type, t)
            .map_err(|e| ZiError::validation(format!("argument '{name}' has an invalid bound: {e}")))
    })
    .transpose()
}

/// Prepares every non-ignored declared argument from raw request values.
///
/// Request parameters without a declaration are not carried forward.
pub fn prepare_arguments(
    defns: &[ZiArgumentDefn],
    raw: &HashMap<String, Vec<String>>,
) -> Result<HashMap<String, ZiArgumentInstance>> {
    let mut prepared = HashMap::with_capacity(defns.len());
    for defn in defns.iter().filter(|d| !d.ignored) {
        let supplied = raw.get(&defn.name).map(Vec::as_slice).unwrap_or(&[]);
        let instance = ZiArgumentInstance::new(defn.clone(), supplied)?;
        prepared.insert(defn.name.clone(), instance);
    }
    log::debug!(
        "argument.prepare: arguments prepared - declared={}, prepared={}",
        defns.len(),
        prepared.len()
    );
    Ok(prepared)
}
