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

//! # Ziq Record Module
//!
//! This module provides [`ZiDataRow`], the unit of data that flows through a
//! query pipeline, and [`ZiValue`], the typed scalar it carries per column.
//!
//! ## Design Principles
//!
//! - **Ordered**: columns keep the order in which they were first written,
//!   which is the order formats emit them
//! - **Strict**: every value is one of the scalar kinds of
//!   [`ZiDataType`](crate::types::ZiDataType); loosely typed input that does
//!   not map onto one of them is rejected with an argument error rather than
//!   stringified
//! - **Owned**: a row is created by a source, mutated in place by processors
//!   and consumed by a format; rows are never shared between pipelines
//!
//! ## Usage Example
//!
//! ```rust
//! use ziq::record::{ZiDataRow, ZiValue};
//! use serde_json::json;
//!
//! let mut row = ZiDataRow::new();
//! row.put("id", 7).put("name", "seven");
//! row.convert_put("score", &json!(0.5)).unwrap();
//! assert!(row.convert_put("tags", &json!(["a"])).is_err());
//! assert_eq!(row.get("id"), Some(&ZiValue::Integer(7)));
//! ```

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::errors::{Result, ZiError};
use crate::types::ZiDataType;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

/// A typed scalar held in a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ZiValue {
    Null,
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl ZiValue {
    pub fn data_type(&self) -> ZiDataType {
        match self {
            ZiValue::Null => ZiDataType::Null,
            ZiValue::Integer(_) => ZiDataType::Integer,
            ZiValue::Long(_) => ZiDataType::Long,
            ZiValue::Float(_) => ZiDataType::Float,
            ZiValue::Double(_) => ZiDataType::Double,
            ZiValue::String(_) => ZiDataType::String,
            ZiValue::Boolean(_) => ZiDataType::Boolean,
            ZiValue::Date(_) => ZiDataType::Date,
            ZiValue::DateTime(_) => ZiDataType::DateTime,
            ZiValue::Time(_) => ZiDataType::Time,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ZiValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ZiValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used for cross-width comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ZiValue::Integer(v) => Some(*v as f64),
            ZiValue::Long(v) => Some(*v as f64),
            ZiValue::Float(v) => Some(*v as f64),
            ZiValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Approximate in-memory size, strings counted by length.
    pub fn bytes_size(&self) -> usize {
        match self {
            ZiValue::String(s) => s.len(),
            other => other.data_type().bytes(),
        }
    }

    /// Converts a loosely typed JSON value; arrays and objects are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(ZiValue::Null),
            Value::Bool(b) => Ok(ZiValue::Boolean(*b)),
            Value::String(s) => Ok(ZiValue::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(i32::try_from(i)
                        .map(ZiValue::Integer)
                        .unwrap_or(ZiValue::Long(i)))
                } else if let Some(f) = n.as_f64() {
                    Ok(ZiValue::Double(f))
                } else {
                    Err(ZiError::argument(format!("number {n} is out of range")))
                }
            }
            Value::Array(_) | Value::Object(_) => Err(ZiError::argument(format!(
                "value {value} cannot be converted to a scalar row value"
            ))),
        }
    }

    /// Parses text as the given type, as done for request arguments.
    pub fn parse(data_type: ZiDataType, text: &str) -> Result<Self> {
        let fail = |e: &dyn fmt::Display| {
            ZiError::argument(format!("'{text}' cannot be parsed as {data_type}: {e}"))
        };
        match data_type {
            ZiDataType::Null => Ok(ZiValue::Null),
            ZiDataType::String => Ok(ZiValue::String(text.to_string())),
            ZiDataType::Integer => text.trim().parse().map(ZiValue::Integer).map_err(|e| fail(&e)),
            ZiDataType::Long => text.trim().parse().map(ZiValue::Long).map_err(|e| fail(&e)),
            ZiDataType::Float => text.trim().parse().map(ZiValue::Float).map_err(|e| fail(&e)),
            ZiDataType::Double => text.trim().parse().map(ZiValue::Double).map_err(|e| fail(&e)),
            ZiDataType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(ZiValue::Boolean(true)),
                "false" => Ok(ZiValue::Boolean(false)),
                _ => Err(fail(&"expected true or false")),
            },
            ZiDataType::Date => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
                .map(ZiValue::Date)
                .map_err(|e| fail(&e)),
            ZiDataType::DateTime => parse_first(text.trim(), &DATE_TIME_FORMATS, NaiveDateTime::parse_from_str)
                .map(ZiValue::DateTime)
                .map_err(|e| fail(&e)),
            ZiDataType::Time => parse_first(text.trim(), &TIME_FORMATS, NaiveTime::parse_from_str)
                .map(ZiValue::Time)
                .map_err(|e| fail(&e)),
        }
    }

    /// Converts a JSON literal to the declared column type.
    pub fn cast_json(data_type: ZiDataType, value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(ZiValue::Null);
        }
        let mismatch = || ZiError::argument(format!("value {value} cannot be converted to {data_type}"));
        match (data_type, value) {
            (_, Value::String(s)) => ZiValue::parse(data_type, s),
            (ZiDataType::String, Value::Number(n)) => Ok(ZiValue::String(n.to_string())),
            (ZiDataType::String, Value::Bool(b)) => Ok(ZiValue::String(b.to_string())),
            (ZiDataType::Boolean, Value::Bool(b)) => Ok(ZiValue::Boolean(*b)),
            (ZiDataType::Integer, Value::Number(n)) => n
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(ZiValue::Integer)
                .ok_or_else(mismatch),
            (ZiDataType::Long, Value::Number(n)) => n.as_i64().map(ZiValue::Long).ok_or_else(mismatch),
            (ZiDataType::Float, Value::Number(n)) => {
                n.as_f64().map(|f| ZiValue::Float(f as f32)).ok_or_else(mismatch)
            }
            (ZiDataType::Double, Value::Number(n)) => n.as_f64().map(ZiValue::Double).ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    /// JSON rendering used by the JSON format; temporal values are ISO-8601.
    pub fn to_json(&self) -> Value {
        match self {
            ZiValue::Null => Value::Null,
            ZiValue::Integer(v) => Value::from(*v),
            ZiValue::Long(v) => Value::from(*v),
            ZiValue::Float(v) => Number::from_f64(*v as f64).map(Value::Number).unwrap_or(Value::Null),
            ZiValue::Double(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            ZiValue::String(s) => Value::String(s.clone()),
            ZiValue::Boolean(b) => Value::Bool(*b),
            other => Value::String(other.to_string()),
        }
    }

    /// Total order used by sorting: nulls first, numbers compared by value with NaN last,
    /// mismatched kinds ordered by kind.
    pub fn compare(&self, other: &ZiValue) -> Ordering {
        match (self, other) {
            (ZiValue::Null, ZiValue::Null) => Ordering::Equal,
            (ZiValue::Null, _) => Ordering::Less,
            (_, ZiValue::Null) => Ordering::Greater,
            (ZiValue::String(a), ZiValue::String(b)) => a.cmp(b),
            (ZiValue::Boolean(a), ZiValue::Boolean(b)) => a.cmp(b),
            (ZiValue::Date(a), ZiValue::Date(b)) => a.cmp(b),
            (ZiValue::DateTime(a), ZiValue::DateTime(b)) => a.cmp(b),
            (ZiValue::Time(a), ZiValue::Time(b)) => a.cmp(b),
            (ZiValue::Integer(a), ZiValue::Integer(b)) => a.cmp(b),
            (ZiValue::Long(a), ZiValue::Long(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => compare_f64(x, y),
                _ => kind_rank(a).cmp(&kind_rank(b)),
            },
        }
    }
}

/// NaN sorts after every number and equal to itself.
fn compare_f64(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn kind_rank(value: &ZiValue) -> u8 {
    match value {
        ZiValue::Null => 0,
        ZiValue::Boolean(_) => 1,
        ZiValue::Integer(_) | ZiValue::Long(_) | ZiValue::Float(_) | ZiValue::Double(_) => 2,
        ZiValue::Date(_) => 3,
        ZiValue::DateTime(_) => 4,
        ZiValue::Time(_) => 5,
        ZiValue::String(_) => 6,
    }
}

fn parse_first<T>(
    text: &str,
    formats: &[&str],
    parse: fn(&str, &str) -> chrono::ParseResult<T>,
) -> chrono::ParseResult<T> {
    let mut last = None;
    for format in formats {
        match parse(text, format) {
            Ok(v) => return Ok(v),
            Err(e) => last = Some(e),
        }
    }
    match last {
        Some(e) => Err(e),
        None => parse(text, ""),
    }
}

impl fmt::Display for ZiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZiValue::Null => Ok(()),
            ZiValue::Integer(v) => write!(f, "{v}"),
            ZiValue::Long(v) => write!(f, "{v}"),
            ZiValue::Float(v) => write!(f, "{v}"),
            ZiValue::Double(v) => write!(f, "{v}"),
            ZiValue::String(s) => f.write_str(s),
            ZiValue::Boolean(b) => write!(f, "{b}"),
            ZiValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            ZiValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            ZiValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ZiValue {
                fn from(v: $ty) -> Self {
                    ZiValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    i32 => Integer,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    bool => Boolean,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    NaiveTime => Time,
}

impl From<&str> for ZiValue {
    fn from(v: &str) -> Self {
        ZiValue::String(v.to_string())
    }
}

impl<T: Into<ZiValue>> From<Option<T>> for ZiValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ZiValue::Null)
    }
}

/// Ordered mapping of column name to value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZiDataRow {
    columns: Vec<(String, ZiValue)>,
}

impl ZiDataRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Sets a column, keeping its original position when it already exists.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ZiValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((key, value)),
        }
        self
    }

    /// Sets a column from loosely typed input, rejecting non-scalar values.
    pub fn convert_put(&mut self, key: impl Into<String>, value: &Value) -> Result<&mut Self> {
        let key = key.into();
        let converted = ZiValue::from_json(value)
            .map_err(|e| ZiError::argument(format!("column '{key}': {e}")))?;
        Ok(self.put(key, converted))
    }

    pub fn get(&self, key: &str) -> Option<&ZiValue> {
        self.columns.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<ZiValue> {
        let idx = self.columns.iter().position(|(k, _)| k == key)?;
        Some(self.columns.remove(idx).1)
    }

    /// Renames a column in place; returns false when it does not exist.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.columns.iter_mut().find(|(k, _)| k == from) {
            Some(slot) => {
                slot.0 = to.to_string();
                true
            }
            None => false,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.columns.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ZiValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    /// Estimated memory footprint of the values.
    pub fn bytes_size(&self) -> usize {
        self.columns.iter().map(|(_, v)| v.bytes_size()).sum()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (k, v) in &self.columns {
            obj.insert(k.clone(), v.to_json());
        }
        Value::Object(obj)
    }
}

impl IntoIterator for ZiDataRow {
    type Item = (String, ZiValue);
    type IntoIter = std::vec::IntoIter<(String, ZiValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl fmt::Display for ZiDataRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
