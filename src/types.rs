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

//! # Ziq Types Module
//!
//! Column schema shared by every stage of a pipeline. A source declares a
//! [`ZiTypes`] when it initialises; each processor derives its own output
//! schema from its input once, at build time, and the format receives the
//! final schema before the first row.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ZiError};

/// Shared, immutable handle to a schema.
pub type ZiTypesRef = Arc<ZiTypes>;

/// The scalar kinds a row value may take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZiDataType {
    Null,
    Integer,
    Long,
    Float,
    Double,
    String,
    Boolean,
    Date,
    DateTime,
    Time,
}

impl ZiDataType {
    /// Approximate in-memory width of one value, strings excluded.
    pub fn bytes(&self) -> usize {
        match self {
            ZiDataType::Null => 0,
            ZiDataType::Integer | ZiDataType::Float => 4,
            ZiDataType::Long | ZiDataType::Double => 8,
            ZiDataType::Boolean => 1,
            ZiDataType::Date => 4,
            ZiDataType::DateTime => 12,
            ZiDataType::Time => 8,
            ZiDataType::String => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZiDataType::Null => "Null",
            ZiDataType::Integer => "Integer",
            ZiDataType::Long => "Long",
            ZiDataType::Float => "Float",
            ZiDataType::Double => "Double",
            ZiDataType::String => "String",
            ZiDataType::Boolean => "Boolean",
            ZiDataType::Date => "Date",
            ZiDataType::DateTime => "DateTime",
            ZiDataType::Time => "Time",
        }
    }

    /// Parses a type name as written in pipeline definitions.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "Null" => Ok(ZiDataType::Null),
            "Integer" => Ok(ZiDataType::Integer),
            "Long" => Ok(ZiDataType::Long),
            "Float" => Ok(ZiDataType::Float),
            "Double" => Ok(ZiDataType::Double),
            "String" => Ok(ZiDataType::String),
            "Boolean" => Ok(ZiDataType::Boolean),
            "Date" => Ok(ZiDataType::Date),
            "DateTime" => Ok(ZiDataType::DateTime),
            "Time" => Ok(ZiDataType::Time),
            other => Err(ZiError::validation(format!("unknown data type '{other}'"))),
        }
    }
}

impl fmt::Display for ZiDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a single column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZiColumnDefn {
    pub name: String,
    pub data_type: ZiDataType,
    #[serde(default)]
    pub array: bool,
}

impl ZiColumnDefn {
    pub fn new(name: impl Into<String>, data_type: ZiDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            array: false,
        }
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }
}

/// Ordered column schema with a name index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZiTypes {
    defns: Vec<ZiColumnDefn>,
    indices: HashMap<String, usize>,
}

impl ZiTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from column definitions; later duplicates are ignored.
    pub fn from_defns(defns: impl IntoIterator<Item = ZiColumnDefn>) -> Self {
        let mut types = Self::new();
        for defn in defns {
            if !types.indices.contains_key(&defn.name) {
                types.indices.insert(defn.name.clone(), types.defns.len());
                types.defns.push(defn);
            }
        }
        types
    }

    pub fn into_ref(self) -> ZiTypesRef {
        Arc::new(self)
    }

    /// Adds a column, or upgrades a `Null` column once a concrete type is known.
    pub fn put_if_absent(&mut self, name: &str, data_type: ZiDataType) -> &mut Self {
        match self.indices.get(name) {
            Some(&idx) => {
                let current = &mut self.defns[idx];
                if current.data_type == ZiDataType::Null && data_type != ZiDataType::Null {
                    current.data_type = data_type;
                }
            }
            None => {
                self.indices.insert(name.to_string(), self.defns.len());
                self.defns.push(ZiColumnDefn::new(name, data_type));
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<ZiDataType> {
        self.indices.get(name).map(|&idx| self.defns[idx].data_type)
    }

    pub fn column(&self, name: &str) -> Option<&ZiColumnDefn> {
        self.indices.get(name).map(|&idx| &self.defns[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Fails with a schema error naming `stage` when `name` is not a column.
    pub fn require(&self, stage: &str, name: &str) -> Result<ZiDataType> {
        self.get(name).ok_or_else(|| {
            ZiError::schema(format!(
                "{stage} refers to column '{name}' which is not produced upstream (columns: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn columns(&self) -> &[ZiColumnDefn] {
        &self.defns
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZiColumnDefn> {
        self.defns.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.defns.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.defns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defns.is_empty()
    }
}

impl fmt::Display for ZiTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, defn) in self.defns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", defn.name, defn.data_type)?;
        }
        write!(f, "}}")
    }
}
