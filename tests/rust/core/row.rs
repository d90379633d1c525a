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

//! # Ziq Core Tests - Rows and Types
//!
//! ```bash
//! cargo test --test row
//! ```

use std::cmp::Ordering;

use serde_json::json;
use ziq::{ZiDataRow, ZiDataType, ZiError, ZiTypes, ZiValue};

/// Tests that replacing a column keeps its original position.
#[test]
fn test_put_keeps_column_order() {
    let mut row = ZiDataRow::new();
    row.put("a", 1i32).put("b", "two").put("a", 3i32);
    let keys: Vec<&str> = row.keys().collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(row.get("a"), Some(&ZiValue::Integer(3)));
}

/// Tests conversion of loosely typed values into scalar kinds.
#[test]
fn test_convert_put_maps_scalars() {
    let mut row = ZiDataRow::new();
    row.convert_put("small", &json!(7)).unwrap();
    row.convert_put("big", &json!(5_000_000_000i64)).unwrap();
    row.convert_put("ratio", &json!(0.5)).unwrap();
    row.convert_put("flag", &json!(true)).unwrap();
    row.convert_put("missing", &json!(null)).unwrap();

    assert_eq!(row.get("small"), Some(&ZiValue::Integer(7)));
    assert_eq!(row.get("big"), Some(&ZiValue::Long(5_000_000_000)));
    assert_eq!(row.get("ratio"), Some(&ZiValue::Double(0.5)));
    assert_eq!(row.get("flag"), Some(&ZiValue::Boolean(true)));
    assert!(row.get("missing").unwrap().is_null());
}

/// Tests that non-scalar input is a hard argument error rather than a display fallback.
#[test]
fn test_convert_put_rejects_unrecognised_values() {
    let mut row = ZiDataRow::new();
    let err = row.convert_put("list", &json!([1, 2])).unwrap_err();
    assert!(matches!(err, ZiError::Argument { .. }));
    let err = row.convert_put("object", &json!({"x": 1})).unwrap_err();
    assert!(matches!(err, ZiError::Argument { .. }));
    assert!(row.is_empty());
}

/// Tests the ordering used by sorts: nulls first, numbers across widths.
#[test]
fn test_value_compare() {
    assert_eq!(ZiValue::Null.compare(&ZiValue::Integer(0)), Ordering::Less);
    assert_eq!(ZiValue::Integer(2).compare(&ZiValue::Long(2)), Ordering::Equal);
    assert_eq!(ZiValue::Double(1.5).compare(&ZiValue::Integer(2)), Ordering::Less);
    assert_eq!(
        ZiValue::from("b").compare(&ZiValue::from("a")),
        Ordering::Greater
    );
}

/// Tests typed parsing of argument text, including temporal values.
#[test]
fn test_value_parse() {
    assert_eq!(
        ZiValue::parse(ZiDataType::Integer, " 42 ").unwrap(),
        ZiValue::Integer(42)
    );
    assert!(ZiValue::parse(ZiDataType::Boolean, "yes").is_err());
    let date = ZiValue::parse(ZiDataType::Date, "2024-02-29").unwrap();
    assert_eq!(date.data_type(), ZiDataType::Date);
    assert_eq!(date.to_json(), json!("2024-02-29"));
    assert!(ZiValue::parse(ZiDataType::Date, "2023-02-29").is_err());
}

/// Tests that a column first seen as Null is upgraded once a concrete type arrives.
#[test]
fn test_types_put_if_absent_upgrades_null() {
    let mut types = ZiTypes::new();
    types.put_if_absent("id", ZiDataType::Null);
    types.put_if_absent("name", ZiDataType::String);
    types.put_if_absent("id", ZiDataType::Long);
    types.put_if_absent("id", ZiDataType::String);

    assert_eq!(types.get("id"), Some(ZiDataType::Long));
    assert_eq!(types.names(), vec!["id", "name"]);
    assert!(types.require("sort", "missing").is_err());
}

/// Tests the size estimate used by the sort memory budget.
#[test]
fn test_row_bytes_size() {
    let mut row = ZiDataRow::new();
    row.put("s", "hello").put("n", 1i64);
    assert_eq!(row.bytes_size(), 5 + ZiDataType::Long.bytes());
}
