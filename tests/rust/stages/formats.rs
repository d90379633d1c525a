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

//! # Ziq Stage Tests - Formats
//!
//! ```bash
//! cargo test --test formats
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use serde_json::json;
use ziq::formats::delimited::{delimited_format_factory, ZiDelimitedConfig, ZiDelimitedFormat};
use ziq::formats::json::{json_format_factory, ZiJsonFormat};
use ziq::{
    select_format, Result, ZiColumnDefn, ZiDataRow, ZiDataType, ZiError, ZiFormat, ZiFormatRequest,
    ZiTypes, ZiWriteStream,
};

/// Collects everything written into memory.
#[derive(Default)]
struct VecSink {
    body: Vec<u8>,
    writes: usize,
}

#[async_trait]
impl ZiWriteStream for VecSink {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.body.extend_from_slice(&data);
        self.writes += 1;
        Ok(())
    }

    fn set_write_queue_max_size(&mut self, _size: usize) {}

    fn write_queue_full(&self) -> bool {
        false
    }

    async fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        Ok(())
    }

    async fn abort(&mut self, _reason: &ZiError) {}
}

fn rows() -> (ZiTypes, Vec<ZiDataRow>) {
    let types = ZiTypes::from_defns(vec![
        ZiColumnDefn::new("id", ZiDataType::Integer),
        ZiColumnDefn::new("label", ZiDataType::String),
        ZiColumnDefn::new("day", ZiDataType::Date),
    ]);
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let mut first = ZiDataRow::new();
    first.put("id", 1i32).put("label", "plain").put("day", day);
    let mut second = ZiDataRow::new();
    second
        .put("id", 2i32)
        .put("label", "needs, \"quotes\"")
        .put("day", None::<NaiveDate>);
    (types, vec![first, second])
}

async fn render(format: &mut dyn ZiFormat) -> VecSink {
    let (types, rows) = rows();
    format.initialize(&types.into_ref()).unwrap();
    let mut sink = VecSink::default();
    for row in &rows {
        format.write_row(row, &mut sink).await.unwrap();
    }
    format.finish(&mut sink).await.unwrap();
    sink
}

/// Tests the JSON array form, written one buffer per row.
#[tokio::test]
async fn test_json_array() {
    let mut format = ZiJsonFormat::new();
    let sink = render(&mut format).await;
    let text = String::from_utf8(sink.body).unwrap();
    assert_eq!(
        text,
        r#"[{"id":1,"label":"plain","day":"2024-03-01"},{"id":2,"label":"needs, \"quotes\"","day":null}]"#
    );
    assert_eq!(sink.writes, 3);
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed[1]["id"], json!(2));
}

/// Tests that an empty result is still a valid JSON document.
#[tokio::test]
async fn test_json_empty() {
    let mut format = ZiJsonFormat::new();
    format.initialize(&ZiTypes::new().into_ref()).unwrap();
    let mut sink = VecSink::default();
    format.finish(&mut sink).await.unwrap();
    assert_eq!(sink.body, b"[]");
}

/// Tests the default delimited output: header row, CRLF, quoting.
#[tokio::test]
async fn test_delimited_defaults() {
    let mut format = ZiDelimitedFormat::new(ZiDelimitedConfig::default());
    let sink = render(&mut format).await;
    let text = String::from_utf8(sink.body).unwrap();
    assert_eq!(
        text,
        "id,label,day\r\n1,plain,2024-03-01\r\n2,\"needs, \"\"quotes\"\"\",\r\n"
    );
}

/// Tests delimiter, newline, BOM and header options from configuration.
#[tokio::test]
async fn test_delimited_configured() {
    let mut format = delimited_format_factory(&json!({
        "name": "tsv",
        "extension": "tsv",
        "media_type": "text/tab-separated-values",
        "delimiter": "\t",
        "newline": "\n",
        "header_row": false,
        "bom": true
    }))
    .unwrap();
    assert_eq!(format.name(), "tsv");
    let sink = render(format.as_mut()).await;
    let text = String::from_utf8(sink.body).unwrap();
    assert_eq!(
        text,
        "\u{FEFF}1\tplain\t2024-03-01\n2\t\"needs, \"\"quotes\"\"\"\t\n"
    );
}

/// Tests that a header is still written when there are no rows.
#[tokio::test]
async fn test_delimited_header_without_rows() {
    let (types, _) = rows();
    let mut format = ZiDelimitedFormat::new(ZiDelimitedConfig::default());
    format.initialize(&types.into_ref()).unwrap();
    let mut sink = VecSink::default();
    format.finish(&mut sink).await.unwrap();
    assert_eq!(sink.body, b"id,label,day\r\n");
}

fn declared() -> Vec<Box<dyn ZiFormat>> {
    vec![
        json_format_factory(&json!({})).unwrap(),
        delimited_format_factory(&json!({})).unwrap(),
        delimited_format_factory(&json!({
            "name": "tsv", "extension": "tsv", "media_type": "text/tab-separated-values", "delimiter": "\t"
        }))
        .unwrap(),
    ]
}

/// Tests format selection by name, extension, Accept and default.
#[test]
fn test_select_format() {
    let formats = declared();
    assert_eq!(select_format(&formats, &ZiFormatRequest::new()).unwrap(), 0);
    assert_eq!(select_format(&formats, &ZiFormatRequest::new().name("tsv")).unwrap(), 2);
    assert_eq!(select_format(&formats, &ZiFormatRequest::new().extension(".csv")).unwrap(), 1);
    assert_eq!(
        select_format(
            &formats,
            &ZiFormatRequest::new().accept("text/html;q=0.9, text/csv, application/json;q=0.5")
        )
        .unwrap(),
        1
    );
    assert_eq!(select_format(&formats, &ZiFormatRequest::new().accept("text/*")).unwrap(), 1);
    assert_eq!(select_format(&formats, &ZiFormatRequest::new().accept("*/*")).unwrap(), 0);
}

/// Tests that unsupported requests are validation errors.
#[test]
fn test_select_format_unsupported() {
    let formats = declared();
    for request in [
        ZiFormatRequest::new().name("xlsx"),
        ZiFormatRequest::new().extension("xlsx"),
        ZiFormatRequest::new().accept("image/png"),
    ] {
        let err = select_format(&formats, &request).unwrap_err();
        assert!(matches!(err, ZiError::Validation { .. }));
    }
}
