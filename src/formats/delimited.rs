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

//! # Delimited Format
//!
//! CSV-style text output built on the `csv` crate. Each row is encoded into
//! its own buffer so it can be handed to the sink as soon as it is ready; the
//! header row, and the optional byte order mark, travel with the first row.
//!
//! Defaults: `,` delimiter, `"` quote, CRLF line endings, header on, no BOM.

use async_trait::async_trait;
use bytes::Bytes;
use csv::{Terminator, WriterBuilder};
use serde_json::Value;

use crate::errors::{Result, ZiError};
use crate::record::{ZiDataRow, ZiValue};
use crate::stage::ZiFormat;
use crate::stream::ZiWriteStream;
use crate::types::ZiTypesRef;

const BOM: &[u8] = "\u{FEFF}".as_bytes();

#[derive(Clone, Debug)]
pub struct ZiDelimitedConfig {
    pub name: String,
    pub extension: String,
    pub media_type: String,
    pub delimiter: u8,
    pub quote: u8,
    pub terminator: Terminator,
    pub header_row: bool,
    pub bom: bool,
}

impl Default for ZiDelimitedConfig {
    fn default() -> Self {
        Self {
            name: "csv".to_string(),
            extension: "csv".to_string(),
            media_type: "text/csv".to_string(),
            delimiter: b',',
            quote: b'"',
            terminator: Terminator::CRLF,
            header_row: true,
            bom: false,
        }
    }
}

pub struct ZiDelimitedFormat {
    config: ZiDelimitedConfig,
    columns: Vec<String>,
    started: bool,
}

impl ZiDelimitedFormat {
    pub fn new(config: ZiDelimitedConfig) -> Self {
        Self {
            config,
            columns: Vec::new(),
            started: false,
        }
    }

    fn encode<I, S>(&self, out: &mut Vec<u8>, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut writer = WriterBuilder::new()
            .delimiter(self.config.delimiter)
            .quote(self.config.quote)
            .terminator(self.config.terminator)
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(fields)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| ZiError::format(&self.config.name, e.to_string()))?;
        out.extend_from_slice(&bytes);
        Ok(())
    }

    fn preamble(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.config.bom {
            out.extend_from_slice(BOM);
        }
        if self.config.header_row {
            self.encode(out, &self.columns)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ZiFormat for ZiDelimitedFormat {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn extension(&self) -> &str {
        &self.config.extension
    }

    fn media_type(&self) -> &str {
        &self.config.media_type
    }

    fn initialize(&mut self, types: &ZiTypesRef) -> Result<()> {
        self.columns = types.names().into_iter().map(str::to_string).collect();
        self.started = false;
        Ok(())
    }

    async fn write_row(&mut self, row: &ZiDataRow, sink: &mut dyn ZiWriteStream) -> Result<()> {
        let mut out = Vec::with_capacity(64 + row.bytes_size());
        if !self.started {
            self.preamble(&mut out)?;
            self.started = true;
        }
        let fields: Vec<String> = self
            .columns
            .iter()
            .map(|c| row.get(c).map(ZiValue::to_string).unwrap_or_default())
            .collect();
        self.encode(&mut out, &fields)?;
        sink.write(Bytes::from(out)).await
    }

    async fn finish(&mut self, sink: &mut dyn ZiWriteStream) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let mut out = Vec::new();
        self.preamble(&mut out)?;
        self.started = true;
        if out.is_empty() {
            return Ok(());
        }
        sink.write(Bytes::from(out)).await
    }
}

fn single_byte(config: &Value, field: &str, default: u8) -> Result<u8> {
    match config.get(field).and_then(Value::as_str) {
        None => Ok(default),
        Some(s) if s.len() == 1 => Ok(s.as_bytes()[0]),
        Some(s) => Err(ZiError::validation(format!(
            "delimited '{field}' must be a single byte, got '{s}'"
        ))),
    }
}

/// Config keys: `name`, `extension`, `media_type`, `delimiter`, `quote`,
/// `newline` (`"\r\n"` or one byte), `header_row`, `bom`.
pub fn delimited_format_factory(config: &Value) -> Result<Box<dyn ZiFormat>> {
    let base = ZiDelimitedConfig::default();
    let text = |field: &str, default: &str| {
        config
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let terminator = match config.get("newline").and_then(Value::as_str) {
        None | Some("\r\n") => Terminator::CRLF,
        Some(s) if s.len() == 1 => Terminator::Any(s.as_bytes()[0]),
        Some(s) => {
            return Err(ZiError::validation(format!(
                "delimited 'newline' must be \"\\r\\n\" or a single byte, got {s:?}"
            )))
        }
    };
    let config = ZiDelimitedConfig {
        name: text("name", &base.name),
        extension: text("extension", &base.extension),
        media_type: text("media_type", &base.media_type),
        delimiter: single_byte(config, "delimiter", base.delimiter)?,
        quote: single_byte(config, "quote", base.quote)?,
        terminator,
        header_row: config
            .get("header_row")
            .and_then(Value::as_bool)
            .unwrap_or(base.header_row),
        bom: config.get("bom").and_then(Value::as_bool).unwrap_or(base.bom),
    };
    Ok(Box::new(ZiDelimitedFormat::new(config)))
}
