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
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::errors::{Result, ZiError};
use crate::record::ZiDataRow;
use crate::stage::ZiFormat;
use crate::stream::ZiWriteStream;
use crate::types::ZiTypesRef;

/// A single JSON array of row objects, written one row per buffer.
#[derive(Debug)]
pub struct ZiJsonFormat {
    name: String,
    extension: String,
    media_type: String,
    started: bool,
}

impl ZiJsonFormat {
    pub fn new() -> Self {
        Self {
            name: "json".to_string(),
            extension: "json".to_string(),
            media_type: "application/json".to_string(),
            started: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    fn encode(&self, row: &ZiDataRow, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(b'{');
        for (i, (key, value)) in row.iter().enumerate() {
            if i > 0 {
                buf.put_u8(b',');
            }
            let key = serde_json::to_vec(key)?;
            let value = serde_json::to_vec(&value.to_json())?;
            buf.put_slice(&key);
            buf.put_u8(b':');
            buf.put_slice(&value);
        }
        buf.put_u8(b'}');
        Ok(())
    }
}

impl Default for ZiJsonFormat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ZiFormat for ZiJsonFormat {
    fn name(&self) -> &str {
        &self.name
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn media_type(&self) -> &str {
        &self.media_type
    }

    fn initialize(&mut self, _types: &ZiTypesRef) -> Result<()> {
        self.started = false;
        Ok(())
    }

    async fn write_row(&mut self, row: &ZiDataRow, sink: &mut dyn ZiWriteStream) -> Result<()> {
        let mut buf = BytesMut::with_capacity(64 + row.bytes_size());
        buf.put_u8(if self.started { b',' } else { b'[' });
        self.encode(row, &mut buf)
            .map_err(|e| ZiError::format(&self.name, e.to_string()))?;
        self.started = true;
        sink.write(buf.freeze()).await
    }

    async fn finish(&mut self, sink: &mut dyn ZiWriteStream) -> Result<()> {
        let tail: &'static [u8] = if self.started { b"]" } else { b"[]" };
        sink.write(Bytes::from_static(tail)).await
    }
}

/// Config: `{"name": "json", "extension": "json", "media_type": "application/json"}`, all optional.
pub fn json_format_factory(config: &Value) -> Result<Box<dyn ZiFormat>> {
    let mut format = ZiJsonFormat::new();
    if let Some(name) = config.get("name").and_then(Value::as_str) {
        format = format.with_name(name);
    }
    if let Some(extension) = config.get("extension").and_then(Value::as_str) {
        format = format.with_extension(extension);
    }
    if let Some(media_type) = config.get("media_type").and_then(Value::as_str) {
        format = format.with_media_type(media_type);
    }
    Ok(Box::new(format))
}
