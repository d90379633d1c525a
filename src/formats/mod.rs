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

//! # Formats Module
//!
//! Serialisers that turn rows into response bytes, and the rule that picks
//! one of a pipeline's declared formats for a request.
//!
//! - **json**: one JSON array of row objects
//! - **delimited**: CSV-style text with configurable separators
//!
//! ## Selection
//!
//! A request may name a format, give a file extension, or send an `Accept`
//! header. They are tried in that order; a request with none of them gets
//! the first declared format. Naming something no declared format offers is
//! a validation error rather than a silent fallback.

pub mod delimited;
pub mod json;

use crate::errors::{Result, ZiError};
use crate::stage::ZiFormat;

/// How a request asked for its output format.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZiFormatRequest {
    pub name: Option<String>,
    pub extension: Option<String>,
    pub accept: Option<String>,
}

impl ZiFormatRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = Some(extension.trim_start_matches('.').to_string());
        self
    }

    pub fn accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }
}

fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Parses an Accept header into media ranges ordered by descending quality.
fn accept_ranges(accept: &str) -> Vec<String> {
    let mut ranges: Vec<(String, f32)> = accept
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let range = pieces.next()?.trim().to_ascii_lowercase();
            if range.is_empty() {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (q > 0.0).then_some((range, q))
        })
        .collect();
    ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranges.into_iter().map(|(r, _)| r).collect()
}

fn media_matches(range: &str, media_type: &str) -> bool {
    if range == "*/*" {
        return true;
    }
    let candidate = essence(media_type);
    match range.strip_suffix("/*") {
        Some(major) => candidate.split('/').next() == Some(major),
        None => candidate == range,
    }
}

/// Picks the index of the format a request should be served in.
pub fn select_format(formats: &[Box<dyn ZiFormat>], request: &ZiFormatRequest) -> Result<usize> {
    if formats.is_empty() {
        return Err(ZiError::validation("pipeline declares no output formats"));
    }

    if let Some(name) = &request.name {
        return formats
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| ZiError::validation(format!("format '{name}' is not supported by this pipeline")));
    }

    if let Some(extension) = &request.extension {
        return formats
            .iter()
            .position(|f| f.extension().eq_ignore_ascii_case(extension))
            .ok_or_else(|| {
                ZiError::validation(format!("extension '{extension}' is not supported by this pipeline"))
            });
    }

    if let Some(accept) = &request.accept {
        let ranges = accept_ranges(accept);
        if ranges.is_empty() {
            return Ok(0);
        }
        for range in &ranges {
            if let Some(idx) = formats.iter().position(|f| media_matches(range, f.media_type())) {
                return Ok(idx);
            }
        }
        return Err(ZiError::validation(format!(
            "no format of this pipeline is acceptable for '{accept}'"
        )));
    }

    Ok(0)
}
