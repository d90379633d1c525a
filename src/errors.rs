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

//! # Ziq Error Module
//!
//! This module defines the error type shared by every stage of a query
//! pipeline, from admission through to the final byte on the response.
//!
//! ## Error Categories
//!
//! - **Admission**: `RateLimited`, reported before any pipeline resources exist
//! - **Validation**: `Validation`, `Argument`, `Schema`, reported before output starts
//! - **Mid-stream**: `Source`, `Processor`, `Format`, `Sink`, `Io`, `Cancelled`
//! - **Per-item**: `Endpoint`, the only recoverable kind
//! - **Other**: `Pipeline`, `Serde`, `Internal`
//!
//! Every error maps to an HTTP-like status through [`ZiError::status_code`] so
//! the request layer can answer without inspecting variants.
//!
//! ## Usage
//!
//! ```rust
//! use ziq::errors::{Result, ZiError};
//!
//! fn parse_limit(raw: &str) -> Result<u64> {
//!     raw.parse::<u64>()
//!         .map_err(|e| ZiError::validation(format!("bad limit '{raw}': {e}")))
//! }
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type used throughout Ziq.
pub type Result<T> = std::result::Result<T, ZiError>;

/// Canonical error enumeration for Ziq.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum ZiError {
    /// Errors originating from filesystem or network IO.
    #[error("io error: {0}")]
    Io(String),

    /// Errors caused by incompatible row layouts between stages.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Validation errors triggered by invalid definitions or requests.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A request argument or row value that cannot be accepted.
    #[error("argument error: {message}")]
    Argument { message: String },

    /// A single dynamic endpoint could not be resolved.
    #[error("endpoint '{key}' failed: {message}")]
    Endpoint { key: String, message: String },

    /// Failure raised while producing rows.
    #[error("source '{source_name}' failed: {message}")]
    Source { source_name: String, message: String },

    /// Failure raised by a processor implementation.
    #[error("processor '{processor}' failed: {message}")]
    Processor { processor: String, message: String },

    /// Failure raised while serialising rows.
    #[error("format '{format}' failed: {message}")]
    Format { format: String, message: String },

    /// Failure of the byte sink carrying the response.
    #[error("output sink failed: {0}")]
    Sink(String),

    /// Failures that occur while orchestrating a pipeline.
    #[error("pipeline error at stage '{stage}': {message}")]
    Pipeline { stage: String, message: String },

    /// Admission refused by a rate limit rule.
    #[error("{reason}")]
    RateLimited { status: u16, reason: String },

    /// The request was cancelled, by the client or by a timeout.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Wrapper for serde-style serialization issues.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Catch-all variant for unexpected situations.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for ZiError {
    fn from(err: io::Error) -> Self {
        ZiError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ZiError {
    fn from(err: serde_json::Error) -> Self {
        ZiError::Serde(err.to_string())
    }
}

impl From<serde_yaml::Error> for ZiError {
    fn from(err: serde_yaml::Error) -> Self {
        ZiError::Serde(err.to_string())
    }
}

impl From<regex::Error> for ZiError {
    fn from(err: regex::Error) -> Self {
        ZiError::validation(format!("invalid regular expression: {err}"))
    }
}

impl From<csv::Error> for ZiError {
    fn from(err: csv::Error) -> Self {
        ZiError::format("delimited", err.to_string())
    }
}

impl From<tokio::task::JoinError> for ZiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ZiError::Internal(format!("worker task failed: {err}"))
    }
}

impl ZiError {
    /// Helper to construct simple validation errors.
    pub fn validation<T: Into<String>>(message: T) -> Self {
        ZiError::Validation {
            message: message.into(),
        }
    }

    /// Helper to construct schema errors.
    pub fn schema<T: Into<String>>(message: T) -> Self {
        ZiError::Schema {
            message: message.into(),
        }
    }

    /// Helper to construct argument errors.
    pub fn argument<T: Into<String>>(message: T) -> Self {
        ZiError::Argument {
            message: message.into(),
        }
    }

    /// Helper to construct recoverable endpoint errors.
    pub fn endpoint(key: impl Into<String>, message: impl Into<String>) -> Self {
        ZiError::Endpoint {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Helper to construct source errors.
    pub fn source(name: impl Into<String>, message: impl Into<String>) -> Self {
        ZiError::Source {
            source_name: name.into(),
            message: message.into(),
        }
    }

    /// Helper to construct processor errors.
    pub fn processor(name: impl Into<String>, message: impl Into<String>) -> Self {
        ZiError::Processor {
            processor: name.into(),
            message: message.into(),
        }
    }

    /// Helper to construct format errors.
    pub fn format(name: impl Into<String>, message: impl Into<String>) -> Self {
        ZiError::Format {
            format: name.into(),
            message: message.into(),
        }
    }

    /// Helper to construct sink errors.
    pub fn sink<T: Into<String>>(message: T) -> Self {
        ZiError::Sink(message.into())
    }

    /// Helper to construct pipeline errors.
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        ZiError::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Helper to construct rate limit rejections, always status 429.
    pub fn rate_limited<T: Into<String>>(reason: T) -> Self {
        ZiError::RateLimited {
            status: 429,
            reason: reason.into(),
        }
    }

    /// Helper to construct cancellation errors.
    pub fn cancelled<T: Into<String>>(message: T) -> Self {
        ZiError::Cancelled(message.into())
    }

    /// Helper to construct internal errors.
    pub fn internal<T: Into<String>>(message: T) -> Self {
        ZiError::Internal(message.into())
    }

    /// HTTP-like status reported to the caller for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ZiError::RateLimited { status, .. } => *status,
            ZiError::Validation { .. } | ZiError::Argument { .. } | ZiError::Schema { .. } => 400,
            ZiError::Cancelled(_) => 499,
            _ => 500,
        }
    }

    /// Whether the failure affects a single item rather than the pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ZiError::Endpoint { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ZiError::Cancelled(_))
    }
}
