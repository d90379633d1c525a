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

//! # Ziq Core Library
//!
//! Ziq is a streaming query-pipeline engine. A pipeline definition names a
//! source, an ordered chain of processors and a set of output formats; Ziq
//! pulls rows from the source through the processors into the chosen format
//! one at a time, throttled only by the output sink, and tees the serialised
//! bytes into a cache file that is kept only if the whole response succeeded.
//! Pipelines with a cache duration answer repeat requests from that file.
//!
//! ## Module Overview
//!
//! - **record** / **types**: data rows, typed values and column schemas
//! - **argument**: typed, validated request arguments
//! - **stage**: the source, processor and format contracts
//! - **sources** / **processors** / **formats**: built-in stages
//! - **stream**: write streams with backpressure, including the caching tee
//! - **cache**: index of servable cache artifacts and their expiry
//! - **pipeline**: the per-request orchestrator
//! - **ratelimit**: admission control over recent request history
//! - **executor**: definition-to-pipeline boundary and the request flow
//! - **defn**: plain-data pipeline definitions
//! - **audit**, **credentials**, **blocking**, **config**: supporting services
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//!
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use ziq::{
//!     ZiEngineConfig, ZiFormatRequest, ZiPipelineDefn, ZiPipelineExecutor, ZiRequestContext,
//!     ZiResponseWriteStream, ZiStageDefn,
//! };
//!
//! # async fn demo() -> ziq::Result<()> {
//! let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new());
//! let defn = ZiPipelineDefn::new(ZiStageDefn::new("test", json!({"row_count": 1000})))
//!     .processor(ZiStageDefn::new("limit", json!({"count": 100})))
//!     .format(ZiStageDefn::new("delimited", json!({})));
//!
//! let cancel = CancellationToken::new();
//! let (output, receiver) = ZiResponseWriteStream::channel(64, cancel.clone());
//! let reader = tokio::spawn(receiver.collect());
//!
//! let summary = executor
//!     .execute(
//!         &defn,
//!         ZiRequestContext::new("req-1", "/demo"),
//!         HashMap::new(),
//!         &ZiFormatRequest::new(),
//!         Box::new(output),
//!         cancel,
//!     )
//!     .await?;
//! let body = reader.await.map_err(ziq::ZiError::from)??;
//! assert_eq!(summary.rows, 100);
//! # let _ = body;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, ZiError>`. Errors carry an HTTP-like
//! status through [`ZiError::status_code`]; only per-key endpoint errors are
//! recoverable.

pub mod argument;
pub mod audit;
pub mod blocking;
pub mod cache;
pub mod config;
pub mod context;
pub mod credentials;
pub mod defn;
pub mod errors;
pub mod executor;
pub mod formats;
pub mod pipeline;
pub mod processors;
pub mod ratelimit;
pub mod record;
pub mod sources;
pub mod stage;
pub mod stream;
pub mod types;

pub use argument::{prepare_arguments, ZiArgumentDefn, ZiArgumentInstance, ZiArgumentType};
pub use audit::{ZiAuditRecord, ZiAuditSink, ZiMemoryAuditSink, ZiNullAuditSink};
pub use blocking::ZiBlockingPool;
pub use cache::{ZiCacheEntry, ZiCacheIndex};
pub use config::{ZiDynamicEndpointPolicy, ZiEngineConfig};
pub use context::{ZiEndpoint, ZiPipelineContext, ZiRequestContext};
pub use credentials::ZiCredentialsCache;
pub use defn::{ZiDynamicEndpointDefn, ZiPipelineDefn, ZiStageDefn};
pub use errors::{Result, ZiError};
pub use executor::ZiPipelineExecutor;
pub use formats::{select_format, ZiFormatRequest};
pub use pipeline::{ZiPipelineHandle, ZiPipelineInstance, ZiRunSummary};
pub use ratelimit::{evaluate_rate_limit_rule, parse_limit, ZiRateLimitRule, ZiRateLimitScope, ZiRateLimiter};
pub use record::{ZiDataRow, ZiValue};
pub use stage::{ZiChain, ZiFormat, ZiProcessor, ZiRowPull, ZiSource};
pub use stream::caching::{ZiCacheState, ZiCachingWriteStream};
pub use stream::file::ZiFileWriteStream;
pub use stream::response::{ZiResponseReceiver, ZiResponseWriteStream};
pub use stream::ZiWriteStream;
pub use types::{ZiColumnDefn, ZiDataType, ZiTypes, ZiTypesRef};
