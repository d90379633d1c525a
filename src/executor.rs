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

//! # Ziq Executor Module
//!
//! [`ZiPipelineExecutor`] is the boundary between a pipeline definition and a
//! running pipeline. It owns the stage factories, the endpoint drivers, the
//! blocking pool and the rate limiter, and serves one request as:
//!
//! 1. validate the definition and admit the request against its rate limits
//! 2. prepare arguments, select the format and build every stage
//! 3. serve a valid cache artifact if one exists, otherwise open a
//!    [`ZiCachingWriteStream`] over the response
//! 4. run the pipeline to its single completion
//! 5. close the rate-limit history entry and emit the audit record
//!
//! ## Output Cache
//!
//! A definition with a cache duration, on an engine with an output cache
//! directory, records each complete artifact in the [`ZiCacheIndex`] with its
//! expiry. Until then identical requests are answered by copying the file.
//! An artifact that cannot be opened is forgotten and the pipeline runs again.
//! A request whose `If-Modified-Since` is before the expiry gets an empty
//! not-modified answer.
//!
//! ## Stage Registry
//!
//! Stages are created by name from `type` in each [`ZiStageDefn`]. The
//! built-in set is registered by [`ZiPipelineExecutor::with_defaults`]:
//!
//! | kind      | names                                           |
//! |-----------|-------------------------------------------------|
//! | source    | `static`, `test`, `endpoint`                    |
//! | processor | `limit`, `offset`, `filter`, `map`, `without`, `sort` |
//! | format    | `json`, `delimited`                             |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::argument::{prepare_arguments, ZiArgumentInstance};
use crate::audit::{ZiAuditRecord, ZiAuditSink, ZiNullAuditSink};
use crate::blocking::ZiBlockingPool;
use crate::cache::{ZiCacheEntry, ZiCacheIndex};
use crate::config::ZiEngineConfig;
use crate::context::{ZiEndpoint, ZiPipelineContext, ZiRequestContext};
use crate::defn::{ZiPipelineDefn, ZiStageDefn};
use crate::errors::{Result, ZiError};
use crate::formats::{select_format, ZiFormatRequest};
use crate::pipeline::{guarded, ZiDynamicEndpointStep, ZiPipelineInstance, ZiRunSummary};
use crate::ratelimit::ZiRateLimiter;
use crate::sources::dynamic::ZiDynamicEndpointResolver;
use crate::sources::endpoint::{endpoint_source_factory, ZiConnectors, ZiEndpointConnector};
use crate::stage::{
    ZiFormat, ZiFormatFactory, ZiProcessor, ZiProcessorFactory, ZiSource, ZiSourceFactory,
};
use crate::stream::caching::ZiCachingWriteStream;
use crate::stream::ZiWriteStream;

/// Bytes read from a cache artifact per write.
const CACHE_READ_CHUNK: usize = 64 * 1024;

pub struct ZiPipelineExecutor {
    config: ZiEngineConfig,
    sources: HashMap<String, ZiSourceFactory>,
    processors: HashMap<String, ZiProcessorFactory>,
    formats: HashMap<String, ZiFormatFactory>,
    connectors: ZiConnectors,
    pool: ZiBlockingPool,
    rate_limiter: ZiRateLimiter,
    cache_index: ZiCacheIndex,
    audit: Arc<dyn ZiAuditSink>,
}

impl ZiPipelineExecutor {
    /// Creates an executor with no stages registered.
    pub fn new(config: ZiEngineConfig) -> Self {
        let pool = ZiBlockingPool::new(config.blocking_pool_size);
        let rate_limiter = ZiRateLimiter::new(config.rate_limit_retention_secs);
        Self {
            config,
            sources: HashMap::new(),
            processors: HashMap::new(),
            formats: HashMap::new(),
            connectors: ZiConnectors::new(),
            pool,
            rate_limiter,
            cache_index: ZiCacheIndex::new(),
            audit: Arc::new(ZiNullAuditSink),
        }
    }

    /// Creates an executor with the built-in sources, processors and formats.
    pub fn with_defaults(config: ZiEngineConfig) -> Self {
        let mut executor = Self::new(config);
        executor.register_defaults();
        executor
    }

    fn register_defaults(&mut self) {
        use crate::formats::{delimited, json};
        use crate::processors::{field, filter, limit, offset, sort};
        use crate::sources::{static_source, test_source};

        self.register_source("static", Arc::new(static_source::static_source_factory));
        self.register_source("test", Arc::new(test_source::test_source_factory));
        self.refresh_endpoint_source();

        self.register_processor("limit", Arc::new(limit::limit_factory));
        self.register_processor("offset", Arc::new(offset::offset_factory));
        self.register_processor("filter", Arc::new(filter::filter_factory));
        self.register_processor("map", Arc::new(field::map_factory));
        self.register_processor("without", Arc::new(field::without_factory));
        self.register_processor("sort", sort::sort_factory(self.config.sort_memory_limit, self.pool.clone()));

        self.register_format("json", Arc::new(json::json_format_factory));
        self.register_format("delimited", Arc::new(delimited::delimited_format_factory));
    }

    fn refresh_endpoint_source(&mut self) {
        let factory = endpoint_source_factory(Arc::new(self.connectors.clone()), self.pool.clone());
        self.register_source("endpoint", factory);
    }

    pub fn register_source(&mut self, name: impl Into<String>, factory: ZiSourceFactory) {
        self.sources.insert(name.into(), factory);
    }

    pub fn register_processor(&mut self, name: impl Into<String>, factory: ZiProcessorFactory) {
        self.processors.insert(name.into(), factory);
    }

    pub fn register_format(&mut self, name: impl Into<String>, factory: ZiFormatFactory) {
        self.formats.insert(name.into(), factory);
    }

    /// Registers the driver for one endpoint type, e.g. `"SQL"`.
    pub fn register_connector(
        &mut self,
        endpoint_type: impl Into<String>,
        connector: Arc<dyn ZiEndpointConnector>,
    ) {
        self.connectors.insert(endpoint_type.into(), connector);
        if self.sources.contains_key("endpoint") {
            self.refresh_endpoint_source();
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn ZiAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &ZiEngineConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &ZiRateLimiter {
        &self.rate_limiter
    }

    pub fn pool(&self) -> &ZiBlockingPool {
        &self.pool
    }

    pub fn cache_index(&self) -> &ZiCacheIndex {
        &self.cache_index
    }

    fn create_source(&self, defn: &ZiStageDefn) -> Result<Box<dyn ZiSource>> {
        let factory = self
            .sources
            .get(&defn.stage_type)
            .ok_or_else(|| ZiError::validation(format!("unknown source '{}'", defn.stage_type)))?;
        factory(&defn.config)
    }

    fn create_processors(
        &self,
        defns: &[ZiStageDefn],
        arguments: &HashMap<String, ZiArgumentInstance>,
    ) -> Result<Vec<Box<dyn ZiProcessor>>> {
        let mut processors = Vec::with_capacity(defns.len());
        for (index, defn) in defns.iter().enumerate() {
            if !defn.is_enabled(arguments)? {
                log::debug!(
                    "executor.processor.skip: condition not met - index={}, type={}",
                    index,
                    defn.stage_type
                );
                continue;
            }
            let factory = self.processors.get(&defn.stage_type).ok_or_else(|| {
                ZiError::validation(format!(
                    "processor #{index} has unknown type '{}'",
                    defn.stage_type
                ))
            })?;
            processors.push(factory(&defn.config)?);
        }
        Ok(processors)
    }

    fn create_formats(
        &self,
        defns: &[ZiStageDefn],
        arguments: &HashMap<String, ZiArgumentInstance>,
    ) -> Result<Vec<Box<dyn ZiFormat>>> {
        let mut formats = Vec::with_capacity(defns.len());
        for defn in defns {
            if !defn.is_enabled(arguments)? {
                continue;
            }
            let factory = self
                .formats
                .get(&defn.stage_type)
                .ok_or_else(|| ZiError::validation(format!("unknown format '{}'", defn.stage_type)))?;
            formats.push(factory(&defn.config)?);
        }
        Ok(formats)
    }

    /// Turns a definition plus request into a pipeline ready to run.
    pub fn build(
        &self,
        defn: &ZiPipelineDefn,
        request: ZiRequestContext,
        endpoints: HashMap<String, ZiEndpoint>,
        format_request: &ZiFormatRequest,
    ) -> Result<ZiPipelineInstance> {
        defn.validate()?;
        let arguments = prepare_arguments(&defn.arguments, &request.args)?;

        let mut formats = self.create_formats(&defn.formats, &arguments)?;
        let index = select_format(&formats, format_request)?;
        let format = formats.swap_remove(index);

        let source = self.create_source(&defn.source)?;
        let processors = self.create_processors(&defn.processors, &arguments)?;

        let mut steps = Vec::with_capacity(defn.dynamic_endpoints.len());
        for lookup in &defn.dynamic_endpoints {
            steps.push(ZiDynamicEndpointStep {
                resolver: ZiDynamicEndpointResolver::new(
                    lookup.fields.clone(),
                    self.config.dynamic_endpoint_policy,
                ),
                source: self.create_source(&lookup.source)?,
                processors: self.create_processors(&lookup.processors, &arguments)?,
            });
        }

        log::debug!(
            "executor.build: pipeline built - request_id={}, path={}, processors={}, format={}, dynamic_endpoints={}",
            request.request_id,
            request.path,
            processors.len(),
            format.name(),
            steps.len()
        );

        let ctx = ZiPipelineContext::new(request, arguments, endpoints);
        Ok(ZiPipelineInstance::new(ctx, source, processors, format).with_dynamic_endpoints(steps))
    }

    /// Where the output of this request is cached, if caching is configured.
    ///
    /// Identical path, arguments and format give the same file.
    pub fn cache_path(
        &self,
        path: &str,
        arguments: &HashMap<String, ZiArgumentInstance>,
        format: &dyn ZiFormat,
    ) -> Option<PathBuf> {
        let dir = self.config.output_cache_dir.as_ref()?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0]);

        let mut names: Vec<&String> = arguments.keys().collect();
        names.sort();
        for name in names {
            hasher.update(name.as_bytes());
            for value in arguments[name].values() {
                hasher.update(b"=");
                hasher.update(value.to_string().as_bytes());
            }
            hasher.update(&[0]);
        }
        hasher.update(format.name().as_bytes());

        let digest = hex::encode(hasher.finalize().as_bytes());
        Some(dir.join(format!("{}.{}", digest, format.extension())))
    }

    /// Serves one request end to end, writing the response into `output`.
    pub async fn execute(
        &self,
        defn: &ZiPipelineDefn,
        request: ZiRequestContext,
        endpoints: HashMap<String, ZiEndpoint>,
        format_request: &ZiFormatRequest,
        mut output: Box<dyn ZiWriteStream>,
        cancel: CancellationToken,
    ) -> Result<ZiRunSummary> {
        if let Err(err) = defn
            .validate()
            .and_then(|_| self.rate_limiter.admit(&request, &defn.rate_limit_rules))
        {
            output.abort(&err).await;
            self.audit.record(ZiAuditRecord::failed(&request, &err, 0));
            return Err(err);
        }

        let audit_request = request.clone();
        let instance = match self.build(defn, request, endpoints, format_request) {
            Ok(instance) => instance,
            Err(err) => {
                output.abort(&err).await;
                self.finish(&audit_request, Err(&err), 0);
                return Err(err);
            }
        };

        let cache_duration = defn.cache_duration();
        let cache_path = cache_duration.and_then(|_| {
            self.cache_path(
                &audit_request.path,
                instance.context().arguments(),
                instance.format(),
            )
        });

        if let Some(path) = cache_path.as_deref() {
            if let Some(entry) = self.cache_index.lookup(path, Utc::now()) {
                match tokio::fs::File::open(&entry.path).await {
                    Ok(file) => {
                        drop(instance);
                        return self
                            .serve_cached(&audit_request, &entry, file, output, cancel)
                            .await;
                    }
                    Err(err) => {
                        log::warn!(
                            "executor.cache_unreadable: regenerating output - request_id={}, path={}, error={}",
                            audit_request.request_id,
                            entry.path.display(),
                            err
                        );
                        self.cache_index.remove(path);
                        remove_cache_file(path).await;
                    }
                }
            }
        }

        let mut sink =
            ZiCachingWriteStream::open(output, cache_path, self.config.write_queue_max_size).await;

        let result = instance.run(&mut sink, cancel).await;
        let bytes = sink.bytes_written();
        let artifact = sink.artifact().map(Path::to_path_buf);
        drop(sink);

        match result {
            Ok(summary) => {
                if let (Some(path), Some(duration)) = (artifact, cache_duration) {
                    self.record_artifact(path, duration, &summary).await;
                }
                self.finish(&audit_request, Ok(&summary), bytes);
                Ok(summary)
            }
            Err(err) => {
                self.finish(&audit_request, Err(&err), bytes);
                Err(err)
            }
        }
    }

    async fn record_artifact(&self, path: PathBuf, duration: std::time::Duration, summary: &ZiRunSummary) {
        let created = Utc::now();
        let expires = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| created.checked_add_signed(delta));
        let Some(expires) = expires else {
            log::warn!(
                "executor.cache_duration_invalid: artifact not recorded - path={}, secs={}",
                path.display(),
                duration.as_secs()
            );
            return;
        };
        let pruned = self.cache_index.record(ZiCacheEntry {
            path,
            created,
            expires,
            rows: summary.rows,
            bytes: summary.bytes,
        });
        for stale in pruned {
            remove_cache_file(&stale.path).await;
        }
    }

    /// Answers from a cache artifact instead of running the pipeline.
    async fn serve_cached(
        &self,
        request: &ZiRequestContext,
        entry: &ZiCacheEntry,
        file: tokio::fs::File,
        mut output: Box<dyn ZiWriteStream>,
        cancel: CancellationToken,
    ) -> Result<ZiRunSummary> {
        let started = Instant::now();
        output.set_write_queue_max_size(self.config.write_queue_max_size);
        let not_modified = request
            .if_modified_since
            .map_or(false, |since| since < entry.expires);

        let mut bytes = 0u64;
        let mut first_byte = None;
        let result = if not_modified {
            output.end().await
        } else {
            copy_artifact(file, output.as_mut(), &cancel, &mut bytes, &mut first_byte, started).await
        };

        match result {
            Ok(()) => {
                log::info!(
                    "executor.cache_hit: response served from cache - request_id={}, path={}, bytes={}, not_modified={}",
                    request.request_id,
                    entry.path.display(),
                    bytes,
                    not_modified
                );
                let summary = ZiRunSummary {
                    rows: if not_modified { 0 } else { entry.rows },
                    bytes,
                    time_to_first_byte: first_byte,
                    duration: started.elapsed(),
                    warnings: 0,
                    from_cache: true,
                    not_modified,
                };
                self.finish(request, Ok(&summary), bytes);
                Ok(summary)
            }
            Err(err) => {
                output.abort(&err).await;
                log::warn!(
                    "executor.cache_copy_failed: cached response stopped - request_id={}, path={}, bytes={}, error={}",
                    request.request_id,
                    entry.path.display(),
                    bytes,
                    err
                );
                self.finish(request, Err(&err), bytes);
                Err(err)
            }
        }
    }

    fn finish(
        &self,
        request: &ZiRequestContext,
        outcome: std::result::Result<&ZiRunSummary, &ZiError>,
        bytes: u64,
    ) {
        if let Err(err) = self.rate_limiter.complete(&request.request_id, bytes) {
            log::error!(
                "executor.complete_failed: rate limit history not updated - request_id={}, error={}",
                request.request_id,
                err
            );
        }
        let record = match outcome {
            Ok(summary) => ZiAuditRecord::succeeded(request, summary),
            Err(err) => ZiAuditRecord::failed(request, err, bytes),
        };
        self.audit.record(record);
    }
}

async fn copy_artifact(
    mut file: tokio::fs::File,
    output: &mut dyn ZiWriteStream,
    cancel: &CancellationToken,
    bytes: &mut u64,
    first_byte: &mut Option<std::time::Duration>,
    started: Instant,
) -> Result<()> {
    loop {
        if output.write_queue_full() {
            guarded(cancel, output.drain()).await?;
        }
        let mut buf = BytesMut::with_capacity(CACHE_READ_CHUNK);
        let read = guarded(cancel, async { file.read_buf(&mut buf).await.map_err(ZiError::from) }).await?;
        if read == 0 {
            break;
        }
        guarded(cancel, output.write(buf.freeze())).await?;
        *bytes += read as u64;
        first_byte.get_or_insert_with(|| started.elapsed());
    }
    output.end().await
}

async fn remove_cache_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!(
                "executor.cache_remove_failed: could not delete cache file - path={}, error={}",
                path.display(),
                err
            );
        }
    }
}
