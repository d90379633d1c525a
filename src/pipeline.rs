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

//! # Ziq Pipeline Module
//!
//! [`ZiPipelineInstance`] drives one request: it resolves dynamic endpoints,
//! initialises the stages in order (source, processors, format), then moves
//! rows from the end of the processor chain into the format until the source
//! is exhausted.
//!
//! ## Flow Control
//!
//! A row is pulled only after the format accepted the previous one and the
//! sink reports room. When the sink is full the loop awaits `drain()`; no
//! other buffering exists between stages.
//!
//! ## Failure
//!
//! The first error ends the run. The source is closed first so no more rows
//! are produced, then the processors, then the sink is aborted with that
//! error. Every suspension point except the final `end()` is raced against
//! the cancellation token.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::context::ZiPipelineContext;
use crate::errors::{Result, ZiError};
use crate::sources::dynamic::ZiDynamicEndpointResolver;
use crate::stage::{ZiChain, ZiFormat, ZiProcessor, ZiRowPull, ZiSource};
use crate::stream::ZiWriteStream;

/// Outcome of a successful run, feeding the audit record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZiRunSummary {
    pub rows: u64,
    pub bytes: u64,
    pub time_to_first_byte: Option<Duration>,
    pub duration: Duration,
    pub warnings: usize,
    /// The body was copied from a cached artifact instead of being generated.
    #[serde(default)]
    pub from_cache: bool,
    /// Nothing was sent; the caller's copy is still current.
    #[serde(default)]
    pub not_modified: bool,
}

/// A lookup pipeline that must populate endpoints before the main source opens.
pub struct ZiDynamicEndpointStep {
    pub resolver: ZiDynamicEndpointResolver,
    pub source: Box<dyn ZiSource>,
    pub processors: Vec<Box<dyn ZiProcessor>>,
}

pub struct ZiPipelineInstance {
    ctx: ZiPipelineContext,
    dynamic_endpoints: Vec<ZiDynamicEndpointStep>,
    source: Box<dyn ZiSource>,
    processors: Vec<Box<dyn ZiProcessor>>,
    format: Box<dyn ZiFormat>,
}

/// Counts bytes passing to the real sink and notes when the first one went out.
struct ZiCountingSink<'a> {
    inner: &'a mut dyn ZiWriteStream,
    bytes: u64,
    first_byte: Option<Instant>,
}

#[async_trait]
impl<'a> ZiWriteStream for ZiCountingSink<'a> {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        let len = data.len() as u64;
        self.inner.write(data).await?;
        if self.first_byte.is_none() && len > 0 {
            self.first_byte = Some(Instant::now());
        }
        self.bytes += len;
        Ok(())
    }

    fn set_write_queue_max_size(&mut self, size: usize) {
        self.inner.set_write_queue_max_size(size);
    }

    fn write_queue_full(&self) -> bool {
        self.inner.write_queue_full()
    }

    async fn drain(&mut self) -> Result<()> {
        self.inner.drain().await
    }

    async fn end(&mut self) -> Result<()> {
        self.inner.end().await
    }

    async fn abort(&mut self, reason: &ZiError) {
        self.inner.abort(reason).await
    }
}

pub(crate) async fn guarded<T>(cancel: &CancellationToken, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ZiError::cancelled("request cancelled")),
        result = work => result,
    }
}

impl ZiPipelineInstance {
    pub fn new(
        ctx: ZiPipelineContext,
        source: Box<dyn ZiSource>,
        processors: Vec<Box<dyn ZiProcessor>>,
        format: Box<dyn ZiFormat>,
    ) -> Self {
        Self {
            ctx,
            dynamic_endpoints: Vec::new(),
            source,
            processors,
            format,
        }
    }

    pub fn with_dynamic_endpoints(mut self, steps: Vec<ZiDynamicEndpointStep>) -> Self {
        self.dynamic_endpoints = steps;
        self
    }

    pub fn context(&self) -> &ZiPipelineContext {
        &self.ctx
    }

    pub fn format(&self) -> &dyn ZiFormat {
        self.format.as_ref()
    }

    /// Runs to completion, writing into `sink`. Completes exactly once.
    pub async fn run(
        mut self,
        sink: &mut dyn ZiWriteStream,
        cancel: CancellationToken,
    ) -> Result<ZiRunSummary> {
        let started = Instant::now();
        let mut counting = ZiCountingSink {
            inner: sink,
            bytes: 0,
            first_byte: None,
        };

        let outcome = self.drive(&mut counting, &cancel).await;

        self.source.close().await;
        for processor in self.processors.iter_mut() {
            processor.close().await;
        }

        let request_id = self.ctx.request().request_id.clone();
        match outcome {
            Ok(rows) => {
                let summary = ZiRunSummary {
                    rows,
                    bytes: counting.bytes,
                    time_to_first_byte: counting.first_byte.map(|t| t.duration_since(started)),
                    duration: started.elapsed(),
                    warnings: self.ctx.warnings(),
                    from_cache: false,
                    not_modified: false,
                };
                log::info!(
                    "pipeline.complete: pipeline finished - request_id={}, rows={}, bytes={}, duration_ms={}",
                    request_id,
                    summary.rows,
                    summary.bytes,
                    summary.duration.as_millis()
                );
                Ok(summary)
            }
            Err(err) => {
                counting.abort(&err).await;
                if err.is_cancelled() {
                    log::warn!(
                        "pipeline.cancelled: pipeline stopped - request_id={}, bytes={}, reason={}",
                        request_id,
                        counting.bytes,
                        err
                    );
                } else {
                    log::error!(
                        "pipeline.failed: pipeline stopped - request_id={}, bytes={}, error={}",
                        request_id,
                        counting.bytes,
                        err
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive(&mut self, sink: &mut ZiCountingSink<'_>, cancel: &CancellationToken) -> Result<u64> {
        for step in self.dynamic_endpoints.drain(..) {
            let added = guarded(
                cancel,
                step.resolver
                    .resolve(&self.ctx, step.source, step.processors, cancel),
            )
            .await?;
            log::debug!(
                "pipeline.endpoints: dynamic endpoints resolved - request_id={}, added={}",
                self.ctx.request().request_id,
                added
            );
        }

        let mut types = guarded(cancel, self.source.initialize(&self.ctx)).await?;
        for processor in self.processors.iter_mut() {
            types = processor.initialize(&types)?;
        }
        self.format.initialize(&types)?;
        log::debug!(
            "pipeline.initialize: stages ready - request_id={}, source={}, processors={}, format={}, columns={}",
            self.ctx.request().request_id,
            self.source.name(),
            self.processors.len(),
            self.format.name(),
            types
        );

        let mut chain = ZiChain::new(self.source.as_mut(), &mut self.processors);
        let mut rows = 0u64;
        loop {
            if sink.write_queue_full() {
                guarded(cancel, sink.drain()).await?;
            }
            let Some(row) = guarded(cancel, chain.pull()).await? else {
                break;
            };
            guarded(cancel, self.format.write_row(&row, sink)).await?;
            rows += 1;
        }

        guarded(cancel, self.format.finish(sink)).await?;
        sink.end().await?;
        Ok(rows)
    }

    /// Runs on its own task; the handle carries the single completion signal.
    pub fn spawn(self, mut sink: Box<dyn ZiWriteStream>, cancel: CancellationToken) -> ZiPipelineHandle {
        let (tx, rx) = oneshot::channel();
        let token = cancel.clone();
        tokio::spawn(async move {
            let result = self.run(sink.as_mut(), token).await;
            let _ = tx.send(result);
        });
        ZiPipelineHandle { cancel, done: rx }
    }
}

pub struct ZiPipelineHandle {
    cancel: CancellationToken,
    done: oneshot::Receiver<Result<ZiRunSummary>>,
}

impl ZiPipelineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<ZiRunSummary> {
        self.done
            .await
            .map_err(|_| ZiError::internal("pipeline task ended without reporting"))?
    }
}
