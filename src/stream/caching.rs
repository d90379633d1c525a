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

//! # Caching Write Stream
//!
//! Writes every buffer to the live output and to a cache sink at once. The
//! output is authoritative: its failures fail the stream. The cache is best
//! effort: its failures delete the cache and the stream carries on with the
//! output alone.
//!
//! ## Cache Artifact
//!
//! Bytes go to a hidden sibling `.<name>.<random>.partial`, unique to this
//! stream, and are renamed onto the final path only after both sinks ended
//! cleanly. The final path therefore holds a complete artifact or nothing.
//! Identical requests running together each fill their own partial file and
//! the last rename wins. A partial left behind by a crashed process never
//! blocks later requests.
//!
//! ## States
//!
//! `Open` moves exactly once to `Completed` or `Failed`. Leaving `Open` any
//! way other than a successful `end`, including being dropped, deletes the
//! partial file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::file::ZiFileWriteStream;
use super::ZiWriteStream;
use crate::errors::{Result, ZiError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZiCacheState {
    Open,
    Completed,
    Failed,
}

struct CacheSink {
    stream: Box<dyn ZiWriteStream>,
    partial: PathBuf,
    target: PathBuf,
}

pub struct ZiCachingWriteStream {
    output: Box<dyn ZiWriteStream>,
    cache: Option<CacheSink>,
    artifact: Option<PathBuf>,
    state: ZiCacheState,
    bytes_written: u64,
}

/// Creates a uniquely named hidden sibling of `target` and keeps it on disk.
async fn create_partial(target: &Path) -> Result<(std::fs::File, PathBuf)> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache".to_string());
    tokio::task::spawn_blocking(move || {
        let prefix = format!(".{name}.");
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".partial")
            .tempfile_in(&dir)?;
        file.keep().map_err(|e| ZiError::from(e.error))
    })
    .await?
}

impl ZiCachingWriteStream {
    /// Wraps `output`; without a cache path, or if the cache cannot be created,
    /// the stream writes to the output only.
    pub async fn open(
        output: Box<dyn ZiWriteStream>,
        cache_path: Option<PathBuf>,
        write_queue_max_size: usize,
    ) -> Self {
        let Some(target) = cache_path else {
            return Self::output_only(output, write_queue_max_size);
        };
        match create_partial(&target).await {
            Ok((file, partial)) => {
                log::debug!(
                    "cache.open: cache file opened - partial={}, target={}",
                    partial.display(),
                    target.display()
                );
                let stream = ZiFileWriteStream::from_std(file, &partial, write_queue_max_size);
                Self::with_cache_sink(output, Box::new(stream), partial, target, write_queue_max_size)
            }
            Err(err) => {
                log::warn!(
                    "cache.open_failed: continuing without cache - target={}, error={}",
                    target.display(),
                    err
                );
                Self::output_only(output, write_queue_max_size)
            }
        }
    }

    /// Tees `output` into `cache`, which fills `partial` until it is renamed to `target`.
    pub fn with_cache_sink(
        output: Box<dyn ZiWriteStream>,
        cache: Box<dyn ZiWriteStream>,
        partial: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        write_queue_max_size: usize,
    ) -> Self {
        let mut stream = Self::output_only(output, write_queue_max_size);
        let mut cache = CacheSink {
            stream: cache,
            partial: partial.into(),
            target: target.into(),
        };
        cache.stream.set_write_queue_max_size(write_queue_max_size);
        stream.cache = Some(cache);
        stream
    }

    fn output_only(mut output: Box<dyn ZiWriteStream>, write_queue_max_size: usize) -> Self {
        output.set_write_queue_max_size(write_queue_max_size);
        Self {
            output,
            cache: None,
            artifact: None,
            state: ZiCacheState::Open,
            bytes_written: 0,
        }
    }

    pub fn state(&self) -> ZiCacheState {
        self.state
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// File currently being filled, while the cache is still live.
    pub fn partial_path(&self) -> Option<&Path> {
        self.cache.as_ref().map(|c| c.partial.as_path())
    }

    /// Final cache file, once `end` renamed it into place.
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Bytes accepted by the output sink.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ZiCacheState::Open => Ok(()),
            state => Err(ZiError::sink(format!("caching stream is {state:?}"))),
        }
    }

    async fn discard_cache(&mut self, reason: &ZiError) {
        if let Some(mut cache) = self.cache.take() {
            cache.stream.abort(reason).await;
            remove_quietly(&cache.partial).await;
            log::warn!(
                "cache.discard: cache file deleted - partial={}, reason={}",
                cache.partial.display(),
                reason
            );
        }
    }

    async fn fail(&mut self, reason: &ZiError) {
        self.state = ZiCacheState::Failed;
        self.discard_cache(reason).await;
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!(
                "cache.remove_failed: could not delete cache file - path={}, error={}",
                path.display(),
                err
            );
        }
    }
}

#[async_trait]
impl ZiWriteStream for ZiCachingWriteStream {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.ensure_open()?;
        let len = data.len() as u64;
        let cache_copy = self.cache.as_ref().map(|_| data.clone());

        if let Err(err) = self.output.write(data).await {
            self.fail(&err).await;
            return Err(err);
        }
        self.bytes_written += len;

        let cache_result = match (self.cache.as_mut(), cache_copy) {
            (Some(cache), Some(buf)) => cache.stream.write(buf).await,
            _ => Ok(()),
        };
        if let Err(err) = cache_result {
            self.discard_cache(&err).await;
        }
        Ok(())
    }

    fn set_write_queue_max_size(&mut self, size: usize) {
        self.output.set_write_queue_max_size(size);
        if let Some(cache) = self.cache.as_mut() {
            cache.stream.set_write_queue_max_size(size);
        }
    }

    fn write_queue_full(&self) -> bool {
        self.output.write_queue_full()
            || self
                .cache
                .as_ref()
                .map_or(false, |c| c.stream.write_queue_full())
    }

    async fn drain(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Err(err) = self.output.drain().await {
            self.fail(&err).await;
            return Err(err);
        }
        let cache_result = match self.cache.as_mut() {
            Some(cache) => cache.stream.drain().await,
            None => Ok(()),
        };
        if let Err(err) = cache_result {
            self.discard_cache(&err).await;
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Err(err) = self.output.end().await {
            self.fail(&err).await;
            return Err(err);
        }

        if let Some(mut cache) = self.cache.take() {
            match cache.stream.end().await {
                Ok(()) => match tokio::fs::rename(&cache.partial, &cache.target).await {
                    Ok(()) => {
                        log::info!(
                            "cache.complete: cache file written - target={}, bytes={}",
                            cache.target.display(),
                            self.bytes_written
                        );
                        self.artifact = Some(cache.target);
                    }
                    Err(err) => {
                        remove_quietly(&cache.partial).await;
                        log::warn!(
                            "cache.rename_failed: cache file deleted - target={}, error={}",
                            cache.target.display(),
                            err
                        );
                    }
                },
                Err(err) => {
                    remove_quietly(&cache.partial).await;
                    log::warn!(
                        "cache.end_failed: cache file deleted - partial={}, error={}",
                        cache.partial.display(),
                        err
                    );
                }
            }
        }

        self.state = ZiCacheState::Completed;
        Ok(())
    }

    async fn abort(&mut self, reason: &ZiError) {
        if self.state != ZiCacheState::Open {
            return;
        }
        self.output.abort(reason).await;
        self.fail(reason).await;
    }
}

impl Drop for ZiCachingWriteStream {
    fn drop(&mut self) {
        if self.state == ZiCacheState::Open {
            if let Some(cache) = self.cache.take() {
                let _ = std::fs::remove_file(&cache.partial);
                log::warn!(
                    "cache.dropped: stream dropped while open, cache file deleted - partial={}",
                    cache.partial.display()
                );
            }
        }
    }
}
