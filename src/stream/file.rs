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

//! # File Stream
//!
//! A file sink flushed by a background task. Writes only enqueue; the first
//! IO failure is latched and returned by the next `write`, `drain` or `end`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ZiWriteQueue, ZiWriteStream};
use crate::errors::{Result, ZiError};

type Failure = Arc<Mutex<Option<ZiError>>>;

pub struct ZiFileWriteStream {
    path: PathBuf,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    queue: ZiWriteQueue,
    failure: Failure,
    writer: Option<JoinHandle<Result<()>>>,
}

impl ZiFileWriteStream {
    /// Creates `path`, failing if it already exists.
    pub async fn create_new(path: impl AsRef<Path>, max_queue: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(Self::start(file, path, max_queue))
    }

    /// Streams into a file the caller already opened at `path`.
    pub fn from_std(file: std::fs::File, path: impl Into<PathBuf>, max_queue: usize) -> Self {
        Self::start(File::from_std(file), path.into(), max_queue)
    }

    fn start(file: File, path: PathBuf, max_queue: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = ZiWriteQueue::new(max_queue);
        let failure: Failure = Arc::new(Mutex::new(None));
        let writer = tokio::spawn(flush_loop(file, rx, queue.clone(), failure.clone()));

        Self {
            path,
            tx: Some(tx),
            queue,
            failure,
            writer: Some(writer),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn latched(&self) -> Result<()> {
        match self.failure.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            },
            Err(_) => Err(ZiError::internal("file writer state poisoned")),
        }
    }
}

async fn flush_loop(
    mut file: File,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    queue: ZiWriteQueue,
    failure: Failure,
) -> Result<()> {
    while let Some(buf) = rx.recv().await {
        let result = file.write_all(&buf).await;
        queue.popped();
        if let Err(err) = result {
            let err = ZiError::from(err);
            if let Ok(mut slot) = failure.lock() {
                *slot = Some(err.clone());
            }
            rx.close();
            while rx.try_recv().is_ok() {
                queue.popped();
            }
            queue.release();
            return Err(err);
        }
    }
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

#[async_trait]
impl ZiWriteStream for ZiFileWriteStream {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.latched()?;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ZiError::sink(format!("{} already closed", self.path.display())))?;
        self.queue.pushed();
        if tx.send(data).is_err() {
            self.queue.popped();
            self.latched()?;
            return Err(ZiError::sink(format!("{} writer stopped", self.path.display())));
        }
        Ok(())
    }

    fn set_write_queue_max_size(&mut self, size: usize) {
        self.queue.set_max(size);
    }

    fn write_queue_full(&self) -> bool {
        self.queue.is_full()
    }

    async fn drain(&mut self) -> Result<()> {
        self.latched()?;
        if self.writer.as_ref().map_or(true, JoinHandle::is_finished) {
            return self.latched();
        }
        self.queue.wait_not_full().await;
        self.latched()
    }

    async fn end(&mut self) -> Result<()> {
        self.tx.take();
        match self.writer.take() {
            Some(handle) => handle.await?,
            None => Err(ZiError::sink(format!("{} already closed", self.path.display()))),
        }
    }

    async fn abort(&mut self, _reason: &ZiError) {
        self.tx.take();
        if let Some(handle) = self.writer.take() {
            handle.abort();
        }
    }
}
