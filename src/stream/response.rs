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

//! # Response Stream
//!
//! The write half of a live response. Buffers go through an unbounded channel
//! whose occupancy is tracked by a [`ZiWriteQueue`], so the queue limit, not
//! the channel, decides when the producer must wait. The transport layer owns
//! the [`ZiResponseReceiver`]; closing or dropping it cancels the request.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ZiWriteQueue, ZiWriteStream};
use crate::errors::{Result, ZiError};

const DISCONNECTED: &str = "client disconnected";

pub struct ZiResponseWriteStream {
    tx: Option<mpsc::UnboundedSender<Result<Bytes>>>,
    queue: ZiWriteQueue,
    cancel: CancellationToken,
}

/// Read half handed to the transport layer.
pub struct ZiResponseReceiver {
    rx: mpsc::UnboundedReceiver<Result<Bytes>>,
    queue: ZiWriteQueue,
    cancel: CancellationToken,
}

impl ZiResponseWriteStream {
    /// Creates a connected pair; `cancel` fires when the receiver goes away.
    pub fn channel(max_queue: usize, cancel: CancellationToken) -> (Self, ZiResponseReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = ZiWriteQueue::new(max_queue);
        (
            Self {
                tx: Some(tx),
                queue: queue.clone(),
                cancel: cancel.clone(),
            },
            ZiResponseReceiver { rx, queue, cancel },
        )
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    fn disconnected(&self) -> ZiError {
        ZiError::cancelled(DISCONNECTED)
    }
}

#[async_trait]
impl ZiWriteStream for ZiResponseWriteStream {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.disconnected());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ZiError::sink("response already ended"))?;
        self.queue.pushed();
        if tx.send(Ok(data)).is_err() {
            self.queue.popped();
            self.cancel.cancel();
            return Err(self.disconnected());
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
        tokio::select! {
            _ = self.queue.wait_not_full() => Ok(()),
            _ = self.cancel.cancelled() => Err(self.disconnected()),
        }
    }

    async fn end(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Err(ZiError::sink("response already ended"));
        };
        // Checked before the sender closes; the receiver cancels once it sees the end.
        let cancelled = self.cancel.is_cancelled();
        drop(tx);
        if cancelled {
            return Err(self.disconnected());
        }
        Ok(())
    }

    async fn abort(&mut self, reason: &ZiError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(reason.clone()));
        }
    }
}

impl ZiResponseReceiver {
    /// Next buffer; `Some(Err(_))` marks a response that failed mid-stream.
    pub async fn recv(&mut self) -> Option<Result<Bytes>> {
        let item = self.rx.recv().await;
        if matches!(item, Some(Ok(_))) {
            self.queue.popped();
        }
        item
    }

    /// Drops the connection, cancelling the request.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.queue.release();
    }

    /// Reads the remaining buffers into one body, failing if the response was aborted.
    pub async fn collect(mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        while let Some(item) = self.recv().await {
            body.extend_from_slice(&item?);
        }
        Ok(body)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> {
        futures::stream::unfold(self, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }
}

impl Drop for ZiResponseReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.queue.release();
    }
}
