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

//! # Ziq Write Streams
//!
//! Byte sinks a format writes into. Every sink exposes the same backpressure
//! contract:
//!
//! - `write` enqueues a buffer and resolves once it has been accepted
//! - `write_queue_full` reports whether more than the configured number of
//!   buffers are still waiting to be flushed
//! - `drain` resolves once the sink is no longer full
//! - `end` flushes everything and closes the sink; `abort` closes it as failed
//!
//! ## Implementations
//!
//! - [`response::ZiResponseWriteStream`]: the live response, paired with a
//!   receiver handed to the transport layer
//! - [`file::ZiFileWriteStream`]: a file written by a background task
//! - [`caching::ZiCachingWriteStream`]: fans every buffer out to a response
//!   and a cache file, keeping the cache complete or absent

pub mod caching;
pub mod file;
pub mod response;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::errors::{Result, ZiError};

/// A byte sink with a bounded write queue.
#[async_trait]
pub trait ZiWriteStream: Send {
    async fn write(&mut self, data: Bytes) -> Result<()>;

    fn set_write_queue_max_size(&mut self, size: usize);

    fn write_queue_full(&self) -> bool;

    /// Resolves once `write_queue_full` would return false.
    async fn drain(&mut self) -> Result<()>;

    async fn end(&mut self) -> Result<()>;

    /// Closes the sink after a failure; never fails itself.
    async fn abort(&mut self, reason: &ZiError);
}

/// Counter of buffers handed to a sink but not yet flushed.
#[derive(Clone, Debug)]
pub struct ZiWriteQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    pending: AtomicUsize,
    max: AtomicUsize,
    notify: Notify,
}

impl ZiWriteQueue {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: AtomicUsize::new(0),
                max: AtomicUsize::new(max.max(1)),
                notify: Notify::new(),
            }),
        }
    }

    pub fn pushed(&self) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn popped(&self) {
        let before = self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if before.saturating_sub(1) < self.max() {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.inner.max.load(Ordering::Acquire)
    }

    pub fn set_max(&self, max: usize) {
        self.inner.max.store(max.max(1), Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_full(&self) -> bool {
        self.pending() >= self.max()
    }

    /// Wakes every waiter regardless of the count, used when a sink closes.
    pub fn release(&self) {
        self.inner.notify.notify_waiters();
    }

    pub async fn wait_not_full(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if !self.is_full() {
                return;
            }
            notified.await;
        }
    }
}
