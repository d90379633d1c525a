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

//! # Ziq Stream Tests - Caching
//!
//! The cache file must end up either complete (byte-identical to the
//! response) or absent, whatever happens to either sink.
//!
//! ```bash
//! cargo test --test caching
//! ```

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use ziq::{
    Result, ZiCacheState, ZiCachingWriteStream, ZiError, ZiFileWriteStream, ZiResponseWriteStream,
    ZiWriteStream,
};

/// Sink that fails on a chosen write, or on `end`.
struct FailingSink {
    fail_at: usize,
    fail_end: bool,
    writes: usize,
}

impl FailingSink {
    fn on_write(fail_at: usize) -> Self {
        Self {
            fail_at,
            fail_end: false,
            writes: 0,
        }
    }

    fn on_end() -> Self {
        Self {
            fail_at: 0,
            fail_end: true,
            writes: 0,
        }
    }
}

#[async_trait]
impl ZiWriteStream for FailingSink {
    async fn write(&mut self, _data: Bytes) -> Result<()> {
        self.writes += 1;
        if self.writes == self.fail_at {
            return Err(ZiError::sink("connection reset"));
        }
        Ok(())
    }

    fn set_write_queue_max_size(&mut self, _size: usize) {}

    fn write_queue_full(&self) -> bool {
        false
    }

    async fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        if self.fail_end {
            return Err(ZiError::sink("disk full"));
        }
        Ok(())
    }

    async fn abort(&mut self, _reason: &ZiError) {}
}

fn chunks() -> Vec<Bytes> {
    (0..20)
        .map(|i| Bytes::from(format!("line {i}\r\n")))
        .collect()
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Neither the artifact nor any partial file is left next to `target`.
fn assert_absent(target: &Path) {
    assert!(!target.exists(), "{} should not exist", target.display());
    let dir = target.parent().unwrap();
    assert!(entries(dir).is_empty(), "leftover files in {}: {:?}", dir.display(), entries(dir));
}

/// Tests that a successful stream leaves a cache identical to the response.
#[tokio::test]
async fn test_cache_matches_response() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("result.csv");
    let (output, receiver) = ZiResponseWriteStream::channel(4, CancellationToken::new());
    let reader = tokio::spawn(receiver.collect());

    let mut stream = ZiCachingWriteStream::open(Box::new(output), Some(target.clone()), 4).await;
    assert!(stream.is_caching());
    let mut expected = Vec::new();
    for chunk in chunks() {
        if stream.write_queue_full() {
            stream.drain().await.unwrap();
        }
        expected.extend_from_slice(&chunk);
        stream.write(chunk).await.unwrap();
    }
    stream.end().await.unwrap();

    assert_eq!(stream.state(), ZiCacheState::Completed);
    assert_eq!(stream.bytes_written(), expected.len() as u64);
    let body = reader.await.unwrap().unwrap();
    assert_eq!(body, expected);
    assert_eq!(std::fs::read(&target).unwrap(), expected);
    assert_eq!(stream.artifact(), Some(target.as_path()));
    assert_eq!(entries(dir.path()), vec!["result.csv".to_string()]);
}

/// Tests that an output failure fails the stream and deletes the cache.
#[tokio::test]
async fn test_output_failure_discards_cache() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("result.json");
    let output = FailingSink::on_write(5);
    let mut stream = ZiCachingWriteStream::open(Box::new(output), Some(target.clone()), 8).await;

    let mut failure = None;
    for chunk in chunks() {
        if let Err(err) = stream.write(chunk).await {
            failure = Some(err);
            break;
        }
    }
    assert!(matches!(failure, Some(ZiError::Sink(_))));
    assert_eq!(stream.state(), ZiCacheState::Failed);
    assert!(stream.write(Bytes::from_static(b"late")).await.is_err());
    assert!(stream.end().await.is_err());
    drop(stream);
    assert_absent(&target);
}

/// Tests that abort fails the stream, deletes the cache and reaches the response.
#[tokio::test]
async fn test_abort_discards_cache() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("aborted.csv");
    let (output, receiver) = ZiResponseWriteStream::channel(8, CancellationToken::new());
    let reader = tokio::spawn(receiver.collect());

    let mut stream = ZiCachingWriteStream::open(Box::new(output), Some(target.clone()), 8).await;
    stream.write(Bytes::from_static(b"partial row")).await.unwrap();
    stream.abort(&ZiError::source("test", "database went away")).await;

    assert_eq!(stream.state(), ZiCacheState::Failed);
    let err = reader.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("database went away"));
    assert_absent(&target);
}

/// Tests that dropping a stream that never finished deletes the cache.
#[tokio::test]
async fn test_drop_while_open_discards_cache() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("dropped.csv");
    let (output, _receiver) = ZiResponseWriteStream::channel(8, CancellationToken::new());

    let mut stream = ZiCachingWriteStream::open(Box::new(output), Some(target.clone()), 8).await;
    stream.write(Bytes::from_static(b"row")).await.unwrap();
    let partial = stream.partial_path().unwrap().to_path_buf();
    assert!(partial.exists());
    drop(stream);
    assert!(!partial.exists());
    assert_absent(&target);
}

/// Tests that an uncreatable cache file degrades the stream to output only.
#[tokio::test]
async fn test_cache_open_failure_is_output_only() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing").join("busy.csv");

    let (output, receiver) = ZiResponseWriteStream::channel(8, CancellationToken::new());
    let reader = tokio::spawn(receiver.collect());
    let mut stream = ZiCachingWriteStream::open(Box::new(output), Some(target.clone()), 8).await;
    assert!(!stream.is_caching());

    stream.write(Bytes::from_static(b"a,b\r\n")).await.unwrap();
    stream.end().await.unwrap();

    assert_eq!(stream.state(), ZiCacheState::Completed);
    assert_eq!(reader.await.unwrap().unwrap(), b"a,b\r\n");
    assert!(!target.exists());
    assert!(stream.artifact().is_none());
}

/// Tests that partial files left by an earlier crash do not stop the cache being written.
#[tokio::test]
async fn test_stale_partial_does_not_block_cache() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("k.csv");
    std::fs::write(dir.path().join(".k.csv.partial"), b"crashed").unwrap();
    std::fs::write(dir.path().join(".k.csv.x7Qz9a.partial"), b"crashed").unwrap();

    for round in 0..2 {
        let (output, receiver) = ZiResponseWriteStream::channel(8, CancellationToken::new());
        let reader = tokio::spawn(receiver.collect());
        let mut stream = ZiCachingWriteStream::open(Box::new(output), Some(target.clone()), 8).await;
        assert!(stream.is_caching());
        let body = format!("round {round}\r\n");
        stream.write(Bytes::from(body.clone())).await.unwrap();
        stream.end().await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), body.as_bytes());
        assert_eq!(std::fs::read(&target).unwrap(), body.as_bytes());
    }
    assert_eq!(
        entries(dir.path()),
        vec![".k.csv.partial".to_string(), ".k.csv.x7Qz9a.partial".to_string(), "k.csv".to_string()]
    );
}

/// Tests that a failing cache write drops the cache but completes the response.
#[tokio::test]
async fn test_cache_write_failure_keeps_response() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("r.csv");
    let partial = dir.path().join(".r.csv.test.partial");
    std::fs::write(&partial, b"").unwrap();

    let (output, receiver) = ZiResponseWriteStream::channel(8, CancellationToken::new());
    let reader = tokio::spawn(receiver.collect());
    let cache = Box::new(FailingSink::on_write(3));
    let mut stream =
        ZiCachingWriteStream::with_cache_sink(Box::new(output), cache, &partial, &target, 8);

    let mut expected = Vec::new();
    for chunk in chunks() {
        if stream.write_queue_full() {
            stream.drain().await.unwrap();
        }
        expected.extend_from_slice(&chunk);
        stream.write(chunk).await.unwrap();
    }
    assert!(!stream.is_caching());
    stream.end().await.unwrap();

    assert_eq!(stream.state(), ZiCacheState::Completed);
    assert_eq!(reader.await.unwrap().unwrap(), expected);
    assert!(stream.artifact().is_none());
    assert_absent(&target);
}

/// Tests that a cache sink failing to finish leaves no artifact and no partial.
#[tokio::test]
async fn test_cache_end_failure_keeps_response() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("r.json");
    let partial = dir.path().join(".r.json.test.partial");
    std::fs::write(&partial, b"[").unwrap();

    let (output, receiver) = ZiResponseWriteStream::channel(8, CancellationToken::new());
    let reader = tokio::spawn(receiver.collect());
    let cache = Box::new(FailingSink::on_end());
    let mut stream =
        ZiCachingWriteStream::with_cache_sink(Box::new(output), cache, &partial, &target, 8);

    stream.write(Bytes::from_static(b"[1,2]")).await.unwrap();
    stream.end().await.unwrap();

    assert_eq!(stream.state(), ZiCacheState::Completed);
    assert_eq!(reader.await.unwrap().unwrap(), b"[1,2]");
    assert!(stream.artifact().is_none());
    assert_absent(&target);
}

/// Tests that the stream reports full while the response is not read, and drains once it is.
#[tokio::test]
async fn test_full_until_response_reads() {
    let (output, mut receiver) = ZiResponseWriteStream::channel(2, CancellationToken::new());
    let mut stream = ZiCachingWriteStream::open(Box::new(output), None, 2).await;

    stream.write(Bytes::from_static(b"one")).await.unwrap();
    assert!(!stream.write_queue_full());
    stream.write(Bytes::from_static(b"two")).await.unwrap();
    assert!(stream.write_queue_full());

    let drained = tokio::spawn(async move {
        stream.drain().await.unwrap();
        stream
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!drained.is_finished());

    assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"one"));
    let stream = tokio::time::timeout(Duration::from_secs(1), drained)
        .await
        .unwrap()
        .unwrap();
    assert!(!stream.write_queue_full());
}

/// Tests that a file stream never overwrites an existing file.
#[tokio::test]
async fn test_file_stream_is_create_new() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exists.bin");
    std::fs::write(&path, b"keep").unwrap();
    assert!(ZiFileWriteStream::create_new(&path, 4).await.is_err());

    let fresh = dir.path().join("fresh.bin");
    let mut stream = ZiFileWriteStream::create_new(&fresh, 4).await.unwrap();
    stream.write(Bytes::from_static(b"abc")).await.unwrap();
    stream.end().await.unwrap();
    assert_eq!(std::fs::read(&fresh).unwrap(), b"abc");
    assert_eq!(std::fs::read(&path).unwrap(), b"keep");
}
