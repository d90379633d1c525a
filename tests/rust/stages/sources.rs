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

//! # Ziq Stage Tests - Sources
//!
//! Static and generated sources, the endpoint source over an in-memory
//! driver, and dynamic endpoint resolution.
//!
//! ```bash
//! cargo test --test sources
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use ziq::argument::ZiArgumentInstance;
use ziq::sources::dynamic::{ZiDynamicEndpointResolver, ZiEndpointFields};
use ziq::sources::endpoint::{ZiConnectors, ZiEndpointConnector, ZiEndpointSource, ZiRowCursor};
use ziq::sources::static_source::{static_source_factory, ZiStaticSource};
use ziq::sources::test_source::{test_source_factory, ZiTestSource, ZiTestSourceProbe};
use ziq::{
    Result, ZiBlockingPool, ZiColumnDefn, ZiDataRow, ZiDataType, ZiDynamicEndpointPolicy, ZiEndpoint,
    ZiError, ZiPipelineContext, ZiRequestContext, ZiSource, ZiValue,
};

fn context(endpoints: Vec<ZiEndpoint>) -> ZiPipelineContext {
    let endpoints = endpoints.into_iter().map(|e| (e.key.clone(), e)).collect();
    ZiPipelineContext::new(ZiRequestContext::new("s-1", "/sources"), HashMap::new(), endpoints)
}

async fn drain(source: &mut dyn ZiSource) -> Result<Vec<ZiDataRow>> {
    let mut rows = Vec::new();
    while let Some(row) = source.next().await? {
        rows.push(row);
    }
    Ok(rows)
}

/// Tests that static literals are converted to their column types.
#[tokio::test]
async fn test_static_source_types_literals() {
    let mut source = static_source_factory(&json!({
        "types": [{"name": "id", "type": "Long"}, {"name": "when", "type": "Date"}],
        "rows": [[1, "2024-01-02"], [2]]
    }))
    .unwrap();
    let types = source.initialize(&context(vec![])).await.unwrap();
    assert_eq!(types.get("id"), Some(ZiDataType::Long));

    let rows = drain(source.as_mut()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&ZiValue::Long(1)));
    assert_eq!(rows[0].get("when").unwrap().to_string(), "2024-01-02");
    assert!(rows[1].get("when").unwrap().is_null());
}

/// Tests that an unconvertible literal is rejected when the source is built.
#[test]
fn test_static_source_rejects_bad_literal() {
    let columns = vec![ZiColumnDefn::new("n", ZiDataType::Integer)];
    let err = ZiStaticSource::new(columns, &[vec![json!("many")]]).unwrap_err();
    assert!(matches!(err, ZiError::Validation { .. }));
}

/// Tests the generated source and its probe.
#[tokio::test]
async fn test_generated_rows() {
    let probe = ZiTestSourceProbe::new();
    let mut source = ZiTestSource::new(3).with_name("gen").with_probe(probe.clone());
    let types = source.initialize(&context(vec![])).await.unwrap();
    assert_eq!(types.names(), vec!["value", "name"]);

    let rows = drain(&mut source).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].get("value"), Some(&ZiValue::Integer(2)));
    assert_eq!(rows[0].get("name"), Some(&ZiValue::from("gen")));
    assert_eq!(probe.produced(), 3);

    source.close().await;
    assert!(probe.is_closed());
    assert!(test_source_factory(&json!({})).is_err());
}

struct MemoryCursor {
    rows: VecDeque<ZiDataRow>,
    fetched: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ZiRowCursor for MemoryCursor {
    fn columns(&self) -> Vec<ZiColumnDefn> {
        vec![
            ZiColumnDefn::new("id", ZiDataType::Integer),
            ZiColumnDefn::new("query", ZiDataType::String),
        ]
    }

    fn next_row(&mut self) -> Result<Option<ZiDataRow>> {
        let row = self.rows.pop_front();
        if row.is_some() {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }
        Ok(row)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MemoryConnector {
    rows: usize,
    fetched: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    urls: Mutex<Vec<String>>,
}

impl ZiEndpointConnector for MemoryConnector {
    fn open(
        &self,
        endpoint: &ZiEndpoint,
        query: &str,
        _arguments: &HashMap<String, ZiArgumentInstance>,
    ) -> Result<Box<dyn ZiRowCursor>> {
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(endpoint.url.clone());
        }
        let rows = (0..self.rows)
            .map(|i| {
                let mut row = ZiDataRow::new();
                row.put("id", i as i32).put("query", query);
                row
            })
            .collect();
        Ok(Box::new(MemoryCursor {
            rows,
            fetched: self.fetched.clone(),
            closed: self.closed.clone(),
        }))
    }
}

fn connectors(connector: Arc<MemoryConnector>) -> Arc<ZiConnectors> {
    let mut map: ZiConnectors = HashMap::new();
    map.insert("SQL".to_string(), connector);
    Arc::new(map)
}

/// Tests that the endpoint source fetches in batches on the blocking pool.
#[tokio::test]
async fn test_endpoint_source_batches() {
    let connector = Arc::new(MemoryConnector {
        rows: 7,
        ..Default::default()
    });
    let mut source = ZiEndpointSource::new("main", "select 1", connectors(connector.clone()), ZiBlockingPool::new(2))
        .fetch_size(3);
    let ctx = context(vec![ZiEndpoint::new("main", "mem://main")]);

    let types = source.initialize(&ctx).await.unwrap();
    assert_eq!(types.names(), vec!["id", "query"]);

    let first = source.next().await.unwrap().unwrap();
    assert_eq!(first.get("query"), Some(&ZiValue::from("select 1")));
    assert_eq!(connector.fetched.load(Ordering::SeqCst), 3);

    let rest = drain(&mut source).await.unwrap();
    assert_eq!(rest.len(), 6);
    assert!(connector.closed.load(Ordering::SeqCst));
    assert_eq!(connector.urls.lock().unwrap().as_slice(), ["mem://main".to_string()]);
}

/// Tests that a source naming an unresolved endpoint fails.
#[tokio::test]
async fn test_endpoint_source_unknown_endpoint() {
    let connector = Arc::new(MemoryConnector::default());
    let mut source = ZiEndpointSource::new("missing", "q", connectors(connector), ZiBlockingPool::new(1));
    let err = source.initialize(&context(vec![])).await.unwrap_err();
    assert!(matches!(err, ZiError::Validation { .. }));
    assert!(!err.is_recoverable());
}

fn lookup(rows: Vec<Vec<serde_json::Value>>) -> Box<dyn ZiSource> {
    let columns = vec![
        ZiColumnDefn::new("key", ZiDataType::String),
        ZiColumnDefn::new("url", ZiDataType::String),
        ZiColumnDefn::new("type", ZiDataType::String),
    ];
    Box::new(ZiStaticSource::new(columns, &rows).unwrap())
}

/// Tests that lookup rows become endpoints in the pipeline context.
#[tokio::test]
async fn test_dynamic_endpoints_resolve() {
    let ctx = context(vec![]);
    let resolver = ZiDynamicEndpointResolver::new(ZiEndpointFields::default(), ZiDynamicEndpointPolicy::FailPipeline);
    let source = lookup(vec![
        vec![json!("db1"), json!("mem://one"), json!(null)],
        vec![json!("db2"), json!("mem://two"), json!("NOSQL")],
    ]);
    let added = resolver
        .resolve(&ctx, source, Vec::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(added, 2);
    assert_eq!(ctx.endpoint_keys().await, vec!["db1", "db2"]);
    assert_eq!(ctx.endpoint("db1").await.unwrap().endpoint_type, "SQL");
    assert_eq!(ctx.endpoint("db2").await.unwrap().endpoint_type, "NOSQL");
}

/// Tests both policies for a lookup row without a key.
#[tokio::test]
async fn test_dynamic_endpoint_policies() {
    let rows = || {
        lookup(vec![
            vec![json!(null), json!("mem://orphan"), json!(null)],
            vec![json!("db3"), json!("mem://three"), json!(null)],
        ])
    };

    let ctx = context(vec![]);
    let strict = ZiDynamicEndpointResolver::new(ZiEndpointFields::default(), ZiDynamicEndpointPolicy::FailPipeline);
    let err = strict
        .resolve(&ctx, rows(), Vec::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(ctx.endpoint_keys().await.is_empty());

    let ctx = context(vec![]);
    let lenient = ZiDynamicEndpointResolver::new(ZiEndpointFields::default(), ZiDynamicEndpointPolicy::SkipRow);
    let added = lenient
        .resolve(&ctx, rows(), Vec::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(ctx.warnings(), 1);
    assert!(ctx.endpoint("db3").await.is_ok());
}
