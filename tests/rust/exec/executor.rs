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

//! # Ziq Execution Tests - Executor
//!
//! Whole requests served through [`ZiPipelineExecutor::execute`]: stage
//! lookup, argument conditions, caching, rate limits and audit records.
//!
//! ```bash
//! cargo test --test executor
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ziq::argument::{ZiArgumentDefn, ZiArgumentInstance, ZiArgumentType};
use ziq::ratelimit::CONCURRENCY_REJECTION;
use ziq::sources::dynamic::ZiEndpointFields;
use ziq::sources::endpoint::{ZiEndpointConnector, ZiRowCursor};
use ziq::{
    Result, ZiAuditSink, ZiColumnDefn, ZiDataRow, ZiDataType, ZiDynamicEndpointDefn, ZiEndpoint,
    ZiEngineConfig, ZiError, ZiFormatRequest, ZiMemoryAuditSink, ZiPipelineDefn, ZiPipelineExecutor,
    ZiRateLimitRule, ZiRateLimitScope, ZiRequestContext, ZiResponseWriteStream, ZiRunSummary,
    ZiStageDefn,
};

struct Served {
    result: Result<ZiRunSummary>,
    body: Result<Vec<u8>>,
}

async fn serve(
    executor: &ZiPipelineExecutor,
    defn: &ZiPipelineDefn,
    request: ZiRequestContext,
    format: ZiFormatRequest,
) -> Served {
    let cancel = CancellationToken::new();
    let (output, receiver) = ZiResponseWriteStream::channel(8, cancel.clone());
    let reader: JoinHandle<Result<Vec<u8>>> = tokio::spawn(receiver.collect());
    let result = executor
        .execute(defn, request, HashMap::new(), &format, Box::new(output), cancel)
        .await;
    let body = reader.await.unwrap();
    Served { result, body }
}

fn report_defn() -> ZiPipelineDefn {
    ZiPipelineDefn::new(ZiStageDefn::new("test", json!({"row_count": 1000})))
        .processor(ZiStageDefn::new("limit", json!({"count": 100})))
        .format(ZiStageDefn::new("delimited", json!({})))
        .format(ZiStageDefn::new("json", json!({})))
        .cache_duration_secs(300)
}

fn cache_files(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// Tests a full request: body, cache artifact, audit record and history.
#[tokio::test]
async fn test_execute_writes_response_and_cache() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(ZiMemoryAuditSink::new());
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new().output_cache_dir(dir.path()))
        .with_audit_sink(audit.clone());

    let served = serve(
        &executor,
        &report_defn(),
        ZiRequestContext::new("e-1", "/report").client_ip("10.1.1.1"),
        ZiFormatRequest::new(),
    )
    .await;
    let summary = served.result.unwrap();
    let body = served.body.unwrap();

    assert_eq!(summary.rows, 100);
    assert_eq!(summary.bytes, body.len() as u64);
    assert_eq!(String::from_utf8(body.clone()).unwrap().lines().count(), 101);

    let files = cache_files(dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().and_then(|e| e.to_str()), Some("csv"));
    assert_eq!(std::fs::read(&files[0]).unwrap(), body);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 200);
    assert_eq!(records[0].rows, 100);
    assert_eq!(records[0].bytes, body.len() as u64);
    assert_eq!(executor.rate_limiter().outstanding().unwrap(), 0);
}

/// Tests that the requested format is served and cached under its own name.
#[tokio::test]
async fn test_execute_selects_requested_format() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new().output_cache_dir(dir.path()));
    let defn = report_defn();

    let served = serve(
        &executor,
        &defn,
        ZiRequestContext::new("e-2", "/report"),
        ZiFormatRequest::new().extension("json"),
    )
    .await;
    served.result.unwrap();
    let rows: serde_json::Value = serde_json::from_slice(&served.body.unwrap()).unwrap();
    assert_eq!(rows.as_array().map(Vec::len), Some(100));

    serve(&executor, &defn, ZiRequestContext::new("e-3", "/report"), ZiFormatRequest::new())
        .await
        .result
        .unwrap();
    assert_eq!(cache_files(dir.path()).len(), 2);
}

/// Tests that a repeat request is answered from the artifact until it expires.
#[tokio::test]
async fn test_execute_serves_repeat_request_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(ZiMemoryAuditSink::new());
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new().output_cache_dir(dir.path()))
        .with_audit_sink(audit.clone());
    let defn = report_defn();

    let first = serve(&executor, &defn, ZiRequestContext::new("c-1", "/report"), ZiFormatRequest::new()).await;
    assert!(!first.result.unwrap().from_cache);
    let artifact = cache_files(dir.path()).remove(0);
    std::fs::write(&artifact, b"from,cache\r\n").unwrap();

    let second = serve(&executor, &defn, ZiRequestContext::new("c-2", "/report"), ZiFormatRequest::new()).await;
    let summary = second.result.unwrap();
    assert_eq!(second.body.unwrap(), b"from,cache\r\n");
    assert!(summary.from_cache);
    assert_eq!(summary.rows, 100);
    assert_eq!(summary.bytes, 12);

    let records = audit.records();
    assert_eq!(records.len(), 2);
    assert!(!records[0].from_cache);
    assert!(records[1].from_cache);
    assert_eq!(records[1].status, 200);
    assert_eq!(executor.rate_limiter().outstanding().unwrap(), 0);

    let index = executor.cache_index();
    assert!(index.lookup(&artifact, Utc::now()).is_some());
    assert!(index.lookup(&artifact, Utc::now() + Duration::seconds(301)).is_none());
}

/// Tests that an artifact deleted behind the index's back is regenerated.
#[tokio::test]
async fn test_execute_regenerates_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new().output_cache_dir(dir.path()));
    let defn = report_defn();

    let first = serve(&executor, &defn, ZiRequestContext::new("m-1", "/report"), ZiFormatRequest::new()).await;
    let expected = first.body.unwrap();
    let artifact = cache_files(dir.path()).remove(0);
    std::fs::remove_file(&artifact).unwrap();

    let second = serve(&executor, &defn, ZiRequestContext::new("m-2", "/report"), ZiFormatRequest::new()).await;
    let summary = second.result.unwrap();
    assert!(!summary.from_cache);
    assert_eq!(second.body.unwrap(), expected);
    assert_eq!(std::fs::read(&artifact).unwrap(), expected);
    assert_eq!(executor.cache_index().len(), 1);
}

/// Tests that a definition without a cache duration never writes or reads the cache.
#[tokio::test]
async fn test_execute_without_cache_duration() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new().output_cache_dir(dir.path()));
    let defn = ZiPipelineDefn {
        cache_duration_secs: None,
        ..report_defn()
    };

    for id in ["n-1", "n-2"] {
        let served = serve(&executor, &defn, ZiRequestContext::new(id, "/report"), ZiFormatRequest::new()).await;
        assert!(!served.result.unwrap().from_cache);
    }
    assert!(cache_files(dir.path()).is_empty());
    assert!(executor.cache_index().is_empty());
}

/// Tests that a caller holding a still-valid copy gets an empty 304 answer.
#[tokio::test]
async fn test_execute_not_modified_since() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(ZiMemoryAuditSink::new());
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new().output_cache_dir(dir.path()))
        .with_audit_sink(audit.clone());
    let defn = report_defn();

    serve(&executor, &defn, ZiRequestContext::new("i-1", "/report"), ZiFormatRequest::new())
        .await
        .result
        .unwrap();
    let request = ZiRequestContext::new("i-2", "/report").if_modified_since(Utc::now());
    let served = serve(&executor, &defn, request, ZiFormatRequest::new()).await;
    let summary = served.result.unwrap();

    assert!(served.body.unwrap().is_empty());
    assert!(summary.not_modified);
    assert_eq!(summary.bytes, 0);
    assert_eq!(audit.records()[1].status, 304);
}

/// Tests that a request over its concurrency limit is rejected with 429.
#[tokio::test]
async fn test_execute_rate_limited() {
    let audit = Arc::new(ZiMemoryAuditSink::new());
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new()).with_audit_sink(audit.clone());
    let rule = ZiRateLimitRule::new(vec![ZiRateLimitScope::ClientIp], 60).concurrency_limit(0);
    let defn = report_defn().rate_limit_rule(rule.clone());

    let running = ZiRequestContext::new("busy", "/report").client_ip("10.2.2.2");
    executor.rate_limiter().admit(&running, &[rule]).unwrap();

    let served = serve(
        &executor,
        &defn,
        ZiRequestContext::new("second", "/report").client_ip("10.2.2.2"),
        ZiFormatRequest::new(),
    )
    .await;
    let err = served.result.unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert_eq!(err.to_string(), CONCURRENCY_REJECTION);
    assert!(served.body.is_err());
    assert_eq!(audit.records()[0].status, 429);

    executor.rate_limiter().complete("busy", 0).unwrap();
    let served = serve(
        &executor,
        &defn,
        ZiRequestContext::new("third", "/report").client_ip("10.2.2.2"),
        ZiFormatRequest::new(),
    )
    .await;
    assert_eq!(served.result.unwrap().rows, 100);
}

/// Tests that processor conditions follow argument presence.
#[tokio::test]
async fn test_execute_processor_condition() {
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new());
    let defn = ZiPipelineDefn::new(ZiStageDefn::new("test", json!({"row_count": 20})))
        .argument(ZiArgumentDefn::new("sample", ZiArgumentType::Integer).optional())
        .processor(ZiStageDefn::new("limit", json!({"count": 5})).condition("args.sample"))
        .format(ZiStageDefn::new("json", json!({})));

    let without = serve(&executor, &defn, ZiRequestContext::new("c-1", "/c"), ZiFormatRequest::new()).await;
    assert_eq!(without.result.unwrap().rows, 20);

    let with = serve(
        &executor,
        &defn,
        ZiRequestContext::new("c-2", "/c").arg("sample", "1"),
        ZiFormatRequest::new(),
    )
    .await;
    assert_eq!(with.result.unwrap().rows, 5);

    let invalid = serve(
        &executor,
        &defn,
        ZiRequestContext::new("c-3", "/c").arg("sample", "lots"),
        ZiFormatRequest::new(),
    )
    .await;
    assert_eq!(invalid.result.unwrap_err().status_code(), 400);
    assert_eq!(executor.rate_limiter().outstanding().unwrap(), 0);
}

/// Tests the errors for unknown stages and unsupported formats.
#[tokio::test]
async fn test_execute_rejects_unknown_stages() {
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new());

    let served = serve(
        &executor,
        &report_defn(),
        ZiRequestContext::new("u-1", "/u"),
        ZiFormatRequest::new().name("xlsx"),
    )
    .await;
    assert!(matches!(served.result.unwrap_err(), ZiError::Validation { .. }));

    let defn = ZiPipelineDefn::new(ZiStageDefn::new("test", json!({"row_count": 1})))
        .processor(ZiStageDefn::new("pivot", json!({})))
        .format(ZiStageDefn::new("json", json!({})));
    let served = serve(&executor, &defn, ZiRequestContext::new("u-2", "/u"), ZiFormatRequest::new()).await;
    let err = served.result.unwrap_err();
    assert!(err.to_string().contains("pivot"));

    let no_formats = ZiPipelineDefn::new(ZiStageDefn::new("test", json!({"row_count": 1})));
    let served = serve(&executor, &no_formats, ZiRequestContext::new("u-3", "/u"), ZiFormatRequest::new()).await;
    assert!(served.result.is_err());
    assert!(served.body.is_err());
}

struct ReportCursor {
    rows: VecDeque<ZiDataRow>,
}

impl ZiRowCursor for ReportCursor {
    fn columns(&self) -> Vec<ZiColumnDefn> {
        vec![
            ZiColumnDefn::new("n", ZiDataType::Integer),
            ZiColumnDefn::new("origin", ZiDataType::String),
        ]
    }

    fn next_row(&mut self) -> Result<Option<ZiDataRow>> {
        Ok(self.rows.pop_front())
    }
}

#[derive(Default)]
struct ReportConnector {
    opened: Mutex<Vec<String>>,
}

impl ZiEndpointConnector for ReportConnector {
    fn open(
        &self,
        endpoint: &ZiEndpoint,
        _query: &str,
        _arguments: &HashMap<String, ZiArgumentInstance>,
    ) -> Result<Box<dyn ZiRowCursor>> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(endpoint.url.clone());
        }
        let rows = (0..4i32)
            .map(|n| {
                let mut row = ZiDataRow::new();
                row.put("n", n).put("origin", endpoint.url.as_str());
                row
            })
            .collect();
        Ok(Box::new(ReportCursor { rows }))
    }
}

/// Tests an endpoint source whose endpoint comes from a lookup pipeline.
#[tokio::test]
async fn test_execute_dynamic_endpoint_source() {
    let connector = Arc::new(ReportConnector::default());
    let mut executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new());
    executor.register_connector("SQL", connector.clone());

    let lookup = ZiDynamicEndpointDefn {
        source: ZiStageDefn::new(
            "static",
            json!({
                "types": [{"name": "key", "type": "String"}, {"name": "url", "type": "String"}],
                "rows": [["warehouse", "mem://warehouse"]]
            }),
        ),
        processors: Vec::new(),
        fields: ZiEndpointFields::default(),
    };
    let defn = ZiPipelineDefn::new(ZiStageDefn::new(
        "endpoint",
        json!({"endpoint": "warehouse", "query": "select n", "fetch_size": 3}),
    ))
    .dynamic_endpoint(lookup)
    .format(ZiStageDefn::new("json", json!({})));

    let served = serve(&executor, &defn, ZiRequestContext::new("d-1", "/d"), ZiFormatRequest::new()).await;
    assert_eq!(served.result.unwrap().rows, 4);
    let rows: serde_json::Value = serde_json::from_slice(&served.body.unwrap()).unwrap();
    assert_eq!(rows[3]["origin"], json!("mem://warehouse"));
    assert_eq!(connector.opened.lock().unwrap().as_slice(), ["mem://warehouse".to_string()]);
}

/// Tests a definition loaded from YAML with a conditional filter.
#[tokio::test]
async fn test_execute_yaml_definition() {
    let defn = ZiPipelineDefn::from_yaml_str(
        r#"
arguments:
  - name: minimum
    type: Integer
    optional: true
source:
  type: test
  config: { row_count: 1000 }
processors:
  - type: filter
    condition: args.minimum
    config: { field: value, op: ge, value: 10 }
  - type: limit
    config: { count: 100 }
formats:
  - type: delimited
rate_limit_rules:
  - scope: [path]
    time_limit_secs: 60
    run_limit: 1k
"#,
    )
    .unwrap();
    assert_eq!(defn.rate_limit_rules.len(), 1);
    let executor = ZiPipelineExecutor::with_defaults(ZiEngineConfig::new());

    let plain = serve(&executor, &defn, ZiRequestContext::new("y-1", "/y"), ZiFormatRequest::new()).await;
    let plain = String::from_utf8(plain.body.unwrap()).unwrap();
    assert!(plain.lines().nth(1).unwrap().starts_with("0,"));

    let filtered = serve(
        &executor,
        &defn,
        ZiRequestContext::new("y-2", "/y").arg("minimum", "1"),
        ZiFormatRequest::new(),
    )
    .await;
    assert_eq!(filtered.result.unwrap().rows, 100);
    let filtered = String::from_utf8(filtered.body.unwrap()).unwrap();
    assert!(filtered.lines().nth(1).unwrap().starts_with("10,"));

    let counts = executor
        .rate_limiter()
        .counts(&ZiRequestContext::new("y-3", "/y"), &defn.rate_limit_rules[0])
        .unwrap();
    assert_eq!(counts.runs, 2);
    assert_eq!(counts.outstanding, 0);
}

/// Tests that the audit sink trait object can be shared with the caller.
#[test]
fn test_audit_sink_is_object_safe() {
    let sink: Arc<dyn ZiAuditSink> = Arc::new(ZiMemoryAuditSink::new());
    let _executor = ZiPipelineExecutor::new(ZiEngineConfig::new()).with_audit_sink(sink);
}
