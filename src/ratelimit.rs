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

//! # Ziq Rate Limit Module
//!
//! Admission control for pipeline requests.
//!
//! A [`ZiRateLimitRule`] looks back over a time window at earlier requests
//! that share the current request's scope values (same client IP, same path,
//! ...) and rejects the request when any of three counts is exceeded:
//!
//! | count       | compared to          | rejection reason                                  |
//! |-------------|----------------------|---------------------------------------------------|
//! | outstanding | `concurrency_limit`  | Query already running, please try again later     |
//! | runs        | `run_limit`          | Run too many times, please try again later        |
//! | bytes       | `byte_limit`         | Rate limit exceeded, please try again later       |
//!
//! Every comparison is strictly greater-than, every rejection has status 429.
//! Run and byte limits accept a `k`/`K` (10^3), `M` (10^6) or `G` (10^9)
//! suffix.
//!
//! [`ZiRateLimiter`] keeps the request history in memory and performs the
//! count, the evaluation and the registration of the new request inside one
//! critical section, so two racing requests cannot both slip under a limit.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ZiRequestContext;
use crate::errors::{Result, ZiError};

pub const CONCURRENCY_REJECTION: &str = "Query already running, please try again later";
pub const RUN_REJECTION: &str = "Run too many times, please try again later";
pub const BYTE_REJECTION: &str = "Rate limit exceeded, please try again later";

/// Request attributes a rule can group requests by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZiRateLimitScope {
    ClientIp,
    Host,
    Path,
    Issuer,
    Subject,
    Username,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZiRateLimitRule {
    #[serde(default)]
    pub scope: Vec<ZiRateLimitScope>,
    /// Length of the look-back window.
    #[serde(default)]
    pub time_limit_secs: Option<i64>,
    #[serde(default)]
    pub concurrency_limit: Option<i64>,
    #[serde(default)]
    pub run_limit: Option<String>,
    #[serde(default)]
    pub byte_limit: Option<String>,
}

/// Parses a count such as `"250"`, `"17k"`, `"3M"` or `"13G"`.
pub fn parse_limit(text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('k') | Some('K') => (&text[..text.len() - 1], 1_000u64),
        Some('M') => (&text[..text.len() - 1], 1_000_000u64),
        Some('G') => (&text[..text.len() - 1], 1_000_000_000u64),
        _ => (text, 1u64),
    };
    let value: i64 = digits
        .trim()
        .parse()
        .map_err(|_| ZiError::validation(format!("'{text}' is not a valid limit")))?;
    if value < 0 {
        return Err(ZiError::validation(format!("limit '{text}' is negative")));
    }
    (value as u64)
        .checked_mul(multiplier)
        .ok_or_else(|| ZiError::validation(format!("limit '{text}' is too large")))
}

impl ZiRateLimitRule {
    pub fn new(scope: Vec<ZiRateLimitScope>, time_limit_secs: i64) -> Self {
        Self {
            scope,
            time_limit_secs: Some(time_limit_secs),
            ..Default::default()
        }
    }

    pub fn concurrency_limit(mut self, limit: i64) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn run_limit(mut self, limit: &str) -> Self {
        self.run_limit = Some(limit.to_string());
        self
    }

    pub fn byte_limit(mut self, limit: &str) -> Self {
        self.byte_limit = Some(limit.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scope.is_empty() {
            return Err(ZiError::validation("no scope provided for rate limit rule"));
        }
        match self.time_limit_secs {
            None => return Err(ZiError::validation("no time limit provided for rate limit rule")),
            Some(secs) if secs < 0 => {
                return Err(ZiError::validation("negative time limit provided for rate limit rule"))
            }
            Some(0) => return Err(ZiError::validation("zero time limit provided for rate limit rule")),
            Some(_) => {}
        }
        if matches!(self.concurrency_limit, Some(limit) if limit < 0) {
            return Err(ZiError::validation(
                "negative concurrency limit provided for rate limit rule",
            ));
        }
        self.parsed_run_limit()?;
        self.parsed_byte_limit()?;
        Ok(())
    }

    pub fn parsed_run_limit(&self) -> Result<Option<u64>> {
        self.run_limit.as_deref().map(parse_limit).transpose()
    }

    pub fn parsed_byte_limit(&self) -> Result<Option<u64>> {
        self.byte_limit.as_deref().map(parse_limit).transpose()
    }

    pub fn window(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::seconds)
    }
}

/// Rejects the request when a count exceeds the rule's limit.
pub fn evaluate_rate_limit_rule(
    rule: &ZiRateLimitRule,
    outstanding: u64,
    runs: u64,
    bytes: u64,
    now: DateTime<Utc>,
) -> Result<()> {
    let since = rule.window().map(|w| now - w).unwrap_or(now);
    if let Some(limit) = rule.concurrency_limit {
        if outstanding as i128 > limit as i128 {
            log::error!(
                "ratelimit.concurrency: concurrency limit exceeded - outstanding={}, limit={}, since={}",
                outstanding,
                limit,
                since
            );
            return Err(ZiError::rate_limited(CONCURRENCY_REJECTION));
        }
    }
    if let Some(limit) = rule.parsed_run_limit()? {
        if runs > limit {
            log::error!(
                "ratelimit.runs: run limit exceeded - runs={}, limit={}, since={}",
                runs,
                limit,
                since
            );
            return Err(ZiError::rate_limited(RUN_REJECTION));
        }
    }
    if let Some(limit) = rule.parsed_byte_limit()? {
        if bytes > limit {
            log::error!(
                "ratelimit.bytes: byte limit exceeded - bytes={}, limit={}, since={}",
                bytes,
                limit,
                since
            );
            return Err(ZiError::rate_limited(BYTE_REJECTION));
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
struct ZiRequestHistory {
    request_id: String,
    timestamp: DateTime<Utc>,
    client_ip: Option<String>,
    host: Option<String>,
    path: Option<String>,
    issuer: Option<String>,
    subject: Option<String>,
    username: Option<String>,
    completed: bool,
    response_bytes: u64,
}

impl ZiRequestHistory {
    fn from_request(request: &ZiRequestContext, now: DateTime<Utc>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            timestamp: now,
            client_ip: request.client_ip.clone(),
            host: request.host.clone(),
            path: Some(request.path.clone()),
            issuer: request.issuer.clone(),
            subject: request.subject.clone(),
            username: request.username.clone(),
            completed: false,
            response_bytes: 0,
        }
    }

    fn matches(&self, request: &ZiRequestContext, scopes: &[ZiRateLimitScope]) -> bool {
        fn same(current: Option<&String>, recorded: &Option<String>) -> bool {
            matches!((current, recorded), (Some(a), Some(b)) if a == b)
        }
        scopes.iter().all(|scope| match scope {
            ZiRateLimitScope::ClientIp => same(request.client_ip.as_ref(), &self.client_ip),
            ZiRateLimitScope::Host => same(request.host.as_ref(), &self.host),
            ZiRateLimitScope::Path => same(Some(&request.path), &self.path),
            ZiRateLimitScope::Issuer => same(request.issuer.as_ref(), &self.issuer),
            ZiRateLimitScope::Subject => same(request.subject.as_ref(), &self.subject),
            ZiRateLimitScope::Username => same(request.username.as_ref(), &self.username),
        })
    }
}

/// Counts of earlier matching requests within a rule's window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZiRateLimitCounts {
    pub outstanding: u64,
    pub runs: u64,
    pub bytes: u64,
}

/// In-memory request history with atomic admission.
pub struct ZiRateLimiter {
    history: Mutex<Vec<ZiRequestHistory>>,
    retention: Duration,
}

impl ZiRateLimiter {
    pub fn new(retention_secs: u64) -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            retention: Duration::seconds(retention_secs.min(i64::MAX as u64) as i64),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ZiRequestHistory>>> {
        self.history
            .lock()
            .map_err(|_| ZiError::internal("rate limiter history poisoned"))
    }

    pub fn admit(&self, request: &ZiRequestContext, rules: &[ZiRateLimitRule]) -> Result<()> {
        self.admit_at(request, rules, Utc::now())
    }

    /// Evaluates every rule and, if all pass, records the request as outstanding.
    pub fn admit_at(
        &self,
        request: &ZiRequestContext,
        rules: &[ZiRateLimitRule],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut history = self.lock()?;
        let horizon = now - self.retention;
        history.retain(|row| !row.completed || row.timestamp >= horizon);

        for (index, rule) in rules.iter().enumerate() {
            let Some(window) = rule.window() else {
                continue;
            };
            let counts = count(&history, request, rule, now - window);
            log::debug!(
                "ratelimit.check: evaluating rule - request_id={}, rule={}, outstanding={}, runs={}, bytes={}",
                request.request_id,
                index,
                counts.outstanding,
                counts.runs,
                counts.bytes
            );
            evaluate_rate_limit_rule(rule, counts.outstanding, counts.runs, counts.bytes, now)?;
        }

        history.push(ZiRequestHistory::from_request(request, now));
        Ok(())
    }

    /// Marks a request finished with the number of bytes it sent.
    pub fn complete(&self, request_id: &str, response_bytes: u64) -> Result<()> {
        let mut history = self.lock()?;
        match history.iter_mut().rev().find(|r| r.request_id == request_id) {
            Some(row) => {
                row.completed = true;
                row.response_bytes = response_bytes;
            }
            None => log::info!(
                "ratelimit.complete: request not found in history - request_id={}, history={}",
                request_id,
                history.len()
            ),
        }
        Ok(())
    }

    /// Counts for `rule` as the next request would see them.
    pub fn counts(&self, request: &ZiRequestContext, rule: &ZiRateLimitRule) -> Result<ZiRateLimitCounts> {
        let history = self.lock()?;
        let now = Utc::now();
        let start = rule.window().map(|w| now - w).unwrap_or(now);
        Ok(count(&history, request, rule, start))
    }

    pub fn outstanding(&self) -> Result<usize> {
        Ok(self.lock()?.iter().filter(|r| !r.completed).count())
    }
}

fn count(
    history: &[ZiRequestHistory],
    request: &ZiRequestContext,
    rule: &ZiRateLimitRule,
    start: DateTime<Utc>,
) -> ZiRateLimitCounts {
    let mut counts = ZiRateLimitCounts::default();
    for row in history {
        if row.timestamp < start || row.request_id == request.request_id {
            continue;
        }
        if !row.matches(request, &rule.scope) {
            continue;
        }
        counts.runs += 1;
        if row.completed {
            counts.bytes += row.response_bytes;
        } else {
            counts.outstanding += 1;
        }
    }
    counts
}
