//! Generic rate-limited HTTP client (`SPEC_FULL.md` §4.1, component C1).
//!
//! One instance per external service. The middleware chain is: acquire a
//! rate-limit token, issue the request under a per-service timeout, retry
//! transparently on 429 with exponential backoff capped at
//! `max_retry_attempts`, and surface any other 4xx/5xx as a typed error
//! carrying the status and decoded body. Every call — success or failure —
//! is recorded in the API call tracker.

use crate::rate_limiter::RateLimiter;
use reqwest::{Method, StatusCode};
use sa_core::{Error, Result};
use sa_tracking::ApiCallTracker;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    default_headers: Vec<(String, String)>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    service_name: String,
    tracker: Option<Arc<ApiCallTracker>>,
}

impl HttpClient {
    pub fn new(
        service_name: impl Into<String>,
        base_url: impl Into<String>,
        default_headers: Vec<(String, String)>,
        rate_limit_calls: usize,
        rate_limit_period: Duration,
        retry: RetryPolicy,
        tracker: Option<Arc<ApiCallTracker>>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            default_headers,
            limiter: RateLimiter::new(rate_limit_calls, rate_limit_period),
            retry,
            service_name: service_name.into(),
            tracker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.execute(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.execute(Method::DELETE, path, &[], None).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;
            let started = Instant::now();
            let mut req = self
                .http
                .request(method.clone(), self.url(path))
                .timeout(self.retry.request_timeout);
            for (k, v) in &self.default_headers {
                req = req.header(k, v);
            }
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = &body {
                req = req.json(body);
            }

            let send_result = req.send().await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match send_result {
                Err(e) => {
                    self.record(method.as_str(), path, 0, duration_ms, Some(e.to_string()))
                        .await;
                    return Err(Error::from(e));
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.record(method.as_str(), path, status.as_u16(), duration_ms, None)
                            .await;
                        attempt += 1;
                        if attempt > self.retry.max_attempts {
                            return Err(Error::RateLimited);
                        }
                        let backoff = Duration::from_secs(2u64.saturating_pow(attempt).min(60));
                        tracing::warn!(service = %self.service_name, path, attempt, "429 received, backing off");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        self.record(method.as_str(), path, status.as_u16(), duration_ms, None)
                            .await;
                        return Ok(serde_json::from_str(&text).unwrap_or(Value::Null));
                    }

                    self.record(
                        method.as_str(),
                        path,
                        status.as_u16(),
                        duration_ms,
                        Some(text.clone()),
                    )
                    .await;
                    return Err(Error::Http {
                        status: status.as_u16(),
                        body: text,
                    });
                }
            }
        }
    }

    async fn record(
        &self,
        method: &str,
        path: &str,
        status: u16,
        duration_ms: u64,
        error: Option<String>,
    ) {
        if let Some(tracker) = &self.tracker {
            tracker
                .record(
                    &self.service_name,
                    method,
                    path,
                    status,
                    duration_ms,
                    error,
                    None,
                    None,
                    None,
                )
                .await;
        }
    }

    /// Page-based paginator: `?page=N&limit=<page_size>` until an empty page.
    /// Duplicate `key_field` values across pages keep the **last** occurrence
    /// (`SPEC_FULL.md` §4.1).
    pub async fn list_all(&self, path: &str, key_field: &str, page_size: u32) -> Result<Vec<Value>> {
        let mut ordered: BTreeMap<String, Value> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut page = 1u32;
        loop {
            let page_str = page.to_string();
            let limit_str = page_size.to_string();
            let query = [("page", page_str.as_str()), ("limit", limit_str.as_str())];
            let response = self.get(path, &query).await?;
            let rows = extract_rows(&response);
            if rows.is_empty() {
                break;
            }
            for row in rows {
                let key = row
                    .get(key_field)
                    .map(value_to_key)
                    .unwrap_or_else(|| format!("__no_key_{page}_{}", order.len()));
                if !ordered.contains_key(&key) {
                    order.push(key.clone());
                }
                ordered.insert(key, row);
            }
            page += 1;
        }
        Ok(order.into_iter().filter_map(|k| ordered.remove(&k)).collect())
    }

    /// Cursor-based paginator (Samsara style): `after=<endCursor>&limit=100`
    /// until the response reports no further pages.
    pub async fn list_all_cursor(&self, path: &str, limit: u32) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let limit_str = limit.to_string();
            let mut query = vec![("limit", limit_str.as_str())];
            if let Some(c) = cursor.as_deref() {
                query.push(("after", c));
            }
            let response = self.get(path, &query).await?;
            let rows = extract_rows(&response);
            if rows.is_empty() {
                break;
            }
            out.extend(rows);

            let has_next = response
                .get("pagination")
                .and_then(|p| p.get("hasNextPage"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let next_cursor = response
                .get("pagination")
                .and_then(|p| p.get("endCursor"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_next || next_cursor.is_none() {
                break;
            }
            cursor = next_cursor;
        }
        Ok(out)
    }
}

fn extract_rows(response: &Value) -> Vec<Value> {
    match response.get("data").and_then(Value::as_array) {
        Some(arr) => arr.clone(),
        None => response.as_array().cloned().unwrap_or_default(),
    }
}

fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Depth-first flatten of a hierarchical endpoint's tree (site clusters):
/// each node's `children_field` is enqueued for further traversal and then
/// discarded from the node itself (`SPEC_FULL.md` §4.1).
pub fn flatten_tree(nodes: Vec<Value>, children_field: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut stack: Vec<Value> = nodes.into_iter().rev().collect();
    while let Some(mut node) = stack.pop() {
        if let Value::Object(map) = &mut node {
            if let Some(children) = map.remove(children_field) {
                if let Value::Array(children) = children {
                    for child in children.into_iter().rev() {
                        stack.push(child);
                    }
                }
            }
        }
        out.push(node);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_tree_is_depth_first_and_drops_children_key() {
        let tree = vec![json!({
            "id": 1,
            "children": [
                {"id": 2, "children": [{"id": 4, "children": []}]},
                {"id": 3, "children": []}
            ]
        })];
        let flat = flatten_tree(tree, "children");
        let ids: Vec<i64> = flat.iter().map(|v| v["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert!(flat.iter().all(|v| v.get("children").is_none()));
    }

    #[test]
    fn extract_rows_handles_envelope_and_bare_array() {
        assert_eq!(extract_rows(&json!({"data": [1, 2]})), vec![json!(1), json!(2)]);
        assert_eq!(extract_rows(&json!([1, 2])), vec![json!(1), json!(2)]);
        assert!(extract_rows(&json!({"data": []})).is_empty());
    }
}
