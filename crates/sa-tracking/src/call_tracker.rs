//! API call tracker (`SPEC_FULL.md` §4.9, component C9): a bounded Redis list
//! of recent outbound HTTP calls. Never raises — when Redis is unavailable,
//! both `record` and `recent` are no-ops.

use chrono::Utc;
use redis::aio::ConnectionManager;
use sa_core::models::{ApiCallRecord, ApiCallStats};
use tokio::sync::Mutex;
use uuid::Uuid;

const LIST_KEY: &str = "safetyamp:api_calls";
const SUMMARY_LEN: usize = 200;

pub struct ApiCallTracker {
    conn: Mutex<ConnectionManager>,
    max_entries: usize,
}

#[derive(Default, Clone)]
pub struct RecentFilters<'a> {
    pub service: Option<&'a str>,
    pub method: Option<&'a str>,
    pub errors_only: bool,
    pub correlation_id: Option<&'a str>,
}

impl ApiCallTracker {
    pub fn new(conn: ConnectionManager, max_entries: usize) -> Self {
        Self {
            conn: Mutex::new(conn),
            max_entries,
        }
    }

    pub fn truncate_summary(value: &str) -> String {
        value.chars().take(SUMMARY_LEN).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        service: &str,
        method: &str,
        endpoint: &str,
        status_code: u16,
        duration_ms: u64,
        error_message: Option<String>,
        correlation_id: Option<String>,
        request_summary: Option<String>,
        response_summary: Option<String>,
    ) {
        use redis::AsyncCommands;
        let record = ApiCallRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            service: service.to_string(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status_code,
            duration_ms,
            error_message,
            correlation_id,
            request_summary: request_summary.map(|s| Self::truncate_summary(&s)),
            response_summary: response_summary.map(|s| Self::truncate_summary(&s)),
        };
        let Ok(raw) = serde_json::to_string(&record) else {
            return;
        };
        let mut conn = self.conn.lock().await;
        let pipeline_result: redis::RedisResult<()> = redis::pipe()
            .lpush(LIST_KEY, raw)
            .ltrim(LIST_KEY, 0, self.max_entries as isize - 1)
            .query_async(&mut *conn)
            .await;
        if let Err(e) = pipeline_result {
            tracing::debug!(error = %e, "api call tracker unavailable, dropping record");
        }
    }

    pub async fn recent(&self, limit: usize, filters: RecentFilters<'_>) -> Vec<ApiCallRecord> {
        use redis::AsyncCommands;
        let scan_len = (limit * 3).min(self.max_entries).max(1);
        let mut conn = self.conn.lock().await;
        let raw: redis::RedisResult<Vec<String>> =
            conn.lrange(LIST_KEY, 0, scan_len as isize - 1).await;
        let Ok(raw) = raw else {
            return Vec::new();
        };
        drop(conn);

        let mut out = Vec::new();
        for entry in raw {
            let Ok(record) = serde_json::from_str::<ApiCallRecord>(&entry) else {
                tracing::warn!("skipping unparsable api call record");
                continue;
            };
            if let Some(service) = filters.service {
                if record.service != service {
                    continue;
                }
            }
            if let Some(method) = filters.method {
                if record.method != method {
                    continue;
                }
            }
            if filters.errors_only && record.status_code < 400 {
                continue;
            }
            if let Some(cid) = filters.correlation_id {
                if record.correlation_id.as_deref() != Some(cid) {
                    continue;
                }
            }
            out.push(record);
            if out.len() >= limit {
                break;
            }
        }
        out
    }

    pub async fn stats(&self) -> ApiCallStats {
        let records = self.recent(self.max_entries, RecentFilters::default()).await;
        if records.is_empty() {
            return ApiCallStats {
                total_calls: 0,
                by_service: Default::default(),
                error_count: 0,
                success_rate: 100.0,
                avg_duration_ms: 0.0,
            };
        }
        let total = records.len() as u64;
        let mut by_service = std::collections::HashMap::new();
        let mut error_count = 0u64;
        let mut duration_sum = 0u64;
        for r in &records {
            *by_service.entry(r.service.clone()).or_insert(0u64) += 1;
            if r.status_code >= 400 {
                error_count += 1;
            }
            duration_sum += r.duration_ms;
        }
        let success_rate = (((total - error_count) as f64 / total as f64) * 1000.0).round() / 10.0;
        let avg_duration_ms = ((duration_sum as f64 / total as f64) * 10.0).round() / 10.0;
        ApiCallStats {
            total_calls: total,
            by_service,
            error_count,
            success_rate,
            avg_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_summary_caps_at_200_chars() {
        let long = "x".repeat(500);
        assert_eq!(ApiCallTracker::truncate_summary(&long).chars().count(), 200);
    }
}
