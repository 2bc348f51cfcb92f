//! Samsara REST client (`SPEC_FULL.md` §6): cursor pagination
//! (`after=<endCursor>`, `limit=100`), bearer header. Rate limit: 25/1s.

use crate::client::{HttpClient, RetryPolicy};
use sa_core::config::SamsaraConfig;
use sa_core::Result;
use sa_tracking::ApiCallTracker;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct SamsaraClient {
    inner: HttpClient,
}

impl SamsaraClient {
    pub fn new(config: &SamsaraConfig, retry: RetryPolicy, tracker: Option<Arc<ApiCallTracker>>) -> Self {
        let headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", config.api_key.expose()),
        )];
        let base_url = format!("https://{}", config.domain);
        Self {
            inner: HttpClient::new(
                "samsara",
                base_url,
                headers,
                25,
                Duration::from_secs(1),
                retry,
                tracker,
            ),
        }
    }

    pub async fn vehicles(&self) -> Result<Vec<Value>> {
        self.inner.list_all_cursor("/fleet/vehicles", 100).await
    }

    pub async fn ping_vehicles(&self) -> Result<Value> {
        self.inner.get("/fleet/vehicles", &[("limit", "1")]).await
    }

    pub async fn drivers(&self) -> Result<Vec<Value>> {
        self.inner.list_all_cursor("/fleet/drivers", 100).await
    }

    /// Used by the vehicle syncer to read a driver's `notes` field for
    /// employee-number attribution (`SPEC_FULL.md` §4.6).
    pub async fn get_driver(&self, driver_id: &str) -> Result<Value> {
        let response = self.inner.get(&format!("/fleet/drivers/{driver_id}"), &[]).await?;
        Ok(response.get("data").cloned().unwrap_or(response))
    }
}
