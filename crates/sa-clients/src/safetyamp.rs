//! SafetyAmp REST client (`SPEC_FULL.md` §6): paginated, bearer + FQDN
//! headers, `{data: [...]}` envelope. Rate limit: 60 requests / 61 seconds.

use crate::client::{flatten_tree, HttpClient, RetryPolicy};
use sa_core::config::SafetyAmpConfig;
use sa_core::Result;
use sa_tracking::ApiCallTracker;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct SafetyAmpClient {
    inner: HttpClient,
}

impl SafetyAmpClient {
    pub fn new(config: &SafetyAmpConfig, retry: RetryPolicy, tracker: Option<Arc<ApiCallTracker>>) -> Self {
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", config.token.expose())),
            ("X-SafetyAmp-FQDN".to_string(), config.fqdn.clone()),
        ];
        let base_url = format!("https://{}", config.domain);
        Self {
            inner: HttpClient::new(
                "safetyamp",
                base_url,
                headers,
                60,
                Duration::from_secs(61),
                retry,
                tracker,
            ),
        }
    }

    pub async fn users(&self) -> Result<Vec<Value>> {
        self.inner.list_all("/api/users", "id", 25).await
    }

    pub async fn ping_users(&self) -> Result<Value> {
        self.inner.get("/api/users", &[("limit", "1")]).await
    }

    pub async fn create_user(&self, payload: Value) -> Result<Value> {
        self.inner.post("/api/users", payload).await
    }

    pub async fn patch_user(&self, id: i64, payload: Value) -> Result<Value> {
        self.inner.patch(&format!("/api/users/{id}"), payload).await
    }

    pub async fn roles(&self) -> Result<Vec<Value>> {
        self.inner.list_all("/api/roles", "id", 25).await
    }

    pub async fn titles(&self) -> Result<Vec<Value>> {
        self.inner.list_all("/api/titles", "id", 25).await
    }

    pub async fn create_title(&self, payload: Value) -> Result<Value> {
        self.inner.post("/api/titles", payload).await
    }

    pub async fn sites(&self) -> Result<Vec<Value>> {
        self.inner.list_all("/api/sites", "id", 25).await
    }

    pub async fn create_site(&self, payload: Value) -> Result<Value> {
        self.inner.post("/api/sites", payload).await
    }

    pub async fn patch_site(&self, id: i64, payload: Value) -> Result<Value> {
        self.inner.patch(&format!("/api/sites/{id}"), payload).await
    }

    /// Site clusters are exposed hierarchically; flatten depth-first
    /// (`SPEC_FULL.md` §4.1).
    pub async fn clusters(&self) -> Result<Vec<Value>> {
        let roots = self.inner.list_all("/api/site_clusters", "id", 25).await?;
        Ok(flatten_tree(roots, "children"))
    }

    pub async fn create_cluster(&self, payload: Value) -> Result<Value> {
        self.inner.post("/api/site_clusters", payload).await
    }

    pub async fn patch_cluster(&self, id: i64, payload: Value) -> Result<Value> {
        self.inner
            .patch(&format!("/api/site_clusters/{id}"), payload)
            .await
    }

    pub async fn assets(&self) -> Result<Vec<Value>> {
        self.inner.list_all("/api/assets", "id", 25).await
    }

    pub async fn create_asset(&self, payload: Value) -> Result<Value> {
        self.inner.post("/api/assets", payload).await
    }

    pub async fn patch_asset(&self, id: i64, payload: Value) -> Result<Value> {
        self.inner.patch(&format!("/api/assets/{id}"), payload).await
    }
}
