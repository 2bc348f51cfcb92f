//! Job/site syncer (`SPEC_FULL.md` §4.6 "Job/site syncer"): maps each active
//! job to a site under its department cluster.

use crate::{SafetyStop, SyncDeps, Syncer, DEFAULT_SAFETY_STOP_THRESHOLD};
use async_trait::async_trait;
use sa_clients::SafetyAmpClient;
use sa_core::models::{SessionEvent, SessionSummary, TargetSite};
use sa_core::traits::ErpReader;
use sa_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const CLUSTERS_CACHE: &str = "clusters_raw";
const SITES_CACHE: &str = "sites_raw";

const DEFAULT_ZIP: &str = "00000";
const DEFAULT_ADDRESS: &str = "Unknown";
const DEFAULT_CITY: &str = "Unknown";
const DEFAULT_STATE: &str = "LA";
const DEFAULT_COUNTRY: &str = "US";
const DEFAULT_TIMEZONE: &str = "America/Chicago";

pub struct JobSiteSyncer {
    deps: SyncDeps,
    safetyamp: Arc<SafetyAmpClient>,
    erp: Arc<dyn ErpReader>,
    safety_stop_threshold: u32,
}

impl JobSiteSyncer {
    pub fn new(deps: SyncDeps, safetyamp: Arc<SafetyAmpClient>, erp: Arc<dyn ErpReader>) -> Self {
        Self {
            deps,
            safetyamp,
            erp,
            safety_stop_threshold: DEFAULT_SAFETY_STOP_THRESHOLD,
        }
    }

    /// `external_code` (depth-2 department cluster) -> cluster id.
    async fn dept_cluster_map(&self) -> Result<HashMap<String, i64>> {
        let value = self
            .deps
            .cache
            .load_or_populate(
                CLUSTERS_CACHE,
                None,
                || async { Ok(Value::Array(self.safetyamp.clusters().await?)) },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let mut map = HashMap::new();
        for cluster in value.as_array().cloned().unwrap_or_default() {
            if cluster.get("depth").and_then(Value::as_i64) != Some(2) {
                continue;
            }
            if let (Some(code), Some(id)) = (
                cluster.get("external_code").and_then(Value::as_str),
                cluster.get("id").and_then(Value::as_i64),
            ) {
                map.insert(code.to_string(), id);
            }
        }
        Ok(map)
    }

    async fn existing_sites(&self) -> Result<HashMap<String, TargetSite>> {
        let value = self
            .deps
            .cache
            .load_or_populate(
                SITES_CACHE,
                None,
                || async { Ok(Value::Array(self.safetyamp.sites().await?)) },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let mut map = HashMap::new();
        for raw in value.as_array().cloned().unwrap_or_default() {
            if let Ok(site) = serde_json::from_value::<TargetSite>(raw) {
                if let Some(ext) = site.ext_id.clone() {
                    map.insert(ext, site);
                }
            }
        }
        Ok(map)
    }

    async fn handle_422(&self, entity_id: &str, payload: &Value, body: &str) -> Result<()> {
        let envelope: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let message = envelope.get("message").and_then(Value::as_str).unwrap_or(body).to_string();
        let errors: Option<HashMap<String, Vec<String>>> = envelope
            .get("errors")
            .and_then(|e| serde_json::from_value(e.clone()).ok());
        self.deps
            .failures
            .record_failure("site", entity_id, payload, &message, errors)
            .await?;
        self.deps
            .events
            .push(SessionEvent::Errors {
                timestamp: now(),
                entity_type: "site".into(),
                entity_id: entity_id.to_string(),
                error_message: message,
                error_type: "validation_error".into(),
                payload: Some(payload.clone()),
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Syncer for JobSiteSyncer {
    fn entity_type(&self) -> &'static str {
        "site"
    }

    async fn sync(&self) -> Result<SessionSummary> {
        self.deps.events.start_sync("jobs").await?;
        let mut safety_stop = SafetyStop::new(self.safety_stop_threshold);

        let dept_clusters = self.dept_cluster_map().await?;
        let mut existing = self.existing_sites().await?;
        let jobs = self.erp.jobs().await?;

        for job in jobs {
            let Some(department) = job.department.as_deref() else {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "site".into(),
                        entity_id: job.job_code.clone(),
                        reason: "no department assigned".into(),
                    })
                    .await;
                continue;
            };
            let Some(&cluster_id) = dept_clusters.get(department) else {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "site".into(),
                        entity_id: job.job_code.clone(),
                        reason: format!("department cluster '{department}' not available"),
                    })
                    .await;
                continue;
            };

            let description = job.description.clone().unwrap_or_default();
            let name = format!("{} - {description}", job.job_code);
            let zip = job
                .ship_zip
                .clone()
                .filter(|z| !z.is_empty())
                .unwrap_or_else(|| DEFAULT_ZIP.to_string());

            let gating_candidate = json!({
                "name": name,
                "ext_id": job.job_code,
                "cluster_id": cluster_id,
                "zip_code": zip,
            });
            if self
                .deps
                .failures
                .should_skip_retry("site", &job.job_code, &gating_candidate)
                .await?
            {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "site".into(),
                        entity_id: job.job_code.clone(),
                        reason: "prior validation failure, fields unchanged".into(),
                    })
                    .await;
                continue;
            }

            let result: Result<()> = match existing.get(&job.job_code) {
                None => {
                    let payload = json!({
                        "name": name,
                        "ext_id": job.job_code,
                        "cluster_id": cluster_id,
                        "zip_code": zip,
                        "address": DEFAULT_ADDRESS,
                        "city": job.ship_city.clone().filter(|c| !c.is_empty()).unwrap_or_else(|| DEFAULT_CITY.to_string()),
                        "state": job.ship_state.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_STATE.to_string()),
                        "country": DEFAULT_COUNTRY,
                        "timezone": DEFAULT_TIMEZONE,
                    });
                    match self.safetyamp.create_site(payload.clone()).await {
                        Ok(created) => {
                            self.deps
                                .events
                                .push(SessionEvent::Created {
                                    timestamp: now(),
                                    entity_type: "site".into(),
                                    entity_id: job.job_code.clone(),
                                    payload: payload.clone(),
                                })
                                .await;
                            self.deps.failures.clear("site", &job.job_code).await?;
                            if let Some(id) = created.get("id").and_then(Value::as_i64) {
                                existing.insert(
                                    job.job_code.clone(),
                                    TargetSite {
                                        id,
                                        name: name.clone(),
                                        ext_id: Some(job.job_code.clone()),
                                        cluster_id: Some(cluster_id),
                                        zip_code: Some(zip.clone()),
                                    },
                                );
                            }
                            Ok(())
                        }
                        Err(Error::Http { status: 422, body }) => self.handle_422(&job.job_code, &payload, &body).await,
                        Err(e) => Err(e),
                    }
                }
                Some(site) => {
                    let mut changes = serde_json::Map::new();
                    if site.cluster_id != Some(cluster_id) {
                        changes.insert("cluster_id".to_string(), json!(cluster_id));
                    }
                    if site.zip_code.as_deref() != Some(zip.as_str()) {
                        changes.insert("zip_code".to_string(), json!(zip));
                    }
                    if site.ext_id.as_deref() != Some(job.job_code.as_str()) {
                        changes.insert("ext_id".to_string(), json!(job.job_code));
                    }
                    if site.name != name {
                        changes.insert("name".to_string(), json!(name));
                    }
                    if changes.is_empty() {
                        self.deps
                            .events
                            .push(SessionEvent::Skipped {
                                timestamp: now(),
                                entity_type: "site".into(),
                                entity_id: job.job_code.clone(),
                                reason: "no changed fields".into(),
                            })
                            .await;
                        continue;
                    }
                    changes.insert("name".to_string(), json!(name));
                    let id = site.id;
                    let original = serde_json::to_value(site).unwrap_or(Value::Null);
                    match self.safetyamp.patch_site(id, Value::Object(changes.clone())).await {
                        Ok(_) => {
                            self.deps
                                .events
                                .push(SessionEvent::Updated {
                                    timestamp: now(),
                                    entity_type: "site".into(),
                                    entity_id: job.job_code.clone(),
                                    changes: Value::Object(changes),
                                    original_data: original,
                                })
                                .await;
                            self.deps.failures.clear("site", &job.job_code).await?;
                            Ok(())
                        }
                        Err(Error::Http { status: 422, body }) => {
                            self.handle_422(&job.job_code, &Value::Object(changes), &body).await
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            match result {
                Ok(()) => safety_stop.record_success(),
                Err(e) => {
                    self.deps
                        .events
                        .log_error("site", job.job_code.clone(), e.to_string(), "http_error", None, "job_site_syncer")
                        .await;
                    if safety_stop.record_error() {
                        self.deps
                            .events
                            .log_error("site", "*", "consecutive error threshold reached", "safety_stop", None, "job_site_syncer")
                            .await;
                        break;
                    }
                }
            }
        }

        let session = self.deps.events.end_sync().await?;
        Ok(session.map(|s| s.summary).unwrap_or_default())
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}
