//! Department/cluster syncer (`SPEC_FULL.md` §4.6 "Department/cluster
//! syncer"): ensures the three-level hierarchy root "I&I" -> one cluster per
//! region (`udRegion`) -> one cluster per department
//! (`"<PRDept> - <description>"`, `external_code = PRDept`).

use crate::{SafetyStop, SyncDeps, Syncer, DEFAULT_SAFETY_STOP_THRESHOLD};
use async_trait::async_trait;
use sa_clients::SafetyAmpClient;
use sa_core::models::{SessionEvent, SessionSummary, TargetCluster};
use sa_core::traits::ErpReader;
use sa_core::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const CLUSTERS_CACHE: &str = "clusters_raw";
const ROOT_NAME: &str = "I&I";

pub struct DepartmentSyncer {
    deps: SyncDeps,
    safetyamp: Arc<SafetyAmpClient>,
    erp: Arc<dyn ErpReader>,
    safety_stop_threshold: u32,
}

impl DepartmentSyncer {
    pub fn new(deps: SyncDeps, safetyamp: Arc<SafetyAmpClient>, erp: Arc<dyn ErpReader>) -> Self {
        Self {
            deps,
            safetyamp,
            erp,
            safety_stop_threshold: DEFAULT_SAFETY_STOP_THRESHOLD,
        }
    }

    async fn load_clusters(&self) -> Result<Vec<TargetCluster>> {
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
        Ok(value
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    fn find_by_name<'a>(clusters: &'a [TargetCluster], name: &str) -> Option<&'a TargetCluster> {
        clusters.iter().find(|c| c.name == name)
    }

    /// Idempotent create-or-reparent. Returns `(id, created, reparented)`.
    async fn ensure_cluster(
        &self,
        clusters: &mut Vec<TargetCluster>,
        name: &str,
        parent_id: Option<i64>,
        external_code: Option<&str>,
    ) -> Result<(i64, bool, bool)> {
        if let Some(existing) = Self::find_by_name(clusters, name) {
            let compatible_code = match (&existing.external_code, external_code) {
                (None, _) => true,
                (Some(a), Some(b)) => a == b,
                (Some(_), None) => true,
            };
            if compatible_code {
                if existing.parent_cluster_id != parent_id {
                    let id = existing.id;
                    self.safetyamp
                        .patch_cluster(id, json!({ "parent_cluster_id": parent_id }))
                        .await?;
                    if let Some(c) = clusters.iter_mut().find(|c| c.id == id) {
                        c.parent_cluster_id = parent_id;
                    }
                    self.deps.cache.invalidate(CLUSTERS_CACHE, None).await?;
                    return Ok((id, false, true));
                }
                return Ok((existing.id, false, false));
            }
        }

        let payload = json!({
            "name": name,
            "parent_cluster_id": parent_id,
            "external_code": external_code,
            "osha_establishment": 0,
        });
        let created = self.safetyamp.create_cluster(payload).await?;
        let id = created.get("id").and_then(Value::as_i64).unwrap_or_default();
        clusters.push(TargetCluster {
            id,
            name: name.to_string(),
            parent_cluster_id: parent_id,
            external_code: external_code.map(str::to_string),
            depth: None,
        });
        self.deps.cache.invalidate(CLUSTERS_CACHE, None).await?;
        Ok((id, true, false))
    }

    async fn record_ensure_event(&self, kind: &str, name: &str, created: bool, reparented: bool) {
        let entity_id = format!("{kind}:{name}");
        if created {
            self.deps
                .events
                .push(SessionEvent::Created {
                    timestamp: now(),
                    entity_type: "department".into(),
                    entity_id,
                    payload: json!({ "name": name }),
                })
                .await;
        } else if reparented {
            self.deps
                .events
                .push(SessionEvent::Updated {
                    timestamp: now(),
                    entity_type: "department".into(),
                    entity_id,
                    changes: json!({ "reparented": true }),
                    original_data: json!({ "name": name }),
                })
                .await;
        }
    }
}

#[async_trait]
impl Syncer for DepartmentSyncer {
    fn entity_type(&self) -> &'static str {
        "department"
    }

    async fn sync(&self) -> Result<SessionSummary> {
        self.deps.events.start_sync("departments").await?;
        let mut safety_stop = SafetyStop::new(self.safety_stop_threshold);
        let mut clusters = self.load_clusters().await?;

        let root_id = match self.ensure_cluster(&mut clusters, ROOT_NAME, None, None).await {
            Ok((id, created, reparented)) => {
                self.record_ensure_event("root", ROOT_NAME, created, reparented).await;
                safety_stop.record_success();
                id
            }
            Err(e) => {
                self.deps
                    .events
                    .log_error("cluster", ROOT_NAME, e.to_string(), "http_error", None, "department_syncer")
                    .await;
                let session = self.deps.events.end_sync().await?;
                return Ok(session.map(|s| s.summary).unwrap_or_default());
            }
        };

        let departments = self.erp.departments().await?;

        let mut regions: Vec<String> = departments.iter().filter_map(|d| d.region.clone()).collect();
        regions.sort();
        regions.dedup();

        let mut region_ids: HashMap<String, i64> = HashMap::new();
        for region in &regions {
            match self.ensure_cluster(&mut clusters, region, Some(root_id), None).await {
                Ok((id, created, reparented)) => {
                    self.record_ensure_event("region", region, created, reparented).await;
                    region_ids.insert(region.clone(), id);
                    safety_stop.record_success();
                }
                Err(e) => {
                    self.deps
                        .events
                        .log_error("cluster", region.clone(), e.to_string(), "http_error", None, "department_syncer")
                        .await;
                    if safety_stop.record_error() {
                        self.deps
                            .events
                            .log_error("department", "*", "consecutive error threshold reached", "safety_stop", None, "department_syncer")
                            .await;
                        break;
                    }
                }
            }
        }

        for dept in &departments {
            let Some(region) = dept.region.as_deref() else {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "department".into(),
                        entity_id: dept.pr_dept.clone(),
                        reason: "no region assigned".into(),
                    })
                    .await;
                continue;
            };
            let Some(&parent_id) = region_ids.get(region) else {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "department".into(),
                        entity_id: dept.pr_dept.clone(),
                        reason: format!("region cluster '{region}' not available"),
                    })
                    .await;
                continue;
            };
            let description = dept.description.clone().unwrap_or_default();
            let name = format!("{} - {description}", dept.pr_dept);
            match self
                .ensure_cluster(&mut clusters, &name, Some(parent_id), Some(&dept.pr_dept))
                .await
            {
                Ok((_, created, reparented)) => {
                    self.record_ensure_event("department", &dept.pr_dept, created, reparented).await;
                    safety_stop.record_success();
                }
                Err(e) => {
                    self.deps
                        .events
                        .log_error("department", dept.pr_dept.clone(), e.to_string(), "http_error", None, "department_syncer")
                        .await;
                    if safety_stop.record_error() {
                        self.deps
                            .events
                            .log_error("department", "*", "consecutive error threshold reached", "safety_stop", None, "department_syncer")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_cluster_compatibility_allows_wider_code() {
        let existing = TargetCluster {
            id: 1,
            name: "Gulf Coast".into(),
            parent_cluster_id: Some(0),
            external_code: None,
            depth: Some(1),
        };
        let candidate_code: Option<&str> = None;
        let compatible = match (&existing.external_code, candidate_code) {
            (None, _) => true,
            (Some(a), Some(b)) => a == b,
            (Some(_), None) => true,
        };
        assert!(compatible);
    }
}
