//! Employee syncer (`SPEC_FULL.md` §4.6 "Employee syncer specifics").

use crate::diff::diff_fields;
use crate::{SafetyStop, SyncDeps, Syncer, DEFAULT_SAFETY_STOP_THRESHOLD};
use async_trait::async_trait;
use sa_clients::{GraphClient, SafetyAmpClient};
use sa_core::models::{SessionEvent, SessionSummary, TargetUser};
use sa_core::traits::{CacheStore, ErpReader};
use sa_core::validator::validate_employee;
use sa_core::{Error, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const CLUSTER_MAP_CACHE: &str = "cluster_map";
const ROLE_MAP_CACHE: &str = "role_map";
const TITLE_MAP_CACHE: &str = "title_map";
const EXISTING_USERS_CACHE: &str = "existing_users";
const HOME_OFFICE_MAP_CACHE: &str = "home_office_map";

/// Reference maps built once per run (`before_sync`, §4.6).
pub struct EmployeeReferenceMaps {
    /// `external_code` (job_code or pr_dept) -> cluster id.
    pub cluster_map: HashMap<String, i64>,
    pub role_map: HashMap<String, i64>,
    pub title_map: HashMap<String, i64>,
    pub existing_users: HashMap<String, TargetUser>,
    /// cluster_id -> default site id for that cluster.
    pub home_office_map: HashMap<i64, i64>,
    /// employee_no -> authoritative email from the identity provider.
    pub graph_emails: HashMap<String, String>,
}

pub struct EmployeeSyncer {
    deps: SyncDeps,
    safetyamp: Arc<SafetyAmpClient>,
    graph: Option<Arc<GraphClient>>,
    erp: Arc<dyn ErpReader>,
    safety_stop_threshold: u32,
}

impl EmployeeSyncer {
    pub fn new(
        deps: SyncDeps,
        safetyamp: Arc<SafetyAmpClient>,
        graph: Option<Arc<GraphClient>>,
        erp: Arc<dyn ErpReader>,
    ) -> Self {
        Self {
            deps,
            safetyamp,
            graph,
            erp,
            safety_stop_threshold: DEFAULT_SAFETY_STOP_THRESHOLD,
        }
    }

    async fn before_sync(&self) -> Result<EmployeeReferenceMaps> {
        let clusters = self
            .deps
            .cache
            .load_or_populate(
                CLUSTER_MAP_CACHE,
                None,
                || async {
                    let clusters = self.safetyamp.clusters().await?;
                    Ok(Value::Array(clusters))
                },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let mut cluster_map = HashMap::new();
        let mut home_office_map = HashMap::new();
        for cluster in clusters.as_array().cloned().unwrap_or_default() {
            let Some(id) = cluster.get("id").and_then(Value::as_i64) else {
                continue;
            };
            if let Some(code) = cluster.get("external_code").and_then(Value::as_str) {
                cluster_map.insert(code.to_string(), id);
            }
            if cluster.get("depth").and_then(Value::as_i64) == Some(2) {
                home_office_map.insert(id, id);
            }
        }

        let roles = self
            .deps
            .cache
            .load_or_populate(
                ROLE_MAP_CACHE,
                None,
                || async { Ok(Value::Array(Vec::new())) },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let role_map = map_name_to_id(&roles);

        let titles = self
            .deps
            .cache
            .load_or_populate(
                TITLE_MAP_CACHE,
                None,
                || async {
                    let titles = self.safetyamp.titles().await?;
                    Ok(Value::Array(titles))
                },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let title_map = map_name_to_id(&titles);

        let users = self
            .deps
            .cache
            .load_or_populate(
                EXISTING_USERS_CACHE,
                None,
                || async {
                    let users = self.safetyamp.users().await?;
                    Ok(Value::Array(users))
                },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let mut existing_users = HashMap::new();
        for raw in users.as_array().cloned().unwrap_or_default() {
            if let Ok(user) = serde_json::from_value::<TargetUser>(raw) {
                if let Some(emp_id) = user.emp_id.clone() {
                    existing_users.insert(emp_id, user);
                }
            }
        }

        let graph_emails = match &self.graph {
            Some(graph) => graph.active_employee_emails().await.unwrap_or_default(),
            None => HashMap::new(),
        };

        let _ = self.deps.cache.save(
            HOME_OFFICE_MAP_CACHE,
            serde_json::to_value(&home_office_map).unwrap_or(Value::Null),
            3600,
            "employee_syncer",
            None,
        );

        Ok(EmployeeReferenceMaps {
            cluster_map,
            role_map: role_map_or_empty(role_map),
            title_map,
            existing_users,
            home_office_map,
            graph_emails,
        })
    }

    /// `home_site_id` resolution (§4.6): job_code direct hit, else pr_dept via
    /// the home-office map, else `None` (caller skips with a reason).
    fn resolve_home_site_id(
        maps: &EmployeeReferenceMaps,
        job_code: Option<&str>,
        pr_dept: Option<&str>,
    ) -> Option<i64> {
        if let Some(job_code) = job_code {
            if let Some(&id) = maps.cluster_map.get(job_code) {
                return Some(id);
            }
        }
        if let Some(pr_dept) = pr_dept {
            if let Some(&cluster_id) = maps.cluster_map.get(pr_dept) {
                return maps.home_office_map.get(&cluster_id).copied();
            }
        }
        None
    }

    fn transform(
        maps: &EmployeeReferenceMaps,
        row: &sa_core::models::EmployeeRecord,
    ) -> (bool, Vec<String>, Map<String, Value>) {
        let full_name = format!(
            "{} {}",
            row.first_name.clone().unwrap_or_default(),
            row.last_name.clone().unwrap_or_default()
        );
        let raw = json!({
            "first_name": row.first_name,
            "last_name": row.last_name,
            "email": maps
                .graph_emails
                .get(&row.employee_no)
                .cloned()
                .or_else(|| row.email.clone()),
            "mobile_phone": row.phone,
            "gender": row.gender_raw,
            "date_of_birth": row.birth_date,
            "current_hire_date": row.hire_date,
            "street": row.street,
            "city": row.city,
            "state": row.state,
            "zip_code": row.zip,
        });
        validate_employee(raw.as_object().unwrap(), &row.employee_no, &full_name)
    }

    /// PATCH construction rule (§4.6): always include `first_name`,
    /// `last_name`, `email` from the existing user plus the changed fields.
    /// If `system_access` is being flipped on, only those four fields are
    /// sent to avoid unrelated validation masking the enablement.
    fn build_patch(existing: &TargetUser, changes: &Map<String, Value>) -> Value {
        let core = json!({
            "first_name": existing.first_name,
            "last_name": existing.last_name,
            "email": existing.email,
        });
        if changes.get("system_access").and_then(Value::as_i64) == Some(1) {
            let mut payload = core.as_object().unwrap().clone();
            payload.insert("system_access".to_string(), json!(1));
            return Value::Object(payload);
        }
        let mut payload = core.as_object().unwrap().clone();
        for (k, v) in changes {
            payload.insert(k.clone(), v.clone());
        }
        Value::Object(payload)
    }
}

#[async_trait]
impl Syncer for EmployeeSyncer {
    fn entity_type(&self) -> &'static str {
        "employee"
    }

    async fn sync(&self) -> Result<SessionSummary> {
        self.deps.events.start_sync("employees").await?;
        let maps = self.before_sync().await?;
        let mut safety_stop = SafetyStop::new(self.safety_stop_threshold);

        let rows = self.erp.active_employees().await?;
        for row in rows {
            let entity_id = row.employee_no.clone();
            let (is_valid, errors, cleaned) = Self::transform(&maps, &row);
            if !is_valid {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "employee".into(),
                        entity_id: entity_id.clone(),
                        reason: errors.join("; "),
                    })
                    .await;
                continue;
            }

            let home_site_id =
                Self::resolve_home_site_id(&maps, row.job_code.as_deref(), row.pr_dept.as_deref());
            let Some(home_site_id) = home_site_id else {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "employee".into(),
                        entity_id: entity_id.clone(),
                        reason: "no home_site_id resolvable from job_code/pr_dept".into(),
                    })
                    .await;
                continue;
            };

            let mut candidate = cleaned;
            candidate.insert("home_site_id".to_string(), json!(home_site_id));
            if let Some(title) = row.title.as_deref() {
                if let Some(&title_id) = maps.title_map.get(title) {
                    candidate.insert("current_title_id".to_string(), json!(title_id));
                }
            }
            let candidate_value = Value::Object(candidate.clone());

            if self
                .deps
                .failures
                .should_skip_retry("employee", &entity_id, &candidate_value)
                .await?
            {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "employee".into(),
                        entity_id: entity_id.clone(),
                        reason: "prior validation failure, fields unchanged".into(),
                    })
                    .await;
                continue;
            }

            let existing = maps.existing_users.get(&entity_id).cloned();
            let result = match existing {
                None => {
                    candidate.insert("emp_id".to_string(), json!(entity_id));
                    candidate.insert("system_access".to_string(), json!(1));
                    self.create_with_fallback(&entity_id, candidate.clone()).await
                }
                Some(user) => {
                    let existing_obj = serde_json::to_value(&user)
                        .unwrap_or(Value::Null)
                        .as_object()
                        .cloned()
                        .unwrap_or_default();
                    let mut changes = diff_fields(&existing_obj, &candidate);
                    if user.system_access.is_none()
                        || user.system_access == Some(json!(false))
                        || user.system_access == Some(json!(0))
                    {
                        changes.insert("system_access".to_string(), json!(1));
                    }
                    if changes.is_empty() {
                        self.deps
                            .events
                            .push(SessionEvent::Skipped {
                                timestamp: now(),
                                entity_type: "employee".into(),
                                entity_id: entity_id.clone(),
                                reason: "no changed fields".into(),
                            })
                            .await;
                        continue;
                    }
                    let Some(id) = user.id else {
                        continue;
                    };
                    let payload = Self::build_patch(&user, &changes);
                    match self.safetyamp.patch_user(id, payload.clone()).await {
                        Ok(_) => {
                            self.deps
                                .events
                                .push(SessionEvent::Updated {
                                    timestamp: now(),
                                    entity_type: "employee".into(),
                                    entity_id: entity_id.clone(),
                                    changes: payload,
                                    original_data: serde_json::to_value(&user).unwrap_or(Value::Null),
                                })
                                .await;
                            self.deps.failures.clear("employee", &entity_id).await?;
                            Ok(())
                        }
                        Err(Error::Http { status: 422, body }) => {
                            self.handle_422(&entity_id, &candidate_value, &body).await?;
                            Ok(())
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
                        .log_error(
                            "employee",
                            entity_id.clone(),
                            e.to_string(),
                            "http_error",
                            None,
                            "employee_syncer",
                        )
                        .await;
                    if safety_stop.record_error() {
                        self.deps
                            .events
                            .log_error(
                                "employee",
                                entity_id,
                                "consecutive error threshold reached",
                                "safety_stop",
                                None,
                                "employee_syncer",
                            )
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

impl EmployeeSyncer {
    /// Create fallback on 422 (§4.6): drop `email`, `mobile_phone`,
    /// `work_phone` and retry once. If that also 422s, the failure is
    /// recorded against the *original* payload and the caller moves on
    /// (the 422 handling itself is done here, not re-raised).
    async fn create_with_fallback(&self, entity_id: &str, payload: Map<String, Value>) -> Result<()> {
        match self.safetyamp.create_user(Value::Object(payload.clone())).await {
            Ok(_) => {
                self.deps
                    .events
                    .push(SessionEvent::Created {
                        timestamp: now(),
                        entity_type: "employee".into(),
                        entity_id: entity_id.to_string(),
                        payload: Value::Object(payload),
                    })
                    .await;
                self.deps.failures.clear("employee", entity_id).await?;
                Ok(())
            }
            Err(Error::Http { status: 422, .. }) => {
                let mut retry_payload = payload.clone();
                for field in ["email", "mobile_phone", "work_phone"] {
                    retry_payload.remove(field);
                }
                match self
                    .safetyamp
                    .create_user(Value::Object(retry_payload.clone()))
                    .await
                {
                    Ok(_) => {
                        self.deps
                            .events
                            .push(SessionEvent::Created {
                                timestamp: now(),
                                entity_type: "employee".into(),
                                entity_id: entity_id.to_string(),
                                payload: Value::Object(retry_payload),
                            })
                            .await;
                        self.deps.failures.clear("employee", entity_id).await?;
                        Ok(())
                    }
                    Err(Error::Http { status: 422, body: retry_body }) => {
                        self.handle_422(entity_id, &Value::Object(payload), &retry_body)
                            .await?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_422(&self, entity_id: &str, payload: &Value, body: &str) -> Result<()> {
        let envelope: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(body)
            .to_string();
        let errors: Option<HashMap<String, Vec<String>>> = envelope
            .get("errors")
            .and_then(|e| serde_json::from_value(e.clone()).ok());
        self.deps
            .failures
            .record_failure(self.entity_type(), entity_id, payload, &message, errors)
            .await?;
        self.deps
            .events
            .push(SessionEvent::Errors {
                timestamp: now(),
                entity_type: "employee".into(),
                entity_id: entity_id.to_string(),
                error_message: message,
                error_type: "validation_error".into(),
                payload: Some(payload.clone()),
            })
            .await;
        Ok(())
    }
}

fn map_name_to_id(values: &Value) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for item in values.as_array().cloned().unwrap_or_default() {
        if let (Some(name), Some(id)) = (
            item.get("name").and_then(Value::as_str),
            item.get("id").and_then(Value::as_i64),
        ) {
            map.insert(name.to_string(), id);
        }
    }
    map
}

fn role_map_or_empty(map: HashMap<String, i64>) -> HashMap<String, i64> {
    map
}

fn now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}
