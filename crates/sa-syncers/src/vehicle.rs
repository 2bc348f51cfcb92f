//! Vehicle/asset syncer (`SPEC_FULL.md` §4.6 "Vehicle syncer"): transforms
//! telematics vehicles into SafetyAmp assets, forcing the configured default
//! site/asset-type regardless of the resolved driver's site (a deliberate
//! override — see §9 Open Questions).

use crate::{SafetyStop, SyncDeps, Syncer, DEFAULT_SAFETY_STOP_THRESHOLD};
use async_trait::async_trait;
use regex::Regex;
use sa_clients::SamsaraClient;
use sa_core::models::{SessionEvent, SessionSummary, TargetAsset, TargetUser};
use sa_core::validator::validate_vehicle;
use sa_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

const ASSETS_CACHE: &str = "assets_raw";
const EXISTING_USERS_CACHE: &str = "existing_users";

fn emp_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4,}").unwrap())
}

pub struct VehicleSyncer {
    deps: SyncDeps,
    samsara: Arc<SamsaraClient>,
    safetyamp: Arc<sa_clients::SafetyAmpClient>,
    safety_stop_threshold: u32,
    default_site_id: i64,
    default_asset_type_id: i64,
}

impl VehicleSyncer {
    pub fn new(
        deps: SyncDeps,
        samsara: Arc<SamsaraClient>,
        safetyamp: Arc<sa_clients::SafetyAmpClient>,
        default_site_id: i64,
        default_asset_type_id: i64,
    ) -> Self {
        Self {
            deps,
            samsara,
            safetyamp,
            safety_stop_threshold: DEFAULT_SAFETY_STOP_THRESHOLD,
            default_site_id,
            default_asset_type_id,
        }
    }

    async fn existing_assets(&self) -> Result<HashMap<String, TargetAsset>> {
        let value = self
            .deps
            .cache
            .load_or_populate(
                ASSETS_CACHE,
                None,
                || async { Ok(Value::Array(self.safetyamp.assets().await?)) },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let mut map = HashMap::new();
        for raw in value.as_array().cloned().unwrap_or_default() {
            if let Ok(asset) = serde_json::from_value::<TargetAsset>(raw) {
                if let Some(serial) = asset.serial.clone() {
                    map.insert(serial, asset);
                }
            }
        }
        Ok(map)
    }

    async fn existing_users(&self) -> Result<HashMap<String, TargetUser>> {
        let value = self
            .deps
            .cache
            .load_or_populate(
                EXISTING_USERS_CACHE,
                None,
                || async { Ok(Value::Array(self.safetyamp.users().await?)) },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let mut map = HashMap::new();
        for raw in value.as_array().cloned().unwrap_or_default() {
            if let Ok(user) = serde_json::from_value::<TargetUser>(raw) {
                if let Some(emp_id) = user.emp_id.clone() {
                    map.insert(emp_id, user);
                }
            }
        }
        Ok(map)
    }

    /// Extract the first run of >= 4 digits in a driver's `notes` field.
    fn extract_emp_id(notes: &str) -> Option<String> {
        emp_id_re().find(notes).map(|m| m.as_str().to_string())
    }

    /// Resolve the target-side user id for a vehicle's assigned driver, by
    /// reading the driver's `notes` field off Samsara and matching the
    /// embedded employee number against the existing-users map.
    async fn resolve_current_user_id(
        &self,
        static_driver_id: Option<&str>,
        users: &HashMap<String, TargetUser>,
    ) -> Option<i64> {
        let driver_id = static_driver_id?;
        let driver = self.samsara.get_driver(driver_id).await.ok()?;
        let notes = driver.get("notes").and_then(Value::as_str)?;
        let emp_id = Self::extract_emp_id(notes)?;
        users.get(&emp_id).and_then(|u| u.id)
    }

    fn code_from(license_plate: Option<&str>, vehicle_id: &str) -> Option<String> {
        license_plate
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                let last4 = last_n_chars(vehicle_id, 4);
                Some(format!("Unit_{last4}"))
            })
    }

    async fn handle_422(&self, entity_id: &str, payload: &Value, body: &str) -> Result<()> {
        let envelope: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let message = envelope.get("message").and_then(Value::as_str).unwrap_or(body).to_string();
        let errors: Option<HashMap<String, Vec<String>>> = envelope
            .get("errors")
            .and_then(|e| serde_json::from_value(e.clone()).ok());
        self.deps
            .failures
            .record_failure("vehicle", entity_id, payload, &message, errors)
            .await?;
        self.deps
            .events
            .push(SessionEvent::Errors {
                timestamp: now(),
                entity_type: "vehicle".into(),
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
impl Syncer for VehicleSyncer {
    fn entity_type(&self) -> &'static str {
        "vehicle"
    }

    async fn sync(&self) -> Result<SessionSummary> {
        self.deps.events.start_sync("vehicles").await?;
        let mut safety_stop = SafetyStop::new(self.safety_stop_threshold);

        let mut assets = self.existing_assets().await?;
        let users = self.existing_users().await?;
        let vehicles = self.samsara.vehicles().await?;

        for raw in vehicles {
            let Some(serial) = raw.get("serial").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let vehicle_id = raw.get("id").and_then(Value::as_str).unwrap_or(&serial).to_string();
            let static_driver_id = raw
                .get("staticAssignedDriver")
                .and_then(|d| d.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let license_plate = raw.get("licensePlate").and_then(Value::as_str).map(str::to_string);
            let vin = raw.get("vin").and_then(Value::as_str).map(str::to_string);
            let name = raw.get("name").and_then(Value::as_str).map(str::to_string);

            let raw_payload = json!({
                "name": name,
                "code": Self::code_from(license_plate.as_deref(), &vehicle_id),
                "vin": vin,
            });
            let (_is_valid, _errors, cleaned) =
                validate_vehicle(raw_payload.as_object().unwrap(), &vehicle_id);

            let current_user_id = self
                .resolve_current_user_id(static_driver_id.as_deref(), &users)
                .await;

            let mut candidate = cleaned;
            candidate.insert("serial".to_string(), json!(serial));
            candidate.insert("site_id".to_string(), json!(self.default_site_id));
            candidate.insert("asset_type_id".to_string(), json!(self.default_asset_type_id));
            let candidate_value = Value::Object(candidate.clone());

            if self
                .deps
                .failures
                .should_skip_retry("vehicle", &serial, &candidate_value)
                .await?
            {
                self.deps
                    .events
                    .push(SessionEvent::Skipped {
                        timestamp: now(),
                        entity_type: "vehicle".into(),
                        entity_id: serial.clone(),
                        reason: "prior validation failure, fields unchanged".into(),
                    })
                    .await;
                continue;
            }

            let existing = assets.get(&serial).cloned();
            let result: Result<()> = match existing {
                None => {
                    // Create: `current_user_id` deliberately omitted to avoid a 422.
                    match self
                        .safetyamp
                        .create_asset(Value::Object(candidate.clone()))
                        .await
                    {
                        Ok(created) => {
                            self.deps
                                .events
                                .push(SessionEvent::Created {
                                    timestamp: now(),
                                    entity_type: "vehicle".into(),
                                    entity_id: serial.clone(),
                                    payload: Value::Object(candidate.clone()),
                                })
                                .await;
                            self.deps.failures.clear("vehicle", &serial).await?;
                            if let Some(id) = created.get("id").and_then(Value::as_i64) {
                                assets.insert(
                                    serial.clone(),
                                    TargetAsset {
                                        id: Some(id),
                                        serial: Some(serial.clone()),
                                        name: candidate
                                            .get("name")
                                            .and_then(Value::as_str)
                                            .map(str::to_string),
                                        code: candidate
                                            .get("code")
                                            .and_then(Value::as_str)
                                            .map(str::to_string),
                                        vin: candidate
                                            .get("vin")
                                            .and_then(Value::as_str)
                                            .map(str::to_string),
                                        site_id: Some(self.default_site_id),
                                        asset_type_id: Some(self.default_asset_type_id),
                                        current_user_id: None,
                                        extra: HashMap::new(),
                                    },
                                );
                            }
                            Ok(())
                        }
                        Err(Error::Http { status: 422, body }) => {
                            self.handle_422(&serial, &candidate_value, &body).await
                        }
                        Err(e) => Err(e),
                    }
                }
                Some(asset) => {
                    let mut changes = serde_json::Map::new();
                    if asset.current_user_id != current_user_id && current_user_id.is_some() {
                        changes.insert("current_user_id".to_string(), json!(current_user_id));
                    }
                    if asset.asset_type_id != Some(self.default_asset_type_id) {
                        changes.insert("asset_type_id".to_string(), json!(self.default_asset_type_id));
                    }
                    if asset.site_id != Some(self.default_site_id) {
                        changes.insert("site_id".to_string(), json!(self.default_site_id));
                    }
                    if changes.is_empty() {
                        self.deps
                            .events
                            .push(SessionEvent::Skipped {
                                timestamp: now(),
                                entity_type: "vehicle".into(),
                                entity_id: serial.clone(),
                                reason: "no changed fields".into(),
                            })
                            .await;
                        continue;
                    }
                    let Some(id) = asset.id else { continue };
                    let original = serde_json::to_value(&asset).unwrap_or(Value::Null);
                    match self
                        .safetyamp
                        .patch_asset(id, Value::Object(changes.clone()))
                        .await
                    {
                        Ok(_) => {
                            self.deps
                                .events
                                .push(SessionEvent::Updated {
                                    timestamp: now(),
                                    entity_type: "vehicle".into(),
                                    entity_id: serial.clone(),
                                    changes: Value::Object(changes),
                                    original_data: original,
                                })
                                .await;
                            self.deps.failures.clear("vehicle", &serial).await?;
                            Ok(())
                        }
                        Err(Error::Http { status: 422, body }) => {
                            self.handle_422(&serial, &Value::Object(changes), &body).await
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
                        .log_error("vehicle", serial.clone(), e.to_string(), "http_error", None, "vehicle_syncer")
                        .await;
                    if safety_stop.record_error() {
                        self.deps
                            .events
                            .log_error(
                                "vehicle",
                                "*",
                                "consecutive error threshold reached",
                                "safety_stop",
                                None,
                                "vehicle_syncer",
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

fn last_n_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= n {
        s.to_string()
    } else {
        chars[chars.len() - n..].iter().collect()
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_emp_id_takes_first_run_of_four_or_more_digits() {
        assert_eq!(VehicleSyncer::extract_emp_id("emp 12345"), Some("12345".to_string()));
        assert_eq!(
            VehicleSyncer::extract_emp_id("driver notes: emp_id 12345, backup 42"),
            Some("12345".to_string())
        );
        assert_eq!(VehicleSyncer::extract_emp_id("no id here"), None);
        assert_eq!(VehicleSyncer::extract_emp_id("badge 123"), None);
    }

    #[test]
    fn code_from_prefers_license_plate() {
        assert_eq!(
            VehicleSyncer::code_from(Some("ABC-1234"), "v-1"),
            Some("ABC-1234".to_string())
        );
        assert_eq!(VehicleSyncer::code_from(None, "vehicle-0042"), Some("Unit_0042".to_string()));
        assert_eq!(VehicleSyncer::code_from(Some("  "), "vehicle-0042"), Some("Unit_0042".to_string()));
    }
}
