//! Entity data model (`SPEC_FULL.md` §3).
//!
//! Representation follows the re-architecture hint in §9: typed structs per entity
//! instead of dynamic dicts, with a free-form `extra` map only where the target API
//! is known to tolerate additional fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A payroll/ERP employee row, keyed by `employee_no`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmployeeRecord {
    pub employee_no: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gender_raw: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub hire_date: Option<String>,
    pub birth_date: Option<String>,
    pub pr_dept: Option<String>,
    pub job_code: Option<String>,
    pub title: Option<String>,
    /// Set once payroll terminates the employee; the reconciler treats the row as absent.
    pub term_date: Option<String>,
}

/// A telematics vehicle row, keyed by `serial`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleRecord {
    pub id: String,
    pub serial: Option<String>,
    pub vin: Option<String>,
    pub name: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub license_plate: Option<String>,
    /// Contains an embedded employee number for driver attribution.
    pub notes: Option<String>,
    pub static_driver_id: Option<String>,
    pub tags: Vec<String>,
    pub regulation_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentRecord {
    pub pr_dept: String,
    pub description: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_code: String,
    pub description: Option<String>,
    pub department: Option<String>,
    pub ship_address: Option<String>,
    pub ship_city: Option<String>,
    pub ship_state: Option<String>,
    pub ship_zip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleRecord {
    pub name: String,
}

/// SafetyAmp user record. `id` is the target-assigned correlation id; `emp_id`
/// carries the source `employee_no` for matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TargetUser {
    pub id: Option<i64>,
    pub emp_id: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<i32>,
    pub date_of_birth: Option<String>,
    pub current_hire_date: Option<String>,
    pub street: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub home_site_id: Option<i64>,
    pub system_access: Option<Value>,
    pub text_opt_out: Option<i32>,
    pub timezone: Option<String>,
    pub current_title_id: Option<i64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSite {
    pub id: i64,
    pub name: String,
    pub ext_id: Option<String>,
    pub cluster_id: Option<i64>,
    pub zip_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetCluster {
    pub id: i64,
    pub name: String,
    pub parent_cluster_id: Option<i64>,
    pub external_code: Option<String>,
    pub depth: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TargetAsset {
    pub id: Option<i64>,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub vin: Option<String>,
    pub site_id: Option<i64>,
    pub asset_type_id: Option<i64>,
    pub current_user_id: Option<i64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Metadata twin stored alongside every `CacheEntry` (§3, invariant iii).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_ts: f64,
    pub last_updated_ts: f64,
    pub item_count: usize,
    pub ttl_s: u64,
    pub source: String,
    pub last_refresh: Option<f64>,
}

/// A single tracked failing field from a prior 422.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedField {
    pub value_fingerprint: String,
    pub error: String,
    pub truncated_value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureCategory {
    DuplicateFields,
    MissingRequired,
    ValidationError,
    Unknown422,
    Http(u16),
}

impl FailureCategory {
    pub fn as_str(&self) -> String {
        match self {
            FailureCategory::DuplicateFields => "duplicate_fields".to_string(),
            FailureCategory::MissingRequired => "missing_required".to_string(),
            FailureCategory::ValidationError => "validation_error".to_string(),
            FailureCategory::Unknown422 => "unknown_422".to_string(),
            FailureCategory::Http(status) => format!("http_{status}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub failed_fields: HashMap<String, FailedField>,
    pub full_payload_fingerprint: String,
    pub category: FailureCategory,
    pub first_failed_at: f64,
    pub last_failed_at: f64,
    pub attempt_count: u32,
    pub last_status: u16,
    pub last_error: String,
    pub retry_requested: bool,
}

/// A single event appended to a `Session` (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        timestamp: f64,
        entity_type: String,
        entity_id: String,
        payload: Value,
    },
    Updated {
        timestamp: f64,
        entity_type: String,
        entity_id: String,
        changes: Value,
        original_data: Value,
    },
    Deleted {
        timestamp: f64,
        entity_type: String,
        entity_id: String,
        reason: String,
    },
    Skipped {
        timestamp: f64,
        entity_type: String,
        entity_id: String,
        reason: String,
    },
    Errors {
        timestamp: f64,
        entity_type: String,
        entity_id: String,
        error_message: String,
        error_type: String,
        payload: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// One invocation of the orchestrator's full cycle, or a single manually-triggered
/// syncer run, bounded by `start_sync`/`end_sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub sync_type: String,
    pub started_at: f64,
    pub ended_at: Option<f64>,
    pub events: Vec<SessionEvent>,
    pub summary: SessionSummary,
}

impl Session {
    pub fn new(sync_type: impl Into<String>, started_at: f64) -> Self {
        Self {
            id: format!("sync_{}", started_at as i64),
            sync_type: sync_type.into(),
            started_at,
            ended_at: None,
            events: Vec::new(),
            summary: SessionSummary::default(),
        }
    }

    pub fn push(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::Created { .. } => self.summary.created += 1,
            SessionEvent::Updated { .. } => self.summary.updated += 1,
            SessionEvent::Deleted { .. } => self.summary.deleted += 1,
            SessionEvent::Skipped { .. } => self.summary.skipped += 1,
            SessionEvent::Errors { .. } => self.summary.errors += 1,
        }
        self.events.push(event);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: f64,
    pub error_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub error_message: String,
    pub error_details: Option<Value>,
    pub source: String,
}

/// One outbound HTTP call, stored in the bounded ring (§3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub id: String,
    pub timestamp: String,
    pub service: String,
    pub method: String,
    pub endpoint: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
    pub request_summary: Option<String>,
    pub response_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiCallStats {
    pub total_calls: u64,
    pub by_service: HashMap<String, u64>,
    pub error_count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: f64,
    pub actor: Option<String>,
    pub action: String,
    pub path: String,
    pub body_summary: Option<String>,
}
