//! Error suggestions engine (`SPEC_FULL.md` §4.8 "Error suggestions engine"):
//! turns the raw error log and failed-sync records into grouped, actionable
//! suggestions for the dashboard.

use sa_core::models::{ErrorLogEntry, FailureCategory, FailureRecord};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Category {
    DuplicateField,
    RateLimit,
    MissingField,
    Connectivity,
    Validation,
    Unknown,
}

impl Category {
    fn as_str(&self) -> &'static str {
        match self {
            Category::DuplicateField => "duplicate_field",
            Category::RateLimit => "rate_limit",
            Category::MissingField => "missing_field",
            Category::Connectivity => "connectivity",
            Category::Validation => "validation",
            Category::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Suggestion {
    pub id: String,
    pub category: String,
    pub field: String,
    pub severity: String,
    pub occurrence_count: usize,
    pub title: String,
    pub description: String,
    pub recommended_action: String,
    pub affected_ids: Vec<String>,
}

const MAX_AFFECTED: usize = 50;

fn duplicate_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)already been taken|duplicate|already exists|unique constraint").unwrap())
}

fn rate_limit_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)rate limit|too many requests|429|throttl").unwrap())
}

fn missing_field_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)missing required|is required|cannot be blank|cannot be null").unwrap())
}

fn connectivity_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)timeout|connection|connect|unreachable|refused").unwrap())
}

fn validation_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)invalid|validation|format|must be").unwrap())
}

fn field_already_taken_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)the\s+([\w\s]+?)\s+has\s+already").unwrap())
}

fn field_colon_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)field:\s+(\w+)").unwrap())
}

fn field_is_required_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)(\w+)\s+is\s+required").unwrap())
}

fn categorize_message(message: &str, error_type: &str) -> Category {
    if duplicate_re().is_match(message) {
        return Category::DuplicateField;
    }
    if rate_limit_re().is_match(message) {
        return Category::RateLimit;
    }
    if missing_field_re().is_match(message) {
        return Category::MissingField;
    }
    if connectivity_re().is_match(message) || connectivity_re().is_match(error_type) {
        return Category::Connectivity;
    }
    if validation_re().is_match(message) || error_type.to_lowercase().contains("validation") {
        return Category::Validation;
    }
    Category::Unknown
}

fn extract_field(message: &str) -> String {
    if let Some(caps) = field_already_taken_re().captures(message) {
        return caps[1].trim().to_lowercase().replace(' ', "_");
    }
    if let Some(caps) = field_colon_re().captures(message) {
        return caps[1].to_lowercase();
    }
    if let Some(caps) = field_is_required_re().captures(message) {
        return caps[1].to_lowercase();
    }
    "general".to_string()
}

fn category_from_failure_reason(category: &FailureCategory) -> Category {
    match category {
        FailureCategory::DuplicateFields => Category::DuplicateField,
        FailureCategory::MissingRequired => Category::MissingField,
        FailureCategory::ValidationError => Category::Validation,
        FailureCategory::Unknown422 | FailureCategory::Http(_) => Category::Unknown,
    }
}

fn severity_of(category: Category, count: usize) -> Severity {
    match category {
        Category::RateLimit | Category::Connectivity => Severity::High,
        Category::DuplicateField => {
            if count >= 10 {
                Severity::High
            } else if count >= 2 {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
        _ => {
            if count >= 10 {
                Severity::High
            } else if count >= 3 {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
    }
}

fn template(category: Category, field: &str) -> (String, String, String) {
    match category {
        Category::DuplicateField => (
            format!("Duplicate {field}"),
            format!("Multiple records failed because their {field} already exists in SafetyAmp."),
            format!("Review source records for duplicate {field} values and merge or correct them."),
        ),
        Category::RateLimit => (
            "Rate limit exceeded".to_string(),
            "Requests to an upstream API were throttled.".to_string(),
            "Reduce sync frequency or raise the rate limit with the provider.".to_string(),
        ),
        Category::MissingField => (
            format!("Missing required {field}"),
            format!("Records are missing a required {field} value."),
            format!("Populate {field} at the source before the next sync."),
        ),
        Category::Connectivity => (
            "Connectivity issue".to_string(),
            "Calls to an upstream service failed to connect.".to_string(),
            "Check network access and upstream service health.".to_string(),
        ),
        Category::Validation => (
            format!("Validation failure on {field}"),
            format!("Records failed validation on {field}."),
            format!("Correct the {field} format at the source."),
        ),
        Category::Unknown => (
            "Unclassified sync errors".to_string(),
            "Errors could not be categorized automatically.".to_string(),
            "Inspect the raw error log for details.".to_string(),
        ),
    }
}

struct Group {
    category: Category,
    field: String,
    affected_ids: Vec<String>,
}

/// Builds the sorted suggestion list from recent error-log entries and the
/// currently outstanding failed-sync records.
pub fn build_suggestions(errors: &[ErrorLogEntry], failures: &[FailureRecord]) -> Vec<Suggestion> {
    let mut groups: BTreeMap<(Category, String), Group> = BTreeMap::new();

    for err in errors {
        let category = categorize_message(&err.error_message, &err.error_type);
        let field = extract_field(&err.error_message);
        let entry = groups
            .entry((category, field.clone()))
            .or_insert_with(|| Group {
                category,
                field,
                affected_ids: Vec::new(),
            });
        entry.affected_ids.push(err.entity_id.clone());
    }

    for record in failures {
        let category = category_from_failure_reason(&record.category);
        let mut fields: Vec<&String> = record.failed_fields.keys().collect();
        fields.sort();
        let field = fields.first().map(|s| s.to_string()).unwrap_or_else(|| "general".to_string());
        let entry = groups
            .entry((category, field.clone()))
            .or_insert_with(|| Group {
                category,
                field,
                affected_ids: Vec::new(),
            });
        entry.affected_ids.push(record.entity_id.clone());
    }

    let mut suggestions: Vec<Suggestion> = groups
        .into_values()
        .map(|group| {
            let count = group.affected_ids.len();
            let severity = severity_of(group.category, count);
            let (mut title, description, recommended_action) = template(group.category, &group.field);
            if count > 1 {
                title = format!("{title} ({count} occurrences)");
            }
            let mut sorted_ids = group.affected_ids.clone();
            sorted_ids.sort();
            let hash_input = format!(
                "{}:{}:{}",
                group.category.as_str(),
                group.field,
                sorted_ids.iter().take(5).cloned().collect::<Vec<_>>().join(",")
            );
            let digest = Sha256::digest(hash_input.as_bytes());
            let id = format!("sug_{}", hex::encode(&digest[..4]));
            let mut affected_ids = group.affected_ids;
            affected_ids.truncate(MAX_AFFECTED);
            Suggestion {
                id,
                category: group.category.as_str().to_string(),
                field: group.field,
                severity: severity.as_str().to_string(),
                occurrence_count: count,
                title,
                description,
                recommended_action,
                affected_ids,
            }
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.occurrence_count.cmp(&a.occurrence_count))
    });
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(message: &str, error_type: &str, entity_id: &str) -> ErrorLogEntry {
        ErrorLogEntry {
            timestamp: 0.0,
            error_type: error_type.into(),
            entity_type: "employee".into(),
            entity_id: entity_id.into(),
            error_message: message.into(),
            error_details: None,
            source: "employee_syncer".into(),
        }
    }

    #[test]
    fn categorizes_duplicate_before_validation() {
        assert_eq!(
            categorize_message("The email has already been taken.", "http_error"),
            Category::DuplicateField
        );
    }

    #[test]
    fn extracts_field_from_already_taken_message() {
        assert_eq!(extract_field("The mobile phone has already been taken."), "mobile_phone");
    }

    #[test]
    fn groups_and_ranks_by_severity_then_count() {
        let errors = vec![
            error("The email has already been taken.", "validation_error", "1"),
            error("The email has already been taken.", "validation_error", "2"),
            error("connection timeout", "network_error", "3"),
        ];
        let suggestions = build_suggestions(&errors, &[]);
        assert_eq!(suggestions[0].category, "connectivity");
        assert_eq!(suggestions[0].severity, "high");
        assert!(suggestions.iter().any(|s| s.category == "duplicate_field" && s.occurrence_count == 2));
    }

    #[test]
    fn suggestion_id_is_stable_for_the_same_group() {
        let errors = vec![error("The vin has already been taken.", "validation_error", "42")];
        let first = build_suggestions(&errors, &[]);
        let second = build_suggestions(&errors, &[]);
        assert_eq!(first[0].id, second[0].id);
    }
}
