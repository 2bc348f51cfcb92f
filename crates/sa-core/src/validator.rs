//! Pure field normalization and validation (`SPEC_FULL.md` §4.4).
//!
//! Every function here is deterministic and does no I/O; errors are returned, never
//! panicked or logged. Callers (the syncers) are responsible for logging.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Strip non-digits and format as E.164-ish. See §8 boundary behaviors.
pub fn clean_phone(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        11..=15 => Some(format!("+{digits}")),
        _ => {
            if input.trim_start().starts_with('+') && digits.len() >= 10 && digits.len() <= 15 {
                Some(format!("+{digits}"))
            } else {
                None
            }
        }
    }
}

const EMAIL_RE_LOCAL: &str = r"^[A-Za-z0-9._%+-]+$";

/// Lowercase, strip whitespace, then validate against the SafetyAmp email pattern.
pub fn clean_email(input: &str) -> Option<String> {
    let no_ws: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let lowered = no_ws.to_lowercase();
    if is_valid_email(&lowered) {
        Some(lowered)
    } else {
        None
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || !local.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
    }) {
        return false;
    }
    let _ = EMAIL_RE_LOCAL;
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    if host.is_empty()
        || !host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
    {
        return false;
    }
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// Male variants -> 1, female variants -> 0, else None.
pub fn normalize_gender(input: &str) -> Option<i32> {
    let normalized = input.trim().to_lowercase();
    const MALE: &[&str] = &["m", "male", "1"];
    const FEMALE: &[&str] = &["f", "female", "0", "2"];
    if MALE.contains(&normalized.as_str()) {
        Some(1)
    } else if FEMALE.contains(&normalized.as_str()) {
        Some(0)
    } else {
        None
    }
}

/// Accepts `YYYY-MM-DD` already, or an ISO-ish `YYYY-MM-DDTHH:MM:SS...` timestamp,
/// and normalizes to `YYYY-MM-DD`. Anything else is rejected.
pub fn format_date(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    let parts: Vec<&str> = date_part.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let [y, m, d] = [parts[0], parts[1], parts[2]];
    if y.len() == 4
        && y.chars().all(|c| c.is_ascii_digit())
        && m.len() == 2
        && m.chars().all(|c| c.is_ascii_digit())
        && d.len() == 2
        && d.chars().all(|c| c.is_ascii_digit())
    {
        let month: u32 = m.parse().ok()?;
        let day: u32 = d.parse().ok()?;
        if (1..=12).contains(&month) && (1..=31).contains(&day) {
            return Some(date_part.to_string());
        }
    }
    None
}

/// Exactly 17 alphanumeric characters.
pub fn validate_vin(input: &str) -> bool {
    input.len() == 17 && input.chars().all(|c| c.is_ascii_alphanumeric())
}

fn generate_email(first_name: &str, last_name: &str) -> String {
    let clean_first: String = first_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    let clean_last: String = last_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if clean_first.is_empty() || clean_last.is_empty() {
        "unknown@company.com".to_string()
    } else {
        format!("{clean_first}.{clean_last}@company.com")
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

/// `validate_employee(payload, emp_id, full_name)` per §4.4.
///
/// Returns `(is_valid, errors, cleaned_payload)`. The cleaned payload always has
/// `None`-equivalent values dropped, even when `is_valid` is false.
pub fn validate_employee(
    payload: &Map<String, Value>,
    emp_id: &str,
    full_name: &str,
) -> (bool, Vec<String>, Map<String, Value>) {
    let mut errors = Vec::new();
    let mut cleaned = payload.clone();

    let first_name = string_field(&cleaned, "first_name").filter(|s| !s.trim().is_empty());
    if first_name.is_none() {
        errors.push("Missing required field: First name".to_string());
        cleaned.insert("first_name".to_string(), Value::String("Unknown".to_string()));
    }
    let last_name = string_field(&cleaned, "last_name").filter(|s| !s.trim().is_empty());
    if last_name.is_none() {
        errors.push("Missing required field: Last name".to_string());
        cleaned.insert("last_name".to_string(), Value::String("Unknown".to_string()));
    }

    let email = string_field(&cleaned, "email").filter(|s| !s.trim().is_empty());
    if email.is_none() {
        errors.push("Missing required field: Email address".to_string());
        let fname = first_name.clone().unwrap_or_else(|| "Unknown".to_string());
        let lname = last_name.clone().unwrap_or_else(|| "Unknown".to_string());
        if fname != "Unknown" && lname != "Unknown" {
            let generated = generate_email(&fname, &lname);
            cleaned.insert("email".to_string(), Value::String(generated));
        } else {
            errors.push(format!(
                "Cannot generate email for employee {emp_id} - missing name data ({full_name})"
            ));
        }
    } else if let Some(email_value) = email.as_deref() {
        if clean_email(email_value).is_none() {
            errors.push(format!("Invalid email format: {email_value}"));
            let fname = string_field(&cleaned, "first_name").unwrap_or_else(|| "unknown".to_string());
            let lname = string_field(&cleaned, "last_name").unwrap_or_else(|| "unknown".to_string());
            cleaned.insert(
                "email".to_string(),
                Value::String(generate_email(&fname, &lname)),
            );
        }
    }

    for phone_field in ["mobile_phone", "work_phone"] {
        if let Some(phone) = string_field(&cleaned, phone_field) {
            match clean_phone(&phone) {
                Some(cleaned_phone) => {
                    cleaned.insert(phone_field.to_string(), Value::String(cleaned_phone));
                }
                None => {
                    cleaned.remove(phone_field);
                }
            }
        }
    }

    for field in ["first_name", "middle_name", "last_name", "email", "street", "city", "state"] {
        if let Some(s) = string_field(&cleaned, field) {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                cleaned.remove(field);
            } else {
                cleaned.insert(field.to_string(), Value::String(trimmed.to_string()));
            }
        }
    }

    cleaned.retain(|_, v| !v.is_null());

    (errors.is_empty(), errors, cleaned)
}

/// `validate_vehicle(payload, vehicle_id)` per §4.4.
pub fn validate_vehicle(
    payload: &Map<String, Value>,
    vehicle_id: &str,
) -> (bool, Vec<String>, Map<String, Value>) {
    let mut errors = Vec::new();
    let mut cleaned = payload.clone();
    let last4 = last_n_chars(vehicle_id, 4);

    if string_field(&cleaned, "name").filter(|s| !s.trim().is_empty()).is_none() {
        errors.push("Missing required field: Vehicle name".to_string());
        cleaned.insert(
            "name".to_string(),
            Value::String(format!("Vehicle_{last4}")),
        );
    }
    if string_field(&cleaned, "code").filter(|s| !s.trim().is_empty()).is_none() {
        errors.push("Missing required field: Vehicle code".to_string());
        cleaned.insert("code".to_string(), Value::String(format!("V_{last4}")));
    }

    if let Some(vin) = string_field(&cleaned, "vin") {
        if !validate_vin(&vin) {
            cleaned.remove("vin");
        }
    }

    for field in ["name", "code", "model", "description", "vin"] {
        if let Some(s) = string_field(&cleaned, field) {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                cleaned.remove(field);
            } else {
                cleaned.insert(field.to_string(), Value::String(trimmed.to_string()));
            }
        }
    }

    cleaned.retain(|_, v| !v.is_null());

    (errors.is_empty(), errors, cleaned)
}

fn last_n_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= n {
        s.to_string()
    } else {
        chars[chars.len() - n..].iter().collect()
    }
}

/// Dedupe a list of JSON records by a key field. First occurrence wins (§9 open
/// questions); records missing the key are kept as-is.
pub fn remove_duplicate_entries(items: Vec<Value>, key_field: &str) -> Vec<Value> {
    let mut seen = BTreeMap::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let key = item.get(key_field).and_then(|v| v.as_str()).map(str::to_string);
        match key {
            Some(k) if !k.is_empty() => {
                if seen.insert(k, ()).is_none() {
                    out.push(item);
                }
            }
            _ => out.push(item),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_phone_boundaries() {
        assert_eq!(clean_phone("(555) 123-4567"), Some("+15551234567".to_string()));
        assert_eq!(clean_phone("15551234567"), Some("+15551234567".to_string()));
        assert_eq!(clean_phone("+44 20 7946 0958"), Some("+442079460958".to_string()));
        assert_eq!(clean_phone("123"), None);
        assert_eq!(clean_phone("1234567890123456"), None);
    }

    #[test]
    fn clean_phone_idempotent() {
        let x = "(555) 123-4567";
        let once = clean_phone(x).unwrap();
        let twice = clean_phone(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_email_basic() {
        assert_eq!(
            clean_email(" John.Doe@Example.com "),
            Some("john.doe@example.com".to_string())
        );
        assert_eq!(clean_email("not-an-email"), None);
    }

    #[test]
    fn normalize_gender_variants() {
        assert_eq!(normalize_gender("Male"), Some(1));
        assert_eq!(normalize_gender("F"), Some(0));
        assert_eq!(normalize_gender("2"), Some(0));
        assert_eq!(normalize_gender("unknown"), None);
    }

    #[test]
    fn format_date_variants() {
        assert_eq!(format_date("2020-01-15"), Some("2020-01-15".to_string()));
        assert_eq!(
            format_date("2020-01-15T08:30:00Z"),
            Some("2020-01-15".to_string())
        );
        assert_eq!(format_date("01/15/2020"), None);
    }

    #[test]
    fn vin_exactly_17_alphanumeric() {
        assert!(validate_vin("1HGCM82633A004352"));
        assert!(!validate_vin("SHORT"));
        assert!(!validate_vin("1HGCM82633A00435!"));
    }

    #[test]
    fn validate_employee_generates_defaults() {
        let payload = json!({"last_name": "Doe"});
        let (is_valid, errors, cleaned) =
            validate_employee(payload.as_object().unwrap(), "1", "Doe");
        assert!(!is_valid);
        assert!(errors.iter().any(|e| e.contains("First name")));
        assert_eq!(cleaned.get("first_name").unwrap(), "Unknown");
        assert!(cleaned.contains_key("email"));
    }

    #[test]
    fn validate_employee_drops_invalid_phone() {
        let payload = json!({
            "first_name": "John",
            "last_name": "Doe",
            "email": "john@example.com",
            "mobile_phone": "123"
        });
        let (is_valid, _errors, cleaned) =
            validate_employee(payload.as_object().unwrap(), "1", "John Doe");
        assert!(is_valid);
        assert!(!cleaned.contains_key("mobile_phone"));
    }

    #[test]
    fn remove_duplicates_keeps_first() {
        let items = vec![json!({"id": "1", "v": "a"}), json!({"id": "1", "v": "b"})];
        let out = remove_duplicate_entries(items, "id");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["v"], "a");
    }
}
