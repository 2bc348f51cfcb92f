//! Microsoft Graph v1.0 client (`SPEC_FULL.md` §6): the authoritative
//! identity provider, used only to look up an employee's canonical email.
//!
//! OAuth client-credentials token acquisition is out of scope (§1) — this
//! client takes an already-acquired bearer token; the binary is responsible
//! for obtaining it before construction.

use crate::client::{HttpClient, RetryPolicy};
use sa_core::Result;
use sa_tracking::ApiCallTracker;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct GraphClient {
    inner: HttpClient,
}

impl GraphClient {
    pub fn new(bearer_token: &str, retry: RetryPolicy, tracker: Option<Arc<ApiCallTracker>>) -> Self {
        let headers = vec![("Authorization".to_string(), format!("Bearer {bearer_token}"))];
        Self {
            inner: HttpClient::new(
                "graph",
                "https://graph.microsoft.com/v1.0",
                headers,
                20,
                Duration::from_secs(1),
                retry,
                tracker,
            ),
        }
    }

    /// Active users with a non-empty `employeeId` and a non-`onmicrosoft.com`
    /// mail address, keyed by `employeeId`.
    pub async fn active_employee_emails(&self) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        let filter = "accountEnabled eq true and employeeId ne null";
        let mut url = format!(
            "/users?$filter={}&$select=employeeId,mail,userPrincipalName",
            urlencode(filter)
        );
        loop {
            let response = self.inner.get(&url, &[]).await?;
            for user in response.get("value").and_then(Value::as_array).into_iter().flatten() {
                let Some(emp_id) = user.get("employeeId").and_then(Value::as_str) else {
                    continue;
                };
                let mail = user
                    .get("mail")
                    .and_then(Value::as_str)
                    .or_else(|| user.get("userPrincipalName").and_then(Value::as_str));
                let Some(mail) = mail else { continue };
                if mail.to_lowercase().contains("onmicrosoft.com") {
                    continue;
                }
                out.insert(emp_id.to_string(), mail.to_lowercase());
            }
            match response.get("@odata.nextLink").and_then(Value::as_str) {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }
        Ok(out)
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '\'' => "%27".to_string(),
            c => c.to_string(),
        })
        .collect()
}
