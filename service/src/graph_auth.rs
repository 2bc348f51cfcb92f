//! OAuth client-credentials token acquisition for Microsoft Graph
//! (`SPEC_FULL.md` §6). Token acquisition itself is an out-of-scope external
//! collaborator (`SPEC_FULL.md` §1) — this is a one-shot fetch at startup,
//! not a refreshing token source; operators running long-lived deployments
//! should front this with the vault-backed token broker the source system
//! uses in production.

use sa_core::config::GraphConfig;
use sa_core::{Error, Result};
use serde::Deserialize;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub async fn fetch_client_credentials_token(cfg: &GraphConfig) -> Result<String> {
    let url = format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        cfg.tenant_id
    );
    let params = [
        ("client_id", cfg.client_id.as_str()),
        ("client_secret", cfg.client_secret.expose()),
        ("scope", "https://graph.microsoft.com/.default"),
        ("grant_type", "client_credentials"),
    ];

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .form(&params)
        .send()
        .await
        .map_err(|e| Error::network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Http { status, body });
    }

    let token: TokenResponse = response.json().await?;
    Ok(token.access_token)
}
