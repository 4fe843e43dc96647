//! OAuth2 refresh-token exchange shared by the providers that authenticate with a
//! bearer token refreshed from a stored refresh token (sharepoint, google_drive, box).
//! The browser-side consent flow that produces the initial refresh token is out of
//! scope (§1) — this module only has to turn a refresh token into a fresh access
//! token, or report that reconnect is required.

use serde::Deserialize;
use tracing::warn;

use crate::error::{KbError, Result};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchange a refresh token for a fresh bearer token against `token_endpoint`.
/// `client_id`/`client_secret` come from the environment the same way the teacher's
/// GitHub provider resolves its token: env var first, missing means reconnect.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_endpoint: &str,
    refresh_token: &str,
    client_id_env: &str,
    client_secret_env: &str,
) -> Result<String> {
    let client_id = std::env::var(client_id_env)
        .map_err(|_| KbError::provider_auth_required(token_endpoint))?;
    let client_secret = std::env::var(client_secret_env).unwrap_or_default();

    let resp = http
        .post(token_endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|e| KbError::provider_transient(token_endpoint, e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        warn!(%token_endpoint, %status, %body, "oauth refresh failed, reconnect required");
        return Err(KbError::provider_auth_required(token_endpoint));
    }

    let parsed: TokenResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient(token_endpoint, e.to_string()))?;
    Ok(parsed.access_token)
}

/// Resolve a refresh token from its configured environment variable, or report that
/// the UI needs to reconnect the provider.
pub fn resolve_refresh_token(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| KbError::provider_auth_required(env_var))
}
