//! `SyncSource` variants (§3): one remote-provider binding per folder, carrying
//! provider-specific credentials and selectors. Stored as tagged JSON in
//! `sync_sources.config_json` — the uniform `Provider` capability (§4.7) dispatches on
//! the `provider` column without needing to deserialize every variant up front.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SyncSourceConfig {
    Github(GitHubSyncConfig),
    Sharepoint(SharepointSyncConfig),
    GoogleDrive(GoogleDriveSyncConfig),
    AzureDevops(AzureDevopsSyncConfig),
    Jira(JiraSyncConfig),
    Confluence(ConfluenceSyncConfig),
    Box(BoxSyncConfig),
}

impl SyncSourceConfig {
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Github(_) => "github",
            Self::Sharepoint(_) => "sharepoint",
            Self::GoogleDrive(_) => "google_drive",
            Self::AzureDevops(_) => "azure_devops",
            Self::Jira(_) => "jira",
            Self::Confluence(_) => "confluence",
            Self::Box(_) => "box",
        }
    }
}

/// repo + branch + path selector, token via an env var name (never the token itself
/// at rest — matches the teacher's `daemon/github.rs` auth convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSyncConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path_prefix: Option<String>,
    pub token_env: String,
}

/// site + drive + optional folder path, OAuth2 bearer refreshed via `refresh_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharepointSyncConfig {
    pub site_url: String,
    pub drive_id: String,
    pub path_prefix: Option<String>,
    pub oauth_refresh_token_env: String,
}

/// drive id + folder id selector, OAuth2 bearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveSyncConfig {
    pub folder_id: String,
    pub oauth_refresh_token_env: String,
}

/// org + project + repo + branch selector, PAT or OAuth2 bearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureDevopsSyncConfig {
    pub organization: String,
    pub project: String,
    pub repo: String,
    pub branch: String,
    pub token_env: String,
}

/// project key + JQL filter selector, basic auth or OAuth2 bearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSyncConfig {
    pub base_url: String,
    pub project_key: String,
    pub jql_filter: Option<String>,
    pub token_env: String,
}

/// space key selector, basic auth or OAuth2 bearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceSyncConfig {
    pub base_url: String,
    pub space_key: String,
    pub token_env: String,
}

/// folder id selector, OAuth2 bearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxSyncConfig {
    pub folder_id: String,
    pub oauth_refresh_token_env: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_name_round_trips_through_json() {
        let source = SyncSourceConfig::Jira(JiraSyncConfig {
            base_url: "https://acme.atlassian.net".to_string(),
            project_key: "ENG".to_string(),
            jql_filter: None,
            token_env: "JIRA_TOKEN".to_string(),
        });
        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("\"provider\":\"jira\""));
        let back: SyncSourceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider_name(), "jira");
    }
}
