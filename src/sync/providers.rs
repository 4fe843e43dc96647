//! The six `DocumentApi` implementations that `rest.rs`'s `RestProvider` wraps into
//! full `Provider`s (§4.7.1). Each resolves its own auth (PAT from env, or OAuth2
//! bearer refreshed through `oauth::refresh_access_token`) and knows its own REST
//! listing/fetch endpoints; the paging/diff/apply logic is shared.

use async_trait::async_trait;

use crate::error::{KbError, Result};
use crate::state::sync_source::{
    AzureDevopsSyncConfig, BoxSyncConfig, ConfluenceSyncConfig, GoogleDriveSyncConfig,
    JiraSyncConfig, SharepointSyncConfig,
};
use crate::state::SyncSourceConfig;

use super::oauth;
use super::provider::AuthToken;
use super::rest::{DocumentApi, ListPage, RemoteDoc};

fn expect<'a, T>(source: &'a SyncSourceConfig, extract: impl FnOnce(&'a SyncSourceConfig) -> Option<T>) -> Result<T> {
    extract(source).ok_or_else(|| KbError::invalid_path("sync_source", "config/provider mismatch"))
}

pub struct SharepointApi {
    pub http: reqwest::Client,
}

#[async_trait]
impl DocumentApi for SharepointApi {
    fn name(&self) -> &'static str {
        "sharepoint"
    }

    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken> {
        let config: &SharepointSyncConfig = match source {
            SyncSourceConfig::Sharepoint(c) => c,
            _ => return Err(KbError::invalid_path("sync_source", "expected sharepoint")),
        };
        let refresh_token = oauth::resolve_refresh_token(&config.oauth_refresh_token_env)?;
        let bearer = oauth::refresh_access_token(
            &self.http,
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            &refresh_token,
            "KBASE_SHAREPOINT_CLIENT_ID",
            "KBASE_SHAREPOINT_CLIENT_SECRET",
        )
        .await?;
        Ok(AuthToken { bearer })
    }

    async fn list(&self, source: &SyncSourceConfig, token: &AuthToken, cursor: Option<&str>) -> Result<ListPage> {
        let config: &SharepointSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Sharepoint(c) => Some(c),
            _ => None,
        })?;
        let url = cursor.map(str::to_string).unwrap_or_else(|| {
            format!(
                "https://graph.microsoft.com/v1.0/sites/{}/drives/{}/root/delta",
                config.site_url, config.drive_id
            )
        });
        list_graph_delta(&self.http, &url, &token.bearer, config.path_prefix.as_deref()).await
    }

    async fn fetch(&self, source: &SyncSourceConfig, token: &AuthToken, doc: &RemoteDoc) -> Result<Vec<u8>> {
        let config: &SharepointSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Sharepoint(c) => Some(c),
            _ => None,
        })?;
        let url = format!(
            "https://graph.microsoft.com/v1.0/sites/{}/drives/{}/root:/{}:/content",
            config.site_url, config.drive_id, doc.path
        );
        fetch_bearer(&self.http, &url, &token.bearer).await
    }
}

pub struct GoogleDriveApi {
    pub http: reqwest::Client,
}

#[async_trait]
impl DocumentApi for GoogleDriveApi {
    fn name(&self) -> &'static str {
        "google_drive"
    }

    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken> {
        let config: &GoogleDriveSyncConfig = match source {
            SyncSourceConfig::GoogleDrive(c) => c,
            _ => return Err(KbError::invalid_path("sync_source", "expected google_drive")),
        };
        let refresh_token = oauth::resolve_refresh_token(&config.oauth_refresh_token_env)?;
        let bearer = oauth::refresh_access_token(
            &self.http,
            "https://oauth2.googleapis.com/token",
            &refresh_token,
            "KBASE_GOOGLE_CLIENT_ID",
            "KBASE_GOOGLE_CLIENT_SECRET",
        )
        .await?;
        Ok(AuthToken { bearer })
    }

    async fn list(&self, source: &SyncSourceConfig, token: &AuthToken, cursor: Option<&str>) -> Result<ListPage> {
        let config: &GoogleDriveSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::GoogleDrive(c) => Some(c),
            _ => None,
        })?;
        let url = match cursor {
            Some(page_token) => format!(
                "https://www.googleapis.com/drive/v3/changes?pageToken={page_token}"
            ),
            None => format!(
                "https://www.googleapis.com/drive/v3/files?q='{}'+in+parents&fields=files(id,md5Checksum)",
                config.folder_id
            ),
        };
        list_drive_page(&self.http, &url, &token.bearer).await
    }

    async fn fetch(&self, _source: &SyncSourceConfig, token: &AuthToken, doc: &RemoteDoc) -> Result<Vec<u8>> {
        let url = format!("https://www.googleapis.com/drive/v3/files/{}?alt=media", doc.path);
        fetch_bearer(&self.http, &url, &token.bearer).await
    }
}

pub struct AzureDevopsApi {
    pub http: reqwest::Client,
}

#[async_trait]
impl DocumentApi for AzureDevopsApi {
    fn name(&self) -> &'static str {
        "azure_devops"
    }

    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken> {
        let config: &AzureDevopsSyncConfig = match source {
            SyncSourceConfig::AzureDevops(c) => c,
            _ => return Err(KbError::invalid_path("sync_source", "expected azure_devops")),
        };
        let token = std::env::var(&config.token_env)
            .map_err(|_| KbError::provider_auth_required("azure_devops"))?;
        Ok(AuthToken { bearer: token })
    }

    async fn list(&self, source: &SyncSourceConfig, token: &AuthToken, cursor: Option<&str>) -> Result<ListPage> {
        let config: &AzureDevopsSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::AzureDevops(c) => Some(c),
            _ => None,
        })?;
        let url = cursor.map(str::to_string).unwrap_or_else(|| {
            format!(
                "https://dev.azure.com/{}/{}/_apis/git/repositories/{}/items?recursionLevel=Full&versionDescriptor.version={}&api-version=7.1",
                config.organization, config.project, config.repo, config.branch
            )
        });
        list_azure_items(&self.http, &url, &token.bearer).await
    }

    async fn fetch(&self, source: &SyncSourceConfig, token: &AuthToken, doc: &RemoteDoc) -> Result<Vec<u8>> {
        let config: &AzureDevopsSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::AzureDevops(c) => Some(c),
            _ => None,
        })?;
        let url = format!(
            "https://dev.azure.com/{}/{}/_apis/git/repositories/{}/items?path={}&versionDescriptor.version={}&api-version=7.1",
            config.organization, config.project, config.repo, doc.path, config.branch
        );
        fetch_bearer(&self.http, &url, &token.bearer).await
    }
}

pub struct JiraApi {
    pub http: reqwest::Client,
}

#[async_trait]
impl DocumentApi for JiraApi {
    fn name(&self) -> &'static str {
        "jira"
    }

    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken> {
        let config: &JiraSyncConfig = match source {
            SyncSourceConfig::Jira(c) => c,
            _ => return Err(KbError::invalid_path("sync_source", "expected jira")),
        };
        let token = std::env::var(&config.token_env)
            .map_err(|_| KbError::provider_auth_required("jira"))?;
        Ok(AuthToken { bearer: token })
    }

    async fn list(&self, source: &SyncSourceConfig, token: &AuthToken, cursor: Option<&str>) -> Result<ListPage> {
        let config: &JiraSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Jira(c) => Some(c),
            _ => None,
        })?;
        let jql = config
            .jql_filter
            .clone()
            .unwrap_or_else(|| format!("project={}", config.project_key));
        let start_at = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
        let url = format!(
            "{}/rest/api/3/search?jql={}&startAt={}&fields=updated",
            config.base_url, jql, start_at
        );
        list_jira_issues(&self.http, &url, &token.bearer, start_at).await
    }

    async fn fetch(&self, source: &SyncSourceConfig, token: &AuthToken, doc: &RemoteDoc) -> Result<Vec<u8>> {
        let config: &JiraSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Jira(c) => Some(c),
            _ => None,
        })?;
        let url = format!("{}/rest/api/3/issue/{}", config.base_url, doc.path);
        fetch_bearer(&self.http, &url, &token.bearer).await
    }
}

pub struct ConfluenceApi {
    pub http: reqwest::Client,
}

#[async_trait]
impl DocumentApi for ConfluenceApi {
    fn name(&self) -> &'static str {
        "confluence"
    }

    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken> {
        let config: &ConfluenceSyncConfig = match source {
            SyncSourceConfig::Confluence(c) => c,
            _ => return Err(KbError::invalid_path("sync_source", "expected confluence")),
        };
        let token = std::env::var(&config.token_env)
            .map_err(|_| KbError::provider_auth_required("confluence"))?;
        Ok(AuthToken { bearer: token })
    }

    async fn list(&self, source: &SyncSourceConfig, token: &AuthToken, cursor: Option<&str>) -> Result<ListPage> {
        let config: &ConfluenceSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Confluence(c) => Some(c),
            _ => None,
        })?;
        let start = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
        let url = format!(
            "{}/wiki/rest/api/content?spaceKey={}&start={}&limit=50",
            config.base_url, config.space_key, start
        );
        list_confluence_page(&self.http, &url, &token.bearer, start).await
    }

    async fn fetch(&self, source: &SyncSourceConfig, token: &AuthToken, doc: &RemoteDoc) -> Result<Vec<u8>> {
        let config: &ConfluenceSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Confluence(c) => Some(c),
            _ => None,
        })?;
        let url = format!(
            "{}/wiki/rest/api/content/{}?expand=body.storage",
            config.base_url, doc.path
        );
        fetch_bearer(&self.http, &url, &token.bearer).await
    }
}

pub struct BoxApi {
    pub http: reqwest::Client,
}

#[async_trait]
impl DocumentApi for BoxApi {
    fn name(&self) -> &'static str {
        "box"
    }

    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken> {
        let config: &BoxSyncConfig = match source {
            SyncSourceConfig::Box(c) => c,
            _ => return Err(KbError::invalid_path("sync_source", "expected box")),
        };
        let refresh_token = oauth::resolve_refresh_token(&config.oauth_refresh_token_env)?;
        let bearer = oauth::refresh_access_token(
            &self.http,
            "https://api.box.com/oauth2/token",
            &refresh_token,
            "KBASE_BOX_CLIENT_ID",
            "KBASE_BOX_CLIENT_SECRET",
        )
        .await?;
        Ok(AuthToken { bearer })
    }

    async fn list(&self, source: &SyncSourceConfig, token: &AuthToken, cursor: Option<&str>) -> Result<ListPage> {
        let config: &BoxSyncConfig = expect(source, |s| match s {
            SyncSourceConfig::Box(c) => Some(c),
            _ => None,
        })?;
        let url = match cursor {
            Some(marker) => format!(
                "https://api.box.com/2.0/folders/{}/items?marker={}&fields=id,sha1",
                config.folder_id, marker
            ),
            None => format!(
                "https://api.box.com/2.0/folders/{}/items?fields=id,sha1",
                config.folder_id
            ),
        };
        list_box_page(&self.http, &url, &token.bearer).await
    }

    async fn fetch(&self, _source: &SyncSourceConfig, token: &AuthToken, doc: &RemoteDoc) -> Result<Vec<u8>> {
        let url = format!("https://api.box.com/2.0/files/{}/content", doc.path);
        fetch_bearer(&self.http, &url, &token.bearer).await
    }
}

async fn fetch_bearer(http: &reqwest::Client, url: &str, bearer: &str) -> Result<Vec<u8>> {
    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient(url, e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient(url, format!("fetch returned {}", resp.status())));
    }
    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| KbError::provider_transient(url, e.to_string()))
}

/// Each of these is a thin wrapper over `fetch_bearer`'s GET-and-parse shape,
/// differing only in the JSON shape of the listing response. Kept separate rather
/// than one generic parser because each provider's paging token lives in a different
/// field (`@odata.nextLink`, `nextPageToken`, `continuationToken`, `startAt`, `start`,
/// marker) and none of them share a schema worth abstracting further.
async fn list_graph_delta(http: &reqwest::Client, url: &str, bearer: &str, path_prefix: Option<&str>) -> Result<ListPage> {
    #[derive(serde::Deserialize)]
    struct Item {
        name: String,
        #[serde(default)]
        deleted: Option<serde_json::Value>,
        #[serde(rename = "cTag")]
        #[serde(default)]
        c_tag: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct DeltaResponse {
        value: Vec<Item>,
        #[serde(rename = "@odata.nextLink")]
        next_link: Option<String>,
    }

    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient("sharepoint", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient("sharepoint", format!("delta returned {}", resp.status())));
    }
    let parsed: DeltaResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("sharepoint", e.to_string()))?;

    let docs = parsed
        .value
        .into_iter()
        .filter(|item| item.deleted.is_none())
        .filter(|item| path_prefix.map(|p| item.name.starts_with(p)).unwrap_or(true))
        .map(|item| RemoteDoc {
            etag: item.c_tag.unwrap_or_default(),
            path: item.name,
        })
        .collect();

    let has_more = parsed.next_link.is_some();
    Ok(ListPage {
        docs,
        next_cursor: parsed.next_link.unwrap_or_default(),
        has_more,
    })
}

async fn list_drive_page(http: &reqwest::Client, url: &str, bearer: &str) -> Result<ListPage> {
    #[derive(serde::Deserialize)]
    struct File {
        id: String,
        #[serde(rename = "md5Checksum")]
        #[serde(default)]
        md5_checksum: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct FilesResponse {
        #[serde(default)]
        files: Vec<File>,
        #[serde(rename = "nextPageToken")]
        next_page_token: Option<String>,
    }

    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient("google_drive", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient("google_drive", format!("list returned {}", resp.status())));
    }
    let parsed: FilesResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("google_drive", e.to_string()))?;

    let has_more = parsed.next_page_token.is_some();
    Ok(ListPage {
        docs: parsed
            .files
            .into_iter()
            .map(|f| RemoteDoc { etag: f.md5_checksum.unwrap_or_default(), path: f.id })
            .collect(),
        next_cursor: parsed.next_page_token.unwrap_or_default(),
        has_more,
    })
}

async fn list_azure_items(http: &reqwest::Client, url: &str, bearer: &str) -> Result<ListPage> {
    #[derive(serde::Deserialize)]
    struct Item {
        path: String,
        #[serde(rename = "objectId")]
        #[serde(default)]
        object_id: Option<String>,
        #[serde(rename = "isFolder")]
        #[serde(default)]
        is_folder: bool,
    }
    #[derive(serde::Deserialize)]
    struct ItemsResponse {
        value: Vec<Item>,
    }

    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient("azure_devops", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient("azure_devops", format!("items returned {}", resp.status())));
    }
    let parsed: ItemsResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("azure_devops", e.to_string()))?;

    Ok(ListPage {
        docs: parsed
            .value
            .into_iter()
            .filter(|item| !item.is_folder)
            .map(|item| RemoteDoc {
                etag: item.object_id.unwrap_or_default(),
                path: item.path.trim_start_matches('/').to_string(),
            })
            .collect(),
        next_cursor: String::new(),
        has_more: false,
    })
}

async fn list_jira_issues(http: &reqwest::Client, url: &str, bearer: &str, start_at: u64) -> Result<ListPage> {
    #[derive(serde::Deserialize)]
    struct Issue {
        key: String,
        fields: IssueFields,
    }
    #[derive(serde::Deserialize)]
    struct IssueFields {
        updated: String,
    }
    #[derive(serde::Deserialize)]
    struct SearchResponse {
        issues: Vec<Issue>,
        total: u64,
        #[serde(rename = "maxResults")]
        max_results: u64,
    }

    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient("jira", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient("jira", format!("search returned {}", resp.status())));
    }
    let parsed: SearchResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("jira", e.to_string()))?;

    let next = start_at + parsed.max_results;
    let has_more = next < parsed.total;
    Ok(ListPage {
        docs: parsed
            .issues
            .into_iter()
            .map(|issue| RemoteDoc { etag: issue.fields.updated, path: issue.key })
            .collect(),
        next_cursor: next.to_string(),
        has_more,
    })
}

async fn list_confluence_page(http: &reqwest::Client, url: &str, bearer: &str, start: u64) -> Result<ListPage> {
    #[derive(serde::Deserialize)]
    struct Page {
        id: String,
        version: PageVersion,
    }
    #[derive(serde::Deserialize)]
    struct PageVersion {
        number: u64,
    }
    #[derive(serde::Deserialize)]
    struct ContentResponse {
        results: Vec<Page>,
        size: u64,
        limit: u64,
    }

    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient("confluence", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient("confluence", format!("content returned {}", resp.status())));
    }
    let parsed: ContentResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("confluence", e.to_string()))?;

    let has_more = parsed.size >= parsed.limit && parsed.limit > 0;
    let next = start + parsed.limit;
    Ok(ListPage {
        docs: parsed
            .results
            .into_iter()
            .map(|p| RemoteDoc { etag: p.version.number.to_string(), path: p.id })
            .collect(),
        next_cursor: next.to_string(),
        has_more,
    })
}

async fn list_box_page(http: &reqwest::Client, url: &str, bearer: &str) -> Result<ListPage> {
    #[derive(serde::Deserialize)]
    struct Entry {
        id: String,
        #[serde(default)]
        sha1: Option<String>,
        #[serde(rename = "type")]
        kind: String,
    }
    #[derive(serde::Deserialize)]
    struct ItemsResponse {
        entries: Vec<Entry>,
        #[serde(rename = "next_marker")]
        next_marker: Option<String>,
    }

    let resp = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| KbError::provider_transient("box", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_transient("box", format!("items returned {}", resp.status())));
    }
    let parsed: ItemsResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("box", e.to_string()))?;

    let has_more = parsed.next_marker.is_some();
    Ok(ListPage {
        docs: parsed
            .entries
            .into_iter()
            .filter(|e| e.kind == "file")
            .map(|e| RemoteDoc { etag: e.sha1.unwrap_or_default(), path: e.id })
            .collect(),
        next_cursor: parsed.next_marker.unwrap_or_default(),
        has_more,
    })
}
