//! HTTP clients for the two remote collaborators: the control table that
//! names the active folder, and the listing API that enumerates its media.

use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument};

use crate::config::{ListingOptions, RemoteControlOptions};
use crate::error::{ConfigFetchError, ListFilesError};
use crate::events::ActiveFolder;
use crate::retry::{RetryAction, RetryConfig, retry_with_backoff};

/// Source of the currently selected folder.
pub trait ControlSource: Send + Sync + 'static {
    fn fetch_active(&self) -> impl Future<Output = Result<ActiveFolder, ConfigFetchError>> + Send;
}

/// Enumerates the media stored under a folder path.
pub trait FileLister: Send + Sync + 'static {
    fn list_files(
        &self,
        folder: &str,
    ) -> impl Future<Output = Result<Vec<ListedFile>, ListFilesError>> + Send;
}

/// One entry of the listing response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListedFile {
    pub key: String,
    #[serde(rename = "publicUrl")]
    pub public_url: String,
}

#[derive(Debug, Deserialize)]
struct ListFilesResponse {
    files: Vec<ListedFile>,
}

/// Row of the control table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlRow {
    #[serde(deserialize_with = "string_or_number")]
    pub source: String,
    #[serde(deserialize_with = "string_or_number")]
    pub active_year: String,
    #[serde(deserialize_with = "string_or_number")]
    pub active_month: String,
}

impl From<ControlRow> for ActiveFolder {
    fn from(row: ControlRow) -> Self {
        ActiveFolder::new(row.source, row.active_year, row.active_month)
    }
}

// Year/month columns are sometimes typed as integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

/// Reads the control row through the Supabase PostgREST interface.
#[derive(Debug, Clone)]
pub struct SupabaseControl {
    client: Client,
    endpoint: String,
    key: String,
    table: String,
}

impl SupabaseControl {
    pub fn new(options: &RemoteControlOptions) -> Result<Self, ConfigFetchError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self::with_client(client, options))
    }

    pub fn with_client(client: Client, options: &RemoteControlOptions) -> Self {
        let endpoint = format!(
            "{}/rest/v1/{}",
            options.url.trim_end_matches('/'),
            options.table
        );
        Self {
            client,
            endpoint,
            key: options.key.clone(),
            table: options.table.clone(),
        }
    }
}

impl ControlSource for SupabaseControl {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn fetch_active(&self) -> Result<ActiveFolder, ConfigFetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("select", "source,active_year,active_month"), ("limit", "1")])
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConfigFetchError::Status(status));
        }
        let body = response.bytes().await?;
        let rows: Vec<ControlRow> = serde_json::from_slice(&body)?;
        let row = rows.into_iter().next().ok_or_else(|| ConfigFetchError::Empty {
            table: self.table.clone(),
        })?;
        debug!(?row, "control row fetched");
        Ok(row.into())
    }
}

/// Client for `GET {api}/api/list-files?folder=...`.
#[derive(Debug, Clone)]
pub struct HttpFileLister {
    client: Client,
    endpoint: String,
    token: String,
    retry: RetryConfig,
}

impl HttpFileLister {
    pub fn new(options: &ListingOptions) -> Result<Self, ListFilesError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self::with_client(client, options))
    }

    pub fn with_client(client: Client, options: &ListingOptions) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/list-files", options.api_url.trim_end_matches('/')),
            token: options.bearer_token.clone(),
            retry: options.retry.clone(),
        }
    }

    async fn list_once(&self, folder: &str) -> Result<Vec<ListedFile>, ListFilesError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("folder", folder)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ListFilesError::Status(status));
        }
        let body = response.bytes().await?;
        let parsed: ListFilesResponse = serde_json::from_slice(&body)?;
        Ok(parsed.files)
    }
}

impl FileLister for HttpFileLister {
    #[instrument(skip(self))]
    async fn list_files(&self, folder: &str) -> Result<Vec<ListedFile>, ListFilesError> {
        let files = retry_with_backoff(
            &self.retry,
            |err: &ListFilesError| {
                if err.is_transient() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.list_once(folder),
        )
        .await?;
        debug!(count = files.len(), "listing fetched");
        Ok(files)
    }
}
