//! Search Engine REST Client
//!
//! HTTP client for Elasticsearch/OpenSearch-compatible index and alias APIs.

use super::{AliasAction, CreateIndexRequest, IndexRecord, ProgressCallback, SearchClient, SearchError};
use crate::index::ReindexWorkItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// REST client for the search engine
pub struct HttpSearchClient {
    client: Client,
    config: SearchClientConfig,
}

/// Configuration for the search engine client
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    /// Base URL (e.g., "http://localhost:9200")
    pub base_url: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum attempts for a single request
    pub max_retries: u32,
    /// How often to poll a running reindex task
    pub reindex_poll_interval_ms: u64,
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            request_timeout_ms: 30_000,
            max_retries: 3,
            reindex_poll_interval_ms: 2_000,
        }
    }
}

impl HttpSearchClient {
    /// Create a new client with the given configuration
    pub fn new(config: SearchClientConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(SearchError::transport)?;

        Ok(Self { client, config })
    }

    /// Get the current configuration
    pub fn config(&self) -> &SearchClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Check if the engine answers at all
    pub async fn health_check(&self) -> Result<(), SearchError> {
        let response = self.send(|c| c.get(self.url("_cluster/health"))).await?;
        check(response).await.map(|_| ())
    }

    /// Send a request with retry logic
    ///
    /// Transport failures and 429s are retried with quadratic backoff; any
    /// other response is handed back to the caller to interpret.
    async fn send<F>(&self, build: F) -> Result<Response, SearchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut last_error = SearchError::Unavailable("no attempt made".to_string());

        for attempt in 0..self.config.max_retries.max(1) {
            if attempt > 0 {
                // Backoff: 250ms, 1s, 2.25s...
                let delay = Duration::from_millis(250 * (attempt as u64).pow(2));
                tokio::time::sleep(delay).await;
            }

            match build(&self.client).send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if let Some(secs) = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                    {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                    }
                    last_error = SearchError::api(429, "rate limited");
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = SearchError::transport(e);
                    tracing::debug!(attempt, error = %last_error, "Search request failed");
                }
            }
        }

        Err(last_error)
    }

    /// HEAD request mapped to a boolean
    async fn head_exists(&self, path: &str) -> Result<bool, SearchError> {
        let response = self.send(|c| c.head(self.url(path))).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(SearchError::api(s.as_u16(), format!("HEAD /{} failed", path))),
        }
    }

    /// Submit one `_reindex` task and wait for it, reporting progress
    async fn run_reindex_task(
        &self,
        body: &Value,
        work_item: &ReindexWorkItem,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), SearchError> {
        let response = self
            .send(|c| {
                c.post(self.url("_reindex?wait_for_completion=false&refresh=true"))
                    .json(body)
            })
            .await?;
        let started: TaskStarted = check(response).await?.json().await.map_err(SearchError::transport)?;

        tracing::debug!(
            task = %started.task,
            source = %work_item.source_index,
            destination = %work_item.destination_index,
            "Reindex task started"
        );

        let poll = Duration::from_millis(self.config.reindex_poll_interval_ms.max(100));
        let task_path = format!("_tasks/{}", urlencoding::encode(&started.task));
        let mut last_percent = None;

        loop {
            tokio::time::sleep(poll).await;

            let response = self.send(|c| c.get(self.url(&task_path))).await?;
            let status: TaskStatusResponse =
                check(response).await?.json().await.map_err(SearchError::transport)?;

            let percent = status.task.status.percent_complete();
            if last_percent != Some(percent) {
                if let Some(callback) = progress {
                    callback(percent, &work_item.destination_index);
                }
                last_percent = Some(percent);
            }

            if !status.completed {
                continue;
            }

            if let Some(error) = status.error {
                return Err(SearchError::api(500, error.to_string()));
            }
            let failures = status
                .response
                .as_ref()
                .and_then(|r| r.get("failures"))
                .and_then(|f| f.as_array())
                .map(|f| f.len())
                .unwrap_or(0);
            if failures > 0 {
                return Err(SearchError::api(
                    500,
                    format!("reindex into {} reported {} failures", work_item.destination_index, failures),
                ));
            }
            return Ok(());
        }
    }

    /// Point the routing alias at the destination, removing it from the source
    async fn swap_alias(&self, work_item: &ReindexWorkItem) -> Result<(), SearchError> {
        let Some(alias) = &work_item.routing_alias else {
            return Ok(());
        };

        let mut actions = Vec::new();
        if work_item.source_index != work_item.destination_index {
            let path = format!(
                "{}/_alias/{}",
                urlencoding::encode(&work_item.source_index),
                urlencoding::encode(alias)
            );
            if self.head_exists(&path).await? {
                actions.push(AliasAction::remove(&work_item.source_index, alias));
            }
        }
        actions.push(AliasAction::add(&work_item.destination_index, alias));

        self.bulk_alias_update(&actions).await
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn create_index(
        &self,
        name: &str,
        request: &CreateIndexRequest,
    ) -> Result<(), SearchError> {
        let body = request.to_body();
        let path = urlencoding::encode(name).into_owned();
        let response = self.send(|c| c.put(self.url(&path)).json(&body)).await?;
        check(response).await.map(|_| ())
    }

    async fn delete_index(&self, pattern: &str) -> Result<(), SearchError> {
        let path = urlencoding::encode(pattern).into_owned();
        let response = self.send(|c| c.delete(self.url(&path))).await?;
        check(response).await.map(|_| ())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SearchError> {
        self.head_exists(&urlencoding::encode(name)).await
    }

    async fn alias_exists(&self, name: &str) -> Result<bool, SearchError> {
        self.head_exists(&format!("_alias/{}", urlencoding::encode(name)))
            .await
    }

    async fn get_alias(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>, SearchError> {
        let path = format!("_alias/{}", urlencoding::encode(name));
        let response = self.send(|c| c.get(self.url(&path))).await?;
        let body: HashMap<String, AliasEntry> =
            check(response).await?.json().await.map_err(SearchError::transport)?;

        Ok(body
            .into_iter()
            .map(|(index, entry)| (index, entry.aliases.into_keys().collect()))
            .collect())
    }

    async fn bulk_alias_update(&self, actions: &[AliasAction]) -> Result<(), SearchError> {
        let body = json!({ "actions": actions });
        let response = self.send(|c| c.post(self.url("_aliases")).json(&body)).await?;
        check(response).await.map(|_| ())
    }

    async fn list_indices(&self, pattern: &str) -> Result<Vec<IndexRecord>, SearchError> {
        let path = format!(
            "{}/_alias?ignore_unavailable=true&allow_no_indices=true",
            urlencoding::encode(pattern)
        );
        let response = self.send(|c| c.get(self.url(&path))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: HashMap<String, AliasEntry> =
            check(response).await?.json().await.map_err(SearchError::transport)?;

        let mut records: Vec<IndexRecord> = body
            .into_iter()
            .map(|(name, entry)| IndexRecord {
                name,
                aliases: entry.aliases.into_keys().collect(),
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn reindex(
        &self,
        work_item: &ReindexWorkItem,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), SearchError> {
        let started = Utc::now();

        self.run_reindex_task(&reindex_body(work_item, None), work_item, progress)
            .await?;

        // Second pass picks up documents written while the first pass ran
        if work_item.timestamp_field.is_some() {
            let body = reindex_body(work_item, Some(started));
            self.run_reindex_task(&body, work_item, progress).await?;
        }

        self.swap_alias(work_item).await?;

        if work_item.delete_source_on_success {
            self.delete_index(&work_item.source_index).await?;
            tracing::info!(index = %work_item.source_index, "Deleted reindex source");
        }

        Ok(())
    }
}

/// Turn a non-success response into a [`SearchError`]
async fn check(response: Response) -> Result<Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(SearchError::Api {
        status: status.as_u16(),
        message: text,
    })
}

/// Build a `_reindex` request body
///
/// With `since`, only documents whose timestamp field is at or after it are copied.
fn reindex_body(work_item: &ReindexWorkItem, since: Option<DateTime<Utc>>) -> Value {
    let mut source = json!({ "index": work_item.source_index });
    if let (Some(field), Some(since)) = (&work_item.timestamp_field, since) {
        source["query"] = json!({ "range": { field: { "gte": since.to_rfc3339() } } });
    }

    let mut body = json!({
        "source": source,
        "dest": { "index": work_item.destination_index, "op_type": "index" },
        "conflicts": "proceed",
    });
    if let Some(script) = &work_item.combined_script {
        body["script"] = json!({ "source": script, "lang": "painless" });
    }
    body
}

// ============================================
// Response DTOs
// ============================================

#[derive(Debug, Deserialize)]
struct AliasEntry {
    #[serde(default)]
    aliases: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TaskStarted {
    task: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    #[serde(default)]
    completed: bool,
    task: TaskInfo,
    error: Option<Value>,
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TaskInfo {
    status: ReindexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ReindexStatus {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    created: u64,
    #[serde(default)]
    updated: u64,
    #[serde(default)]
    deleted: u64,
}

impl ReindexStatus {
    fn percent_complete(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        let done = self.created + self.updated + self.deleted;
        ((done.min(self.total) * 100) / self.total) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_item() -> ReindexWorkItem {
        ReindexWorkItem {
            source_index: "events-v1".to_string(),
            destination_index: "events-v2".to_string(),
            routing_alias: Some("events".to_string()),
            combined_script: Some("ctx._source.remove('temp');".to_string()),
            timestamp_field: Some("updated_at".to_string()),
            delete_source_on_success: true,
        }
    }

    #[test]
    fn test_default_config() {
        let config = SearchClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:9200");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_url_building() {
        let client = HttpSearchClient::new(SearchClientConfig {
            base_url: "http://search:9200/".to_string(),
            ..SearchClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.url("_aliases"), "http://search:9200/_aliases");
    }

    #[test]
    fn test_reindex_body_full_pass() {
        let body = reindex_body(&work_item(), None);
        assert_eq!(body["source"]["index"], "events-v1");
        assert!(body["source"].get("query").is_none());
        assert_eq!(body["dest"]["index"], "events-v2");
        assert_eq!(body["script"]["lang"], "painless");
    }

    #[test]
    fn test_reindex_body_catch_up_pass() {
        let since = Utc::now();
        let body = reindex_body(&work_item(), Some(since));
        assert_eq!(
            body["source"]["query"]["range"]["updated_at"]["gte"],
            since.to_rfc3339()
        );
    }

    #[test]
    fn test_percent_complete() {
        let status = ReindexStatus {
            total: 200,
            created: 50,
            updated: 0,
            deleted: 0,
        };
        assert_eq!(status.percent_complete(), 25);
        assert_eq!(ReindexStatus::default().percent_complete(), 100);
    }
}
