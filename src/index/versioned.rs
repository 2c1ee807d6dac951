//! Versioned Index
//!
//! A logical index backed by one physical index per schema version:
//!
//! ```text
//! alias "orders" ──► orders-v2        (current: still serving)
//!                    orders-v3        (configured: created, waiting for reindex)
//! ```
//!
//! Lifecycle of one physical index:
//!
//! ```text
//! nonexistent → created → aliased(current) → reindexing → superseded → deleted
//! ```
//!
//! A failed reindex leaves the old index aliased and serving; the next
//! `reindex` call picks up where things stand.

use crate::cache::AliasExistenceCache;
use crate::client::{ProgressCallback, SearchClient};
use crate::index::{
    BucketTarget, IndexContext, IndexDefinition, IndexResult, IndexSelection, LogicalIndex,
    MaintenanceCoordinator, MaintenanceReport, ManagedIndex, ReindexPlanner, ReindexWorkItem,
    VersionResolver,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A non-partitioned logical index
pub struct VersionedIndex {
    index: LogicalIndex,
    definition: IndexDefinition,
    planner: ReindexPlanner,
    resolver: VersionResolver,
    coordinator: MaintenanceCoordinator,
    cache: AliasExistenceCache,
    client: Arc<dyn SearchClient>,
}

impl VersionedIndex {
    pub fn new(name: impl Into<String>, version: u32, context: &IndexContext) -> Self {
        let index = LogicalIndex::new(name, version);
        let cache = context.alias_cache(index.name());

        Self {
            definition: IndexDefinition::default(),
            planner: ReindexPlanner::new(index.clone()),
            resolver: VersionResolver::new(index.clone(), context.client.clone()),
            coordinator: MaintenanceCoordinator::new(
                context.client.clone(),
                cache.clone(),
                context.clock.clone(),
            ),
            cache,
            client: context.client.clone(),
            index,
        }
    }

    /// Builder method: settings and mappings for new physical indexes
    pub fn definition(mut self, definition: IndexDefinition) -> Self {
        self.definition = definition;
        self
    }

    /// Builder method: register a migration script introduced at `version`
    pub fn script(mut self, version: u32, body: impl Into<String>) -> Self {
        self.planner.add_script(version, body);
        self
    }

    pub fn rename_field(mut self, version: u32, from: &str, to: &str, remove_original: bool) -> Self {
        self.planner.rename_field(version, from, to, remove_original);
        self
    }

    pub fn remove_field(mut self, version: u32, field: &str) -> Self {
        self.planner.remove_field(version, field);
        self
    }

    /// Builder method: keep or drop old versions after a successful reindex
    pub fn discard_indexes_on_reindex(mut self, discard: bool) -> Self {
        self.planner.discard_on_reindex(discard);
        self
    }

    pub fn timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.planner.set_timestamp_field(Some(field.into()));
        self
    }

    pub fn logical(&self) -> &LogicalIndex {
        &self.index
    }

    pub fn planner(&self) -> &ReindexPlanner {
        &self.planner
    }

    /// Work item migrating `name-v{from}` to the configured version
    pub fn create_reindex_work_item(&self, from_version: u32) -> ReindexWorkItem {
        self.planner.plan(from_version)
    }

    /// Create `name` with the engine, treating "already exists" as success
    async fn create_physical(&self, name: &str, with_alias: bool) -> IndexResult<bool> {
        let mut request = self.definition.request();
        if with_alias {
            request = request.alias(self.index.name());
        }

        match self.client.create_index(name, &request).await {
            Ok(()) => {
                tracing::info!(index = %name, aliased = with_alias, "Created index");
                Ok(true)
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(index = %name, "Index already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ManagedIndex for VersionedIndex {
    fn name(&self) -> &str {
        self.index.name()
    }

    fn version(&self) -> u32 {
        self.index.version()
    }

    /// Create the configured version if it is missing
    ///
    /// The routing alias is attached only when nothing holds it yet; an
    /// upgrade leaves the alias on the old version until reindex moves it.
    async fn configure(&self) -> IndexResult<()> {
        let versioned = self.index.versioned_name();
        if self.client.index_exists(&versioned).await? {
            return Ok(());
        }

        let alias_free = !self.client.alias_exists(self.index.name()).await?;
        self.create_physical(&versioned, alias_free).await?;
        Ok(())
    }

    async fn current_version(&self) -> IndexResult<u32> {
        self.resolver.current_version().await
    }

    async fn plan_reindex(&self, from_version: u32) -> IndexResult<Vec<ReindexWorkItem>> {
        Ok(vec![self.create_reindex_work_item(from_version)])
    }

    async fn reindex(&self, progress: Option<&ProgressCallback>) -> IndexResult<usize> {
        let current = self.current_version().await?;
        if current >= self.index.version() {
            tracing::debug!(logical = %self.index, current, "Already on configured version");
            return Ok(0);
        }

        let item = self.create_reindex_work_item(current);
        self.create_physical(&item.destination_index, false).await?;

        tracing::info!(
            source = %item.source_index,
            destination = %item.destination_index,
            scripted = item.combined_script.is_some(),
            "Starting reindex"
        );
        self.client.reindex(&item, progress).await?;
        tracing::info!(logical = %self.index, from = current, "Reindex complete");
        Ok(1)
    }

    async fn maintain(&self, include_optional: bool) -> IndexResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        self.coordinator
            .converge_version(&self.index, &self.resolver, &mut report)
            .await?;

        if include_optional {
            report.reindexed = self.reindex(None).await?;
        }
        Ok(report)
    }

    async fn resolve_index_names(&self, selection: &IndexSelection) -> Vec<String> {
        match selection {
            IndexSelection::Explicit(names) => names.clone(),
            _ => vec![self.index.name().to_string()],
        }
    }

    /// The routing alias, configuring the index on first use
    async fn ensure_bucket_exists(&self, _target: &BucketTarget) -> IndexResult<String> {
        let alias = self.index.name();
        if self.cache.exists(alias).await {
            return Ok(alias.to_string());
        }

        if !self.client.alias_exists(alias).await? {
            self.configure().await?;
        }
        self.cache.remember(alias, None).await;
        Ok(alias.to_string())
    }

    async fn resolve_bucket_for(&self, _target: &BucketTarget) -> IndexResult<String> {
        Ok(self.index.name().to_string())
    }

    async fn delete_all(&self) -> IndexResult<()> {
        let current = self.current_version().await?;
        let mut versions = vec![current, self.index.version()];
        versions.dedup();

        for version in versions {
            let physical = self.index.physical_name(version);
            for pattern in [physical.clone(), format!("{}-*", physical)] {
                match self.client.delete_index(&pattern).await {
                    Ok(()) => tracing::info!(pattern = %pattern, "Deleted indexes"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.cache.forget_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheClient;
    use crate::client::{MemorySearchClient, Operation, SearchError};
    use crate::index::IndexError;
    use serde_json::json;
    use std::sync::Mutex;

    fn context(client: &Arc<MemorySearchClient>) -> IndexContext {
        IndexContext::new(client.clone()).with_cache(Arc::new(InMemoryCacheClient::new()))
    }

    fn orders(client: &Arc<MemorySearchClient>, version: u32) -> VersionedIndex {
        VersionedIndex::new("orders", version, &context(client))
            .definition(IndexDefinition::new(
                Some(json!({"number_of_shards": 1})),
                None,
            ))
            .rename_field(2, "customer", "customerId", true)
    }

    #[tokio::test]
    async fn test_fresh_configure_creates_aliased_index() {
        let client = Arc::new(MemorySearchClient::new());
        let index = orders(&client, 1);

        index.configure().await.unwrap();

        assert_eq!(client.alias_targets("orders").await, vec!["orders-v1"]);
        assert_eq!(index.current_version().await.unwrap(), 1);

        let request = client.creation_request("orders-v1").await.unwrap();
        assert_eq!(request.settings, Some(json!({"number_of_shards": 1})));
    }

    #[tokio::test]
    async fn test_configure_is_idempotent() {
        let client = Arc::new(MemorySearchClient::new());
        let index = orders(&client, 1);

        index.configure().await.unwrap();
        index.configure().await.unwrap();

        assert_eq!(client.index_names().await, vec!["orders-v1"]);
        assert_eq!(client.calls(Operation::CreateIndex).await, 1);
    }

    #[tokio::test]
    async fn test_upgrade_waits_for_reindex() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &["orders"]).await;
        let index = orders(&client, 2);

        index.configure().await.unwrap();

        assert!(client.has_index("orders-v2").await);
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v1"]);
        assert_eq!(index.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reindex_moves_alias_and_discards_source() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &["orders"]).await;
        let index = orders(&client, 2);
        index.configure().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = move |percent: u32, name: &str| {
            sink.lock().unwrap().push((percent, name.to_string()));
        };

        assert_eq!(index.reindex(Some(&progress)).await.unwrap(), 1);

        assert_eq!(client.index_names().await, vec!["orders-v2"]);
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v2"]);
        assert_eq!(index.current_version().await.unwrap(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![(100, "orders-v2".to_string())]);

        let items = client.reindexed().await;
        let item = &items[0];
        assert_eq!(item.routing_alias.as_deref(), Some("orders"));
        assert!(item.combined_script.as_deref().unwrap().contains("customerId"));

        // Converged: nothing left to do
        assert_eq!(index.reindex(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reindex_keeps_source_when_asked() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &["orders"]).await;
        let index = orders(&client, 2).discard_indexes_on_reindex(false);

        index.reindex(None).await.unwrap();

        assert!(client.has_index("orders-v1").await);
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v2"]);
    }

    #[tokio::test]
    async fn test_failed_reindex_leaves_old_version_serving() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &["orders"]).await;
        client
            .fail_times(Operation::Reindex, "*", SearchError::api(500, "task failed"), 1)
            .await;
        let index = orders(&client, 2);

        let err = index.reindex(None).await.unwrap_err();
        assert!(matches!(err, IndexError::BackendUnavailable { .. }));
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v1"]);
        assert_eq!(index.current_version().await.unwrap(), 1);

        // Retried on the next call
        assert_eq!(index.reindex(None).await.unwrap(), 1);
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v2"]);
    }

    #[tokio::test]
    async fn test_maintain_restores_missing_alias() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &[]).await;
        client.seed_index("orders-v2", &[]).await;
        let index = orders(&client, 2);

        let report = index.maintain(false).await.unwrap();
        assert_eq!(report.aliases_restored, vec!["orders"]);
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v1"]);

        assert!(index.maintain(false).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_maintain_optional_retries_reindex() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &["orders"]).await;
        let index = orders(&client, 2);

        let report = index.maintain(true).await.unwrap();
        assert_eq!(report.reindexed, 1);
        assert_eq!(client.alias_targets("orders").await, vec!["orders-v2"]);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let client = Arc::new(MemorySearchClient::new());
        client.seed_index("orders-v1", &["orders"]).await;
        client.seed_index("orders-v2", &[]).await;
        client.seed_index("unrelated", &[]).await;
        let index = orders(&client, 2);

        index.delete_all().await.unwrap();

        assert_eq!(client.index_names().await, vec!["unrelated"]);
    }

    #[tokio::test]
    async fn test_ensure_bucket_configures_once() {
        let client = Arc::new(MemorySearchClient::new());
        let index = orders(&client, 1);
        let target = BucketTarget::Identity("ignored".into());

        assert_eq!(index.ensure_bucket_exists(&target).await.unwrap(), "orders");
        assert_eq!(index.ensure_bucket_exists(&target).await.unwrap(), "orders");

        assert_eq!(client.calls(Operation::AliasExists).await, 2);
        assert_eq!(client.index_names().await, vec!["orders-v1"]);
    }

    #[tokio::test]
    async fn test_resolve_names() {
        let client = Arc::new(MemorySearchClient::new());
        let index = orders(&client, 1);

        assert_eq!(
            index.resolve_index_names(&IndexSelection::All).await,
            vec!["orders"]
        );
        assert_eq!(
            index
                .resolve_index_names(&IndexSelection::Explicit(vec!["orders-v1".into()]))
                .await,
            vec!["orders-v1"]
        );
    }
}
