//! Maintenance
//!
//! One reconciliation pass per call; scheduling is the caller's business.
//!
//! - **Alias rebalancing**: per bucket, the oldest live version serves
//!   traffic. It carries the bucket alias and every configured alias whose
//!   age window still covers the bucket. Superseded or expired indexes carry
//!   none of them.
//! - **Retention**: buckets past their deadline are deleted one by one; a
//!   failed delete is logged and retried on the next pass.
//! - **Version convergence**: a non-partitioned index whose routing alias
//!   went missing gets it back on its current version.
//! - **Reindex retry** (optional): indexes still behind the configured
//!   version are reindexed again; driven by the owning index.
//!
//! Alias changes are diffed against what each index already carries, so a
//! pass over converged state sends nothing.

use crate::cache::AliasExistenceCache;
use crate::client::{AliasAction, SearchClient, SearchError};
use crate::clock::Clock;
use crate::index::{
    IndexAliasAge, IndexInfo, IndexResult, LogicalIndex, PartitionScheme, VersionResolver,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// What a maintenance pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub aliases_added: usize,
    pub aliases_removed: usize,
    /// Bucket aliases (or the routing alias) re-established this pass
    pub aliases_restored: Vec<String>,
    pub indexes_deleted: Vec<String>,
    pub failed_deletions: Vec<String>,
    /// Reindex work items run for indexes still on an old version
    pub reindexed: usize,
}

impl MaintenanceReport {
    pub fn is_noop(&self) -> bool {
        self.aliases_added == 0
            && self.aliases_removed == 0
            && self.aliases_restored.is_empty()
            && self.indexes_deleted.is_empty()
            && self.reindexed == 0
    }
}

impl std::fmt::Display for MaintenanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "+{} -{} aliases, {} restored, {} deleted, {} failed deletions, {} reindexed",
            self.aliases_added,
            self.aliases_removed,
            self.aliases_restored.len(),
            self.indexes_deleted.len(),
            self.failed_deletions.len(),
            self.reindexed
        )
    }
}

/// Runs reconciliation passes against the search engine
pub struct MaintenanceCoordinator {
    client: Arc<dyn SearchClient>,
    cache: AliasExistenceCache,
    clock: Arc<dyn Clock>,
}

impl MaintenanceCoordinator {
    pub fn new(
        client: Arc<dyn SearchClient>,
        cache: AliasExistenceCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            cache,
            clock,
        }
    }

    /// Point `alias` at `index` unless the alias already exists
    ///
    /// Returns whether this call created it. Losing a race to another
    /// creator is not an error.
    pub async fn ensure_alias(&self, index: &str, alias: &str) -> IndexResult<bool> {
        if self.client.alias_exists(alias).await? {
            return Ok(false);
        }

        match self
            .client
            .bulk_alias_update(&[AliasAction::add(index, alias)])
            .await
        {
            Ok(()) => {
                tracing::info!(index = %index, alias = %alias, "Created alias");
                Ok(true)
            }
            Err(e) => {
                if self.client.alias_exists(alias).await? {
                    return Ok(false);
                }
                Err(e.into())
            }
        }
    }

    /// Converge the alias layout of a time-partitioned index
    ///
    /// `indexes` is updated in place with each bucket's resolved version and
    /// the aliases it carries afterwards.
    pub async fn rebalance_aliases(
        &self,
        scheme: &PartitionScheme,
        aliases: &[IndexAliasAge],
        indexes: &mut [IndexInfo],
        report: &mut MaintenanceReport,
    ) -> IndexResult<()> {
        if indexes.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, info) in indexes.iter().enumerate() {
            match info.observed_date {
                Some(date) => groups.entry(date).or_default().push(i),
                None => tracing::warn!(index = %info.name, "Index has no bucket date, skipping"),
            }
        }

        for (date, members) in &mut groups {
            members.sort_by_key(|&i| indexes[i].version);
            if scheme.is_expired(*date, now) {
                continue;
            }

            let oldest = members[0];
            if members
                .iter()
                .all(|&i| indexes[i].resolved_current_version.is_none())
            {
                let bucket_alias = scheme.alias_for(*date);
                let oldest_name = indexes[oldest].name.clone();

                match self.ensure_alias(&oldest_name, &bucket_alias).await {
                    Ok(created) => {
                        indexes[oldest].aliases.insert(bucket_alias.clone());
                        self.cache
                            .remember(&bucket_alias, scheme.expiration_for(*date))
                            .await;
                        if created {
                            report.aliases_restored.push(bucket_alias);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            index = %oldest_name,
                            alias = %bucket_alias,
                            error = %e,
                            "Failed to establish bucket alias"
                        );
                    }
                }

                let version = indexes[oldest].version;
                for &i in members.iter() {
                    indexes[i].resolved_current_version = Some(version);
                }
            }
        }

        let actions = plan_alias_actions(scheme, aliases, indexes, now);
        if actions.is_empty() {
            tracing::debug!(logical = %scheme.index().name(), "Aliases already converged");
            return Ok(());
        }

        let added = actions
            .iter()
            .filter(|a| matches!(a, AliasAction::Add { .. }))
            .count();
        let removed = actions.len() - added;

        match self.client.bulk_alias_update(&actions).await {
            Ok(()) => {
                tracing::info!(
                    logical = %scheme.index().name(),
                    added,
                    removed,
                    "Updated aliases"
                );
                report.aliases_added += added;
                report.aliases_removed += removed;
                apply_actions(indexes, &actions);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(error = %e, "Nothing to update in aliases");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every bucket past its retention deadline
    ///
    /// A delete the engine rejects is logged and skipped; losing the
    /// connection to the engine aborts the pass.
    pub async fn enforce_retention(
        &self,
        scheme: &PartitionScheme,
        indexes: &[IndexInfo],
        report: &mut MaintenanceReport,
    ) -> IndexResult<()> {
        if scheme.max_age().is_none() {
            return Ok(());
        }

        let now = self.clock.now();
        for info in indexes {
            let Some(date) = info.observed_date else {
                continue;
            };
            if !scheme.is_expired(date, now) {
                continue;
            }

            let started = Instant::now();
            match self.client.delete_index(&info.name).await {
                Ok(()) => {
                    self.cache.forget(&scheme.alias_for(date)).await;
                    tracing::info!(
                        index = %info.name,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Deleted expired index"
                    );
                    report.indexes_deleted.push(info.name.clone());
                }
                Err(e @ (SearchError::Unavailable(_) | SearchError::Timeout)) => {
                    return Err(e.into())
                }
                Err(e) if e.is_not_found() => {
                    self.cache.forget(&scheme.alias_for(date)).await;
                    tracing::debug!(index = %info.name, "Expired index already gone");
                }
                Err(e) => {
                    tracing::error!(
                        index = %info.name,
                        error = %e,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Failed to delete expired index"
                    );
                    report.failed_deletions.push(info.name.clone());
                }
            }
        }

        Ok(())
    }

    /// Restore the routing alias of a non-partitioned index if it is missing
    pub async fn converge_version(
        &self,
        index: &LogicalIndex,
        resolver: &VersionResolver,
        report: &mut MaintenanceReport,
    ) -> IndexResult<()> {
        if self.client.alias_exists(index.name()).await? {
            return Ok(());
        }

        let Some(version) = resolver.version_from_enumeration().await? else {
            tracing::debug!(logical = %index.name(), "No physical index to route to yet");
            return Ok(());
        };

        let physical = index.physical_name(version);
        if self.ensure_alias(&physical, index.name()).await? {
            report.aliases_restored.push(index.name().to_string());
        }
        Ok(())
    }
}

/// Alias changes needed to bring `indexes` in line with the configured aliases
///
/// Only indexes serving their bucket at its current version keep aliases,
/// and only those whose window covers the bucket.
pub fn plan_alias_actions(
    scheme: &PartitionScheme,
    aliases: &[IndexAliasAge],
    indexes: &[IndexInfo],
    now: DateTime<Utc>,
) -> Vec<AliasAction> {
    let mut actions = Vec::new();

    for info in indexes {
        let Some(date) = info.observed_date else {
            continue;
        };
        let serving = !scheme.is_expired(date, now)
            && info.resolved_current_version == Some(info.version);

        for alias in aliases {
            let wanted = serving && scheme.should_alias(date, alias, now);
            let present = info.aliases.contains(&alias.name);

            if wanted && !present {
                actions.push(AliasAction::add(&info.name, &alias.name));
            } else if !wanted && present {
                actions.push(AliasAction::remove(&info.name, &alias.name));
            }
        }
    }

    actions
}

fn apply_actions(indexes: &mut [IndexInfo], actions: &[AliasAction]) {
    for action in actions {
        if let Some(info) = indexes.iter_mut().find(|i| i.name == action.index()) {
            match action {
                AliasAction::Add { alias, .. } => {
                    info.aliases.insert(alias.clone());
                }
                AliasAction::Remove { alias, .. } => {
                    info.aliases.remove(alias);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheClient;
    use crate::client::{MemorySearchClient, Operation};
    use crate::clock::ManualClock;
    use crate::index::Granularity;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        client: Arc<MemorySearchClient>,
        coordinator: MaintenanceCoordinator,
        scheme: PartitionScheme,
        aliases: Vec<IndexAliasAge>,
    }

    fn fixture() -> Fixture {
        let client = Arc::new(MemorySearchClient::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 20, 6, 0, 0).unwrap());
        let cache = AliasExistenceCache::new(Arc::new(InMemoryCacheClient::new()));
        let coordinator =
            MaintenanceCoordinator::new(client.clone(), cache, Arc::new(clock.clone()));
        let scheme = PartitionScheme::new(LogicalIndex::new("events", 2), Granularity::Daily)
            .max_index_age(Some(Duration::days(10)));
        let aliases = vec![
            IndexAliasAge::unbounded("events"),
            IndexAliasAge::with_max_age("events-week", Duration::days(7)),
        ];
        Fixture {
            client,
            coordinator,
            scheme,
            aliases,
        }
    }

    impl Fixture {
        async fn pass(&self) -> MaintenanceReport {
            let resolver = VersionResolver::partitioned(self.scheme.clone(), self.client.clone());
            let mut indexes = resolver.list_indexes(None).await.unwrap();
            let mut report = MaintenanceReport::default();
            self.coordinator
                .rebalance_aliases(&self.scheme, &self.aliases, &mut indexes, &mut report)
                .await
                .unwrap();
            self.coordinator
                .enforce_retention(&self.scheme, &indexes, &mut report)
                .await
                .unwrap();
            report
        }
    }

    #[tokio::test]
    async fn test_establishes_bucket_alias_on_oldest() {
        let f = fixture();
        f.client.seed_index("events-v1-2024.01.19", &[]).await;
        f.client.seed_index("events-v2-2024.01.19", &[]).await;

        let report = f.pass().await;

        assert_eq!(report.aliases_restored, vec!["events-2024.01.19"]);
        assert_eq!(
            f.client.aliases_of("events-v1-2024.01.19").await,
            vec!["events", "events-2024.01.19", "events-week"]
        );
        assert!(f.client.aliases_of("events-v2-2024.01.19").await.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_index_loses_aliases() {
        let f = fixture();
        f.client
            .seed_index("events-v1-2024.01.19", &["events-2024.01.19", "events"])
            .await;
        f.client
            .seed_index("events-v2-2024.01.19", &["events", "events-week"])
            .await;

        let report = f.pass().await;

        assert_eq!(report.aliases_added, 1);
        assert_eq!(report.aliases_removed, 2);
        assert!(f.client.aliases_of("events-v2-2024.01.19").await.is_empty());
    }

    #[tokio::test]
    async fn test_age_window_drops_short_alias() {
        let f = fixture();
        f.client
            .seed_index(
                "events-v2-2024.01.11",
                &["events-2024.01.11", "events", "events-week"],
            )
            .await;

        f.pass().await;

        assert_eq!(
            f.client.aliases_of("events-v2-2024.01.11").await,
            vec!["events", "events-2024.01.11"]
        );
    }

    #[tokio::test]
    async fn test_second_pass_changes_nothing() {
        let f = fixture();
        f.client.seed_index("events-v1-2024.01.18", &[]).await;
        f.client.seed_index("events-v2-2024.01.18", &["events"]).await;
        f.client.seed_index("events-v2-2024.01.12", &[]).await;

        let first = f.pass().await;
        assert!(!first.is_noop());

        f.client.reset_calls().await;
        let second = f.pass().await;

        assert!(second.is_noop(), "{second}");
        assert_eq!(f.client.calls(Operation::BulkAliasUpdate).await, 0);
    }

    #[tokio::test]
    async fn test_expired_index_is_stripped_and_deleted() {
        let f = fixture();
        f.client
            .seed_index("events-v2-2024.01.05", &["events-2024.01.05", "events"])
            .await;
        f.client
            .seed_index("events-v2-2024.01.19", &["events-2024.01.19", "events"])
            .await;

        let report = f.pass().await;

        assert_eq!(report.indexes_deleted, vec!["events-v2-2024.01.05"]);
        assert!(!f.client.has_index("events-v2-2024.01.05").await);
        assert!(f.client.has_index("events-v2-2024.01.19").await);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_the_batch() {
        let f = fixture();
        f.client.seed_index("events-v2-2024.01.01", &[]).await;
        f.client.seed_index("events-v2-2024.01.02", &[]).await;
        f.client
            .fail_on(
                Operation::DeleteIndex,
                "events-v2-2024.01.01",
                SearchError::api(403, "cluster_block_exception"),
            )
            .await;

        let report = f.pass().await;

        assert_eq!(report.failed_deletions, vec!["events-v2-2024.01.01"]);
        assert_eq!(report.indexes_deleted, vec!["events-v2-2024.01.02"]);
    }

    #[tokio::test]
    async fn test_unreachable_backend_aborts_retention() {
        let f = fixture();
        f.client.seed_index("events-v2-2024.01.01", &[]).await;
        f.client
            .fail_on(
                Operation::DeleteIndex,
                "*",
                SearchError::Unavailable("connection refused".into()),
            )
            .await;

        let resolver = VersionResolver::partitioned(f.scheme.clone(), f.client.clone());
        let indexes = resolver.list_indexes(None).await.unwrap();
        let mut report = MaintenanceReport::default();
        let result = f
            .coordinator
            .enforce_retention(&f.scheme, &indexes, &mut report)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout_aborts_retention() {
        let f = fixture();
        f.client.seed_index("events-v2-2024.01.01", &[]).await;
        f.client.seed_index("events-v2-2024.01.02", &[]).await;
        f.client
            .fail_on(Operation::DeleteIndex, "*", SearchError::Timeout)
            .await;

        let resolver = VersionResolver::partitioned(f.scheme.clone(), f.client.clone());
        let indexes = resolver.list_indexes(None).await.unwrap();
        let mut report = MaintenanceReport::default();
        let result = f
            .coordinator
            .enforce_retention(&f.scheme, &indexes, &mut report)
            .await;

        assert!(result.is_err());
        assert_eq!(f.client.calls(Operation::DeleteIndex).await, 1);
        assert!(report.failed_deletions.is_empty());
    }

    #[tokio::test]
    async fn test_concurrently_deleted_index_is_not_a_failure() {
        let f = fixture();
        f.client.seed_index("events-v2-2024.01.01", &[]).await;
        f.client
            .fail_on(
                Operation::DeleteIndex,
                "events-v2-2024.01.01",
                SearchError::not_found("index_not_found_exception"),
            )
            .await;

        let report = f.pass().await;

        assert!(report.failed_deletions.is_empty());
        assert!(report.indexes_deleted.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_404_is_not_an_error() {
        let f = fixture();
        f.client.seed_index("events-v2-2024.01.19", &[]).await;
        f.client
            .fail_on(
                Operation::BulkAliasUpdate,
                "*",
                SearchError::not_found("aliases_not_found_exception"),
            )
            .await;

        let resolver = VersionResolver::partitioned(f.scheme.clone(), f.client.clone());
        let mut indexes = resolver.list_indexes(None).await.unwrap();
        let mut report = MaintenanceReport::default();
        f.coordinator
            .rebalance_aliases(&f.scheme, &f.aliases, &mut indexes, &mut report)
            .await
            .unwrap();
        assert_eq!(report.aliases_added, 0);
    }

    #[tokio::test]
    async fn test_bulk_server_error_is_fatal() {
        let f = fixture();
        f.client
            .seed_index("events-v2-2024.01.19", &["events-2024.01.19"])
            .await;
        f.client
            .fail_on(Operation::BulkAliasUpdate, "*", SearchError::api(500, "boom"))
            .await;

        let resolver = VersionResolver::partitioned(f.scheme.clone(), f.client.clone());
        let mut indexes = resolver.list_indexes(None).await.unwrap();
        let mut report = MaintenanceReport::default();
        let result = f
            .coordinator
            .rebalance_aliases(&f.scheme, &f.aliases, &mut indexes, &mut report)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bucket_alias_failure_is_tolerated() {
        let f = fixture();
        f.client.seed_index("events-v2-2024.01.19", &[]).await;
        f.client
            .fail_times(Operation::BulkAliasUpdate, "*", SearchError::api(500, "boom"), 1)
            .await;

        let report = f.pass().await;

        assert!(report.aliases_restored.is_empty());
        // The configured aliases still land in the same pass
        assert_eq!(
            f.client.aliases_of("events-v2-2024.01.19").await,
            vec!["events", "events-week"]
        );
    }

    #[tokio::test]
    async fn test_converge_version_restores_routing_alias() {
        let f = fixture();
        let index = LogicalIndex::new("orders", 3);
        f.client.seed_index("orders-v2", &[]).await;
        f.client.seed_index("orders-v3", &[]).await;

        let resolver = VersionResolver::new(index.clone(), f.client.clone());
        let mut report = MaintenanceReport::default();
        f.coordinator
            .converge_version(&index, &resolver, &mut report)
            .await
            .unwrap();

        assert_eq!(f.client.alias_targets("orders").await, vec!["orders-v2"]);
        assert_eq!(report.aliases_restored, vec!["orders"]);

        let mut again = MaintenanceReport::default();
        f.coordinator
            .converge_version(&index, &resolver, &mut again)
            .await
            .unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn test_converge_version_with_nothing_to_route() {
        let f = fixture();
        let index = LogicalIndex::new("orders", 1);
        let resolver = VersionResolver::new(index.clone(), f.client.clone());
        let mut report = MaintenanceReport::default();

        f.coordinator
            .converge_version(&index, &resolver, &mut report)
            .await
            .unwrap();
        assert!(report.is_noop());
    }
}
