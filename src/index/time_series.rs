//! Time-Series Index
//!
//! A logical index split into daily or monthly buckets, each with its own
//! schema version. Writes create their bucket lazily; maintenance keeps the
//! client-visible aliases on the right bucket indexes and drops buckets
//! that aged out.
//!
//! Every bucket migrates independently: `events-v1-2024.05.01` can be on its
//! way to v2 while `events-v2-2024.05.02` already is.

use crate::cache::AliasExistenceCache;
use crate::client::{ProgressCallback, SearchClient};
use crate::clock::Clock;
use crate::index::{
    current_version_from_buckets, BucketTarget, Granularity, IndexAliasAge, IndexContext,
    IndexDefinition, IndexInfo, IndexResult, IndexSelection, LogicalIndex, MaintenanceCoordinator,
    MaintenanceReport, ManagedIndex, PartitionScheme, ReindexPlanner, ReindexWorkItem,
    TimePartitioner, VersionResolver,
};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A daily or monthly partitioned logical index
pub struct TimeSeriesIndex {
    scheme: PartitionScheme,
    aliases: Vec<IndexAliasAge>,
    definition: IndexDefinition,
    discard_expired: bool,
    planner: ReindexPlanner,
    partitioner: TimePartitioner,
    resolver: VersionResolver,
    coordinator: MaintenanceCoordinator,
    cache: AliasExistenceCache,
    client: Arc<dyn SearchClient>,
    clock: Arc<dyn Clock>,
}

/// Builder for [`TimeSeriesIndex`]
#[derive(Debug, Clone)]
pub struct TimeSeriesIndexBuilder {
    index: LogicalIndex,
    granularity: Granularity,
    date_format: Option<String>,
    max_index_age: Option<Duration>,
    discard_expired: bool,
    aliases: Vec<IndexAliasAge>,
    definition: IndexDefinition,
    planner: ReindexPlanner,
}

impl TimeSeriesIndexBuilder {
    /// Retention window; also turns on deletion of expired buckets
    pub fn max_index_age(mut self, age: Duration) -> Self {
        self.max_index_age = Some(age);
        self.discard_expired = true;
        self
    }

    pub fn discard_expired_indexes(mut self, discard: bool) -> Self {
        self.discard_expired = discard;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Add a client-visible alias covering buckets younger than `max_age`
    pub fn alias(mut self, name: impl Into<String>, max_age: Option<Duration>) -> Self {
        let name = name.into();
        self.aliases.retain(|a| a.name != name);
        self.aliases.push(IndexAliasAge { name, max_age });
        self
    }

    pub fn definition(mut self, definition: IndexDefinition) -> Self {
        self.definition = definition;
        self
    }

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

    pub fn discard_indexes_on_reindex(mut self, discard: bool) -> Self {
        self.planner.discard_on_reindex(discard);
        self
    }

    pub fn timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.planner.set_timestamp_field(Some(field.into()));
        self
    }

    pub fn build(self, context: &IndexContext) -> TimeSeriesIndex {
        let mut scheme =
            PartitionScheme::new(self.index.clone(), self.granularity).max_index_age(self.max_index_age);
        if let Some(format) = self.date_format {
            scheme = scheme.date_format(format);
        }

        let mut aliases = vec![IndexAliasAge::unbounded(self.index.name())];
        aliases.extend(self.aliases.into_iter().filter(|a| a.name != self.index.name()));

        let cache = context.alias_cache(self.index.name());
        let partitioner = TimePartitioner::new(
            scheme.clone(),
            aliases.clone(),
            self.definition.clone(),
            context.client.clone(),
            cache.clone(),
            context.clock.clone(),
        );

        TimeSeriesIndex {
            resolver: VersionResolver::partitioned(scheme.clone(), context.client.clone()),
            coordinator: MaintenanceCoordinator::new(
                context.client.clone(),
                cache.clone(),
                context.clock.clone(),
            ),
            scheme,
            aliases,
            definition: self.definition,
            discard_expired: self.discard_expired,
            planner: self.planner,
            partitioner,
            cache,
            client: context.client.clone(),
            clock: context.clock.clone(),
        }
    }
}

impl TimeSeriesIndex {
    pub fn builder(name: impl Into<String>, version: u32, granularity: Granularity) -> TimeSeriesIndexBuilder {
        let index = LogicalIndex::new(name, version);
        TimeSeriesIndexBuilder {
            planner: ReindexPlanner::new(index.clone()),
            index,
            granularity,
            date_format: None,
            max_index_age: None,
            discard_expired: false,
            aliases: Vec::new(),
            definition: IndexDefinition::default(),
        }
    }

    pub fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    /// Configured aliases, the base-name alias first
    pub fn aliases(&self) -> &[IndexAliasAge] {
        &self.aliases
    }

    /// Work item migrating the bucket containing `date` from `from_version`
    pub fn create_reindex_work_item(&self, date: NaiveDate, from_version: u32) -> ReindexWorkItem {
        let mut item = self.planner.plan_between(
            self.scheme.physical_index_for(date, from_version),
            self.scheme.physical_index_for(date, self.scheme.index().version()),
            from_version,
        );
        item.routing_alias = Some(self.scheme.alias_for(date));
        item
    }

    /// Live buckets whose serving index is behind the configured version
    ///
    /// The serving index holds the bucket alias; an unaliased bucket is
    /// served by its oldest index. Superseded leftovers are never copied.
    async fn lagging_buckets(&self) -> IndexResult<Vec<IndexInfo>> {
        let now = self.clock.now();
        let target = self.scheme.index().version();

        let mut serving: BTreeMap<NaiveDate, IndexInfo> = BTreeMap::new();
        for info in self.resolver.list_indexes(None).await? {
            let Some(date) = info.observed_date else {
                continue;
            };
            if self.scheme.is_expired(date, now) {
                continue;
            }
            // Listing is ordered by (date, version): first seen is the oldest
            let serves = match info.resolved_current_version {
                Some(current) => info.version == current,
                None => !serving.contains_key(&date),
            };
            if serves {
                serving.insert(date, info);
            }
        }

        Ok(serving
            .into_values()
            .filter(|info| info.version < target)
            .collect())
    }

    async fn rebalance(&self, report: &mut MaintenanceReport) -> IndexResult<Vec<IndexInfo>> {
        let mut indexes = self.resolver.list_indexes(None).await?;
        self.coordinator
            .rebalance_aliases(&self.scheme, &self.aliases, &mut indexes, report)
            .await?;
        Ok(indexes)
    }

    async fn reindex_buckets(&self, progress: Option<&ProgressCallback>) -> IndexResult<usize> {
        let lagging = self.lagging_buckets().await?;
        let mut done = 0;

        for info in lagging {
            let Some(date) = info.observed_date else {
                continue;
            };
            let item = self.create_reindex_work_item(date, info.version);

            match self
                .client
                .create_index(&item.destination_index, &self.definition.request())
                .await
            {
                Ok(()) => tracing::info!(index = %item.destination_index, "Created reindex destination"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e.into()),
            }

            tracing::info!(
                source = %item.source_index,
                destination = %item.destination_index,
                "Reindexing bucket"
            );
            self.client.reindex(&item, progress).await?;

            if let Some(alias) = &item.routing_alias {
                self.cache
                    .remember(alias, self.scheme.expiration_for(date))
                    .await;
            }
            done += 1;
        }

        Ok(done)
    }
}

#[async_trait]
impl ManagedIndex for TimeSeriesIndex {
    fn name(&self) -> &str {
        self.scheme.index().name()
    }

    fn version(&self) -> u32 {
        self.scheme.index().version()
    }

    /// Buckets are created on first write; nothing to set up front
    async fn configure(&self) -> IndexResult<()> {
        Ok(())
    }

    async fn current_version(&self) -> IndexResult<u32> {
        let indexes = self.resolver.list_indexes(None).await?;
        Ok(current_version_from_buckets(
            &indexes,
            &self.scheme,
            self.clock.now(),
        ))
    }

    async fn plan_reindex(&self, from_version: u32) -> IndexResult<Vec<ReindexWorkItem>> {
        let now = self.clock.now();
        Ok(self
            .resolver
            .list_indexes(Some(from_version))
            .await?
            .iter()
            .filter_map(|info| info.observed_date)
            .filter(|date| !self.scheme.is_expired(*date, now))
            .map(|date| self.create_reindex_work_item(date, from_version))
            .collect())
    }

    /// Reindex every live bucket still on an old version
    ///
    /// `progress` is called once per bucket, so a percentage can repeat.
    async fn reindex(&self, progress: Option<&ProgressCallback>) -> IndexResult<usize> {
        let done = self.reindex_buckets(progress).await?;
        if done > 0 {
            let mut report = MaintenanceReport::default();
            self.rebalance(&mut report).await?;
            tracing::info!(logical = %self.scheme.index(), buckets = done, "Reindex complete");
        }
        Ok(done)
    }

    async fn maintain(&self, include_optional: bool) -> IndexResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let indexes = self.rebalance(&mut report).await?;

        if include_optional && self.discard_expired {
            self.coordinator
                .enforce_retention(&self.scheme, &indexes, &mut report)
                .await?;
        }
        if include_optional {
            report.reindexed = self.reindex(None).await?;
        }

        Ok(report)
    }

    /// Bucket aliases covering a date range
    ///
    /// Falls back to the logical name when the range cannot be narrowed down.
    async fn resolve_index_names(&self, selection: &IndexSelection) -> Vec<String> {
        match selection {
            IndexSelection::Explicit(names) => names.clone(),
            IndexSelection::All => vec![self.name().to_string()],
            IndexSelection::DateRange { start, end } => {
                let dates = self.scheme.bucket_dates(*start, *end);
                if dates.is_empty() {
                    vec![self.name().to_string()]
                } else {
                    dates.into_iter().map(|d| self.scheme.alias_for(d)).collect()
                }
            }
        }
    }

    async fn ensure_bucket_exists(&self, target: &BucketTarget) -> IndexResult<String> {
        let date = target.resolve_date(self.planner.timestamp_field())?;
        self.partitioner.ensure_bucket_exists(date.date_naive()).await
    }

    async fn resolve_bucket_for(&self, target: &BucketTarget) -> IndexResult<String> {
        let date = target.resolve_date(self.planner.timestamp_field())?;
        Ok(self.scheme.alias_for(date.date_naive()))
    }

    async fn delete_all(&self) -> IndexResult<()> {
        let pattern = format!("{}-*", self.name());
        match self.client.delete_index(&pattern).await {
            Ok(()) => tracing::info!(pattern = %pattern, "Deleted indexes"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.forget_all().await;
        Ok(())
    }
}
