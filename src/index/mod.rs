//! Index Lifecycle
//!
//! Maps stable logical names onto versioned, optionally date-partitioned
//! physical indexes and keeps that mapping healthy:
//!
//! - **VersionResolver**: which schema version is actually serving
//! - **ReindexPlanner**: source → destination copies with chained scripts
//! - **TimePartitioner**: lazy creation of daily / monthly buckets
//! - **MaintenanceCoordinator**: alias rebalancing, retention, convergence
//!
//! # Architecture
//!
//! ```text
//! write "events" @ 2024-05-10
//!        ↓
//! TimeSeriesIndex: bucket alias events-2024.05.10 (cache → engine → create)
//!        ↓
//! physical events-v3-2024.05.10
//!
//! maintain (scheduled)
//!        ↓
//! list events-v*-* → group by date → oldest version keeps the aliases
//! ```

mod error;
mod maintenance;
mod partition;
mod planner;
mod resolver;
mod target;
mod time_series;
mod types;
mod versioned;

pub use error::{IndexError, IndexResult};
pub use maintenance::{plan_alias_actions, MaintenanceCoordinator, MaintenanceReport};
pub use partition::{Granularity, PartitionScheme, TimePartitioner};
pub use planner::{FieldMigration, ReindexPlanner};
pub use resolver::{current_version_from_buckets, Enumeration, VersionResolver};
pub use target::{BucketTarget, IndexSelection};
pub use time_series::{TimeSeriesIndex, TimeSeriesIndexBuilder};
pub use types::{
    IndexAliasAge, IndexDefinition, IndexInfo, LogicalIndex, ReindexScript, ReindexWorkItem,
};
pub use versioned::VersionedIndex;

use crate::cache::{AliasExistenceCache, CacheClient, ALIAS_SCOPE};
use crate::client::{ProgressCallback, SearchClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{IndexConfig, IndexKind};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

/// Shared collaborators every logical index is built with
#[derive(Clone)]
pub struct IndexContext {
    pub client: Arc<dyn SearchClient>,
    pub cache: Option<Arc<dyn CacheClient>>,
    pub cache_scope: String,
    pub clock: Arc<dyn Clock>,
}

impl IndexContext {
    /// Context with no alias cache and the wall clock
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self {
            client,
            cache: None,
            cache_scope: ALIAS_SCOPE.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheClient>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_scope(mut self, scope: impl Into<String>) -> Self {
        self.cache_scope = scope.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Alias cache private to one logical index
    pub fn alias_cache(&self, index_name: &str) -> AliasExistenceCache {
        match &self.cache {
            Some(cache) => AliasExistenceCache::with_scope(
                cache.clone(),
                &format!("{}:{}", self.cache_scope, index_name),
            ),
            None => AliasExistenceCache::disabled(),
        }
    }
}

/// Operations the repository layer uses on a logical index
#[async_trait]
pub trait ManagedIndex: Send + Sync {
    /// Logical name clients address
    fn name(&self) -> &str;

    /// Schema version this build expects
    fn version(&self) -> u32;

    /// Create whatever must exist before the first write
    async fn configure(&self) -> IndexResult<()>;

    /// Oldest schema version still serving live data
    async fn current_version(&self) -> IndexResult<u32>;

    /// Work items that would migrate data on `from_version` to `version()`
    async fn plan_reindex(&self, from_version: u32) -> IndexResult<Vec<ReindexWorkItem>>;

    /// Migrate everything behind the configured version, returning how many
    /// copies ran
    async fn reindex(&self, progress: Option<&ProgressCallback>) -> IndexResult<usize>;

    /// One reconciliation pass; optional tasks cover retention and reindex
    /// retries
    async fn maintain(&self, include_optional: bool) -> IndexResult<MaintenanceReport>;

    /// Names a read over `selection` should address
    async fn resolve_index_names(&self, selection: &IndexSelection) -> Vec<String>;

    /// Alias a write for `target` should go to, created if needed
    async fn ensure_bucket_exists(&self, target: &BucketTarget) -> IndexResult<String>;

    /// Alias a write for `target` would go to, without touching the engine
    async fn resolve_bucket_for(&self, target: &BucketTarget) -> IndexResult<String>;

    /// Drop every physical index owned by this logical index
    async fn delete_all(&self) -> IndexResult<()>;
}

/// Build a managed index from its configuration entry
pub fn build_index(config: &IndexConfig, context: &IndexContext) -> Arc<dyn ManagedIndex> {
    let definition = IndexDefinition::new(config.settings.clone(), config.mappings.clone());

    let granularity = match config.kind {
        IndexKind::Versioned => {
            let mut index = VersionedIndex::new(&config.name, config.version, context)
                .definition(definition)
                .discard_indexes_on_reindex(config.discard_indexes_on_reindex);
            if let Some(field) = &config.timestamp_field {
                index = index.timestamp_field(field);
            }
            for script in &config.scripts {
                index = index.script(script.version(), script.body());
            }
            return Arc::new(index);
        }
        IndexKind::Daily => Granularity::Daily,
        IndexKind::Monthly => Granularity::Monthly,
    };

    let mut builder = TimeSeriesIndex::builder(&config.name, config.version, granularity)
        .definition(definition)
        .discard_indexes_on_reindex(config.discard_indexes_on_reindex);

    if let Some(days) = config.max_index_age_days {
        builder = builder.max_index_age(Duration::days(i64::from(days)));
    }
    if let Some(discard) = config.discard_expired_indexes {
        builder = builder.discard_expired_indexes(discard);
    }
    if let Some(format) = &config.date_format {
        builder = builder.date_format(format);
    }
    if let Some(field) = &config.timestamp_field {
        builder = builder.timestamp_field(field);
    }
    for alias in &config.aliases {
        builder = builder.alias(
            &alias.name,
            alias.max_age_days.map(|d| Duration::days(i64::from(d))),
        );
    }
    for script in &config.scripts {
        builder = builder.script(script.version(), script.body());
    }

    Arc::new(builder.build(context))
}
