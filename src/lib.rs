//! # Strata
//!
//! Lifecycle management for versioned and time-partitioned search indexes.
//! Client code addresses a stable logical name; Strata maps it onto
//! physical indexes through aliases and migrates data forward when the
//! schema version moves.
//!
//! ## Features
//!
//! - **Version resolution**: the oldest live version keeps serving until it
//!   is migrated
//! - **Chained migrations**: scripts for every skipped version run as one
//!   ordered per-document transform
//! - **Time partitioning**: daily or monthly buckets created on first write,
//!   with per-alias age windows and retention
//! - **Maintenance**: idempotent alias rebalancing and best-effort cleanup
//!
//! ## Modules
//!
//! - [`index`]: logical indexes and their lifecycle
//! - [`client`]: search engine contract, HTTP and in-memory engines
//! - [`cache`]: alias existence cache
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Duration;
//! use strata::client::{HttpSearchClient, SearchClientConfig};
//! use strata::index::{BucketTarget, Granularity, IndexContext, ManagedIndex, TimeSeriesIndex};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(HttpSearchClient::new(SearchClientConfig::default())?);
//!     let context = IndexContext::new(client);
//!
//!     let events = TimeSeriesIndex::builder("events", 2, Granularity::Daily)
//!         .max_index_age(Duration::days(30))
//!         .alias("events-last-week", Some(Duration::days(7)))
//!         .rename_field(2, "user", "userId", true)
//!         .build(&context);
//!
//!     // Write path: make sure today's bucket exists
//!     let alias = events.ensure_bucket_exists(&BucketTarget::Date(chrono::Utc::now())).await?;
//!     println!("writing to {}", alias);
//!
//!     // Scheduled: migrate and reconcile
//!     events.reindex(None).await?;
//!     let report = events.maintain(true).await?;
//!     println!("{}", report);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod index;

pub use cache::{AliasExistenceCache, CacheClient, InMemoryCacheClient};
pub use client::{HttpSearchClient, MemorySearchClient, SearchClient, SearchError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, IndexConfig, IndexKind};
pub use index::{
    build_index, BucketTarget, Granularity, IndexContext, IndexError, IndexResult,
    IndexSelection, LogicalIndex, MaintenanceReport, ManagedIndex, ReindexPlanner,
    ReindexWorkItem, TimeSeriesIndex, VersionResolver, VersionedIndex,
};
