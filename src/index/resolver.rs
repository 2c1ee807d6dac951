//! Version Resolution
//!
//! Finds which schema version a logical index is actually serving. The answer
//! is always the *oldest* live version: data that has not been migrated yet
//! must keep being served from where it is.
//!
//! ```text
//! 1. alias "events" → [events-v2, events-v3]     → 2
//! 2. no alias → list "events-v*" → [v2, v3, v5]   → 2
//! 3. nothing at all                               → configured version
//! ```

use crate::client::SearchClient;
use crate::index::{IndexError, IndexInfo, IndexResult, LogicalIndex, PartitionScheme};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of listing physical indexes
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    /// Indexes whose names parsed, sorted by (date, version)
    pub indexes: Vec<IndexInfo>,
    /// Names that matched the pattern but did not parse
    pub unparseable: Vec<String>,
}

/// Resolves the current version of one logical index
pub struct VersionResolver {
    index: LogicalIndex,
    scheme: Option<PartitionScheme>,
    client: Arc<dyn SearchClient>,
}

impl VersionResolver {
    /// Resolver for a non-partitioned index
    pub fn new(index: LogicalIndex, client: Arc<dyn SearchClient>) -> Self {
        Self {
            index,
            scheme: None,
            client,
        }
    }

    /// Resolver for a time-partitioned index
    pub fn partitioned(scheme: PartitionScheme, client: Arc<dyn SearchClient>) -> Self {
        Self {
            index: scheme.index().clone(),
            scheme: Some(scheme),
            client,
        }
    }

    /// Current version of a non-partitioned index
    ///
    /// Alias first, enumeration second, configured version when nothing
    /// exists yet. A backend failure is never mistaken for "nothing exists".
    pub async fn current_version(&self) -> IndexResult<u32> {
        if let Some(version) = self.version_from_alias(self.index.name()).await? {
            return Ok(version);
        }

        Ok(self
            .version_from_enumeration()
            .await?
            .unwrap_or_else(|| self.index.version()))
    }

    /// Oldest version among the indexes `alias` points at
    ///
    /// `None` when the alias does not exist or points at nothing.
    pub async fn version_from_alias(&self, alias: &str) -> IndexResult<Option<u32>> {
        let targets = match self.client.get_alias(alias).await {
            Ok(targets) => targets,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if targets.is_empty() {
            return Ok(None);
        }

        self.min_parsed_version(targets.keys().map(String::as_str))
            .map(Some)
    }

    /// Oldest version among all physical indexes, `None` when there are none
    pub async fn version_from_enumeration(&self) -> IndexResult<Option<u32>> {
        let pattern = match &self.scheme {
            Some(scheme) => scheme.physical_pattern(None),
            None => self.index.version_pattern(),
        };
        let records = self.client.list_indices(&pattern).await?;
        if records.is_empty() {
            return Ok(None);
        }

        self.min_parsed_version(records.iter().map(|r| r.name.as_str()))
            .map(Some)
    }

    /// Minimum version across `names`, skipping names that do not parse
    fn min_parsed_version<'a>(&self, names: impl Iterator<Item = &'a str>) -> IndexResult<u32> {
        let mut min = None;
        let mut skipped = Vec::new();

        for name in names {
            match self.index.parse_version(name) {
                Some(version) => min = Some(min.map_or(version, |m: u32| m.min(version))),
                None => {
                    tracing::warn!(index = %name, logical = %self.index.name(), "Ignoring index with unparseable version");
                    skipped.push(name.to_string());
                }
            }
        }

        min.ok_or_else(|| {
            IndexError::MigrationState(format!(
                "no parseable version among indexes of {}: {}",
                self.index.name(),
                skipped.join(", ")
            ))
        })
    }

    /// List physical indexes with their versions, dates and the version each
    /// bucket is currently served from
    ///
    /// `version = Some(v)` restricts the listing to one version.
    pub async fn enumerate(&self, version: Option<u32>) -> IndexResult<Enumeration> {
        let pattern = match (&self.scheme, version) {
            (Some(scheme), v) => scheme.physical_pattern(v),
            (None, Some(v)) => self.index.physical_name(v),
            (None, None) => self.index.version_pattern(),
        };

        let records = self.client.list_indices(&pattern).await?;
        let mut result = Enumeration::default();

        for record in records {
            let Some(parsed_version) = self.index.parse_version(&record.name) else {
                tracing::warn!(index = %record.name, "Skipping index with unparseable version");
                result.unparseable.push(record.name);
                continue;
            };

            let mut info = IndexInfo::new(record.name, parsed_version);
            info.aliases = record.aliases.into_iter().collect();

            if let Some(scheme) = &self.scheme {
                match scheme.date_from_physical_name(&info.name) {
                    Some(date) => info.observed_date = Some(date),
                    None => {
                        tracing::warn!(index = %info.name, "Skipping index with unparseable date");
                        result.unparseable.push(info.name);
                        continue;
                    }
                }
            }

            result.indexes.push(info);
        }

        self.stamp_current_versions(&mut result.indexes);
        result
            .indexes
            .sort_by(|a, b| (a.observed_date, a.version).cmp(&(b.observed_date, b.version)));
        Ok(result)
    }

    /// Indexes that parsed, ignoring the rest
    pub async fn list_indexes(&self, version: Option<u32>) -> IndexResult<Vec<IndexInfo>> {
        Ok(self.enumerate(version).await?.indexes)
    }

    /// Mark every index with the version its bucket's alias points at
    fn stamp_current_versions(&self, indexes: &mut [IndexInfo]) {
        let mut current: BTreeMap<Option<NaiveDate>, u32> = BTreeMap::new();

        for info in indexes.iter() {
            let serving_alias = match (&self.scheme, info.observed_date) {
                (Some(scheme), Some(date)) => scheme.alias_for(date),
                _ => self.index.name().to_string(),
            };
            if info.aliases.contains(&serving_alias) {
                current
                    .entry(info.observed_date)
                    .and_modify(|v| *v = (*v).min(info.version))
                    .or_insert(info.version);
            }
        }

        for info in indexes.iter_mut() {
            info.resolved_current_version = current.get(&info.observed_date).copied();
        }
    }
}

/// Current version of a time-partitioned index: oldest version still serving
/// a bucket that has not expired
///
/// Expired buckets are left out. With nothing live left, the configured
/// version is current.
pub fn current_version_from_buckets(
    indexes: &[IndexInfo],
    scheme: &PartitionScheme,
    now: DateTime<Utc>,
) -> u32 {
    indexes
        .iter()
        .filter(|info| {
            info.observed_date
                .map(|date| !scheme.is_expired(date, now))
                .unwrap_or(true)
        })
        .map(IndexInfo::effective_version)
        .min()
        .unwrap_or_else(|| scheme.index().version())
}
