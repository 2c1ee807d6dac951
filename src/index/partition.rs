//! Time Partitioning
//!
//! A time-partitioned logical index keeps one physical index per calendar
//! bucket (day or month) and per schema version:
//!
//! ```text
//! physical:  events-v3-2024.05.10   (versioned, what the engine stores)
//! bucket:    events-2024.05.10      (unversioned alias, what writes target)
//! logical:   events                 (alias over every live bucket)
//! ```
//!
//! [`PartitionScheme`] holds the pure naming and date arithmetic.
//! [`TimePartitioner`] adds the lazy, on-demand bucket creation on top.

use crate::cache::AliasExistenceCache;
use crate::client::SearchClient;
use crate::clock::Clock;
use crate::index::{IndexAliasAge, IndexDefinition, IndexError, IndexResult, LogicalIndex};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Calendar period covered by one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub fn default_date_format(&self) -> &'static str {
        match self {
            Granularity::Daily => "%Y.%m.%d",
            Granularity::Monthly => "%Y.%m",
        }
    }

    /// First day of the bucket containing `date`
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// First day of the following bucket
    pub fn next_bucket(&self, date: NaiveDate) -> Option<NaiveDate> {
        let start = self.bucket_start(date);
        match self {
            Granularity::Daily => start.succ_opt(),
            Granularity::Monthly => start.checked_add_months(Months::new(1)),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Naming and retention rules for one time-partitioned logical index
#[derive(Debug, Clone)]
pub struct PartitionScheme {
    index: LogicalIndex,
    granularity: Granularity,
    date_format: String,
    max_index_age: Option<Duration>,
}

impl PartitionScheme {
    pub fn new(index: LogicalIndex, granularity: Granularity) -> Self {
        Self {
            index,
            granularity,
            date_format: granularity.default_date_format().to_string(),
            max_index_age: None,
        }
    }

    /// Builder method: override the bucket date format (strftime syntax)
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// Builder method: retention window measured from the end of a bucket
    pub fn max_index_age(mut self, age: Option<Duration>) -> Self {
        self.max_index_age = age.filter(|a| *a > Duration::zero());
        self
    }

    pub fn index(&self) -> &LogicalIndex {
        &self.index
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_index_age
    }

    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        self.granularity.bucket_start(date)
    }

    pub fn format_date(&self, date: NaiveDate) -> String {
        self.bucket_start(date).format(&self.date_format).to_string()
    }

    /// `name-v{version}-{date}`
    pub fn physical_index_for(&self, date: NaiveDate, version: u32) -> String {
        format!("{}-v{}-{}", self.index.name(), version, self.format_date(date))
    }

    /// `name-{date}`, the unversioned alias traffic for a bucket targets
    pub fn alias_for(&self, date: NaiveDate) -> String {
        format!("{}-{}", self.index.name(), self.format_date(date))
    }

    /// Wildcard matching every bucket of one version, or of all versions
    pub fn physical_pattern(&self, version: Option<u32>) -> String {
        match version {
            Some(v) => format!("{}-*", self.index.physical_name(v)),
            None => format!("{}-*", self.index.version_pattern()),
        }
    }

    /// Bucket date encoded in a physical index name
    ///
    /// Exact inverse of [`physical_index_for`](Self::physical_index_for);
    /// `None` when the name does not parse.
    pub fn date_from_physical_name(&self, physical: &str) -> Option<NaiveDate> {
        let rest = physical
            .strip_prefix(self.index.name())?
            .strip_prefix("-v")?;
        let (version, date) = rest.split_once('-')?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.parse_date(date)
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        let parsed = NaiveDate::parse_from_str(text, &self.date_format)
            .ok()
            .or_else(|| {
                // Month formats carry no day; pin it to the first
                NaiveDate::parse_from_str(
                    &format!("{} 01", text),
                    &format!("{} %d", self.date_format),
                )
                .ok()
            })?;

        // Reject loose matches (unpadded fields, stray days in a month bucket)
        (self.bucket_start(parsed) == parsed && self.format_date(parsed) == text).then_some(parsed)
    }

    /// Last instant covered by the bucket containing `date`
    pub fn bucket_end(&self, date: NaiveDate) -> DateTime<Utc> {
        match self.granularity.next_bucket(date) {
            Some(next) => start_of_day(next) - Duration::milliseconds(1),
            None => DateTime::<Utc>::MAX_UTC,
        }
    }

    /// When the bucket containing `date` passes its retention window
    ///
    /// `None` means it never expires.
    pub fn expiration_for(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let max_age = self.max_index_age?;
        self.bucket_end(date).checked_add_signed(max_age)
    }

    pub fn is_expired(&self, date: NaiveDate, now: DateTime<Utc>) -> bool {
        self.expiration_for(date)
            .map(|deadline| now > deadline)
            .unwrap_or(false)
    }

    /// Whether `alias`'s age window still covers the bucket containing `date`
    pub fn should_alias(&self, date: NaiveDate, alias: &IndexAliasAge, now: DateTime<Utc>) -> bool {
        let Some(max_age) = alias.max_age else {
            return true;
        };

        start_of_day(now.date_naive())
            .checked_sub_signed(max_age)
            .map(|cutoff| cutoff <= self.bucket_end(date))
            .unwrap_or(true)
    }

    /// Buckets overlapping `[start, end]`
    ///
    /// Empty when the range is inverted or too wide to enumerate usefully:
    /// longer than the retention window, three months or more of daily
    /// buckets, or more than a year of monthly ones.
    pub fn bucket_dates(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        if let Some(max_age) = self.max_index_age {
            if end - start > max_age {
                return Vec::new();
            }
        }

        let too_wide = match self.granularity {
            Granularity::Daily => start
                .checked_add_months(Months::new(3))
                .map(|limit| limit <= end)
                .unwrap_or(false),
            Granularity::Monthly => start
                .checked_add_months(Months::new(12))
                .map(|limit| limit < end)
                .unwrap_or(false),
        };
        if too_wide {
            return Vec::new();
        }

        let last = self.bucket_start(end.date_naive());
        let mut current = self.bucket_start(start.date_naive());
        let mut dates = Vec::new();
        while current <= last {
            dates.push(current);
            match self.granularity.next_bucket(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        dates
    }
}

/// Creates bucket indexes on first use
pub struct TimePartitioner {
    scheme: PartitionScheme,
    aliases: Vec<IndexAliasAge>,
    definition: IndexDefinition,
    client: Arc<dyn SearchClient>,
    cache: AliasExistenceCache,
    clock: Arc<dyn Clock>,
}

impl TimePartitioner {
    pub fn new(
        scheme: PartitionScheme,
        aliases: Vec<IndexAliasAge>,
        definition: IndexDefinition,
        client: Arc<dyn SearchClient>,
        cache: AliasExistenceCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheme,
            aliases,
            definition,
            client,
            cache,
            clock,
        }
    }

    pub fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    /// Make sure the bucket containing `date` exists, returning its alias
    ///
    /// Concurrent callers may both try to create the index; whoever loses
    /// sees "already exists" and carries on as if it had won.
    pub async fn ensure_bucket_exists(&self, date: NaiveDate) -> IndexResult<String> {
        let bucket = self.scheme.bucket_start(date);
        let now = self.clock.now();
        let deadline = self.scheme.expiration_for(bucket);

        if let Some(deadline) = deadline {
            if now > deadline {
                return Err(IndexError::ExpiredWindow { bucket, deadline });
            }
        }

        let alias = self.scheme.alias_for(bucket);
        if self.cache.exists(&alias).await {
            return Ok(alias);
        }

        if self.client.alias_exists(&alias).await? {
            self.cache.remember(&alias, deadline).await;
            return Ok(alias);
        }

        let version = self.scheme.index().version();
        let physical = self.scheme.physical_index_for(bucket, version);
        let mut request = self.definition.request().alias(alias.clone());
        for extra in self
            .aliases
            .iter()
            .filter(|a| self.scheme.should_alias(bucket, a, now))
        {
            request = request.alias(extra.name.clone());
        }

        match self.client.create_index(&physical, &request).await {
            Ok(()) => {
                tracing::info!(
                    index = %physical,
                    alias = %alias,
                    aliases = request.aliases.len(),
                    "Created bucket index"
                );
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(index = %physical, "Bucket index already created by another writer");
            }
            Err(e) => return Err(e.into()),
        }

        self.cache.remember(&alias, deadline).await;
        Ok(alias)
    }
}
