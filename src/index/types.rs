//! Core value types for the index lifecycle
//!
//! - `LogicalIndex`: the stable name clients address, plus the schema version
//!   this build of the code expects
//! - `IndexInfo`: one physical index found by enumeration
//! - `IndexAliasAge`: a client-visible alias limited to buckets younger than
//!   some age
//! - `ReindexScript` and `ReindexWorkItem`: one migration step, and one
//!   planned source → destination copy

use crate::client::CreateIndexRequest;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Identity of a logical index
///
/// `version` is fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalIndex {
    name: String,
    version: u32,
}

impl LogicalIndex {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema version the code expects
    pub fn version(&self) -> u32 {
        self.version
    }

    /// `name-v{version}` for the configured version
    pub fn versioned_name(&self) -> String {
        self.physical_name(self.version)
    }

    /// `name-v{version}`
    pub fn physical_name(&self, version: u32) -> String {
        format!("{}-v{}", self.name, version)
    }

    /// Wildcard matching every versioned physical index
    pub fn version_pattern(&self) -> String {
        format!("{}-v*", self.name)
    }

    /// Schema version embedded in a physical index name
    ///
    /// The version is the digit run right after `name-v`, ending at the next
    /// `-` or the end of the string. Anything else is `None`.
    pub fn parse_version(&self, physical: &str) -> Option<u32> {
        let rest = physical
            .strip_prefix(self.name.as_str())?
            .strip_prefix("-v")?;
        let digits = rest.split('-').next().unwrap_or_default();

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl std::fmt::Display for LogicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (v{})", self.name, self.version)
    }
}

/// Settings and mappings every physical index of a logical index is built with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDefinition {
    pub settings: Option<Value>,
    pub mappings: Option<Value>,
}

impl IndexDefinition {
    pub fn new(settings: Option<Value>, mappings: Option<Value>) -> Self {
        Self { settings, mappings }
    }

    /// Create request without aliases
    pub fn request(&self) -> CreateIndexRequest {
        CreateIndexRequest::new(self.settings.clone(), self.mappings.clone())
    }
}

/// A client-visible alias with an optional age window
///
/// `max_age = None` means the alias applies to every live bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexAliasAge {
    pub name: String,
    pub max_age: Option<Duration>,
}

impl IndexAliasAge {
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_age: None,
        }
    }

    pub fn with_max_age(name: impl Into<String>, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            max_age: Some(max_age),
        }
    }
}

/// One forward-only migration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexScript {
    pub introduced_at_version: u32,
    pub body: String,
}

/// A single planned copy from one physical index into another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexWorkItem {
    pub source_index: String,
    pub destination_index: String,
    /// Alias moved from source to destination once the copy succeeds
    pub routing_alias: Option<String>,
    /// Transform applied to every document, `None` for a plain copy
    pub combined_script: Option<String>,
    /// Field used to catch up on documents written during the copy
    pub timestamp_field: Option<String>,
    pub delete_source_on_success: bool,
}

/// A physical index discovered by enumeration
///
/// Rebuilt on every pass; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub version: u32,
    /// Bucket date; `None` for indexes that are not time-partitioned
    pub observed_date: Option<NaiveDate>,
    /// Version currently serving this index's bucket, once known
    pub resolved_current_version: Option<u32>,
    /// Aliases the index carried when it was listed
    pub aliases: BTreeSet<String>,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            observed_date: None,
            resolved_current_version: None,
            aliases: BTreeSet::new(),
        }
    }

    /// Version to count this index as when computing a minimum
    pub fn effective_version(&self) -> u32 {
        self.resolved_current_version.unwrap_or(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_names() {
        let index = LogicalIndex::new("events", 3);
        assert_eq!(index.versioned_name(), "events-v3");
        assert_eq!(index.physical_name(1), "events-v1");
        assert_eq!(index.version_pattern(), "events-v*");
        assert_eq!(index.to_string(), "events (v3)");
    }

    #[test]
    fn test_parse_version() {
        let index = LogicalIndex::new("events", 3);
        assert_eq!(index.parse_version("events-v2"), Some(2));
        assert_eq!(index.parse_version("events-v12-2024.01.01"), Some(12));
        assert_eq!(index.parse_version("events-v"), None);
        assert_eq!(index.parse_version("events-vx"), None);
        assert_eq!(index.parse_version("events-v2x-2024.01.01"), None);
        assert_eq!(index.parse_version("other-v2"), None);
        assert_eq!(index.parse_version("events"), None);
    }

    #[test]
    fn test_parse_version_with_dashed_name() {
        let index = LogicalIndex::new("audit-log", 1);
        assert_eq!(index.parse_version("audit-log-v4-2024.02"), Some(4));
        assert_eq!(index.parse_version("audit-v4"), None);
    }

    #[test]
    fn test_effective_version() {
        let mut info = IndexInfo::new("events-v3-2024.01.01", 3);
        assert_eq!(info.effective_version(), 3);
        info.resolved_current_version = Some(2);
        assert_eq!(info.effective_version(), 2);
    }
}
