//! Search Engine Client
//!
//! The lifecycle core talks to the engine only through [`SearchClient`].
//!
//! - **HttpSearchClient**: REST client for Elasticsearch/OpenSearch-style APIs
//! - **MemorySearchClient**: in-process engine for tests and dry runs
//!
//! Both honour the same rules: wildcard patterns never 404, concrete names
//! do, and bulk alias updates are applied atomically or not at all.

mod error;
mod http;
mod memory;

pub use error::SearchError;
pub use http::{HttpSearchClient, SearchClientConfig};
pub use memory::{MemorySearchClient, Operation};

use crate::index::ReindexWorkItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Progress hook invoked with `(percent_complete, index_name)`
pub type ProgressCallback = dyn Fn(u32, &str) + Send + Sync;

/// Operations the lifecycle core needs from a search engine
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Create a physical index with settings, mappings and initial aliases
    async fn create_index(&self, name: &str, request: &CreateIndexRequest)
        -> Result<(), SearchError>;

    /// Delete every index matching `pattern`
    async fn delete_index(&self, pattern: &str) -> Result<(), SearchError>;

    async fn index_exists(&self, name: &str) -> Result<bool, SearchError>;

    async fn alias_exists(&self, name: &str) -> Result<bool, SearchError>;

    /// Physical indexes an alias points at, with each index's matching aliases
    ///
    /// A missing alias is a 404.
    async fn get_alias(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>, SearchError>;

    /// Apply all actions as one atomic alias update
    async fn bulk_alias_update(&self, actions: &[AliasAction]) -> Result<(), SearchError>;

    /// Indexes matching `pattern`, with every alias each one carries
    async fn list_indices(&self, pattern: &str) -> Result<Vec<IndexRecord>, SearchError>;

    /// Copy (and transform) documents as described by `work_item`, then move
    /// the routing alias and drop the source when asked to
    async fn reindex(
        &self,
        work_item: &ReindexWorkItem,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), SearchError>;
}

/// One add/remove in a bulk alias update
///
/// Serializes to the engine's wire shape: `{"add": {"index": .., "alias": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn index(&self) -> &str {
        match self {
            AliasAction::Add { index, .. } | AliasAction::Remove { index, .. } => index,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            AliasAction::Add { alias, .. } | AliasAction::Remove { alias, .. } => alias,
        }
    }
}

/// Body of a create-index call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateIndexRequest {
    pub settings: Option<Value>,
    pub mappings: Option<Value>,
    pub aliases: Vec<String>,
}

impl CreateIndexRequest {
    pub fn new(settings: Option<Value>, mappings: Option<Value>) -> Self {
        Self {
            settings,
            mappings,
            aliases: Vec::new(),
        }
    }

    /// Builder method: attach an alias at creation time
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    /// Engine wire body
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        if let Some(settings) = &self.settings {
            body.insert("settings".to_string(), settings.clone());
        }
        if let Some(mappings) = &self.mappings {
            body.insert("mappings".to_string(), mappings.clone());
        }
        if !self.aliases.is_empty() {
            let aliases: Map<String, Value> = self
                .aliases
                .iter()
                .map(|a| (a.clone(), json!({})))
                .collect();
            body.insert("aliases".to_string(), Value::Object(aliases));
        }
        Value::Object(body)
    }
}

/// A physical index as seen by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub name: String,
    pub aliases: Vec<String>,
}

/// Shell-style match supporting `*` only, as the engine does for index names
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let mut rest = name;
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_action_wire_shape() {
        let action = AliasAction::add("events-v1-2024.01.01", "events");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({"add": {"index": "events-v1-2024.01.01", "alias": "events"}})
        );
    }

    #[test]
    fn test_create_request_body() {
        let request = CreateIndexRequest::new(Some(json!({"number_of_shards": 1})), None)
            .alias("events")
            .alias("events")
            .alias("events-2024.01.01");

        let body = request.to_body();
        assert_eq!(body["settings"]["number_of_shards"], 1);
        assert!(body.get("mappings").is_none());
        assert_eq!(body["aliases"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("events-v*", "events-v2"));
        assert!(wildcard_match("events-v*", "events-v2-2024.01.01"));
        assert!(wildcard_match("events-v2-*", "events-v2-2024.01.01"));
        assert!(!wildcard_match("events-v2-*", "events-v2"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("events-*-2024.01.01", "events-v3-2024.01.01"));
        assert!(!wildcard_match("events", "events-v1"));
        assert!(wildcard_match("events", "events"));
    }
}
