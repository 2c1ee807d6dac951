//! In-process search engine
//!
//! Keeps indexes and aliases in memory and follows the engine's rules for the
//! calls the lifecycle core makes. Used by the test suite and by
//! `strata --dry-run`. Failures can be injected per operation and every call
//! is counted, so tests can assert on fast paths.

use super::{
    wildcard_match, AliasAction, CreateIndexRequest, IndexRecord, ProgressCallback, SearchClient,
    SearchError,
};
use crate::index::ReindexWorkItem;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

/// Calls that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateIndex,
    DeleteIndex,
    IndexExists,
    AliasExists,
    GetAlias,
    BulkAliasUpdate,
    ListIndices,
    Reindex,
}

#[derive(Debug, Clone, Default)]
struct MemoryIndex {
    aliases: BTreeSet<String>,
    request: CreateIndexRequest,
}

#[derive(Debug)]
struct InjectedFailure {
    operation: Operation,
    target: String,
    error: SearchError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct EngineState {
    indices: BTreeMap<String, MemoryIndex>,
    failures: Vec<InjectedFailure>,
    calls: HashMap<Operation, usize>,
    reindexed: Vec<ReindexWorkItem>,
}

impl EngineState {
    /// Count the call and fire any matching injected failure
    fn enter(&mut self, operation: Operation, target: &str) -> Result<(), SearchError> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let hit = self
            .failures
            .iter()
            .position(|f| f.operation == operation && wildcard_match(&f.target, target));

        let Some(pos) = hit else {
            return Ok(());
        };

        let failure = &mut self.failures[pos];
        let error = failure.error.clone();
        let exhausted = match failure.remaining.as_mut() {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            self.failures.remove(pos);
        }
        Err(error)
    }

    fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.indices
            .iter()
            .filter(|(_, index)| index.aliases.iter().any(|a| wildcard_match(alias, a)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn name_taken(&self, name: &str) -> bool {
        self.indices.contains_key(name)
            || self.indices.values().any(|index| index.aliases.contains(name))
    }
}

/// In-memory [`SearchClient`]
#[derive(Debug, Default)]
pub struct MemorySearchClient {
    state: Mutex<EngineState>,
}

impl MemorySearchClient {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Test Setup ====================

    /// Create an index directly, bypassing counters and failures
    pub async fn seed_index(&self, name: &str, aliases: &[&str]) {
        let mut state = self.state.lock().await;
        let index = state.indices.entry(name.to_string()).or_default();
        index.aliases.extend(aliases.iter().map(|a| a.to_string()));
    }

    /// Make every matching call fail until [`clear_failures`](Self::clear_failures)
    pub async fn fail_on(&self, operation: Operation, target: &str, error: SearchError) {
        self.push_failure(operation, target, error, None).await;
    }

    /// Make the next `times` matching calls fail
    pub async fn fail_times(
        &self,
        operation: Operation,
        target: &str,
        error: SearchError,
        times: usize,
    ) {
        self.push_failure(operation, target, error, Some(times.max(1)))
            .await;
    }

    async fn push_failure(
        &self,
        operation: Operation,
        target: &str,
        error: SearchError,
        remaining: Option<usize>,
    ) {
        self.state.lock().await.failures.push(InjectedFailure {
            operation,
            target: target.to_string(),
            error,
            remaining,
        });
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    // ==================== Inspection ====================

    /// How many times `operation` has been called
    pub async fn calls(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    pub async fn index_names(&self) -> Vec<String> {
        self.state.lock().await.indices.keys().cloned().collect()
    }

    pub async fn has_index(&self, name: &str) -> bool {
        self.state.lock().await.indices.contains_key(name)
    }

    /// Aliases carried by `index`, sorted
    pub async fn aliases_of(&self, index: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|i| i.aliases.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Indexes `alias` points at, sorted
    pub async fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.state.lock().await.alias_targets(alias)
    }

    /// The create request an index was built from
    pub async fn creation_request(&self, index: &str) -> Option<CreateIndexRequest> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|i| i.request.clone())
    }

    /// Every work item passed to [`SearchClient::reindex`], in call order
    pub async fn reindexed(&self) -> Vec<ReindexWorkItem> {
        self.state.lock().await.reindexed.clone()
    }
}

#[async_trait]
impl SearchClient for MemorySearchClient {
    async fn create_index(
        &self,
        name: &str,
        request: &CreateIndexRequest,
    ) -> Result<(), SearchError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateIndex, name)?;

        if state.indices.contains_key(name) {
            return Err(SearchError::api(
                400,
                format!("resource_already_exists_exception: index [{}] already exists", name),
            ));
        }
        if state.name_taken(name) {
            return Err(SearchError::api(
                400,
                format!("invalid_index_name_exception: an alias named [{}] exists", name),
            ));
        }
        if let Some(clash) = request.aliases.iter().find(|a| state.indices.contains_key(*a)) {
            return Err(SearchError::api(
                400,
                format!("invalid_alias_name_exception: an index named [{}] exists", clash),
            ));
        }

        state.indices.insert(
            name.to_string(),
            MemoryIndex {
                aliases: request.aliases.iter().cloned().collect(),
                request: request.clone(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, pattern: &str) -> Result<(), SearchError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::DeleteIndex, pattern)?;

        let matches: Vec<String> = state
            .indices
            .keys()
            .filter(|name| wildcard_match(pattern, name))
            .cloned()
            .collect();

        if matches.is_empty() && !pattern.contains('*') {
            return Err(SearchError::not_found(format!(
                "index_not_found_exception: no such index [{}]",
                pattern
            )));
        }

        for name in matches {
            state.indices.remove(&name);
        }
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SearchError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::IndexExists, name)?;
        Ok(state.indices.keys().any(|n| wildcard_match(name, n)))
    }

    async fn alias_exists(&self, name: &str) -> Result<bool, SearchError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::AliasExists, name)?;
        Ok(!state.alias_targets(name).is_empty())
    }

    async fn get_alias(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>, SearchError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::GetAlias, name)?;

        let found: BTreeMap<String, Vec<String>> = state
            .indices
            .iter()
            .filter_map(|(index, entry)| {
                let aliases: Vec<String> = entry
                    .aliases
                    .iter()
                    .filter(|a| wildcard_match(name, a))
                    .cloned()
                    .collect();
                (!aliases.is_empty()).then(|| (index.clone(), aliases))
            })
            .collect();

        if found.is_empty() {
            return Err(SearchError::not_found(format!("alias [{}] missing", name)));
        }
        Ok(found)
    }

    async fn bulk_alias_update(&self, actions: &[AliasAction]) -> Result<(), SearchError> {
        let mut state = self.state.lock().await;
        let target = actions.first().map(|a| a.index().to_string()).unwrap_or_default();
        state.enter(Operation::BulkAliasUpdate, &target)?;

        // Validate everything first so the update is all-or-nothing
        for action in actions {
            let Some(index) = state.indices.get(action.index()) else {
                return Err(SearchError::not_found(format!(
                    "index_not_found_exception: no such index [{}]",
                    action.index()
                )));
            };
            if let AliasAction::Remove { alias, .. } = action {
                if !index.aliases.contains(alias) {
                    return Err(SearchError::not_found(format!(
                        "aliases_not_found_exception: aliases [{}] missing",
                        alias
                    )));
                }
            }
        }

        for action in actions {
            if let Some(index) = state.indices.get_mut(action.index()) {
                match action {
                    AliasAction::Add { alias, .. } => {
                        index.aliases.insert(alias.clone());
                    }
                    AliasAction::Remove { alias, .. } => {
                        index.aliases.remove(alias);
                    }
                }
            }
        }
        Ok(())
    }

    async fn list_indices(&self, pattern: &str) -> Result<Vec<IndexRecord>, SearchError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::ListIndices, pattern)?;

        Ok(state
            .indices
            .iter()
            .filter(|(name, _)| wildcard_match(pattern, name))
            .map(|(name, index)| IndexRecord {
                name: name.clone(),
                aliases: index.aliases.iter().cloned().collect(),
            })
            .collect())
    }

    async fn reindex(
        &self,
        work_item: &ReindexWorkItem,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), SearchError> {
        {
            let mut state = self.state.lock().await;
            state.enter(Operation::Reindex, &work_item.source_index)?;

            let Some(source) = state.indices.get(&work_item.source_index).cloned() else {
                return Err(SearchError::not_found(format!(
                    "index_not_found_exception: no such index [{}]",
                    work_item.source_index
                )));
            };

            state
                .indices
                .entry(work_item.destination_index.clone())
                .or_insert_with(|| MemoryIndex {
                    aliases: BTreeSet::new(),
                    request: source.request.clone(),
                });

            if let Some(alias) = &work_item.routing_alias {
                if work_item.source_index != work_item.destination_index {
                    if let Some(index) = state.indices.get_mut(&work_item.source_index) {
                        index.aliases.remove(alias);
                    }
                }
                if let Some(index) = state.indices.get_mut(&work_item.destination_index) {
                    index.aliases.insert(alias.clone());
                }
            }

            if work_item.delete_source_on_success {
                state.indices.remove(&work_item.source_index);
            }

            state.reindexed.push(work_item.clone());
        }

        if let Some(callback) = progress {
            callback(100, &work_item.destination_index);
        }
        Ok(())
    }
}
