//! Reindex Planning
//!
//! Migration scripts are registered against the schema version that
//! introduced them. Moving data from version `k` to the configured version
//! runs every script in `(k, version]`, oldest first, as one per-document
//! transform:
//!
//! ```text
//! v2: remove "temp"          void f000(def ctx) { <v2 body> }
//! v3: rename user → userId   void f001(def ctx) { <v3 body> }
//!                            f000(ctx); f001(ctx);
//! ```
//!
//! Order matters: later scripts may rely on fields an earlier one renamed or
//! dropped.

use crate::index::{LogicalIndex, ReindexScript, ReindexWorkItem};
use serde_json::{Map, Value};

/// A structured field migration
///
/// Renders to an engine script and can also be applied to a JSON document
/// directly. Both forms are guarded by a presence check, so replaying them
/// on an already-migrated document changes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMigration {
    Rename {
        from: String,
        to: String,
        remove_original: bool,
    },
    Remove {
        field: String,
    },
}

impl FieldMigration {
    /// Painless source for this migration
    pub fn script(&self) -> String {
        match self {
            FieldMigration::Rename {
                from,
                to,
                remove_original: true,
            } => format!(
                "if (ctx._source.containsKey('{from}')) {{ ctx._source['{to}'] = ctx._source.remove('{from}'); }}",
                from = escape(from),
                to = escape(to)
            ),
            FieldMigration::Rename {
                from,
                to,
                remove_original: false,
            } => format!(
                "if (ctx._source.containsKey('{from}')) {{ ctx._source['{to}'] = ctx._source['{from}']; }}",
                from = escape(from),
                to = escape(to)
            ),
            FieldMigration::Remove { field } => format!(
                "if (ctx._source.containsKey('{field}')) {{ ctx._source.remove('{field}'); }}",
                field = escape(field)
            ),
        }
    }

    /// Apply the migration to a document source in place
    pub fn apply(&self, source: &mut Map<String, Value>) {
        match self {
            FieldMigration::Rename {
                from,
                to,
                remove_original,
            } => {
                let value = if *remove_original {
                    source.remove(from)
                } else {
                    source.get(from).cloned()
                };
                if let Some(value) = value {
                    source.insert(to.clone(), value);
                }
            }
            FieldMigration::Remove { field } => {
                source.remove(field);
            }
        }
    }
}

fn escape(field: &str) -> String {
    field.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Builds reindex work items for one logical index
#[derive(Debug, Clone)]
pub struct ReindexPlanner {
    index: LogicalIndex,
    scripts: Vec<ReindexScript>,
    discard_on_reindex: bool,
    timestamp_field: Option<String>,
}

impl ReindexPlanner {
    pub fn new(index: LogicalIndex) -> Self {
        Self {
            index,
            scripts: Vec::new(),
            discard_on_reindex: true,
            timestamp_field: None,
        }
    }

    /// Whether migrated-away indexes are deleted once the copy succeeds
    pub fn discard_on_reindex(&mut self, discard: bool) {
        self.discard_on_reindex = discard;
    }

    pub fn set_timestamp_field(&mut self, field: Option<String>) {
        self.timestamp_field = field;
    }

    pub fn timestamp_field(&self) -> Option<&str> {
        self.timestamp_field.as_deref()
    }

    /// Register a custom script introduced at `version`
    pub fn add_script(&mut self, version: u32, body: impl Into<String>) {
        self.scripts.push(ReindexScript {
            introduced_at_version: version,
            body: body.into(),
        });
    }

    pub fn add_migration(&mut self, version: u32, migration: &FieldMigration) {
        self.add_script(version, migration.script());
    }

    /// Copy `from` into `to`, optionally dropping `from`
    pub fn rename_field(&mut self, version: u32, from: &str, to: &str, remove_original: bool) {
        self.add_migration(
            version,
            &FieldMigration::Rename {
                from: from.to_string(),
                to: to.to_string(),
                remove_original,
            },
        );
    }

    pub fn remove_field(&mut self, version: u32, field: &str) {
        self.add_migration(
            version,
            &FieldMigration::Remove {
                field: field.to_string(),
            },
        );
    }

    pub fn scripts(&self) -> &[ReindexScript] {
        &self.scripts
    }

    /// Scripts needed to move from `from_version`, oldest first
    ///
    /// Scripts sharing a version keep their registration order.
    pub fn scripts_after(&self, from_version: u32) -> Vec<&ReindexScript> {
        let mut selected: Vec<&ReindexScript> = self
            .scripts
            .iter()
            .filter(|s| {
                s.introduced_at_version > from_version
                    && s.introduced_at_version <= self.index.version()
            })
            .collect();
        selected.sort_by_key(|s| s.introduced_at_version);
        selected
    }

    /// The single transform to run when migrating from `from_version`
    pub fn combined_script(&self, from_version: u32) -> Option<String> {
        let scripts = self.scripts_after(from_version);

        match scripts.as_slice() {
            [] => None,
            [only] => Some(only.body.clone()),
            many => {
                let mut functions = String::new();
                let mut calls = String::new();
                for (i, script) in many.iter().enumerate() {
                    functions.push_str(&format!("void f{:03}(def ctx) {{ {} }}\n", i, script.body));
                    calls.push_str(&format!("f{:03}(ctx); ", i));
                }
                Some(functions + calls.trim_end())
            }
        }
    }

    /// Plan a migration between two named physical indexes
    pub fn plan_between(
        &self,
        source: String,
        destination: String,
        from_version: u32,
    ) -> ReindexWorkItem {
        let delete_source_on_success = self.discard_on_reindex && source != destination;

        tracing::debug!(
            source = %source,
            destination = %destination,
            from_version,
            to_version = self.index.version(),
            "Planned reindex"
        );

        ReindexWorkItem {
            source_index: source,
            destination_index: destination,
            routing_alias: Some(self.index.name().to_string()),
            combined_script: self.combined_script(from_version),
            timestamp_field: self.timestamp_field.clone(),
            delete_source_on_success,
        }
    }

    /// Plan `name-v{from}` → `name-v{version}`
    pub fn plan(&self, from_version: u32) -> ReindexWorkItem {
        self.plan_between(
            self.index.physical_name(from_version),
            self.index.versioned_name(),
            from_version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events_planner() -> ReindexPlanner {
        let mut planner = ReindexPlanner::new(LogicalIndex::new("events", 3));
        planner.remove_field(2, "temp");
        planner.rename_field(3, "user", "userId", true);
        planner
    }

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_chain_from_first_version() {
        let planner = events_planner();
        let script = planner.combined_script(1).unwrap();

        let remove = FieldMigration::Remove {
            field: "temp".into(),
        }
        .script();
        assert!(script.starts_with(&format!("void f000(def ctx) {{ {} }}", remove)));
        assert!(script.contains("void f001(def ctx) { if (ctx._source.containsKey('user'))"));
        assert!(script.ends_with("f000(ctx); f001(ctx);"));
        assert!(script.find("f000(ctx)").unwrap() < script.find("f001(ctx)").unwrap());
    }

    #[test]
    fn test_single_script_passes_through() {
        let planner = events_planner();
        let script = planner.combined_script(2).unwrap();

        assert_eq!(
            script,
            "if (ctx._source.containsKey('user')) { ctx._source['userId'] = ctx._source.remove('user'); }"
        );
        assert!(!script.contains("f000"));
    }

    #[test]
    fn test_no_scripts_means_plain_copy() {
        let planner = events_planner();
        assert_eq!(planner.combined_script(3), None);
        assert_eq!(ReindexPlanner::new(LogicalIndex::new("x", 9)).combined_script(0), None);
    }

    #[test]
    fn test_chain_order_follows_versions_not_registration() {
        let mut planner = ReindexPlanner::new(LogicalIndex::new("events", 6));
        for version in [5, 2, 6, 3, 4] {
            planner.add_script(version, format!("/* v{} */", version));
        }

        for from in 0..6u32 {
            let script = planner.combined_script(from).unwrap_or_default();
            let positions: Vec<usize> = (2..=6u32)
                .filter_map(|v| script.find(&format!("/* v{} */", v)))
                .collect();

            let expected = (2..=6u32).filter(|v| *v > from).count();
            assert_eq!(positions.len(), expected, "from {from}");
            assert!(positions.windows(2).all(|w| w[0] < w[1]), "from {from}");
        }
    }

    #[test]
    fn test_scripts_above_target_are_ignored() {
        let mut planner = ReindexPlanner::new(LogicalIndex::new("events", 2));
        planner.add_script(2, "two");
        planner.add_script(3, "three");
        assert_eq!(planner.combined_script(1).as_deref(), Some("two"));
    }

    #[test]
    fn test_plan_work_item() {
        let mut planner = events_planner();
        planner.set_timestamp_field(Some("updated".into()));
        let item = planner.plan(1);

        assert_eq!(item.source_index, "events-v1");
        assert_eq!(item.destination_index, "events-v3");
        assert_eq!(item.routing_alias.as_deref(), Some("events"));
        assert_eq!(item.timestamp_field.as_deref(), Some("updated"));
        assert!(item.delete_source_on_success);
        assert!(item.combined_script.unwrap().contains("f001"));
    }

    #[test]
    fn test_plan_never_deletes_its_own_destination() {
        let planner = events_planner();
        let item = planner.plan(3);
        assert_eq!(item.source_index, item.destination_index);
        assert!(!item.delete_source_on_success);

        let mut keep = events_planner();
        keep.discard_on_reindex(false);
        assert!(!keep.plan(1).delete_source_on_success);
    }

    #[test]
    fn test_rename_is_idempotent() {
        let rename = FieldMigration::Rename {
            from: "user".into(),
            to: "userId".into(),
            remove_original: true,
        };

        let mut source = doc(json!({"user": "ada", "n": 1}));
        rename.apply(&mut source);
        assert_eq!(Value::Object(source.clone()), json!({"userId": "ada", "n": 1}));

        let mut migrated = doc(json!({"userId": "ada"}));
        rename.apply(&mut migrated);
        assert_eq!(Value::Object(migrated), json!({"userId": "ada"}));

        rename.apply(&mut source);
        assert_eq!(Value::Object(source), json!({"userId": "ada", "n": 1}));
    }

    #[test]
    fn test_rename_keeping_original() {
        let copy = FieldMigration::Rename {
            from: "a".into(),
            to: "b".into(),
            remove_original: false,
        };
        let mut source = doc(json!({"a": 1}));
        copy.apply(&mut source);
        assert_eq!(Value::Object(source), json!({"a": 1, "b": 1}));
        assert!(!copy.script().contains("remove"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let remove = FieldMigration::Remove {
            field: "temp".into(),
        };
        let mut source = doc(json!({"temp": true, "keep": 1}));
        remove.apply(&mut source);
        remove.apply(&mut source);
        assert_eq!(Value::Object(source), json!({"keep": 1}));
        assert!(remove.script().starts_with("if (ctx._source.containsKey('temp'))"));
    }

    #[test]
    fn test_field_names_are_escaped() {
        let remove = FieldMigration::Remove {
            field: "it's".into(),
        };
        assert!(remove.script().contains(r"'it\'s'"));
    }
}
