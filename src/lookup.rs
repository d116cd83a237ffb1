//! Lookup cache: keyword index from labels and identifiers to resources.
//!
//! The index is derived from the graph and rebuilt lazily. Invalidation runs
//! at two speeds:
//!
//! - a retraction marks the cache `dirty`; the next access rebuilds it, so a
//!   removed resource is never returned;
//! - an assertion only marks it `stale`; a stale cache keeps answering hits
//!   and is rebuilt on the first miss.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{KbError, KbResult};
use crate::storage::{NamedResource, ResourceType, SharedGraph};
use crate::term::Namespaces;

fn lock_err(context: &'static str) -> KbError {
    KbError::internal(format!("poisoned lock: {context}"))
}

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

/// One indexed resource, id in light form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupEntry {
    /// Resource id, light form.
    pub id: String,
    /// Kind at the time of the last rebuild.
    pub kind: ResourceType,
}

#[derive(Debug)]
struct LookupState {
    index: HashMap<String, HashSet<LookupEntry>>,
    dirty: bool,
    stale: bool,
}

/// Keyword index over the named resources of a graph.
#[derive(Debug)]
pub struct LookupCache {
    namespaces: Namespaces,
    state: Mutex<LookupState>,
    rebuilds: AtomicU64,
}

impl LookupCache {
    /// An empty cache, built on first lookup.
    #[must_use]
    pub fn new(namespaces: Namespaces) -> Self {
        Self {
            namespaces,
            state: Mutex::new(LookupState {
                index: HashMap::new(),
                dirty: true,
                stale: false,
            }),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Called after an assertion committed.
    pub fn note_assertion(&self) -> KbResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_err("lookup.state"))?;
        state.stale = true;
        Ok(())
    }

    /// Called after a retraction committed, whether or not it removed anything.
    pub fn note_retraction(&self) -> KbResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_err("lookup.state"))?;
        state.dirty = true;
        Ok(())
    }

    /// Resources indexed under `term`, case-insensitive.
    ///
    /// `None` means the keyword is not indexed at all.
    pub fn lookup(&self, graph: &SharedGraph, term: &str) -> KbResult<Option<HashSet<LookupEntry>>> {
        let key = normalize_key(term);
        let mut state = self.state.lock().map_err(|_| lock_err("lookup.state"))?;
        if state.dirty || (state.stale && !state.index.contains_key(&key)) {
            self.rebuild(graph, &mut state)?;
        }
        let found = state.index.get(&key).cloned();
        debug!(term = %term, hits = found.as_ref().map_or(0, HashSet::len), "lookup");
        Ok(found)
    }

    /// Ids indexed under `term` with the given kind.
    pub fn lookup_typed(&self, graph: &SharedGraph, term: &str, kind: ResourceType) -> KbResult<HashSet<String>> {
        Ok(self
            .lookup(graph, term)?
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.id)
            .collect())
    }

    /// Number of rebuilds since creation.
    #[must_use]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    fn rebuild(&self, graph: &SharedGraph, state: &mut LookupState) -> KbResult<()> {
        let (consistency, resources) =
            graph.with_read_section(|g| (g.check_consistency(), g.named_resources()))?;
        let resources = resources?;

        state.index.clear();
        state.dirty = false;
        state.stale = false;
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        if let Err(report) = consistency {
            warn!(error = %report, "model is inconsistent, lookup index left empty");
            return Ok(());
        }

        for resource in &resources {
            self.index_resource(&mut state.index, resource);
        }
        debug!(resources = resources.len(), keywords = state.index.len(), "lookup index rebuilt");
        Ok(())
    }

    fn index_resource(&self, index: &mut HashMap<String, HashSet<LookupEntry>>, resource: &NamedResource) {
        let entry = LookupEntry {
            id: self.namespaces.light(&resource.id),
            kind: resource.kind,
        };
        for label in &resource.labels {
            index
                .entry(normalize_key(&label.lexical))
                .or_default()
                .insert(entry.clone());
        }
        // Instances are always reachable by id, other kinds only when unlabelled.
        if resource.kind == ResourceType::Instance || resource.labels.is_empty() {
            index
                .entry(normalize_key(Namespaces::local_name(&resource.id)))
                .or_default()
                .insert(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryGraph;

    fn setup(statements: &[&str]) -> (SharedGraph, LookupCache) {
        let ns = Namespaces::default();
        let graph = SharedGraph::new(InMemoryGraph::new());
        for s in statements {
            let t = ns.parse_statement(s).unwrap();
            graph.with_write_section(|g| g.assert_triple(&t)).unwrap().unwrap();
        }
        (graph, LookupCache::new(ns))
    }

    fn add(graph: &SharedGraph, s: &str) {
        let t = Namespaces::default().parse_statement(s).unwrap();
        graph.with_write_section(|g| g.assert_triple(&t)).unwrap().unwrap();
    }

    #[test]
    fn indexes_labels_and_local_names() {
        let (graph, cache) = setup(&[
            "Fruit type owl:Class",
            "Fruit rdfs:label \"fruit\"",
            "banana1 type Fruit",
            "banana1 rdfs:label \"Banana\"@en",
        ]);
        let hits = cache.lookup(&graph, "BANANA").unwrap().unwrap();
        assert_eq!(
            hits,
            HashSet::from([LookupEntry {
                id: "banana1".to_string(),
                kind: ResourceType::Instance
            }])
        );
        assert!(cache.lookup(&graph, "banana1").unwrap().is_some());
        assert_eq!(
            cache.lookup_typed(&graph, "fruit", ResourceType::Class).unwrap(),
            HashSet::from(["Fruit".to_string()])
        );
        assert!(cache.lookup(&graph, "unknown").unwrap().is_none());
    }

    #[test]
    fn labelled_classes_are_not_indexed_by_id() {
        let (graph, cache) = setup(&["Kitchen_Table type owl:Class", "Kitchen_Table rdfs:label \"table\""]);
        assert!(cache.lookup(&graph, "kitchen_table").unwrap().is_none());
        assert!(cache.lookup(&graph, "table").unwrap().is_some());
    }

    #[test]
    fn assertion_is_visible_after_first_miss() {
        let (graph, cache) = setup(&["cup type Object"]);
        assert!(cache.lookup(&graph, "cup").unwrap().is_some());
        assert_eq!(cache.rebuild_count(), 1);

        add(&graph, "plate type Object");
        cache.note_assertion().unwrap();

        // a hit on a stale cache does not rebuild
        assert!(cache.lookup(&graph, "cup").unwrap().is_some());
        assert_eq!(cache.rebuild_count(), 1);

        assert!(cache.lookup(&graph, "plate").unwrap().is_some());
        assert_eq!(cache.rebuild_count(), 2);
    }

    #[test]
    fn retraction_forces_rebuild_before_next_access() {
        let (graph, cache) = setup(&["banana1 type Fruit", "banana1 rdfs:label \"banana\""]);
        assert!(cache.lookup(&graph, "banana").unwrap().is_some());

        let ns = Namespaces::default();
        for s in ["banana1 type Fruit", "banana1 rdfs:label \"banana\""] {
            let t = ns.parse_statement(s).unwrap();
            graph.with_write_section(|g| g.retract_triple(&t)).unwrap().unwrap();
        }
        cache.note_retraction().unwrap();
        assert!(cache.lookup(&graph, "banana").unwrap().is_none());
    }

    #[test]
    fn inconsistent_model_yields_empty_index() {
        let (graph, cache) = setup(&[
            "Animal owl:disjointWith Plant",
            "baboon type Animal",
            "baboon type Plant",
        ]);
        assert!(cache.lookup(&graph, "baboon").unwrap().is_none());
    }
}
