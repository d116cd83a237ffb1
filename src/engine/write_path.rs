//! Engine write path.
//!
//! Every mutation runs under the commit mutex: one write section on the
//! graph, then the post-commit steps in fixed order (lookup invalidation,
//! memory tracking, watcher pass). The commit mutex is released before the
//! collected notifications are delivered.
//!
//! The memory profile of a non-permanent fact is annotated in the store in
//! the same write section as the fact itself.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::KnowledgeConfig;
use crate::error::{ExecutionError, KbError, KbResult};
use crate::lookup::LookupCache;
use crate::memory::{FactRecord, MemoryManager, MemoryProfile, SweepTarget};
use crate::pattern::{PartialStatement, PatternTerm};
use crate::storage::{GraphStore, SharedGraph, StorageError};
use crate::term::{Namespaces, Triple};
use crate::watch::{dispatch, Notification, WatcherEngine};

fn lock_err(context: &'static str) -> KbError {
    KbError::internal(format!("poisoned lock: {context}"))
}

/// What a committed write changed.
#[derive(Debug, Default)]
struct Change {
    inserted: usize,
    removed: Vec<Triple>,
    /// Records annotated in the store, to mirror in the memory manager.
    track: Vec<FactRecord>,
}

impl Change {
    fn is_empty(&self) -> bool {
        self.inserted == 0 && self.removed.is_empty()
    }
}

/// Shared state of one knowledge base.
pub(crate) struct Core {
    pub(crate) namespaces: Namespaces,
    pub(crate) config: KnowledgeConfig,
    pub(crate) graph: SharedGraph,
    pub(crate) lookup: LookupCache,
    pub(crate) memory: MemoryManager,
    pub(crate) watchers: WatcherEngine,
    commit: Mutex<()>,
}

impl Core {
    pub(crate) fn new(config: KnowledgeConfig, store: Box<dyn GraphStore>) -> Self {
        let namespaces = config.namespaces();
        Self {
            lookup: LookupCache::new(namespaces.clone()),
            memory: MemoryManager::new(config.memory.clone()),
            watchers: WatcherEngine::new(namespaces.clone()),
            graph: SharedGraph::from_boxed(store),
            commit: Mutex::new(()),
            namespaces,
            config,
        }
    }

    pub(crate) fn commit_guard(&self) -> KbResult<MutexGuard<'_, ()>> {
        self.commit.lock().map_err(|_| lock_err("kb.commit"))
    }

    /// Mirrors the annotations found in the store, e.g. when it was
    /// populated by an earlier session. Returns how many facts are tracked.
    pub(crate) fn resume_tracking(&self) -> KbResult<usize> {
        let records = self.graph.with_read_section(|g| g.annotations())??;
        let count = records.len();
        for record in records {
            self.memory.adopt(record)?;
        }
        if count > 0 {
            info!(count, "resumed tracking of annotated facts");
        }
        Ok(count)
    }

    /// Post-commit steps, in order. Returns the notifications to deliver.
    fn after_commit(&self, change: &Change) -> Vec<Notification> {
        if change.inserted > 0 {
            if let Err(e) = self.lookup.note_assertion() {
                warn!(error = %e, "failed to mark lookup cache stale");
            }
        }
        for fact in &change.removed {
            if let Err(e) = self.memory.forget(fact) {
                warn!(fact = %fact, error = %e, "failed to forget tracking record");
            }
        }
        for record in &change.track {
            if let Err(e) = self.memory.adopt(record.clone()) {
                warn!(fact = %record.fact, error = %e, "failed to track fact");
            }
        }
        if change.is_empty() {
            return Vec::new();
        }
        self.watchers.on_model_changed(&self.graph)
    }

    fn note_retraction(&self) {
        if let Err(e) = self.lookup.note_retraction() {
            warn!(error = %e, "failed to mark lookup cache dirty");
        }
    }

    /// Inserts facts in one write section. In safe mode each insertion is
    /// followed by a consistency check and rolled back when it fails.
    pub(crate) fn assert_many(&self, facts: &[Triple], profile: MemoryProfile, safe: bool) -> KbResult<bool> {
        let guard = self.commit_guard()?;
        let mut change = Change::default();
        let mut all_accepted = true;
        let now = Utc::now();

        let outcome = self.graph.with_write_section(|g| -> Result<(), StorageError> {
            for fact in facts {
                let inserted = g.assert_triple(fact)?;
                if safe {
                    if let Err(report) = g.check_consistency() {
                        if inserted {
                            g.retract_triple(fact)?;
                        }
                        info!(fact = %fact, reason = %report, "fact rejected: would make the model inconsistent");
                        all_accepted = false;
                        continue;
                    }
                }
                if inserted {
                    change.inserted += 1;
                }
                let current = g.annotation(fact)?;
                if let Some(record) = FactRecord::renewal(current.as_ref(), fact, profile, now) {
                    g.annotate(&record)?;
                    change.track.push(record);
                }
            }
            Ok(())
        })?;

        // Insertions before a backend failure are committed; finish their
        // post-commit steps before reporting it.
        let notifications = self.after_commit(&change);
        drop(guard);
        dispatch(notifications);
        outcome?;

        debug!(count = facts.len(), inserted = change.inserted, %profile, safe, "assert");
        Ok(all_accepted)
    }

    /// Removes facts in one write section. Absent facts are ignored.
    pub(crate) fn retract_many(&self, facts: &[Triple]) -> KbResult<usize> {
        let guard = self.commit_guard()?;
        let mut change = Change::default();
        let outcome = self.graph.with_write_section(|g| -> Result<(), StorageError> {
            for fact in facts {
                if g.retract_triple(fact)? {
                    change.removed.push(fact.clone());
                }
            }
            Ok(())
        })?;

        // A retraction always invalidates the lookup cache, even a no-op one.
        self.note_retraction();
        let notifications = self.after_commit(&change);
        drop(guard);
        dispatch(notifications);
        outcome?;

        debug!(requested = facts.len(), removed = change.removed.len(), "retract");
        Ok(change.removed.len())
    }

    /// Removes every asserted statement matching a partial statement.
    pub(crate) fn clear(&self, pattern: &PartialStatement) -> KbResult<usize> {
        let guard = self.commit_guard()?;
        let mut change = Change::default();
        let outcome = self.graph.with_write_section(|g| -> Result<(), StorageError> {
            for fact in g.matching(pattern)? {
                if g.retract_triple(&fact)? {
                    change.removed.push(fact);
                }
            }
            Ok(())
        })?;

        self.note_retraction();
        let notifications = self.after_commit(&change);
        drop(guard);
        dispatch(notifications);
        outcome?;

        debug!(pattern = %pattern, removed = change.removed.len(), "clear");
        Ok(change.removed.len())
    }

    /// Replaces the values of functional properties, then asserts the facts
    /// permanently, all in one write section.
    pub(crate) fn update(&self, facts: &[Triple]) -> KbResult<()> {
        let guard = self.commit_guard()?;
        let mut change = Change::default();
        let outcome = self.graph.with_write_section(|g| -> Result<(), StorageError> {
            for fact in facts {
                if g.is_functional(&fact.predicate)? {
                    let existing = PartialStatement {
                        subject: PatternTerm::resource(fact.subject.as_str()),
                        predicate: PatternTerm::resource(fact.predicate.as_str()),
                        object: PatternTerm::var("value"),
                    };
                    for old in g.matching(&existing)? {
                        if old != *fact && g.retract_triple(&old)? {
                            change.removed.push(old);
                        }
                    }
                }
                if g.assert_triple(fact)? {
                    change.inserted += 1;
                }
            }
            Ok(())
        })?;

        if !change.removed.is_empty() {
            self.note_retraction();
        }
        let notifications = self.after_commit(&change);
        drop(guard);
        dispatch(notifications);
        outcome?;

        debug!(count = facts.len(), replaced = change.removed.len(), "update");
        Ok(())
    }

    /// Expires every tracked fact whose TTL has elapsed at `now`, in one
    /// write section. Returns how many facts were removed.
    pub(crate) fn sweep_at(&self, now: DateTime<Utc>) -> KbResult<usize> {
        let guard = self.commit_guard()?;
        let due = self.memory.due(now)?;
        if due.is_empty() {
            return Ok(0);
        }

        let outcomes = self
            .graph
            .with_write_section(|g| due.iter().map(|f| g.retract_triple(f)).collect::<Vec<_>>())?;

        let mut change = Change::default();
        let mut settled = Vec::with_capacity(due.len());
        for (fact, outcome) in due.iter().zip(outcomes) {
            match outcome {
                Ok(true) => {
                    change.removed.push(fact.clone());
                    settled.push(fact);
                }
                Ok(false) => {
                    let err = ExecutionError::InternalInconsistency {
                        message: format!("tracked fact '{fact}' is missing from the store"),
                    };
                    warn!(error = %err, "dropping tracking record");
                    settled.push(fact);
                }
                Err(e) => {
                    warn!(fact = %fact, error = %e, "failed to expire fact, keeping it for the next sweep");
                }
            }
        }
        self.memory.drop_records(settled)?;

        let notifications = if change.removed.is_empty() {
            Vec::new()
        } else {
            self.note_retraction();
            self.after_commit(&change)
        };
        drop(guard);
        dispatch(notifications);

        debug!(due = due.len(), removed = change.removed.len(), "sweep");
        Ok(change.removed.len())
    }
}

impl SweepTarget for Core {
    fn sweep_tick(&self) {
        if let Err(e) = self.sweep_at(Utc::now()) {
            warn!(error = %e, "memory sweep failed");
        }
    }
}
