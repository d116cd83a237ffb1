//! Knowledge base: the mutation coordinator.
//!
//! [`KnowledgeBase`] is the single choke point for every mutation of the fact
//! graph. A successful mutation commits in one write section, then
//! invalidates the lookup cache, records short-lived facts with the memory
//! manager and runs the watcher pass, in that order, before returning.
//! Reads take a read section and run concurrently with each other.

mod write_path;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::KnowledgeConfig;
use crate::error::KbResult;
use crate::lookup::LookupEntry;
use crate::memory::{FactRecord, MemoryProfile, Sweeper};
use crate::pattern::{CompiledQuery, PartialStatement};
use crate::storage::{ConsistencyReport, GraphStore, InMemoryGraph, ResourceType};
use crate::term::{Namespaces, Term, Triple};
use crate::watch::{ChannelConsumer, EventConsumer, WatchPattern, WatchStream, WatcherId};

use write_path::Core;

/// A watcher whose events are queued on a bounded channel.
#[derive(Debug)]
pub struct Subscription {
    /// Pass to [`KnowledgeBase::unregister_watcher`] to stop the events.
    pub watcher_id: WatcherId,
    /// Receiving end of the event channel.
    pub stream: WatchStream,
    consumer: Arc<ChannelConsumer>,
}

impl Subscription {
    /// Events lost because the stream was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.consumer.dropped_events()
    }
}

/// A knowledge base over one fact graph.
///
/// Dropping it stops the background sweeper.
pub struct KnowledgeBase {
    sweeper: Option<Sweeper>,
    core: Arc<Core>,
}

impl KnowledgeBase {
    /// An in-memory knowledge base with a running sweeper.
    pub fn new(config: KnowledgeConfig) -> KbResult<Self> {
        Self::with_store(config, Box::new(InMemoryGraph::new()))
    }

    /// A knowledge base over the given store, with a running sweeper.
    pub fn with_store(config: KnowledgeConfig, store: Box<dyn GraphStore>) -> KbResult<Self> {
        let mut kb = Self::manual(config, store)?;
        let period = kb.core.config.memory.sweep_period();
        kb.sweeper = Some(Sweeper::spawn("orokb-sweeper", period, Arc::downgrade(&kb.core))?);
        Ok(kb)
    }

    /// A knowledge base without background sweeper. Facts only expire
    /// through [`KnowledgeBase::sweep_now`] or [`KnowledgeBase::sweep_at`].
    ///
    /// Facts the store already annotates with a memory profile are tracked
    /// from their recorded creation time.
    pub fn manual(config: KnowledgeConfig, store: Box<dyn GraphStore>) -> KbResult<Self> {
        config.validate()?;
        let core = Core::new(config, store);
        core.resume_tracking()?;
        Ok(Self {
            sweeper: None,
            core: Arc::new(core),
        })
    }

    /// Configuration the knowledge base was built with.
    #[must_use]
    pub fn config(&self) -> &KnowledgeConfig {
        &self.core.config
    }

    /// Prefix handling used by the `*_str` operations.
    #[must_use]
    pub fn namespaces(&self) -> &Namespaces {
        &self.core.namespaces
    }

    /// Parses a statement with this knowledge base's namespaces.
    pub fn parse(&self, statement: &str) -> KbResult<Triple> {
        self.core.namespaces.parse_statement(statement)
    }

    fn parse_all<S: AsRef<str>>(&self, statements: &[S]) -> KbResult<Vec<Triple>> {
        statements.iter().map(|s| self.parse(s.as_ref())).collect()
    }

    /// Asserts one fact.
    ///
    /// With `safe`, the fact is rolled back if it makes the model
    /// inconsistent and `Ok(false)` is returned.
    pub fn assert(&self, fact: &Triple, profile: MemoryProfile, safe: bool) -> KbResult<bool> {
        self.core.assert_many(std::slice::from_ref(fact), profile, safe)
    }

    /// Asserts a batch in one section. True iff every fact was accepted.
    pub fn assert_many(&self, facts: &[Triple], profile: MemoryProfile, safe: bool) -> KbResult<bool> {
        self.core.assert_many(facts, profile, safe)
    }

    /// Parses and asserts one statement.
    pub fn assert_str(&self, statement: &str, profile: MemoryProfile, safe: bool) -> KbResult<bool> {
        let fact = self.parse(statement)?;
        self.assert(&fact, profile, safe)
    }

    /// Parses and asserts a batch of statements. Nothing is asserted if one
    /// of them is malformed.
    pub fn assert_strs<S: AsRef<str>>(&self, statements: &[S], profile: MemoryProfile, safe: bool) -> KbResult<bool> {
        let facts = self.parse_all(statements)?;
        self.core.assert_many(&facts, profile, safe)
    }

    /// Retracts one fact. Retracting an absent fact is a no-op.
    pub fn retract(&self, fact: &Triple) -> KbResult<()> {
        self.core.retract_many(std::slice::from_ref(fact)).map(|_| ())
    }

    /// Retracts a batch in one section. Returns how many were present.
    pub fn retract_many(&self, facts: &[Triple]) -> KbResult<usize> {
        self.core.retract_many(facts)
    }

    /// Parses and retracts one statement.
    pub fn retract_str(&self, statement: &str) -> KbResult<()> {
        let fact = self.parse(statement)?;
        self.retract(&fact)
    }

    /// Removes every statement matching a partial statement such as
    /// `"baboon eats ?x"`. Returns how many were removed.
    pub fn clear(&self, partial_statement: &str) -> KbResult<usize> {
        let pattern = PartialStatement::parse(&self.core.namespaces, partial_statement)?;
        self.core.clear(&pattern)
    }

    /// Asserts facts permanently, first removing the current values of
    /// functional properties.
    pub fn update(&self, facts: &[Triple]) -> KbResult<()> {
        self.core.update(facts)
    }

    /// Parses a batch, then [`KnowledgeBase::update`]s it.
    pub fn update_strs<S: AsRef<str>>(&self, statements: &[S]) -> KbResult<()> {
        let facts = self.parse_all(statements)?;
        self.core.update(&facts)
    }

    /// True if the fact holds, class inference included.
    pub fn check(&self, fact: &Triple) -> KbResult<bool> {
        let query = CompiledQuery::from_patterns(vec![PartialStatement::from_triple(fact)]);
        Ok(self.core.graph.with_read_section(|g| g.ask(&query))??)
    }

    /// True if the conjunction of partial statements has a solution.
    pub fn ask<S: AsRef<str>>(&self, patterns: &[S]) -> KbResult<bool> {
        let query = CompiledQuery::compile(&self.core.namespaces, patterns)?;
        Ok(self.core.graph.with_read_section(|g| g.ask(&query))??)
    }

    /// Values of `variable` over the solutions, in light form.
    pub fn find<S: AsRef<str>>(&self, variable: &str, patterns: &[S]) -> KbResult<HashSet<String>> {
        self.find_filtered::<S, &str>(variable, patterns, &[])
    }

    /// [`KnowledgeBase::find`] restricted by filters such as `"?w > 10"`.
    pub fn find_filtered<S: AsRef<str>, F: AsRef<str>>(
        &self,
        variable: &str,
        patterns: &[S],
        filters: &[F],
    ) -> KbResult<HashSet<String>> {
        let ns = &self.core.namespaces;
        let query = CompiledQuery::compile_filtered(ns, patterns, filters)?;
        let variable = query.require_variable(variable)?;
        let values = self.core.graph.with_read_section(|g| g.select(&variable, &query))??;
        Ok(values
            .iter()
            .map(|t| match t {
                Term::Resource { id } => ns.light(id),
                Term::Literal(_) => t.to_string(),
            })
            .collect())
    }

    /// Instances of a class, subclasses included, in light form.
    ///
    /// # Errors
    /// `NotFound` if the class is unknown.
    pub fn instances_of(&self, class: &str) -> KbResult<HashSet<String>> {
        let ns = &self.core.namespaces;
        let class = ns.qualify(class.trim());
        let ids = self.core.graph.with_read_section(|g| g.instances_of(&class))??;
        Ok(ids.iter().map(|id| ns.light(id)).collect())
    }

    /// `None` when the model is consistent.
    pub fn check_consistency(&self) -> KbResult<Option<ConsistencyReport>> {
        Ok(self.core.graph.with_read_section(|g| g.check_consistency().err())?)
    }

    /// Number of asserted statements.
    pub fn size(&self) -> KbResult<usize> {
        Ok(self.core.graph.with_read_section(|g| g.len())?)
    }

    /// Resources known under a label or identifier, case-insensitive.
    pub fn lookup(&self, term: &str) -> KbResult<Option<HashSet<LookupEntry>>> {
        self.core.lookup.lookup(&self.core.graph, term)
    }

    /// Ids of the resources of `kind` known under `term`.
    pub fn lookup_typed(&self, term: &str, kind: ResourceType) -> KbResult<HashSet<String>> {
        self.core.lookup.lookup_typed(&self.core.graph, term, kind)
    }

    /// Full index rebuilds so far.
    #[must_use]
    pub fn lookup_rebuild_count(&self) -> u64 {
        self.core.lookup.rebuild_count()
    }

    /// Registers a watcher. Its state at registration is the baseline for
    /// later transitions.
    pub fn register_watcher(&self, pattern: &WatchPattern, consumer: Arc<dyn EventConsumer>) -> KbResult<WatcherId> {
        let _guard = self.core.commit_guard()?;
        self.core.watchers.register(&self.core.graph, pattern, consumer)
    }

    /// Registers a watcher whose events are queued on a bounded channel of
    /// the configured capacity.
    pub fn subscribe(&self, pattern: &WatchPattern) -> KbResult<Subscription> {
        let (consumer, stream) = ChannelConsumer::bounded(self.core.config.watch.channel_capacity);
        let watcher_id = self.register_watcher(pattern, Arc::clone(&consumer) as Arc<dyn EventConsumer>)?;
        Ok(Subscription {
            watcher_id,
            stream,
            consumer,
        })
    }

    /// Idempotent. Returns false if the watcher was not registered.
    pub fn unregister_watcher(&self, id: WatcherId) -> KbResult<bool> {
        self.core.watchers.unregister(id)
    }

    /// Unregisters every watcher. Returns how many there were.
    pub fn clear_watchers(&self) -> KbResult<usize> {
        self.core.watchers.clear()
    }

    /// Registered watchers, one-shot ones that fired excluded.
    pub fn watcher_count(&self) -> KbResult<usize> {
        self.core.watchers.len()
    }

    /// Pattern compilations so far; one per registration.
    #[must_use]
    pub fn watcher_compilations(&self) -> u64 {
        self.core.watchers.compilation_count()
    }

    /// Runs one sweep now. Returns how many facts expired.
    pub fn sweep_now(&self) -> KbResult<usize> {
        self.core.sweep_at(Utc::now())
    }

    /// Runs one sweep as if the clock read `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> KbResult<usize> {
        self.core.sweep_at(now)
    }

    /// Profile and creation time of a non-permanent fact, as annotated in
    /// the store.
    pub fn memory_record(&self, fact: &Triple) -> KbResult<Option<FactRecord>> {
        Ok(self.core.graph.with_read_section(|g| g.annotation(fact))??)
    }

    /// Number of facts waiting to expire.
    pub fn tracked_facts(&self) -> KbResult<usize> {
        self.core.memory.tracked_count()
    }

    /// False for knowledge bases built with [`KnowledgeBase::manual`].
    #[must_use]
    pub fn has_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("namespace", &self.core.namespaces.default_prefix())
            .field("graph", &self.core.graph)
            .field("watchers", &self.core.watchers)
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}
