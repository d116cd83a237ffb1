//! Watcher engine: compiled watch patterns and edge-triggered evaluation.
//!
//! Patterns are compiled once at registration. After every committed
//! mutation the coordinator calls [`WatcherEngine::on_model_changed`], which
//! evaluates every watcher under a single read section, updates its last
//! observed state and returns the notifications to deliver. Delivery happens
//! later, once no lock is held.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{KbError, KbResult};
use crate::pattern::CompiledQuery;
use crate::storage::{GraphStore, SharedGraph, StorageError};
use crate::term::{Namespaces, Term};

use super::consumer::EventConsumer;
use super::types::{EventKind, PatternKind, TriggerMode, WatchEvent, WatchPattern, WatcherId};

fn lock_err(context: &'static str) -> KbError {
    KbError::internal(format!("poisoned lock: {context}"))
}

#[derive(Debug, Clone)]
enum Compiled {
    Ask(CompiledQuery),
    Select { variable: String, query: CompiledQuery },
    InstancesOf(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchState {
    Truth(bool),
    Members(BTreeSet<String>),
}

impl Compiled {
    fn evaluate(&self, graph: &dyn GraphStore, ns: &Namespaces) -> Result<WatchState, StorageError> {
        match self {
            Self::Ask(query) => graph.ask(query).map(WatchState::Truth),
            Self::Select { variable, query } => graph.select(variable, query).map(|values| {
                WatchState::Members(values.iter().map(|t| render(ns, t)).collect())
            }),
            Self::InstancesOf(class) => graph.instances_of(class).map(|ids| {
                WatchState::Members(ids.iter().map(|id| ns.light(id)).collect())
            }),
        }
    }

    /// Evaluation after a mutation. A class that has vanished from the
    /// store has no instances; only registration insists that it exists.
    fn reevaluate(&self, graph: &dyn GraphStore, ns: &Namespaces) -> Result<WatchState, StorageError> {
        match (self, self.evaluate(graph, ns)) {
            (Self::InstancesOf(_), Err(StorageError::Unknown { .. })) => Ok(WatchState::Members(BTreeSet::new())),
            (_, state) => state,
        }
    }
}

fn render(ns: &Namespaces, term: &Term) -> String {
    match term.as_resource() {
        Some(id) => ns.light(id),
        None => term.to_string(),
    }
}

struct Watcher {
    id: WatcherId,
    compiled: Compiled,
    mode: TriggerMode,
    state: WatchState,
    consumer: Arc<dyn EventConsumer>,
}

impl Watcher {
    /// Moves to `next` and returns the events it causes, plus whether the
    /// watcher is spent.
    fn transition(&mut self, next: WatchState, now: DateTime<Utc>) -> (Vec<WatchEvent>, bool) {
        let mut events = Vec::new();
        let mut spent = false;

        match (&self.state, &next) {
            (WatchState::Truth(prev), WatchState::Truth(new)) => {
                let (prev, new) = (*prev, *new);
                let kind = match self.mode {
                    TriggerMode::OnBecomeTrue if new && !prev => Some(EventKind::BecameTrue),
                    TriggerMode::OnBecomeTrueOnce if new => Some(EventKind::BecameTrue),
                    TriggerMode::OnBecomeFalse if !new && prev => Some(EventKind::BecameFalse),
                    TriggerMode::OnBecomeFalseOnce if !new => Some(EventKind::BecameFalse),
                    TriggerMode::OnToggle if new != prev => Some(if new {
                        EventKind::BecameTrue
                    } else {
                        EventKind::BecameFalse
                    }),
                    _ => None,
                };
                if let Some(kind) = kind {
                    events.push(WatchEvent::new(self.id, kind, Vec::new(), now));
                    spent = self.mode.is_one_shot();
                }
            }
            (WatchState::Members(prev), WatchState::Members(new)) => {
                let added: Vec<String> = new.difference(prev).cloned().collect();
                let removed: Vec<String> = prev.difference(new).cloned().collect();
                if let Compiled::InstancesOf(_) = self.compiled {
                    if !added.is_empty() {
                        events.push(WatchEvent::new(self.id, EventKind::NewInstances, added, now));
                    }
                } else {
                    if self.mode.watches_true() && !added.is_empty() {
                        events.push(WatchEvent::new(self.id, EventKind::NewInstances, added, now));
                    }
                    if self.mode.watches_false() && !removed.is_empty() {
                        events.push(WatchEvent::new(self.id, EventKind::RemovedInstances, removed, now));
                    }
                    spent = self.mode.is_one_shot() && !events.is_empty();
                }
            }
            _ => {
                warn!(watcher = %self.id, "watch state changed shape, ignoring evaluation");
                return (events, false);
            }
        }

        self.state = next;
        (events, spent)
    }
}

/// A pending delivery.
pub struct Notification {
    consumer: Arc<dyn EventConsumer>,
    /// The event handed to the consumer.
    pub event: WatchEvent,
}

impl Notification {
    /// Hands the event to its consumer.
    pub fn deliver(self) {
        self.consumer.consume_event(&self.event);
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification").field("event", &self.event).finish()
    }
}

/// Delivers notifications in order. Must be called with no lock held.
///
/// A consumer that panics loses its own event only: the panic is logged and
/// the remaining notifications are still delivered.
pub fn dispatch(notifications: Vec<Notification>) {
    for n in notifications {
        let watcher = n.event.watcher_id;
        if panic::catch_unwind(AssertUnwindSafe(|| n.deliver())).is_err() {
            warn!(watcher = %watcher, "event consumer panicked, event dropped");
        }
    }
}

/// Registered watchers and their last observed state.
pub struct WatcherEngine {
    namespaces: Namespaces,
    watchers: Mutex<Vec<Watcher>>,
    compilations: AtomicU64,
}

impl WatcherEngine {
    /// Empty engine qualifying patterns with `namespaces`.
    #[must_use]
    pub fn new(namespaces: Namespaces) -> Self {
        Self {
            namespaces,
            watchers: Mutex::new(Vec::new()),
            compilations: AtomicU64::new(0),
        }
    }

    fn compile(&self, pattern: &WatchPattern) -> KbResult<Compiled> {
        let compiled = match &pattern.kind {
            PatternKind::FactPattern { patterns } => {
                Compiled::Ask(CompiledQuery::compile(&self.namespaces, patterns)?)
            }
            PatternKind::NewInstance { variable, patterns } => {
                let query = CompiledQuery::compile(&self.namespaces, patterns)?;
                let variable = query.require_variable(variable)?;
                Compiled::Select { variable, query }
            }
            PatternKind::NewInstanceOf { class } => {
                Compiled::InstancesOf(self.namespaces.qualify(class.trim()))
            }
        };
        self.compilations.fetch_add(1, Ordering::Relaxed);
        Ok(compiled)
    }

    /// Compiles and registers a pattern, recording its current state.
    ///
    /// The state at registration is the baseline: instances already present
    /// are not reported, and a fact pattern that is already true does not
    /// fire `OnBecomeTrue` until it has been false.
    ///
    /// # Errors
    /// `PatternCompilation` for malformed patterns, `NotFound` when a
    /// `NewInstanceOf` class is unknown to the store.
    pub fn register(
        &self,
        graph: &SharedGraph,
        pattern: &WatchPattern,
        consumer: Arc<dyn EventConsumer>,
    ) -> KbResult<WatcherId> {
        let compiled = self.compile(pattern)?;
        let state = graph.with_read_section(|g| compiled.evaluate(g, &self.namespaces))??;

        let id = WatcherId::new();
        debug!(watcher = %id, kind = ?pattern.kind, mode = ?pattern.mode, initial = ?state, "watcher registered");

        let mut watchers = self.watchers.lock().map_err(|_| lock_err("watch.watchers"))?;
        watchers.push(Watcher {
            id,
            compiled,
            mode: pattern.mode,
            state,
            consumer,
        });
        Ok(id)
    }

    /// Removes a watcher. Returns false if it was not registered.
    pub fn unregister(&self, id: WatcherId) -> KbResult<bool> {
        let mut watchers = self.watchers.lock().map_err(|_| lock_err("watch.watchers"))?;
        let before = watchers.len();
        watchers.retain(|w| w.id != id);
        Ok(watchers.len() != before)
    }

    /// Removes every watcher. Returns how many were registered.
    pub fn clear(&self) -> KbResult<usize> {
        let mut watchers = self.watchers.lock().map_err(|_| lock_err("watch.watchers"))?;
        let n = watchers.len();
        watchers.clear();
        Ok(n)
    }

    /// Number of registered watchers.
    pub fn len(&self) -> KbResult<usize> {
        let watchers = self.watchers.lock().map_err(|_| lock_err("watch.watchers"))?;
        Ok(watchers.len())
    }

    /// True when no watcher is registered.
    pub fn is_empty(&self) -> KbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// True if the watcher is still registered.
    pub fn contains(&self, id: WatcherId) -> KbResult<bool> {
        let watchers = self.watchers.lock().map_err(|_| lock_err("watch.watchers"))?;
        Ok(watchers.iter().any(|w| w.id == id))
    }

    /// Number of pattern compilations since creation.
    #[must_use]
    pub fn compilation_count(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Re-evaluates every watcher against the committed state.
    ///
    /// A watcher that fails to evaluate keeps its previous state and fires
    /// nothing; the others proceed. A `NewInstanceOf` class that is no longer
    /// known evaluates to no instances.
    pub fn on_model_changed(&self, graph: &SharedGraph) -> Vec<Notification> {
        let Ok(mut watchers) = self.watchers.lock() else {
            warn!("watcher table poisoned, skipping watcher pass");
            return Vec::new();
        };
        if watchers.is_empty() {
            return Vec::new();
        }

        let evaluated = graph.with_read_section(|g| {
            watchers
                .iter()
                .map(|w| w.compiled.reevaluate(g, &self.namespaces))
                .collect::<Vec<_>>()
        });
        let evaluated = match evaluated {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "graph unavailable, skipping watcher pass");
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut notifications = Vec::new();
        let mut spent = Vec::new();
        for (watcher, state) in watchers.iter_mut().zip(evaluated) {
            let state = match state {
                Ok(state) => state,
                Err(e) => {
                    warn!(watcher = %watcher.id, error = %e, "watcher evaluation failed");
                    continue;
                }
            };
            let (events, done) = watcher.transition(state, now);
            for event in events {
                notifications.push(Notification {
                    consumer: Arc::clone(&watcher.consumer),
                    event,
                });
            }
            if done {
                spent.push(watcher.id);
            }
        }

        if !spent.is_empty() {
            watchers.retain(|w| !spent.contains(&w.id));
            debug!(count = spent.len(), "one-shot watchers removed");
        }
        notifications
    }
}

impl fmt::Debug for WatcherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherEngine")
            .field("watchers", &self.len().ok())
            .field("compilations", &self.compilation_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryGraph;

    struct Fixture {
        graph: SharedGraph,
        engine: WatcherEngine,
        ns: Namespaces,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                graph: SharedGraph::new(InMemoryGraph::new()),
                engine: WatcherEngine::new(Namespaces::default()),
                ns: Namespaces::default(),
            }
        }

        fn add(&self, s: &str) -> Vec<Notification> {
            let t = self.ns.parse_statement(s).unwrap();
            self.graph.with_write_section(|g| g.assert_triple(&t)).unwrap().unwrap();
            self.engine.on_model_changed(&self.graph)
        }

        fn remove(&self, s: &str) -> Vec<Notification> {
            let t = self.ns.parse_statement(s).unwrap();
            self.graph.with_write_section(|g| g.retract_triple(&t)).unwrap().unwrap();
            self.engine.on_model_changed(&self.graph)
        }

        fn watch(&self, pattern: WatchPattern) -> WatcherId {
            let consumer: Arc<dyn EventConsumer> = Arc::new(|_: &WatchEvent| {});
            self.engine.register(&self.graph, &pattern, consumer).unwrap()
        }
    }

    fn kinds(n: &[Notification]) -> Vec<EventKind> {
        n.iter().map(|n| n.event.kind).collect()
    }

    #[test]
    fn on_become_true_fires_once_per_edge() {
        let f = Fixture::new();
        f.watch(WatchPattern::facts(["?a eats grass"], TriggerMode::OnBecomeTrue));
        assert_eq!(kinds(&f.add("baboon eats grass")), vec![EventKind::BecameTrue]);
        assert!(f.add("gorilla eats grass").is_empty());
    }

    #[test]
    fn one_shot_is_removed_after_firing() {
        let f = Fixture::new();
        let id = f.watch(WatchPattern::facts(["?a eats grass"], TriggerMode::OnBecomeTrueOnce));
        assert_eq!(f.add("baboon eats grass").len(), 1);
        assert!(!f.engine.contains(id).unwrap());
        f.remove("baboon eats grass");
        assert!(f.add("baboon eats grass").is_empty());
        assert!(!f.engine.unregister(id).unwrap());
    }

    #[test]
    fn toggle_fires_on_both_edges_only() {
        let f = Fixture::new();
        f.watch(WatchPattern::facts(["?a eats grass"], TriggerMode::OnToggle));
        assert_eq!(kinds(&f.add("baboon eats grass")), vec![EventKind::BecameTrue]);
        assert!(f.add("gorilla eats grass").is_empty());
        assert!(f.remove("gorilla eats grass").is_empty());
        assert_eq!(kinds(&f.remove("baboon eats grass")), vec![EventKind::BecameFalse]);
        assert!(f.add("baboon eats meat").is_empty());
    }

    #[test]
    fn on_become_false_once() {
        let f = Fixture::new();
        f.add("baboon eats grass");
        let id = f.watch(WatchPattern::facts(["?a eats grass"], TriggerMode::OnBecomeFalseOnce));
        assert!(f.add("x y z").is_empty());
        assert_eq!(kinds(&f.remove("baboon eats grass")), vec![EventKind::BecameFalse]);
        assert!(!f.engine.contains(id).unwrap());
    }

    #[test]
    fn new_instance_of_reports_only_additions() {
        let f = Fixture::new();
        f.add("bob type Agent");
        f.watch(WatchPattern::new_instance_of("Agent"));

        let n = f.add("alice type Agent");
        assert_eq!(n.len(), 1);
        assert_eq!(n[0].event.kind, EventKind::NewInstances);
        assert_eq!(n[0].event.matched, vec!["alice".to_string()]);

        assert!(f.remove("alice type Agent").is_empty());
    }

    #[test]
    fn vanished_class_empties_the_instance_set() {
        let f = Fixture::new();
        f.add("robot type Agent");
        f.watch(WatchPattern::new_instance_of("Agent"));
        assert_eq!(f.add("bob type Agent")[0].event.matched, vec!["bob".to_string()]);

        f.remove("robot type Agent");
        assert!(f.remove("bob type Agent").is_empty());

        let n = f.add("bob type Agent");
        assert_eq!(kinds(&n), vec![EventKind::NewInstances]);
        assert_eq!(n[0].event.matched, vec!["bob".to_string()]);
    }

    #[test]
    fn panicking_consumer_does_not_starve_the_others() {
        fn explode(_: &WatchEvent) {
            panic!("consumer failure");
        }
        let f = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let loud: Arc<dyn EventConsumer> = Arc::new(explode);
        let quiet: Arc<dyn EventConsumer> = Arc::new(move |e: &WatchEvent| sink.lock().unwrap().push(e.kind));
        let pattern = WatchPattern::facts(["?a eats grass"], TriggerMode::OnToggle);
        f.engine.register(&f.graph, &pattern, loud).unwrap();
        f.engine.register(&f.graph, &pattern, quiet).unwrap();

        dispatch(f.add("baboon eats grass"));
        dispatch(f.remove("baboon eats grass"));

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::BecameTrue, EventKind::BecameFalse]);
    }

    #[test]
    fn new_instance_of_unknown_class_is_rejected() {
        let f = Fixture::new();
        let consumer: Arc<dyn EventConsumer> = Arc::new(|_: &WatchEvent| {});
        let err = f
            .engine
            .register(&f.graph, &WatchPattern::new_instance_of("Unicorn"), consumer)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(f.engine.is_empty().unwrap());
    }

    #[test]
    fn new_instance_reports_added_and_removed_bindings() {
        let f = Fixture::new();
        f.watch(WatchPattern::new_instance("?o", ["?o isOn table"], TriggerMode::OnToggle));
        let n = f.add("cup isOn table");
        assert_eq!(kinds(&n), vec![EventKind::NewInstances]);
        assert_eq!(n[0].event.matched, vec!["cup".to_string()]);
        let n = f.remove("cup isOn table");
        assert_eq!(kinds(&n), vec![EventKind::RemovedInstances]);
    }

    #[test]
    fn malformed_patterns_fail_at_registration() {
        let f = Fixture::new();
        let consumer: Arc<dyn EventConsumer> = Arc::new(|_: &WatchEvent| {});
        let err = f
            .engine
            .register(&f.graph, &WatchPattern::facts(["?a eats"], TriggerMode::OnToggle), consumer)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(f.engine.compilation_count(), 0);
    }

    #[test]
    fn compiles_once_per_registration() {
        let f = Fixture::new();
        f.watch(WatchPattern::facts(["?a eats grass"], TriggerMode::OnToggle));
        for i in 0..5 {
            f.add(&format!("animal{i} eats grass"));
        }
        assert_eq!(f.engine.compilation_count(), 1);
    }
}
