mod common;

use std::thread;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;

use orokb::{
    FactRecord, GraphStore, InMemoryGraph, KnowledgeBase, KnowledgeConfig, MemoryProfile, Term, TriggerMode, Triple,
    WatchPattern,
};

use common::{init_tracing, manual_kb};

fn kb_with_unit(time_unit_ms: u64) -> KnowledgeBase {
    init_tracing();
    let mut config = KnowledgeConfig::default();
    config.memory.time_unit_ms = time_unit_ms;
    KnowledgeBase::manual(config, Box::new(InMemoryGraph::new())).unwrap()
}

#[test]
fn ephemeral_fact_lives_exactly_its_ttl() {
    let kb = kb_with_unit(1000);
    let fact = kb.parse("chicken has teeth").unwrap();
    kb.assert(&fact, MemoryProfile::Ephemeral, false).unwrap();
    let created = kb.memory_record(&fact).unwrap().unwrap().created_at;

    assert_eq!(kb.sweep_at(created + ChronoDuration::seconds(9)).unwrap(), 0);
    assert!(kb.check(&fact).unwrap());

    assert_eq!(kb.sweep_at(created + ChronoDuration::seconds(11)).unwrap(), 1);
    assert!(!kb.check(&fact).unwrap());
    assert!(kb.memory_record(&fact).unwrap().is_none());
}

#[test]
fn episodic_outlives_ephemeral() {
    let kb = kb_with_unit(1000);
    kb.assert_str("cup isOn table", MemoryProfile::Episodic, false).unwrap();
    let fact = kb.parse("cup isOn table").unwrap();
    let created = kb.memory_record(&fact).unwrap().unwrap().created_at;

    assert_eq!(kb.sweep_at(created + ChronoDuration::seconds(60)).unwrap(), 0);
    assert_eq!(kb.sweep_at(created + ChronoDuration::seconds(301)).unwrap(), 1);
}

#[test]
fn permanent_facts_survive_every_sweep() {
    let kb = kb_with_unit(1);
    kb.assert_str("kitchen type Room", MemoryProfile::Permanent, false).unwrap();
    let mut now = chrono::Utc::now();
    for _ in 0..50 {
        now += ChronoDuration::days(1);
        assert_eq!(kb.sweep_at(now).unwrap(), 0);
    }
    assert!(kb.check(&kb.parse("kitchen type Room").unwrap()).unwrap());
    assert_eq!(kb.tracked_facts().unwrap(), 0);

    kb.retract_str("kitchen type Room").unwrap();
    assert_eq!(kb.size().unwrap(), 0);
}

#[test]
fn ephemeral_fact_is_gone_after_two_periods() {
    let kb = manual_kb();
    let t0 = chrono::Utc::now();
    kb.assert_str("chicken has teeth", MemoryProfile::Ephemeral, false).unwrap();
    kb.assert_str("chicken has wings", MemoryProfile::Permanent, false).unwrap();

    kb.sweep_at(t0 + ChronoDuration::milliseconds(10_000)).unwrap();

    assert!(!kb.ask(&["chicken has ?what", "?x has teeth"]).unwrap());
    assert!(kb.check(&kb.parse("chicken has wings").unwrap()).unwrap());
}

#[test]
fn shortest_ttl_wins_on_reassertion() {
    let kb = kb_with_unit(1000);
    let fact = kb.parse("door state open").unwrap();

    kb.assert(&fact, MemoryProfile::Episodic, false).unwrap();
    kb.assert(&fact, MemoryProfile::Ephemeral, false).unwrap();
    assert_eq!(kb.memory_record(&fact).unwrap().unwrap().profile, MemoryProfile::Ephemeral);

    kb.assert(&fact, MemoryProfile::Permanent, false).unwrap();
    kb.assert(&fact, MemoryProfile::Episodic, false).unwrap();
    let record = kb.memory_record(&fact).unwrap().unwrap();
    assert_eq!(record.profile, MemoryProfile::Ephemeral);

    assert_eq!(kb.sweep_at(record.created_at + ChronoDuration::seconds(11)).unwrap(), 1);
    assert!(!kb.check(&fact).unwrap());
}

#[test]
fn retraction_forgets_the_record() {
    let kb = manual_kb();
    let fact = kb.parse("cup isOn table").unwrap();
    kb.assert(&fact, MemoryProfile::Ephemeral, false).unwrap();
    kb.retract(&fact).unwrap();
    assert_eq!(kb.tracked_facts().unwrap(), 0);

    // a later permanent assertion must not expire
    kb.assert(&fact, MemoryProfile::Permanent, false).unwrap();
    assert_eq!(kb.sweep_at(chrono::Utc::now() + ChronoDuration::days(1)).unwrap(), 0);
    assert!(kb.check(&fact).unwrap());
}

#[test]
fn profiles_recorded_in_the_store_are_resumed() {
    init_tracing();
    let stale = Triple::new("oro:cup", "oro:isOn", Term::resource("oro:table"));
    let kept = Triple::new("oro:kitchen", "rdf:type", Term::resource("oro:Room"));
    let record = FactRecord {
        fact: stale.clone(),
        created_at: chrono::Utc::now() - ChronoDuration::hours(1),
        profile: MemoryProfile::Ephemeral,
    };
    let mut store = InMemoryGraph::new();
    store.assert_triple(&stale).unwrap();
    store.assert_triple(&kept).unwrap();
    store.annotate(&record).unwrap();

    let kb = KnowledgeBase::manual(KnowledgeConfig::default(), Box::new(store)).unwrap();
    assert_eq!(kb.size().unwrap(), 2);
    assert_eq!(kb.tracked_facts().unwrap(), 1);
    assert_eq!(kb.memory_record(&stale).unwrap(), Some(record));
    assert!(kb.memory_record(&kept).unwrap().is_none());

    assert_eq!(kb.sweep_now().unwrap(), 1);
    assert!(!kb.check(&stale).unwrap());
    assert!(kb.check(&kept).unwrap());
}

#[test]
fn expiry_is_visible_to_watchers() {
    let kb = manual_kb();
    let sub = kb
        .subscribe(&WatchPattern::facts(["?x isOn table"], TriggerMode::OnBecomeFalse))
        .unwrap();
    kb.assert_strs(&["cup isOn table", "plate isOn table"], MemoryProfile::Ephemeral, false)
        .unwrap();
    assert_eq!(kb.sweep_at(chrono::Utc::now() + ChronoDuration::seconds(1)).unwrap(), 2);

    let events = sub.stream.drain();
    assert_eq!(events.len(), 1);
}

#[test]
fn background_sweeper_expires_facts() {
    init_tracing();
    let mut config = KnowledgeConfig::default();
    config.memory.sweep_period_ms = 10;
    config.memory.time_unit_ms = 5;
    let kb = KnowledgeBase::new(config).unwrap();
    let fact = kb.parse("person isIn hallway").unwrap();
    kb.assert(&fact, MemoryProfile::Ephemeral, false).unwrap();
    kb.assert_str("hallway type Room", MemoryProfile::Permanent, false).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while kb.check(&fact).unwrap() {
        assert!(Instant::now() < deadline, "sweeper did not expire the fact");
        thread::sleep(Duration::from_millis(10));
    }
    assert!(kb.check(&kb.parse("hallway type Room").unwrap()).unwrap());
    assert_eq!(kb.tracked_facts().unwrap(), 0);
}

#[test]
fn dropping_the_knowledge_base_stops_the_sweeper() {
    init_tracing();
    let mut config = KnowledgeConfig::default();
    config.memory.sweep_period_ms = 5;
    let kb = KnowledgeBase::new(config).unwrap();
    kb.assert_str("cup isOn table", MemoryProfile::Ephemeral, false).unwrap();
    let started = Instant::now();
    drop(kb);
    assert!(started.elapsed() < Duration::from_secs(2));
}
