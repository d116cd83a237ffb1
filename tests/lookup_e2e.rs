mod common;

use std::collections::HashSet;

use orokb::{LookupEntry, MemoryProfile, ResourceType};

use common::manual_kb;

fn ids(entries: Option<HashSet<LookupEntry>>) -> HashSet<String> {
    entries.unwrap_or_default().into_iter().map(|e| e.id).collect()
}

#[test]
fn retracted_resource_is_never_returned() {
    let kb = manual_kb();
    kb.assert_strs(
        &["fruit1 type Fruit", "fruit1 rdfs:label \"banana\"", "fruit2 type Fruit"],
        MemoryProfile::Permanent,
        false,
    )
    .unwrap();
    assert_eq!(ids(kb.lookup("banana").unwrap()), HashSet::from(["fruit1".to_string()]));

    kb.retract_str("fruit1 rdfs:label \"banana\"").unwrap();
    kb.retract_str("fruit1 type Fruit").unwrap();

    assert!(kb.lookup("banana").unwrap().is_none());
    assert!(kb.lookup("BANANA").unwrap().is_none());
    assert!(kb.lookup("fruit1").unwrap().is_none());
    assert!(kb.lookup("fruit2").unwrap().is_some());
}

#[test]
fn lookup_is_case_insensitive_and_typed() {
    let kb = manual_kb();
    kb.assert_strs(
        &[
            "Fruit rdfs:label \"fruit\"",
            "Fruit type owl:Class",
            "apple type Fruit",
            "apple rdfs:label \"Granny Smith\"",
        ],
        MemoryProfile::Permanent,
        false,
    )
    .unwrap();

    assert_eq!(ids(kb.lookup("  granny SMITH ").unwrap()), HashSet::from(["apple".to_string()]));
    assert_eq!(
        kb.lookup_typed("fruit", ResourceType::Class).unwrap(),
        HashSet::from(["Fruit".to_string()])
    );
    assert!(kb.lookup_typed("fruit", ResourceType::Instance).unwrap().is_empty());
    assert_eq!(
        kb.lookup_typed("apple", ResourceType::Instance).unwrap(),
        HashSet::from(["apple".to_string()])
    );
}

#[test]
fn assertions_are_picked_up_on_the_first_miss() {
    let kb = manual_kb();
    kb.assert_str("cup type Object", MemoryProfile::Permanent, false).unwrap();
    assert!(kb.lookup("cup").unwrap().is_some());
    let after_first = kb.lookup_rebuild_count();

    kb.assert_str("plate type Object", MemoryProfile::Permanent, false).unwrap();
    // a hit on a stale index does not rebuild
    assert!(kb.lookup("cup").unwrap().is_some());
    assert_eq!(kb.lookup_rebuild_count(), after_first);

    // a miss does
    assert!(kb.lookup("plate").unwrap().is_some());
    assert_eq!(kb.lookup_rebuild_count(), after_first + 1);

    // a clean miss does not
    assert!(kb.lookup("spoon").unwrap().is_none());
    assert_eq!(kb.lookup_rebuild_count(), after_first + 1);
}

#[test]
fn noop_retraction_still_invalidates() {
    let kb = manual_kb();
    kb.assert_str("cup type Object", MemoryProfile::Permanent, false).unwrap();
    kb.lookup("cup").unwrap();
    let before = kb.lookup_rebuild_count();

    kb.retract_str("spoon type Object").unwrap();
    kb.lookup("cup").unwrap();
    assert_eq!(kb.lookup_rebuild_count(), before + 1);
}

#[test]
fn expired_resource_disappears_from_lookup() {
    let kb = manual_kb();
    kb.assert_str("visitor1 rdfs:label \"the courier\"", MemoryProfile::Ephemeral, false)
        .unwrap();
    assert!(kb.lookup("the courier").unwrap().is_some());

    kb.sweep_at(chrono::Utc::now() + chrono::Duration::seconds(1)).unwrap();
    assert!(kb.lookup("the courier").unwrap().is_none());
}

#[test]
fn inconsistent_model_yields_empty_index() {
    let kb = manual_kb();
    kb.assert_strs(
        &["Animal owl:disjointWith Plant", "rex type Animal", "rex type Plant"],
        MemoryProfile::Permanent,
        false,
    )
    .unwrap();
    assert!(kb.lookup("rex").unwrap().is_none());

    kb.retract_str("rex type Plant").unwrap();
    assert!(kb.lookup("rex").unwrap().is_some());
}
