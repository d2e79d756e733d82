//! Integration tests for store mutations, derived state, subscriptions and
//! transactions working together.

use super::common::recorder::ChangeRecorder;
use proptest::prelude::*;
use serde_json::{json, Value};
use statehub::{record_from, Record, Resolved, SetOptions, Store, SubscribeOptions};

fn count_of(record: &Record, key: &str) -> i64 {
    record.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn small_record() -> impl Strategy<Value = Record> {
    prop::collection::btree_map("[a-e]", any::<i64>(), 0..5).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(key, value)| (key, json!(value)))
            .collect()
    })
}

proptest! {
    /// After any sequence of writes, each key holds the value from the last
    /// write that named it and keys never written stay absent.
    #[test]
    fn prop_set_state_is_a_shallow_merge(writes in prop::collection::vec(small_record(), 0..8)) {
        let store = Store::new();
        let mut expected = Record::new();

        for updates in &writes {
            let after = store.set_state("ns", updates.clone(), SetOptions::default());
            for (key, value) in updates {
                expected.insert(key.clone(), value.clone());
            }
            prop_assert_eq!(&after, &expected);
        }
        prop_assert_eq!(store.get_state("ns"), expected);
    }
}

/// Filter-derived scenario: a derived list follows both of its inputs
#[test]
fn test_filtered_list_derivation() {
    let store = Store::new();
    store
        .create_derived_state(
            "agents",
            "filteredAgents",
            ["agentList", "agentFilters"],
            |record: &Record| {
                let wanted = record
                    .get("agentFilters")
                    .and_then(|filters| filters.get("type"))
                    .cloned();
                let agents = record
                    .get("agentList")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Value::Array(
                    agents
                        .into_iter()
                        .filter(|agent| wanted.is_none() || agent.get("type") == wanted.as_ref())
                        .collect(),
                )
            },
        )
        .unwrap();

    store.set_state(
        "agents",
        record_from(json!({
            "agentList": [{"name": "A", "type": "x"}, {"name": "B", "type": "y"}],
            "agentFilters": {"type": "x"},
        })),
        SetOptions::default(),
    );

    assert_eq!(
        store.get("agents", "filteredAgents"),
        Some(Resolved::Derived(json!([{"name": "A", "type": "x"}])))
    );

    store.set_state(
        "agents",
        record_from(json!({"agentFilters": {"type": "y"}})),
        SetOptions::default(),
    );
    assert_eq!(
        store.get_derived("agents", "filteredAgents"),
        Some(json!([{"name": "B", "type": "y"}]))
    );
}

/// Derived values always match a fresh computation over the current record
#[test]
fn test_derived_tracks_every_write() {
    let store = Store::new();
    store
        .create_derived_state("calc", "sum", ["a", "b"], |r: &Record| {
            json!(count_of(r, "a") + count_of(r, "b"))
        })
        .unwrap();

    for (a, b) in [(1, 2), (10, -3), (0, 0)] {
        store.set_state("calc", record_from(json!({"a": a, "b": b})), SetOptions::default());
        assert_eq!(store.get_value("calc", "sum"), Some(json!(a + b)));
    }
}

/// Rejected declarations leave nothing registered
#[test]
fn test_chained_derivation_is_rejected() {
    let store = Store::new();
    store
        .create_derived_state("calc", "sum", ["a", "b"], |r: &Record| {
            json!(count_of(r, "a") + count_of(r, "b"))
        })
        .unwrap();

    let result = store.create_derived_state("calc", "double", ["sum"], |r: &Record| {
        json!(count_of(r, "sum") * 2)
    });

    assert!(result.is_err());
    assert_eq!(store.get("calc", "double"), None);
}

/// A transaction with several writes produces exactly one notification
#[test]
fn test_transaction_batches_notifications() {
    let store = Store::new();
    let (recorder, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::default());

    let tx = store.start_transaction();
    store.set_state("ns", record_from(json!({"a": 1})), SetOptions::default());
    store.set_state("ns", record_from(json!({"b": 2})), SetOptions::default());
    store.set_state("ns", record_from(json!({"a": 3})), SetOptions::default());
    assert!(recorder.is_empty());
    tx.commit();

    assert_eq!(recorder.len(), 1);
    let change = recorder.last().unwrap();
    assert_eq!(change.changes, record_from(json!({"a": 3, "b": 2})));
    assert_eq!(change.state, record_from(json!({"a": 3, "b": 2})));
}

/// Derived values are only refreshed at commit and reported with it
#[test]
fn test_transaction_defers_derived_refresh() {
    let store = Store::new();
    store
        .create_derived_state("calc", "sum", ["a", "b"], |r: &Record| {
            json!(count_of(r, "a") + count_of(r, "b"))
        })
        .unwrap();
    let (recorder, _) = ChangeRecorder::attach(&store, "calc", SubscribeOptions::default());

    store.transaction(|store| {
        store.set_state("calc", record_from(json!({"a": 2})), SetOptions::default());
        assert_eq!(store.get_value("calc", "sum"), Some(json!(0)));
        store.set_state("calc", record_from(json!({"b": 5})), SetOptions::default());
    });

    assert_eq!(store.get_value("calc", "sum"), Some(json!(7)));
    let change = recorder.last().unwrap();
    assert_eq!(change.derived, record_from(json!({"sum": 7})));
}

/// Nested transactions are absorbed by the outermost commit
#[test]
fn test_nested_transactions_flush_once() {
    let store = Store::new();
    let (recorder, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::default());

    let outer = store.start_transaction();
    store.transaction(|store| {
        store.set_state("ns", record_from(json!({"inner": true})), SetOptions::default());
    });
    assert!(recorder.is_empty());
    store.set_state("ns", record_from(json!({"outer": true})), SetOptions::default());
    outer.commit();

    assert!(!store.in_transaction());
    assert_eq!(recorder.len(), 1);
    assert_eq!(
        recorder.keys_per_change(),
        vec![vec!["inner".to_string(), "outer".to_string()]]
    );
}

/// A transaction touching two namespaces notifies each once
#[test]
fn test_transaction_spans_namespaces() {
    let store = Store::new();
    let (left, _) = ChangeRecorder::attach(&store, "left", SubscribeOptions::default());
    let (right, _) = ChangeRecorder::attach(&store, "right", SubscribeOptions::default());

    store.transaction(|store| {
        store.set_state("left", record_from(json!({"k": 1})), SetOptions::default());
        store.set_state("right", record_from(json!({"k": 2})), SetOptions::default());
        store.set_state("left", record_from(json!({"k": 3})), SetOptions::default());
    });

    assert_eq!(left.len(), 1);
    assert_eq!(right.len(), 1);
    assert_eq!(left.last().unwrap().changes["k"], json!(3));
}

/// A dropped transaction guard still delivers
#[test]
fn test_dropped_transaction_commits() {
    let store = Store::new();
    let (recorder, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::default());

    {
        let _tx = store.start_transaction();
        store.set_state("ns", record_from(json!({"a": 1})), SetOptions::default());
    }

    assert_eq!(recorder.len(), 1);
}

/// Key filters see only the keys they asked for, derived keys included
#[test]
fn test_subscription_key_filtering() {
    let store = Store::new();
    store
        .create_derived_state("ns", "total", ["x"], |r: &Record| json!(count_of(r, "x") * 10))
        .unwrap();
    let (on_x, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::keys(["x"]));
    let (on_total, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::keys(["total"]));
    let (on_y, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::keys(["y"]));

    store.set_state("ns", record_from(json!({"x": 1})), SetOptions::default());

    assert_eq!(on_x.len(), 1);
    assert_eq!(on_total.len(), 1);
    assert!(on_y.is_empty());
}

/// Unsubscribing twice is harmless and stops delivery
#[test]
fn test_unsubscribe_is_idempotent() {
    let store = Store::new();
    let (recorder, id) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::default());

    store.set_state("ns", record_from(json!({"a": 1})), SetOptions::default());
    assert!(store.unsubscribe(id));
    assert!(!store.unsubscribe(id));
    store.set_state("ns", record_from(json!({"a": 2})), SetOptions::default());

    assert_eq!(recorder.len(), 1);
}

/// Subscribers of other namespaces are never called
#[test]
fn test_namespace_isolation() {
    let store = Store::new();
    let (recorder, _) = ChangeRecorder::attach(&store, "other", SubscribeOptions::default());

    store.set_state("ns", record_from(json!({"a": 1})), SetOptions::default());
    store.reset_state("ns", Record::new());

    assert!(recorder.is_empty());
}

/// Writes issued from a callback are delivered after the current change
#[test]
fn test_reentrant_writes_are_ordered() {
    let store = Store::new();
    let writer = store.clone();
    store.subscribe(
        "ns",
        move |change| {
            let n = count_of(&change.state, "n");
            if n < 3 {
                writer.set_state("ns", record_from(json!({"n": n + 1})), SetOptions::default());
            }
        },
        SubscribeOptions::default(),
    );
    let (recorder, _) = ChangeRecorder::attach(&store, "ns", SubscribeOptions::default());

    store.set_state("ns", record_from(json!({"n": 0})), SetOptions::default());

    let seen: Vec<i64> = recorder
        .changes()
        .iter()
        .map(|change| count_of(&change.changes, "n"))
        .collect();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

/// Mutating a returned record leaves the store untouched
#[test]
fn test_reads_are_copies() {
    let store = Store::new();
    store.set_state("ns", record_from(json!({"list": [1, 2]})), SetOptions::default());

    let mut state = store.get_state("ns");
    state.insert("list".into(), json!([]));

    assert_eq!(store.get_value("ns", "list"), Some(json!([1, 2])));
}
