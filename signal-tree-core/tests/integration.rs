//! Integration Tests for Signal Trees
//!
//! These tests drive the public API the way an application would: typed
//! signals, transactions, validators and reactive consumers together.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::json;

use signal_tree_core::tree::Aspect;
use signal_tree_core::{
    run_in_transaction, run_without_transaction, CommandValidator, Computed, Effect, Id,
    ListPosition, ListSignal, MapSignal, NodeSignal, NumberSignal, Readable, Signal, SignalCommand,
    SignalTree, StructuralNode, UsageTracker, ValueSignal, Writable,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

/// Inserting at both ends of a list keeps the expected order.
#[test]
fn list_inserts_keep_order() {
    let list = ListSignal::new();
    list.insert_last("a".to_string());
    list.insert_last("b".to_string());

    let values: Vec<String> = list.value().iter().map(Readable::value).collect();
    assert_eq!(values, ["a", "b"]);

    list.insert_first("c".to_string());
    let values: Vec<String> = list.value().iter().map(Readable::value).collect();
    assert_eq!(values, ["c", "a", "b"]);
}

/// Putting the same key twice reports the overwritten value.
#[test]
fn map_put_reports_previous_value() {
    let map = MapSignal::new();

    assert_eq!(map.put("k", "v1".to_string()).result(), Some(Ok(None)));
    assert_eq!(map.put("k", "v2".to_string()).result(), Some(Ok(Some("v1".to_string()))));
    assert_eq!(map.value()["k"].value(), "v2");
}

/// An increment staged in a transaction adds to the committed value.
#[test]
fn increments_inside_and_outside_transactions_add_up() {
    let number = NumberSignal::new(0.0);
    assert!(number.increment_by(2.0).is_success());

    let transaction = run_in_transaction(|| {
        number.increment_by(1.0);
    });

    assert!(transaction.is_success());
    assert_eq!(number.peek_confirmed(), 3.0);
}

/// Moving a node under one of its own descendants fails and changes nothing.
#[test]
fn adopting_an_ancestor_is_rejected() {
    init_tracing();
    let root = NodeSignal::new();
    let b = root.insert_child_with_value(&"b", ListPosition::last()).into_signal();
    let middle = b.insert_child_with_value(&"middle", ListPosition::last()).into_signal();
    let a = middle.insert_child_with_value(&"a", ListPosition::last()).into_signal();
    let before = root.tree().snapshot();

    let operation = a.adopt_at(&b, ListPosition::last());
    assert!(operation.error().unwrap().is_precondition_failure());
    assert!(!a.adopt_as(&b, "loop").is_success());
    assert!(!b.adopt_at(&b, ListPosition::last()).is_success());

    assert_eq!(root.tree().snapshot(), before);
    assert_eq!(root.tree().read(a.id()).unwrap().parent, Some(middle.id()));
    assert_eq!(root.tree().read(b.id()).unwrap().parent, Some(Id::ZERO));
}

/// A read-only signal and everything derived from it refuse changes.
#[test]
fn readonly_signal_and_children_reject_changes() {
    let node = NodeSignal::new();
    node.put_child_with_value("name", &"Ada");
    node.insert_child_with_value(&1, ListPosition::last());
    let readonly = node.as_readonly();

    assert!(readonly.clear().error().unwrap().is_validation_rejected());
    assert!(!readonly.put_child_with_value("name", &"Grace").is_success());

    let content = readonly.value();
    let name = content.map_children["name"].as_value::<String>();
    assert!(name.set("Grace".to_string()).error().unwrap().is_validation_rejected());
    assert!(!content.list_children[0].as_number().increment_by(1.0).is_success());
    assert!(!name.as_node().remove_child_by_key("x").is_success());

    // The original stays writable and sees no change from the attempts.
    assert_eq!(name.value(), "Ada");
    assert!(node.put_child_with_value("name", &"Grace").is_success());
    assert_eq!(name.value(), "Grace");
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

#[test]
fn failing_transaction_changes_no_node() {
    let tree = SignalTree::new();
    let insert = SignalCommand::insert(Id::ZERO, ListPosition::last(), Some(json!(1)));
    tree.apply(&insert);
    let child = insert.command_id();
    let before = tree.snapshot();
    let generation = tree.generation();

    let result = tree.apply(&SignalCommand::transaction(vec![
        SignalCommand::set(child, Some(json!(2))),
        SignalCommand::put(Id::ZERO, "k", Some(json!(3))),
        SignalCommand::insert(Id::ZERO, ListPosition::after(Id::random()), None),
    ]));

    assert!(!result.is_accepted());
    assert_eq!(tree.snapshot(), before);
    assert_eq!(tree.generation(), generation);
}

#[test]
fn generations_grow_with_every_change_only() {
    let signal = ValueSignal::new(1_i32);
    let tree = signal.tree().clone();
    let generation = || tree.node_generation(signal.id(), Aspect::Node).unwrap();

    let start = generation();
    signal.set(2);
    let after_set = generation();
    assert!(after_set > start);

    signal.verify_value(2);
    signal.verify_value(3);
    signal.replace(7, 8);
    assert_eq!(generation(), after_set);

    signal.set(3);
    assert!(generation() > after_set);
}

#[test]
fn written_values_read_back_exactly() {
    let node = NodeSignal::new();
    let value = json!({ "nested": [1, 2.5, "three", null, { "deep": true }] });

    let child = node.insert_child_with_value(&value, ListPosition::last()).into_signal();
    assert_eq!(child.value().value, Some(value.clone()));

    node.put_child_with_value("key", &value);
    let keyed = node.value().map_children["key"].clone();
    assert_eq!(keyed.value().value, Some(value));

    assert!(node.remove_child(&child).is_success());
    assert!(node.tree().read(child.id()).is_none());
    assert!(child.value().value.is_none());
}

#[test]
fn conditions_never_mutate() {
    let list = ListSignal::new();
    let a = list.insert_last(1_i32).into_signal();
    let b = list.insert_last(2_i32).into_signal();
    let before = list.tree().snapshot();
    let generation = list.tree().generation();

    for _ in 0..3 {
        a.verify_value(1);
        a.verify_value(5);
        list.verify_position(&b, ListPosition::after(a.id()));
        list.verify_position(&a, ListPosition::after(b.id()));
        list.verify_child(&b);
    }

    assert_eq!(list.tree().snapshot(), before);
    assert_eq!(list.tree().generation(), generation);
}

#[test]
fn usage_follows_only_what_was_read() {
    let tracked = ValueSignal::new(0_i32);
    let unrelated = ValueSignal::new(0_i32);

    let (_, usage) = UsageTracker::track(|| tracked.value());
    unrelated.set(1);
    assert!(!usage.has_changes());

    tracked.set(1);
    assert!(usage.has_changes());
}

// ----------------------------------------------------------------------------
// Transactions
// ----------------------------------------------------------------------------

#[test]
fn transaction_spanning_trees_is_atomic() {
    let first = ValueSignal::new(1_i32);
    let second = ValueSignal::new(1_i32);

    let transaction = run_in_transaction(|| {
        first.set(10);
        second.replace(5, 10);
    });

    assert!(transaction.error().unwrap().is_precondition_failure());
    assert_eq!(first.value(), 1);
    assert_eq!(second.value(), 1);

    let transaction = run_in_transaction(|| {
        first.set(10);
        second.replace(1, 10);
    });
    assert!(transaction.is_success());
    assert_eq!((first.value(), second.value()), (10, 10));
}

#[test]
fn transaction_fails_when_read_value_changed_concurrently() {
    let source = ValueSignal::new(1_i32);
    let target = ValueSignal::new(0_i32);

    let transaction = run_in_transaction(|| {
        let value = source.value();
        run_without_transaction(|| source.set(100));
        target.set(value * 2);
    });

    assert!(transaction.error().unwrap().is_precondition_failure());
    assert_eq!(target.value(), 0);
}

#[test]
fn operations_inside_transaction_resolve_at_commit() {
    let signal = ValueSignal::new(1_i32);

    let transaction = run_in_transaction(|| {
        let operation = signal.set(2);
        assert!(!operation.is_done());
        operation
    });

    assert!(transaction.is_success());
    assert_eq!(transaction.return_value().result(), Some(Ok(1)));
}

#[test]
fn validator_rejection_fails_whole_transaction() {
    let signal = ValueSignal::new(1_i32);
    let other = ValueSignal::new(1_i32);
    let readonly = signal.as_readonly();

    let transaction = run_in_transaction(|| {
        other.set(2);
        readonly.set(2);
    });

    assert!(transaction.error().unwrap().is_validation_rejected());
    assert_eq!(other.value(), 1);
    assert_eq!(signal.value(), 1);
}

#[test]
fn update_inside_transaction_resolves_with_outer_commit() {
    let counter = ValueSignal::new(1_i32);

    let transaction = run_in_transaction(|| counter.update(|value| value * 10));
    let update = transaction.return_value();

    assert!(transaction.is_success());
    assert_eq!(update.result(), Some(Ok(1)));
    assert_eq!(counter.value(), 10);
}

#[test]
fn conditions_bypass_validators() {
    let signal = ValueSignal::new(1_i32);
    let readonly = signal.as_readonly();

    assert!(readonly.verify_value(1).is_success());
    let list = ListSignal::<i32>::new().as_readonly();
    assert!(list.verify_child(&list.as_value()).error().unwrap().is_precondition_failure());
}

#[test]
fn processed_subscribers_see_every_command() {
    let signal = ValueSignal::new(0_i32);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    let _subscription = signal.tree().subscribe_processed(move |command, result| {
        seen_clone.lock().push((command.kind(), result.is_accepted()));
    });

    signal.set(1);
    signal.replace(5, 6);
    run_in_transaction(|| {
        signal.set(2);
        signal.set(3);
    });

    assert_eq!(
        *seen.lock(),
        vec![("set", true), ("transaction", false), ("transaction", true)]
    );
}

#[test]
fn commands_survive_wire_round_trip() {
    let command = SignalCommand::transaction(vec![
        SignalCommand::insert(Id::ZERO, ListPosition::last(), Some(json!({ "a": 1 }))),
        SignalCommand::value_condition(Id::ZERO, None),
    ]);

    let json = command.to_json().unwrap();
    assert_eq!(SignalCommand::from_json(&json).unwrap(), command);

    let bytes = command.to_msgpack().unwrap();
    let decoded = SignalCommand::from_msgpack(&bytes).unwrap();

    // A decoded command applies just like the original.
    let tree = SignalTree::new();
    assert!(tree.apply(&decoded).is_accepted());
    assert_eq!(tree.read(Id::ZERO).unwrap().list_children.len(), 1);
}

// ----------------------------------------------------------------------------
// Reactive consumers
// ----------------------------------------------------------------------------

#[test]
fn effect_sees_transaction_as_one_change() {
    let node = NodeSignal::new();
    node.put_child_with_value("first", &"Ada");
    node.put_child_with_value("last", &"Lovelace");
    let children = node.value().map_children;
    let first = children["first"].as_value::<String>();
    let last = children["last"].as_value::<String>();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let (first_clone, last_clone) = (first.clone(), last.clone());
    let effect = Effect::new(move || {
        seen_clone
            .lock()
            .push(format!("{} {}", first_clone.value(), last_clone.value()));
    });

    run_in_transaction(|| {
        first.set("Grace".to_string());
        last.set("Hopper".to_string());
    });

    assert_eq!(*seen.lock(), vec!["Ada Lovelace", "Grace Hopper"]);
    assert_eq!(effect.run_count(), 2);
}

#[test]
fn effect_reading_several_trees_runs_after_multi_tree_commit() {
    let first = ValueSignal::new(1_i32);
    let second = ValueSignal::new(2_i32);

    let sums = Arc::new(Mutex::new(Vec::new()));
    let sums_clone = sums.clone();
    let (first_clone, second_clone) = (first.clone(), second.clone());
    let effect = Effect::new(move || {
        sums_clone.lock().push(first_clone.value() + second_clone.value());
    });

    let transaction = run_in_transaction(|| {
        first.set(10);
        second.set(20);
    });

    assert!(transaction.is_success());
    assert_eq!(*sums.lock(), vec![3, 30]);
    assert_eq!(effect.run_count(), 2);
}

#[test]
fn computed_over_list_recomputes_on_change() {
    let list = ListSignal::new();
    list.insert_last(1_i32);
    let two = list.insert_last(2_i32).into_signal();

    let list_clone = list.clone();
    let sum = Computed::new(move || list_clone.value().iter().map(Readable::value).sum::<i32>());
    assert_eq!(sum.get(), 3);
    assert_eq!(sum.get(), 3);
    assert_eq!(sum.computations(), 1);

    two.set(5);
    assert_eq!(sum.get(), 6);

    list.insert_last(10);
    assert_eq!(sum.get(), 16);
    assert_eq!(sum.computations(), 3);
}

#[test]
fn effect_on_computed_follows_underlying_signals() {
    let base = ValueSignal::new(2_i32);
    let base_clone = base.clone();
    let squared = Computed::new(move || base_clone.value() * base_clone.value());

    let seen = Arc::new(AtomicI32::new(0));
    let seen_clone = seen.clone();
    let squared_clone = squared.clone();
    let _effect = Effect::new(move || seen_clone.store(squared_clone.get(), Ordering::SeqCst));
    assert_eq!(seen.load(Ordering::SeqCst), 4);

    base.set(3);
    assert_eq!(seen.load(Ordering::SeqCst), 9);
}

// ----------------------------------------------------------------------------
// Threads
// ----------------------------------------------------------------------------

#[test]
fn concurrent_updates_are_not_lost() {
    let counter = ValueSignal::new(0_i32);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    assert!(counter.update(|value| value + 1).is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.value(), 200);
}

#[test]
fn concurrent_increments_never_conflict() {
    let number = NumberSignal::new(0.0);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let number = number.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    assert!(number.increment_by(1.0).is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(number.value(), 400.0);
}

#[test]
fn transactions_are_per_thread() {
    let signal = ValueSignal::new(0_i32);

    run_in_transaction(|| {
        signal.set(1);
        let other = signal.clone();
        thread::spawn(move || {
            assert!(!signal_tree_core::in_transaction());
            assert_eq!(other.peek(), 0);
            assert!(other.set(2).is_success());
        })
        .join()
        .unwrap();
    });

    assert_eq!(signal.value(), 1);
}

#[test]
fn custom_validator_limits_commands() {
    let list = ListSignal::new();
    let only_inserts = list.with_validator(CommandValidator::new(|command| {
        matches!(command, SignalCommand::Insert { .. })
    }));

    let item = only_inserts.insert_last(1_i32).into_signal();
    assert_eq!(list.value().len(), 1);
    assert!(only_inserts.remove(&item).error().unwrap().is_validation_rejected());
    assert!(only_inserts.clear().error().unwrap().is_validation_rejected());
    assert!(list.remove(&item).is_success());
}
