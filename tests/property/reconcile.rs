//! Property-based tests for the task collection merge operations.
//!
//! Uses proptest to verify:
//! 1. Every `apply_*` operation is idempotent.
//! 2. Rows owned by another user never appear, whatever the operation mix.
//! 3. `replace_all` dedupes by id, keeping first position and last content.
//! 4. The reported change flag matches an actual snapshot change.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use taskboard::sync::collection::TaskCollection;
use taskboard_proto::task::{Scope, Status, Task, TaskId};

const OWNER: &str = "u1";

// --- Strategies ---

fn arb_status() -> impl Strategy<Value = Status> {
    prop_oneof![Just(Status::Todo), Just(Status::InProgress), Just(Status::Done)]
}

/// Small id space so operations collide often.
fn arb_id() -> impl Strategy<Value = String> {
    (0u8..6).prop_map(|n| format!("t{n}"))
}

fn arb_owner() -> impl Strategy<Value = String> {
    prop_oneof![3 => Just(OWNER.to_string()), 1 => Just("u2".to_string())]
}

fn arb_task() -> impl Strategy<Value = Task> {
    (arb_id(), "[a-z]{1,8}", arb_status(), arb_owner())
        .prop_map(|(id, title, status, owner)| Task::new(id, title, status, owner))
}

#[derive(Debug, Clone)]
enum Op {
    Replace(Vec<Task>),
    Insert(Task),
    Update(Task),
    Delete(String),
    Optimistic(String, Status),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(arb_task(), 0..8).prop_map(Op::Replace),
        arb_task().prop_map(Op::Insert),
        arb_task().prop_map(Op::Update),
        arb_id().prop_map(Op::Delete),
        (arb_id(), arb_status()).prop_map(|(id, s)| Op::Optimistic(id, s)),
    ]
}

fn collection() -> TaskCollection {
    TaskCollection::new(Scope::new(OWNER).unwrap())
}

fn apply(c: &mut TaskCollection, op: &Op) -> bool {
    match op {
        Op::Replace(rows) => c.replace_all(rows.clone()),
        Op::Insert(task) => c.apply_insert(task.clone()),
        Op::Update(task) => c.apply_update(task.clone()),
        Op::Delete(id) => c.apply_delete(&TaskId::new(id.as_str())),
        Op::Optimistic(id, status) => c.apply_optimistic_status(&TaskId::new(id.as_str()), *status),
    }
}

// --- Properties ---

proptest! {
    #[test]
    fn every_operation_is_idempotent(
        setup in prop::collection::vec(arb_op(), 0..10),
        op in arb_op(),
    ) {
        let mut c = collection();
        for step in &setup {
            apply(&mut c, step);
        }
        apply(&mut c, &op);
        let once = c.snapshot();
        let changed_again = apply(&mut c, &op);
        prop_assert!(!changed_again);
        prop_assert_eq!(c.snapshot(), once);
    }

    #[test]
    fn foreign_rows_never_appear(ops in prop::collection::vec(arb_op(), 0..20)) {
        let mut c = collection();
        for op in &ops {
            apply(&mut c, op);
            prop_assert!(c.snapshot().iter().all(|t| t.created_by == OWNER));
        }
    }

    #[test]
    fn change_flag_matches_snapshot(
        setup in prop::collection::vec(arb_op(), 0..10),
        op in arb_op(),
    ) {
        let mut c = collection();
        for step in &setup {
            apply(&mut c, step);
        }
        let before = c.snapshot();
        let changed = apply(&mut c, &op);
        prop_assert_eq!(changed, c.snapshot() != before);
    }

    #[test]
    fn replace_all_dedupes(rows in prop::collection::vec(arb_task(), 0..12)) {
        let mut c = collection();
        c.replace_all(rows.clone());
        let snapshot = c.snapshot();

        let owned: Vec<&Task> = rows.iter().filter(|t| t.created_by == OWNER).collect();
        let mut expected_order: Vec<&TaskId> = Vec::new();
        for task in &owned {
            if !expected_order.contains(&&task.id) {
                expected_order.push(&task.id);
            }
        }
        let got_order: Vec<&TaskId> = snapshot.iter().map(|t| &t.id).collect();
        prop_assert_eq!(got_order, expected_order);

        for task in &snapshot {
            let last = owned.iter().rev().find(|t| t.id == task.id).unwrap();
            prop_assert_eq!(task, *last);
        }
    }

    #[test]
    fn update_of_absent_id_inserts(task in arb_task()) {
        let mut c = collection();
        let changed = c.apply_update(task.clone());
        prop_assert_eq!(changed, task.created_by == OWNER);
        prop_assert_eq!(c.get(&task.id).is_some(), task.created_by == OWNER);
    }
}
