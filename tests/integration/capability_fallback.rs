//! Integration tests for optional-column degradation.
//!
//! A store whose schema lacks `sprint_id` rejects full-column calls with an
//! unknown-column failure; the engine must fall back to the reduced column
//! set once and stay there.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use taskboard::gateway::memory::{MemoryStore, StoreOp};
use taskboard::sync::SyncError;
use taskboard::sync::engine::{EngineConfig, SyncEngine};
use taskboard_proto::column::ColumnSet;
use taskboard_proto::failure::Failure;
use taskboard_proto::task::{NewTask, Scope, Status, Task, TaskId, TaskPatch};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

async fn mount(store: &Arc<MemoryStore>) -> SyncEngine<MemoryStore> {
    SyncEngine::mount(
        Arc::clone(store),
        Scope::new("u1").unwrap(),
        EngineConfig::default(),
    )
    .await
    .expect("mount failed")
}

fn legacy_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::legacy());
    store.seed(Task::new("t1", "Legacy row", Status::Todo, "u1"));
    store
}

// ---------------------------------------------------------------------------
// Pulls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_schema_never_degrades() {
    let store = Arc::new(MemoryStore::new());
    let engine = mount(&store).await;
    engine.refresh().await.unwrap();

    assert_eq!(engine.columns(), ColumnSet::Full);
    assert_eq!(store.pull_columns(), vec![ColumnSet::Full, ColumnSet::Full]);
}

#[tokio::test]
async fn first_pull_degrades_and_retries_once() {
    let store = legacy_store();
    let engine = mount(&store).await;

    assert_eq!(engine.columns(), ColumnSet::Reduced);
    assert_eq!(engine.snapshot().len(), 1);
    assert_eq!(
        store.pull_columns(),
        vec![ColumnSet::Full, ColumnSet::Reduced]
    );
}

#[tokio::test]
async fn later_pulls_use_reduced_set_only() {
    let store = legacy_store();
    let engine = mount(&store).await;
    engine.refresh().await.unwrap();
    engine.refresh().await.unwrap();

    assert_eq!(
        store.pull_columns(),
        vec![
            ColumnSet::Full,
            ColumnSet::Reduced,
            ColumnSet::Reduced,
            ColumnSet::Reduced,
        ]
    );
    assert_eq!(store.calls(StoreOp::Pull), 4);
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next(StoreOp::Pull, Failure::Unauthorized);
    let engine = mount(&store).await;

    assert_eq!(store.calls(StoreOp::Pull), 1);
    assert_eq!(engine.columns(), ColumnSet::Full);
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn failed_reduced_retry_is_surfaced_and_stays_degraded() {
    let store = Arc::new(MemoryStore::new());
    let engine = mount(&store).await;

    store.fail_next(
        StoreOp::Pull,
        Failure::UnknownColumn {
            column: "sprint_id".to_string(),
        },
    );
    store.fail_next(StoreOp::Pull, Failure::transport("down"));
    assert_eq!(
        engine.refresh().await,
        Err(SyncError::Remote(Failure::transport("down")))
    );
    assert_eq!(engine.columns(), ColumnSet::Reduced);
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_with_sprint_on_legacy_store_omits_it() {
    let store = Arc::new(MemoryStore::legacy());
    let engine = mount(&store).await;
    let creates = store.calls(StoreOp::Create);

    let id = engine
        .create(NewTask::new("Planned").with_sprint("s-42"))
        .await
        .unwrap();

    assert_eq!(store.calls(StoreOp::Create), creates + 1);
    let created = engine.task(&id).unwrap();
    assert_eq!(created.title, "Planned");
    assert!(created.sprint_id.is_none());
}

#[tokio::test]
async fn first_mutation_can_trigger_degradation() {
    let store = Arc::new(MemoryStore::legacy());
    // The initial pull fails for another reason, so the prober has not yet
    // learned anything about the schema.
    store.fail_next(StoreOp::Pull, Failure::transport("down"));
    let engine = mount(&store).await;
    assert_eq!(engine.columns(), ColumnSet::Full);

    let id = engine
        .create(NewTask::new("Planned").with_sprint("s-1"))
        .await
        .unwrap();

    assert_eq!(store.calls(StoreOp::Create), 2);
    assert_eq!(engine.columns(), ColumnSet::Reduced);
    assert!(engine.task(&id).is_some());
}

#[tokio::test]
async fn update_with_sprint_on_legacy_store_writes_other_fields() {
    let store = legacy_store();
    let engine = mount(&store).await;
    let id = TaskId::new("t1");

    let patch = TaskPatch {
        title: Some("Renamed".to_string()),
        sprint_id: Some("s-9".to_string()),
        ..TaskPatch::default()
    };
    assert!(engine.update(&id, patch).await.unwrap());

    let updated = engine.task(&id).unwrap();
    assert_eq!(updated.title, "Renamed");
    assert!(updated.sprint_id.is_none());
    assert_eq!(store.calls(StoreOp::Update), 1);
}

#[tokio::test]
async fn full_schema_keeps_sprint() {
    let store = Arc::new(MemoryStore::new());
    let engine = mount(&store).await;

    let id = engine
        .create(NewTask::new("Planned").with_sprint("s-42"))
        .await
        .unwrap();

    assert_eq!(engine.task(&id).unwrap().sprint_id.as_deref(), Some("s-42"));
}

#[tokio::test]
async fn instances_degrade_independently() {
    let legacy = legacy_store();
    let modern = Arc::new(MemoryStore::new());
    let degraded = mount(&legacy).await;
    let healthy = mount(&modern).await;

    assert_eq!(degraded.columns(), ColumnSet::Reduced);
    assert_eq!(healthy.columns(), ColumnSet::Full);
}
