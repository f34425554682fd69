//! Integration tests for the sync engine over the in-process store.
//!
//! Covers pull sequencing, change feed dispatch, the scope filter, the
//! mutation operations, and teardown.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::redundant_clone
)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskboard::gateway::RemoteStore;
use taskboard::gateway::memory::{MemoryStore, StoreOp};
use taskboard::sync::SyncError;
use taskboard::sync::collection::SyncState;
use taskboard::sync::engine::{EngineConfig, SyncEngine};
use taskboard_proto::column::ColumnSet;
use taskboard_proto::failure::Failure;
use taskboard_proto::row::{ChangeEvent, encode_row};
use taskboard_proto::task::{NewTask, Scope, Status, Task, TaskId, TaskPatch};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn scope(owner: &str) -> Scope {
    Scope::new(owner).unwrap()
}

fn task(id: &str, status: Status, owner: &str) -> Task {
    Task::new(id, format!("Task {id}"), status, owner)
}

fn row(id: &str, status: Status, owner: &str) -> serde_json::Value {
    encode_row(&task(id, status, owner), ColumnSet::Full)
}

/// Creates a store holding the given rows, none of which are published.
fn store_with(rows: &[(&str, Status, &str)]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (id, status, owner) in rows {
        store.seed(task(id, *status, owner));
    }
    store
}

async fn mount(store: &Arc<MemoryStore>, owner: &str) -> SyncEngine<MemoryStore> {
    SyncEngine::mount(Arc::clone(store), scope(owner), EngineConfig::default())
        .await
        .expect("mount failed")
}

/// Waits until `pred` holds, re-checking on every snapshot revision.
async fn wait_until(
    engine: &SyncEngine<MemoryStore>,
    mut pred: impl FnMut(&SyncEngine<MemoryStore>) -> bool,
) {
    let mut revisions = engine.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pred(engine) {
            revisions.changed().await.expect("engine dropped");
        }
    })
    .await
    .expect("condition not reached in time");
}

fn ids(engine: &SyncEngine<MemoryStore>) -> Vec<String> {
    engine
        .snapshot()
        .into_iter()
        .map(|t| t.id.as_str().to_string())
        .collect()
}

fn status_of(engine: &SyncEngine<MemoryStore>, id: &str) -> Option<Status> {
    engine.task(&TaskId::new(id)).map(|t| t.status)
}

// ---------------------------------------------------------------------------
// Pull then push
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_update_after_pull() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    assert_eq!(ids(&engine), vec!["t1"]);
    assert_eq!(engine.sync_state(&TaskId::new("t1")), SyncState::Reconciled);

    store.broadcast_raw(&ChangeEvent::update(row("t1", Status::Done, "u1"), None));
    wait_until(&engine, |e| status_of(e, "t1") == Some(Status::Done)).await;

    assert_eq!(engine.snapshot().len(), 1);
}

#[tokio::test]
async fn push_delete_for_unseen_id_is_noop() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;

    store.broadcast_raw(&ChangeEvent::delete(json!({ "id": "t2", "created_by": "u1" })));
    // A marker event that follows the delete in delivery order.
    store.broadcast_raw(&ChangeEvent::insert(row("t3", Status::Todo, "u1")));
    wait_until(&engine, |e| e.task(&TaskId::new("t3")).is_some()).await;

    assert_eq!(ids(&engine), vec!["t1", "t3"]);
    assert_eq!(engine.sync_state(&TaskId::new("t2")), SyncState::Unknown);
}

#[tokio::test]
async fn push_update_for_absent_id_inserts() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;

    store.broadcast_raw(&ChangeEvent::update(row("t9", Status::InProgress, "u1"), None));
    wait_until(&engine, |e| status_of(e, "t9") == Some(Status::InProgress)).await;
}

#[tokio::test]
async fn malformed_notification_is_skipped() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;

    store.broadcast_raw(&ChangeEvent::insert(json!({ "id": "bad", "created_by": "u1" })));
    store.broadcast_raw(&ChangeEvent::insert(json!("not an object")));
    store.broadcast_raw(&ChangeEvent::insert(row("good", Status::Todo, "u1")));
    wait_until(&engine, |e| e.task(&TaskId::new("good")).is_some()).await;

    assert_eq!(ids(&engine), vec!["good"]);
}

// ---------------------------------------------------------------------------
// Scope filter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_rows_never_appear_even_via_unfiltered_feed() {
    let store = store_with(&[("mine", Status::Todo, "u1"), ("theirs", Status::Todo, "u2")]);
    store.set_unfiltered_feed(true);
    let engine = mount(&store, "u1").await;
    assert_eq!(ids(&engine), vec!["mine"]);

    store
        .create_task(&scope("u2"), &NewTask::new("foreign"), ColumnSet::Full)
        .await
        .unwrap();
    store.broadcast_raw(&ChangeEvent::update(row("theirs", Status::Done, "u2"), None));
    store.broadcast_raw(&ChangeEvent::insert(row("marker", Status::Todo, "u1")));
    wait_until(&engine, |e| e.task(&TaskId::new("marker")).is_some()).await;

    assert_eq!(ids(&engine), vec!["mine", "marker"]);
}

#[tokio::test]
async fn engines_for_different_owners_are_isolated() {
    let store = store_with(&[]);
    let alice = mount(&store, "alice").await;
    let bob = mount(&store, "bob").await;

    alice.create(NewTask::new("alice task")).await.unwrap();
    bob.create(NewTask::new("bob task")).await.unwrap();

    assert_eq!(alice.snapshot().len(), 1);
    assert_eq!(alice.snapshot()[0].title, "alice task");
    assert_eq!(bob.snapshot().len(), 1);
    assert_eq!(bob.snapshot()[0].title, "bob task");
}

// ---------------------------------------------------------------------------
// Pull sequencing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn only_latest_initiated_pull_commits_when_it_arrives_first() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;

    store.seed(task("t2", Status::Todo, "u1"));
    store.delay_next(StoreOp::Pull, Duration::from_millis(100));
    let first = engine.refresh();
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.seed(task("t3", Status::Todo, "u1"));
        engine.refresh().await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(second, Ok(true));
    assert_eq!(first, Ok(false));
    assert_eq!(ids(&engine), vec!["t3", "t2", "t1"]);
}

#[tokio::test(start_paused = true)]
async fn stale_pull_arriving_first_is_discarded() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;

    // The first pull sees t2; the second starts after t2 is gone.
    store.seed(task("t2", Status::Todo, "u1"));
    store.delay_next(StoreOp::Pull, Duration::from_millis(50));
    store.delay_next(StoreOp::Pull, Duration::from_millis(100));

    let first = engine.refresh();
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store
            .delete_task(&scope("u1"), &TaskId::new("t2"))
            .await
            .unwrap();
        engine.refresh().await
    };
    let check = async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        (ids(&engine), engine.is_loading())
    };
    let (first, second, (mid_ids, mid_loading)) = tokio::join!(first, second, check);

    assert_eq!(first, Ok(false));
    assert_eq!(second, Ok(true));
    assert_eq!(mid_ids, vec!["t1"]);
    assert!(mid_loading);
    assert_eq!(ids(&engine), vec!["t1"]);
    assert!(!engine.is_loading());
}

#[tokio::test(start_paused = true)]
async fn pull_arriving_after_push_update_overwrites_it() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;

    store.delay_next(StoreOp::Pull, Duration::from_millis(100));
    let pull = engine.refresh();
    let push = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.broadcast_raw(&ChangeEvent::update(row("t1", Status::Done, "u1"), None));
        wait_until(&engine, |e| status_of(e, "t1") == Some(Status::Done)).await;
    };
    let (pulled, ()) = tokio::join!(pull, push);

    assert_eq!(pulled, Ok(true));
    assert_eq!(status_of(&engine, "t1"), Some(Status::Todo));
}

#[tokio::test]
async fn failed_pull_keeps_previous_collection() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;

    store.fail_next(StoreOp::Pull, Failure::transport("request timed out"));
    let err = engine.refresh().await.unwrap_err();
    assert_eq!(err, SyncError::Remote(Failure::transport("request timed out")));
    assert_eq!(ids(&engine), vec!["t1"]);
    assert!(!engine.is_loading());
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_validates_then_pulls() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;
    let pulls = store.calls(StoreOp::Pull);

    let id = engine
        .create(NewTask::new("  Write docs  ").with_tags(["Docs", " docs ", "urgent"]))
        .await
        .unwrap();

    assert_eq!(store.calls(StoreOp::Pull), pulls + 1);
    let created = engine.task(&id).unwrap();
    assert_eq!(created.title, "Write docs");
    assert_eq!(created.tags, vec!["docs", "urgent"]);
    assert_eq!(created.status, Status::Todo);
    assert_eq!(engine.sync_state(&id), SyncState::Reconciled);
}

#[tokio::test]
async fn create_rejects_bad_titles_without_remote_call() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;

    assert!(matches!(
        engine.create(NewTask::new("")).await,
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        engine.create(NewTask::new("x".repeat(257))).await,
        Err(SyncError::Validation(_))
    ));
    assert_eq!(store.calls(StoreOp::Create), 0);
}

#[tokio::test]
async fn custom_title_limit_applies() {
    let store = store_with(&[]);
    let engine = SyncEngine::mount(
        Arc::clone(&store),
        scope("u1"),
        EngineConfig { max_title_len: 5 },
    )
    .await
    .unwrap();
    assert!(engine.create(NewTask::new("short")).await.is_ok());
    assert!(engine.create(NewTask::new("longer")).await.is_err());
}

#[tokio::test]
async fn create_failure_leaves_collection_unchanged() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;

    store.fail_next(StoreOp::Create, Failure::Unauthorized);
    assert_eq!(
        engine.create(NewTask::new("nope")).await,
        Err(SyncError::Remote(Failure::Unauthorized))
    );
    assert_eq!(ids(&engine), vec!["t1"]);
}

#[tokio::test]
async fn follow_up_pull_failure_does_not_fail_mutation() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;

    store.fail_next(StoreOp::Pull, Failure::transport("down"));
    let id = engine.create(NewTask::new("survives")).await.unwrap();

    // The insert notification still brings the task in.
    wait_until(&engine, |e| e.task(&id).is_some()).await;
}

#[tokio::test]
async fn update_writes_present_fields() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    let id = TaskId::new("t1");

    let patch = TaskPatch {
        title: Some("Renamed".to_string()),
        tags: Some(vec!["A".to_string(), "a".to_string()]),
        ..TaskPatch::default()
    };
    assert!(engine.update(&id, patch).await.unwrap());

    let updated = engine.task(&id).unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.tags, vec!["a"]);
    assert_eq!(updated.status, Status::Todo);
}

#[tokio::test]
async fn update_of_missing_or_foreign_row_is_not_applied() {
    let store = store_with(&[("theirs", Status::Todo, "u2")]);
    let engine = mount(&store, "u1").await;
    let patch = TaskPatch {
        title: Some("mine now".to_string()),
        ..TaskPatch::default()
    };
    assert!(!engine.update(&TaskId::new("theirs"), patch.clone()).await.unwrap());
    assert!(!engine.update(&TaskId::new("nope"), patch).await.unwrap());
}

#[tokio::test]
async fn empty_update_is_local_noop() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    let pulls = store.calls(StoreOp::Pull);

    assert!(
        !engine
            .update(&TaskId::new("t1"), TaskPatch::default())
            .await
            .unwrap()
    );
    assert_eq!(store.calls(StoreOp::Update), 0);
    assert_eq!(store.calls(StoreOp::Pull), pulls);
}

#[tokio::test]
async fn move_settles_on_authoritative_status() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    let id = TaskId::new("t1");

    assert!(engine.move_task(&id, Status::Done).await.unwrap());

    assert_eq!(status_of(&engine, "t1"), Some(Status::Done));
    assert_eq!(engine.sync_state(&id), SyncState::Reconciled);
    assert!(engine.task(&id).unwrap().completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn move_is_visible_before_remote_resolves_and_not_rolled_back() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    let id = TaskId::new("t1");
    let pulls = store.calls(StoreOp::Pull);

    store.delay_next(StoreOp::Move, Duration::from_millis(100));
    store.fail_next(StoreOp::Move, Failure::transport("request timed out"));

    let pending = engine.move_task(&id, Status::Done);
    tokio::pin!(pending);
    assert!(
        tokio::time::timeout(Duration::from_millis(10), &mut pending)
            .await
            .is_err()
    );
    assert_eq!(status_of(&engine, "t1"), Some(Status::Done));
    assert_eq!(engine.sync_state(&id), SyncState::OptimisticPending);

    assert_eq!(
        pending.await,
        Err(SyncError::Remote(Failure::transport("request timed out")))
    );
    assert_eq!(status_of(&engine, "t1"), Some(Status::Done));
    assert_eq!(store.calls(StoreOp::Pull), pulls);

    // The next pull overwrites the optimistic status.
    engine.refresh().await.unwrap();
    assert_eq!(status_of(&engine, "t1"), Some(Status::Todo));
    assert_eq!(engine.sync_state(&id), SyncState::Reconciled);
}

#[tokio::test]
async fn move_of_unknown_id_changes_nothing_locally() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;
    let id = TaskId::new("ghost");
    assert!(!engine.move_task(&id, Status::Done).await.unwrap());
    assert_eq!(engine.sync_state(&id), SyncState::Unknown);
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn delete_removes_task() {
    let store = store_with(&[("t1", Status::Todo, "u1"), ("t2", Status::Done, "u1")]);
    let engine = mount(&store, "u1").await;
    let id = TaskId::new("t1");

    assert!(engine.delete(&id).await.unwrap());
    assert_eq!(ids(&engine), vec!["t2"]);
    assert_eq!(engine.sync_state(&id), SyncState::Absent);

    // Deleting again finds nothing remotely.
    assert!(!engine.delete(&id).await.unwrap());
}

#[tokio::test]
async fn delete_failure_keeps_task() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    store.fail_next(StoreOp::Delete, Failure::NotFound);
    assert_eq!(
        engine.delete(&TaskId::new("t1")).await,
        Err(SyncError::Remote(Failure::NotFound))
    );
    assert_eq!(ids(&engine), vec!["t1"]);
}

// ---------------------------------------------------------------------------
// Board, revisions, teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn board_groups_in_column_order() {
    let store = store_with(&[
        ("a", Status::Done, "u1"),
        ("b", Status::Todo, "u1"),
        ("c", Status::InProgress, "u1"),
    ]);
    let engine = mount(&store, "u1").await;

    let board = engine.board();
    let titles: Vec<_> = board.iter().map(|c| c.title).collect();
    assert_eq!(titles, vec!["To Do", "In Progress", "Done"]);
    assert_eq!(board[0].tasks[0].id, TaskId::new("b"));
    assert_eq!(board[1].tasks[0].id, TaskId::new("c"));
    assert_eq!(board[2].tasks[0].id, TaskId::new("a"));
}

#[tokio::test]
async fn revision_bumps_on_push() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;
    let mut revisions = engine.watch();

    store.broadcast_raw(&ChangeEvent::insert(row("t1", Status::Todo, "u1")));
    tokio::time::timeout(Duration::from_secs(5), revisions.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.snapshot().len(), 1);
}

#[tokio::test]
async fn shutdown_releases_feed_and_ignores_late_events() {
    let store = store_with(&[("t1", Status::Todo, "u1")]);
    let engine = mount(&store, "u1").await;
    assert_eq!(store.subscriber_count(), 1);

    engine.shutdown().await;
    assert_eq!(store.subscriber_count(), 0);

    store.broadcast_raw(&ChangeEvent::insert(row("late", Status::Todo, "u1")));
    tokio::task::yield_now().await;
    assert_eq!(ids(&engine), vec!["t1"]);
    assert_eq!(
        engine.move_task(&TaskId::new("t1"), Status::Done).await,
        Err(SyncError::TornDown)
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_makes_in_flight_pull_a_noop() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;

    store.seed(task("t1", Status::Todo, "u1"));
    store.delay_next(StoreOp::Pull, Duration::from_millis(50));
    let pull = engine.refresh();
    let stop = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.shutdown().await;
    };
    let (pulled, ()) = tokio::join!(pull, stop);

    assert_eq!(pulled, Ok(false));
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn mount_failure_opens_no_feed() {
    let store = store_with(&[]);
    store.fail_next(StoreOp::Subscribe, Failure::transport("down"));
    let result = SyncEngine::mount(Arc::clone(&store), scope("u1"), EngineConfig::default()).await;
    assert!(result.is_err());
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_pull_clears_loading() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;

    store.delay_next(StoreOp::Pull, Duration::from_millis(50));
    let pull = engine.refresh();
    let stop = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_loading());
        engine.shutdown().await;
    };
    let (pulled, ()) = tokio::join!(pull, stop);

    assert_eq!(pulled, Ok(false));
    assert!(!engine.is_loading());
}

#[tokio::test]
async fn store_closing_feed_is_reported() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;
    assert!(engine.feed_alive());
    let mut revisions = engine.watch();

    store.close_feeds();
    tokio::time::timeout(Duration::from_secs(5), revisions.changed())
        .await
        .expect("feed loss not signalled")
        .unwrap();

    assert!(!engine.feed_alive());
}

#[tokio::test]
async fn shutdown_is_not_reported_as_feed_loss() {
    let store = store_with(&[]);
    let engine = mount(&store, "u1").await;
    let revisions = engine.watch();

    engine.shutdown().await;
    store.close_feeds();
    tokio::task::yield_now().await;

    assert!(!engine.feed_alive());
    assert!(!revisions.has_changed().unwrap());
}
