//! Sync engine: the mutation façade over a live task collection.
//!
//! A [`SyncEngine`] is mounted for one [`Scope`]. Mounting opens the change
//! feed and issues the first pull. Every mutation performs its remote call
//! and then a fresh, sequence-guarded pull; `move_task` additionally patches
//! the local status before the remote call so the board updates at once.
//!
//! The collection lock is a `parking_lot` mutex and is never held across an
//! `.await`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use taskboard_proto::column::ColumnSet;
use taskboard_proto::row::{ChangeEvent, decode_row};
use taskboard_proto::task::{
    MAX_TASK_TITLE_LENGTH, NewTask, Scope, Status, Task, TaskId, TaskPatch,
};

use crate::gateway::RemoteStore;

use super::SyncError;
use super::capability::CapabilityProber;
use super::collection::{BoardColumn, SyncState, TaskCollection};
use super::feed::{self, ChangeFeed};
use super::sequence::SequenceGuard;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum task title length in characters.
    pub max_title_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_title_len: MAX_TASK_TITLE_LENGTH,
        }
    }
}

/// State shared between the engine handle and its feed task.
struct Shared<S> {
    store: Arc<S>,
    scope: Scope,
    collection: Mutex<TaskCollection>,
    /// Bumped on every visible change.
    revision: watch::Sender<u64>,
    /// Guarded by `collection` so it always follows the newest ticket.
    loading: AtomicBool,
    feed_lost: AtomicBool,
    guard: SequenceGuard,
    prober: CapabilityProber,
    config: EngineConfig,
}

impl<S: RemoteStore> Shared<S> {
    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn on_event(&self, event: &ChangeEvent) {
        if self.guard.is_torn_down() {
            tracing::debug!(kind = %event.kind, "ignoring notification after teardown");
            return;
        }
        let changed = feed::dispatch(&mut self.collection.lock(), event);
        if changed {
            self.bump();
        }
    }

    fn on_feed_closed(&self) {
        if self.guard.is_torn_down() {
            return;
        }
        self.feed_lost.store(true, Ordering::Release);
        tracing::warn!(scope = %self.scope, "change feed closed by store");
        self.bump();
    }

    fn tear_down(&self) {
        let _collection = self.collection.lock();
        self.guard.tear_down();
        self.loading.store(false, Ordering::Release);
    }
}

/// A task collection kept in sync with a remote store for one scope.
pub struct SyncEngine<S: RemoteStore> {
    shared: Arc<Shared<S>>,
    feed: Mutex<Option<ChangeFeed>>,
}

impl<S: RemoteStore> SyncEngine<S> {
    /// Mounts an engine: opens the change feed, then pulls.
    ///
    /// A failed initial pull is logged and leaves the collection empty; call
    /// [`refresh`](Self::refresh) to retry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the change feed cannot be opened.
    pub async fn mount(store: Arc<S>, scope: Scope, config: EngineConfig) -> Result<Self, SyncError> {
        let subscription = store.subscribe(&scope).await.map_err(|e| {
            tracing::warn!(scope = %scope, error = %e, "failed to open change feed");
            e
        })?;
        let subscription_id = subscription.id;

        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            store,
            collection: Mutex::new(TaskCollection::new(scope.clone())),
            scope,
            revision,
            loading: AtomicBool::new(false),
            feed_lost: AtomicBool::new(false),
            guard: SequenceGuard::new(),
            prober: CapabilityProber::new(),
            config,
        });

        let event_shared = Arc::clone(&shared);
        let closed_shared = Arc::clone(&shared);
        let feed = ChangeFeed::spawn(
            subscription,
            move |event| event_shared.on_event(&event),
            move || closed_shared.on_feed_closed(),
        );
        let engine = Self {
            shared,
            feed: Mutex::new(Some(feed)),
        };
        tracing::info!(
            scope = %engine.shared.scope,
            subscription = subscription_id,
            "sync engine mounted"
        );

        if let Err(e) = engine.refresh().await {
            tracing::warn!(error = %e, "initial pull failed");
        }
        Ok(engine)
    }

    /// The scope this engine is bound to.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.shared.scope
    }

    /// Tasks in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.shared.collection.lock().snapshot()
    }

    /// Tasks grouped into To Do, In Progress and Done.
    #[must_use]
    pub fn board(&self) -> Vec<BoardColumn> {
        self.shared.collection.lock().board()
    }

    /// Looks up one task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.shared.collection.lock().get(id).cloned()
    }

    /// Sync state of one identifier.
    #[must_use]
    pub fn sync_state(&self, id: &TaskId) -> SyncState {
        self.shared.collection.lock().sync_state(id)
    }

    /// Whether the newest pull is still in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::Acquire)
    }

    /// Column set currently used for queries and mutations.
    #[must_use]
    pub fn columns(&self) -> ColumnSet {
        self.shared.prober.columns()
    }

    /// Whether the change feed still delivers notifications.
    ///
    /// Turns false, with a revision bump, when the store closes the feed.
    #[must_use]
    pub fn feed_alive(&self) -> bool {
        !self.shared.feed_lost.load(Ordering::Acquire) && !self.shared.guard.is_torn_down()
    }

    /// Receiver of snapshot revisions; changes on every visible change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    fn ensure_live(&self) -> Result<(), SyncError> {
        if self.shared.guard.is_torn_down() {
            Err(SyncError::TornDown)
        } else {
            Ok(())
        }
    }

    /// Pulls the full task set and replaces the collection with it.
    ///
    /// Returns `Ok(false)` if a newer pull was started (or the engine was
    /// shut down) while this one was in flight; its result is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the newest pull fails; the collection
    /// is left as it was.
    pub async fn refresh(&self) -> Result<bool, SyncError> {
        self.ensure_live()?;
        let shared = &*self.shared;
        let ticket = {
            let _collection = shared.collection.lock();
            shared.loading.store(true, Ordering::Release);
            shared.guard.begin()
        };

        let result = shared
            .prober
            .with_fallback(|columns| shared.store.pull_tasks(&shared.scope, columns))
            .await;

        let mut collection = shared.collection.lock();
        if !shared.guard.is_current(ticket) {
            if shared.guard.is_torn_down() {
                shared.loading.store(false, Ordering::Release);
            }
            tracing::debug!(ticket = ticket.get(), "discarding stale pull result");
            return Ok(false);
        }
        shared.loading.store(false, Ordering::Release);

        match result {
            Ok(rows) => {
                let changed = collection.replace_all(decode_rows(&rows));
                drop(collection);
                if changed {
                    shared.bump();
                }
                tracing::debug!(ticket = ticket.get(), rows = rows.len(), "pull applied");
                Ok(true)
            }
            Err(failure) => {
                drop(collection);
                tracing::warn!(ticket = ticket.get(), error = %failure, "pull failed");
                Err(failure.into())
            }
        }
    }

    /// Creates a task and returns the id the store assigned.
    ///
    /// The task itself appears once the follow-up pull or its insert
    /// notification arrives.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for a bad title and
    /// [`SyncError::Remote`] if the store rejects the call.
    pub async fn create(&self, task: NewTask) -> Result<TaskId, SyncError> {
        self.ensure_live()?;
        let task = task.validated(self.shared.config.max_title_len)?;
        let shared = &*self.shared;

        let id = shared
            .prober
            .with_fallback(|columns| {
                let shaped = shape_new_task(&task, columns);
                async move { shared.store.create_task(&shared.scope, &shaped, columns).await }
            })
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "create failed");
                e
            })?;

        tracing::debug!(task_id = %id, "task created");
        self.pull_after("create").await;
        Ok(id)
    }

    /// Writes the present fields of `patch`.
    ///
    /// An empty patch is a no-op that returns `Ok(false)` without a remote
    /// call. Otherwise returns whether the store found the task.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for a bad title and
    /// [`SyncError::Remote`] if the store rejects the call.
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<bool, SyncError> {
        self.ensure_live()?;
        if patch.is_empty() {
            tracing::debug!(task_id = %id, "empty patch, nothing to update");
            return Ok(false);
        }
        let patch = patch.validated(self.shared.config.max_title_len)?;
        let shared = &*self.shared;

        let applied = shared
            .prober
            .with_fallback(|columns| {
                let shaped = shape_patch(&patch, columns);
                async move {
                    shared
                        .store
                        .update_task(&shared.scope, id, &shaped, columns)
                        .await
                }
            })
            .await
            .map_err(|e| {
                tracing::warn!(task_id = %id, error = %e, "update failed");
                e
            })?;

        self.pull_after("update").await;
        Ok(applied)
    }

    /// Moves a task to another column.
    ///
    /// The local status changes before the remote call is issued. On remote
    /// failure the optimistic status stays until the next pull or
    /// notification overwrites it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the store rejects the call.
    pub async fn move_task(&self, id: &TaskId, status: Status) -> Result<bool, SyncError> {
        self.ensure_live()?;
        let shared = &*self.shared;

        let changed = shared
            .collection
            .lock()
            .apply_optimistic_status(id, status);
        if changed {
            shared.bump();
        }

        let applied = shared
            .store
            .move_task(&shared.scope, id, status)
            .await
            .map_err(|e| {
                tracing::warn!(task_id = %id, status = %status, error = %e, "move failed");
                e
            })?;

        self.pull_after("move").await;
        Ok(applied)
    }

    /// Deletes a task, removing it locally once the store confirms.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the store rejects the call.
    pub async fn delete(&self, id: &TaskId) -> Result<bool, SyncError> {
        self.ensure_live()?;
        let shared = &*self.shared;

        let applied = shared
            .store
            .delete_task(&shared.scope, id)
            .await
            .map_err(|e| {
                tracing::warn!(task_id = %id, error = %e, "delete failed");
                e
            })?;

        let changed = shared.collection.lock().apply_delete(id);
        if changed {
            shared.bump();
        }

        self.pull_after("delete").await;
        Ok(applied)
    }

    async fn pull_after(&self, op: &'static str) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(op, error = %e, "follow-up pull failed");
        }
    }

    /// Tears the engine down: in-flight pulls become no-ops and the change
    /// feed is released. Later operations fail with [`SyncError::TornDown`].
    pub async fn shutdown(&self) {
        self.shared.tear_down();
        let feed = self.feed.lock().take();
        if let Some(feed) = feed {
            feed.close(self.shared.store.as_ref()).await;
            tracing::info!(scope = %self.shared.scope, "sync engine unmounted");
        }
    }
}

impl<S: RemoteStore> Drop for SyncEngine<S> {
    fn drop(&mut self) {
        self.shared.tear_down();
    }
}

/// Decodes pull rows, dropping malformed ones.
fn decode_rows(rows: &[Value]) -> Vec<Task> {
    rows.iter()
        .filter_map(|row| match decode_row(row) {
            Ok(task) => Some(task),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed row");
                None
            }
        })
        .collect()
}

fn shape_new_task(task: &NewTask, columns: ColumnSet) -> NewTask {
    let mut shaped = task.clone();
    if !columns.includes_optional() {
        shaped.sprint_id = None;
    }
    shaped
}

fn shape_patch(patch: &TaskPatch, columns: ColumnSet) -> TaskPatch {
    let mut shaped = patch.clone();
    if !columns.includes_optional() {
        shaped.sprint_id = None;
    }
    shaped
}
