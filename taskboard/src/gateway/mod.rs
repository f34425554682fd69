//! Remote store gateway for the task board.
//!
//! Defines the [`RemoteStore`] trait that every store backend must satisfy.
//! Concrete implementations:
//! - [`memory::MemoryStore`]: in-process store for tests and embedding
//! - [`ws::WsStore`]: WebSocket client for the `taskboard-server` store

pub mod memory;
pub mod ws;

use serde_json::Value;
use tokio::sync::mpsc;

use taskboard_proto::column::ColumnSet;
use taskboard_proto::failure::Failure;
use taskboard_proto::row::ChangeEvent;
use taskboard_proto::task::{NewTask, Scope, Status, TaskId, TaskPatch};

/// Identifier of an open change-feed subscription.
pub type SubscriptionId = u64;

/// An open change feed.
///
/// Events arrive on `events` in delivery order. Dropping the receiver, or
/// passing `id` to [`RemoteStore::unsubscribe`], releases the feed.
#[derive(Debug)]
pub struct Subscription {
    /// Handle for [`RemoteStore::unsubscribe`].
    pub id: SubscriptionId,
    /// Notifications for the subscribed scope.
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Async contract of the remote task store.
///
/// Every call is scoped to the owner named by the [`Scope`]. The store is the
/// authority on which rows that owner may see and change. A `false` result
/// from an update, move or delete means no owned row had that id; it is not
/// an error.
///
/// Calls that take a [`ColumnSet`] fail with [`Failure::UnknownColumn`] if
/// the store lacks a requested column.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch every row in scope as undecoded JSON objects.
    fn pull_tasks(
        &self,
        scope: &Scope,
        columns: ColumnSet,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, Failure>> + Send;

    /// Create a task and return its store-assigned id.
    fn create_task(
        &self,
        scope: &Scope,
        task: &NewTask,
        columns: ColumnSet,
    ) -> impl std::future::Future<Output = Result<TaskId, Failure>> + Send;

    /// Write the present fields of `patch`.
    fn update_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        patch: &TaskPatch,
        columns: ColumnSet,
    ) -> impl std::future::Future<Output = Result<bool, Failure>> + Send;

    /// Change a task's status.
    fn move_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        status: Status,
    ) -> impl std::future::Future<Output = Result<bool, Failure>> + Send;

    /// Remove a task.
    fn delete_task(
        &self,
        scope: &Scope,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<bool, Failure>> + Send;

    /// Open a change feed filtered to the scope's owner.
    fn subscribe(
        &self,
        scope: &Scope,
    ) -> impl std::future::Future<Output = Result<Subscription, Failure>> + Send;

    /// Release a change feed. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> impl std::future::Future<Output = ()> + Send;
}
