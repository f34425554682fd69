//! In-process task store.
//!
//! [`MemoryStore`] serves the [`RemoteStore`] contract from a [`TaskTable`]
//! held behind a mutex, publishing change events to subscribers on every
//! successful mutation. Tests can script failures, delay responses, disable
//! the server-side feed filter, and deliver raw events to exercise the
//! client's reconciliation paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use taskboard_proto::column::ColumnSet;
use taskboard_proto::failure::Failure;
use taskboard_proto::row::ChangeEvent;
use taskboard_proto::table::TaskTable;
use taskboard_proto::task::{NewTask, Scope, Status, Task, TaskId, TaskPatch};

use super::{RemoteStore, Subscription, SubscriptionId};

/// Default capacity of each subscriber's event channel.
pub const DEFAULT_FEED_BUFFER: usize = 64;

/// Store operations that can be scripted and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `pull_tasks`.
    Pull,
    /// `create_task`.
    Create,
    /// `update_task`.
    Update,
    /// `move_task`.
    Move,
    /// `delete_task`.
    Delete,
    /// `subscribe`.
    Subscribe,
}

struct Subscriber {
    owner_id: String,
    tx: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    table: TaskTable,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    faults: HashMap<StoreOp, VecDeque<Failure>>,
    delays: HashMap<StoreOp, VecDeque<Duration>>,
    calls: HashMap<StoreOp, usize>,
    pull_columns: Vec<ColumnSet>,
    unfiltered_feed: bool,
}

/// In-process [`RemoteStore`] backed by a [`TaskTable`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_subscription: AtomicU64,
    feed_buffer: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the full schema.
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(TaskTable::new())
    }

    /// Creates an empty store whose schema lacks the optional column.
    #[must_use]
    pub fn legacy() -> Self {
        Self::with_table(TaskTable::legacy())
    }

    /// Creates a store over an existing table.
    #[must_use]
    pub fn with_table(table: TaskTable) -> Self {
        Self {
            inner: Mutex::new(Inner {
                table,
                ..Inner::default()
            }),
            next_subscription: AtomicU64::new(1),
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }

    /// Sets the capacity of subscriber channels opened after this call.
    #[must_use]
    pub const fn with_feed_buffer(mut self, feed_buffer: usize) -> Self {
        self.feed_buffer = feed_buffer;
        self
    }

    /// Inserts a row without publishing a change event.
    pub fn seed(&self, task: Task) {
        self.inner.lock().table.insert_row(task);
    }

    /// Delivers a raw event to every subscriber, bypassing the owner filter.
    pub fn broadcast_raw(&self, event: &ChangeEvent) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|id, sub| deliver(*id, sub, event));
    }

    /// Makes the next call of `op` fail with `failure` instead of running.
    pub fn fail_next(&self, op: StoreOp, failure: Failure) {
        self.inner
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(failure);
    }

    /// Delays the response of the next call of `op`.
    ///
    /// The call reads and writes the table immediately; only its result is
    /// held back.
    pub fn delay_next(&self, op: StoreOp, delay: Duration) {
        self.inner
            .lock()
            .delays
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    /// When `true`, mutation events go to every subscriber regardless of owner.
    pub fn set_unfiltered_feed(&self, unfiltered: bool) {
        self.inner.lock().unfiltered_feed = unfiltered;
    }

    /// Number of calls of `op` received so far, including failed ones.
    #[must_use]
    pub fn calls(&self, op: StoreOp) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Column sets requested by each pull, in call order.
    #[must_use]
    pub fn pull_columns(&self) -> Vec<ColumnSet> {
        self.inner.lock().pull_columns.clone()
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|_, sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }

    /// Drops every open subscription, as a store does when its connection
    /// goes away.
    pub fn close_feeds(&self) {
        let mut inner = self.inner.lock();
        tracing::debug!(count = inner.subscribers.len(), "closing all subscriptions");
        inner.subscribers.clear();
    }

    async fn run<T>(
        &self,
        op: StoreOp,
        f: impl FnOnce(&mut Inner) -> Result<T, Failure>,
    ) -> Result<T, Failure> {
        let (result, delay) = {
            let mut inner = self.inner.lock();
            *inner.calls.entry(op).or_default() += 1;
            let delay = inner.delays.get_mut(&op).and_then(VecDeque::pop_front);
            let fault = inner.faults.get_mut(&op).and_then(VecDeque::pop_front);
            let result = match fault {
                Some(failure) => Err(failure),
                None => f(&mut inner),
            };
            (result, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Sends `event` to one subscriber; returns `false` once its receiver is gone.
fn deliver(id: SubscriptionId, sub: &Subscriber, event: &ChangeEvent) -> bool {
    match sub.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(subscription = id, "subscriber lagging, dropping change event");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(subscription = id, "subscriber gone, releasing");
            false
        }
    }
}

/// Publishes a mutation event to subscribers whose owner filter matches.
fn publish(inner: &mut Inner, event: &ChangeEvent) {
    let unfiltered = inner.unfiltered_feed;
    inner.subscribers.retain(|id, sub| {
        if unfiltered || event.owners().any(|owner| owner == sub.owner_id) {
            deliver(*id, sub, event)
        } else {
            !sub.tx.is_closed()
        }
    });
}

fn applied(inner: &mut Inner, event: Option<ChangeEvent>) -> bool {
    event.is_some_and(|event| {
        publish(inner, &event);
        true
    })
}

impl RemoteStore for MemoryStore {
    async fn pull_tasks(&self, scope: &Scope, columns: ColumnSet) -> Result<Vec<Value>, Failure> {
        self.inner.lock().pull_columns.push(columns);
        self.run(StoreOp::Pull, |inner| {
            inner.table.pull(scope.owner_id(), columns)
        })
        .await
    }

    async fn create_task(
        &self,
        scope: &Scope,
        task: &NewTask,
        columns: ColumnSet,
    ) -> Result<TaskId, Failure> {
        self.run(StoreOp::Create, |inner| {
            let (id, event) = inner
                .table
                .create(scope.owner_id(), task.clone(), columns)?;
            publish(inner, &event);
            Ok(id)
        })
        .await
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        patch: &TaskPatch,
        columns: ColumnSet,
    ) -> Result<bool, Failure> {
        self.run(StoreOp::Update, |inner| {
            let event = inner
                .table
                .update(scope.owner_id(), id, patch, columns)?;
            Ok(applied(inner, event))
        })
        .await
    }

    async fn move_task(&self, scope: &Scope, id: &TaskId, status: Status) -> Result<bool, Failure> {
        self.run(StoreOp::Move, |inner| {
            let event = inner.table.move_task(scope.owner_id(), id, status)?;
            Ok(applied(inner, event))
        })
        .await
    }

    async fn delete_task(&self, scope: &Scope, id: &TaskId) -> Result<bool, Failure> {
        self.run(StoreOp::Delete, |inner| {
            let event = inner.table.delete(scope.owner_id(), id)?;
            Ok(applied(inner, event))
        })
        .await
    }

    async fn subscribe(&self, scope: &Scope) -> Result<Subscription, Failure> {
        let buffer = self.feed_buffer;
        self.run(StoreOp::Subscribe, |inner| {
            let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
            let (tx, events) = mpsc::channel(buffer);
            inner.subscribers.insert(
                id,
                Subscriber {
                    owner_id: scope.owner_id().to_string(),
                    tx,
                },
            );
            tracing::debug!(subscription = id, scope = %scope, "subscription opened");
            Ok(Subscription { id, events })
        })
        .await
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.lock().subscribers.remove(&id).is_some() {
            tracing::debug!(subscription = id, "subscription closed");
        }
    }
}
