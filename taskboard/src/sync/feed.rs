//! Change feed subscriber.
//!
//! [`ChangeFeed`] owns the task that drains one subscription and hands each
//! notification to a callback, in delivery order. A second callback fires
//! when the store side closes the subscription. [`dispatch`] maps a raw
//! notification onto the collection's merge operations.

use tokio::task::JoinHandle;

use taskboard_proto::row::{Change, ChangeEvent};

use crate::gateway::{RemoteStore, Subscription, SubscriptionId};

use super::collection::TaskCollection;

/// A running change feed.
///
/// Dropping the feed stops the drain task, which drops the subscription's
/// receiver. [`close`](Self::close) additionally tells the store.
#[derive(Debug)]
pub struct ChangeFeed {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

impl ChangeFeed {
    /// Spawns a task that passes every event of `subscription` to `on_event`.
    ///
    /// `on_closed` runs once if the store ends the subscription. It does not
    /// run when the feed is dropped or closed locally.
    pub fn spawn<F, C>(subscription: Subscription, mut on_event: F, on_closed: C) -> Self
    where
        F: FnMut(ChangeEvent) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let Subscription { id, mut events } = subscription;
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                on_event(event);
            }
            tracing::debug!(subscription = id, "change feed ended");
            on_closed();
        });
        Self {
            subscription: id,
            task,
        }
    }

    /// The store-side subscription id.
    #[must_use]
    pub const fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Stops the drain task and releases the subscription at the store.
    pub async fn close<S: RemoteStore>(self, store: &S) {
        self.task.abort();
        store.unsubscribe(self.subscription).await;
        tracing::debug!(subscription = self.subscription, "change feed closed");
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Applies one notification to `collection`.
///
/// Notifications naming an owner outside the collection's scope, and
/// notifications that fail to decode, are dropped. Returns whether the
/// visible snapshot changed.
pub fn dispatch(collection: &mut TaskCollection, event: &ChangeEvent) -> bool {
    if let Some(owner) = event
        .owners()
        .find(|owner| !collection.scope().admits(owner))
    {
        tracing::debug!(kind = %event.kind, owner = %owner, "dropping out-of-scope notification");
        return false;
    }
    let change = match event.decode() {
        Ok(change) => change,
        Err(e) => {
            tracing::warn!(kind = %event.kind, error = %e, "dropping malformed notification");
            return false;
        }
    };
    tracing::trace!(kind = %event.kind, task_id = %change.id(), "applying notification");
    match change {
        Change::Insert(task) => collection.apply_insert(task),
        Change::Update(task) => collection.apply_update(task),
        Change::Delete(id) => collection.apply_delete(&id),
    }
}
