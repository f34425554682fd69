//! Entity sync engine.
//!
//! Keeps a local [`collection::TaskCollection`] consistent with a
//! [`RemoteStore`](crate::gateway::RemoteStore) by combining sequence-guarded
//! pulls, the change feed, optimistic status patches and capability-based
//! query degradation. [`engine::SyncEngine`] is the public entry point.

pub mod capability;
pub mod collection;
pub mod engine;
pub mod feed;
pub mod sequence;

use taskboard_proto::failure::Failure;
use taskboard_proto::task::ValidationError;

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A local constraint check failed; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The remote store reported a failure.
    #[error(transparent)]
    Remote(#[from] Failure),

    /// The engine has been shut down.
    #[error("sync engine has been shut down")]
    TornDown,

    /// The store closed the change feed; the collection no longer follows
    /// remote changes.
    #[error("change feed lost")]
    FeedLost,
}
