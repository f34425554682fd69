//! WebSocket wire protocol between the task board client and the store server.
//!
//! Frames are JSON text messages. The client sends [`ClientFrame`]s (store
//! calls and feed subscriptions); the server answers with [`ServerFrame`]s.
//! Request and subscription ids are allocated by the client and unique per
//! connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::ColumnSet;
use crate::failure::Failure;
use crate::row::ChangeEvent;
use crate::task::{NewTask, Status, TaskId, TaskPatch};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame could not be serialized.
    #[error("frame encode error: {0}")]
    Encode(String),
    /// Frame text could not be parsed.
    #[error("frame decode error: {0}")]
    Decode(String),
}

/// A remote procedure call against the task table.
///
/// Every call carries the caller's owner id; the store only touches rows
/// created by that owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreCall {
    /// Fetch every row owned by `owner_id`, newest first.
    PullTasks {
        /// Owner filter.
        owner_id: String,
        /// Requested column set.
        columns: ColumnSet,
    },
    /// Create a task; answered with [`CallResult::Created`].
    CreateTask {
        /// Owner of the new task.
        owner_id: String,
        /// Task payload.
        task: NewTask,
        /// Column set the payload was shaped for.
        columns: ColumnSet,
    },
    /// Apply a partial update.
    UpdateTask {
        /// Owner filter.
        owner_id: String,
        /// Target row.
        id: TaskId,
        /// Present fields to write.
        patch: TaskPatch,
        /// Column set the patch was shaped for.
        columns: ColumnSet,
    },
    /// Change a task's status.
    MoveTask {
        /// Owner filter.
        owner_id: String,
        /// Target row.
        id: TaskId,
        /// New status.
        status: Status,
    },
    /// Remove a task.
    DeleteTask {
        /// Owner filter.
        owner_id: String,
        /// Target row.
        id: TaskId,
    },
}

/// Outcome of a [`StoreCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallResult {
    /// Rows returned by a pull.
    Rows {
        /// Undecoded rows.
        rows: Vec<Value>,
    },
    /// Identifier of a created task.
    Created {
        /// New task id.
        id: TaskId,
    },
    /// Whether an update, move or delete found an owned row.
    Applied {
        /// `false` when no owned row had that id.
        applied: bool,
    },
    /// The call failed.
    Failed {
        /// Typed failure.
        failure: Failure,
    },
}

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Issue a store call.
    Request {
        /// Correlates the [`ServerFrame::Response`].
        id: u64,
        /// The call.
        call: StoreCall,
    },
    /// Open a change feed filtered to one owner.
    Subscribe {
        /// Client-chosen subscription id.
        subscription: u64,
        /// Owner filter.
        owner_id: String,
    },
    /// Close a change feed.
    Unsubscribe {
        /// Subscription to close.
        subscription: u64,
    },
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Result of a request.
    Response {
        /// Request id being answered.
        id: u64,
        /// Outcome.
        result: CallResult,
    },
    /// A subscription is live.
    Subscribed {
        /// The subscription id.
        subscription: u64,
    },
    /// A change notification for a subscription.
    Change {
        /// The subscription the event is for.
        subscription: u64,
        /// The change.
        event: ChangeEvent,
    },
    /// A protocol-level error not tied to a request.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

/// Encodes a frame as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a frame from JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the text is not a valid frame.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))
}
