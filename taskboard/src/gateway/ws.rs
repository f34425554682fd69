//! WebSocket task store client.
//!
//! Implements [`RemoteStore`] over a single WebSocket connection to a
//! `taskboard-server`. Calls are multiplexed by request id; a background
//! reader task routes responses to waiting callers and change events to
//! subscription channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskboard_proto::column::ColumnSet;
use taskboard_proto::failure::Failure;
use taskboard_proto::row::ChangeEvent;
use taskboard_proto::task::{NewTask, Scope, Status, TaskId, TaskPatch};
use taskboard_proto::wire::{self, CallResult, ClientFrame, ServerFrame, StoreCall};

use super::{RemoteStore, Subscription, SubscriptionId};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Reply routed to a waiting caller.
#[derive(Debug)]
enum Reply {
    Result(CallResult),
    Subscribed,
}

type Pending = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type Feeds = Arc<parking_lot::Mutex<HashMap<u64, mpsc::Sender<ChangeEvent>>>>;

/// Connection tuning for [`WsStore`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for each call's response.
    pub request_timeout: Duration,
    /// Capacity of each subscription's event channel.
    pub feed_buffer: usize,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            feed_buffer: 256,
        }
    }
}

/// WebSocket client implementing [`RemoteStore`].
pub struct WsStore {
    /// The store server URL (ws:// or wss://).
    url: String,
    /// Write half of the WebSocket connection (shared for concurrent calls).
    ws_sender: Arc<tokio::sync::Mutex<WsSender>>,
    /// Callers waiting for a reply, by request id.
    pending: Pending,
    /// Open subscriptions, by subscription id.
    feeds: Feeds,
    /// Allocates request and subscription ids.
    next_id: AtomicU64,
    /// Whether the connection is still up.
    connected: Arc<AtomicBool>,
    options: WsOptions,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl WsStore {
    /// Connect to a store server.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Transport`] if the handshake fails or times out.
    pub async fn connect(url: &str, options: WsOptions) -> Result<Self, Failure> {
        let (ws_stream, _response) =
            tokio::time::timeout(options.connect_timeout, connect_async(url))
                .await
                .map_err(|_| {
                    tracing::warn!(url, "store WebSocket connect timed out");
                    Failure::transport("connect timed out")
                })?
                .map_err(|e| {
                    tracing::warn!(url, error = %e, "store WebSocket connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));
        let pending: Pending = Arc::default();
        let feeds: Feeds = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&ws_sender),
            Arc::clone(&pending),
            Arc::clone(&feeds),
            Arc::clone(&connected),
        ));

        tracing::info!(url, "connected to task store");
        Ok(Self {
            url: url.to_string(),
            ws_sender,
            pending,
            feeds,
            next_id: AtomicU64::new(1),
            connected,
            options,
            reader_handle,
        })
    }

    /// Return the store URL this client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends `frame` and waits for the reply registered under `id`.
    async fn round_trip(&self, id: u64, frame: &ClientFrame) -> Result<Reply, Failure> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        // The reader drains `pending` after clearing `connected`; re-check so a
        // call registered after that drain does not wait out the timeout.
        if !self.is_connected() {
            self.pending.lock().remove(&id);
            return Err(Failure::transport("connection closed"));
        }

        if let Err(e) = self.send_frame(frame).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::warn!(request = id, "store request timed out");
                Err(Failure::transport("request timed out"))
            }
            Ok(Err(_)) => Err(Failure::transport("connection closed")),
            Ok(Ok(reply)) => Ok(reply),
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), Failure> {
        let text = wire::encode(frame).map_err(|e| Failure::unknown(e.to_string()))?;
        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!(error = %e, "store send failed");
            self.connected.store(false, Ordering::Release);
            Failure::transport("connection closed")
        })
    }

    async fn call(&self, call: StoreCall) -> Result<CallResult, Failure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.round_trip(id, &ClientFrame::Request { id, call }).await? {
            Reply::Result(CallResult::Failed { failure }) => Err(failure),
            Reply::Result(result) => Ok(result),
            Reply::Subscribed => Err(unexpected("subscribed")),
        }
    }

    async fn call_applied(&self, call: StoreCall) -> Result<bool, Failure> {
        match self.call(call).await? {
            CallResult::Applied { applied } => Ok(applied),
            _ => Err(unexpected("non-applied result")),
        }
    }
}

impl Drop for WsStore {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

fn unexpected(what: &str) -> Failure {
    Failure::unknown(format!("unexpected {what} reply from store"))
}

impl RemoteStore for WsStore {
    async fn pull_tasks(&self, scope: &Scope, columns: ColumnSet) -> Result<Vec<Value>, Failure> {
        let call = StoreCall::PullTasks {
            owner_id: scope.owner_id().to_string(),
            columns,
        };
        match self.call(call).await? {
            CallResult::Rows { rows } => Ok(rows),
            _ => Err(unexpected("non-rows result")),
        }
    }

    async fn create_task(
        &self,
        scope: &Scope,
        task: &NewTask,
        columns: ColumnSet,
    ) -> Result<TaskId, Failure> {
        let call = StoreCall::CreateTask {
            owner_id: scope.owner_id().to_string(),
            task: task.clone(),
            columns,
        };
        match self.call(call).await? {
            CallResult::Created { id } => Ok(id),
            _ => Err(unexpected("non-created result")),
        }
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        patch: &TaskPatch,
        columns: ColumnSet,
    ) -> Result<bool, Failure> {
        self.call_applied(StoreCall::UpdateTask {
            owner_id: scope.owner_id().to_string(),
            id: id.clone(),
            patch: patch.clone(),
            columns,
        })
        .await
    }

    async fn move_task(&self, scope: &Scope, id: &TaskId, status: Status) -> Result<bool, Failure> {
        self.call_applied(StoreCall::MoveTask {
            owner_id: scope.owner_id().to_string(),
            id: id.clone(),
            status,
        })
        .await
    }

    async fn delete_task(&self, scope: &Scope, id: &TaskId) -> Result<bool, Failure> {
        self.call_applied(StoreCall::DeleteTask {
            owner_id: scope.owner_id().to_string(),
            id: id.clone(),
        })
        .await
    }

    async fn subscribe(&self, scope: &Scope) -> Result<Subscription, Failure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, events) = mpsc::channel(self.options.feed_buffer);
        // Register before subscribing so no event can outrun the channel.
        self.feeds.lock().insert(id, tx);

        let frame = ClientFrame::Subscribe {
            subscription: id,
            owner_id: scope.owner_id().to_string(),
        };
        let reply = match self.round_trip(id, &frame).await {
            Ok(reply) => reply,
            Err(e) => {
                self.feeds.lock().remove(&id);
                return Err(e);
            }
        };
        match reply {
            Reply::Subscribed => {
                tracing::debug!(subscription = id, scope = %scope, "subscription opened");
                Ok(Subscription { id, events })
            }
            Reply::Result(result) => {
                self.feeds.lock().remove(&id);
                match result {
                    CallResult::Failed { failure } => Err(failure),
                    _ => Err(unexpected("non-subscribed")),
                }
            }
        }
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.feeds.lock().remove(&id).is_none() {
            return;
        }
        if let Err(e) = self
            .send_frame(&ClientFrame::Unsubscribe { subscription: id })
            .await
        {
            tracing::debug!(subscription = id, error = %e, "unsubscribe not sent");
        }
    }
}

/// Background task that reads server frames and dispatches them.
///
/// Malformed frames are logged and skipped. When the connection ends, every
/// waiting caller is failed and every subscription channel is closed.
async fn reader_loop(
    mut ws_reader: WsReader,
    ws_sender: Arc<tokio::sync::Mutex<WsSender>>,
    pending: Pending,
    feeds: Feeds,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match wire::decode::<ServerFrame>(&text) {
                Ok(frame) => dispatch(frame, &ws_sender, &pending, &feeds).await,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("store WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore binary, ping, pong and raw frames.
            }
            Err(e) => {
                tracing::warn!(error = %e, "store WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
    // Dropping the senders fails waiting calls and closes feeds.
    pending.lock().clear();
    feeds.lock().clear();
    tracing::info!("store reader task exiting");
}

async fn dispatch(
    frame: ServerFrame,
    ws_sender: &Arc<tokio::sync::Mutex<WsSender>>,
    pending: &Pending,
    feeds: &Feeds,
) {
    match frame {
        ServerFrame::Response { id, result } => {
            reply(pending, id, Reply::Result(result));
        }
        ServerFrame::Subscribed { subscription } => {
            reply(pending, subscription, Reply::Subscribed);
        }
        ServerFrame::Change {
            subscription,
            event,
        } => {
            let Some(tx) = feeds.lock().get(&subscription).cloned() else {
                tracing::debug!(subscription, "change for closed subscription, skipping");
                return;
            };
            if tx.send(event).await.is_err() {
                // Receiver dropped: release the server side too.
                feeds.lock().remove(&subscription);
                tracing::debug!(subscription, "subscription receiver dropped, releasing");
                if let Ok(text) = wire::encode(&ClientFrame::Unsubscribe { subscription }) {
                    let mut sender = ws_sender.lock().await;
                    let _ = sender.send(Message::Text(text.into())).await;
                }
            }
        }
        ServerFrame::Error { reason } => {
            tracing::warn!(reason = %reason, "store server error");
        }
    }
}

fn reply(pending: &Pending, id: u64, reply: Reply) {
    let waiter = pending.lock().remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => tracing::debug!(request = id, "reply for unknown or expired request"),
    }
}

/// Map a `tokio_tungstenite` connection error to a [`Failure`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> Failure {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => Failure::transport(format!("connect failed: {io_err}")),
        WsError::Tls(_) => Failure::transport(format!("TLS error: {err}")),
        WsError::Http(response) => {
            Failure::transport(format!("store HTTP error: status {}", response.status()))
        }
        other => Failure::transport(format!("store connection error: {other}")),
    }
}
