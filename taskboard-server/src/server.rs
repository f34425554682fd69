//! Store server core: shared state, WebSocket handler, and change fan-out.
//!
//! The server owns one [`TaskTable`]. Each connection may issue store calls
//! and open any number of change feeds, each filtered to one owner. Every
//! successful mutation is published to the matching feeds of every
//! connection before the caller's response is queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use taskboard_proto::failure::Failure;
use taskboard_proto::row::ChangeEvent;
use taskboard_proto::table::TaskTable;
use taskboard_proto::task::Task;
use taskboard_proto::wire::{self, CallResult, ClientFrame, ServerFrame, StoreCall};

use crate::config::ServerConfig;

/// Identifies one WebSocket connection.
pub type ConnectionId = u64;

/// One connected client.
struct Connection {
    /// Channel to the connection's writer task.
    sender: mpsc::UnboundedSender<Message>,
    /// Open feeds: subscription id to owner filter.
    subscriptions: HashMap<u64, String>,
}

/// Shared server state holding the task table and the connection registry.
pub struct StoreState {
    table: Mutex<TaskTable>,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_connection: AtomicU64,
    /// When set, feeds ignore their owner filter.
    unfiltered_feed: AtomicBool,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    /// Creates a state over an empty table with the full schema.
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(TaskTable::new())
    }

    /// Creates a state over an empty table lacking the optional column.
    #[must_use]
    pub fn legacy() -> Self {
        Self::with_table(TaskTable::legacy())
    }

    /// Creates a state over an existing table.
    #[must_use]
    pub fn with_table(table: TaskTable) -> Self {
        Self {
            table: Mutex::new(table),
            connections: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            unfiltered_feed: AtomicBool::new(false),
        }
    }

    /// Creates a state from the resolved server configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        let state = if config.legacy_schema {
            Self::legacy()
        } else {
            Self::new()
        };
        state.set_unfiltered_feed(config.unfiltered_feed);
        state
    }

    /// Makes feeds deliver every event regardless of owner.
    pub fn set_unfiltered_feed(&self, unfiltered: bool) {
        self.unfiltered_feed.store(unfiltered, Ordering::Release);
    }

    /// Inserts a row directly, publishing the insert like any mutation.
    pub fn seed(&self, task: Task) {
        let mut table = self.table.lock();
        let event = table.insert_row(task);
        self.publish(&event);
    }

    /// Number of rows in the table.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Number of open feeds across all connections.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .map(|c| c.subscriptions.len())
            .sum()
    }

    /// Registers a connection's writer channel.
    pub fn register(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(
            id,
            Connection {
                sender,
                subscriptions: HashMap::new(),
            },
        );
        id
    }

    /// Removes a connection and every feed it opened.
    pub fn unregister(&self, connection: ConnectionId) {
        if let Some(conn) = self.connections.lock().remove(&connection)
            && !conn.subscriptions.is_empty()
        {
            tracing::debug!(
                connection,
                feeds = conn.subscriptions.len(),
                "dropping feeds of closed connection"
            );
        }
    }

    /// Opens a feed for `owner_id` on a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Unauthorized`] for an empty owner and
    /// [`Failure::Transport`] if the connection is gone.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        subscription: u64,
        owner_id: &str,
    ) -> Result<(), Failure> {
        if owner_id.is_empty() {
            return Err(Failure::Unauthorized);
        }
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&connection)
            .ok_or_else(|| Failure::transport("connection closed"))?;
        conn.subscriptions.insert(subscription, owner_id.to_string());
        tracing::debug!(connection, subscription, owner_id, "feed opened");
        Ok(())
    }

    /// Closes a feed. Unknown ids are ignored.
    pub fn unsubscribe(&self, connection: ConnectionId, subscription: u64) {
        let removed = self
            .connections
            .lock()
            .get_mut(&connection)
            .and_then(|c| c.subscriptions.remove(&subscription));
        if removed.is_some() {
            tracing::debug!(connection, subscription, "feed closed");
        }
    }

    /// Runs one store call against the table.
    pub fn execute(&self, call: StoreCall) -> CallResult {
        let outcome = match call {
            StoreCall::PullTasks { owner_id, columns } => self
                .table
                .lock()
                .pull(&owner_id, columns)
                .map(|rows| CallResult::Rows { rows }),
            StoreCall::CreateTask {
                owner_id,
                task,
                columns,
            } => self.mutate(|table| {
                let (id, event) = table.create(&owner_id, task, columns)?;
                Ok((CallResult::Created { id }, Some(event)))
            }),
            StoreCall::UpdateTask {
                owner_id,
                id,
                patch,
                columns,
            } => self.mutate(|table| table.update(&owner_id, &id, &patch, columns).map(applied)),
            StoreCall::MoveTask {
                owner_id,
                id,
                status,
            } => self.mutate(|table| table.move_task(&owner_id, &id, status).map(applied)),
            StoreCall::DeleteTask { owner_id, id } => {
                self.mutate(|table| table.delete(&owner_id, &id).map(applied))
            }
        };
        outcome.unwrap_or_else(|failure| {
            tracing::debug!(failure = %failure, "store call rejected");
            CallResult::Failed { failure }
        })
    }

    /// Applies a mutation and publishes its event while the table is locked,
    /// so every feed sees events in table order.
    fn mutate(
        &self,
        f: impl FnOnce(&mut TaskTable) -> Result<(CallResult, Option<ChangeEvent>), Failure>,
    ) -> Result<CallResult, Failure> {
        let mut table = self.table.lock();
        let (result, event) = f(&mut table)?;
        if let Some(event) = event {
            self.publish(&event);
        }
        drop(table);
        Ok(result)
    }

    fn publish(&self, event: &ChangeEvent) {
        let unfiltered = self.unfiltered_feed.load(Ordering::Acquire);
        let connections = self.connections.lock();
        for (connection, conn) in connections.iter() {
            for (subscription, owner) in &conn.subscriptions {
                if !unfiltered && !event.owners().any(|o| o == owner) {
                    continue;
                }
                let frame = ServerFrame::Change {
                    subscription: *subscription,
                    event: event.clone(),
                };
                match wire::encode(&frame) {
                    Ok(text) => {
                        let _ = conn.sender.send(Message::Text(text.into()));
                    }
                    Err(e) => {
                        tracing::error!(connection, subscription, error = %e, "failed to encode change");
                    }
                }
            }
        }
    }

    /// Send a WebSocket Close frame to every connected client.
    pub fn close_all_connections(&self) {
        let connections = self.connections.lock();
        for (connection, conn) in connections.iter() {
            tracing::info!(connection, "sending close frame to client");
            let _ = conn.sender.send(Message::Close(None));
        }
    }
}

fn applied(event: Option<ChangeEvent>) -> (CallResult, Option<ChangeEvent>) {
    (
        CallResult::Applied {
            applied: event.is_some(),
        },
        event,
    )
}

/// Handles an upgraded WebSocket connection for a single client.
pub async fn handle_socket(socket: WebSocket, state: Arc<StoreState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.register(tx.clone());
    tracing::info!(connection, "client connected");

    // Writer task: forwards queued frames to the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(connection, text.as_str(), &reader_state, &tx);
                }
                Message::Close(_) => {
                    tracing::info!(connection, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(connection);
    tracing::info!(connection, "client disconnected");
}

/// Handles one text frame from a client.
///
/// Undecodable frames are answered with [`ServerFrame::Error`] and the
/// connection stays open. A rejected subscribe is answered with a failed
/// response carrying the subscription id.
fn handle_text_frame(
    connection: ConnectionId,
    text: &str,
    state: &StoreState,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let frame = match wire::decode::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection, error = %e, "failed to decode client frame");
            send_frame(
                tx,
                &ServerFrame::Error {
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    let reply = match frame {
        ClientFrame::Request { id, call } => {
            tracing::debug!(connection, request = id, "store call");
            ServerFrame::Response {
                id,
                result: state.execute(call),
            }
        }
        ClientFrame::Subscribe {
            subscription,
            owner_id,
        } => match state.subscribe(connection, subscription, &owner_id) {
            Ok(()) => ServerFrame::Subscribed { subscription },
            Err(failure) => {
                tracing::warn!(connection, subscription, failure = %failure, "subscribe rejected");
                ServerFrame::Response {
                    id: subscription,
                    result: CallResult::Failed { failure },
                }
            }
        },
        ClientFrame::Unsubscribe { subscription } => {
            state.unsubscribe(connection, subscription);
            return;
        }
    };
    send_frame(tx, &reply);
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    match wire::encode(frame) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode server frame"),
    }
}

/// Starts the store server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(StoreState::new())).await
}

/// Starts the store server with a pre-configured [`StoreState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<StoreState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "store server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<StoreState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
