//! `taskboard-server` library.
//!
//! Exposes the reference task store for use in tests and embedding. The
//! server accepts WebSocket connections, answers store calls against one
//! task table, and fans changes out to owner-filtered feeds.

pub mod config;
pub mod server;
