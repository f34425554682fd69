//! `taskboard` client library: a task collection kept live against a remote
//! task store.

pub mod config;
pub mod gateway;
pub mod sync;
