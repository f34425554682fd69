//! Shared task model and wire protocol for the task board.
//!
//! Used by the `taskboard` client and the `taskboard-server` reference store.

pub mod column;
pub mod failure;
pub mod row;
pub mod table;
pub mod task;
pub mod wire;
