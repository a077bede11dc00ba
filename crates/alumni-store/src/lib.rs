//! # alumni-store
//!
//! Durable storage for chat rooms, messages, receipts, unread counters and
//! user presence, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers per table. Callers that
//! share it across tasks hold it behind an async mutex.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod receipts;
pub mod rooms;
pub mod unread;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
