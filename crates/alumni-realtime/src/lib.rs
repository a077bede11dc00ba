//! # alumni-realtime
//!
//! Real-time messaging and presence core for the alumni portal.
//!
//! - **Presence** ([`presence`]): which users hold a live connection
//! - **Rooms** ([`rooms`]): direct/group membership, admin rights, room views
//! - **Messages** ([`messages`]): durable per-room log with receipts
//! - **Unread counters** ([`unread`]), **typing indicators** ([`typing`])
//! - **Receipts** ([`receipts`]): the sent → delivered → read state machine
//! - **Event hub** ([`hub`]): fan-out to personal, room and post channels
//! - **Feed relay** ([`feed`]): like/comment broadcasts for post viewers
//!
//! [`ChatService`] wires the components together and is what transports call.

pub mod error;
pub mod feed;
pub mod hub;
pub mod messages;
pub mod presence;
pub mod receipts;
pub mod rooms;
pub mod service;
pub mod typing;
pub mod unread;
pub mod views;

use std::sync::Arc;

use tokio::sync::Mutex;

pub use error::{ChatError, Result};
pub use hub::{Channel, EventHub};
pub use service::{ChatService, Session};

/// The store handle shared by every component. SQLite work is serialized
/// through this lock.
pub type SharedDatabase = Arc<Mutex<alumni_store::Database>>;
