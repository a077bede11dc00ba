//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use alumni_shared::types::{MessageId, MessageStatus, MessageType, RoomId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Presence mirror of a user. Profiles themselves live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub is_online: bool,
    /// Last connect or disconnect.
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A direct or group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub is_group: bool,
    /// Unique, in the order members were added.
    pub members: Vec<UserId>,
    /// Always a subset of `members`; empty for direct rooms.
    pub admins: Vec<UserId>,
    pub avatar_url: Option<String>,
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }

    /// Every member except `user`.
    pub fn others(&self, user: &UserId) -> impl Iterator<Item = &UserId> + '_ {
        let user = *user;
        self.members.iter().filter(move |m| **m != user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// New message fields, before the store assigns a sequence number.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message together with its receipts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Monotonic persistence order, the authoritative ordering within a room.
    pub seq: i64,
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub delivered_to: Vec<Receipt>,
    pub read_by: Vec<Receipt>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

impl ReceiptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// One recipient's delivery or read record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}
