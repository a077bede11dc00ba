//! Per-recipient delivery state and the room-visible aggregate.
//!
//! Each (message, recipient) pair moves `absent → delivered → read` and never
//! back. A read record always comes with a delivery record. The aggregate is
//! a pure function of the receipt sets and the room's current members.

use alumni_shared::types::{MessageStatus, UserId};
use alumni_store::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecipientState {
    Absent,
    Delivered,
    Read,
}

pub fn recipient_state(message: &Message, user: &UserId) -> RecipientState {
    if message.read_by.iter().any(|r| r.user_id == *user) {
        RecipientState::Read
    } else if message.delivered_to.iter().any(|r| r.user_id == *user) {
        RecipientState::Delivered
    } else {
        RecipientState::Absent
    }
}

/// `read` when every member other than the sender has read, else `delivered`
/// when at least one has received it, else `sent`. With no other members the
/// message counts as read.
pub fn aggregate_status(message: &Message, members: &[UserId]) -> MessageStatus {
    let states: Vec<RecipientState> = members
        .iter()
        .filter(|m| **m != message.sender)
        .map(|m| recipient_state(message, m))
        .collect();

    if states.iter().all(|s| *s == RecipientState::Read) {
        MessageStatus::Read
    } else if states.iter().any(|s| *s >= RecipientState::Delivered) {
        MessageStatus::Delivered
    } else {
        MessageStatus::Sent
    }
}
