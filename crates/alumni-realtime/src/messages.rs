//! Durable per-room message log and receipt bookkeeping.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use alumni_shared::constants::{MAX_MESSAGE_TEXT_LEN, MAX_PAGE_SIZE};
use alumni_shared::types::{MediaRef, MessageId, MessageType, RoomId, UserId};
use alumni_store::{Database, Message, NewMessage, ReceiptKind, Room, StoreError};

use crate::error::{ChatError, Result};
use crate::receipts::aggregate_status;
use crate::SharedDatabase;

/// Client-supplied content of a new message.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: Option<String>,
    pub media: Option<MediaRef>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            media: None,
        }
    }
}

/// A freshly appended message and its room after the update.
#[derive(Debug, Clone)]
pub struct Posted {
    pub message: Message,
    pub room: Room,
}

/// Messages that gained a read record in one `mark_read` call.
#[derive(Debug, Clone)]
pub struct ReadBatch {
    pub read_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct MessageStore {
    db: SharedDatabase,
}

impl MessageStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Validate and persist a message from `sender`, then bump the room and
    /// every other member's unread counter in the same transaction.
    pub async fn append(&self, sender: UserId, room_id: RoomId, draft: Draft) -> Result<Posted> {
        let text = draft
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if text.is_none() && draft.media.is_none() {
            return Err(ChatError::BadRequest("Message must have text or media".into()));
        }
        if let Some(text) = &text {
            if text.chars().count() > MAX_MESSAGE_TEXT_LEN {
                return Err(ChatError::BadRequest(format!(
                    "Message text exceeds {MAX_MESSAGE_TEXT_LEN} characters"
                )));
            }
        }

        let message_type = draft
            .media
            .as_ref()
            .map(|m| m.kind)
            .unwrap_or(MessageType::Text);

        let db = self.db.lock().await;
        let room = load_room(&db, room_id)?;
        if !room.is_member(&sender) {
            return Err(ChatError::Forbidden("Not a member of this room".into()));
        }

        let new = NewMessage {
            id: MessageId::new(),
            room_id,
            sender,
            text,
            media_url: draft.media.map(|m| m.url),
            message_type,
            created_at: Utc::now(),
        };
        let recipients: Vec<UserId> = room.others(&sender).copied().collect();
        let message = db.post_message(&new, &recipients)?;
        let room = db.get_room(room_id)?;

        info!(
            room = %room_id,
            sender = %sender,
            message = %message.id,
            seq = message.seq,
            kind = message_type.as_str(),
            "Message appended"
        );

        Ok(Posted { message, room })
    }

    /// One page of history, oldest first within the page. Pages count from 1
    /// at the newest end; `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list_page(
        &self,
        user: UserId,
        room_id: RoomId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>> {
        let size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = page.max(1).saturating_sub(1).saturating_mul(size);

        let db = self.db.lock().await;
        let room = load_room(&db, room_id)?;
        if !room.is_member(&user) {
            return Err(ChatError::Forbidden("Not a member of this room".into()));
        }

        let mut messages = db.list_messages(room_id, size, offset)?;
        messages.reverse();
        Ok(messages)
    }

    /// Record delivery to `user` of every foreign message still lacking one.
    /// Returns the ids that gained a record, in persistence order.
    pub async fn mark_delivered(&self, user: UserId, room_id: RoomId) -> Result<Vec<MessageId>> {
        let now = Utc::now();
        let db = self.db.lock().await;
        let room = load_room(&db, room_id)?;
        if !room.is_member(&user) {
            return Err(ChatError::Forbidden("Not a member of this room".into()));
        }

        let delivered = db.atomically(|db| -> Result<Vec<MessageId>> {
            let pending = db.messages_missing_receipt(room_id, user, ReceiptKind::Delivered)?;
            for id in &pending {
                db.insert_receipt(*id, user, ReceiptKind::Delivered, now)?;
                refresh_status(db, *id, &room.members)?;
            }
            Ok(pending)
        })?;

        if !delivered.is_empty() {
            debug!(room = %room_id, user = %user, count = delivered.len(), "Marked delivered");
        }
        Ok(delivered)
    }

    /// Record that `user` read `ids`. Ids from other rooms, unknown ids and the
    /// user's own messages are skipped. The user's unread counter is reset.
    pub async fn mark_read(&self, user: UserId, room_id: RoomId, ids: &[MessageId]) -> Result<ReadBatch> {
        let read_at = Utc::now();
        let db = self.db.lock().await;
        let room = load_room(&db, room_id)?;
        if !room.is_member(&user) {
            return Err(ChatError::Forbidden("Not a member of this room".into()));
        }

        let messages = db.atomically(|db| -> Result<Vec<Message>> {
            let mut updated = Vec::new();
            for id in ids {
                let message = match db.get_message(*id) {
                    Ok(m) => m,
                    Err(StoreError::NotFound) => continue,
                    Err(e) => return Err(e.into()),
                };
                if message.room_id != room_id || message.sender == user {
                    continue;
                }

                db.insert_receipt(*id, user, ReceiptKind::Delivered, read_at)?;
                if db.insert_receipt(*id, user, ReceiptKind::Read, read_at)? {
                    updated.push(refresh_status(db, *id, &room.members)?);
                }
            }
            db.reset_unread(room_id, user)?;
            Ok(updated)
        })?;

        debug!(room = %room_id, user = %user, count = messages.len(), "Marked read");
        Ok(ReadBatch { read_at, messages })
    }
}

fn load_room(db: &Database, room: RoomId) -> Result<Room> {
    db.get_room(room).map_err(|e| match e {
        StoreError::NotFound => ChatError::NotFound("Room not found".into()),
        other => other.into(),
    })
}

/// Recompute and store the aggregate status. Returns the refreshed message.
fn refresh_status(db: &Database, id: MessageId, members: &[UserId]) -> Result<Message> {
    let mut message = db.get_message(id)?;
    let status = aggregate_status(&message, members);
    if status != message.status {
        db.set_message_status(id, status)?;
        message.status = status;
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alumni_shared::types::MessageStatus;
    use tokio::sync::Mutex;

    async fn setup(members: &[UserId], is_group: bool) -> (MessageStore, SharedDatabase, RoomId) {
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            name: "room".into(),
            is_group,
            members: members.to_vec(),
            admins: if is_group { vec![members[0]] } else { Vec::new() },
            avatar_url: None,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        let db = Database::open_in_memory().unwrap();
        db.insert_room(&room).unwrap();
        let db = Arc::new(Mutex::new(db));
        (MessageStore::new(db.clone()), db, room.id)
    }

    #[tokio::test]
    async fn test_append_validates_content() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, _db, room) = setup(&[a, b], false).await;

        let empty = store.append(a, room, Draft::text("   ")).await;
        assert!(matches!(empty, Err(ChatError::BadRequest(_))));

        let long = store.append(a, room, Draft::text("x".repeat(1001))).await;
        assert!(matches!(long, Err(ChatError::BadRequest(_))));

        let max = store.append(a, room, Draft::text("x".repeat(1000))).await;
        assert!(max.is_ok());

        let posted = store.append(a, room, Draft::text("  hi  ")).await.unwrap();
        assert_eq!(posted.message.text.as_deref(), Some("hi"));
        assert_eq!(posted.message.status, MessageStatus::Sent);
        assert_eq!(posted.room.last_message_id, Some(posted.message.id));
    }

    #[tokio::test]
    async fn test_append_media_only() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, _db, room) = setup(&[a, b], false).await;

        let draft = Draft {
            text: None,
            media: Some(MediaRef::from_url("/media/abc.png")),
        };
        let posted = store.append(a, room, draft).await.unwrap();
        assert_eq!(posted.message.message_type, MessageType::Image);
        assert!(posted.message.text.is_none());
    }

    #[tokio::test]
    async fn test_append_checks_room_and_membership() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, _db, room) = setup(&[a, b], false).await;

        let missing = store.append(a, RoomId::new(), Draft::text("hi")).await;
        assert!(matches!(missing, Err(ChatError::NotFound(_))));

        let outsider = store.append(UserId::new(), room, Draft::text("hi")).await;
        assert!(matches!(outsider, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_unread_counts_follow_sends() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let (store, db, room) = setup(&[a, b, c], true).await;

        for i in 0..3 {
            store.append(a, room, Draft::text(format!("m{i}"))).await.unwrap();
        }

        let db = db.lock().await;
        assert_eq!(db.get_unread(room, a).unwrap(), 0);
        assert_eq!(db.get_unread(room, b).unwrap(), 3);
        assert_eq!(db.get_unread(room, c).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_paging_is_oldest_first_within_page() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, _db, room) = setup(&[a, b], false).await;
        for i in 0..5 {
            store.append(a, room, Draft::text(format!("m{i}"))).await.unwrap();
        }

        let texts = |page: Vec<Message>| -> Vec<String> {
            page.into_iter().filter_map(|m| m.text).collect()
        };

        let newest = store.list_page(b, room, 1, 2).await.unwrap();
        assert_eq!(texts(newest), vec!["m3", "m4"]);

        let older = store.list_page(b, room, 2, 2).await.unwrap();
        assert_eq!(texts(older), vec!["m1", "m2"]);

        let last = store.list_page(b, room, 3, 2).await.unwrap();
        assert_eq!(texts(last), vec!["m0"]);

        assert!(store.list_page(b, room, 4, 2).await.unwrap().is_empty());

        let outsider = store.list_page(UserId::new(), room, 1, 2).await;
        assert!(matches!(outsider, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_direct_delivery_and_read() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, db, room) = setup(&[a, b], false).await;
        let posted = store.append(a, room, Draft::text("hello")).await.unwrap();

        assert_eq!(store.mark_delivered(a, room).await.unwrap(), Vec::<MessageId>::new());
        assert_eq!(store.mark_delivered(b, room).await.unwrap(), vec![posted.message.id]);
        assert!(store.mark_delivered(b, room).await.unwrap().is_empty());
        assert_eq!(
            db.lock().await.get_message(posted.message.id).unwrap().status,
            MessageStatus::Delivered
        );

        let batch = store.mark_read(b, room, &[posted.message.id]).await.unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].status, MessageStatus::Read);
        assert_eq!(db.lock().await.get_unread(room, b).unwrap(), 0);

        let again = store.mark_read(b, room, &[posted.message.id]).await.unwrap();
        assert!(again.messages.is_empty());
    }

    #[tokio::test]
    async fn test_read_without_delivery_implies_delivery() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let (store, _db, room) = setup(&[a, b, c], true).await;
        let posted = store.append(a, room, Draft::text("hi all")).await.unwrap();

        let batch = store.mark_read(b, room, &[posted.message.id]).await.unwrap();
        let message = &batch.messages[0];
        assert!(message.delivered_to.iter().any(|r| r.user_id == b));
        assert_eq!(message.status, MessageStatus::Delivered);

        let batch = store.mark_read(c, room, &[posted.message.id]).await.unwrap();
        assert_eq!(batch.messages[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn test_mark_read_skips_foreign_ids() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, _db, room) = setup(&[a, b], false).await;
        let (other_store, _other_db, other_room) = setup(&[a, b], false).await;
        let own = store.append(b, room, Draft::text("mine")).await.unwrap();
        let elsewhere = other_store.append(a, other_room, Draft::text("x")).await.unwrap();

        let batch = store
            .mark_read(b, room, &[own.message.id, elsewhere.message.id, MessageId::new()])
            .await
            .unwrap();
        assert!(batch.messages.is_empty());

        let outsider = store.mark_read(UserId::new(), room, &[]).await;
        assert!(matches!(outsider, Err(ChatError::Forbidden(_))));
    }
}
