//! Append-only message log.

use rusqlite::params;

use alumni_shared::types::{MessageId, MessageStatus, MessageType, RoomId, UserId};

use crate::database::{fmt_ts, parse_enum, parse_id, parse_ts, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{Message, NewMessage, ReceiptKind};

const MESSAGE_COLUMNS: &str =
    "seq, id, room_id, sender_id, text, media_url, message_type, status, created_at";

impl Database {
    /// Persist a new message with status `sent` and no receipts.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        self.conn().execute(
            "INSERT INTO messages (id, room_id, sender_id, text, media_url, message_type, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.id.to_string(),
                new.room_id.to_string(),
                new.sender.to_string(),
                new.text,
                new.media_url,
                new.message_type.as_str(),
                MessageStatus::Sent.as_str(),
                fmt_ts(&new.created_at),
            ],
        )?;

        Ok(Message {
            seq: self.conn().last_insert_rowid(),
            id: new.id,
            room_id: new.room_id,
            sender: new.sender,
            text: new.text.clone(),
            media_url: new.media_url.clone(),
            message_type: new.message_type,
            status: MessageStatus::Sent,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            created_at: new.created_at,
        })
    }

    /// Insert a message, point its room at it and bump each recipient's
    /// unread counter in a single transaction.
    pub fn post_message(&self, new: &NewMessage, recipients: &[UserId]) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;
        let message = self.insert_message(new)?;
        self.touch_room(new.room_id, new.id, new.created_at)?;
        for user in recipients {
            self.increment_unread(new.room_id, *user)?;
        }
        tx.commit()?;
        Ok(message)
    }

    /// Fetch one message with its receipts.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)?;
        self.attach_receipts(&mut message)?;
        Ok(message)
    }

    /// A page of a room's messages, newest first.
    pub fn list_messages(&self, room: RoomId, limit: u32, offset: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE room_id = ?1
             ORDER BY seq DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let mut messages = stmt
            .query_map(params![room.to_string(), limit, offset], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for message in &mut messages {
            self.attach_receipts(message)?;
        }
        Ok(messages)
    }

    /// Ids of messages in `room` authored by someone other than `user` that
    /// carry no `kind` receipt from `user`, in persistence order.
    pub fn messages_missing_receipt(
        &self,
        room: RoomId,
        user: UserId,
        kind: ReceiptKind,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id FROM messages m
             WHERE m.room_id = ?1
               AND m.sender_id != ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?2 AND r.kind = ?3
               )
             ORDER BY m.seq ASC",
        )?;

        let ids = stmt
            .query_map(
                params![room.to_string(), user.to_string(), kind.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    parse_id::<MessageId>(0, &id)
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn set_message_status(&self, id: MessageId, status: MessageStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn count_messages(&self, room: RoomId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
            params![room.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn attach_receipts(&self, message: &mut Message) -> Result<()> {
        message.delivered_to = self.receipts_for(message.id, ReceiptKind::Delivered)?;
        message.read_by = self.receipts_for(message.id, ReceiptKind::Read)?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let seq: i64 = row.get(0)?;
    let id: String = row.get(1)?;
    let room_id: String = row.get(2)?;
    let sender: String = row.get(3)?;
    let text: Option<String> = row.get(4)?;
    let media_url: Option<String> = row.get(5)?;
    let message_type: String = row.get(6)?;
    let status: String = row.get(7)?;
    let created: String = row.get(8)?;

    Ok(Message {
        seq,
        id: parse_id(1, &id)?,
        room_id: parse_id(2, &room_id)?,
        sender: parse_id(3, &sender)?,
        text,
        media_url,
        message_type: parse_enum(6, &message_type, MessageType::parse)?,
        status: parse_enum(7, &status, MessageStatus::parse)?,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        created_at: parse_ts(8, &created)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rooms::tests::room_with;
    use chrono::Utc;

    pub(crate) fn new_message(room: RoomId, sender: UserId, text: &str) -> NewMessage {
        NewMessage {
            id: MessageId::new(),
            room_id: room,
            sender,
            text: Some(text.to_string()),
            media_url: None,
            message_type: MessageType::Text,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sequence_defines_order() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let room = room_with(&[a, b], false);
        db.insert_room(&room).unwrap();

        let first = db.insert_message(&new_message(room.id, a, "one")).unwrap();
        let second = db.insert_message(&new_message(room.id, b, "two")).unwrap();
        assert!(second.seq > first.seq);

        let page = db.list_messages(room.id, 10, 0).unwrap();
        assert_eq!(page[0].id, second.id);
        assert_eq!(page[1].id, first.id);

        let offset = db.list_messages(room.id, 1, 1).unwrap();
        assert_eq!(offset.len(), 1);
        assert_eq!(offset[0].id, first.id);
    }

    #[test]
    fn post_message_updates_room_and_counters() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let room = room_with(&[a, b, c], true);
        db.insert_room(&room).unwrap();

        let posted = db.post_message(&new_message(room.id, a, "hey"), &[b, c]).unwrap();

        let loaded = db.get_room(room.id).unwrap();
        assert_eq!(loaded.last_message_id, Some(posted.id));
        assert_eq!(db.get_unread(room.id, b).unwrap(), 1);
        assert_eq!(db.get_unread(room.id, c).unwrap(), 1);
        assert_eq!(db.get_unread(room.id, a).unwrap(), 0);
    }

    #[test]
    fn post_message_to_missing_room_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let ghost = RoomId::new();

        assert!(db.post_message(&new_message(ghost, a, "lost"), &[]).is_err());
        assert_eq!(db.count_messages(ghost).unwrap(), 0);
    }

    #[test]
    fn get_message_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let room = room_with(&[a], true);
        db.insert_room(&room).unwrap();

        let stored = db.insert_message(&new_message(room.id, a, "hi")).unwrap();
        let loaded = db.get_message(stored.id).unwrap();
        assert_eq!(loaded.text.as_deref(), Some("hi"));
        assert_eq!(loaded.status, MessageStatus::Sent);
        assert!(matches!(db.get_message(MessageId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn missing_receipts_exclude_own_messages() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let room = room_with(&[a, b], false);
        db.insert_room(&room).unwrap();

        let from_a = db.insert_message(&new_message(room.id, a, "x")).unwrap();
        db.insert_message(&new_message(room.id, b, "y")).unwrap();

        let pending = db
            .messages_missing_receipt(room.id, b, ReceiptKind::Delivered)
            .unwrap();
        assert_eq!(pending, vec![from_a.id]);
    }

    #[test]
    fn deleting_room_cascades_messages() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let room = room_with(&[a], true);
        db.insert_room(&room).unwrap();
        db.insert_message(&new_message(room.id, a, "bye")).unwrap();
        assert_eq!(db.count_messages(room.id).unwrap(), 1);

        db.delete_room(room.id).unwrap();
        assert_eq!(db.count_messages(room.id).unwrap(), 0);
    }
}
