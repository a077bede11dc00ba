//! CRUD operations for [`Room`] records and their member/admin sets.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use alumni_shared::types::{MessageId, RoomId, UserId};

use crate::database::{fmt_ts, parse_id, parse_ts, Database};
use crate::error::{not_found, Result};
use crate::models::Room;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a room together with its members and admins.
    pub fn insert_room(&self, room: &Room) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO rooms (id, name, is_group, avatar_url, last_message_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                room.id.to_string(),
                room.name,
                room.is_group,
                room.avatar_url,
                room.last_message_id.map(|m| m.to_string()),
                fmt_ts(&room.created_at),
                fmt_ts(&room.updated_at),
            ],
        )?;

        for member in &room.members {
            tx.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
                params![room.id.to_string(), member.to_string()],
            )?;
        }
        for admin in &room.admins {
            tx.execute(
                "INSERT OR IGNORE INTO room_admins (room_id, user_id) VALUES (?1, ?2)",
                params![room.id.to_string(), admin.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single room with its member and admin sets.
    pub fn get_room(&self, id: RoomId) -> Result<Room> {
        let mut room = self
            .conn()
            .query_row(
                "SELECT id, name, is_group, avatar_url, last_message_id, created_at, updated_at
                 FROM rooms WHERE id = ?1",
                params![id.to_string()],
                row_to_room,
            )
            .map_err(not_found)?;

        room.members = self.user_set("SELECT user_id FROM room_members WHERE room_id = ?1 ORDER BY rowid", id)?;
        room.admins = self.user_set("SELECT user_id FROM room_admins WHERE room_id = ?1 ORDER BY rowid", id)?;
        Ok(room)
    }

    /// Find the non-group room whose member set is exactly `{a, b}`.
    pub fn find_direct_room(&self, a: UserId, b: UserId) -> Result<Option<Room>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT r.id FROM rooms r
                 WHERE r.is_group = 0
                   AND (SELECT COUNT(*) FROM room_members m WHERE m.room_id = r.id) = 2
                   AND EXISTS (SELECT 1 FROM room_members m WHERE m.room_id = r.id AND m.user_id = ?1)
                   AND EXISTS (SELECT 1 FROM room_members m WHERE m.room_id = r.id AND m.user_id = ?2)
                 ORDER BY r.created_at ASC
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(Some(self.get_room(parse_id(0, &id)?)?)),
            None => Ok(None),
        }
    }

    /// Rooms `user` belongs to, most recently active first.
    pub fn list_rooms_for_user(&self, user: UserId) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id FROM rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE m.user_id = ?1
             ORDER BY r.updated_at DESC",
        )?;

        let ids = stmt
            .query_map(params![user.to_string()], |row| {
                let id: String = row.get(0)?;
                parse_id::<RoomId>(0, &id)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.into_iter().map(|id| self.get_room(id)).collect()
    }

    pub fn is_member(&self, room: RoomId, user: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                params![room.to_string(), user.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Add members, skipping ids already present. Returns the ids actually added.
    pub fn add_room_members(&self, room: RoomId, users: &[UserId]) -> Result<Vec<UserId>> {
        let tx = self.conn().unchecked_transaction()?;
        let mut added = Vec::new();
        for user in users {
            let affected = tx.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
                params![room.to_string(), user.to_string()],
            )?;
            if affected > 0 {
                added.push(*user);
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Grant admin rights. Returns `false` if `user` already was an admin.
    pub fn add_room_admin(&self, room: RoomId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO room_admins (room_id, user_id) VALUES (?1, ?2)",
            params![room.to_string(), user.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Remove `user` from members and admins and drop their unread counter.
    /// Returns `true` if they were a member.
    ///
    /// Opens no transaction of its own: run it inside [`Database::atomically`]
    /// together with whatever else the removal implies.
    pub fn remove_room_member(&self, room: RoomId, user: UserId) -> Result<bool> {
        let (room, user) = (room.to_string(), user.to_string());
        let affected = self.conn().execute(
            "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            params![room, user],
        )?;
        for sql in [
            "DELETE FROM room_admins WHERE room_id = ?1 AND user_id = ?2",
            "DELETE FROM unread_counts WHERE room_id = ?1 AND user_id = ?2",
        ] {
            self.conn().execute(sql, params![room, user])?;
        }
        Ok(affected > 0)
    }

    /// Point the room at its newest message and bump its activity timestamp.
    pub fn touch_room(&self, room: RoomId, last_message: MessageId, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE rooms SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![last_message.to_string(), fmt_ts(&at), room.to_string()],
        )?;
        if affected == 0 {
            return Err(crate::StoreError::NotFound);
        }
        Ok(())
    }

    /// Bump the activity timestamp without changing the last message.
    pub fn set_room_updated(&self, room: RoomId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE rooms SET updated_at = ?1 WHERE id = ?2",
            params![fmt_ts(&at), room.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a room. Members, admins, counters, messages and receipts
    /// cascade. Returns `true` if a row was deleted.
    pub fn delete_room(&self, id: RoomId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM rooms WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn user_set(&self, sql: &str, room: RoomId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let users = stmt
            .query_map(params![room.to_string()], |row| {
                let id: String = row.get(0)?;
                parse_id::<UserId>(0, &id)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }
}

/// Map a `rusqlite::Row` to a [`Room`] with empty member sets.
fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let is_group: bool = row.get(2)?;
    let avatar_url: Option<String> = row.get(3)?;
    let last_message: Option<String> = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;

    Ok(Room {
        id: parse_id(0, &id)?,
        name,
        is_group,
        members: Vec::new(),
        admins: Vec::new(),
        avatar_url,
        last_message_id: last_message.map(|m| parse_id(4, &m)).transpose()?,
        created_at: parse_ts(5, &created)?,
        updated_at: parse_ts(6, &updated)?,
    })
}
