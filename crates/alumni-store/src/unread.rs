//! Per-(room, user) unread counters.
//!
//! Every mutation is a single SQL statement, so concurrent senders never lose
//! an increment to a read-modify-write race.

use rusqlite::{params, OptionalExtension};

use alumni_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// `count += 1`, creating the row at 1 when absent.
    pub fn increment_unread(&self, room: RoomId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO unread_counts (room_id, user_id, count) VALUES (?1, ?2, 1)
             ON CONFLICT(room_id, user_id) DO UPDATE SET count = count + 1",
            params![room.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    pub fn reset_unread(&self, room: RoomId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO unread_counts (room_id, user_id, count) VALUES (?1, ?2, 0)
             ON CONFLICT(room_id, user_id) DO UPDATE SET count = 0",
            params![room.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    /// Current counter, 0 when never incremented.
    pub fn get_unread(&self, room: RoomId, user: UserId) -> Result<u32> {
        let count: Option<u32> = self
            .conn()
            .query_row(
                "SELECT count FROM unread_counts WHERE room_id = ?1 AND user_id = ?2",
                params![room.to_string(), user.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}
