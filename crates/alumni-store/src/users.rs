//! Presence flags for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use alumni_shared::types::UserId;

use crate::database::{fmt_ts, parse_id, parse_ts, Database};
use crate::error::{not_found, Result};
use crate::models::User;

impl Database {
    /// Record a presence transition, creating the user row on first sight.
    pub fn set_presence(&self, user: UserId, online: bool, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, is_online, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET is_online = excluded.is_online,
                                           last_seen = excluded.last_seen",
            params![user.to_string(), online, fmt_ts(&at)],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, is_online, last_seen FROM users WHERE id = ?1",
                params![user.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Mark every user offline. Run at startup: no connection survives a restart.
    pub fn reset_presence(&self, at: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = 0, last_seen = ?1 WHERE is_online = 1",
            params![fmt_ts(&at)],
        )?;
        Ok(affected)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let is_online: bool = row.get(1)?;
    let last_seen: String = row.get(2)?;

    Ok(User {
        id: parse_id(0, &id)?,
        is_online,
        last_seen: parse_ts(2, &last_seen)?,
    })
}
