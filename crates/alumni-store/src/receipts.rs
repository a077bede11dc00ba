//! Delivery and read records, unique per (message, user, kind).

use chrono::{DateTime, Utc};
use rusqlite::params;

use alumni_shared::types::{MessageId, UserId};

use crate::database::{fmt_ts, parse_id, parse_ts, Database};
use crate::error::Result;
use crate::models::{Receipt, ReceiptKind};

impl Database {
    /// Append a receipt if absent. Returns `true` when a new record was written.
    pub fn insert_receipt(
        &self,
        message: MessageId,
        user: UserId,
        kind: ReceiptKind,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_receipts (message_id, user_id, kind, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message.to_string(), user.to_string(), kind.as_str(), fmt_ts(&at)],
        )?;
        Ok(affected > 0)
    }

    /// Receipts of one kind for a message, oldest first.
    pub fn receipts_for(&self, message: MessageId, kind: ReceiptKind) -> Result<Vec<Receipt>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT user_id, at FROM message_receipts
             WHERE message_id = ?1 AND kind = ?2
             ORDER BY at ASC",
        )?;

        let receipts = stmt
            .query_map(params![message.to_string(), kind.as_str()], |row| {
                let user: String = row.get(0)?;
                let at: String = row.get(1)?;
                Ok(Receipt {
                    user_id: parse_id(0, &user)?,
                    at: parse_ts(1, &at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(receipts)
    }
}
