//! v001 -- Initial schema creation.
//!
//! Creates the chat tables: `users`, `rooms`, `room_members`, `room_admins`,
//! `messages`, `message_receipts` and `unread_counts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (presence mirror; profiles live with the profile service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID issued by the auth server
    is_online  INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    last_seen  TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    name            TEXT NOT NULL,
    is_group        INTEGER NOT NULL DEFAULT 0,
    avatar_url      TEXT,
    last_message_id TEXT,                       -- no FK: messages reference rooms
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rooms_updated ON rooms(updated_at DESC);

-- Insertion order (rowid) is the member order.
CREATE TABLE IF NOT EXISTS room_members (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_room_members_user ON room_members(user_id);

CREATE TABLE IF NOT EXISTS room_admins (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,  -- persistence order
    id           TEXT UNIQUE NOT NULL,               -- UUID v4
    room_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    text         TEXT,
    media_url    TEXT,
    message_type TEXT NOT NULL DEFAULT 'text',
    status       TEXT NOT NULL DEFAULT 'sent',
    created_at   TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_seq ON messages(room_id, seq DESC);

-- One delivery and one read record per (message, user).
CREATE TABLE IF NOT EXISTS message_receipts (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,                 -- 'delivered' | 'read'
    at         TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id, kind),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Unread counters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS unread_counts (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    count   INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
