//! v001 -- Initial schema creation.
//!
//! Creates `profiles`, `messages` and `webhook_events`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles (one per identity-provider user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    user_id             TEXT PRIMARY KEY NOT NULL,  -- UUID
    nickname            TEXT,
    openai_thread_id    TEXT,
    subscription_active INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    created_at          TEXT NOT NULL,              -- RFC-3339, micros
    updated_at          TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages (append-only apart from is_deleted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT, -- insertion order, breaks created_at ties
    id         TEXT UNIQUE NOT NULL,              -- UUID v4
    thread_id  TEXT NOT NULL,                     -- equals the owner's user_id
    user_id    TEXT NOT NULL,                     -- FK -> profiles(user_id)
    sender     TEXT NOT NULL,                     -- 'user' | 'assistant'
    type       TEXT NOT NULL,                     -- text | audio | image | video | document
    content    TEXT NOT NULL,                     -- text, or label for attachments
    media_url  TEXT,
    client_ref TEXT,                              -- client temporary id echo
    created_at TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (user_id) REFERENCES profiles(user_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_thread_ts
    ON messages(thread_id, created_at, seq);

-- ----------------------------------------------------------------
-- Webhook events (processor forward audit trail)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS webhook_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    direction   TEXT NOT NULL,                    -- 'outbound' | 'inbound'
    user_id     TEXT,
    payload     TEXT NOT NULL,                    -- JSON
    status_code INTEGER NOT NULL,                 -- 0 = transport failure
    error       TEXT,
    created_at  TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
