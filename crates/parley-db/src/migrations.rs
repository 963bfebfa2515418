use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            avatar      TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id             INTEGER NOT NULL REFERENCES users(id),
            receiver_id           INTEGER NOT NULL REFERENCES users(id),
            content               TEXT NOT NULL,
            is_read               INTEGER NOT NULL DEFAULT 0,
            deleted_for_sender    INTEGER NOT NULL DEFAULT 0,
            deleted_for_receiver  INTEGER NOT NULL DEFAULT 0,
            reply_to_id           INTEGER REFERENCES messages(id),
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
