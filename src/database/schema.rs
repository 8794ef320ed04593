use anyhow::Result;
use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS session_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site TEXT NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            selector TEXT NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_session_messages_site
            ON session_messages (site, position);
        ",
    )?;
    Ok(())
}
