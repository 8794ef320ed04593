use crate::dom::TranscriptEntry;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const LAST_EMERGENCY: &str = "last_emergency";
pub const EMERGENCY_COUNT: &str = "emergency_count";
pub const EMERGENCY_BACKUP: &str = "emergency_backup";
pub const BACKUP_TIMESTAMP: &str = "backup_timestamp";
pub const SITE_STATUS: &str = "site_status";
pub const RELAY_STATS: &str = "relay_stats";

pub fn last_message_key(site: &str) -> String {
    format!("last_message/{}", site)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

pub fn site_alive_key(site: &str) -> String {
    format!("site_alive/{}", site)
}

/// Last time a site's tab was seen open by its monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAlive {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub tab_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    #[serde(default)]
    pub messages_relayed: u64,
    #[serde(default)]
    pub armed: bool,
}

// ========== Key/value state ==========

pub fn put_value<T: Serialize + ?Sized>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, json],
    )?;
    Ok(())
}

pub fn get_value<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM kv_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(json) => {
            let value = serde_json::from_str(&json)
                .with_context(|| format!("stored value for '{}' is not valid", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn save_last_message(conn: &Connection, site: &str, message: &LastMessage) -> Result<()> {
    put_value(conn, &last_message_key(site), message)
}

pub fn load_last_message(conn: &Connection, site: &str) -> Result<Option<LastMessage>> {
    get_value(conn, &last_message_key(site))
}

pub fn save_site_alive(conn: &Connection, site: &str, alive: &SiteAlive) -> Result<()> {
    put_value(conn, &site_alive_key(site), alive)
}

pub fn load_site_alive(conn: &Connection, site: &str) -> Result<Option<SiteAlive>> {
    get_value(conn, &site_alive_key(site))
}

pub fn load_relay_stats(conn: &Connection) -> Result<RelayStats> {
    Ok(get_value(conn, RELAY_STATS)?.unwrap_or_default())
}

pub fn increment_messages_relayed(conn: &Connection) -> Result<u64> {
    let mut stats = load_relay_stats(conn)?;
    stats.messages_relayed += 1;
    put_value(conn, RELAY_STATS, &stats)?;
    Ok(stats.messages_relayed)
}

pub fn set_armed(conn: &Connection, armed: bool) -> Result<()> {
    let mut stats = load_relay_stats(conn)?;
    stats.armed = armed;
    put_value(conn, RELAY_STATS, &stats)
}

// ========== Session transcripts ==========

/// Replace a site's stored transcript with `entries`.
pub fn replace_session(conn: &mut Connection, site: &str, entries: &[TranscriptEntry]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM session_messages WHERE site = ?1", params![site])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO session_messages (site, position, text, selector, observed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, entry) in entries.iter().enumerate() {
            stmt.execute(params![
                site,
                position as i64,
                entry.text,
                entry.selector,
                entry.timestamp
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn load_session(conn: &Connection, site: &str) -> Result<Vec<TranscriptEntry>> {
    let mut stmt = conn.prepare(
        "SELECT text, observed_at, selector FROM session_messages WHERE site = ?1 ORDER BY position",
    )?;
    let entries = stmt
        .query_map(params![site], |row| {
            Ok(TranscriptEntry {
                text: row.get(0)?,
                timestamp: row.get(1)?,
                selector: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn entry(text: &str) -> TranscriptEntry {
        TranscriptEntry {
            text: text.into(),
            timestamp: 1_700_000_000_000,
            selector: "div.msg".into(),
        }
    }

    #[test]
    fn values_round_trip_and_overwrite() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();

        assert_eq!(load_last_message(&conn, "claude").unwrap(), None);
        let first = LastMessage { text: "hi".into(), timestamp: 1 };
        let second = LastMessage { text: "there".into(), timestamp: 2 };
        save_last_message(&conn, "claude", &first).unwrap();
        save_last_message(&conn, "claude", &second).unwrap();

        assert_eq!(load_last_message(&conn, "claude").unwrap(), Some(second));
        assert_eq!(load_last_message(&conn, "gemini").unwrap(), None);
    }

    #[test]
    fn session_save_replaces_previous_rows() {
        let db = Database::in_memory().unwrap();
        let mut conn = db.lock().unwrap();

        replace_session(&mut conn, "gemini", &[entry("a"), entry("b"), entry("c")]).unwrap();
        replace_session(&mut conn, "gemini", &[entry("x"), entry("y")]).unwrap();
        replace_session(&mut conn, "claude", &[entry("other")]).unwrap();

        let texts: Vec<_> = load_session(&conn, "gemini")
            .unwrap()
            .into_iter()
            .map(|e| e.text)
            .collect();
        assert_eq!(texts, vec!["x", "y"]);
    }

    #[test]
    fn relay_stats_keep_armed_flag_across_increments() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();

        set_armed(&conn, true).unwrap();
        assert_eq!(increment_messages_relayed(&conn).unwrap(), 1);
        assert_eq!(increment_messages_relayed(&conn).unwrap(), 2);

        let stats = load_relay_stats(&conn).unwrap();
        assert!(stats.armed);
        assert_eq!(stats.messages_relayed, 2);
    }
}
