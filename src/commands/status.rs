use crate::browser::chrome;
use crate::config::RelayConfig;
use crate::database::{queries, Database};
use crate::relay::journal::JournalEntry;
use crate::relay::state::SiteStatus;
use crate::sites;
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

const WATCH_EVERY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteLine {
    pub name: String,
    pub status: SiteStatus,
    pub alive_at: Option<DateTime<Utc>>,
}

/// What the daemon last wrote to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub chrome_ready: bool,
    pub sites: Vec<SiteLine>,
    pub armed: bool,
    pub messages_relayed: u64,
    pub emergency_count: usize,
    pub last_emergency: Option<String>,
    pub last_backup: Option<DateTime<Utc>>,
}

pub fn read_status(conn: &Connection, chrome_ready: bool) -> Result<StatusView> {
    let labels: BTreeMap<String, SiteStatus> =
        queries::get_value(conn, queries::SITE_STATUS)?.unwrap_or_default();
    let mut sites = Vec::new();
    for site in sites::all_sites() {
        let alive = queries::load_site_alive(conn, site.key)?;
        sites.push(SiteLine {
            name: site.name.to_string(),
            status: labels.get(site.key).copied().unwrap_or(SiteStatus::Missing),
            alive_at: alive.and_then(|stamp| Utc.timestamp_millis_opt(stamp.timestamp).single()),
        });
    }

    let stats = queries::load_relay_stats(conn)?;
    let last_emergency: Option<JournalEntry> = queries::get_value(conn, queries::LAST_EMERGENCY)?;
    let last_backup: Option<i64> = queries::get_value(conn, queries::BACKUP_TIMESTAMP)?;

    Ok(StatusView {
        chrome_ready,
        sites,
        armed: stats.armed,
        messages_relayed: stats.messages_relayed,
        emergency_count: queries::get_value(conn, queries::EMERGENCY_COUNT)?.unwrap_or(0),
        last_emergency: last_emergency.map(|entry| entry.message),
        last_backup: last_backup.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    })
}

pub fn render(view: &StatusView) -> String {
    let mut out = String::new();
    let chrome = if view.chrome_ready { "reachable" } else { "not reachable" };
    let _ = writeln!(out, "Chrome:           {}", chrome);
    for site in &view.sites {
        let label = format!("{}:", site.name);
        match site.alive_at {
            Some(at) => {
                let _ = writeln!(
                    out,
                    "{:<18}{} (alive {})",
                    label,
                    site.status.as_str(),
                    at.to_rfc3339()
                );
            }
            None => {
                let _ = writeln!(out, "{:<18}{}", label, site.status.as_str());
            }
        }
    }
    let _ = writeln!(out, "Armed:            {}", if view.armed { "yes" } else { "no" });
    let _ = writeln!(out, "Messages relayed: {}", view.messages_relayed);
    let _ = writeln!(out, "Emergencies:      {}", view.emergency_count);
    if let Some(message) = &view.last_emergency {
        let _ = writeln!(out, "Last emergency:   {}", message);
    }
    match view.last_backup {
        Some(at) => {
            let _ = writeln!(out, "Last backup:      {}", at.to_rfc3339());
        }
        None => {
            let _ = writeln!(out, "Last backup:      never");
        }
    }
    out
}

/// Print the status once, or every two seconds with `watch`.
pub async fn show_status(config: &RelayConfig, watch: bool) -> Result<()> {
    let db = Database::new(&config.data_dir()?)?;
    let mut ticker = tokio::time::interval(WATCH_EVERY);
    loop {
        ticker.tick().await;
        let chrome_ready = chrome::is_port_version_ready(config.chrome_debug_port).await;
        let view = {
            let conn = db.lock()?;
            read_status(&conn, chrome_ready)?
        };
        if watch {
            // Clear the terminal before each refresh
            print!("\x1B[2J\x1B[H");
        }
        print!("{}", render(&view));
        if !watch {
            return Ok(());
        }
    }
}
