use super::journal::{Journal, JournalEntry, Level};
use crate::database::{queries, Database};
use crate::sites::TargetDescriptor;
use chrono::Utc;
use log::{log, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Found,
    Missing,
    /// A tab was just requested and has not been located yet.
    Connecting,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "FOUND",
            Self::Missing => "MISSING",
            Self::Connecting => "CONNECTING",
        }
    }
}

/// Per-site entry of the `ai_status` map sent to the relay peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteReport {
    pub name: String,
    pub url_part: String,
    pub status: SiteStatus,
}

/// State shared by the connection manager, the dispatcher and the tab locator.
pub struct RelayState {
    sites: Vec<TargetDescriptor>,
    statuses: Mutex<BTreeMap<String, SiteStatus>>,
    journal: Mutex<Journal>,
    live: AtomicBool,
    last_activity: Mutex<Instant>,
    store: Option<Arc<Database>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RelayState {
    pub fn new(sites: Vec<TargetDescriptor>, store: Option<Arc<Database>>) -> Self {
        let statuses = sites
            .iter()
            .map(|site| (site.key.to_string(), SiteStatus::Missing))
            .collect();
        Self {
            sites,
            statuses: Mutex::new(statuses),
            journal: Mutex::new(Journal::default()),
            live: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            store,
        }
    }

    pub fn sites(&self) -> &[TargetDescriptor] {
        &self.sites
    }

    pub fn site(&self, key: &str) -> Option<&TargetDescriptor> {
        self.sites.iter().find(|site| site.key == key)
    }

    pub fn store(&self) -> Option<&Database> {
        self.store.as_deref()
    }

    // ---- status labels ----

    pub fn set_status(&self, key: &str, status: SiteStatus) {
        lock(&self.statuses).insert(key.to_string(), status);
    }

    pub fn status(&self, key: &str) -> SiteStatus {
        lock(&self.statuses)
            .get(key)
            .copied()
            .unwrap_or(SiteStatus::Missing)
    }

    pub fn ai_status(&self) -> BTreeMap<String, SiteReport> {
        self.sites
            .iter()
            .map(|site| {
                (
                    site.key.to_string(),
                    SiteReport {
                        name: site.name.to_string(),
                        url_part: site.url_part.to_string(),
                        status: self.status(site.key),
                    },
                )
            })
            .collect()
    }

    /// Write the current labels where `chat-relay status` can read them.
    pub fn persist_statuses(&self) {
        let Some(store) = self.store() else { return };
        let snapshot = lock(&self.statuses).clone();
        let result = store
            .lock()
            .and_then(|conn| queries::put_value(&conn, queries::SITE_STATUS, &snapshot));
        if let Err(e) = result {
            warn!("[state] failed to persist site status: {:#}", e);
        }
    }

    // ---- connection liveness ----

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
        if live {
            self.touch();
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn since_activity_ms(&self) -> i64 {
        lock(&self.last_activity).elapsed().as_millis() as i64
    }

    // ---- journal ----

    pub fn record(&self, level: Level, message: impl Into<String>, data: Option<Value>) {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
            heartbeat: self.since_activity_ms(),
        };
        match &entry.data {
            Some(data) => log!(level.log_level(), "[{:?}] {} {}", level, entry.message, data),
            None => log!(level.log_level(), "[{:?}] {}", level, entry.message),
        }

        let critical_count = {
            let mut journal = lock(&self.journal);
            journal.push(entry.clone());
            journal.critical_count()
        };

        if level.is_alarm() {
            self.persist_alarm(&entry, critical_count);
        }
    }

    pub fn journal_len(&self) -> usize {
        lock(&self.journal).len()
    }

    pub fn journal_tail(&self, n: usize) -> Vec<JournalEntry> {
        lock(&self.journal).tail(n)
    }

    /// Milliseconds since the first journal entry.
    pub fn uptime_ms(&self) -> i64 {
        lock(&self.journal)
            .first_timestamp()
            .map(|first| (Utc::now() - first).num_milliseconds())
            .unwrap_or(0)
    }

    fn persist_alarm(&self, entry: &JournalEntry, critical_count: usize) {
        let Some(store) = self.store() else { return };
        let result = store.lock().and_then(|conn| {
            queries::put_value(&conn, queries::LAST_EMERGENCY, entry)?;
            queries::put_value(&conn, queries::EMERGENCY_COUNT, &critical_count)
        });
        if let Err(e) = result {
            warn!("[state] failed to persist alarm entry: {:#}", e);
        }
    }

    // ---- statistics ----

    pub fn count_relayed(&self) {
        let Some(store) = self.store() else { return };
        match store
            .lock()
            .and_then(|conn| queries::increment_messages_relayed(&conn))
        {
            Ok(total) => log::debug!("[state] messages relayed: {}", total),
            Err(e) => warn!("[state] failed to update relay stats: {:#}", e),
        }
    }
}
