use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Trim to [`JOURNAL_KEEP`] newest entries once the buffer grows past this.
pub const JOURNAL_LIMIT: usize = 1000;
pub const JOURNAL_KEEP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    System,
    Info,
    Success,
    Warning,
    Error,
    Critical,
    Emergency,
}

impl Level {
    /// Entries at these levels are persisted as `last_emergency`.
    pub fn is_alarm(self) -> bool {
        matches!(self, Level::Critical | Level::Emergency)
    }

    pub fn log_level(self) -> log::Level {
        match self {
            Level::System | Level::Info | Level::Success => log::Level::Info,
            Level::Warning => log::Level::Warn,
            Level::Error | Level::Critical | Level::Emergency => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Milliseconds since the relay socket last showed activity.
    pub heartbeat: i64,
}

/// Rolling in-memory record of relay events.
#[derive(Debug, Default)]
pub struct Journal {
    entries: VecDeque<JournalEntry>,
}

impl Journal {
    pub fn push(&mut self, entry: JournalEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > JOURNAL_LIMIT {
            let excess = self.entries.len() - JOURNAL_KEEP;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tail(&self, n: usize) -> Vec<JournalEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn critical_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.level == Level::Critical)
            .count()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.front().map(|e| e.timestamp)
    }
}
