//! JSON frames exchanged with the relay endpoint.

use super::journal::JournalEntry;
use super::state::SiteReport;
use crate::browser::tabs::TabInfo;
use crate::dom::{SubmitMethod, TranscriptEntry};
use crate::error::RelayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Instruction received from the relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    GetLatest { who: String },
    SendMessage { who: String, text: String },
    HealthCheck,
    EmergencyBackup,
    /// The server noticed a missing site; payload details are not needed.
    EmergencyRestore,
}

impl Command {
    pub const ACTIONS: &'static [&'static str] = &[
        "get_latest",
        "send_message",
        "health_check",
        "emergency_backup",
        "emergency_restore",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    /// Well-formed frame with an action this client does not handle.
    Unknown(String),
}

/// Parse one text frame.
pub fn parse_inbound(text: &str) -> Result<Inbound, RelayError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::MalformedCommand(e.to_string()))?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::MalformedCommand("missing 'action' field".into()))?;

    if !Command::ACTIONS.contains(&action) {
        return Ok(Inbound::Unknown(action.to_string()));
    }

    serde_json::from_value(value)
        .map(Inbound::Command)
        .map_err(|e| RelayError::MalformedCommand(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestMetadata {
    pub selector_used: String,
    pub total_messages: usize,
    pub ai_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub server_connection: bool,
    /// `<site>_tab -> present`
    #[serde(flatten)]
    pub tabs: BTreeMap<String, bool>,
    pub emergency_logs: usize,
    /// Milliseconds since the socket last showed activity.
    pub last_heartbeat: i64,
    pub uptime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    /// `<site>_count -> messages captured`
    #[serde(flatten)]
    pub counts: BTreeMap<String, usize>,
    pub log_entries: usize,
    pub timestamp: DateTime<Utc>,
}

/// Full backup persisted locally; only its summary goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub timestamp: DateTime<Utc>,
    pub transcripts: BTreeMap<String, Vec<TranscriptEntry>>,
    pub emergency_log: Vec<JournalEntry>,
}

/// Frame sent to the relay endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outbound {
    EmergencyStatus {
        ai_status: BTreeMap<String, SiteReport>,
        tabs_found: BTreeMap<String, Option<TabInfo>>,
        protocol: String,
    },
    Latest {
        text: Option<String>,
        who: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<LatestMetadata>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Sent {
        ok: bool,
        who: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        method: Option<SubmitMethod>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    HealthReport {
        health: HealthSnapshot,
        ai_status: BTreeMap<String, SiteReport>,
    },
    BackupCreated {
        backup_summary: BackupSummary,
    },
    Heartbeat {
        timestamp: i64,
    },
}

impl Outbound {
    pub fn heartbeat() -> Self {
        Outbound::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn latest_error(who: &str, error: impl ToString, status: Option<&str>) -> Self {
        Outbound::Latest {
            text: None,
            who: who.to_string(),
            metadata: None,
            error: Some(error.to_string()),
            status: status.map(str::to_string),
        }
    }

    pub fn sent_error(who: &str, error: impl ToString) -> Self {
        Outbound::Sent {
            ok: false,
            who: who.to_string(),
            method: None,
            error: Some(error.to_string()),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Outbound::EmergencyStatus { .. } => "emergency_status",
            Outbound::Latest { .. } => "latest",
            Outbound::Sent { .. } => "sent",
            Outbound::HealthReport { .. } => "health_report",
            Outbound::BackupCreated { .. } => "backup_created",
            Outbound::Heartbeat { .. } => "heartbeat",
        }
    }
}
