use super::journal::Level;
use super::protocol::{Backup, BackupSummary, Command, HealthSnapshot, LatestMetadata, Outbound};
use super::state::{RelayState, SiteStatus};
use crate::browser::tabs::{TabInfo, TabLocator, TabRecovery};
use crate::database::queries;
use crate::dom::{self, RankedPatterns, TranscriptEntry};
use crate::error::RelayError;
use crate::sites::TargetDescriptor;
use chrono::Utc;
use log::warn;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Journal slice included in a backup.
const BACKUP_LOG_TAIL: usize = 50;

/// Turns relay commands into DOM work and reply frames.
///
/// Every per-operation failure ends up in the reply's `error` field; nothing
/// here returns an error to the caller.
pub struct Relay {
    locator: Arc<TabLocator>,
    recovery: Arc<TabRecovery>,
    state: Arc<RelayState>,
}

impl Relay {
    pub fn new(locator: Arc<TabLocator>, recovery: Arc<TabRecovery>, state: Arc<RelayState>) -> Self {
        Self {
            locator,
            recovery,
            state,
        }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub async fn handle(&self, command: Command) -> Option<Outbound> {
        match command {
            Command::GetLatest { who } => Some(self.fetch_latest(&who).await),
            Command::SendMessage { who, text } => Some(self.send_message(&who, &text).await),
            Command::HealthCheck => Some(self.health_report().await),
            Command::EmergencyBackup => Some(self.emergency_backup().await),
            Command::EmergencyRestore => {
                let reopened = self.recovery.recover().await;
                if !reopened.is_empty() {
                    self.state.record(
                        Level::Info,
                        "Restore requested by relay peer",
                        Some(json!({ "reopened": reopened })),
                    );
                }
                None
            }
        }
    }

    /// Sent once right after the socket opens.
    pub async fn status_report(&self) -> Outbound {
        let tabs_found = self.locator.find_targets().await;
        self.state.persist_statuses();
        Outbound::EmergencyStatus {
            ai_status: self.state.ai_status(),
            tabs_found,
            protocol: "ACTIVE".to_string(),
        }
    }

    pub async fn fetch_latest(&self, who: &str) -> Outbound {
        let Some(site) = self.state.site(who).cloned() else {
            return Outbound::latest_error(who, RelayError::UnknownSite(who.to_string()), None);
        };
        let Some(tab) = self.locator.find(who).await else {
            return Outbound::latest_error(
                who,
                RelayError::TabNotFound {
                    name: site.name.to_string(),
                },
                Some(SiteStatus::Missing.as_str()),
            );
        };

        let patterns = RankedPatterns::from(site.message_selectors);
        let outcome = match self.locator.host().document(&tab).await {
            Ok(doc) => dom::extract_latest(doc.as_ref(), &patterns).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.state.record(
                    Level::Success,
                    format!("Message extracted from {}", site.name),
                    Some(json!({
                        "length": result.text.as_ref().map(|t| t.chars().count()).unwrap_or(0),
                        "total_messages": result.total,
                    })),
                );
                let metadata = result.pattern.map(|selector_used| LatestMetadata {
                    selector_used,
                    total_messages: result.total,
                    ai_name: site.name.to_string(),
                });
                Outbound::Latest {
                    text: result.text,
                    who: who.to_string(),
                    metadata,
                    error: result.error,
                    status: None,
                }
            }
            Err(e) => {
                let error = RelayError::ScriptExecutionFailed(e.to_string());
                self.state.record(
                    Level::Error,
                    format!("Failed to extract message from {}", site.name),
                    Some(json!(error.to_string())),
                );
                Outbound::latest_error(who, error, None)
            }
        }
    }

    pub async fn send_message(&self, who: &str, text: &str) -> Outbound {
        let Some(site) = self.state.site(who).cloned() else {
            return Outbound::sent_error(who, RelayError::UnknownSite(who.to_string()));
        };
        let Some(tab) = self.locator.find(who).await else {
            return Outbound::sent_error(
                who,
                RelayError::TabNotFound {
                    name: site.name.to_string(),
                },
            );
        };

        let inputs = RankedPatterns::from(site.input_selectors);
        let buttons = RankedPatterns::from(site.send_selectors);
        let outcome = match self.locator.host().document(&tab).await {
            Ok(doc) => dom::inject(doc.as_ref(), &inputs, &buttons, text).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                if result.success {
                    self.state.count_relayed();
                    self.state.record(
                        Level::Success,
                        format!("Message relayed to {}", site.name),
                        Some(json!({
                            "method": result.method,
                            "message_length": text.chars().count(),
                        })),
                    );
                } else {
                    self.state.record(
                        Level::Error,
                        format!("Failed to relay message to {}", site.name),
                        result.error.clone().map(|e| json!(e)),
                    );
                }
                Outbound::Sent {
                    ok: result.success,
                    who: who.to_string(),
                    method: result.method,
                    error: result.error,
                }
            }
            Err(e) => {
                let error = RelayError::ScriptExecutionFailed(e.to_string());
                self.state.record(
                    Level::Critical,
                    format!("Script execution failed for {}", site.name),
                    Some(json!(error.to_string())),
                );
                Outbound::sent_error(who, error)
            }
        }
    }

    pub async fn health_report(&self) -> Outbound {
        let found = self.locator.find_targets().await;
        let tabs = found
            .iter()
            .map(|(key, tab)| (format!("{}_tab", key), tab.is_some()))
            .collect();
        let health = HealthSnapshot {
            timestamp: Utc::now(),
            server_connection: self.state.is_live(),
            tabs,
            emergency_logs: self.state.journal_len(),
            last_heartbeat: self.state.since_activity_ms(),
            uptime: self.state.uptime_ms(),
        };
        self.state.record(
            Level::Info,
            "Health check completed",
            serde_json::to_value(&health).ok(),
        );
        Outbound::HealthReport {
            health,
            ai_status: self.state.ai_status(),
        }
    }

    /// Capture both transcripts plus the journal tail and store them locally.
    pub async fn emergency_backup(&self) -> Outbound {
        let found = self.locator.find_targets().await;

        let mut transcripts = BTreeMap::new();
        for site in self.state.sites() {
            let entries = match found.get(site.key).cloned().flatten() {
                Some(tab) => self.transcript(site, &tab).await,
                None => Vec::new(),
            };
            transcripts.insert(site.key.to_string(), entries);
        }

        let backup = Backup {
            timestamp: Utc::now(),
            transcripts,
            emergency_log: self.state.journal_tail(BACKUP_LOG_TAIL),
        };

        if let Some(store) = self.state.store() {
            let saved = store.lock().and_then(|conn| {
                queries::put_value(&conn, queries::EMERGENCY_BACKUP, &backup)?;
                queries::put_value(
                    &conn,
                    queries::BACKUP_TIMESTAMP,
                    &backup.timestamp.timestamp_millis(),
                )
            });
            if let Err(e) = saved {
                warn!("[relay] backup could not be stored: {:#}", e);
            }
        }

        let counts: BTreeMap<String, usize> = backup
            .transcripts
            .iter()
            .map(|(key, entries)| (format!("{}_count", key), entries.len()))
            .collect();
        self.state.record(
            Level::Success,
            "Emergency backup created",
            Some(json!(counts)),
        );
        Outbound::BackupCreated {
            backup_summary: BackupSummary {
                counts,
                log_entries: backup.emergency_log.len(),
                timestamp: backup.timestamp,
            },
        }
    }

    async fn transcript(&self, site: &TargetDescriptor, tab: &TabInfo) -> Vec<TranscriptEntry> {
        let patterns = RankedPatterns::from(site.message_selectors);
        let outcome = match self.locator.host().document(tab).await {
            Ok(doc) => dom::extract_all(doc.as_ref(), &patterns).await,
            Err(e) => Err(e),
        };
        outcome.unwrap_or_else(|e| {
            warn!("[relay] transcript of {} unavailable: {}", site.name, e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::sites;
    use crate::testing::{FakeDocument, FakeTabHost};
    use serde_json::json;
    use std::time::Duration;

    fn relay_with(host: FakeTabHost, store: Option<Arc<Database>>) -> (Arc<FakeTabHost>, Relay) {
        let host = Arc::new(host);
        let state = Arc::new(RelayState::new(sites::all_sites(), store));
        let locator = Arc::new(TabLocator::new(host.clone(), state.clone()));
        let recovery = Arc::new(TabRecovery::new(
            locator.clone(),
            state.clone(),
            Duration::from_millis(0),
            BTreeMap::new(),
        ));
        (host, Relay::new(locator, recovery, state))
    }

    #[tokio::test]
    async fn latest_with_missing_tab() {
        let (_host, relay) = relay_with(FakeTabHost::new(), None);

        let reply = relay
            .handle(Command::GetLatest { who: "claude".into() })
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "action": "latest",
                "text": null,
                "who": "claude",
                "error": "Claude tab not found",
                "status": "MISSING"
            })
        );
    }

    #[tokio::test]
    async fn latest_reports_selector_metadata() {
        let doc = FakeDocument::new()
            .with_elements("div[data-testid='user-message']", &["question", "follow-up"]);
        let (_host, relay) = relay_with(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", doc),
            None,
        );

        let reply = relay.fetch_latest("claude").await;

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "action": "latest",
                "text": "follow-up",
                "who": "claude",
                "metadata": {
                    "selector_used": "div[data-testid='user-message']",
                    "total_messages": 2,
                    "ai_name": "Claude"
                }
            })
        );
    }

    #[tokio::test]
    async fn send_via_second_input_pattern_and_button() {
        let doc = FakeDocument::new()
            .with_elements("rich-textarea", &[""])
            .with_elements("button[aria-label*='Send']", &["Send"]);
        let store = Arc::new(Database::in_memory().unwrap());
        let (host, relay) = relay_with(
            FakeTabHost::new().with_tab("g1", "https://gemini.google.com/app/2d", doc),
            Some(store.clone()),
        );

        let reply = relay
            .handle(Command::SendMessage {
                who: "gemini".into(),
                text: "hello".into(),
            })
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"action": "sent", "ok": true, "who": "gemini", "method": "button_click"})
        );
        let doc = host.document_of("g1");
        assert_eq!(doc.queried()[..2], ["div.input-area", "rich-textarea"]);
        assert!(doc.actions().contains(&"write rich-textarea[0]=hello".to_string()));

        let stats = queries::load_relay_stats(&store.lock().unwrap()).unwrap();
        assert_eq!(stats.messages_relayed, 1);
    }

    #[tokio::test]
    async fn send_to_missing_tab() {
        let (_host, relay) = relay_with(FakeTabHost::new(), None);
        let reply = relay.send_message("gemini", "hi").await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"action": "sent", "ok": false, "who": "gemini", "error": "Gemini tab not found"})
        );
    }

    #[tokio::test]
    async fn tab_dying_mid_call_is_a_script_failure() {
        let (_host, relay) = relay_with(
            FakeTabHost::new().with_tab(
                "c1",
                "https://claude.ai/chat/1",
                FakeDocument::new().detached(),
            ),
            None,
        );

        match relay.send_message("claude", "hi").await {
            Outbound::Sent { ok, error, .. } => {
                assert!(!ok);
                assert!(error.unwrap().starts_with("Script execution failed"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_site_is_reported() {
        let (_host, relay) = relay_with(FakeTabHost::new(), None);
        match relay.fetch_latest("copilot").await {
            Outbound::Latest { error, status, .. } => {
                assert_eq!(error.as_deref(), Some("Unknown site: copilot"));
                assert_eq!(status, None);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn health_lists_each_tab() {
        let (_host, relay) = relay_with(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/", FakeDocument::new()),
            None,
        );

        let reply = serde_json::to_value(relay.health_report().await).unwrap();

        assert_eq!(reply["action"], "health_report");
        assert_eq!(reply["health"]["claude_tab"], true);
        assert_eq!(reply["health"]["gemini_tab"], false);
        assert_eq!(reply["health"]["server_connection"], false);
        assert_eq!(reply["ai_status"]["claude"]["status"], "FOUND");
    }

    #[tokio::test]
    async fn backup_captures_transcripts_and_stores_them() {
        let claude = FakeDocument::new().with_elements("div.font-claude-message", &["a", "b"]);
        let store = Arc::new(Database::in_memory().unwrap());
        let (_host, relay) = relay_with(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", claude),
            Some(store.clone()),
        );

        let reply = serde_json::to_value(relay.emergency_backup().await).unwrap();

        assert_eq!(reply["action"], "backup_created");
        assert_eq!(reply["backup_summary"]["claude_count"], 2);
        assert_eq!(reply["backup_summary"]["gemini_count"], 0);

        let conn = store.lock().unwrap();
        let saved: Backup = queries::get_value(&conn, queries::EMERGENCY_BACKUP)
            .unwrap()
            .unwrap();
        assert_eq!(saved.transcripts["claude"].len(), 2);
        assert!(queries::get_value::<i64>(&conn, queries::BACKUP_TIMESTAMP)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn restore_command_reopens_and_stays_silent() {
        let (host, relay) = relay_with(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", FakeDocument::new()),
            None,
        );

        assert_eq!(relay.handle(Command::EmergencyRestore).await, None);
        assert_eq!(host.opened(), vec!["https://gemini.google.com/app"]);
    }
}
