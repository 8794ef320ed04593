use super::state::RelayState;
use crate::browser::tabs::TabLocator;
use crate::database::queries::{self, LastMessage, SiteAlive};
use crate::dom::{self, DomError, RankedPatterns, TranscriptEntry};
use crate::sites::TargetDescriptor;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

const PREVIEW_CHARS: usize = 100;
const ALIVE_EVERY: Duration = Duration::from_secs(10);

/// Watches one site's tab for new messages and keeps its transcript saved.
pub struct SessionMonitor {
    site: TargetDescriptor,
    locator: Arc<TabLocator>,
    state: Arc<RelayState>,
    poll_every: Duration,
    save_every: Duration,
    last_seen: Option<String>,
}

impl SessionMonitor {
    pub fn new(
        site: TargetDescriptor,
        locator: Arc<TabLocator>,
        state: Arc<RelayState>,
        poll_every: Duration,
        save_every: Duration,
    ) -> Self {
        Self {
            site,
            locator,
            state,
            poll_every,
            save_every,
            last_seen: None,
        }
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }

    pub async fn run(mut self) {
        self.restore();
        let mut poll = interval(self.poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut save = interval_at(Instant::now() + self.save_every, self.save_every);
        save.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut alive = interval(ALIVE_EVERY);
        alive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.poll_once().await;
                }
                _ = save.tick() => {
                    self.save_session().await;
                }
                _ = alive.tick() => {
                    self.mark_alive().await;
                }
            }
        }
    }

    /// Pick up the last message seen before a restart.
    pub fn restore(&mut self) {
        let Some(store) = self.state.store() else { return };
        match store
            .lock()
            .and_then(|conn| queries::load_last_message(&conn, self.site.key))
        {
            Ok(Some(message)) => {
                info!(
                    "[monitor] {} resumes after message seen at {}",
                    self.site.name, message.timestamp
                );
                self.last_seen = Some(message.text);
            }
            Ok(None) => {}
            Err(e) => warn!("[monitor] {} could not restore state: {:#}", self.site.name, e),
        }
    }

    /// Returns the new message text when it differs from the last one seen.
    pub async fn poll_once(&mut self) -> Option<String> {
        let tab = self.locator.peek(self.site.key).await?;
        let patterns = RankedPatterns::from(self.site.message_selectors);
        let outcome = match self.locator.host().document(&tab).await {
            Ok(doc) => dom::extract_latest(doc.as_ref(), &patterns).await,
            Err(e) => Err(e),
        };
        let text = match outcome {
            Ok(result) => result.text?,
            Err(e) => {
                debug!("[monitor] {} poll failed: {}", self.site.name, e);
                return None;
            }
        };
        if text.trim().is_empty() || self.last_seen.as_deref() == Some(text.as_str()) {
            return None;
        }

        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        info!("[monitor] new {} message: {}", self.site.name, preview);
        self.persist_last(&text);
        self.last_seen = Some(text.clone());
        Some(text)
    }

    /// Store the full transcript. Returns the number of messages saved.
    pub async fn save_session(&self) -> usize {
        let Some(store) = self.state.store() else { return 0 };
        let entries = match self.transcript().await {
            Ok(Some(entries)) => entries,
            Ok(None) => return 0,
            Err(e) => {
                debug!("[monitor] {} transcript unavailable: {}", self.site.name, e);
                return 0;
            }
        };
        match store
            .lock()
            .and_then(|mut conn| queries::replace_session(&mut conn, self.site.key, &entries))
        {
            Ok(()) => {
                debug!("[monitor] saved {} {} messages", entries.len(), self.site.name);
                entries.len()
            }
            Err(e) => {
                warn!("[monitor] failed to save {} session: {:#}", self.site.name, e);
                0
            }
        }
    }

    /// Stamp the site as alive while its tab is open. Returns whether a stamp was written.
    pub async fn mark_alive(&self) -> bool {
        let Some(store) = self.state.store() else { return false };
        if self.locator.peek(self.site.key).await.is_none() {
            return false;
        }
        let alive = SiteAlive {
            timestamp: Utc::now().timestamp_millis(),
            tab_active: true,
        };
        match store
            .lock()
            .and_then(|conn| queries::save_site_alive(&conn, self.site.key, &alive))
        {
            Ok(()) => true,
            Err(e) => {
                warn!("[monitor] failed to stamp {} alive: {:#}", self.site.name, e);
                false
            }
        }
    }

    async fn transcript(&self) -> Result<Option<Vec<TranscriptEntry>>, DomError> {
        let Some(tab) = self.locator.peek(self.site.key).await else {
            return Ok(None);
        };
        let doc = self.locator.host().document(&tab).await?;
        let patterns = RankedPatterns::from(self.site.message_selectors);
        dom::extract_all(doc.as_ref(), &patterns).await.map(Some)
    }

    fn persist_last(&self, text: &str) {
        let Some(store) = self.state.store() else { return };
        let message = LastMessage {
            text: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        if let Err(e) = store
            .lock()
            .and_then(|conn| queries::save_last_message(&conn, self.site.key, &message))
        {
            warn!("[monitor] failed to store last {} message: {:#}", self.site.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::sites;
    use crate::testing::{FakeDocument, FakeTabHost};

    const MESSAGES: &str = "div[data-testid='user-message']";

    fn monitor_over(host: FakeTabHost, store: Arc<Database>) -> SessionMonitor {
        let state = Arc::new(RelayState::new(sites::all_sites(), Some(store)));
        let locator = Arc::new(TabLocator::new(Arc::new(host), state.clone()));
        SessionMonitor::new(
            sites::claude::descriptor(),
            locator,
            state,
            Duration::from_secs(2),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn only_changed_messages_are_reported() {
        let store = Arc::new(Database::in_memory().unwrap());
        let doc = FakeDocument::new().with_elements(MESSAGES, &["old", "newest"]);
        let mut monitor = monitor_over(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", doc),
            store.clone(),
        );

        assert_eq!(monitor.poll_once().await.as_deref(), Some("newest"));
        assert_eq!(monitor.poll_once().await, None);

        let conn = store.lock().unwrap();
        let saved = queries::load_last_message(&conn, "claude").unwrap().unwrap();
        assert_eq!(saved.text, "newest");
    }

    #[tokio::test]
    async fn restored_message_is_not_reported_again() {
        let store = Arc::new(Database::in_memory().unwrap());
        {
            let conn = store.lock().unwrap();
            let message = LastMessage {
                text: "newest".into(),
                timestamp: 1,
            };
            queries::save_last_message(&conn, "claude", &message).unwrap();
        }
        let doc = FakeDocument::new().with_elements(MESSAGES, &["newest"]);
        let mut monitor = monitor_over(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", doc),
            store,
        );

        monitor.restore();
        assert_eq!(monitor.last_seen(), Some("newest"));
        assert_eq!(monitor.poll_once().await, None);
    }

    #[tokio::test]
    async fn empty_latest_match_keeps_previous_message() {
        let store = Arc::new(Database::in_memory().unwrap());
        {
            let conn = store.lock().unwrap();
            let message = LastMessage {
                text: "real answer".into(),
                timestamp: 1,
            };
            queries::save_last_message(&conn, "claude", &message).unwrap();
        }
        let doc = FakeDocument::new().with_elements(MESSAGES, &["real answer", ""]);
        let mut monitor = monitor_over(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", doc),
            store.clone(),
        );

        monitor.restore();
        assert_eq!(monitor.poll_once().await, None);
        assert_eq!(monitor.last_seen(), Some("real answer"));

        let conn = store.lock().unwrap();
        let saved = queries::load_last_message(&conn, "claude").unwrap().unwrap();
        assert_eq!(saved.text, "real answer");
    }

    #[tokio::test]
    async fn alive_stamp_needs_an_open_tab() {
        let store = Arc::new(Database::in_memory().unwrap());
        let closed = monitor_over(FakeTabHost::new(), store.clone());
        assert!(!closed.mark_alive().await);
        assert_eq!(
            queries::load_site_alive(&store.lock().unwrap(), "claude").unwrap(),
            None
        );

        let doc = FakeDocument::new().with_elements(MESSAGES, &["hi"]);
        let open = monitor_over(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", doc),
            store.clone(),
        );
        assert!(open.mark_alive().await);
        let stamp = queries::load_site_alive(&store.lock().unwrap(), "claude")
            .unwrap()
            .unwrap();
        assert!(stamp.tab_active);
        assert!(stamp.timestamp > 0);
    }

    #[tokio::test]
    async fn missing_tab_polls_quietly() {
        let store = Arc::new(Database::in_memory().unwrap());
        let mut monitor = monitor_over(FakeTabHost::new(), store);

        assert_eq!(monitor.poll_once().await, None);
        assert_eq!(monitor.save_session().await, 0);
    }

    #[tokio::test]
    async fn transcript_replaces_previous_save() {
        let store = Arc::new(Database::in_memory().unwrap());
        let doc = FakeDocument::new().with_elements(MESSAGES, &["a", "b", "c"]);
        let monitor = monitor_over(
            FakeTabHost::new().with_tab("c1", "https://claude.ai/chat/1", doc),
            store.clone(),
        );

        assert_eq!(monitor.save_session().await, 3);
        assert_eq!(monitor.save_session().await, 3);

        let conn = store.lock().unwrap();
        let texts: Vec<_> = queries::load_session(&conn, "claude")
            .unwrap()
            .into_iter()
            .map(|entry| entry.text)
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }
}
