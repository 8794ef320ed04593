use crate::dom::{Document, DomError};
use crate::relay::journal::Level;
use crate::relay::state::{RelayState, SiteStatus};
use crate::sites::TargetDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Site key -> first tab showing that site.
pub type TargetTabs = BTreeMap<String, Option<TabInfo>>;

/// The browser holding the chat tabs.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Open page tabs in enumeration order.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>>;

    async fn open_tab(&self, url: &str) -> Result<TabInfo>;

    /// Handle to run DOM queries inside `tab`. Fails if the tab went away.
    async fn document(&self, tab: &TabInfo) -> Result<Arc<dyn Document>, DomError>;
}

/// Match tabs to sites by URL substring. Later matches for an already
/// matched site are ignored.
pub fn match_tabs(sites: &[TargetDescriptor], tabs: &[TabInfo]) -> TargetTabs {
    sites
        .iter()
        .map(|site| {
            let tab = tabs.iter().find(|tab| site.matches_url(&tab.url)).cloned();
            (site.key.to_string(), tab)
        })
        .collect()
}

pub struct TabLocator {
    host: Arc<dyn TabHost>,
    state: Arc<RelayState>,
}

impl TabLocator {
    pub fn new(host: Arc<dyn TabHost>, state: Arc<RelayState>) -> Self {
        Self { host, state }
    }

    pub fn host(&self) -> &Arc<dyn TabHost> {
        &self.host
    }

    /// Scan every tab and refresh the per-site status labels.
    ///
    /// A browser that cannot be enumerated counts as having no tabs.
    pub async fn find_targets(&self) -> TargetTabs {
        let tabs = match self.host.list_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!("[tabs] failed to enumerate tabs: {:#}", e);
                Vec::new()
            }
        };

        let found = match_tabs(self.state.sites(), &tabs);
        for (key, tab) in &found {
            let status = if tab.is_some() {
                SiteStatus::Found
            } else {
                SiteStatus::Missing
            };
            self.state.set_status(key, status);
        }

        let labels: BTreeMap<_, _> = found
            .keys()
            .map(|key| (key.clone(), self.state.status(key).as_str()))
            .collect();
        self.state.record(
            Level::Info,
            "Tab status update",
            Some(json!({
                "status": labels,
                "found_count": found.values().filter(|t| t.is_some()).count(),
            })),
        );
        found
    }

    pub async fn find(&self, key: &str) -> Option<TabInfo> {
        self.find_targets().await.remove(key).flatten()
    }

    /// Refresh and persist the status labels every `every`.
    pub async fn rescan_every(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            self.find_targets().await;
            self.state.persist_statuses();
        }
    }

    /// Like [`find`](Self::find) but leaves status labels and journal alone.
    pub async fn peek(&self, key: &str) -> Option<TabInfo> {
        let site = self.state.site(key)?;
        let tabs = self.host.list_tabs().await.ok()?;
        tabs.into_iter().find(|tab| site.matches_url(&tab.url))
    }
}

/// Reopens sites whose tabs disappeared.
pub struct TabRecovery {
    locator: Arc<TabLocator>,
    state: Arc<RelayState>,
    restore_delay: Duration,
    url_overrides: BTreeMap<String, String>,
}

impl TabRecovery {
    pub fn new(
        locator: Arc<TabLocator>,
        state: Arc<RelayState>,
        restore_delay: Duration,
        url_overrides: BTreeMap<String, String>,
    ) -> Self {
        Self {
            locator,
            state,
            restore_delay,
            url_overrides,
        }
    }

    pub fn open_url<'a>(&'a self, site: &'a TargetDescriptor) -> &'a str {
        self.url_overrides
            .get(site.key)
            .map(String::as_str)
            .unwrap_or(site.open_url)
    }

    /// Re-scan and, after the restore delay, open a fresh tab for every
    /// missing site. Returns the keys that were reopened.
    ///
    /// There is no cool-down: a tab the user closed on purpose comes back too.
    pub async fn recover(&self) -> Vec<String> {
        let found = self.locator.find_targets().await;
        let lost: Vec<&TargetDescriptor> = self
            .state
            .sites()
            .iter()
            .filter(|site| matches!(found.get(site.key), Some(None) | None))
            .collect();
        if lost.is_empty() {
            return Vec::new();
        }

        let names: Vec<_> = lost.iter().map(|site| site.name).collect();
        self.state.record(
            Level::Emergency,
            format!("Sites lost: {}", names.join(", ")),
            None,
        );

        tokio::time::sleep(self.restore_delay).await;

        let mut reopened = Vec::new();
        for site in lost {
            let url = self.open_url(site);
            match self.locator.host().open_tab(url).await {
                Ok(tab) => {
                    info!("[tabs] reopened {} as tab {}", site.name, tab.id);
                    self.state.set_status(site.key, SiteStatus::Connecting);
                    self.state.record(
                        Level::Info,
                        format!("Attempting to restore {} tab", site.name),
                        None,
                    );
                    reopened.push(site.key.to_string());
                }
                Err(e) => {
                    self.state.record(
                        Level::Error,
                        format!("Failed to reopen {} tab", site.name),
                        Some(json!(format!("{:#}", e))),
                    );
                }
            }
        }
        self.state.persist_statuses();
        reopened
    }

    /// Run recovery once per tab-removal notification.
    pub async fn watch<S: Stream>(&self, removals: S) {
        let mut removals = std::pin::pin!(removals);
        while removals.next().await.is_some() {
            debug!("[tabs] a tab went away, re-scanning");
            self.recover().await;
        }
        warn!("[tabs] removal notifications ended");
    }
}
