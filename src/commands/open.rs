use crate::browser::automation::CdpTabHost;
use crate::browser::chrome::{self, ChromeSessionMode};
use crate::browser::tabs::TabHost;
use crate::config::RelayConfig;
use crate::database::{queries, Database};
use crate::error::RelayError;
use crate::relay::state::SiteStatus;
use crate::sites;
use anyhow::Result;
use log::info;
use std::collections::BTreeMap;

/// Open the site's canonical URL in the relay Chrome, launching it if needed.
pub async fn open_site(config: &RelayConfig, key: &str) -> Result<()> {
    let site = sites::get_site(key).ok_or_else(|| RelayError::UnknownSite(key.to_string()))?;
    let url = config.open_url(&site);

    let session = chrome::prepare_chrome_session(config, &[url]).await?;
    if session.mode == ChromeSessionMode::ReusedExisting {
        let host = CdpTabHost::connect(session.port).await?;
        let tab = host.open_tab(url).await?;
        info!("[open] {} opened as tab {}", site.name, tab.id);
    }

    let db = Database::new(&config.data_dir()?)?;
    mark_connecting(&db, site.key)?;
    println!("Opened {} ({}) via {} Chrome", site.name, url, session.mode.as_str());
    Ok(())
}

pub fn mark_connecting(db: &Database, key: &str) -> Result<()> {
    let conn = db.lock()?;
    let mut labels: BTreeMap<String, SiteStatus> =
        queries::get_value(&conn, queries::SITE_STATUS)?.unwrap_or_default();
    labels.insert(key.to_string(), SiteStatus::Connecting);
    queries::put_value(&conn, queries::SITE_STATUS, &labels)
}
