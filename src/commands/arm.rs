use crate::browser::automation;
use crate::browser::tabs::{match_tabs, TabInfo};
use crate::config::RelayConfig;
use crate::database::{queries, Database};
use crate::sites::{self, TargetDescriptor};
use anyhow::{bail, Result};
use log::warn;

/// Both chat tabs must be open before relaying is armed.
pub fn require_tabs(sites: &[TargetDescriptor], tabs: &[TabInfo]) -> Result<()> {
    let found = match_tabs(sites, tabs);
    for site in sites {
        if found.get(site.key).cloned().flatten().is_none() {
            bail!("open the {} tab first", site.name);
        }
    }
    Ok(())
}

pub async fn arm(config: &RelayConfig) -> Result<()> {
    let tabs = match automation::list_page_tabs(config.chrome_debug_port).await {
        Ok(tabs) => tabs,
        Err(e) => {
            warn!("[arm] Chrome not reachable: {:#}", e);
            Vec::new()
        }
    };
    let db = Database::new(&config.data_dir()?)?;
    arm_with_tabs(&db, &sites::all_sites(), &tabs)?;
    println!("Relay armed");
    Ok(())
}

/// Set the armed flag once every site has a tab among `tabs`.
pub fn arm_with_tabs(db: &Database, sites: &[TargetDescriptor], tabs: &[TabInfo]) -> Result<()> {
    require_tabs(sites, tabs)?;
    let conn = db.lock()?;
    queries::set_armed(&conn, true)
}
