use super::tabs::{TabHost, TabInfo};
use crate::dom::{Document, DomError, ElementSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::target::{EventTargetDestroyed, SetDiscoverTargetsParams};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct CdpListEntry {
    id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
}

/// Page tabs reported by Chrome's `/json/list`, in Chrome's order.
pub async fn list_page_tabs(port: u16) -> Result<Vec<TabInfo>> {
    let list_url = format!("http://127.0.0.1:{}/json/list", port);
    let entries: Vec<CdpListEntry> = reqwest::get(&list_url)
        .await
        .context("Failed to request Chrome json/list")?
        .json()
        .await
        .context("Chrome json/list returned unexpected JSON")?;

    Ok(entries
        .into_iter()
        .filter(|entry| entry.target_type == "page")
        .map(|entry| TabInfo {
            id: entry.id,
            url: entry.url,
            title: entry.title,
        })
        .collect())
}

/// Tabs of a Chrome instance reached over its remote-debugging port.
pub struct CdpTabHost {
    port: u16,
    browser: Mutex<Browser>,
}

impl CdpTabHost {
    /// Connect to an already-running Chrome instance via CDP
    pub async fn connect(port: u16) -> Result<Self> {
        let debug_url = format!("http://127.0.0.1:{}", port);

        let (browser, mut handler) = Browser::connect(&debug_url)
            .await
            .context(format!("Failed to connect to Chrome on port {}", port))?;

        // Spawn the handler to process CDP events
        tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        if let Err(e) = browser.execute(SetDiscoverTargetsParams::new(true)).await {
            warn!("[Chrome session] target discovery not enabled: {}", e);
        }

        info!("Connected to Chrome CDP on port {}", port);
        Ok(Self {
            port,
            browser: Mutex::new(browser),
        })
    }

    /// Stream of target-destroyed notifications (closed tabs among them).
    pub async fn removals(&self) -> Result<EventStream<EventTargetDestroyed>> {
        let browser = self.browser.lock().await;
        browser
            .event_listener::<EventTargetDestroyed>()
            .await
            .context("Failed to subscribe to target events")
    }

    async fn page_for(&self, tab_id: &str) -> Result<Page> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.fetch_targets().await {
            warn!("[Chrome session] fetch_targets failed: {}", e);
        }
        let pages = browser.pages().await.context("Failed to get pages")?;
        pages
            .into_iter()
            .find(|page| {
                let id: &str = page.target_id().as_ref();
                id == tab_id
            })
            .with_context(|| format!("Tab {} is not attached", tab_id))
    }
}

#[async_trait]
impl TabHost for CdpTabHost {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        list_page_tabs(self.port).await
    }

    async fn open_tab(&self, url: &str) -> Result<TabInfo> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page(url)
            .await
            .with_context(|| format!("Failed to open {}", url))?;
        let id: &str = page.target_id().as_ref();
        Ok(TabInfo {
            id: id.to_string(),
            url: url.to_string(),
            title: String::new(),
        })
    }

    async fn document(&self, tab: &TabInfo) -> Result<Arc<dyn Document>, DomError> {
        let page = self
            .page_for(&tab.id)
            .await
            .map_err(|e| DomError::Script(format!("{:#}", e)))?;
        Ok(Arc::new(PageDocument::new(page)))
    }
}

#[derive(Debug, Deserialize)]
struct QueryReply {
    ok: bool,
    #[serde(default)]
    items: Vec<QueriedElement>,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct QueriedElement {
    text: String,
    editable: bool,
}

/// [`Document`] backed by `Runtime.evaluate` on a live page.
pub struct PageDocument {
    page: Page,
}

impl PageDocument {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// Execute JavaScript and return its string result
    async fn execute_js(&self, script: &str) -> Result<String, DomError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| DomError::Script(format!("Failed to execute JavaScript: {}", e)))?
            .into_value::<String>()
            .map_err(|e| DomError::Script(format!("Unexpected script result: {}", e)))
    }

    /// Run `body` with `el` bound to the addressed element.
    async fn with_element(&self, element: &ElementSnapshot, body: &str) -> Result<(), DomError> {
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelectorAll('{}')[{}];
                if (!el) return 'missing';
                {}
                return 'ok';
            }})()
            "#,
            escape_js_single(&element.pattern),
            element.index,
            body
        );
        match self.execute_js(&js).await?.as_str() {
            "ok" => Ok(()),
            _ => Err(DomError::ElementGone {
                pattern: element.pattern.clone(),
                index: element.index,
            }),
        }
    }
}

#[async_trait]
impl Document for PageDocument {
    async fn query_all(&self, pattern: &str) -> Result<Vec<ElementSnapshot>, DomError> {
        let js = format!(
            r#"
            (function() {{
                try {{
                    const els = Array.from(document.querySelectorAll('{}'));
                    return JSON.stringify({{
                        ok: true,
                        items: els.map((el) => ({{
                            text: el.innerText || el.textContent || '',
                            editable: el.contentEditable === 'true'
                        }}))
                    }});
                }} catch (e) {{
                    return JSON.stringify({{ ok: false, error: String(e) }});
                }}
            }})()
            "#,
            escape_js_single(pattern)
        );

        let raw = self.execute_js(&js).await?;
        let reply: QueryReply = serde_json::from_str(&raw)
            .map_err(|e| DomError::Script(format!("Unexpected query result: {}", e)))?;
        if !reply.ok {
            return Err(DomError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: reply.error,
            });
        }

        Ok(reply
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| ElementSnapshot {
                pattern: pattern.to_string(),
                index,
                text: item.text,
                editable: item.editable,
            })
            .collect())
    }

    async fn write_text(&self, element: &ElementSnapshot, text: &str) -> Result<(), DomError> {
        let literal = serde_json::to_string(text)
            .map_err(|e| DomError::Script(format!("Cannot encode text: {}", e)))?;
        let body = format!(
            r#"
                if (el.contentEditable === 'true') {{
                    el.innerText = {0};
                }} else {{
                    el.value = {0};
                }}
            "#,
            literal
        );
        self.with_element(element, &body).await
    }

    async fn notify_input(&self, element: &ElementSnapshot) -> Result<(), DomError> {
        self.with_element(
            element,
            r#"
                el.dispatchEvent(new Event('input', { bubbles: true }));
                el.dispatchEvent(new Event('change', { bubbles: true }));
            "#,
        )
        .await
    }

    async fn click(&self, element: &ElementSnapshot) -> Result<(), DomError> {
        self.with_element(element, "el.click();").await
    }

    async fn press_enter(&self, element: &ElementSnapshot) -> Result<(), DomError> {
        self.with_element(
            element,
            r#"
                el.dispatchEvent(new KeyboardEvent('keydown', {
                    key: 'Enter',
                    code: 'Enter',
                    keyCode: 13,
                    which: 13,
                    bubbles: true
                }));
            "#,
        )
        .await
    }
}

fn escape_js_single(input: &str) -> String {
    input.replace('\\', "\\\\").replace('\'', "\\'")
}
