//! In-memory stand-ins for a Chrome tab and its DOM.

use crate::browser::tabs::{TabHost, TabInfo};
use crate::dom::{Document, DomError, ElementSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeDocument {
    matches: HashMap<String, Vec<ElementSnapshot>>,
    invalid: HashSet<String>,
    detached: bool,
    reject_writes: bool,
    queried: Mutex<Vec<String>>,
    actions: Mutex<Vec<String>>,
}

impl FakeDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements(self, pattern: &str, texts: &[&str]) -> Self {
        self.insert(pattern, texts, false)
    }

    pub fn with_editable(self, pattern: &str, texts: &[&str]) -> Self {
        self.insert(pattern, texts, true)
    }

    pub fn with_invalid(mut self, pattern: &str) -> Self {
        self.invalid.insert(pattern.to_string());
        self
    }

    /// Every call fails as if the tab had been closed.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn rejecting_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    fn insert(mut self, pattern: &str, texts: &[&str], editable: bool) -> Self {
        let elements = texts
            .iter()
            .enumerate()
            .map(|(index, text)| ElementSnapshot {
                pattern: pattern.to_string(),
                index,
                text: text.to_string(),
                editable,
            })
            .collect();
        self.matches.insert(pattern.to_string(), elements);
        self
    }

    fn act(&self, action: &str, element: &ElementSnapshot, suffix: &str) -> Result<(), DomError> {
        if self.detached {
            return Err(DomError::Script("No tab with given id".into()));
        }
        self.actions.lock().unwrap().push(format!(
            "{} {}[{}]{}",
            action, element.pattern, element.index, suffix
        ));
        Ok(())
    }
}

#[async_trait]
impl Document for FakeDocument {
    async fn query_all(&self, pattern: &str) -> Result<Vec<ElementSnapshot>, DomError> {
        if self.detached {
            return Err(DomError::Script("No tab with given id".into()));
        }
        self.queried.lock().unwrap().push(pattern.to_string());
        if self.invalid.contains(pattern) {
            return Err(DomError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "SyntaxError".into(),
            });
        }
        Ok(self.matches.get(pattern).cloned().unwrap_or_default())
    }

    async fn write_text(&self, element: &ElementSnapshot, text: &str) -> Result<(), DomError> {
        if self.reject_writes {
            return Err(DomError::ElementGone {
                pattern: element.pattern.clone(),
                index: element.index,
            });
        }
        self.act("write", element, &format!("={}", text))
    }

    async fn notify_input(&self, element: &ElementSnapshot) -> Result<(), DomError> {
        self.act("notify", element, "")
    }

    async fn click(&self, element: &ElementSnapshot) -> Result<(), DomError> {
        self.act("click", element, "")
    }

    async fn press_enter(&self, element: &ElementSnapshot) -> Result<(), DomError> {
        self.act("enter", element, "")
    }
}

#[derive(Default)]
pub struct FakeTabHost {
    tabs: Mutex<Vec<TabInfo>>,
    documents: Mutex<HashMap<String, Arc<FakeDocument>>>,
    opened: Mutex<Vec<String>>,
}

impl FakeTabHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tab(self, id: &str, url: &str, doc: FakeDocument) -> Self {
        self.tabs.lock().unwrap().push(TabInfo {
            id: id.to_string(),
            url: url.to_string(),
            title: String::new(),
        });
        self.documents
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(doc));
        self
    }

    pub fn close_tab(&self, id: &str) {
        self.tabs.lock().unwrap().retain(|tab| tab.id != id);
        self.documents.lock().unwrap().remove(id);
    }

    pub fn document_of(&self, id: &str) -> Arc<FakeDocument> {
        self.documents.lock().unwrap()[id].clone()
    }

    /// URLs passed to `open_tab`, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabHost for FakeTabHost {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        Ok(self.tabs.lock().unwrap().clone())
    }

    async fn open_tab(&self, url: &str) -> Result<TabInfo> {
        let mut opened = self.opened.lock().unwrap();
        opened.push(url.to_string());
        let tab = TabInfo {
            id: format!("opened-{}", opened.len()),
            url: url.to_string(),
            title: String::new(),
        };
        drop(opened);
        self.tabs.lock().unwrap().push(tab.clone());
        self.documents
            .lock()
            .unwrap()
            .insert(tab.id.clone(), Arc::new(FakeDocument::new()));
        Ok(tab)
    }

    async fn document(&self, tab: &TabInfo) -> Result<Arc<dyn Document>, DomError> {
        match self.documents.lock().unwrap().get(&tab.id) {
            Some(doc) => Ok(doc.clone() as Arc<dyn Document>),
            None => Err(DomError::Script(format!("No tab with id {}", tab.id))),
        }
    }
}
