//! Selector-driven access to a chat page's DOM.
//!
//! Everything here talks to a page through the [`Document`] trait, so the
//! resolver, extractor and injector run the same way against a live CDP page
//! and against the in-memory fakes used in tests.

pub mod extractor;
pub mod injector;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use extractor::{extract_all, extract_latest, ExtractionResult, TranscriptEntry};
pub use injector::{inject, InjectionResult, SubmitMethod};
pub use resolver::{RankedPatterns, Resolution};

/// One element matched by a pattern, addressed by its position in the match set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub pattern: String,
    pub index: usize,
    /// Rendered text (`innerText`, falling back to `textContent`).
    pub text: String,
    /// `contentEditable === 'true'` at query time.
    pub editable: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("element {pattern}[{index}] is no longer in the document")]
    ElementGone { pattern: String, index: usize },

    #[error("{0}")]
    Script(String),
}

/// A live document inside one tab.
#[async_trait]
pub trait Document: Send + Sync {
    /// All elements matching `pattern`, in document order.
    async fn query_all(&self, pattern: &str) -> Result<Vec<ElementSnapshot>, DomError>;

    /// Set rendered content on editable elements, `value` otherwise.
    async fn write_text(&self, element: &ElementSnapshot, text: &str) -> Result<(), DomError>;

    /// Fire bubbling `input` and `change` events.
    async fn notify_input(&self, element: &ElementSnapshot) -> Result<(), DomError>;

    async fn click(&self, element: &ElementSnapshot) -> Result<(), DomError>;

    /// Dispatch an Enter `keydown`.
    async fn press_enter(&self, element: &ElementSnapshot) -> Result<(), DomError>;
}
