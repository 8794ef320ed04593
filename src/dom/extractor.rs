use super::{Document, DomError, RankedPatterns};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const NO_MESSAGES: &str = "No messages found with any selector";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub text: Option<String>,
    pub pattern: Option<String>,
    pub total: usize,
    pub error: Option<String>,
}

/// One message as observed during a transcript sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    /// Observation time, epoch milliseconds.
    pub timestamp: i64,
    pub selector: String,
}

/// Text of the last matched message in document order.
///
/// Authorship is not inspected: whatever the winning pattern matched last is
/// the latest message.
pub async fn extract_latest(
    doc: &dyn Document,
    patterns: &RankedPatterns,
) -> Result<ExtractionResult, DomError> {
    let Some(resolution) = patterns.resolve(doc).await? else {
        return Ok(ExtractionResult {
            text: None,
            pattern: None,
            total: 0,
            error: Some(NO_MESSAGES.to_string()),
        });
    };

    let total = resolution.elements.len();
    let text = resolution.elements.into_iter().last().map(|el| el.text);
    Ok(ExtractionResult {
        text,
        pattern: Some(resolution.pattern),
        total,
        error: None,
    })
}

/// Every message matched by the winning pattern, in document order.
pub async fn extract_all(
    doc: &dyn Document,
    patterns: &RankedPatterns,
) -> Result<Vec<TranscriptEntry>, DomError> {
    let Some(resolution) = patterns.resolve(doc).await? else {
        return Ok(Vec::new());
    };

    let observed_at = Utc::now().timestamp_millis();
    Ok(resolution
        .elements
        .into_iter()
        .map(|el| TranscriptEntry {
            text: el.text,
            timestamp: observed_at,
            selector: resolution.pattern.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDocument;

    #[tokio::test]
    async fn latest_is_last_in_document_order() {
        let doc = FakeDocument::new().with_elements("div.msg", &["first", "second", "third"]);
        let result = extract_latest(&doc, &RankedPatterns::new(["div.msg"])).await.unwrap();

        assert_eq!(result.text.as_deref(), Some("third"));
        assert_eq!(result.total, 3);
        assert_eq!(result.pattern.as_deref(), Some("div.msg"));
        assert_eq!(result.error, None);
    }

    #[tokio::test]
    async fn no_match_is_a_result_not_an_error() {
        let doc = FakeDocument::new();
        let result = extract_latest(&doc, &RankedPatterns::new(["a", "b"])).await.unwrap();

        assert_eq!(result.text, None);
        assert_eq!(result.total, 0);
        assert_eq!(result.error.as_deref(), Some(NO_MESSAGES));
    }

    #[tokio::test]
    async fn transcript_stops_at_first_matching_pattern() {
        let doc = FakeDocument::new()
            .with_elements("div.a", &["one", "two"])
            .with_elements("div.b", &["ignored"]);
        let entries = extract_all(&doc, &RankedPatterns::new(["div.missing", "div.a", "div.b"]))
            .await
            .unwrap();

        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(entries.iter().all(|e| e.selector == "div.a"));
        assert!(!doc.queried().contains(&"div.b".to_string()));
    }
}
