use super::{Document, DomError, ElementSnapshot};
use log::debug;

/// Candidate patterns, best guess first. The first one that matches anything wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedPatterns {
    patterns: Vec<String>,
}

/// Winning pattern plus what it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub pattern: String,
    pub elements: Vec<ElementSnapshot>,
    /// Patterns tried before the winner, each with why it lost.
    pub rejected: Vec<String>,
}

impl RankedPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Walk the patterns in order and stop at the first non-empty match.
    ///
    /// Patterns the page rejects as invalid syntax are skipped. Any other
    /// failure means the page itself is unreachable and is returned.
    pub async fn resolve(&self, doc: &dyn Document) -> Result<Option<Resolution>, DomError> {
        let mut rejected = Vec::new();
        for pattern in &self.patterns {
            match doc.query_all(pattern).await {
                Ok(elements) if !elements.is_empty() => {
                    debug!(
                        "[resolver] '{}' matched {} element(s) after {} miss(es)",
                        pattern,
                        elements.len(),
                        rejected.len()
                    );
                    return Ok(Some(Resolution {
                        pattern: pattern.clone(),
                        elements,
                        rejected,
                    }));
                }
                Ok(_) => rejected.push(format!("{} count=0", pattern)),
                Err(DomError::InvalidPattern { reason, .. }) => {
                    debug!("[resolver] skipping invalid pattern '{}': {}", pattern, reason);
                    rejected.push(format!("{} invalid={}", pattern, reason));
                }
                Err(e) => return Err(e),
            }
        }
        debug!("[resolver] no match: {}", rejected.join("; "));
        Ok(None)
    }
}

impl From<&[&str]> for RankedPatterns {
    fn from(patterns: &[&str]) -> Self {
        Self::new(patterns.iter().copied())
    }
}
