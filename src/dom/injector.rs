use super::{Document, DomError, RankedPatterns};
use crate::error::RelayError;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMethod {
    ButtonClick,
    EnterKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionResult {
    pub success: bool,
    pub method: Option<SubmitMethod>,
    pub error: Option<String>,
}

impl InjectionResult {
    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            method: None,
            error: Some(error.to_string()),
        }
    }
}

/// Type `text` into the page's composer and submit it.
///
/// Best effort only: editors that keep their own model may ignore a direct
/// content write, and an Enter key-down is not guaranteed to submit. A
/// successful result means the steps ran, not that the host sent anything.
///
/// `Err` is reserved for the page being unreachable while locating the input.
pub async fn inject(
    doc: &dyn Document,
    input_patterns: &RankedPatterns,
    send_patterns: &RankedPatterns,
    text: &str,
) -> Result<InjectionResult, DomError> {
    let Some(input) = input_patterns.resolve(doc).await? else {
        return Ok(InjectionResult::failed(RelayError::InputNotFound));
    };
    let Some(input) = input.elements.into_iter().next() else {
        return Ok(InjectionResult::failed(RelayError::InputNotFound));
    };

    debug!(
        "[injector] writing {} chars via {} path into {}",
        text.chars().count(),
        if input.editable { "editable" } else { "value" },
        input.pattern
    );

    if let Err(e) = doc.write_text(&input, text).await {
        return Ok(InjectionResult::failed(e));
    }
    if let Err(e) = doc.notify_input(&input).await {
        return Ok(InjectionResult::failed(e));
    }

    let button = match send_patterns.resolve(doc).await {
        Ok(resolution) => resolution.and_then(|r| r.elements.into_iter().next()),
        Err(e) => return Ok(InjectionResult::failed(e)),
    };

    let method = match button {
        Some(button) => {
            if let Err(e) = doc.click(&button).await {
                return Ok(InjectionResult::failed(e));
            }
            SubmitMethod::ButtonClick
        }
        None => {
            info!("[injector] {}", RelayError::SubmitPathUnavailable);
            if let Err(e) = doc.press_enter(&input).await {
                return Ok(InjectionResult::failed(e));
            }
            SubmitMethod::EnterKey
        }
    };

    Ok(InjectionResult {
        success: true,
        method: Some(method),
        error: None,
    })
}
