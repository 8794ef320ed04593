use serde::Serialize;

/// Static description of one monitored chat site.
#[derive(Debug, Clone, Serialize)]
pub struct TargetDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    /// Substring matched against tab URLs.
    pub url_part: &'static str,
    /// Where a lost tab gets reopened.
    pub open_url: &'static str,
    pub message_selectors: &'static [&'static str],
    pub input_selectors: &'static [&'static str],
    pub send_selectors: &'static [&'static str],
}

impl TargetDescriptor {
    pub fn matches_url(&self, url: &str) -> bool {
        url.contains(self.url_part)
    }
}
