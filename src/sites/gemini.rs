use super::traits::TargetDescriptor;

pub const KEY: &str = "gemini";

pub fn descriptor() -> TargetDescriptor {
    TargetDescriptor {
        key: KEY,
        name: "Gemini",
        url_part: "gemini.google.com",
        open_url: "https://gemini.google.com/app",
        message_selectors: &[
            "div.response-container",
            "message-content",
            ".model-response-text",
        ],
        input_selectors: &[
            "div.input-area",
            "rich-textarea",
            "div[contenteditable='true']",
        ],
        send_selectors: &["button[aria-label*='Send']", ".send-button"],
    }
}
