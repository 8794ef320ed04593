use super::traits::TargetDescriptor;

pub const KEY: &str = "claude";

pub fn descriptor() -> TargetDescriptor {
    TargetDescriptor {
        key: KEY,
        name: "Claude",
        url_part: "claude.ai",
        open_url: "https://claude.ai/new",
        message_selectors: &[
            "div.font-claude-message",
            "div[data-testid='user-message']",
            "div[data-testid='assistant-message']",
        ],
        input_selectors: &[
            "div[contenteditable='true']",
            "textarea[placeholder*='Message']",
            "div.ProseMirror",
        ],
        send_selectors: &[
            "button[aria-label='Send Message']",
            "button[data-testid='send-button']",
        ],
    }
}
