//! Replay scripts: one JSON object per line, each either a browser signal or
//! a chat action, preceded by a delay.
//!
//! ```text
//! {"delay_ms": 0, "signal": {"type": "scroll", "scroll_top": 250, "scroll_height": 1800, "viewport_height": 800}}
//! {"delay_ms": 400, "chat": {"action": "send", "text": "Bonjour"}}
//! ```

use anyhow::Context;
use serde::Deserialize;

use storefront_tracker::BrowserSignal;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: ScriptAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptAction {
    Signal(BrowserSignal),
    Chat(ChatAction),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChatAction {
    Open,
    Close,
    Minimize,
    Send { text: String },
    /// Run one poll cycle immediately instead of waiting for the timer.
    Poll,
}

/// Parse a script. Blank lines and lines starting with `#` are skipped.
pub fn parse_script(source: &str) -> anyhow::Result<Vec<ScriptStep>> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid script line {}", idx + 1))
        })
        .collect()
}
