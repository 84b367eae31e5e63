//! CLI hook payload adapters.
//!
//! Each supported CLI speaks its own dialect of lifecycle hooks — kebab
//! case for Claude Code, PascalCase for Gemini, a notify blob for
//! Codex. An adapter turns the native payload into a unified
//! [`HookEvent`] and turns the dispatcher's [`HookResponse`] back into
//! whatever shape that CLI requires. Unknown hook names map to
//! `Notification` so a new CLI version can never wedge the pipeline.

pub mod claude;
pub mod codex;
pub mod gemini;

use gobby_core::{HookEvent, HookResponse, SessionSource};
use serde_json::Value;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;

/// Translation between one CLI's native hook payloads and the unified
/// event model.
///
/// The HTTP surface pairs an adapter with the dispatch engine:
/// `translate_to_event` → `dispatch.handle` → `translate_from_response`.
pub trait CliAdapter: Send + Sync {
    /// Which CLI this adapter serves.
    fn source(&self) -> SessionSource;

    /// Convert a native payload (the `{hook_type, input_data}` wrapper
    /// posted by the CLI-side dispatcher) into a unified event.
    fn translate_to_event(&self, hook_type: &str, input_data: &Value) -> HookEvent;

    /// Convert a unified response into the CLI's native response shape.
    /// `hook_type` is the original native hook name, used where the CLI
    /// requires it echoed back.
    fn translate_from_response(&self, response: &HookResponse, hook_type: Option<&str>) -> Value;
}

/// Look up the adapter for a source.
#[must_use]
pub fn adapter_for(source: SessionSource) -> Box<dyn CliAdapter> {
    match source {
        SessionSource::Claude | SessionSource::Antigravity => Box::new(ClaudeAdapter::new()),
        SessionSource::Gemini => Box::new(GeminiAdapter::new()),
        SessionSource::Codex => Box::new(CodexAdapter::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_for_covers_all_sources() {
        for source in [
            SessionSource::Claude,
            SessionSource::Gemini,
            SessionSource::Codex,
            SessionSource::Antigravity,
        ] {
            let adapter = adapter_for(source);
            // Antigravity rides the Claude wire format.
            if source == SessionSource::Antigravity {
                assert_eq!(adapter.source(), SessionSource::Claude);
            } else {
                assert_eq!(adapter.source(), source);
            }
        }
    }
}
