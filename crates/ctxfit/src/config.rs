//! Window configuration: model id, context-window limits, safety buffers.
//!
//! [`WindowConfig`] is an explicit immutable value handed to the fitting
//! entry points — there is no ambient global configuration. A thin adapter
//! at the process boundary (the CLI, or whatever embeds this crate) reads
//! real configuration once and constructs this value.
//!
//! # Examples
//!
//! ```
//! use ctxfit::config::WindowConfig;
//!
//! let config = WindowConfig::new("openai:gpt-5-mini")
//!     .with_limit("openai:gpt-5-mini", 400_000)
//!     .with_safety_buffer(0.85);
//!
//! assert_eq!(config.lookup_context_window(), Some(400_000));
//! ```

use std::collections::HashMap;
use std::time::Duration;

/// Default safety buffer for the turn-based fitting path.
pub const DEFAULT_SAFETY_BUFFER: f64 = 0.85;

/// Default safety buffer for the free-text fitting path.
pub const DEFAULT_TEXT_SAFETY_BUFFER: f64 = 0.75;

/// Default cooperative delay between counting calls in the drop pass.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(250);

/// Immutable fitting configuration for one model.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Model descriptor, `provider:model` style (e.g. `openai:gpt-5-mini`).
    pub model: String,
    /// Context-window sizes keyed by model descriptor. Pre-seeded with
    /// known models; overridable per descriptor.
    pub context_window_limits: HashMap<String, i64>,
    /// Fraction of the window the turn fitter may actually use.
    pub safety_buffer: f64,
    /// Fraction of the window the free-text fitter may actually use.
    pub text_safety_buffer: f64,
    /// Cooperative delay between drop-pass counting calls. Zero disables
    /// pacing entirely.
    pub pacing_delay: Duration,
}

impl WindowConfig {
    /// Create a config for the given model with the built-in limits table.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            context_window_limits: default_limits(),
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            text_safety_buffer: DEFAULT_TEXT_SAFETY_BUFFER,
            pacing_delay: DEFAULT_PACING_DELAY,
        }
    }

    /// Set or override the context window for a model descriptor.
    pub fn with_limit(mut self, model: impl Into<String>, tokens: i64) -> Self {
        self.context_window_limits.insert(model.into(), tokens);
        self
    }

    /// Override the turn-path safety buffer.
    pub fn with_safety_buffer(mut self, buffer: f64) -> Self {
        self.safety_buffer = buffer;
        self
    }

    /// Override the free-text safety buffer.
    pub fn with_text_safety_buffer(mut self, buffer: f64) -> Self {
        self.text_safety_buffer = buffer;
        self
    }

    /// Override the drop-pass pacing delay.
    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    /// The context window of the active model, or `None` when unknown.
    ///
    /// Callers treat `None` as "do nothing" — an unknown model is never an
    /// error here.
    pub fn lookup_context_window(&self) -> Option<i64> {
        self.context_window_limits.get(&self.model).copied()
    }
}

/// Known context-window sizes. Kept deliberately short: anything not listed
/// here is supplied by the embedder through [`WindowConfig::with_limit`].
fn default_limits() -> HashMap<String, i64> {
    let known: [(&str, i64); 8] = [
        ("openai:gpt-4o", 128_000),
        ("openai:gpt-4o-mini", 128_000),
        ("openai:gpt-4.1", 1_047_576),
        ("openai:gpt-5", 400_000),
        ("openai:gpt-5-mini", 400_000),
        ("anthropic:claude-sonnet-4", 200_000),
        ("google-gla:gemini-2.5-pro", 1_048_576),
        ("google-gla:gemini-2.5-flash", 1_048_576),
    ];
    known
        .iter()
        .map(|(model, tokens)| ((*model).to_string(), *tokens))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_resolves() {
        let config = WindowConfig::new("openai:gpt-4o");
        assert_eq!(config.lookup_context_window(), Some(128_000));
    }

    #[test]
    fn unknown_model_is_none() {
        let config = WindowConfig::new("acme:mystery-model");
        assert_eq!(config.lookup_context_window(), None);
    }

    #[test]
    fn override_wins_over_builtin() {
        let config = WindowConfig::new("openai:gpt-4o").with_limit("openai:gpt-4o", 1_000);
        assert_eq!(config.lookup_context_window(), Some(1_000));
    }

    #[test]
    fn defaults_match_documented_buffers() {
        let config = WindowConfig::new("openai:gpt-5-mini");
        assert_eq!(config.safety_buffer, DEFAULT_SAFETY_BUFFER);
        assert_eq!(config.text_safety_buffer, DEFAULT_TEXT_SAFETY_BUFFER);
        assert_eq!(config.pacing_delay, DEFAULT_PACING_DELAY);
    }
}
