//! Free-text fitting over a local BPE tokenizer.
//!
//! Raw command output is captured as a plain string long before it becomes
//! a structured turn, and it can be enormous. This path fits such a string
//! into a token budget synchronously, with no counting round-trip: encode
//! with a local tiktoken encoding, keep the front and back of the token
//! sequence, splice a marker where the middle was.
//!
//! Two deliberate differences from the turn-based croppers:
//! - a non-positive effective budget means "do nothing", not "empty
//!   everything";
//! - the marker is its own string, [`TEXT_CUT_MARKER`], and must not be
//!   unified with [`CROP_MARKER`](super::crop::CROP_MARKER).

use crate::config::WindowConfig;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Marker spliced where free-text content was removed.
pub const TEXT_CUT_MARKER: &str = "\n[[ ... Cut to fit Context Window ... ]]\n";

/// Resolve the tiktoken encoding for a model descriptor.
///
/// Accepts the `provider:model` descriptor form and strips the `openai:`
/// prefix before lookup. Unrecognized models fall back to `o200k_base`,
/// the most common encoding among current models.
pub fn tokenizer_for_model(model: &str) -> Result<CoreBPE, String> {
    let name = model.strip_prefix("openai:").unwrap_or(model);
    match tiktoken_rs::get_bpe_from_model(name) {
        Ok(bpe) => Ok(bpe),
        Err(_) => {
            debug!("no tiktoken encoding for {model}; defaulting to o200k_base");
            tiktoken_rs::o200k_base().map_err(|e| format!("failed to load o200k_base: {e}"))
        }
    }
}

/// Fit `text` into `max_tokens` by cutting out its middle.
///
/// The working limit is `floor(max_tokens * safety_buffer)`; text already
/// within it is returned unchanged, and a non-positive working limit means
/// the text passes through untouched. Otherwise `max_tokens` minus the
/// marker's own tokens are kept — half from the front of the encoded
/// sequence, the remainder from the back — with the marker spliced between.
///
/// Fully synchronous and allocation-light; safe to call from hot paths
/// producing command output.
pub fn fit_text(text: &str, bpe: &CoreBPE, max_tokens: usize, safety_buffer: f64) -> String {
    let effective_max = (max_tokens as f64 * safety_buffer).floor() as i64;
    if effective_max < 1 {
        return text.to_string();
    }

    let ids = bpe.encode_ordinary(text);
    if ids.len() as i64 <= effective_max {
        return text.to_string();
    }

    let marker_ids = bpe.encode_ordinary(TEXT_CUT_MARKER);
    let keep = max_tokens.saturating_sub(marker_ids.len());
    if keep >= ids.len() {
        // The marker would not buy any reduction.
        return text.to_string();
    }
    let half = keep / 2;

    let mut cut = Vec::with_capacity(keep + marker_ids.len());
    cut.extend_from_slice(&ids[..half]);
    cut.extend_from_slice(&marker_ids);
    cut.extend_from_slice(&ids[ids.len() - (keep - half)..]);

    match bpe.decode(cut) {
        Ok(fitted) => fitted,
        Err(e) => {
            warn!("failed to decode cut token sequence ({e}); returning text unchanged");
            text.to_string()
        }
    }
}

/// A model-resolved free-text fitter: one tokenizer, one window, one buffer.
///
/// Construct it once from configuration and reuse it; encoding tables are
/// expensive to build and this type holds them ready.
pub struct TextFitter {
    bpe: CoreBPE,
    max_tokens: usize,
    safety_buffer: f64,
}

impl TextFitter {
    /// Build a fitter for the given model descriptor and context window.
    pub fn for_model(model: &str, context_window: usize) -> Result<Self, String> {
        Ok(Self {
            bpe: tokenizer_for_model(model)?,
            max_tokens: context_window,
            safety_buffer: crate::config::DEFAULT_TEXT_SAFETY_BUFFER,
        })
    }

    /// Override the safety buffer (default 0.75).
    pub fn with_safety_buffer(mut self, buffer: f64) -> Self {
        self.safety_buffer = buffer;
        self
    }

    /// Fit one string into this fitter's window.
    pub fn fit(&self, text: &str) -> String {
        fit_text(text, &self.bpe, self.max_tokens, self.safety_buffer)
    }
}

/// Config-driven wrapper: fit `content` into the active model's window.
///
/// Returns the input unchanged when it is `None` or empty, when the model's
/// context window is unknown, or when no tokenizer can be resolved — an
/// unknown model is never an error on this path.
pub fn fit_message_into_context_window(
    config: &WindowConfig,
    content: Option<&str>,
) -> Option<String> {
    let text = content?;
    if text.is_empty() {
        return Some(String::new());
    }

    let Some(limit) = config.lookup_context_window() else {
        return Some(text.to_string());
    };
    match TextFitter::for_model(&config.model, limit.max(0) as usize) {
        Ok(fitter) => Some(
            fitter
                .with_safety_buffer(config.text_safety_buffer)
                .fit(text),
        ),
        Err(e) => {
            warn!("no tokenizer for {}: {e}; returning content unchanged", config.model);
            Some(text.to_string())
        }
    }
}
