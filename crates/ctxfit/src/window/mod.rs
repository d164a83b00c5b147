//! Turn-sequence fitting: croppers, orphan cleanup, and the full pipeline.
//!
//! The context window is the scarcest resource in any LLM agent. This module
//! is the machinery that forces a trajectory back under budget, in order of
//! increasing destructiveness:
//!
//! 1. **[`crop`]** — binary-search cropping of a single turn's text (or of
//!    the payloads of its tool results) down to a token cap, splicing in a
//!    truncation marker.
//!
//! 2. **[`fit`]** — [`TurnFitter`]: per-turn caps on the newest two turns,
//!    then oldest-first shrinking, then oldest-first dropping, then
//!    last-resort salvage of the newest turns.
//!
//! 3. **[`orphans`]** — structural repair: a tool result whose call was
//!    cropped or dropped away is removed (or its slot replaced with a
//!    notice), so the surviving sequence stays valid.
//!
//! 4. **[`text`]** — the independent free-text path: a synchronous
//!    middle-cut over a local BPE tokenizer for raw command output that
//!    never becomes a structured turn.
//!
//! The two truncation markers ([`CROP_MARKER`] and
//! [`text::TEXT_CUT_MARKER`]) are distinct on purpose; consumers
//! pattern-match on them and they must not be unified.

pub mod crop;
pub mod fit;
pub mod orphans;
pub mod text;

// Re-export commonly used items at the module level.
pub use crop::{CROP_MARKER, crop_dispatch, crop_tool_returns, crop_turn};
pub use fit::{PRUNED_NOTICE, TurnFitter};
pub use orphans::{REMOVED_NOTICE, remove_orphans};
pub use text::{TEXT_CUT_MARKER, TextFitter, fit_message_into_context_window, fit_text};
