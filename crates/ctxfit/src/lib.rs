//! Context-budget compaction engine for LLM agent trajectories.
//!
//! Every model imposes a hard token budget per request — the context window.
//! A multi-turn agent trajectory, full of tool invocations and their
//! sometimes-enormous outputs, will eventually exceed it. `ctxfit` takes an
//! ordered sequence of conversation [`Turn`]s and a token budget and produces
//! a possibly-modified sequence that fits the budget, keeps every tool result
//! paired with its originating call, and keeps the most recent turns in the
//! most detail. When nothing fits, it degrades step by step instead of
//! failing.
//!
//! # Getting started
//!
//! ```ignore
//! use ctxfit::counter::HeuristicCounter;
//! use ctxfit::window::TurnFitter;
//! use ctxfit::Turn;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let counter = HeuristicCounter::new();
//!     let fitter = TurnFitter::new(&counter).with_safety_buffer(0.85);
//!
//!     let turns = vec![
//!         Turn::user("Read src/main.rs and summarize it."),
//!         Turn::tool_call("call-1", "read_file", serde_json::json!({"path": "src/main.rs"})),
//!         Turn::tool_return("call-1", "read_file", "fn main() { ... }"),
//!     ];
//!
//!     let fitted = fitter.fit(turns, 200_000).await?;
//!     println!("{} turns survive", fitted.len());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Fit a whole trajectory:** see [`TurnFitter`](window::TurnFitter) — the
//!   full pipeline of per-turn caps, oldest-first shrinking, oldest-first
//!   dropping, orphan cleanup, and last-resort salvage.
//!
//! - **Count tokens:** implement [`TokenCounter`](counter::TokenCounter), or
//!   use [`HeuristicCounter`](counter::HeuristicCounter) (offline
//!   chars-per-token estimate) / [`RemoteCounter`](counter::RemoteCounter)
//!   (exact counts from a provider count-tokens endpoint).
//!
//! - **Fit one string, no turns involved:** see
//!   [`fit_text`](window::text::fit_text) and
//!   [`TextFitter`](window::TextFitter) — a synchronous middle-cut over a
//!   local BPE tokenizer, used for raw command output that never becomes a
//!   structured turn.
//!
//! - **Look up a model's window:** see [`WindowConfig`](config::WindowConfig)
//!   and its `lookup_context_window()`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`window`] | [`TurnFitter`](window::TurnFitter) pipeline, croppers, orphan resolver, free-text fitter |
//! | [`counter`] | [`TokenCounter`](counter::TokenCounter) capability and its offline/remote implementations |
//! | [`config`] | [`WindowConfig`](config::WindowConfig) — model id, window limits, safety buffers |
//!
//! # Design principles
//!
//! 1. **Turns are immutable values.** Every edit constructs a fresh turn;
//!    no pass mutates a turn in place. Re-running the fitter on its own
//!    output is a no-op.
//!
//! 2. **Structure outlives content.** A tool result is only meaningful next
//!    to its call. Cropping may empty a result's payload but keeps its id,
//!    and anything orphaned is replaced by an explicit notice rather than
//!    silently dropped from its slot.
//!
//! 3. **Recency wins.** The newest turn gets the largest share of the
//!    budget, the oldest turns are shrunk and evicted first.
//!
//! 4. **Degrade, don't fail.** An unconfigured counter means "do nothing";
//!    an impossible cap means empty content; a collapsed history means a
//!    fixed notice turn — never an error, never an empty list for non-empty
//!    input.

pub mod config;
pub mod counter;
pub mod window;

use serde::{Deserialize, Serialize};

// ── Turn & part model ──────────────────────────────────────────────

/// Direction of a turn in the trajectory.
///
/// `Request` turns are produced by the user/tool side, `Response` turns by
/// the model. A turn's kind is immutable: cropping reconstructs a turn of
/// the same kind, never the other.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Request,
    Response,
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnKind::Request => write!(f, "request"),
            TurnKind::Response => write!(f, "response"),
        }
    }
}

/// A typed fragment within a turn.
///
/// `ToolCall` appears on Response turns, `ToolReturn` on Request turns;
/// everything else is free text and is sized as plain text by every pass.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Model-produced free text.
    Text { text: String },
    /// Free text supplied by the orchestrator or user.
    UserInput { text: String },
    /// System prompt content.
    SystemPrompt { text: String },
    /// Extended-thinking trace.
    Thinking { text: String },
    /// Retry notice injected by the loop.
    RetryNotice { text: String },
    /// A tool invocation emitted by the model. `id` is unique per trajectory.
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// A tool result whose `id` must match a prior `ToolCall`.
    ToolReturn {
        id: String,
        name: String,
        content: String,
    },
}

impl Part {
    /// The free-text projection of this part, if it has one.
    ///
    /// Tool calls carry no free text and project to `None`; they are sized
    /// by the counter from their name and arguments instead.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text }
            | Part::UserInput { text }
            | Part::SystemPrompt { text }
            | Part::Thinking { text }
            | Part::RetryNotice { text } => Some(text),
            Part::ToolReturn { content, .. } => Some(content),
            Part::ToolCall { .. } => None,
        }
    }

    /// Whether this part is a tool result.
    pub fn is_tool_return(&self) -> bool {
        matches!(self, Part::ToolReturn { .. })
    }

    /// Whether this part is a tool invocation.
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Part::ToolCall { .. })
    }
}

/// One request or response unit in a conversation trajectory.
///
/// Owns an ordered list of [`Part`]s. Sequence order is strictly
/// chronological — index 0 is the oldest turn everywhere in this crate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Turn {
    pub kind: TurnKind,
    pub parts: Vec<Part>,
}

impl Turn {
    /// A Request turn with the given parts.
    pub fn request(parts: Vec<Part>) -> Self {
        Self {
            kind: TurnKind::Request,
            parts,
        }
    }

    /// A Response turn with the given parts.
    pub fn response(parts: Vec<Part>) -> Self {
        Self {
            kind: TurnKind::Response,
            parts,
        }
    }

    /// A Request turn carrying one user-input part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::request(vec![Part::UserInput { text: text.into() }])
    }

    /// A Request turn carrying one system-prompt part.
    pub fn system_prompt(text: impl Into<String>) -> Self {
        Self::request(vec![Part::SystemPrompt { text: text.into() }])
    }

    /// A Response turn carrying one text part.
    pub fn response_text(text: impl Into<String>) -> Self {
        Self::response(vec![Part::Text { text: text.into() }])
    }

    /// A Response turn carrying one tool invocation.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self::response(vec![Part::ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }])
    }

    /// A Request turn carrying one tool result.
    pub fn tool_return(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::request(vec![Part::ToolReturn {
            id: id.into(),
            name: name.into(),
            content: content.into(),
        }])
    }

    /// A turn of the given kind holding a single flat text part.
    ///
    /// Response turns get a `Text` part, Request turns a `UserInput` part.
    /// This is the reconstruction used by the generic cropper, which
    /// deliberately discards part structure.
    pub fn with_text(kind: TurnKind, text: impl Into<String>) -> Self {
        let text = text.into();
        match kind {
            TurnKind::Response => Self::response(vec![Part::Text { text }]),
            TurnKind::Request => Self::request(vec![Part::UserInput { text }]),
        }
    }

    /// The same-kind turn with all textual content removed.
    pub fn emptied(&self) -> Self {
        Self::with_text(self.kind, "")
    }

    /// Concatenated free-text projection of every part, in order.
    pub fn flat_text(&self) -> String {
        let pieces: Vec<&str> = self.parts.iter().filter_map(Part::as_text).collect();
        pieces.join("\n")
    }

    /// Whether any part is a tool result.
    pub fn has_tool_returns(&self) -> bool {
        self.parts.iter().any(Part::is_tool_return)
    }

    /// Ids of every tool invocation in this turn.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }
}
