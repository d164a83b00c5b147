//! Token counting capability consumed by the fitting pipeline.
//!
//! The [`TokenCounter`] trait is the engine's only view of tokenization for
//! structured turns: given a slice of turns, return the total token count.
//! Counting may be a network round-trip to a provider count-tokens endpoint,
//! so the trait is async; an unconfigured counter reports
//! [`COUNT_UNAVAILABLE`] instead of failing, and the fitter treats that as
//! "do nothing".
//!
//! Two implementations ship with the crate: [`HeuristicCounter`] (offline
//! chars-per-token estimate, never unavailable) and [`RemoteCounter`] (exact
//! counts from an HTTP endpoint).

use crate::{Part, Turn, TurnKind};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sentinel count returned when the counter is not configured.
///
/// Only the top of the pipeline inspects this value; once fitting starts,
/// the counter is assumed usable.
pub const COUNT_UNAVAILABLE: i64 = -1;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Per-turn overhead (role label, framing tokens).
const TURN_OVERHEAD_TOKENS: i64 = 4;

/// Overhead for the JSON structure of one tool call.
const TOOL_CALL_OVERHEAD_TOKENS: i64 = 10;

/// Boxed future returned by [`TokenCounter::count`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type CountFuture<'a> = Pin<Box<dyn Future<Output = Result<i64, String>> + Send + 'a>>;

/// Counts the tokens a slice of turns would occupy in a model's context.
///
/// Returns `Ok(COUNT_UNAVAILABLE)` when the underlying model/config is not
/// available. Transport or provider failures are `Err` and propagate out of
/// the fitter uncaught — retry policy belongs to the counter itself.
pub trait TokenCounter: Send + Sync {
    fn count<'a>(&'a self, turns: &'a [Turn]) -> CountFuture<'a>;
}

// ── Offline estimation ─────────────────────────────────────────────

/// Offline token counter using a chars-per-token ratio.
///
/// Good enough for budgeting when no counting endpoint is reachable, and
/// fully deterministic. Tool-call names and arguments are charged with a
/// small per-call overhead on top of the flat text.
#[derive(Debug, Clone)]
pub struct HeuristicCounter {
    chars_per_token: f64,
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl HeuristicCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the chars-per-token ratio (e.g. from calibration data).
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = ratio;
        self
    }

    fn estimate_part(&self, part: &Part) -> i64 {
        match part {
            Part::ToolCall { name, args, .. } => {
                let arg_chars = args.to_string().len();
                TOOL_CALL_OVERHEAD_TOKENS
                    + ((name.len() + arg_chars) as f64 / self.chars_per_token).ceil() as i64
            }
            Part::ToolReturn { id, name, content } => {
                ((id.len() + name.len() + content.len()) as f64 / self.chars_per_token).ceil()
                    as i64
            }
            other => other
                .as_text()
                .map_or(0, |t| (t.len() as f64 / self.chars_per_token).ceil() as i64),
        }
    }

    /// Estimate the total tokens for a slice of turns.
    pub fn estimate(&self, turns: &[Turn]) -> i64 {
        turns
            .iter()
            .map(|turn| {
                TURN_OVERHEAD_TOKENS
                    + turn
                        .parts
                        .iter()
                        .map(|p| self.estimate_part(p))
                        .sum::<i64>()
            })
            .sum()
    }
}

impl TokenCounter for HeuristicCounter {
    fn count<'a>(&'a self, turns: &'a [Turn]) -> CountFuture<'a> {
        let total = self.estimate(turns);
        Box::pin(std::future::ready(Ok(total)))
    }
}

// ── Remote counting ────────────────────────────────────────────────

/// Response body of a count-tokens endpoint. Providers disagree on the
/// field name, so both common spellings are accepted.
#[derive(Deserialize, Debug)]
struct CountResponse {
    input_tokens: Option<i64>,
    total_tokens: Option<i64>,
}

/// Async HTTP client for a provider count-tokens endpoint.
///
/// Serializes the turns into role/content messages and POSTs them with the
/// model id; the provider replies with the exact prompt token count. Without
/// an API key the counter is *unconfigured* and reports
/// [`COUNT_UNAVAILABLE`] rather than erroring.
pub struct RemoteCounter {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteCounter {
    /// Create a counter for the given endpoint and model, with no API key.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("ctxfit/0.4")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
        })
    }

    /// Attach the API key that authorizes counting calls.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn role_for(kind: TurnKind) -> &'static str {
        match kind {
            TurnKind::Request => "user",
            TurnKind::Response => "assistant",
        }
    }

    fn payload(&self, turns: &[Turn]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|t| {
                serde_json::json!({
                    "role": Self::role_for(t.kind),
                    "content": t.flat_text(),
                })
            })
            .collect();
        serde_json::json!({ "model": self.model, "messages": messages })
    }
}

impl TokenCounter for RemoteCounter {
    fn count<'a>(&'a self, turns: &'a [Turn]) -> CountFuture<'a> {
        Box::pin(async move {
            let Some(ref key) = self.api_key else {
                return Ok(COUNT_UNAVAILABLE);
            };

            debug!("count request: model={}, turns={}", self.model, turns.len());
            let start = Instant::now();

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {key}"))
                .json(&self.payload(turns))
                .send()
                .await
                .map_err(|e| format!("count request failed: {e}"))?;

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| format!("failed to read count response: {e}"))?;

            debug!(
                "count response: HTTP {} in {:.1}s ({} bytes)",
                status,
                start.elapsed().as_secs_f64(),
                text.len()
            );

            if !status.is_success() {
                return Err(format!("count endpoint HTTP {status}: {text}"));
            }

            let parsed: CountResponse = serde_json::from_str(&text)
                .map_err(|e| format!("failed to parse count response: {e}"))?;

            parsed
                .input_tokens
                .or(parsed.total_tokens)
                .ok_or_else(|| "count response carried no token count".to_string())
        })
    }
}
