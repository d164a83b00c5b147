//! Binary-search cropping of a single turn to a token cap.
//!
//! Two entry points share one search routine: [`crop_turn`] flattens a
//! turn's text and keeps the largest prefix and suffix that fit the cap
//! around a truncation marker, and [`crop_tool_returns`] applies one shared
//! crop width to every tool-result payload inside a turn so no tool call is
//! favored over another. [`crop_dispatch`] picks between them by content.
//!
//! Token counts are assumed monotonically non-decreasing in the crop width,
//! which makes the widest fitting crop findable by binary search. All
//! slicing is done on char vectors, never on byte offsets.

use crate::counter::TokenCounter;
use crate::{Part, Turn, TurnKind};
use std::slice;
use tracing::trace;

/// Marker spliced where turn content was removed.
///
/// Consumers pattern-match on this exact string; it is distinct from the
/// free-text marker ([`super::text::TEXT_CUT_MARKER`]) by design.
pub const CROP_MARKER: &str = "[[ cut for context size ]]";

async fn count_one<C>(counter: &C, turn: &Turn) -> Result<i64, String>
where
    C: TokenCounter + ?Sized,
{
    counter.count(slice::from_ref(turn)).await
}

/// `content` reduced to its first and last `k` characters around the crop
/// marker. Content of at most `2k` characters is returned whole, unmarked.
fn cut_middle(content: &str, k: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= 2 * k {
        return content.to_string();
    }
    let prefix: String = chars[..k].iter().collect();
    let suffix: String = chars[chars.len() - k..].iter().collect();
    format!("{prefix}{CROP_MARKER}{suffix}")
}

/// Binary-search the largest crop width `k` in `[0, max_k]` whose candidate
/// turn counts at most `cap` tokens.
///
/// Returns `None` when even `build(0)` — the marker-only candidate —
/// overflows the cap, i.e. nothing representable fits.
async fn largest_fitting<C, F>(
    counter: &C,
    cap: i64,
    max_k: usize,
    build: F,
) -> Result<Option<Turn>, String>
where
    C: TokenCounter + ?Sized,
    F: Fn(usize) -> Turn,
{
    if count_one(counter, &build(0)).await? > cap {
        return Ok(None);
    }

    let mut lo = 0usize;
    let mut hi = max_k;
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if count_one(counter, &build(mid)).await? <= cap {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    trace!("crop search settled on width {lo} of max {max_k} for cap {cap}");
    Ok(Some(build(lo)))
}

/// Shrink one turn's flattened text to fit `cap` tokens.
///
/// - `cap <= 0` empties the turn (same kind, zero content).
/// - A turn already within the cap is returned unchanged.
/// - If even the marker alone overflows the cap, the turn is emptied — a
///   truncation marker must never itself blow the budget.
/// - Otherwise the largest fitting `text[..k] + marker + text[len-k..]` is
///   found by binary search.
///
/// All part structure beyond the flattened text is discarded: Response
/// turns come back as a single `Text` part, Request turns as a single
/// `UserInput` part. Turns holding tool results belong in
/// [`crop_tool_returns`] instead — use [`crop_dispatch`] when unsure.
pub async fn crop_turn<C>(counter: &C, turn: &Turn, cap: i64) -> Result<Turn, String>
where
    C: TokenCounter + ?Sized,
{
    if cap <= 0 {
        return Ok(turn.emptied());
    }
    if count_one(counter, turn).await? <= cap {
        return Ok(turn.clone());
    }

    let kind = turn.kind;
    let text = turn.flat_text();
    let max_k = text.chars().count() / 2;
    let build = |k: usize| Turn::with_text(kind, cut_middle(&text, k));

    match largest_fitting(counter, cap, max_k, build).await? {
        Some(cropped) => Ok(cropped),
        None => Ok(turn.emptied()),
    }
}

/// The turn with every tool-result payload emptied, ids and names intact.
fn empty_returns(turn: &Turn) -> Turn {
    let parts = turn
        .parts
        .iter()
        .map(|p| match p {
            Part::ToolReturn { id, name, .. } => Part::ToolReturn {
                id: id.clone(),
                name: name.clone(),
                content: String::new(),
            },
            other => other.clone(),
        })
        .collect();
    Turn {
        kind: turn.kind,
        parts,
    }
}

/// Shrink the tool-result payloads of a Request turn to fit `cap` tokens.
///
/// One shared crop width is searched and applied uniformly to every
/// result's content, so all results within the turn shrink proportionally
/// instead of one tool call being favored over another. Call and return
/// identity (`id`, `name`) always survives; when not even marker-only
/// payloads fit, every payload is emptied.
pub async fn crop_tool_returns<C>(counter: &C, turn: &Turn, cap: i64) -> Result<Turn, String>
where
    C: TokenCounter + ?Sized,
{
    if count_one(counter, turn).await? <= cap {
        return Ok(turn.clone());
    }
    if cap <= 0 {
        return Ok(empty_returns(turn));
    }

    let max_k = turn
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolReturn { content, .. } => Some(content.chars().count()),
            _ => None,
        })
        .max()
        .unwrap_or(0)
        / 2;

    let build = |k: usize| {
        let parts = turn
            .parts
            .iter()
            .map(|p| match p {
                Part::ToolReturn { id, name, content } => Part::ToolReturn {
                    id: id.clone(),
                    name: name.clone(),
                    content: cut_middle(content, k),
                },
                other => other.clone(),
            })
            .collect();
        Turn {
            kind: turn.kind,
            parts,
        }
    };

    match largest_fitting(counter, cap, max_k, build).await? {
        Some(cropped) => Ok(cropped),
        None => Ok(empty_returns(turn)),
    }
}

/// Crop a turn by whichever strategy matches its content: Request turns
/// holding tool results keep their call/return structure, everything else
/// goes through the generic text cropper.
pub async fn crop_dispatch<C>(counter: &C, turn: &Turn, cap: i64) -> Result<Turn, String>
where
    C: TokenCounter + ?Sized,
{
    if turn.kind == TurnKind::Request && turn.has_tool_returns() {
        crop_tool_returns(counter, turn, cap).await
    } else {
        crop_turn(counter, turn, cap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CountFuture;

    /// Deterministic counter: one token per character of flattened text.
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count<'a>(&'a self, turns: &'a [Turn]) -> CountFuture<'a> {
            let total: i64 = turns
                .iter()
                .map(|t| t.flat_text().chars().count() as i64)
                .sum();
            Box::pin(std::future::ready(Ok(total)))
        }
    }

    #[tokio::test]
    async fn within_cap_is_unchanged() {
        let turn = Turn::response_text("short");
        let out = crop_turn(&CharCounter, &turn, 100).await.unwrap();
        assert_eq!(out, turn);
    }

    #[tokio::test]
    async fn zero_cap_empties() {
        let turn = Turn::response_text("anything at all");
        let out = crop_turn(&CharCounter, &turn, 0).await.unwrap();
        assert_eq!(out.flat_text(), "");
        assert_eq!(out.kind, TurnKind::Response);
    }

    #[tokio::test]
    async fn marker_sits_between_prefix_and_suffix() {
        let text = format!("{}{}", "a".repeat(200), "z".repeat(200));
        let turn = Turn::response_text(&text);
        let out = crop_turn(&CharCounter, &turn, 100).await.unwrap();

        let cropped = out.flat_text();
        assert!(cropped.contains(CROP_MARKER));
        assert!(cropped.starts_with('a'));
        assert!(cropped.ends_with('z'));
        assert!((cropped.chars().count() as i64) <= 100);
    }

    #[tokio::test]
    async fn result_is_widest_fit() {
        let turn = Turn::response_text("x".repeat(400));
        let cap = 100;
        let out = crop_turn(&CharCounter, &turn, cap).await.unwrap();
        // marker is 26 chars; best k = (100 - 26) / 2 = 37 → 37 + 26 + 37 = 100
        assert_eq!(out.flat_text().chars().count(), 100);
    }

    #[tokio::test]
    async fn marker_overflow_empties_without_marker() {
        let turn = Turn::response_text("y".repeat(50));
        let cap = (CROP_MARKER.chars().count() - 1) as i64;
        let out = crop_turn(&CharCounter, &turn, cap).await.unwrap();
        assert_eq!(out.flat_text(), "");
        assert!(!out.flat_text().contains(CROP_MARKER));
    }

    #[tokio::test]
    async fn request_kind_is_reconstructed_as_user_input() {
        let turn = Turn::user("u".repeat(300));
        let out = crop_turn(&CharCounter, &turn, 80).await.unwrap();
        assert_eq!(out.kind, TurnKind::Request);
        assert!(matches!(out.parts.as_slice(), [Part::UserInput { .. }]));
    }

    #[tokio::test]
    async fn tool_returns_share_one_width() {
        let turn = Turn::request(vec![
            Part::ToolReturn {
                id: "c1".into(),
                name: "grep".into(),
                content: "a".repeat(300),
            },
            Part::ToolReturn {
                id: "c2".into(),
                name: "find".into(),
                content: "b".repeat(300),
            },
        ]);
        let out = crop_tool_returns(&CharCounter, &turn, 200).await.unwrap();

        let payloads: Vec<&str> = out
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolReturn { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads.len(), 2);
        // Both shrunk by the same width, both marked.
        assert_eq!(
            payloads[0].chars().count(),
            payloads[1].chars().count()
        );
        assert!(payloads.iter().all(|c| c.contains(CROP_MARKER)));
    }

    #[tokio::test]
    async fn tool_return_identity_survives_zero_cap() {
        let turn = Turn::tool_return("c9", "sh", "x".repeat(100));
        let out = crop_tool_returns(&CharCounter, &turn, 0).await.unwrap();
        match &out.parts[0] {
            Part::ToolReturn { id, name, content } => {
                assert_eq!(id, "c9");
                assert_eq!(name, "sh");
                assert!(content.is_empty());
            }
            other => panic!("expected tool return, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_payload_is_kept_whole_at_shared_width() {
        let turn = Turn::request(vec![
            Part::ToolReturn {
                id: "c1".into(),
                name: "grep".into(),
                content: "tiny".into(),
            },
            Part::ToolReturn {
                id: "c2".into(),
                name: "cat".into(),
                content: "c".repeat(500),
            },
        ]);
        let out = crop_tool_returns(&CharCounter, &turn, 120).await.unwrap();
        match &out.parts[0] {
            Part::ToolReturn { content, .. } => assert_eq!(content, "tiny"),
            other => panic!("expected tool return, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_content() {
        let plain = Turn::user("p".repeat(100));
        let out = crop_dispatch(&CharCounter, &plain, 40).await.unwrap();
        assert!(matches!(out.parts.as_slice(), [Part::UserInput { .. }]));

        let with_return = Turn::tool_return("c1", "sh", "r".repeat(100));
        let out = crop_dispatch(&CharCounter, &with_return, 40).await.unwrap();
        assert!(out.has_tool_returns());
    }

    #[tokio::test]
    async fn cropping_twice_is_stable() {
        let turn = Turn::response_text("s".repeat(500));
        let once = crop_turn(&CharCounter, &turn, 90).await.unwrap();
        let twice = crop_turn(&CharCounter, &once, 90).await.unwrap();
        assert_eq!(twice, once);
    }
}
