//! Structural repair: remove tool results whose originating call is gone.
//!
//! Cropping and dropping can evict the Response turn that carried a tool
//! call while the Request turn with its result survives. Such a result is an
//! *orphan* — invalid on the wire for every provider — and is corrected here
//! as a normal part of the pipeline, never surfaced as an error.
//!
//! A turn that loses every part to orphan removal is not deleted and not
//! emitted empty: its slot is filled with a small notice turn of the same
//! kind, so positional assumptions made by callers keep holding.

use crate::{Part, Turn, TurnKind};
use std::collections::HashSet;
use tracing::debug;

/// Notice text carried by the placeholder left where orphaned tool output
/// was removed.
pub const REMOVED_NOTICE: &str = "(tool output removed to fit context)";

/// The placeholder Request turn standing in for removed tool output.
pub fn placeholder_turn() -> Turn {
    Turn::user(REMOVED_NOTICE)
}

/// Remove every tool result lacking a preceding call with the same id.
///
/// A single left-to-right pass: Response turns register the call ids they
/// introduce, and each tool result in a Request turn survives iff its id
/// has been seen at or before its position. Duplicate results for a seen id
/// all survive — duplicates are never orphans and are never deduplicated.
///
/// Request turns keep their non-result parts regardless; only a turn that
/// held results and retains nothing at all is replaced by
/// [`placeholder_turn`]. The output always has the same length as the input.
pub fn remove_orphans(turns: Vec<Turn>) -> Vec<Turn> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut removed = 0usize;
    let mut out = Vec::with_capacity(turns.len());

    for turn in turns {
        match turn.kind {
            TurnKind::Response => {
                // Only Response turns introduce call ids.
                seen.extend(turn.tool_call_ids().map(str::to_string));
                out.push(turn);
            }
            TurnKind::Request => {
                if !turn.has_tool_returns() {
                    out.push(turn);
                    continue;
                }
                let before = turn.parts.len();
                let kept: Vec<Part> = turn
                    .parts
                    .into_iter()
                    .filter(|part| match part {
                        Part::ToolReturn { id, .. } => seen.contains(id),
                        _ => true,
                    })
                    .collect();
                if kept.len() < before {
                    removed += 1;
                }
                if kept.is_empty() {
                    out.push(placeholder_turn());
                } else {
                    out.push(Turn::request(kept));
                }
            }
        }
    }

    if removed > 0 {
        debug!("orphan pass cleaned tool results in {removed} turn(s)");
    }
    out
}
