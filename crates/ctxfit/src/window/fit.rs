//! The full fitting pipeline: caps, shrink, drop, repair, salvage.
//!
//! [`TurnFitter::fit`] walks a fixed sequence of states, each strictly more
//! destructive than the last, and stops as soon as the trajectory fits:
//!
//! ```text
//! CheckFits → ApplyCaps → ShrinkOldest → DropOldest
//!     → RemoveOrphans → Recheck → [ForceFitNewest | Salvage | Fallback]
//! ```
//!
//! The working budget is `floor(context_limit * safety_buffer)`. The two
//! newest turns get fixed shares of it (60% / 30%) because they carry the
//! active task context; every older turn is fair game for shrinking and
//! then eviction, oldest first. Whatever survives is repaired by the orphan
//! pass, and a final recheck guards against the repair itself pushing the
//! total back over budget.
//!
//! The pipeline is deterministic and idempotent: every decision is computed
//! against a hard cap, and content at or below its cap is never touched, so
//! re-running the fitter on its own output returns it unchanged.

use crate::counter::{COUNT_UNAVAILABLE, TokenCounter};
use crate::window::crop::{crop_dispatch, crop_turn};
use crate::window::orphans::{placeholder_turn, remove_orphans};
use crate::{Turn, TurnKind};
use std::time::Duration;
use tracing::{debug, warn};

/// Share of the budget reserved for the newest turn.
const NEWEST_CAP_FRACTION: f64 = 0.60;

/// Share of the budget reserved for the second-newest turn.
const SECOND_NEWEST_CAP_FRACTION: f64 = 0.30;

/// Budget shares for salvage, aligned to the newest turn (third-newest,
/// second-newest, newest). With fewer than three turns the tail applies.
const SALVAGE_CAP_FRACTIONS: [f64; 3] = [0.10, 0.25, 0.50];

/// How many of the newest turns salvage may keep.
const SALVAGE_KEEP: usize = 3;

/// Text of the Response turn returned when even salvage yields nothing.
pub const PRUNED_NOTICE: &str = "(conversation history removed to fit context)";

fn fraction_of(budget: i64, fraction: f64) -> i64 {
    (budget as f64 * fraction).floor() as i64
}

/// Fits a turn sequence into a model's context budget.
///
/// Borrows a [`TokenCounter`] and applies the full pipeline described in
/// the module docs. Construct one per compaction call or keep it around;
/// it holds no mutable state.
///
/// # Example
///
/// ```ignore
/// let counter = HeuristicCounter::new();
/// let fitter = TurnFitter::new(&counter)
///     .with_safety_buffer(0.85)
///     .with_pacing_delay(Duration::from_millis(250));
///
/// let fitted = fitter.fit(turns, 200_000).await?;
/// ```
pub struct TurnFitter<'a> {
    counter: &'a dyn TokenCounter,
    safety_buffer: f64,
    pacing_delay: Duration,
}

impl<'a> TurnFitter<'a> {
    /// Create a fitter over the given counter with default safety buffer
    /// (0.85) and pacing delay (250 ms).
    pub fn new(counter: &'a dyn TokenCounter) -> Self {
        Self {
            counter,
            safety_buffer: crate::config::DEFAULT_SAFETY_BUFFER,
            pacing_delay: crate::config::DEFAULT_PACING_DELAY,
        }
    }

    /// Fraction of the context limit the fitter may actually use.
    pub fn with_safety_buffer(mut self, buffer: f64) -> Self {
        self.safety_buffer = buffer;
        self
    }

    /// Cooperative delay between counting calls in the drop pass, so a
    /// rate-limited counting endpoint is not saturated. Zero disables it.
    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    /// Fit `turns` into `context_limit` tokens (scaled by the safety
    /// buffer), newest turns favored.
    ///
    /// An unavailable counter returns the input unchanged. Counting
    /// failures propagate. For non-empty input the result is never empty:
    /// the salvage and fallback tiers guarantee at least one turn.
    pub async fn fit(&self, turns: Vec<Turn>, context_limit: i64) -> Result<Vec<Turn>, String> {
        let total = self.counter.count(&turns).await?;
        if total == COUNT_UNAVAILABLE {
            warn!(
                "token counter unavailable; returning {} turn(s) unfitted",
                turns.len()
            );
            return Ok(turns);
        }

        let budget = fraction_of(context_limit, self.safety_buffer);
        if total <= budget {
            return Ok(turns);
        }
        debug!(
            "fitting {} turn(s): {total} tokens over budget {budget}",
            turns.len()
        );

        let original = turns.clone();
        let mut work = turns;

        // Fixed shares for the newest two turns; everything older is left
        // alone at this stage.
        if let Some(last) = work.len().checked_sub(1) {
            let cap = fraction_of(budget, NEWEST_CAP_FRACTION);
            let capped = crop_dispatch(self.counter, &work[last], cap).await?;
            work[last] = capped;
        }
        if let Some(second) = work.len().checked_sub(2) {
            let cap = fraction_of(budget, SECOND_NEWEST_CAP_FRACTION);
            let capped = crop_dispatch(self.counter, &work[second], cap).await?;
            work[second] = capped;
        }

        let mut total = self.counter.count(&work).await?;
        if total > budget {
            total = self.shrink_from_oldest(&mut work, budget, total).await?;
        }
        if total > budget {
            self.drop_from_oldest(&mut work, budget, total).await?;
        }

        // Always repair, whatever the budget says: cropping and dropping
        // above can themselves orphan a tool result.
        let cleaned = remove_orphans(work);

        if cleaned.is_empty() {
            if original.is_empty() {
                return Ok(cleaned);
            }
            return self.salvage(&original, budget).await;
        }

        let total = self.counter.count(&cleaned).await?;
        if total > budget {
            // Repair pushed us back over; keep only the newest survivor.
            debug!("post-repair total {total} over budget {budget}; force-fitting newest turn");
            if let Some(newest) = cleaned.last() {
                return Ok(vec![self.force_fit(newest, budget).await?]);
            }
        }
        Ok(cleaned)
    }

    /// Shrink turns oldest-first until the total fits.
    ///
    /// Each turn is cropped to whatever the budget leaves after counting
    /// every other turn, so early (old) turns absorb the cuts first and
    /// the pass stops as soon as the running total fits. `total` is the
    /// caller's current count for `turns`; the final total is returned.
    async fn shrink_from_oldest(
        &self,
        turns: &mut Vec<Turn>,
        budget: i64,
        mut total: i64,
    ) -> Result<i64, String> {
        if total <= budget {
            return Ok(total);
        }

        for i in 0..turns.len() {
            let others: Vec<Turn> = turns
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, t)| t.clone())
                .collect();
            let other_tokens = self.counter.count(&others).await?;
            let cap = (budget - other_tokens).max(0);

            let shrunk = crop_dispatch(self.counter, &turns[i], cap).await?;
            turns[i] = shrunk;
            total = self.counter.count(turns).await?;
            if total <= budget {
                debug!("shrink pass fitted after index {i}");
                break;
            }
        }

        if turns.len() == 1 && total > budget {
            let fitted = self.force_fit(&turns[0], budget).await?;
            turns[0] = fitted;
            total = self.counter.count(turns).await?;
        }
        Ok(total)
    }

    /// Evict whole turns oldest-first until the total fits, force-fitting a
    /// lone final survivor rather than dropping to nothing. `total` is the
    /// caller's current count for `turns`.
    async fn drop_from_oldest(
        &self,
        turns: &mut Vec<Turn>,
        budget: i64,
        mut total: i64,
    ) -> Result<i64, String> {
        let mut dropped = 0usize;

        while total > budget && turns.len() > 1 {
            turns.remove(0);
            dropped += 1;
            if !self.pacing_delay.is_zero() {
                tokio::time::sleep(self.pacing_delay).await;
            }
            total = self.counter.count(turns).await?;
        }
        if dropped > 0 {
            debug!("dropped {dropped} oldest turn(s)");
        }

        if turns.len() == 1 && total > budget {
            let fitted = self.force_fit(&turns[0], budget).await?;
            turns[0] = fitted;
            total = self.counter.count(turns).await?;
        }
        Ok(total)
    }

    /// Fit a single turn into `cap` no matter what.
    ///
    /// Tool results are stripped first — by construction their calls are no
    /// longer present, so they cannot be kept alone. A turn with nothing
    /// left becomes the placeholder notice turn rather than vanishing.
    async fn force_fit(&self, turn: &Turn, cap: i64) -> Result<Turn, String> {
        if turn.kind == TurnKind::Request && turn.has_tool_returns() {
            let rest: Vec<_> = turn
                .parts
                .iter()
                .filter(|p| !p.is_tool_return())
                .cloned()
                .collect();
            let stripped = if rest.is_empty() {
                placeholder_turn()
            } else {
                Turn::request(rest)
            };
            return crop_turn(self.counter, &stripped, cap).await;
        }
        crop_dispatch(self.counter, turn, cap).await
    }

    /// Last resort: refit only the newest few turns of the original input.
    ///
    /// Takes the newest `SALVAGE_KEEP` turns, repairs orphans, then caps
    /// them on a 10%/25%/50% budget split aligned to the newest turn. Ends
    /// with the fixed [`PRUNED_NOTICE`] turn when nothing is salvageable.
    async fn salvage(&self, original: &[Turn], budget: i64) -> Result<Vec<Turn>, String> {
        let keep = original.len().min(SALVAGE_KEEP);
        let tail: Vec<Turn> = original
            .iter()
            .skip(original.len() - keep)
            .cloned()
            .collect();
        let mut kept = remove_orphans(tail);

        let tiers = SALVAGE_CAP_FRACTIONS
            .iter()
            .skip(SALVAGE_CAP_FRACTIONS.len() - kept.len());
        for (turn, fraction) in kept.iter_mut().zip(tiers) {
            let cap = fraction_of(budget, *fraction);
            let capped = crop_dispatch(self.counter, turn, cap).await?;
            *turn = capped;
        }

        if kept.is_empty() {
            warn!("salvage yielded nothing; replacing history with pruned notice");
            return Ok(vec![Turn::response_text(PRUNED_NOTICE)]);
        }
        debug!("salvaged {} newest turn(s)", kept.len());
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CountFuture;
    use crate::window::crop::CROP_MARKER;
    use crate::window::orphans::REMOVED_NOTICE;
    use crate::Part;

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

    /// A counter that is never configured.
    struct UnavailableCounter;

    impl TokenCounter for UnavailableCounter {
        fn count<'a>(&'a self, _turns: &'a [Turn]) -> CountFuture<'a> {
            Box::pin(std::future::ready(Ok(COUNT_UNAVAILABLE)))
        }
    }

    fn fitter(counter: &dyn TokenCounter) -> TurnFitter<'_> {
        TurnFitter::new(counter)
            .with_safety_buffer(1.0)
            .with_pacing_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn unavailable_counter_returns_input_unchanged() {
        let turns = vec![Turn::user("x".repeat(10_000))];
        let out = fitter(&UnavailableCounter).fit(turns.clone(), 10).await.unwrap();
        assert_eq!(out, turns);
    }

    #[tokio::test]
    async fn empty_input_stays_empty() {
        let out = fitter(&CharCounter).fit(Vec::new(), 1000).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn caps_touch_only_the_newest_two() {
        // Oldest small, second-newest over its 30% cap, newest over its 60%
        // cap; total over budget so caps apply, but the oldest must survive
        // untouched once the caps alone bring the total under.
        let oldest = Turn::response_text("o".repeat(50));
        let second = Turn::response_text("s".repeat(500));
        let newest = Turn::response_text("n".repeat(800));
        let out = fitter(&CharCounter)
            .fit(vec![oldest.clone(), second, newest], 1000)
            .await
            .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], oldest);
        assert!(out[1].flat_text().contains(CROP_MARKER));
        assert!(out[1].flat_text().chars().count() as i64 <= 300);
        assert!(out[2].flat_text().contains(CROP_MARKER));
        assert!(out[2].flat_text().chars().count() as i64 <= 600);
    }

    #[tokio::test]
    async fn oldest_shrinks_when_caps_are_not_enough() {
        // Four mid-size turns: caps alone leave the total over budget, so
        // the shrink pass must cut the oldest down.
        let turns = vec![
            Turn::response_text("a".repeat(400)),
            Turn::response_text("b".repeat(400)),
            Turn::response_text("c".repeat(400)),
            Turn::response_text("d".repeat(400)),
        ];
        let out = fitter(&CharCounter).fit(turns, 1000).await.unwrap();

        let total: usize = out.iter().map(|t| t.flat_text().chars().count()).sum();
        assert!(total <= 1000);
        assert_eq!(out.len(), 4);
        assert!(out[0].flat_text().chars().count() < 400);
    }

    #[tokio::test]
    async fn order_survives_dropping() {
        // Tag a few short turns between oversized ones and check relative
        // order of whatever survives.
        let ids = ["id_0", "id_1", "id_2", "id_3"];
        let turns = vec![
            Turn::response_text("X".repeat(300)),
            Turn::response_text(ids[0]),
            Turn::response_text(ids[1]),
            Turn::response_text("Y".repeat(300)),
            Turn::response_text(ids[2]),
            Turn::response_text("Z".repeat(300)),
            Turn::response_text(ids[3]),
        ];
        let out = fitter(&CharCounter).fit(turns, 150).await.unwrap();

        let survivors: Vec<String> = out
            .iter()
            .map(|t| t.flat_text())
            .filter(|c| ids.contains(&c.as_str()))
            .collect();
        let expected: Vec<String> = ids
            .iter()
            .map(|s| (*s).to_string())
            .filter(|s| survivors.contains(s))
            .collect();
        assert_eq!(survivors, expected);
    }

    #[tokio::test]
    async fn trimming_that_orphans_a_return_cleans_it() {
        // The call turn is oldest and gets dropped; its return must not
        // survive as an orphan.
        let turns = vec![
            Turn::tool_call("c1", "grep", serde_json::json!({"pattern": "x"})),
            Turn::tool_return("c1", "grep", "m".repeat(300)),
            Turn::response_text("y".repeat(200)),
            Turn::response_text("z".repeat(200)),
        ];
        let out = fitter(&CharCounter).fit(turns, 250).await.unwrap();

        assert!(!out.is_empty());
        assert!(out.iter().all(|t| !t.has_tool_returns()));
    }

    #[tokio::test]
    async fn lone_oversized_orphan_becomes_nonempty_placeholder() {
        let turns = vec![Turn::tool_return("call_big", "sh", "z".repeat(400))];
        let out = fitter(&CharCounter).fit(turns, 50).await.unwrap();

        assert_eq!(out.len(), 1);
        assert!(!out[0].has_tool_returns());
        assert!(out[0].flat_text().to_lowercase().contains("removed"));
    }

    #[tokio::test]
    async fn force_fit_strips_returns_and_keeps_other_parts() {
        let counter = CharCounter;
        let f = fitter(&counter);
        let turn = Turn::request(vec![
            Part::Text {
                text: "context note".into(),
            },
            Part::ToolReturn {
                id: "c1".into(),
                name: "sh".into(),
                content: "r".repeat(200),
            },
        ]);
        let out = f.force_fit(&turn, 100).await.unwrap();
        assert!(!out.has_tool_returns());
        assert!(out.flat_text().contains("context note"));
    }

    #[tokio::test]
    async fn salvage_tiers_align_to_newest() {
        let counter = CharCounter;
        let f = fitter(&counter);
        let original = vec![
            Turn::response_text("0".repeat(1000)),
            Turn::response_text("1".repeat(1000)),
            Turn::response_text("2".repeat(1000)),
            Turn::response_text("3".repeat(1000)),
        ];
        let out = f.salvage(&original, 1000).await.unwrap();

        assert_eq!(out.len(), 3);
        // 10% / 25% / 50% of the budget, oldest kept turn first.
        assert!(out[0].flat_text().chars().count() as i64 <= 100);
        assert!(out[1].flat_text().chars().count() as i64 <= 250);
        assert!(out[2].flat_text().chars().count() as i64 <= 500);
        // The newest kept turn retains the most content.
        assert!(
            out[2].flat_text().chars().count() > out[0].flat_text().chars().count()
        );
    }

    #[tokio::test]
    async fn salvage_with_one_turn_uses_newest_tier() {
        let counter = CharCounter;
        let f = fitter(&counter);
        let original = vec![Turn::response_text("n".repeat(2000))];
        let out = f.salvage(&original, 1000).await.unwrap();

        assert_eq!(out.len(), 1);
        assert!(out[0].flat_text().chars().count() as i64 <= 500);
    }

    #[tokio::test]
    async fn salvage_of_empty_input_returns_pruned_notice() {
        let counter = CharCounter;
        let f = fitter(&counter);
        let out = f.salvage(&[], 1000).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TurnKind::Response);
        assert_eq!(out[0].flat_text(), PRUNED_NOTICE);
    }

    #[tokio::test]
    async fn placeholder_notice_matches_orphan_module() {
        // The lone-orphan path must produce the same notice the orphan
        // resolver uses, not a second variant.
        let turns = vec![Turn::tool_return("c", "sh", "x".repeat(100))];
        let out = fitter(&CharCounter).fit(turns, 60).await.unwrap();
        assert_eq!(out[0].flat_text(), REMOVED_NOTICE);
    }
}
