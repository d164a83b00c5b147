//! Minimal fitting example — build a trajectory, blow the budget, fit it.
//!
//! Uses the offline heuristic counter, so it runs with no API key and no
//! network.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example fit_trajectory
//! ```

use ctxfit::Turn;
use ctxfit::counter::HeuristicCounter;
use ctxfit::window::TurnFitter;

#[tokio::main]
async fn main() -> Result<(), String> {
    // 1. A trajectory with one oversized tool result.
    let turns = vec![
        Turn::user("Find every TODO in the repository."),
        Turn::tool_call("call-1", "grep", serde_json::json!({"pattern": "TODO"})),
        Turn::tool_return("call-1", "grep", "src/main.rs:14: TODO tidy\n".repeat(4000)),
        Turn::response_text("There are quite a few; summarizing the hot spots now."),
    ];

    // 2. Count, then fit into a deliberately small window.
    let counter = HeuristicCounter::new();
    let before = counter.estimate(&turns);

    let fitter = TurnFitter::new(&counter).with_safety_buffer(0.85);
    let fitted = fitter.fit(turns, 4_000).await?;

    // 3. Show what survived.
    let after = counter.estimate(&fitted);
    println!("{before} tokens -> {after} tokens across {} turn(s)\n", fitted.len());
    for turn in &fitted {
        let text = turn.flat_text();
        let preview: String = text.chars().take(80).collect();
        println!("[{}] {preview}", turn.kind);
    }

    Ok(())
}
