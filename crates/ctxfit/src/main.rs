//! Fit a conversation transcript or raw text into a model context window.
//!
//! Reads an optional API key from the `CTXFIT_API_KEY` environment variable
//! when exact remote counting is requested; otherwise counts offline with a
//! chars-per-token estimate.
//!
//! # Examples
//!
//! ```sh
//! # Fit a JSON transcript of turns with the offline estimator
//! ctxfit --transcript trajectory.json --model openai:gpt-5-mini
//!
//! # Same, with an explicit window and tighter buffer
//! ctxfit --transcript trajectory.json --context-window 8000 --safety-buffer 0.8
//!
//! # Exact counting against a provider count-tokens endpoint
//! ctxfit --transcript trajectory.json --model openai:gpt-5-mini \
//!   --count-endpoint https://api.example.com/v1/count_tokens
//!
//! # Fit raw command output through the offline tokenizer path
//! cat build.log | ctxfit --stdin --model openai:gpt-4o
//! ```

use clap::Parser;
use ctxfit::Turn;
use ctxfit::config::WindowConfig;
use ctxfit::counter::{HeuristicCounter, RemoteCounter, TokenCounter};
use ctxfit::window::{TextFitter, TurnFitter};
use std::io::{self, Read};
use std::process;
use std::time::Duration;

/// Fit a conversation transcript or raw text into a model context window.
///
/// Reads an optional API key from the CTXFIT_API_KEY environment variable.
#[derive(Parser)]
#[command(name = "ctxfit")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Path to a JSON transcript (array of turns) to fit
    #[arg(long)]
    transcript: Option<String>,

    /// Path to a raw text file to fit through the tokenizer path
    #[arg(long)]
    text: Option<String>,

    /// Read raw text from stdin
    #[arg(long)]
    stdin: bool,

    // ── Model / budget ─────────────────────────────────────────
    /// Model descriptor for window and tokenizer lookup
    #[arg(long, default_value = "openai:gpt-5-mini")]
    model: String,

    /// Context window override in tokens (skips the model lookup)
    #[arg(long)]
    context_window: Option<i64>,

    /// Safety buffer for the turn path
    #[arg(long, default_value_t = 0.85)]
    safety_buffer: f64,

    /// Safety buffer for the free-text path
    #[arg(long, default_value_t = 0.75)]
    text_safety_buffer: f64,

    // ── Counting ───────────────────────────────────────────────
    /// Count-tokens endpoint for exact remote counting
    #[arg(long)]
    count_endpoint: Option<String>,

    /// Chars-per-token ratio for the offline estimator
    #[arg(long)]
    chars_per_token: Option<f64>,

    /// Delay between counting calls while dropping turns, in milliseconds
    #[arg(long, default_value_t = 250)]
    pacing_delay_ms: u64,

    // ── Output ─────────────────────────────────────────────────
    /// Log fitting decisions to stderr
    #[arg(long)]
    verbose: bool,
}

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn load_transcript(path: &str) -> Result<Vec<Turn>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read transcript '{path}': {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("failed to parse transcript '{path}': {e}"))
}

fn build_config(cli: &Cli) -> WindowConfig {
    let mut config = WindowConfig::new(&cli.model)
        .with_safety_buffer(cli.safety_buffer)
        .with_text_safety_buffer(cli.text_safety_buffer)
        .with_pacing_delay(Duration::from_millis(cli.pacing_delay_ms));
    if let Some(window) = cli.context_window {
        config = config.with_limit(&cli.model, window);
    }
    config
}

fn build_counter(cli: &Cli) -> Result<Box<dyn TokenCounter>, String> {
    if let Some(ref endpoint) = cli.count_endpoint {
        let mut counter = RemoteCounter::new(endpoint, &cli.model)?;
        if let Ok(key) = std::env::var("CTXFIT_API_KEY") {
            counter = counter.with_api_key(key);
        }
        return Ok(Box::new(counter));
    }
    let mut counter = HeuristicCounter::new();
    if let Some(ratio) = cli.chars_per_token {
        counter = counter.with_chars_per_token(ratio);
    }
    Ok(Box::new(counter))
}

async fn run(cli: &Cli) -> Result<String, String> {
    let config = build_config(cli);

    // Free-text mode: --text file, --stdin, or both concatenated.
    let raw_text = match (&cli.text, cli.stdin) {
        (Some(path), piped) => {
            let mut content = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read text file '{path}': {e}"))?;
            if piped {
                content.push_str(&read_stdin_content()?);
            }
            Some(content)
        }
        (None, true) => Some(read_stdin_content()?),
        (None, false) => None,
    };

    if let Some(text) = raw_text {
        let Some(limit) = config.lookup_context_window() else {
            return Err(format!(
                "no context window known for '{}'; pass --context-window",
                cli.model
            ));
        };
        let fitter = TextFitter::for_model(&config.model, limit.max(0) as usize)?
            .with_safety_buffer(config.text_safety_buffer);
        return Ok(fitter.fit(&text));
    }

    let Some(ref path) = cli.transcript else {
        return Err("provide --transcript, --text, or --stdin".to_string());
    };
    let turns = load_transcript(path)?;
    let Some(limit) = config.lookup_context_window() else {
        return Err(format!(
            "no context window known for '{}'; pass --context-window",
            cli.model
        ));
    };

    let counter = build_counter(cli)?;
    let fitter = TurnFitter::new(counter.as_ref())
        .with_safety_buffer(config.safety_buffer)
        .with_pacing_delay(config.pacing_delay);
    let fitted = fitter.fit(turns, limit).await?;

    serde_json::to_string_pretty(&fitted).map_err(|e| format!("failed to serialize output: {e}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    match run(&cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
