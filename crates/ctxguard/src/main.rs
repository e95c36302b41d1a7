//! Estimate the token usage of a saved conversation and report whether
//! compaction is due.
//!
//! # Examples
//!
//! ```sh
//! # Estimate against an 8k budget
//! ctxguard history.json --max-history-tokens 8000
//!
//! # Use a config file and run the placeholder compactor
//! ctxguard history.json --config ctxguard.toml --compact
//!
//! # Machine-readable output
//! ctxguard history.json --json
//! ```

use std::path::PathBuf;
use std::process;

use clap::Parser;
use ctxguard::context::estimator::{self, EstimateBreakdown};
use ctxguard::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Estimate conversation tokens and decide whether compaction is due.
#[derive(Parser)]
#[command(name = "ctxguard")]
struct Cli {
    /// Conversation JSON: an array of messages or {"messages": [...]}
    conversation: PathBuf,

    /// TOML file with max_history_tokens / safety_threshold_ratio
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the history budget in tokens
    #[arg(long)]
    max_history_tokens: Option<usize>,

    /// Run the pre-call guard with the placeholder compactor
    #[arg(long)]
    compact: bool,

    /// Recent messages the placeholder compactor keeps (with --compact)
    #[arg(long, default_value_t = 4)]
    keep_recent: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Debug-level logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    messages: usize,
    estimate: EstimateBreakdown,
    naive_tokens: usize,
    usage: ContextUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    guard: Option<GuardReport>,
}

impl Report {
    fn to_text(&self) -> String {
        let mut out = String::new();
        let e = &self.estimate;
        out.push_str(&format!("messages:        {}\n", self.messages));
        out.push_str(&format!(
            "characters:      {} ({} code-like, ratio {:.2})\n",
            e.total_chars, e.code_chars, e.code_ratio
        ));
        if e.authoritative {
            out.push_str(&format!(
                "estimate:        {} tokens (reported by last API call)\n",
                e.estimated_tokens
            ));
        } else {
            out.push_str(&format!(
                "estimate:        {} tokens ({} chars/token)\n",
                e.estimated_tokens, e.chars_per_token
            ));
        }
        out.push_str(&format!(
            "naive estimate:  {} tokens ({} chars/token)\n",
            self.naive_tokens,
            estimator::NAIVE_CHARS_PER_TOKEN
        ));
        out.push_str(&format!("{}\n", self.usage.to_log_string()));

        if let Some(ref guard) = self.guard {
            if guard.passes.is_empty() {
                out.push_str("compaction:      not needed\n");
            }
            for pass in &guard.passes {
                out.push_str(&format!(
                    "compaction:      {} pass, {} -> {} tokens\n",
                    pass.tier, pass.tokens_before, pass.tokens_after
                ));
            }
            out.push_str(&format!("after: {}\n", guard.final_usage.to_log_string()));
        }
        out
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("ctxguard=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctxguard=info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<CompactionConfig> {
    let mut config = match &cli.config {
        Some(path) => CompactionConfig::load(path)?,
        None => CompactionConfig::default(),
    };
    if let Some(tokens) = cli.max_history_tokens {
        config = config.with_max_history_tokens(tokens);
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli) -> Result<String> {
    let config = load_config(cli)?;
    let content = std::fs::read_to_string(&cli.conversation)?;
    let mut conversation = Conversation::from_json(&content)?;

    let guard = PreCallGuard::new(config);
    let estimate = estimator::breakdown(&conversation);
    let naive_tokens = naive_estimate(&conversation);
    let usage = guard.check(&conversation);
    let messages = conversation.len();

    let guard_report = if cli.compact {
        let compactor = PlaceholderCompactor::new().with_keep_recent(cli.keep_recent);
        Some(guard.run(&mut conversation, &compactor).await?)
    } else {
        None
    };

    let report = Report {
        messages,
        estimate,
        naive_tokens,
        usage,
        guard: guard_report,
    };

    if cli.json {
        Ok(serde_json::to_string_pretty(&report)?)
    } else {
        Ok(report.to_text())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
