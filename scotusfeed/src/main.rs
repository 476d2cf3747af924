/*
scotusfeed - single-run main.rs
Fetches the recent decisions listing, merges new decisions into the decision
and summary feeds, and exits. Scheduling is left to the job runner.
*/

use anyhow::Context;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use scotusfeed::ingestion;
use scotusfeed::llm::remote::RemoteLlmProvider;
use scotusfeed::llm::summarizer::{LlmSummarizer, Summarizer, UnavailableSummarizer};
use scotusfeed::llm::LlmProvider;
use scotusfeed::pipeline;
use scotusfeed::scraping::{OpinionFetcher, OpinionSource};

#[derive(Parser, Debug)]
#[command(name = "scotusfeed", about = "Publish SCOTUS decision and summary RSS feeds")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the number of listing entries considered
    #[arg(long)]
    max_items: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let mut config = load_config(args.config).await?;
    if let Some(max_items) = args.max_items {
        config.source.max_items = max_items;
    }

    let client = ingestion::build_client(config.source.timeout_seconds, &config.source.user_agent)?;
    let source = ingestion::source_from_config(&config.source, client.clone())?;
    let opinions = Arc::new(OpinionFetcher::new(client));

    // Without a model, decisions are still published; summaries are backfilled later.
    let summarizer: Box<dyn Summarizer> = match RemoteLlmProvider::from_config(&config.llm.remote) {
        Ok(provider) => {
            let provider: Arc<dyn LlmProvider> = Arc::new(provider);
            info!(model = provider.model(), "LLM provider initialized");
            let opinion_source: Arc<dyn OpinionSource> = opinions.clone();
            Box::new(
                LlmSummarizer::new(provider, opinion_source, config.merge.max_prompt_chars)
                    .with_generation(config.llm.remote.max_tokens, config.llm.remote.temperature),
            )
        }
        Err(e) => {
            warn!(%e, "LLM provider unavailable, publishing decisions without summaries");
            Box::new(UnavailableSummarizer::new(e.to_string()))
        }
    };

    info!(source = %config.source.listing_url(), kind = ?config.source.kind, "starting run");
    let report = match pipeline::run_once(
        &config,
        source.as_ref(),
        opinions.as_ref(),
        summarizer.as_ref(),
    )
    .await
    {
        Ok(report) => report,
        Err(e) => {
            error!(%e, "run failed");
            return Err(e.into());
        }
    };

    for item in &report.pending_summaries {
        warn!(id = %item.id, reason = %item.reason, "summary pending, retried next run");
    }
    info!(
        published = report.published.len(),
        backfilled = report.backfilled.len(),
        pending_summaries = report.pending_summaries.len(),
        "run finished"
    );
    Ok(())
}

/// Loads `config.default.toml` merged with `--config` (or `config.toml` if present).
async fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match explicit {
        Some(p) => {
            if !p.exists() {
                error!(path = ?p, "specified config file not found");
                anyhow::bail!("Config file not found: {}", p.display());
            }
            Some(p)
        }
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}
