use common::Config;
use scotusfeed::ingestion;

/// Fetches the configured listing and prints the candidates, without
/// touching the feed files.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config_path = std::env::args().nth(1);
    let config = Config::load_with_defaults(
        Some(std::path::Path::new("config.default.toml")),
        config_path.as_deref().map(std::path::Path::new),
    )
    .await?;

    let client = ingestion::build_client(config.source.timeout_seconds, &config.source.user_agent)?;
    let source = ingestion::source_from_config(&config.source, client)?;

    println!("\n{}", "=".repeat(60));
    println!("Listing: {} ({:?})", config.source.listing_url(), config.source.kind);
    println!("{}", "=".repeat(60));

    match source.fetch_decisions().await {
        Ok(decisions) => {
            println!("✓ {} decisions", decisions.len());
            for (i, d) in decisions.iter().enumerate() {
                println!("  {}. {}", i + 1, d.title);
                println!("     URL: {}", d.url);
                println!(
                    "     Decided: {}  Docket: {}",
                    d.decided.map(|d| d.to_string()).unwrap_or_else(|| "unknown".to_string()),
                    d.docket.as_deref().unwrap_or("none")
                );
            }
        }
        Err(e) => {
            println!("✗ Failed: {:#}", e);
        }
    }
    Ok(())
}
