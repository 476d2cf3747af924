//! One run: load the store, fetch the listing, merge, save.

use chrono::Utc;
use common::Config;
use tracing::info;

use crate::error::RunError;
use crate::ingestion::DecisionSource;
use crate::llm::summarizer::Summarizer;
use crate::processing::{
    describe_new_decisions, merge_decisions, with_orphans, MergeOptions, MergeReport,
};
use crate::scraping::OpinionSource;
use crate::storage::FeedStore;

/// Runs a single fetch/merge/persist cycle.
///
/// The store is loaded before any network call so a broken feed file fails
/// fast. Opinion pages are fetched only for decisions about to be published.
/// Files are only rewritten when the merge changed something or when a feed
/// file did not exist yet.
pub async fn run_once(
    config: &Config,
    source: &dyn DecisionSource,
    opinions: &dyn OpinionSource,
    summarizer: &dyn Summarizer,
) -> Result<MergeReport, RunError> {
    let mut store = FeedStore::load(&config.output)
        .await
        .map_err(RunError::Store)?;

    let candidates = source.fetch_decisions().await.map_err(RunError::Fetch)?;
    let candidates = with_orphans(&store, candidates);
    let candidates = describe_new_decisions(&store.decisions, candidates, opinions).await;

    let report = merge_decisions(
        &mut store,
        candidates,
        summarizer,
        &MergeOptions::from(&config.merge),
    )
    .await;

    if report.changed() || !store.is_persisted() {
        store
            .save(&config.output, &config.channel, Utc::now())
            .await
            .map_err(RunError::Store)?;
    } else {
        info!("no new decisions, feed files left untouched");
    }

    Ok(report)
}
