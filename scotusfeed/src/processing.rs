//! Merge engine: reconciles freshly fetched candidates with the feed store
//! and publishes only decisions that are not stored yet.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::SummarizeError;
use crate::llm::summarizer::Summarizer;
use crate::model::{DecisionId, DecisionRecord, Feed, SummaryEntry, SummaryRecord};
use crate::scraping::{self, OpinionSource};
use crate::storage::FeedStore;

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Summarize stored decisions that have no summary entry
    pub backfill_missing_summaries: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            backfill_missing_summaries: true,
        }
    }
}

impl From<&common::MergeConfig> for MergeOptions {
    fn from(config: &common::MergeConfig) -> Self {
        Self {
            backfill_missing_summaries: config.backfill_missing_summaries,
        }
    }
}

/// A decision in the decision feed whose summary could not be produced.
/// The backfill step of the next run tries again.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSummary {
    pub id: DecisionId,
    pub reason: String,
}

/// Outcome of one merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Candidates handed to the merge
    pub fetched: usize,
    pub already_known: usize,
    pub duplicates: usize,
    /// Appended to the decision feed, in fetch order
    pub published: Vec<DecisionId>,
    /// Subset of `published` whose summary entry already existed
    pub reused_summaries: Vec<DecisionId>,
    /// Stored decisions that received their missing summary
    pub backfilled: Vec<DecisionId>,
    /// Decisions still without a summary after this merge
    pub pending_summaries: Vec<PendingSummary>,
}

impl MergeReport {
    /// Whether the store differs from what was loaded.
    pub fn changed(&self) -> bool {
        !self.published.is_empty() || !self.backfilled.is_empty()
    }
}

/// Candidates split by whether they must be published.
#[derive(Debug, Default)]
pub struct Selection {
    pub new: Vec<DecisionRecord>,
    pub already_known: usize,
    pub duplicates: usize,
}

/// Keeps the candidates whose identifier is not in `known`, in fetch order.
/// Only the first occurrence of an identifier within the batch is kept.
pub fn select_new(known: &Feed<DecisionRecord>, candidates: Vec<DecisionRecord>) -> Selection {
    let mut seen: HashSet<DecisionId> = HashSet::new();
    let mut selection = Selection::default();

    for candidate in candidates {
        if known.contains(&candidate.id) {
            selection.already_known += 1;
            continue;
        }
        if !seen.insert(candidate.id.clone()) {
            debug!(id = %candidate.id, "duplicate candidate in listing, skipping");
            selection.duplicates += 1;
            continue;
        }
        selection.new.push(candidate);
    }
    selection
}

/// Puts the decisions of orphaned summary entries ahead of `candidates`, so
/// they are published again. Orphans also present in `candidates` keep their
/// listing position.
pub fn with_orphans(store: &FeedStore, candidates: Vec<DecisionRecord>) -> Vec<DecisionRecord> {
    let listed: HashSet<&DecisionId> = candidates.iter().map(|c| &c.id).collect();
    let orphans: Vec<DecisionRecord> = store
        .orphaned_summaries()
        .into_iter()
        .filter(|o| !listed.contains(&o.id))
        .collect();
    if orphans.is_empty() {
        return candidates;
    }
    info!(count = orphans.len(), "restoring decisions of orphaned summaries");
    orphans.into_iter().chain(candidates).collect()
}

/// Builds the feed description of every candidate that will be published,
/// fetching its opinion page. A page that cannot be fetched or holds no body
/// is reported inside the description; the decision is still published.
pub async fn describe_new_decisions(
    known: &Feed<DecisionRecord>,
    candidates: Vec<DecisionRecord>,
    opinions: &dyn OpinionSource,
) -> Vec<DecisionRecord> {
    let mut seen: HashSet<DecisionId> = HashSet::new();
    let mut described = Vec::with_capacity(candidates.len());

    for mut decision in candidates {
        let is_new = !known.contains(&decision.id) && seen.insert(decision.id.clone());
        if is_new && decision.description.is_empty() {
            let body = match opinions.fetch_opinion_page(&decision.url).await {
                Ok(page) => scraping::extract_body_html(&page),
                Err(e) => Err(e),
            };
            if let Err(e) = &body {
                let reason = format!("{:#}", e);
                warn!(id = %decision.id, error = %reason, "opinion body unavailable");
            }
            decision.description = scraping::build_description(&decision.url, &decision.meta, &body);
        }
        described.push(decision);
    }
    described
}

/// Merges `candidates` into `store`.
///
/// Every new decision is appended to the decision feed and summarized exactly
/// once. A failed summary leaves the decision without a summary entry; it is
/// reported as pending and picked up by the backfill of the next run. A
/// decision whose summary entry is already stored reuses it without calling
/// the summarizer.
pub async fn merge_decisions(
    store: &mut FeedStore,
    candidates: Vec<DecisionRecord>,
    summarizer: &dyn Summarizer,
    options: &MergeOptions,
) -> MergeReport {
    let mut report = MergeReport {
        fetched: candidates.len(),
        ..MergeReport::default()
    };

    if options.backfill_missing_summaries {
        backfill_summaries(store, summarizer, &mut report).await;
    }

    let selection = select_new(&store.decisions, candidates);
    report.already_known = selection.already_known;
    report.duplicates = selection.duplicates;

    for decision in selection.new {
        let id = decision.id.clone();

        if store.summaries.contains(&id) {
            info!(%id, "summary already stored, publishing decision without a new summary");
            store.decisions.append(decision);
            report.reused_summaries.push(id.clone());
            report.published.push(id);
            continue;
        }

        match summarize_checked(summarizer, &decision).await {
            Ok(summary) => {
                info!(%id, title = %decision.title, "publishing new decision");
                store.summaries.append(SummaryEntry {
                    decision: decision.clone(),
                    summary,
                });
                store.decisions.append(decision);
                report.published.push(id);
            }
            Err(e) => {
                warn!(%id, error = %e, "summary failed, publishing decision without summary");
                store.decisions.append(decision);
                report.published.push(id.clone());
                report.pending_summaries.push(PendingSummary {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        fetched = report.fetched,
        already_known = report.already_known,
        duplicates = report.duplicates,
        published = report.published.len(),
        backfilled = report.backfilled.len(),
        pending_summaries = report.pending_summaries.len(),
        "merge complete"
    );
    report
}

async fn backfill_summaries(
    store: &mut FeedStore,
    summarizer: &dyn Summarizer,
    report: &mut MergeReport,
) {
    let missing = store.missing_summaries();
    if missing.is_empty() {
        return;
    }
    info!(count = missing.len(), "backfilling summaries for stored decisions");

    for decision in missing {
        let id = decision.id.clone();
        match summarize_checked(summarizer, &decision).await {
            Ok(summary) => {
                store.summaries.append(SummaryEntry { decision, summary });
                report.backfilled.push(id);
            }
            Err(e) => {
                warn!(%id, error = %e, "backfill summary failed, will retry next run");
                report.pending_summaries.push(PendingSummary {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

async fn summarize_checked(
    summarizer: &dyn Summarizer,
    decision: &DecisionRecord,
) -> Result<SummaryRecord, SummarizeError> {
    let summary = summarizer.summarize(decision).await?;
    if summary.id != decision.id {
        return Err(SummarizeError::IdentifierMismatch {
            expected: decision.id.to_string(),
            got: summary.id.to_string(),
        });
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Serves canned pages; unknown URLs fail like a 404.
    #[derive(Default)]
    struct CannedOpinions {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl OpinionSource for CannedOpinions {
        async fn fetch_opinion_page(&self, url: &str) -> anyhow::Result<Arc<str>> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(page) => Ok(Arc::from(page.as_str())),
                None => anyhow::bail!("fetch of {} failed with status: 404 Not Found", url),
            }
        }
    }

    fn decision(name: &str) -> DecisionRecord {
        DecisionRecord::new(format!("{} v. United States", name), format!("https://example.com/{}", name))
    }

    #[test]
    fn select_new_skips_known_and_duplicates() {
        let mut known = Feed::new();
        known.append(decision("a"));

        let selection = select_new(
            &known,
            vec![decision("a"), decision("b"), decision("c"), decision("b")],
        );

        let titles: Vec<&str> = selection.new.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["b v. United States", "c v. United States"]);
        assert_eq!(selection.already_known, 1);
        assert_eq!(selection.duplicates, 1);
    }

    #[test]
    fn select_new_on_empty_listing_is_empty() {
        let selection = select_new(&Feed::new(), Vec::new());
        assert!(selection.new.is_empty());
        assert_eq!(selection.already_known, 0);
        assert_eq!(selection.duplicates, 0);
    }

    #[tokio::test]
    async fn new_decisions_get_a_description_from_their_opinion_page() {
        let mut known = Feed::new();
        known.append(decision("a"));
        let mut opinions = CannedOpinions::default();
        opinions.pages.insert(
            "https://example.com/b".to_string(),
            "<html><body><div class=\"bodytext\"><p>Reversed.</p></div></body></html>".to_string(),
        );

        let described = describe_new_decisions(
            &known,
            vec![
                decision("a"),
                decision("b").with_meta("No. 24-2"),
                decision("c"),
                decision("b"),
            ],
            &opinions,
        )
        .await;

        assert!(described[0].description.is_empty());
        assert_eq!(
            described[1].description,
            "<p><a href=\"https://example.com/b\">example.com</a></p>\n<p>No. 24-2</p>\n<p>Reversed.</p>"
        );
        assert!(described[2].description.contains("<p><b>Error:</b> fetch of https://example.com/c failed"));
        // the repeated b is dropped by the merge; it is not fetched again
        assert!(described[3].description.is_empty());
        assert_eq!(
            *opinions.requested.lock().unwrap(),
            vec!["https://example.com/b", "https://example.com/c"]
        );
    }

    #[test]
    fn orphans_go_first_unless_listed() {
        let mut store = FeedStore::new();
        store.decisions.append(decision("a"));
        for name in ["a", "x", "y"] {
            let d = decision(name);
            store.summaries.append(SummaryEntry {
                summary: SummaryRecord {
                    id: d.id.clone(),
                    text: "Holding:\nAffirmed.".to_string(),
                    generated_at: chrono::Utc::now(),
                    model: "m".to_string(),
                },
                decision: d,
            });
        }

        let candidates = with_orphans(&store, vec![decision("b"), decision("y")]);
        let titles: Vec<&str> = candidates.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["x v. United States", "b v. United States", "y v. United States"]
        );
    }

    #[test]
    fn report_changed_only_when_something_was_appended() {
        let mut report = MergeReport::default();
        assert!(!report.changed());
        report.pending_summaries.push(PendingSummary {
            id: DecisionId::new("x"),
            reason: "boom".to_string(),
        });
        assert!(!report.changed());
        report.backfilled.push(DecisionId::new("y"));
        assert!(report.changed());
    }
}
