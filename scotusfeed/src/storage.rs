use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{ChannelsConfig, OutputConfig};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::model::{DecisionId, DecisionRecord, Feed, FeedItem, SummaryEntry, SummaryRecord};
use crate::rss::{self, RssItem, DOMAIN_DOCKET, DOMAIN_GENERATED, DOMAIN_META, DOMAIN_MODEL};

/// The persisted state of one run: both feeds, loaded at start and saved at end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedStore {
    pub decisions: Feed<DecisionRecord>,
    pub summaries: Feed<SummaryEntry>,
    /// Whether both feed files existed when the store was loaded
    persisted: bool,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads both feed files. A missing file is an empty feed.
    pub async fn load(output: &OutputConfig) -> Result<Self> {
        let decisions_path = Path::new(&output.decisions_path);
        let summaries_path = Path::new(&output.summaries_path);

        let decisions_xml = read_feed_file(decisions_path).await?;
        let summaries_xml = read_feed_file(summaries_path).await?;
        let persisted = decisions_xml.is_some() && summaries_xml.is_some();

        let decisions = match decisions_xml {
            Some(xml) => decisions_from_xml(&xml)
                .with_context(|| format!("malformed decision feed {}", decisions_path.display()))?,
            None => Feed::new(),
        };
        let summaries = match summaries_xml {
            Some(xml) => summaries_from_xml(&xml)
                .with_context(|| format!("malformed summary feed {}", summaries_path.display()))?,
            None => Feed::new(),
        };

        info!(
            decisions = decisions.len(),
            summaries = summaries.len(),
            "feed store loaded"
        );
        let store = Self {
            decisions,
            summaries,
            persisted,
        };
        for orphan in store.orphaned_summaries() {
            warn!(id = %orphan.id, "summary stored without its decision, will republish the decision");
        }
        Ok(store)
    }

    /// Writes both feeds. The summary feed goes first: if the run dies between
    /// the two writes, the next run finds the summaries and reuses them.
    pub async fn save(
        &self,
        output: &OutputConfig,
        channels: &ChannelsConfig,
        built_at: DateTime<Utc>,
    ) -> Result<()> {
        let summary_items: Vec<RssItem> = self.summaries.iter().map(summary_to_item).collect();
        let summaries_xml = rss::write_channel(&channels.summaries, &summary_items, built_at)?;
        write_atomic(Path::new(&output.summaries_path), &summaries_xml).await?;

        let decision_items: Vec<RssItem> = self.decisions.iter().map(decision_to_item).collect();
        let decisions_xml = rss::write_channel(&channels.decisions, &decision_items, built_at)?;
        write_atomic(Path::new(&output.decisions_path), &decisions_xml).await?;

        info!(
            decisions = self.decisions.len(),
            summaries = self.summaries.len(),
            decisions_path = %output.decisions_path,
            summaries_path = %output.summaries_path,
            "feed store saved"
        );
        Ok(())
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Decisions in the decision feed that have no summary entry, in feed order.
    pub fn missing_summaries(&self) -> Vec<DecisionRecord> {
        self.decisions
            .iter()
            .filter(|d| !self.summaries.contains(&d.id))
            .cloned()
            .collect()
    }

    /// Decisions of summary entries that are missing from the decision feed,
    /// in summary feed order. Left behind when a run dies between the two
    /// writes of `save`.
    pub fn orphaned_summaries(&self) -> Vec<DecisionRecord> {
        self.summaries
            .iter()
            .filter(|s| !self.decisions.contains(&s.decision.id))
            .map(|s| s.decision.clone())
            .collect()
    }
}

async fn read_feed_file(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "feed file not found, starting empty");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("failed to read feed file {}", path.display())),
    }
}

/// Writes to a sibling temporary file, then renames it over `path`.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create feed directory {}", parent.display()))?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .with_context(|| format!("feed path has no file name: {}", path.display()))?;
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            warn!(path = %tmp_path.display(), %cleanup, "failed to remove temporary feed file");
        }
        return Err(e).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

fn decision_to_item(decision: &DecisionRecord) -> RssItem {
    let mut categories = Vec::new();
    if let Some(docket) = &decision.docket {
        categories.push((DOMAIN_DOCKET.to_string(), docket.clone()));
    }
    if !decision.meta.is_empty() {
        categories.push((DOMAIN_META.to_string(), decision.meta.clone()));
    }
    RssItem {
        title: decision.title.clone(),
        link: decision.url.clone(),
        guid: decision.id.to_string(),
        pub_date: decision.pub_date(),
        categories,
        description: decision.description.clone(),
    }
}

fn summary_to_item(entry: &SummaryEntry) -> RssItem {
    let mut item = decision_to_item(&entry.decision);
    item.categories.push((
        DOMAIN_GENERATED.to_string(),
        entry.summary.generated_at.to_rfc3339(),
    ));
    item.categories
        .push((DOMAIN_MODEL.to_string(), entry.summary.model.clone()));
    item.description = entry.summary.text.clone();
    item
}

fn decision_from_item(item: &RssItem) -> DecisionRecord {
    DecisionRecord {
        id: DecisionId::new(item.guid.clone()),
        title: item.title.clone(),
        url: item.link.clone(),
        decided: item.pub_date.map(|d| d.date_naive()),
        docket: item.category(DOMAIN_DOCKET).map(str::to_string),
        meta: item.category(DOMAIN_META).unwrap_or_default().to_string(),
        description: String::new(),
    }
}

fn decisions_from_xml(xml: &str) -> Result<Feed<DecisionRecord>> {
    let mut feed = Feed::new();
    for item in rss::read_channel(xml)? {
        if item.guid.is_empty() {
            warn!(title = %item.title, "skipping stored decision without identifier");
            continue;
        }
        let mut decision = decision_from_item(&item);
        decision.description = item.description;
        push_unique(&mut feed, decision);
    }
    Ok(feed)
}

fn summaries_from_xml(xml: &str) -> Result<Feed<SummaryEntry>> {
    let mut feed = Feed::new();
    for item in rss::read_channel(xml)? {
        if item.guid.is_empty() {
            warn!(title = %item.title, "skipping stored summary without identifier");
            continue;
        }
        let decision = decision_from_item(&item);
        let generated_at = parse_generated_at(&item);
        let summary = SummaryRecord {
            id: decision.id.clone(),
            text: item.description.clone(),
            generated_at,
            model: item
                .category(DOMAIN_MODEL)
                .unwrap_or("unknown")
                .to_string(),
        };
        push_unique(&mut feed, SummaryEntry { decision, summary });
    }
    Ok(feed)
}

/// Items written by older tooling carry no generation timestamp; fall back to
/// the publication date, then to the epoch.
fn parse_generated_at(item: &RssItem) -> DateTime<Utc> {
    item.category(DOMAIN_GENERATED)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|d| d.with_timezone(&Utc))
        .or(item.pub_date)
        .unwrap_or_default()
}

fn push_unique<T: FeedItem>(feed: &mut Feed<T>, item: T) {
    let id = item.id().clone();
    if !feed.append(item) {
        warn!(%id, "duplicate identifier in stored feed, keeping first entry");
    }
}
