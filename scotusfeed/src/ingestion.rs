use anyhow::{Context, Result};
use chrono::NaiveDate;
use common::{SourceConfig, SourceKind};
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::model::DecisionRecord;

const RECENT_DECISIONS_HEADING: &str = "Most Recent Decisions";
const MAX_ATTEMPTS: u32 = 3;

/// Produces the current listing of decisions, in listing order.
#[async_trait::async_trait]
pub trait DecisionSource: Send + Sync {
    async fn fetch_decisions(&self) -> Result<Vec<DecisionRecord>>;
}

/// Builds the HTTP client shared by the fetcher and the summarizer.
pub fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .context("failed to build reqwest client")
}

/// GETs `url`, retrying network errors, 5xx and 429 with exponential backoff.
/// Other client errors fail immediately.
pub async fn fetch_with_retry(client: &Client, url: &str) -> Result<Vec<u8>> {
    let mut last_error = None;

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s
            info!(
                "Retrying fetch for {} (attempt {}/{}) after {:?}...",
                url, attempt, MAX_ATTEMPTS, backoff
            );
            tokio::time::sleep(backoff).await;
        }

        match client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    return Ok(bytes.to_vec());
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                } else {
                    // Client error (4xx) - likely permanent, don't retry
                    return Err(anyhow::anyhow!("fetch of {} failed with status: {}", url, status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Cornell LII "Most Recent Decisions" listing.
pub struct CornellSource {
    url: Url,
    max_items: usize,
    client: Client,
}

impl CornellSource {
    pub fn new(url: &str, max_items: usize, client: Client) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid listing URL: {}", url))?;
        Ok(Self {
            url,
            max_items,
            client,
        })
    }
}

#[async_trait::async_trait]
impl DecisionSource for CornellSource {
    async fn fetch_decisions(&self) -> Result<Vec<DecisionRecord>> {
        let body = fetch_with_retry(&self.client, self.url.as_str()).await?;
        let html = String::from_utf8_lossy(&body);
        let decisions = parse_cornell_listing(&html, &self.url, self.max_items);
        info!("Fetched listing '{}': {} decisions", self.url, decisions.len());
        Ok(decisions)
    }
}

/// Parses the listing page. Relative links are resolved against `base`.
/// A page without the "Most Recent Decisions" list yields no decisions.
pub fn parse_cornell_listing(html: &str, base: &Url, max_items: usize) -> Vec<DecisionRecord> {
    let document = Html::parse_document(html);
    let Some(list) = recent_decisions_list(&document) else {
        warn!("listing: '{}' section not found", RECENT_DECISIONS_HEADING);
        return Vec::new();
    };

    let anchor_selector = Selector::parse("a[href]").expect("valid anchor selector");
    let items: Vec<ElementRef<'_>> = list.children().filter_map(ElementRef::wrap).collect();
    let mut out = Vec::new();

    for (i, dt) in items.iter().enumerate() {
        if out.len() >= max_items {
            break;
        }
        if dt.value().name() != "dt" {
            continue;
        }
        let Some(anchor) = dt.select(&anchor_selector).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let url = match base.join(href) {
            Ok(url) => url,
            Err(e) => {
                warn!("listing: skipping unresolvable link '{}': {}", href, e);
                continue;
            }
        };

        let title = collapse_whitespace(anchor.text());
        let meta = items[i + 1..]
            .iter()
            .take_while(|sibling| sibling.value().name() != "dt")
            .find(|sibling| sibling.value().name() == "dd")
            .map(|dd| collapse_whitespace(dd.text()))
            .unwrap_or_default();

        let record = DecisionRecord::new(title, url.to_string())
            .with_decided(parse_decided_date(&meta))
            .with_docket(parse_docket(&meta))
            .with_meta(meta);
        debug!(id = %record.id, "listing entry");
        out.push(record);
    }

    out
}

/// The first `dl` following the "Most Recent Decisions" heading.
fn recent_decisions_list(document: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse("h2, dl").expect("valid heading selector");
    let mut heading_seen = false;
    for element in document.select(&selector) {
        match element.value().name() {
            "h2" if !heading_seen => {
                heading_seen = collapse_whitespace(element.text()) == RECENT_DECISIONS_HEADING;
            }
            "dl" if heading_seen => return Some(element),
            _ => {}
        }
    }
    None
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn decided_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)decided date:\s*([A-Za-z]+\s+\d{1,2},\s+\d{4})").expect("valid regex")
    })
}

fn docket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bNo\.\s*(\S+)").expect("valid regex"))
}

/// "... decided date: June 5, 2025 ..." -> 2025-06-05
pub fn parse_decided_date(meta: &str) -> Option<NaiveDate> {
    let raw = decided_regex().captures(meta)?.get(1)?.as_str();
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    match NaiveDate::parse_from_str(&normalized, "%B %d, %Y") {
        Ok(date) => Some(date),
        Err(e) => {
            debug!("listing: unparseable decided date '{}': {}", normalized, e);
            None
        }
    }
}

/// "No. 23-1234 ..." -> "23-1234"
pub fn parse_docket(meta: &str) -> Option<String> {
    docket_regex()
        .captures(meta)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// CourtListener Atom feed of SCOTUS opinions.
pub struct CourtListenerSource {
    url: String,
    max_items: usize,
    client: Client,
}

impl CourtListenerSource {
    pub fn new(url: impl Into<String>, max_items: usize, client: Client) -> Self {
        Self {
            url: url.into(),
            max_items,
            client,
        }
    }
}

#[async_trait::async_trait]
impl DecisionSource for CourtListenerSource {
    async fn fetch_decisions(&self) -> Result<Vec<DecisionRecord>> {
        let body = fetch_with_retry(&self.client, &self.url).await?;
        let decisions = parse_courtlistener_feed(&body, self.max_items)?;
        info!("Fetched feed '{}': {} decisions", self.url, decisions.len());
        Ok(decisions)
    }
}

/// Maps Atom entries to decisions. Entries without a link are skipped.
pub fn parse_courtlistener_feed(bytes: &[u8], max_items: usize) -> Result<Vec<DecisionRecord>> {
    let feed = parser::parse(bytes).context("failed to parse feed")?;

    let decisions = feed
        .entries
        .iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .or_else(|| entry.links.first())?;
            let title = entry
                .title
                .as_ref()
                .map(|t| collapse_whitespace(std::iter::once(t.content.as_str())))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let decided = entry.published.or(entry.updated).map(|d| d.date_naive());
            Some(DecisionRecord::new(title, link.href.clone()).with_decided(decided))
        })
        .take(max_items)
        .collect();

    Ok(decisions)
}

/// Picks the listing implementation named by the configuration.
pub fn source_from_config(config: &SourceConfig, client: Client) -> Result<Box<dyn DecisionSource>> {
    let url = config.listing_url();
    let source: Box<dyn DecisionSource> = match config.kind {
        SourceKind::Cornell => Box::new(CornellSource::new(url, config.max_items, client)?),
        SourceKind::CourtListener => {
            Box::new(CourtListenerSource::new(url, config.max_items, client))
        }
    };
    Ok(source)
}
