use anyhow::{Context, Result};
use reqwest::Client;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::ingestion::fetch_with_retry;

/// Containers tried in order when looking for the opinion body.
const CONTENT_SELECTORS: [&str; 5] = [".bodytext", "#content1", "main#main", "main", "body"];

/// Page chrome dropped before converting to text.
const IGNORE_TAGS: [&str; 6] = ["nav", "header", "footer", "aside", "script", "style"];

/// Elements that have no closing tag.
const VOID_TAGS: [&str; 6] = ["br", "hr", "img", "wbr", "col", "input"];

/// Tags kept in the published opinion body. Anything else is unwrapped.
const PUBLISHED_TAGS: [&str; 27] = [
    "p", "br", "hr", "blockquote", "pre", "code", "em", "strong", "b", "i", "u", "h1", "h2", "h3",
    "h4", "ol", "ul", "li", "table", "thead", "tbody", "tr", "th", "td", "a", "sup", "sub",
];

const CENTERED_TAGS: [&str; 3] = ["h1", "h2", "h3"];

const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED]\n";

/// Fetches opinion pages.
#[async_trait::async_trait]
pub trait OpinionSource: Send + Sync {
    async fn fetch_opinion_page(&self, url: &str) -> Result<Arc<str>>;
}

/// HTTP opinion fetcher. Successful pages are kept for the rest of the run,
/// so the feed description and the summary share one download.
pub struct OpinionFetcher {
    client: Client,
    pages: Mutex<HashMap<String, Arc<str>>>,
}

impl OpinionFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, url: &str) -> Option<Arc<str>> {
        self.pages.lock().ok()?.get(url).cloned()
    }
}

#[async_trait::async_trait]
impl OpinionSource for OpinionFetcher {
    async fn fetch_opinion_page(&self, url: &str) -> Result<Arc<str>> {
        if let Some(page) = self.cached(url) {
            debug!("scraping: reusing fetched page {}", url);
            return Ok(page);
        }

        let body = fetch_with_retry(&self.client, url)
            .await
            .with_context(|| format!("failed to fetch opinion page {}", url))?;
        let page: Arc<str> = Arc::from(String::from_utf8_lossy(&body).into_owned());
        info!("scraping: fetched {} bytes from {}", page.len(), url);

        if let Ok(mut pages) = self.pages.lock() {
            pages.insert(url.to_string(), page.clone());
        }
        Ok(page)
    }
}

/// How `write_clean_html` treats the tags it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleaning {
    /// Keep every tag; the output only feeds html2text.
    ForText,
    /// Keep `PUBLISHED_TAGS` only and center headings.
    ForFeed,
}

/// Extracts the opinion body from a case page as plain text.
///
/// Navigation chrome is removed, in-page anchors are unwrapped and stray
/// "TOP" links dropped. The result is capped at `max_chars` characters.
pub fn extract_case_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let Some(root) = select_content_root(&document) else {
        return String::new();
    };

    let mut cleaned = String::new();
    write_clean_html(root, Cleaning::ForText, &mut cleaned);

    let text = match html2text::from_read(cleaned.as_bytes(), 100) {
        Ok(text) => text,
        Err(e) => {
            warn!("scraping: failed to convert opinion HTML to text: {}", e);
            root.text().collect::<Vec<_>>().join("\n")
        }
    };

    truncate_chars(&collapse_blank_lines(&text), max_chars)
}

/// Extracts the opinion body as sanitized HTML for the decision feed.
///
/// Only formatting tags survive, without attributes except `href` on links
/// that leave the page. `h1`-`h3` are centered.
pub fn extract_body_html(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let root = select_content_root(&document).context("no opinion content container found")?;

    let mut body = String::new();
    write_clean_html(root, Cleaning::ForFeed, &mut body);
    let body = body.trim().to_string();
    if root.text().all(|t| t.trim().is_empty()) || body.is_empty() {
        anyhow::bail!("could not extract opinion body HTML");
    }
    Ok(body)
}

/// Builds the decision feed description: a source link, the listing line,
/// then either the opinion body or the error that prevented fetching it.
pub fn build_description(url: &str, meta: &str, body: &Result<String>) -> String {
    let mut parts = vec![format!(
        "<p><a href=\"{}\">{}</a></p>",
        escape_html(url),
        source_label(url)
    )];
    if !meta.is_empty() {
        parts.push(format!("<p>{}</p>", escape_html(meta)));
    }
    match body {
        Ok(html) => parts.push(html.clone()),
        Err(e) => parts.push(format!(
            "<p><b>Error:</b> {}</p>",
            escape_html(&format!("{:#}", e))
        )),
    }
    parts.join("\n")
}

fn source_label(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    if host.ends_with("law.cornell.edu") {
        "Cornell".to_string()
    } else if host.ends_with("courtlistener.com") {
        "CourtListener".to_string()
    } else if host.is_empty() {
        "Source".to_string()
    } else {
        host
    }
}

fn select_content_root(document: &Html) -> Option<ElementRef<'_>> {
    for css in CONTENT_SELECTORS {
        let selector = Selector::parse(css).expect("valid content selector");
        if let Some(node) = document.select(&selector).next() {
            debug!("scraping: using content container '{}'", css);
            return Some(node);
        }
    }
    None
}

/// Re-serializes `element`'s children without chrome or attributes
/// (other than `href` on links that leave the page).
fn write_clean_html(element: ElementRef<'_>, mode: Cleaning, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                if text.trim().eq_ignore_ascii_case("top") {
                    continue;
                }
                out.push_str(&escape_html(text));
            }
            Node::Element(el) => {
                let Some(child_ref) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = el.name();
                if IGNORE_TAGS.contains(&name) {
                    continue;
                }
                let href = el.attr("href");
                let in_page_anchor = name == "a" && href.map_or(true, |h| h.starts_with('#'));
                let dropped = mode == Cleaning::ForFeed && !PUBLISHED_TAGS.contains(&name);
                if in_page_anchor || dropped {
                    write_clean_html(child_ref, mode, out);
                    continue;
                }

                out.push('<');
                out.push_str(name);
                if let (Some(href), "a") = (href, name) {
                    out.push_str(" href=\"");
                    out.push_str(&escape_html(href));
                    out.push('"');
                }
                if mode == Cleaning::ForFeed && CENTERED_TAGS.contains(&name) {
                    out.push_str(" style=\"text-align:center;\"");
                }
                out.push('>');
                if VOID_TAGS.contains(&name) {
                    continue;
                }
                write_clean_html(child_ref, mode, out);
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            _ => {}
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Collapses runs of three or more newlines into one blank line.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.trim().chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else if ch != '\r' {
            newlines = 0;
        } else {
            continue;
        }
        out.push(ch);
    }
    out
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
