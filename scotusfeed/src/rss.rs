//! RSS 2.0 reading and writing for the feed files.
//!
//! Items carry the decision identifier in `guid`, the decided date in
//! `pubDate`, and extra fields as `category` elements keyed by `domain`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::ChannelConfig;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use std::io::Write;

pub const DOMAIN_DOCKET: &str = "docket";
pub const DOMAIN_GENERATED: &str = "generated";
pub const DOMAIN_MODEL: &str = "model";
pub const DOMAIN_META: &str = "meta";

/// One `<item>` as it appears in the file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub pub_date: Option<DateTime<Utc>>,
    /// (domain, value) pairs
    pub categories: Vec<(String, String)>,
    pub description: String,
}

impl RssItem {
    pub fn category(&self, domain: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(_, v)| v.as_str())
    }
}

/// Removes characters that are not allowed in XML 1.0 documents.
pub fn xml_safe(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n' | '\r')
                || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
        })
        .collect()
}

/// Serializes a full RSS 2.0 document.
pub fn write_channel(
    channel: &ChannelConfig,
    items: &[RssItem],
    built_at: DateTime<Utc>,
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    write_text_element(&mut writer, "title", &channel.title)?;
    write_text_element(&mut writer, "link", &channel.link)?;
    write_text_element(&mut writer, "description", &channel.description)?;
    write_text_element(&mut writer, "language", &channel.language)?;
    write_text_element(&mut writer, "lastBuildDate", &built_at.to_rfc2822())?;

    for item in items {
        write_item(&mut writer, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).context("RSS writer produced invalid UTF-8")
}

fn write_item<W: Write>(writer: &mut Writer<W>, item: &RssItem) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;
    write_text_element(writer, "title", &item.title)?;
    write_text_element(writer, "link", &item.link)?;

    let is_permalink = if item.guid == item.link { "true" } else { "false" };
    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", is_permalink));
    write_element_with(writer, guid, "guid", &item.guid)?;

    if let Some(date) = item.pub_date {
        write_text_element(writer, "pubDate", &date.to_rfc2822())?;
    }
    for (domain, value) in &item.categories {
        let mut category = BytesStart::new("category");
        category.push_attribute(("domain", domain.as_str()));
        write_element_with(writer, category, "category", value)?;
    }
    write_text_element(writer, "description", &item.description)?;
    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    write_element_with(writer, BytesStart::new(name), name, text)
}

fn write_element_with<W: Write>(
    writer: &mut Writer<W>,
    start: BytesStart<'_>,
    name: &str,
    text: &str,
) -> Result<()> {
    let safe = xml_safe(text);
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(&safe)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: ChannelXml,
}

#[derive(Debug, Deserialize)]
struct ChannelXml {
    #[serde(rename = "item", default)]
    items: Vec<ItemXml>,
}

#[derive(Debug, Deserialize)]
struct ItemXml {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    guid: Option<TextXml>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<CategoryXml>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TextXml {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct CategoryXml {
    #[serde(rename = "@domain")]
    domain: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

/// Parses an RSS 2.0 document into its items, in document order.
///
/// An item without `guid` uses its `link` as identifier. A `pubDate` that is
/// not valid RFC 2822 is an error.
pub fn read_channel(xml: &str) -> Result<Vec<RssItem>> {
    let doc: RssDocument = quick_xml::de::from_str(xml).context("failed to parse RSS document")?;

    doc.channel
        .items
        .into_iter()
        .map(|item| {
            let pub_date = match item.pub_date.as_deref().map(str::trim) {
                Some(raw) if !raw.is_empty() => Some(
                    DateTime::parse_from_rfc2822(raw)
                        .with_context(|| format!("invalid pubDate '{}'", raw))?
                        .with_timezone(&Utc),
                ),
                _ => None,
            };
            let guid = item
                .guid
                .map(|g| g.value.trim().to_string())
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| item.link.trim().to_string());
            Ok(RssItem {
                title: item.title.trim().to_string(),
                link: item.link.trim().to_string(),
                guid,
                pub_date,
                categories: item
                    .categories
                    .into_iter()
                    .map(|c| (c.domain.unwrap_or_default(), c.value.trim().to_string()))
                    .collect(),
                description: item.description.trim().to_string(),
            })
        })
        .collect()
}
