// src/ingest/providers/rss.rs
//! RSS 2.0 / Atom fetcher for `rss` and `news` sources.

use async_trait::async_trait;
use quick_xml::de::from_str;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    OffsetDateTime, UtcOffset,
};

use crate::error::FetchError;
use crate::ingest::types::{Fetcher, Record};
use crate::ingest::{normalize_text, truncate_chars};
use crate::source::Source;

const FEED_ACCEPT: &str = "application/rss+xml, application/xml, text/xml, */*";
const DESCRIPTION_MAX_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(default)]
    link: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element text with attributes ignored (`<guid isPermaLink="false">`, `<title type="html">`).
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Normalized view of one feed item, independent of the feed dialect.
struct FeedItem {
    id: Option<String>,
    title: String,
    description: String,
    link: Option<String>,
    published: Option<String>,
}

fn parse_published(ts: &str) -> Option<String> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC))
        .and_then(|dt| dt.format(&Rfc3339).ok())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_rss(xml: &str) -> Option<Vec<FeedItem>> {
    let rss: Rss = from_str(xml).ok()?;
    Some(
        rss.channel
            .item
            .into_iter()
            .map(|it| FeedItem {
                id: non_empty(it.guid.map(|g| g.value)).or_else(|| non_empty(it.link.clone())),
                title: normalize_text(it.title.as_deref().unwrap_or_default()),
                description: normalize_text(it.description.as_deref().unwrap_or_default()),
                link: non_empty(it.link),
                published: it.pub_date.as_deref().and_then(parse_published),
            })
            .collect(),
    )
}

fn parse_atom(xml: &str) -> Option<Vec<FeedItem>> {
    if !xml.contains("<feed") {
        return None;
    }
    let feed: Feed = from_str(xml).ok()?;
    Some(
        feed.entry
            .into_iter()
            .map(|e| {
                let link = e
                    .link
                    .iter()
                    .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
                    .or_else(|| e.link.first())
                    .and_then(|l| non_empty(l.href.clone()));
                let body = e.summary.or(e.content).map(|t| t.value).unwrap_or_default();
                FeedItem {
                    id: non_empty(e.id).or_else(|| link.clone()),
                    title: normalize_text(&e.title.map(|t| t.value).unwrap_or_default()),
                    description: normalize_text(&body),
                    link,
                    published: e
                        .published
                        .or(e.updated)
                        .as_deref()
                        .and_then(parse_published),
                }
            })
            .collect(),
    )
}

/// Parse an RSS 2.0 document, falling back to Atom. Items without a title
/// are dropped; at most `max_items` records are returned. A feed with no
/// usable item is a format error.
pub fn parse_feed(xml: &str, max_items: usize) -> Result<Vec<Record>, FetchError> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let items = parse_rss(&xml_clean)
        .or_else(|| parse_atom(&xml_clean))
        .ok_or_else(|| FetchError::Format("neither RSS 2.0 nor Atom".to_string()))?;

    let out = items
        .into_iter()
        .filter(|it| !it.title.is_empty())
        .take(max_items)
        .map(|it| {
            let description = truncate_chars(&it.description, DESCRIPTION_MAX_CHARS);
            let payload = json!({
                "title": it.title,
                "description": description,
                "content": format!("{}\n\n{}", it.title, it.description),
                "link": it.link.clone().unwrap_or_default(),
                "published": it.published,
                "type": "rss_article",
            });
            Record {
                id: it.id,
                payload,
                ingested_at: None,
            }
        })
        .collect::<Vec<_>>();
    if out.is_empty() {
        return Err(FetchError::Format("feed has no items".to_string()));
    }
    Ok(out)
}

pub struct RssFetcher {
    client: reqwest::Client,
    user_agent: String,
    max_items: usize,
}

impl RssFetcher {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>, max_items: usize) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            max_items: max_items.max(1),
        }
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Record>, FetchError> {
        let resp = self
            .client
            .get(&source.source_url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, FEED_ACCEPT)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "HTTP {status} from {}",
                source.source_url
            )));
        }
        let body = resp.text().await?;
        parse_feed(&body, self.max_items)
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

/// HTML entities that are common in feeds but undefined in XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
