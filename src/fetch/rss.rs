// src/fetch/rss.rs
//! Syndication feed fetcher (RSS 2.0 and Atom).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use super::{record_batch, FetchContext, Fetcher, Origin, SUMMARY_MAX_CHARS};
use crate::model::{FeedItem, SourceInfo};
use crate::ratelimit::DynRateLimiter;
use crate::text::{clean_html, truncate_chars};

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    #[serde(default)]
    link: Vec<LinkEl>,
    guid: Option<TextEl>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "date", alias = "dc:date")]
    dc_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "encoded", alias = "content:encoded")]
    encoded: Option<String>,
    author: Option<String>,
    #[serde(rename = "creator", alias = "dc:creator")]
    creator: Option<String>,
    #[serde(default)]
    category: Vec<CategoryEl>,
    #[serde(default)]
    enclosure: Vec<MediaEl>,
    #[serde(rename = "thumbnail", alias = "media:thumbnail", default)]
    media_thumbnail: Vec<MediaEl>,
    #[serde(rename = "content", alias = "media:content", default)]
    media_content: Vec<MediaEl>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextEl>,
    #[serde(default)]
    link: Vec<LinkEl>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextEl>,
    content: Option<TextEl>,
    #[serde(default)]
    author: Vec<AtomPerson>,
    #[serde(default)]
    category: Vec<CategoryEl>,
    #[serde(rename = "thumbnail", alias = "media:thumbnail", default)]
    media_thumbnail: Vec<MediaEl>,
}

#[derive(Debug, Deserialize)]
struct AtomPerson {
    name: Option<String>,
}

// --- shared element shapes ---

#[derive(Debug, Default, Deserialize)]
struct TextEl {
    #[serde(rename = "$text", default)]
    value: String,
}

/// `<link>` is text in RSS and an `href` attribute in Atom.
#[derive(Debug, Default, Deserialize)]
struct LinkEl {
    #[serde(rename = "$text", default)]
    value: String,
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// `<category>` is text in RSS and a `term` attribute in Atom.
#[derive(Debug, Default, Deserialize)]
struct CategoryEl {
    #[serde(rename = "$text", default)]
    value: String,
    #[serde(rename = "@term")]
    term: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaEl {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
}

impl MediaEl {
    fn image_url(&self) -> Option<&str> {
        let is_image = self.mime.as_deref().is_some_and(|m| m.starts_with("image/"))
            || self.medium.as_deref() == Some("image");
        self.url.as_deref().filter(|u| is_image && is_http(u))
    }
}

fn is_http(u: &str) -> bool {
    u.starts_with("https://") || u.starts_with("http://")
}

/// Item link: first `rel="alternate"` (or rel-less) href/text that looks like a URL.
fn pick_link(links: &[LinkEl]) -> Option<String> {
    links
        .iter()
        .filter(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .filter_map(|l| {
            l.href
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .or_else(|| Some(l.value.trim()).filter(|v| !v.is_empty()))
        })
        .find(|u| is_http(u))
        .map(str::to_string)
}

/// RFC 2822 (RSS) or RFC 3339 (Atom, `dc:date`). Unparseable input is `None`.
pub(crate) fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok();
    match odt {
        Some(dt) => DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond()),
        // obsolete zone names ("GMT", "EST") that `time` rejects
        None => DateTime::parse_from_rfc2822(ts)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// First element name of the document, skipping the prolog, comments and doctype.
fn root_element(xml: &str) -> Option<&str> {
    let mut rest = xml;
    loop {
        let start = rest.find('<')?;
        rest = &rest[start + 1..];
        if rest.starts_with('?') || rest.starts_with('!') {
            continue;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        return Some(&rest[..end]);
    }
}

/// Entities that are valid HTML but not XML and show up in real feeds, replaced by the
/// characters they name.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "\u{00A0}")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&ldquo;", "\u{201C}")
        .replace("&rdquo;", "\u{201D}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&rsquo;", "\u{2019}")
        .replace("&hellip;", "\u{2026}")
}

pub struct RssFetcher {
    source: SourceInfo,
    origin: Origin,
}

impl RssFetcher {
    pub fn from_fixture(source: SourceInfo, xml: &str) -> Self {
        Self {
            source,
            origin: Origin::Fixture(xml.to_string()),
        }
    }

    pub fn from_http(source: SourceInfo, client: reqwest::Client, limiter: DynRateLimiter) -> Self {
        Self {
            source,
            origin: Origin::Http { client, limiter },
        }
    }

    /// Parse a whole document; any structural error fails the batch.
    pub fn parse_document(&self, xml: &str, fetched_at: DateTime<Utc>) -> Result<Vec<FeedItem>> {
        let xml = scrub_html_entities_for_xml(xml);
        match root_element(&xml) {
            Some("rss") => {
                let rss: Rss = from_str(&xml).context("parsing rss xml")?;
                Ok(rss
                    .channel
                    .items
                    .into_iter()
                    .filter_map(|it| self.item_from_rss(it, fetched_at))
                    .collect())
            }
            Some("feed") => {
                let feed: AtomFeed = from_str(&xml).context("parsing atom xml")?;
                Ok(feed
                    .entries
                    .into_iter()
                    .filter_map(|e| self.item_from_atom(e, fetched_at))
                    .collect())
            }
            Some(other) => bail!("unsupported feed document <{other}>"),
            None => bail!("empty feed document"),
        }
    }

    fn item_from_rss(&self, it: RssItem, fetched_at: DateTime<Utc>) -> Option<FeedItem> {
        let title = clean_html(it.title.as_deref().unwrap_or_default());
        let link = pick_link(&it.link)
            .or_else(|| it.guid.map(|g| g.value).filter(|g| is_http(g.trim())))?;
        if title.is_empty() {
            return None;
        }

        let mut item = FeedItem::new(&self.source, title, link.trim());
        item.author = clean_html(
            it.creator
                .as_deref()
                .or(it.author.as_deref())
                .unwrap_or_default(),
        );
        let description = clean_html(it.description.as_deref().unwrap_or_default());
        let body = it.encoded.as_deref().map(clean_html).filter(|b| !b.is_empty());
        item.summary = truncate_chars(
            if description.is_empty() {
                body.as_deref().unwrap_or_default()
            } else {
                description.as_str()
            },
            SUMMARY_MAX_CHARS,
        );
        item.content = body;
        item.published_at = it
            .pub_date
            .as_deref()
            .or(it.dc_date.as_deref())
            .and_then(parse_feed_date)
            .unwrap_or(fetched_at);
        item.fetched_at = fetched_at;
        item.thumbnail = it
            .media_thumbnail
            .iter()
            .filter_map(|m| m.url.as_deref().filter(|u| is_http(u)))
            .chain(it.media_content.iter().filter_map(MediaEl::image_url))
            .chain(it.enclosure.iter().filter_map(MediaEl::image_url))
            .next()
            .map(str::to_string);
        for c in &it.category {
            item.add_tag(c.term.as_deref().unwrap_or(&c.value));
        }
        Some(item)
    }

    fn item_from_atom(&self, e: AtomEntry, fetched_at: DateTime<Utc>) -> Option<FeedItem> {
        let title = clean_html(&e.title.unwrap_or_default().value);
        let link = pick_link(&e.link)?;
        if title.is_empty() {
            return None;
        }

        let mut item = FeedItem::new(&self.source, title, link);
        item.author = e
            .author
            .iter()
            .filter_map(|a| a.name.as_deref())
            .map(clean_html)
            .find(|n| !n.is_empty())
            .unwrap_or_default();
        let summary = e.summary.map(|s| clean_html(&s.value)).unwrap_or_default();
        let body = e.content.map(|c| clean_html(&c.value)).filter(|b| !b.is_empty());
        item.summary = truncate_chars(
            if summary.is_empty() {
                body.as_deref().unwrap_or_default()
            } else {
                summary.as_str()
            },
            SUMMARY_MAX_CHARS,
        );
        item.content = body;
        item.published_at = e
            .published
            .as_deref()
            .or(e.updated.as_deref())
            .and_then(parse_feed_date)
            .unwrap_or(fetched_at);
        item.fetched_at = fetched_at;
        item.thumbnail = e
            .media_thumbnail
            .iter()
            .filter_map(|m| m.url.as_deref().filter(|u| is_http(u)))
            .next()
            .map(str::to_string);
        for c in &e.category {
            item.add_tag(c.term.as_deref().unwrap_or(&c.value));
        }
        Some(item)
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<FeedItem>> {
        let body = self.origin.load(&self.source.feed_url, ctx).await?;
        let t0 = std::time::Instant::now();
        let items = self
            .parse_document(&body, Utc::now())
            .with_context(|| format!("source {}", self.source.id))?;
        record_batch(&self.source.id, t0, items.len());
        Ok(items)
    }

    fn source(&self) -> &SourceInfo {
        &self.source
    }
}
