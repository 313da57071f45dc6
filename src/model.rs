// src/model.rs
//! Core value types shared by fetchers, the aggregator and its callers.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters stripped during URL canonicalization (tracking noise).
const TRACKING_PARAMS: [&str; 4] = ["fbclid", "gclid", "ref", "ref_src"];

/// Wire format a fetcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    Reddit,
}

/// Editorial category of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    #[default]
    News,
    Community,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Rss => "rss",
            FeedKind::Reddit => "reddit",
        }
    }
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::News => "news",
            SourceCategory::Community => "community",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static descriptor of a configured source. Immutable once the engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
    #[serde(alias = "url")]
    pub feed_url: String,
    #[serde(default)]
    pub source_type: SourceCategory,
    #[serde(alias = "kind")]
    pub feed_kind: FeedKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub upvotes: i64,
    pub comments: i64,
}

/// A normalized content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_id: String,
    pub source_name: String,
    pub source_type: FeedKind,
    pub author: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<Engagement>,
}

impl FeedItem {
    /// Minimal item for `source` pointing at `url`; the id is derived here so it always matches
    /// the url the item was built with.
    pub fn new(source: &SourceInfo, title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let now = Utc::now();
        Self {
            id: item_id(&source.id, &url),
            title: title.into(),
            url,
            source_id: source.id.clone(),
            source_name: source.display_name.clone(),
            source_type: source.feed_kind,
            author: String::new(),
            summary: String::new(),
            content: None,
            published_at: now,
            fetched_at: now,
            thumbnail: None,
            tags: BTreeSet::new(),
            engagement: None,
        }
    }

    /// Upvotes used by the `score` sort; items without engagement count as zero.
    pub fn score(&self) -> i64 {
        self.engagement.map(|e| e.upvotes).unwrap_or(0)
    }

    /// Adds a source-supplied tag (trimmed, lowercased, empty ignored).
    pub fn add_tag(&mut self, tag: &str) {
        let t = tag.trim().to_lowercase();
        if !t.is_empty() {
            self.tags.insert(t);
        }
    }
}

/// Stable item id: SHA-256 over `(source_id, canonical_url)`, first 16 bytes as hex.
pub fn item_id(source_id: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_url(url).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Canonical form of a link: lowercase scheme/host, no fragment, no `utm_*`/click-id params,
/// no trailing slash. Unparseable input is returned trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut out = url.to_string();
    if url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Host part of `raw`, used as the rate limiter key.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Newest,
    Score,
}

impl FromStr for SortKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" | "new" | "recent" => Ok(SortKey::Newest),
            "score" | "top" => Ok(SortKey::Score),
            _ => Err(()),
        }
    }
}

/// A read query. Out-of-range values are clamped by the aggregator, never rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// `None` or negative means "use the default page size"; `Some(0)` yields an empty page.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub source_ids: HashSet<String>,
    /// Either a feed kind (`rss`, `reddit`) or a source category (`news`, `community`).
    pub source_type: Option<String>,
    pub query: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub tag: Option<String>,
}

/// Merged result of the most recent successful-or-partial refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub items: Vec<FeedItem>,
    pub fetched_at: DateTime<Utc>,
    pub source_count: usize,
}

/// One page of `get_items`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Count after filtering, before pagination.
    pub total_count: usize,
    /// `None` when no snapshot is cached yet.
    pub fetched_at: Option<DateTime<Utc>>,
    pub source_count: usize,
}

impl FeedPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            fetched_at: None,
            source_count: 0,
        }
    }
}
