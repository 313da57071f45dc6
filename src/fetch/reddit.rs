// src/fetch/reddit.rs
//! Social link-aggregation fetcher reading Reddit listing JSON (`/r/<sub>/<sort>.json`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::{record_batch, FetchContext, Fetcher, Origin, SUMMARY_MAX_CHARS};
use crate::model::{Engagement, FeedItem, SourceInfo};
use crate::ratelimit::DynRateLimiter;
use crate::text::{clean_html, truncate_chars};

const REDDIT_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    permalink: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    link_flair_text: Option<String>,
    #[serde(default)]
    stickied: bool,
}

pub struct RedditFetcher {
    source: SourceInfo,
    origin: Origin,
}

impl RedditFetcher {
    pub fn from_fixture(source: SourceInfo, json: &str) -> Self {
        Self {
            source,
            origin: Origin::Fixture(json.to_string()),
        }
    }

    pub fn from_http(source: SourceInfo, client: reqwest::Client, limiter: DynRateLimiter) -> Self {
        Self {
            source,
            origin: Origin::Http { client, limiter },
        }
    }

    /// Configured URL with a `.json` suffix on the path (`/r/fpv/hot` → `/r/fpv/hot.json`).
    pub fn listing_url(&self) -> String {
        match Url::parse(&self.source.feed_url) {
            Ok(mut u) => {
                if !u.path().ends_with(".json") {
                    let path = format!("{}.json", u.path().trim_end_matches('/'));
                    u.set_path(&path);
                }
                u.to_string()
            }
            Err(_) => self.source.feed_url.clone(),
        }
    }

    pub fn parse_listing(&self, json: &str, fetched_at: DateTime<Utc>) -> Result<Vec<FeedItem>> {
        let listing: Listing = serde_json::from_str(json).context("parsing reddit listing")?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|c| c.data)
            .filter(|p| !p.stickied)
            .filter_map(|p| self.item_from_post(p, fetched_at))
            .collect())
    }

    fn item_from_post(&self, p: Post, fetched_at: DateTime<Utc>) -> Option<FeedItem> {
        let title = clean_html(&p.title);
        if title.is_empty() || p.permalink.is_empty() {
            return None;
        }
        let link = format!("{REDDIT_BASE}{}", p.permalink);

        let mut item = FeedItem::new(&self.source, title, link);
        item.author = p.author;
        let body = clean_html(&p.selftext);
        item.summary = truncate_chars(&body, SUMMARY_MAX_CHARS);
        item.content = Some(body).filter(|b| !b.is_empty());
        item.published_at = DateTime::from_timestamp(p.created_utc as i64, 0).unwrap_or(fetched_at);
        item.fetched_at = fetched_at;
        // "self", "default", "nsfw" are placeholders, not images
        item.thumbnail = p.thumbnail.filter(|t| t.starts_with("http"));
        item.engagement = Some(Engagement {
            upvotes: p.score,
            comments: p.num_comments,
        });
        if let Some(flair) = p.link_flair_text.as_deref() {
            item.add_tag(flair);
        }
        Some(item)
    }
}

#[async_trait]
impl Fetcher for RedditFetcher {
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<FeedItem>> {
        let body = self.origin.load(&self.listing_url(), ctx).await?;
        let t0 = std::time::Instant::now();
        let items = self
            .parse_listing(&body, Utc::now())
            .with_context(|| format!("source {}", self.source.id))?;
        record_batch(&self.source.id, t0, items.len());
        Ok(items)
    }

    fn source(&self) -> &SourceInfo {
        &self.source
    }
}
