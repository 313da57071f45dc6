// src/aggregator/merge.rs
//! Merge step of a refresh: dedup across batches, then tag inference.

use std::collections::HashMap;

use crate::model::{canonical_url, FeedItem};
use crate::tagger::Tagger;
use crate::text::normalize_title;

/// Drops duplicates, keeping the first occurrence in input order.
///
/// Two items are duplicates when they share an id (same source + canonical URL), a canonical URL
/// (the same link syndicated by another source), or a non-empty normalized title. A dropped
/// item's tags are unioned into its survivor, and its keys are remembered for the survivor, so
/// chains of duplicates collapse the same way sequential passes would.
///
/// Returns the survivors and the number of items removed.
pub fn dedup(items: Vec<FeedItem>) -> (Vec<FeedItem>, usize) {
    let mut kept: Vec<FeedItem> = Vec::with_capacity(items.len());
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut by_title: HashMap<String, usize> = HashMap::new();
    let mut removed = 0usize;

    for item in items {
        let url_key = canonical_url(&item.url);
        let title_key = normalize_title(&item.title);

        let hit = by_id
            .get(&item.id)
            .or_else(|| by_url.get(&url_key))
            .or_else(|| {
                if title_key.is_empty() {
                    None
                } else {
                    by_title.get(&title_key)
                }
            })
            .copied();

        let idx = hit.unwrap_or(kept.len());
        by_id.entry(item.id.clone()).or_insert(idx);
        by_url.entry(url_key).or_insert(idx);
        if !title_key.is_empty() {
            by_title.entry(title_key).or_insert(idx);
        }

        match hit {
            Some(idx) => {
                tracing::trace!(dropped = %item.id, kept = %kept[idx].id, "duplicate item");
                kept[idx].tags.extend(item.tags);
                removed += 1;
            }
            None => kept.push(item),
        }
    }

    (kept, removed)
}

/// Unions keyword-inferred tags into every item. Content is preferred; the summary stands in
/// when an item carries no full body.
pub fn tag_items(items: &mut [FeedItem], tagger: &Tagger) {
    for item in items.iter_mut() {
        let body = item.content.as_deref().unwrap_or(&item.summary);
        let inferred = tagger.infer_tags(&item.title, body);
        item.tags.extend(inferred);
    }
}

/// Concatenate batches in the given order, dedup, tag.
pub fn merge_batches(batches: Vec<Vec<FeedItem>>, tagger: &Tagger) -> (Vec<FeedItem>, usize) {
    let all: Vec<FeedItem> = batches.into_iter().flatten().collect();
    let (mut items, removed) = dedup(all);
    tag_items(&mut items, tagger);
    (items, removed)
}
