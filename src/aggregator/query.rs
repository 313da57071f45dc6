// src/aggregator/query.rs
//! Read path: filter → sort → paginate over a snapshot. Never fails; bad parameters are clamped
//! or ignored.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{FeedItem, FeedKind, FilterParams, SortKey, SourceCategory};

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeFilter {
    Kind(FeedKind),
    Category(SourceCategory),
}

fn parse_type_filter(raw: &str) -> Option<TypeFilter> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "rss" => Some(TypeFilter::Kind(FeedKind::Rss)),
        "reddit" => Some(TypeFilter::Kind(FeedKind::Reddit)),
        "news" => Some(TypeFilter::Category(SourceCategory::News)),
        "community" => Some(TypeFilter::Category(SourceCategory::Community)),
        _ => None,
    }
}

/// Page size: `None`/negative → default; otherwise capped at `max_limit`. Zero stays zero.
pub fn resolve_limit(limit: Option<i64>, limits: PageLimits) -> usize {
    match limit {
        Some(l) if l >= 0 => usize::try_from(l).unwrap_or(usize::MAX).min(limits.max_limit),
        _ => limits.default_limit,
    }
}

pub fn resolve_offset(offset: Option<i64>) -> usize {
    offset
        .and_then(|o| usize::try_from(o).ok())
        .unwrap_or(0)
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

/// Returns the requested page and the filtered total (before pagination).
///
/// `categories` maps source id → category for the `news`/`community` type filter.
pub fn apply(
    items: &[FeedItem],
    params: &FilterParams,
    categories: &HashMap<String, SourceCategory>,
    limits: PageLimits,
) -> (Vec<FeedItem>, usize) {
    let type_filter = params.source_type.as_deref().and_then(|raw| {
        let f = parse_type_filter(raw);
        if f.is_none() && !raw.trim().is_empty() {
            tracing::debug!(source_type = raw, "ignoring unknown source type filter");
        }
        f
    });
    let tag = non_blank(&params.tag);
    let query = non_blank(&params.query);
    let (from, to) = match (params.from_date, params.to_date) {
        (Some(f), Some(t)) if f > t => (Some(t), Some(f)),
        other => other,
    };

    let mut hits: Vec<&FeedItem> = items
        .iter()
        .filter(|it| params.source_ids.is_empty() || params.source_ids.contains(&it.source_id))
        .filter(|it| match type_filter {
            None => true,
            Some(TypeFilter::Kind(k)) => it.source_type == k,
            Some(TypeFilter::Category(c)) => categories.get(&it.source_id) == Some(&c),
        })
        .filter(|it| tag.as_ref().map_or(true, |t| it.tags.contains(t)))
        .filter(|it| {
            query.as_ref().map_or(true, |q| {
                it.title.to_lowercase().contains(q.as_str())
                    || it.summary.to_lowercase().contains(q.as_str())
            })
        })
        .filter(|it| from.map_or(true, |f| it.published_at >= f))
        .filter(|it| to.map_or(true, |t| it.published_at <= t))
        .collect();

    let total = hits.len();
    hits.sort_by(|a, b| compare(a, b, params.sort));

    let page = hits
        .into_iter()
        .skip(resolve_offset(params.offset))
        .take(resolve_limit(params.limit, limits))
        .cloned()
        .collect();
    (page, total)
}

fn compare(a: &FeedItem, b: &FeedItem, key: SortKey) -> Ordering {
    let newest = b.published_at.cmp(&a.published_at);
    match key {
        SortKey::Newest => newest,
        SortKey::Score => b.score().cmp(&a.score()).then(newest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Engagement, SourceInfo};
    use chrono::{Duration, TimeZone, Utc};

    const LIMITS: PageLimits = PageLimits {
        default_limit: 2,
        max_limit: 3,
    };

    #[test]
    fn limit_resolution() {
        assert_eq!(resolve_limit(None, LIMITS), 2);
        assert_eq!(resolve_limit(Some(-5), LIMITS), 2);
        assert_eq!(resolve_limit(Some(0), LIMITS), 0);
        assert_eq!(resolve_limit(Some(1), LIMITS), 1);
        assert_eq!(resolve_limit(Some(500), LIMITS), 3);
        assert_eq!(resolve_offset(Some(-1)), 0);
        assert_eq!(resolve_offset(Some(4)), 4);
    }

    fn fixture() -> (Vec<FeedItem>, HashMap<String, SourceCategory>) {
        let news = SourceInfo {
            id: "news".into(),
            display_name: "News".into(),
            feed_url: "https://news.example/feed".into(),
            source_type: SourceCategory::News,
            feed_kind: FeedKind::Rss,
            enabled: true,
        };
        let reddit = SourceInfo {
            id: "r-fpv".into(),
            display_name: "r/fpv".into(),
            feed_url: "https://www.reddit.com/r/fpv/hot.json".into(),
            source_type: SourceCategory::Community,
            feed_kind: FeedKind::Reddit,
            enabled: true,
        };
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let mut a = FeedItem::new(&news, "FAA updates Remote ID", "https://news.example/a");
        a.published_at = t0;
        a.tags.insert("regulation".into());
        let mut b = FeedItem::new(&reddit, "My first tinywhoop", "https://reddit.example/b");
        b.published_at = t0 + Duration::days(1);
        b.summary = "Loving the goggles".into();
        b.engagement = Some(Engagement {
            upvotes: 50,
            comments: 3,
        });
        let mut c = FeedItem::new(&reddit, "Crash compilation", "https://reddit.example/c");
        c.published_at = t0 + Duration::days(2);
        c.engagement = Some(Engagement {
            upvotes: 10,
            comments: 1,
        });

        let cats = [news, reddit]
            .into_iter()
            .map(|s| (s.id, s.source_type))
            .collect();
        (vec![a, b, c], cats)
    }

    fn titles(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn newest_sort_and_default_page() {
        let (items, cats) = fixture();
        let (page, total) = apply(&items, &FilterParams::default(), &cats, LIMITS);
        assert_eq!(total, 3);
        assert_eq!(titles(&page), vec!["Crash compilation", "My first tinywhoop"]);
    }

    #[test]
    fn score_sort_puts_missing_engagement_last() {
        let (items, cats) = fixture();
        let params = FilterParams {
            sort: SortKey::Score,
            limit: Some(3),
            ..Default::default()
        };
        let (page, _) = apply(&items, &params, &cats, LIMITS);
        assert_eq!(
            titles(&page),
            vec!["My first tinywhoop", "Crash compilation", "FAA updates Remote ID"]
        );
    }

    #[test]
    fn type_filter_accepts_kind_or_category() {
        let (items, cats) = fixture();
        for raw in ["reddit", "community", " Community "] {
            let params = FilterParams {
                source_type: Some(raw.into()),
                limit: Some(10),
                ..Default::default()
            };
            assert_eq!(apply(&items, &params, &cats, LIMITS).1, 2, "{raw}");
        }
        let unknown = FilterParams {
            source_type: Some("podcast".into()),
            ..Default::default()
        };
        assert_eq!(apply(&items, &unknown, &cats, LIMITS).1, 3);
    }

    #[test]
    fn tag_query_and_date_filters_combine() {
        let (items, cats) = fixture();
        let by_tag = FilterParams {
            tag: Some("Regulation".into()),
            ..Default::default()
        };
        assert_eq!(titles(&apply(&items, &by_tag, &cats, LIMITS).0), vec!["FAA updates Remote ID"]);

        let by_summary = FilterParams {
            query: Some("GOGGLES".into()),
            ..Default::default()
        };
        assert_eq!(titles(&apply(&items, &by_summary, &cats, LIMITS).0), vec!["My first tinywhoop"]);

        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        // reversed bounds are swapped; both ends inclusive
        let range = FilterParams {
            from_date: Some(t0 + Duration::days(1)),
            to_date: Some(t0),
            limit: Some(10),
            ..Default::default()
        };
        let (page, total) = apply(&items, &range, &cats, LIMITS);
        assert_eq!(total, 2);
        assert_eq!(titles(&page), vec!["My first tinywhoop", "FAA updates Remote ID"]);
    }

    #[test]
    fn offset_past_end_is_empty_not_error() {
        let (items, cats) = fixture();
        let params = FilterParams {
            offset: Some(10),
            ..Default::default()
        };
        let (page, total) = apply(&items, &params, &cats, LIMITS);
        assert!(page.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn source_set_filter() {
        let (items, cats) = fixture();
        let params = FilterParams {
            source_ids: ["news".to_string()].into(),
            ..Default::default()
        };
        assert_eq!(apply(&items, &params, &cats, LIMITS).1, 1);
    }
}
