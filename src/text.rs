// src/text.rs
//! Text normalization shared by fetchers (summaries) and the merge step (title keys).

use once_cell::sync::OnceCell;
use regex::Regex;

/// Separators that usually introduce a publisher/label suffix on syndicated headlines.
const SUFFIX_SEPARATORS: [&str; 3] = [" \u{2014} ", " \u{2013} ", " | "];
const MAX_SUFFIX_WORDS: usize = 3;

/// Decode entities, strip tags, normalize typographic quotes and collapse whitespace.
pub fn clean_html(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Cap `s` at `max` chars, appending an ellipsis when something was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out = out.trim_end().to_string();
    out.push('\u{2026}');
    out
}

/// Key used for near-duplicate title suppression.
///
/// Lowercases, drops a short publisher suffix after a dash or pipe, replaces punctuation with
/// spaces and collapses runs of whitespace. Returns an empty string for titles with no
/// alphanumeric content; callers must not dedup on empty keys.
pub fn normalize_title(title: &str) -> String {
    let lowered = clean_html(title).to_lowercase();
    let base = strip_label_suffix(&lowered);

    let mut out = String::with_capacity(base.len());
    let mut last_space = true;
    for ch in base.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn strip_label_suffix(title: &str) -> &str {
    let cut = SUFFIX_SEPARATORS
        .iter()
        .filter_map(|sep| title.rfind(sep).map(|pos| (pos, sep.len())))
        .max_by_key(|(pos, _)| *pos);

    match cut {
        Some((pos, sep_len)) => {
            let head = title[..pos].trim();
            let tail = &title[pos + sep_len..];
            if !head.is_empty() && tail.split_whitespace().count() <= MAX_SUFFIX_WORDS {
                head
            } else {
                title
            }
        }
        None => title,
    }
}
