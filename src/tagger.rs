// src/tagger.rs
//! Keyword-based tag inference.
//!
//! Each category maps a tag name to lowercase keyword phrases. A category contributes its tag
//! once if any phrase occurs (case-insensitive substring) in the title or the content.
//! The rule table can be changed at runtime; [`Tagger::rules`] hands out a copy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

pub type TagRules = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug)]
pub struct Tagger {
    rules: RwLock<TagRules>,
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Tagger {
    pub fn new(rules: TagRules) -> Self {
        let cleaned = rules
            .into_iter()
            .filter_map(|(tag, kws)| clean_rule(&tag, kws))
            .collect();
        Self {
            rules: RwLock::new(cleaned),
        }
    }

    /// Built-in table with `overrides` replacing categories of the same name.
    pub fn with_overrides<I, K>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, K)>,
        K: IntoIterator<Item = String>,
    {
        let tagger = Self::default();
        for (tag, kws) in overrides {
            tagger.set_rule(&tag, kws);
        }
        tagger
    }

    pub fn infer_tags(&self, title: &str, content: &str) -> BTreeSet<String> {
        let title = title.to_lowercase();
        let content = content.to_lowercase();
        let guard = self.rules.read().expect("tagger rwlock poisoned");
        guard
            .iter()
            .filter(|(_, kws)| {
                kws.iter()
                    .any(|k| title.contains(k.as_str()) || content.contains(k.as_str()))
            })
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Replace (or create) a category. An empty keyword list removes it.
    pub fn set_rule<K>(&self, tag: &str, keywords: K)
    where
        K: IntoIterator<Item = String>,
    {
        let mut guard = self.rules.write().expect("tagger rwlock poisoned");
        match clean_rule(tag, keywords) {
            Some((t, kws)) => {
                guard.insert(t, kws);
            }
            None => {
                guard.remove(&tag.trim().to_lowercase());
            }
        }
    }

    /// Extend an existing category (or create it).
    pub fn add_keywords<K>(&self, tag: &str, keywords: K)
    where
        K: IntoIterator<Item = String>,
    {
        let Some((t, kws)) = clean_rule(tag, keywords) else {
            return;
        };
        let mut guard = self.rules.write().expect("tagger rwlock poisoned");
        guard.entry(t).or_default().extend(kws);
    }

    /// Returns true if the category existed.
    pub fn remove_rule(&self, tag: &str) -> bool {
        let mut guard = self.rules.write().expect("tagger rwlock poisoned");
        guard.remove(&tag.trim().to_lowercase()).is_some()
    }

    /// Copy of the live table.
    pub fn rules(&self) -> TagRules {
        self.rules.read().expect("tagger rwlock poisoned").clone()
    }
}

fn clean_rule<K>(tag: &str, keywords: K) -> Option<(String, BTreeSet<String>)>
where
    K: IntoIterator<Item = String>,
{
    let tag = tag.trim().to_lowercase();
    let kws: BTreeSet<String> = keywords
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if tag.is_empty() || kws.is_empty() {
        None
    } else {
        Some((tag, kws))
    }
}

/// Seed categories for drone / FPV news and community posts.
pub fn default_rules() -> TagRules {
    let table: &[(&str, &[&str])] = &[
        ("fpv", &["fpv", "first person view", "goggles", "tinywhoop", "whoop"]),
        ("racing", &["drone race", "drone racing", "multigp", "rotorcross"]),
        ("regulation", &["faa", "easa", "remote id", "part 107", "regulation", "no-fly", "airspace"]),
        ("dji", &["dji", "avata", "mavic", "mini 4"]),
        ("firmware", &["betaflight", "inav", "ardupilot", "px4", "firmware"]),
        ("radio", &["expresslrs", "elrs", "crossfire", "radiomaster", "transmitter", "edgetx"]),
        ("battery", &["lipo", "li-ion", "battery", "batteries"]),
        ("build", &["frame", "flight controller", "motor", "4in1 esc", "soldering", "build log"]),
        ("photography", &["aerial photo", "cinematic", "camera", "gimbal", "4k"]),
        ("delivery", &["drone delivery", "package delivery", "zipline", "wing aviation"]),
        ("military", &["military", "defense", "warfare", "ukraine"]),
    ];
    table
        .iter()
        .map(|(tag, kws)| {
            (
                tag.to_string(),
                kws.iter().map(|k| k.to_string()).collect(),
            )
        })
        .collect()
}
