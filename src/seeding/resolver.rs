//! Cross-unit entity resolution.
//!
//! Variant mentions of the same real-world thing are merged within one
//! episode: normalization handles case, corporate suffixes and common
//! abbreviations; alias patterns read alternate names out of descriptions;
//! an acronym table and a fuzzy LCS ratio catch the rest. Entities of
//! different types never merge.

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::seeding::knowledge::{Entity, UnitKnowledge};
use crate::text::similarity::ratio;

/// Fuzzy-match threshold on normalized names.
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

const SUFFIXES: &[&str] = &[
    ", inc.", ", inc", " inc.", " inc", ", llc", " llc", ", ltd", " ltd", ", corp", " corp",
    " corporation", " company", " & co", " co.",
];

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("&", "and"),
    ("u.s.", "us"),
    ("u.k.", "uk"),
    ("dr.", "doctor"),
    ("dr ", "doctor "),
    ("mr.", "mister"),
    ("mr ", "mister "),
    ("ms.", "miss"),
    ("prof.", "professor"),
];

/// Built-in acronym pairs, both sides normalized.
const ACRONYMS: &[(&str, &str)] = &[
    ("ai", "artificial intelligence"),
    ("ml", "machine learning"),
    ("llm", "large language model"),
    ("nlp", "natural language processing"),
    ("us", "united states"),
    ("uk", "united kingdom"),
    ("vc", "venture capital"),
];

/// Irregular singular/plural pairs the trailing-`s` rule misses.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("analysis", "analyses"),
    ("crisis", "crises"),
    ("criterion", "criteria"),
    ("medium", "media"),
    ("person", "people"),
];

static ALIAS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)also known as ([^,\.]+)",
        r"(?i)formerly ([^,\.]+)",
        r"(?i)aka ([^,\.]+)",
        r"\(([^)]+)\)",
        r#"(?i)or "([^"]+)""#,
        r"(?i)or '([^']+)'",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("alias pattern compiles"))
    .collect()
});

/// The merged representative of all variant mentions of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub canonical_name: String,
    pub entity_type: String,
    /// Every observed surface form (the canonical name included) plus
    /// description-derived aliases.
    pub aliases: Vec<String>,
    pub appears_in_units: Vec<String>,
    pub total_mentions: u32,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Resolution result: canonical entities plus the `(unit, raw name)` map the
/// graph writer uses to wire unit-level references.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub canonical: Vec<CanonicalEntity>,
    /// `(unit_id, raw_name)` → index into `canonical`.
    pub mapping: FxHashMap<String, usize>,
    /// `1 - |canonical| / |raw|`; 0 for an empty input.
    pub reduction_ratio: f64,
}

impl ResolutionOutcome {
    pub fn mapping_key(unit_id: &str, raw_name: &str) -> String {
        format!("{unit_id}\u{1f}{raw_name}")
    }

    pub fn canonical_for(&self, unit_id: &str, raw_name: &str) -> Option<&CanonicalEntity> {
        self.mapping
            .get(&Self::mapping_key(unit_id, raw_name))
            .map(|&i| &self.canonical[i])
    }
}

/// Normalize an entity name for comparison: lowercase, strip corporate
/// suffixes, expand abbreviations, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = name.to_lowercase().trim().to_string();
    for suffix in SUFFIXES {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            normalized = stripped.trim().to_string();
        }
    }
    for (abbr, full) in ABBREVIATIONS {
        normalized = normalized.replace(abbr, full);
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull candidate aliases out of an entity description.
pub fn extract_aliases(name: &str, description: Option<&str>) -> Vec<String> {
    let Some(description) = description else {
        return Vec::new();
    };
    let mut aliases = Vec::new();
    for pattern in ALIAS_PATTERNS.iter() {
        for captures in pattern.captures_iter(description) {
            if let Some(alias) = captures.get(1) {
                let alias = alias.as_str().trim();
                if !alias.is_empty() && !alias.eq_ignore_ascii_case(name) {
                    aliases.push(alias.to_string());
                }
            }
        }
    }
    aliases
}

fn acronym_match(a: &str, b: &str) -> bool {
    ACRONYMS
        .iter()
        .any(|(short, long)| (a == *short && b == *long) || (a == *long && b == *short))
}

fn plural_match(a: &str, b: &str) -> bool {
    if a.len() > 1 && a.strip_suffix('s') == Some(b) {
        return true;
    }
    if b.len() > 1 && b.strip_suffix('s') == Some(a) {
        return true;
    }
    IRREGULAR_PLURALS
        .iter()
        .any(|(s, p)| (a == *s && b == *p) || (a == *p && b == *s))
}

/// Whether two normalized names denote the same entity.
fn names_match(a: &str, b: &str, b_aliases: &[String]) -> bool {
    if a == b {
        return true;
    }
    if b_aliases.iter().any(|alias| normalize_name(alias) == a) {
        return true;
    }
    if acronym_match(a, b) || plural_match(a, b) {
        return true;
    }
    ratio(a, b) >= SIMILARITY_THRESHOLD
}

/// Merge entity mentions across units into canonical entities.
pub fn resolve(per_unit: &[UnitKnowledge]) -> ResolutionOutcome {
    let mut outcome = ResolutionOutcome::default();
    let mut raw_count = 0usize;

    for unit in per_unit {
        for entity in &unit.entities {
            raw_count += 1;
            let normalized = normalize_name(&entity.name);
            let matched = outcome
                .canonical
                .iter()
                .position(|c| {
                    c.entity_type == entity.entity_type
                        && names_match(&normalized, &normalize_name(&c.canonical_name), &c.aliases)
                });
            let index = match matched {
                Some(index) => {
                    merge_into(&mut outcome.canonical[index], entity, &unit.unit_id);
                    index
                }
                None => {
                    outcome.canonical.push(new_canonical(entity, &unit.unit_id));
                    outcome.canonical.len() - 1
                }
            };
            outcome.mapping.insert(
                ResolutionOutcome::mapping_key(&unit.unit_id, &entity.name),
                index,
            );
        }
    }

    outcome.reduction_ratio = if raw_count == 0 {
        0.0
    } else {
        1.0 - outcome.canonical.len() as f64 / raw_count as f64
    };
    tracing::info!(
        raw = raw_count,
        canonical = outcome.canonical.len(),
        reduction_ratio = outcome.reduction_ratio,
        "entity resolution finished"
    );
    outcome
}

fn new_canonical(entity: &Entity, unit_id: &str) -> CanonicalEntity {
    let mut canonical = CanonicalEntity {
        canonical_name: entity.name.clone(),
        entity_type: entity.entity_type.clone(),
        aliases: vec![entity.name.clone()],
        appears_in_units: vec![unit_id.to_string()],
        total_mentions: entity.mention_count,
        confidence: entity.confidence,
        description: entity.description.clone(),
    };
    for alias in extract_aliases(&entity.name, entity.description.as_deref()) {
        push_alias(&mut canonical, alias);
    }
    canonical
}

fn merge_into(canonical: &mut CanonicalEntity, entity: &Entity, unit_id: &str) {
    // The highest-confidence variant names the canonical entity; every
    // surface form joins the alias set.
    if entity.confidence > canonical.confidence {
        canonical.canonical_name = entity.name.clone();
        canonical.confidence = entity.confidence;
    }
    push_alias(canonical, entity.name.clone());
    for alias in extract_aliases(&entity.name, entity.description.as_deref()) {
        push_alias(canonical, alias);
    }
    if let (None, Some(description)) = (&canonical.description, &entity.description) {
        canonical.description = Some(description.clone());
    }
    canonical.total_mentions += entity.mention_count;
    if !canonical.appears_in_units.iter().any(|u| u == unit_id) {
        canonical.appears_in_units.push(unit_id.to_string());
    }
}

fn push_alias(canonical: &mut CanonicalEntity, alias: String) {
    if !canonical.aliases.contains(&alias) {
        canonical.aliases.push(alias);
    }
}
