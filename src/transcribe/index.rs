//! Searchable metadata index over completed episodes.
//!
//! The orchestrator appends a record whenever an episode completes; the
//! index answers speaker/podcast/date/keyword searches over everything
//! transcribed so far. Primary records are persisted; the inverted indices
//! are rebuilt on load.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::store::paths::{read_json_or_default, write_json_atomic};

/// One completed episode, as the index sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub guid: String,
    pub podcast: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub speakers: Vec<String>,
    pub transcribed_seconds: f64,
    pub output_path: PathBuf,
    pub added: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    records: FxHashMap<String, EpisodeRecord>,
}

/// Aggregate statistics over the index.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IndexStatistics {
    pub episode_count: usize,
    pub episodes_per_podcast: FxHashMap<String, usize>,
    pub distinct_speakers: usize,
    pub total_transcribed_seconds: f64,
}

#[derive(Default)]
struct SecondaryIndices {
    by_speaker: FxHashMap<String, FxHashSet<String>>,
    by_podcast: FxHashMap<String, FxHashSet<String>>,
    by_word: FxHashMap<String, FxHashSet<String>>,
}

/// The `.metadata_index.json` store.
pub struct MetadataIndex {
    path: PathBuf,
    state: Mutex<(IndexDocument, SecondaryIndices)>,
}

impl MetadataIndex {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc: IndexDocument = read_json_or_default(&path).await;
        let indices = build_indices(&doc);
        Self {
            path,
            state: Mutex::new((doc, indices)),
        }
    }

    /// Insert or replace an episode record and reindex it.
    pub async fn add_episode(&self, record: EpisodeRecord) -> std::io::Result<()> {
        let snapshot = {
            let mut guard = self.state.lock().expect("index lock poisoned");
            let (doc, indices) = &mut *guard;
            if doc.records.remove(&record.guid).is_some() {
                // Replacing: rebuild from scratch rather than unpicking sets.
                *indices = build_indices(doc);
            }
            index_record(indices, &record);
            doc.records.insert(record.guid.clone(), record);
            doc.clone()
        };
        write_json_atomic(&self.path, &snapshot).await
    }

    pub fn get(&self, guid: &str) -> Option<EpisodeRecord> {
        let guard = self.state.lock().expect("index lock poisoned");
        guard.0.records.get(guid).cloned()
    }

    pub fn search_by_speaker(&self, name: &str) -> Vec<EpisodeRecord> {
        self.lookup(|indices| indices.by_speaker.get(&name.to_lowercase()).cloned())
    }

    pub fn search_by_podcast(&self, name: &str) -> Vec<EpisodeRecord> {
        self.lookup(|indices| indices.by_podcast.get(&name.to_lowercase()).cloned())
    }

    /// Episodes whose date falls in `[from, to]`, inclusive. Undated episodes
    /// never match.
    pub fn search_by_date_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<EpisodeRecord> {
        let guard = self.state.lock().expect("index lock poisoned");
        let mut hits: Vec<EpisodeRecord> = guard
            .0
            .records
            .values()
            .filter(|r| r.date.is_some_and(|d| d >= from && d <= to))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.date.cmp(&b.date));
        hits
    }

    /// Episodes whose title contains every given keyword.
    pub fn search_by_keywords(&self, keywords: &[&str]) -> Vec<EpisodeRecord> {
        if keywords.is_empty() {
            return Vec::new();
        }
        let guard = self.state.lock().expect("index lock poisoned");
        let (doc, indices) = &*guard;
        let mut guids: Option<FxHashSet<String>> = None;
        for word in keywords {
            let hits = indices
                .by_word
                .get(&word.to_lowercase())
                .cloned()
                .unwrap_or_default();
            guids = Some(match guids {
                None => hits,
                Some(acc) => acc.intersection(&hits).cloned().collect(),
            });
        }
        let mut records: Vec<EpisodeRecord> = guids
            .unwrap_or_default()
            .iter()
            .filter_map(|g| doc.records.get(g).cloned())
            .collect();
        records.sort_by(|a, b| a.guid.cmp(&b.guid));
        records
    }

    pub fn statistics(&self) -> IndexStatistics {
        let guard = self.state.lock().expect("index lock poisoned");
        let (doc, indices) = &*guard;
        let mut per_podcast: FxHashMap<String, usize> = FxHashMap::default();
        let mut total = 0.0;
        for record in doc.records.values() {
            *per_podcast.entry(record.podcast.clone()).or_default() += 1;
            total += record.transcribed_seconds;
        }
        IndexStatistics {
            episode_count: doc.records.len(),
            episodes_per_podcast: per_podcast,
            distinct_speakers: indices.by_speaker.len(),
            total_transcribed_seconds: total,
        }
    }

    /// Rebuild the inverted indices from the primary records.
    pub fn rebuild(&self) {
        let mut guard = self.state.lock().expect("index lock poisoned");
        let (doc, indices) = &mut *guard;
        *indices = build_indices(doc);
    }

    fn lookup(
        &self,
        f: impl FnOnce(&SecondaryIndices) -> Option<FxHashSet<String>>,
    ) -> Vec<EpisodeRecord> {
        let guard = self.state.lock().expect("index lock poisoned");
        let (doc, indices) = &*guard;
        let mut records: Vec<EpisodeRecord> = f(indices)
            .unwrap_or_default()
            .iter()
            .filter_map(|g| doc.records.get(g).cloned())
            .collect();
        records.sort_by(|a, b| a.guid.cmp(&b.guid));
        records
    }
}

fn build_indices(doc: &IndexDocument) -> SecondaryIndices {
    let mut indices = SecondaryIndices::default();
    for record in doc.records.values() {
        index_record(&mut indices, record);
    }
    indices
}

fn index_record(indices: &mut SecondaryIndices, record: &EpisodeRecord) {
    for speaker in &record.speakers {
        indices
            .by_speaker
            .entry(speaker.to_lowercase())
            .or_default()
            .insert(record.guid.clone());
    }
    indices
        .by_podcast
        .entry(record.podcast.to_lowercase())
        .or_default()
        .insert(record.guid.clone());
    for word in title_words(&record.title) {
        indices
            .by_word
            .entry(word)
            .or_default()
            .insert(record.guid.clone());
    }
}

fn title_words(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}
