// Numus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A catalog of reusable segments.
//!
//! A [`Library`] owns a fixed set of [`Segment`]s and indexes them by category, sub-type, tag,
//! energy bucket and suitable section. It is built once, usually with [`Library::load_dir`], and
//! then only read. The only mutations are [`Library::add`] and [`Library::enrich`], both of which
//! keep the indexes up to date.
//!
//! # Searching
//!
//! [`Library::search`] takes a [`SearchQuery`]. Every criterion that is set narrows the result;
//! criteria that are not set match everything. A tag criterion with an empty list of tags matches
//! nothing.
//!
//! ```
//! use numus::library::{Library, SearchQuery, Segment, SubType};
//!
//! let mut kick = Segment::new("kick_01", SubType::KickPattern);
//! kick.metadata.tags = vec!["kick".into(), "foundation".into()];
//! let library = Library::from_segments(vec![kick]);
//!
//! let query = SearchQuery::default().tags(&["kick", "foundation"], true);
//! assert_eq!(library.search(&query).len(), 1);
//! ```

use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs,
    hash::Hash,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

mod segment;
mod validate;

pub use segment::{Category, EnergyBucket, Metadata, PlaybackParams, Segment, SubType, DEFAULT_ENERGY};
pub use validate::{Issue, IssueKind};

/// The error type returned when a library cannot be loaded.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("segment directory not found: {0}")]
    NotFound(PathBuf),

    #[error("walking segment directory")]
    Walk(#[from] walkdir::Error),
}

/// A specialized [`Result`] type for library operations.
pub type Result<T> = std::result::Result<T, LibraryError>;

type Ids = BTreeSet<String>;

/// An indexed set of segments.
#[derive(Debug, Clone, Default)]
pub struct Library {
    segments: BTreeMap<String, Segment>,
    by_category: HashMap<Category, Ids>,
    by_sub_type: HashMap<SubType, Ids>,
    by_tag: HashMap<String, Ids>,
    by_energy: HashMap<EnergyBucket, Ids>,
    by_section: HashMap<String, Ids>,
}

impl Library {
    pub fn new() -> Library {
        Library::default()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Library {
        let mut library = Library::new();
        for segment in segments {
            library.add(segment);
        }
        library
    }

    /// Loads every segment found in the JSON files under `dir`.
    ///
    /// A file holds either a single segment or `{"segments": [...]}`. Files and entries that
    /// cannot be parsed are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` is not a directory or cannot be traversed.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Library> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LibraryError::NotFound(dir.to_owned()));
        }

        let mut library = Library::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            for mut segment in read_segments(path) {
                segment.source_file = Some(path.to_owned());
                if library.segments.contains_key(&segment.id) {
                    log::warn!("{}: replacing duplicate segment {}", path.display(), segment.id);
                }
                library.add(segment);
            }
        }
        log::info!("loaded {} segments from {}", library.len(), dir.display());
        Ok(library)
    }

    /// Adds a segment, replacing any segment with the same ID.
    pub fn add(&mut self, segment: Segment) {
        if let Some(old) = self.segments.remove(&segment.id) {
            self.unindex(&old);
        }
        self.index(&segment);
        self.segments.insert(segment.id.clone(), segment);
    }

    pub fn get(&self, id: &str) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// All segments, ordered by ID.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn by_category(&self, category: Category) -> Vec<&Segment> {
        self.resolve(self.by_category.get(&category))
    }

    pub fn by_sub_type(&self, sub_type: SubType) -> Vec<&Segment> {
        self.resolve(self.by_sub_type.get(&sub_type))
    }

    pub fn by_energy(&self, bucket: EnergyBucket) -> Vec<&Segment> {
        self.resolve(self.by_energy.get(&bucket))
    }

    pub fn by_section(&self, section_type: &str) -> Vec<&Segment> {
        self.resolve(self.by_section.get(section_type))
    }

    /// Segments carrying all of `tags` (`match_all`) or any of them.
    ///
    /// No tags means no segments.
    pub fn find_by_tags<S: AsRef<str>>(&self, tags: &[S], match_all: bool) -> Vec<&Segment> {
        self.resolve(self.tag_ids(tags, match_all).as_ref())
    }

    /// Segments matching every criterion set on `query`, ordered by ID.
    pub fn search(&self, query: &SearchQuery) -> Vec<&Segment> {
        let mut candidates: Option<Ids> = None;
        let mut narrow = |ids: Option<&Ids>| {
            let ids = ids.cloned().unwrap_or_default();
            candidates = Some(match candidates.take() {
                None => ids,
                Some(current) => current.intersection(&ids).cloned().collect(),
            });
        };

        if let Some(category) = query.category {
            narrow(self.by_category.get(&category));
        }
        if let Some(sub_type) = query.sub_type {
            narrow(self.by_sub_type.get(&sub_type));
        }
        if let Some(section_type) = &query.section_type {
            narrow(self.by_section.get(section_type));
        }
        if let Some(tags) = &query.tags {
            narrow(self.tag_ids(tags, query.match_all).as_ref());
        }

        let segments: Vec<&Segment> = match candidates {
            Some(ids) => self.resolve(Some(&ids)),
            None => self.segments.values().collect(),
        };
        segments
            .into_iter()
            .filter(|s| query.min_energy.map_or(true, |min| s.energy() >= min))
            .filter(|s| query.max_energy.map_or(true, |max| s.energy() <= max))
            .collect()
    }

    /// Reports segments that are missing a duration, have an energy level outside of `[0, 1]`,
    /// have no suitable sections, or name a synth or sample that does not fit their sub-type.
    ///
    /// Nothing is corrected.
    pub fn validate(&self) -> Vec<Issue> {
        self.segments.values().flat_map(validate::check).collect()
    }

    /// Fills in missing suitable sections, energy levels and complexity estimates, then rebuilds
    /// the indexes. Returns the number of segments that changed.
    pub fn enrich(&mut self) -> usize {
        let mut changed = 0;
        for segment in self.segments.values_mut() {
            if validate::enrich(segment) {
                changed += 1;
            }
        }
        self.reindex();
        changed
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            total: self.len(),
            ..Stats::default()
        };
        let mut energy_sum = 0.0;
        for segment in self.segments.values() {
            *stats.by_category.entry(segment.category()).or_default() += 1;
            *stats.by_sub_type.entry(segment.sub_type).or_default() += 1;
            *stats.by_energy.entry(segment.energy_bucket()).or_default() += 1;
            for section in &segment.metadata.suitable_sections {
                *stats.by_section.entry(section.clone()).or_default() += 1;
            }
            for tag in segment.tags() {
                *stats.tag_usage.entry(tag.to_owned()).or_default() += 1;
            }
            energy_sum += segment.energy();
        }
        stats.distinct_tags = stats.tag_usage.len();
        if stats.total > 0 {
            stats.average_energy = energy_sum / stats.total as f64;
        }
        stats
    }

    fn tag_ids<S: AsRef<str>>(&self, tags: &[S], match_all: bool) -> Option<Ids> {
        let mut sets = tags
            .iter()
            .map(|tag| self.by_tag.get(tag.as_ref()).cloned().unwrap_or_default());
        let first = sets.next()?;
        Some(sets.fold(first, |acc, ids| {
            if match_all {
                acc.intersection(&ids).cloned().collect()
            } else {
                acc.union(&ids).cloned().collect()
            }
        }))
    }

    fn resolve(&self, ids: Option<&Ids>) -> Vec<&Segment> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.segments.get(id))
            .collect()
    }

    fn index(&mut self, segment: &Segment) {
        let id = &segment.id;
        insert(&mut self.by_category, segment.category(), id);
        insert(&mut self.by_sub_type, segment.sub_type, id);
        insert(&mut self.by_energy, segment.energy_bucket(), id);
        for tag in segment.tags() {
            insert(&mut self.by_tag, tag.to_owned(), id);
        }
        for section in &segment.metadata.suitable_sections {
            insert(&mut self.by_section, section.clone(), id);
        }
    }

    fn unindex(&mut self, segment: &Segment) {
        let id = &segment.id;
        remove(&mut self.by_category, &segment.category(), id);
        remove(&mut self.by_sub_type, &segment.sub_type, id);
        remove(&mut self.by_energy, &segment.energy_bucket(), id);
        for tag in segment.tags() {
            remove(&mut self.by_tag, tag, id);
        }
        for section in &segment.metadata.suitable_sections {
            remove(&mut self.by_section, section.as_str(), id);
        }
    }

    fn reindex(&mut self) {
        let segments = std::mem::take(&mut self.segments);
        *self = Library::from_segments(segments.into_values());
    }
}

fn insert<K: Hash + Eq>(index: &mut HashMap<K, Ids>, key: K, id: &str) {
    index.entry(key).or_default().insert(id.to_owned());
}

fn remove<K, Q>(index: &mut HashMap<K, Ids>, key: &Q, id: &str)
where
    K: Hash + Eq + std::borrow::Borrow<Q>,
    Q: Hash + Eq + ?Sized,
{
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn read_segments(path: &Path) -> Vec<Segment> {
    let value: Value = match fs::read_to_string(path)
        .map_err(|err| err.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|err| err.to_string()))
    {
        Ok(value) => value,
        Err(err) => {
            log::warn!("skipping {}: {}", path.display(), err);
            return Vec::new();
        }
    };

    let entries = match value {
        Value::Object(mut object) if object.contains_key("segments") => match object.remove("segments") {
            Some(Value::Array(entries)) => entries,
            _ => {
                log::warn!("skipping {}: segments must be a list", path.display());
                return Vec::new();
            }
        },
        single => vec![single],
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Segment>(entry) {
            Ok(segment) => Some(segment),
            Err(err) => {
                log::warn!("skipping segment in {}: {}", path.display(), err);
                None
            }
        })
        .collect()
}

/// Criteria for [`Library::search`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub category: Option<Category>,
    pub sub_type: Option<SubType>,
    pub section_type: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Require every tag rather than any of them.
    pub match_all: bool,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
}

impl SearchQuery {
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn sub_type(mut self, sub_type: SubType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }

    pub fn section_type(mut self, section_type: impl Into<String>) -> Self {
        self.section_type = Some(section_type.into());
        self
    }

    pub fn tags<S: AsRef<str>>(mut self, tags: &[S], match_all: bool) -> Self {
        self.tags = Some(tags.iter().map(|t| t.as_ref().to_owned()).collect());
        self.match_all = match_all;
        self
    }

    pub fn energy(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_energy = min;
        self.max_energy = max;
        self
    }
}

/// Counts returned by [`Library::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub by_sub_type: BTreeMap<SubType, usize>,
    pub by_energy: BTreeMap<EnergyBucket, usize>,
    pub by_section: BTreeMap<String, usize>,
    pub distinct_tags: usize,
    pub tag_usage: BTreeMap<String, usize>,
    pub average_energy: f64,
}
