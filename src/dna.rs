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

//! Composition documents ("DNA").
//!
//! A DNA document is a JSON file describing one track as a set of chapters, each made of named
//! sections:
//!
//! ```json
//! {
//!   "bpm": 128,
//!   "chord_progression": ["Am", "F", "C", "G"],
//!   "track_id": "dawn_ignition",
//!   "chapters": {
//!     "intro": {
//!       "sections": {
//!         "a": { "start_time": 0, "duration": 16, "energy": 0.2, "active_parts": ["pad"] }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Loading a document resolves the timeline once: every section ends up with a concrete
//! `start_time` and `duration`, sections are sorted by start time, and every field that is not
//! one of the reserved names is classified as a [`FieldValue`]. Nothing downstream looks at raw
//! JSON again.
//!
//! An album is a document with a top-level `tracks` array. See [`load_tracks`].

use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Duration given to sections that do not say how long they are.
pub const DEFAULT_SECTION_DURATION: f64 = 60.0;

const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_TRACK_ID: &str = "unknown_track";

/// Section and document keys that never become open fields.
pub const RESERVED_FIELDS: &[&str] = &[
    "start_time",
    "duration",
    "energy",
    "density",
    "active_parts",
    "chord_index",
    "track_id",
    "bpm",
    "key",
    "scale",
    "chord_progression",
    "chapters",
    "sweep_phase_start",
    "sweep_phase_end",
    "micro_energy",
    "pattern_overrides",
    "segments",
    "anti_drop",
    "callback_theme",
];

/// A specialized [`Result`] type for document loading.
pub type Result<T> = std::result::Result<T, DocumentError>;

/// The error type returned when a document cannot be loaded.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(PathBuf),

    #[error("reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing document JSON")]
    Parse(#[from] serde_json::Error),

    #[error("invalid document: {0}")]
    Invalid(String),
}

/// The value of an open section field, classified once at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Classifies a JSON value.
    ///
    /// Booleans and the strings `true/false/on/off/1/0` (in any case) are [`FieldValue::Bool`],
    /// numbers are [`FieldValue::Number`] and any other string is [`FieldValue::Text`]. Arrays,
    /// objects and nulls are not fields and return `None`.
    pub fn classify(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::String(s) => Some(match s.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => FieldValue::Bool(true),
                "false" | "off" | "0" => FieldValue::Bool(false),
                _ => FieldValue::Text(s.clone()),
            }),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Returns true for `Bool(true)`, any non-zero number and any non-empty text.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Bool(b) => *b,
            FieldValue::Number(x) => *x != 0.0,
            FieldValue::Text(s) => !s.is_empty(),
        }
    }
}

/// A filter sweep over the length of a section, as phases in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    pub start: f64,
    pub end: f64,
}

/// A library segment started from inside a section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SegmentCue {
    pub segment_id: String,

    /// Bar offset from the start of the section.
    #[serde(default)]
    pub start_bar: f64,

    /// How many bars to play; the segment's own length when absent.
    #[serde(default)]
    pub duration_bars: Option<f64>,

    /// Per-cue playback parameter overrides.
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A chapter-to-chapter transition listed at the top of a document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChapterTransition {
    pub from_chapter: String,
    pub to_chapter: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "default_transition_bars")]
    pub duration_bars: f64,
}

fn default_transition_bars() -> f64 {
    4.0
}

/// One section of the timeline with its start time and duration resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub chapter: String,
    pub id: String,
    pub start_time: f64,
    pub duration: f64,
    pub energy: f64,
    pub density: f64,
    pub chord_index: i32,
    pub active_parts: Vec<String>,
    pub sweep: Option<Sweep>,
    pub micro_energy: Option<f64>,
    pub anti_drop: bool,
    pub callback_theme: bool,
    pub pattern_overrides: BTreeMap<String, String>,
    pub segments: Vec<SegmentCue>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Section {
    /// Creates a section with every optional field empty.
    pub fn new(chapter: impl Into<String>, id: impl Into<String>, start_time: f64, duration: f64) -> Section {
        Section {
            chapter: chapter.into(),
            id: id.into(),
            start_time,
            duration,
            energy: 0.0,
            density: 0.0,
            chord_index: 0,
            active_parts: Vec::new(),
            sweep: None,
            micro_energy: None,
            anti_drop: false,
            callback_theme: false,
            pattern_overrides: BTreeMap::new(),
            segments: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Looks up an open field.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns `chapter.section`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.chapter, self.id)
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// A parsed track document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub bpm: f64,
    pub key: Option<String>,
    pub scale: Option<String>,
    pub chord_progression: Vec<String>,
    pub track_id: String,
    /// Sorted by `start_time`.
    pub sections: Vec<Section>,
    pub transitions: Vec<ChapterTransition>,
}

impl Document {
    /// Reads and parses a track document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotFound`] if `path` does not exist, and the other variants if it
    /// cannot be read or does not describe a track.
    pub fn load(path: impl AsRef<Path>) -> Result<Document> {
        Document::from_value(read_json(path.as_ref())?)
    }

    pub fn from_json(json: &str) -> Result<Document> {
        Document::from_value(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Document> {
        let object = match value {
            Value::Object(object) => object,
            _ => return Err(invalid("document must be a JSON object")),
        };

        let chord_progression = match object.get("chord_progression") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => string_list(value, "chord_progression")?,
        };
        let transitions = match object.get("transitions") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => Vec::<ChapterTransition>::deserialize(value)?,
        };

        let mut raw = Vec::new();
        if let Some(chapters) = object.get("chapters") {
            let chapters = chapters
                .as_object()
                .ok_or_else(|| invalid("chapters must be an object"))?;
            for (chapter_id, chapter) in chapters {
                let sections = match chapter.get("sections") {
                    Some(Value::Object(sections)) => sections,
                    Some(_) => return Err(invalid(format!("chapter {}: sections must be an object", chapter_id))),
                    None => continue,
                };
                for (section_id, fields) in sections {
                    raw.push(RawSection::parse(chapter_id, section_id, fields)?);
                }
            }
        }

        let bpm = optional_number(&object, "bpm", "document")?.unwrap_or(DEFAULT_BPM);
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(invalid(format!("bpm must be positive, got {}", bpm)));
        }

        Ok(Document {
            bpm,
            key: optional_string(&object, "key"),
            scale: optional_string(&object, "scale"),
            chord_progression,
            track_id: optional_string(&object, "track_id").unwrap_or_else(|| DEFAULT_TRACK_ID.to_owned()),
            sections: resolve_timeline(raw),
            transitions,
        })
    }

    /// The end of the last section, in document seconds.
    pub fn total_time(&self) -> f64 {
        self.sections.iter().map(Section::end_time).fold(0.0, f64::max)
    }

    pub fn transition_between(&self, from_chapter: &str, to_chapter: &str) -> Option<&ChapterTransition> {
        self.transitions
            .iter()
            .find(|t| t.from_chapter == from_chapter && t.to_chapter == to_chapter)
    }
}

/// Loads either a single track or every track of an album.
///
/// An album is a document with a top-level `tracks` array. Each entry is an inline track
/// document or `{"file": "..."}`, resolved relative to the album file.
///
/// # Errors
///
/// Fails on the first track that cannot be loaded.
pub fn load_tracks(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let value = read_json(path)?;
    let tracks = match value.get("tracks") {
        Some(Value::Array(tracks)) => tracks.clone(),
        Some(_) => return Err(invalid("tracks must be an array")),
        None => return Ok(vec![Document::from_value(value)?]),
    };

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    tracks
        .into_iter()
        .map(|track| match track.get("file").and_then(Value::as_str) {
            Some(file) => Document::load(base.join(file)),
            None => Document::from_value(track),
        })
        .collect()
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DocumentError::NotFound(path.to_owned())
        } else {
            DocumentError::Read {
                path: path.to_owned(),
                source,
            }
        }
    })?;
    Ok(serde_json::from_str(&text)?)
}

struct RawSection {
    section: Section,
    start_time: Option<f64>,
    duration: Option<f64>,
}

impl RawSection {
    fn parse(chapter: &str, id: &str, value: &Value) -> Result<RawSection> {
        let context = format!("section {}.{}", chapter, id);
        let object = value
            .as_object()
            .ok_or_else(|| invalid(format!("{} must be an object", context)))?;

        let mut section = Section::new(chapter, id, 0.0, 0.0);
        section.energy = optional_number(object, "energy", &context)?.unwrap_or(0.0);
        section.density = optional_number(object, "density", &context)?.unwrap_or(0.0);
        section.chord_index = optional_number(object, "chord_index", &context)?.unwrap_or(0.0) as i32;
        section.micro_energy = optional_number(object, "micro_energy", &context)?;
        if let Some(parts) = object.get("active_parts") {
            section.active_parts = string_list(parts, &context)?;
        }

        let sweep_start = optional_number(object, "sweep_phase_start", &context)?;
        let sweep_end = optional_number(object, "sweep_phase_end", &context)?;
        if let (Some(start), Some(end)) = (sweep_start, sweep_end) {
            section.sweep = Some(Sweep { start, end });
        }

        section.anti_drop = flag(object, "anti_drop");
        section.callback_theme = flag(object, "callback_theme");

        if let Some(Value::Object(overrides)) = object.get("pattern_overrides") {
            for (part, pattern) in overrides {
                let pattern = match pattern {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                section.pattern_overrides.insert(part.clone(), pattern);
            }
        }
        if let Some(segments) = object.get("segments") {
            section.segments = Vec::<SegmentCue>::deserialize(segments)?;
        }

        for (name, value) in object {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(field) = FieldValue::classify(value) {
                section.fields.insert(name.clone(), field);
            }
        }

        Ok(RawSection {
            section,
            start_time: optional_number(object, "start_time", &context)?,
            duration: optional_number(object, "duration", &context)?,
        })
    }
}

/// Places sections on the timeline.
///
/// If any section lacks a `start_time`, every section is laid end to end in document order. When
/// all start times are present, missing durations stretch to the next section's start.
fn resolve_timeline(raw: Vec<RawSection>) -> Vec<Section> {
    let mut sections: Vec<Section>;
    if raw.iter().any(|r| r.start_time.is_none()) {
        let mut t = 0.0;
        sections = raw
            .into_iter()
            .map(|r| {
                let mut section = r.section;
                section.duration = r.duration.unwrap_or(DEFAULT_SECTION_DURATION);
                section.start_time = t;
                t += section.duration;
                section
            })
            .collect();
    } else {
        let mut pending: Vec<(Section, Option<f64>)> = raw
            .into_iter()
            .map(|r| {
                let mut section = r.section;
                section.start_time = r.start_time.unwrap_or_default();
                (section, r.duration)
            })
            .collect();
        pending.sort_by(|a, b| a.0.start_time.total_cmp(&b.0.start_time));

        let starts: Vec<f64> = pending.iter().map(|(s, _)| s.start_time).collect();
        sections = pending
            .into_iter()
            .enumerate()
            .map(|(i, (mut section, duration))| {
                section.duration = duration.unwrap_or_else(|| match starts.get(i + 1) {
                    Some(next) => next - section.start_time,
                    None => DEFAULT_SECTION_DURATION,
                });
                section
            })
            .collect();
    }
    sections.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    sections
}

fn invalid(message: impl Into<String>) -> DocumentError {
    DocumentError::Invalid(message.into())
}

fn optional_number(object: &Map<String, Value>, key: &str, context: &str) -> Result<Option<f64>> {
    let not_a_number = || invalid(format!("{}: {} is not a number", context, key));
    let value = match object.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => Some(s.trim().parse::<f64>().map_err(|_| not_a_number())?),
        Some(_) => return Err(not_a_number()),
    };
    match value {
        // "inf" and "NaN" parse as floats
        Some(x) if !x.is_finite() => Err(invalid(format!("{}: {} must be finite, got {}", context, key, x))),
        _ => Ok(value),
    }
}

fn optional_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn string_list(value: &Value, context: &str) -> Result<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| invalid(format!("{}: expected a list of strings", context)))?
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(invalid(format!("{}: expected a list of strings", context))),
        })
        .collect()
}

fn flag(object: &Map<String, Value>, key: &str) -> bool {
    object
        .get(key)
        .and_then(FieldValue::classify)
        .map_or(false, |field| field.is_truthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_classify() {
        assert_eq!(FieldValue::classify(&json!(true)), Some(FieldValue::Bool(true)));
        assert_eq!(FieldValue::classify(&json!("ON")), Some(FieldValue::Bool(true)));
        assert_eq!(FieldValue::classify(&json!("Off")), Some(FieldValue::Bool(false)));
        assert_eq!(FieldValue::classify(&json!("0")), Some(FieldValue::Bool(false)));
        assert_eq!(FieldValue::classify(&json!(0.35)), Some(FieldValue::Number(0.35)));
        assert_eq!(FieldValue::classify(&json!(1)), Some(FieldValue::Number(1.0)));
        assert_eq!(
            FieldValue::classify(&json!("wide")),
            Some(FieldValue::Text("wide".to_owned()))
        );
        assert_eq!(FieldValue::classify(&json!([1, 2])), None);
        assert_eq!(FieldValue::classify(&json!(null)), None);
    }

    #[test]
    fn test_sections_sorted_by_start_time() {
        let doc = Document::from_value(json!({
            "chapters": {
                "b": { "sections": { "x": { "start_time": 30, "duration": 10 } } },
                "a": { "sections": {
                    "y": { "start_time": 10, "duration": 20 },
                    "z": { "start_time": 0, "duration": 10 }
                } }
            }
        }))
        .unwrap();

        let order: Vec<_> = doc.sections.iter().map(Section::label).collect();
        assert_eq!(order, vec!["a.z", "a.y", "b.x"]);
        assert_eq!(doc.bpm, 120.0);
        assert_eq!(doc.track_id, "unknown_track");
    }

    #[test]
    fn test_cumulative_fallback_is_all_or_nothing() {
        let doc = Document::from_value(json!({
            "chapters": {
                "intro": { "sections": {
                    "a": { "start_time": 100, "duration": 8 },
                    "b": {},
                    "c": { "duration": 4 }
                } },
                "main": { "sections": { "d": { "start_time": 5 } } }
            }
        }))
        .unwrap();

        let placed: Vec<_> = doc
            .sections
            .iter()
            .map(|s| (s.label(), s.start_time, s.duration))
            .collect();
        assert_eq!(
            placed,
            vec![
                ("intro.a".to_owned(), 0.0, 8.0),
                ("intro.b".to_owned(), 8.0, 60.0),
                ("intro.c".to_owned(), 68.0, 4.0),
                ("main.d".to_owned(), 72.0, 60.0),
            ]
        );
        for pair in doc.sections.windows(2) {
            assert!(pair[0].end_time() <= pair[1].start_time);
        }
    }

    #[test]
    fn test_duration_backfills_from_next_start() {
        let doc = Document::from_value(json!({
            "chapters": { "c": { "sections": {
                "a": { "start_time": 0 },
                "b": { "start_time": 12.5 },
                "c": { "start_time": 20, "duration": 3 },
                "d": { "start_time": 40 }
            } } }
        }))
        .unwrap();

        let durations: Vec<_> = doc.sections.iter().map(|s| s.duration).collect();
        assert_eq!(durations, vec![12.5, 7.5, 3.0, 60.0]);
        assert_eq!(doc.total_time(), 100.0);
    }

    #[test]
    fn test_open_fields_and_reserved_names() {
        let doc = Document::from_value(json!({
            "bpm": 128,
            "chord_progression": ["Am", "F"],
            "chapters": { "c": { "sections": { "s": {
                "start_time": 0,
                "energy": 0.8,
                "chord_index": 1,
                "active_parts": ["kick", "bass"],
                "sweep_phase_start": 0.1,
                "sweep_phase_end": 0.9,
                "micro_energy": 2,
                "anti_drop": "on",
                "pattern_overrides": { "kick": "half_time" },
                "segments": [{ "segment_id": "riser_01", "start_bar": 2 }],
                "drop_gap": 1,
                "reverb_bus": 0.35,
                "texture_air": "off",
                "mood": "dark",
                "notes": [1, 2]
            } } } }
        }))
        .unwrap();

        let section = &doc.sections[0];
        assert_eq!(section.chord_index, 1);
        assert_eq!(section.active_parts, vec!["kick", "bass"]);
        assert_eq!(section.sweep, Some(Sweep { start: 0.1, end: 0.9 }));
        assert_eq!(section.micro_energy, Some(2.0));
        assert!(section.anti_drop);
        assert!(!section.callback_theme);
        assert_eq!(section.pattern_overrides.get("kick").map(String::as_str), Some("half_time"));
        assert_eq!(section.segments[0].segment_id, "riser_01");
        assert_eq!(section.segments[0].start_bar, 2.0);

        let mut expected = BTreeMap::new();
        expected.insert("drop_gap".to_owned(), FieldValue::Number(1.0));
        expected.insert("mood".to_owned(), FieldValue::Text("dark".to_owned()));
        expected.insert("reverb_bus".to_owned(), FieldValue::Number(0.35));
        expected.insert("texture_air".to_owned(), FieldValue::Bool(false));
        assert_eq!(section.fields, expected);
        assert_eq!(doc.bpm, 128.0);
    }

    #[test]
    fn test_sweep_needs_both_phases() {
        let doc = Document::from_value(json!({
            "chapters": { "c": { "sections": { "s": { "sweep_phase_start": 0.4 } } } }
        }))
        .unwrap();
        assert_eq!(doc.sections[0].sweep, None);
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(Document::from_json("[]"), Err(DocumentError::Invalid(_))));
        assert!(matches!(Document::from_json("{"), Err(DocumentError::Parse(_))));
        assert!(matches!(Document::from_json(r#"{"bpm": 0}"#), Err(DocumentError::Invalid(_))));
        assert!(matches!(
            Document::from_value(json!({ "chapters": { "c": { "sections": { "s": { "energy": [1] } } } } })),
            Err(DocumentError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        for bad in ["inf", "-inf", "NaN"] {
            let result = Document::from_value(json!({
                "chapters": { "c": { "sections": {
                    "a": { "start_time": 0 },
                    "b": { "start_time": bad, "duration": 1 }
                } } }
            }));
            assert!(matches!(result, Err(DocumentError::Invalid(_))), "{}", bad);
        }
        assert!(matches!(Document::from_json(r#"{"bpm": "inf"}"#), Err(DocumentError::Invalid(_))));

        let doc = Document::from_value(json!({
            "chapters": { "c": { "sections": { "a": { "start_time": " 12.5 ", "energy": "0.5" } } } }
        }))
        .unwrap();
        assert_eq!(doc.sections[0].start_time, 12.5);
        assert_eq!(doc.sections[0].energy, 0.5);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Document::load("/definitely/not/here.json"),
            Err(DocumentError::NotFound(_))
        ));
    }
}
