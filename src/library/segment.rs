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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeSet, fmt, path::PathBuf, str::FromStr};

/// Energy assumed for segments that do not declare one.
pub const DEFAULT_ENERGY: f64 = 0.5;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<$name, String> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|x| x.as_str() == s)
                    .ok_or_else(|| format!("unknown {}: {}", stringify!($name), s))
            }
        }
    };
}

string_enum! {
    /// The coarse kind of a segment.
    pub enum Category {
        Rhythm => "rhythm",
        Harmony => "harmony",
        Melody => "melody",
        Texture => "texture",
        Fx => "fx",
        Atmosphere => "atmosphere",
    }
}

string_enum! {
    /// The fine-grained kind of a segment. The engine picks a player by sub-type.
    pub enum SubType {
        KickPattern => "kick_pattern",
        SnarePattern => "snare_pattern",
        HihatPattern => "hihat_pattern",
        PercussionLayer => "percussion_layer",
        FullDrumKit => "full_drum_kit",
        Breakbeat => "breakbeat",
        BassLine => "bass_line",
        ChordProgression => "chord_progression",
        Pad => "pad",
        SubBass => "sub_bass",
        LeadMelody => "lead_melody",
        Arpeggio => "arpeggio",
        Hook => "hook",
        Ornament => "ornament",
        SynthTexture => "synth_texture",
        NoiseLayer => "noise_layer",
        Riser => "riser",
        Impact => "impact",
        Transition => "transition",
        AmbientLayer => "ambient_layer",
        FieldRecording => "field_recording",
    }
}

impl SubType {
    pub fn category(self) -> Category {
        use SubType::*;
        match self {
            KickPattern | SnarePattern | HihatPattern | PercussionLayer | FullDrumKit
            | Breakbeat => Category::Rhythm,
            BassLine | ChordProgression | Pad | SubBass => Category::Harmony,
            LeadMelody | Arpeggio | Hook | Ornament => Category::Melody,
            SynthTexture | NoiseLayer => Category::Texture,
            Riser | Impact | Transition => Category::Fx,
            AmbientLayer | FieldRecording => Category::Atmosphere,
        }
    }

    /// Drum sub-types are played from samples, everything else from synths.
    pub fn is_percussive(self) -> bool {
        self.category() == Category::Rhythm
    }
}

/// Energy ranges used by the library index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyBucket {
    /// Below 0.3.
    Low,
    /// From 0.3 up to, but not including, 0.7.
    Medium,
    /// 0.7 and above.
    High,
}

impl EnergyBucket {
    pub fn of(energy: f64) -> EnergyBucket {
        if energy < 0.3 {
            EnergyBucket::Low
        } else if energy < 0.7 {
            EnergyBucket::Medium
        } else {
            EnergyBucket::High
        }
    }
}

/// What the engine needs to play a segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_bars: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Value>,
    /// Step pattern, either a list of step values or a string such as `"x..x..x."`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlaybackParams {
    /// The fraction of pattern steps that are hits, if there is a pattern.
    pub fn pattern_density(&self) -> Option<f64> {
        let hits: Vec<bool> = match self.pattern.as_ref()? {
            Value::Array(steps) => steps
                .iter()
                .map(|step| match step {
                    Value::Number(n) => n.as_f64().map_or(false, |x| x > 0.0),
                    Value::Bool(b) => *b,
                    _ => false,
                })
                .collect(),
            Value::String(steps) => steps
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '|')
                .map(|c| c != '.' && c != '-' && c != '0')
                .collect(),
            _ => return None,
        };
        if hits.is_empty() {
            return None;
        }
        Some(hits.iter().filter(|&&hit| hit).count() as f64 / hits.len() as f64)
    }

    /// Renders the parameters as a JSON object.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Descriptive data used for searching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genre_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mood_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element_tags: Vec<String>,
    #[serde(default)]
    pub suitable_sections: Vec<String>,
}

/// A reusable piece of music.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(alias = "segment_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Derived from the sub-type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub sub_type: SubType,
    #[serde(default, alias = "musical_params")]
    pub playback_params: PlaybackParams,
    #[serde(default)]
    pub metadata: Metadata,
    /// The file the segment was loaded from.
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

impl Segment {
    pub fn new(id: impl Into<String>, sub_type: SubType) -> Segment {
        Segment {
            id: id.into(),
            name: String::new(),
            category: None,
            sub_type,
            playback_params: PlaybackParams::default(),
            metadata: Metadata::default(),
            source_file: None,
        }
    }

    pub fn category(&self) -> Category {
        self.category.unwrap_or_else(|| self.sub_type.category())
    }

    pub fn energy(&self) -> f64 {
        self.metadata.energy_level.unwrap_or(DEFAULT_ENERGY)
    }

    pub fn energy_bucket(&self) -> EnergyBucket {
        EnergyBucket::of(self.energy())
    }

    /// Every tag from all of the tag lists.
    pub fn tags(&self) -> BTreeSet<&str> {
        let metadata = &self.metadata;
        metadata
            .tags
            .iter()
            .chain(&metadata.genre_tags)
            .chain(&metadata.mood_tags)
            .chain(&metadata.element_tags)
            .map(String::as_str)
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(tag)
    }

    pub fn duration_bars(&self) -> Option<f64> {
        self.playback_params.duration_bars
    }
}
