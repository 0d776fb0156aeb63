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

use super::segment::{Segment, SubType};
use std::fmt;

/// A problem found by [`Library::validate`](super::Library::validate).
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub segment_id: String,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    MissingDuration,
    EnergyOutOfRange(f64),
    NoSuitableSections,
    /// A percussive segment names a synth, or a melodic one names a sample, without the other.
    PlaybackKindMismatch { expected: &'static str, found: String },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.segment_id)?;
        match &self.kind {
            IssueKind::MissingDuration => write!(f, "missing playback duration"),
            IssueKind::EnergyOutOfRange(energy) => {
                write!(f, "energy level {} is outside of [0, 1]", energy)
            }
            IssueKind::NoSuitableSections => write!(f, "no suitable sections"),
            IssueKind::PlaybackKindMismatch { expected, found } => {
                write!(f, "expected a {} but found {}", expected, found)
            }
        }
    }
}

pub(super) fn check(segment: &Segment) -> Vec<Issue> {
    let mut kinds = Vec::new();
    let params = &segment.playback_params;

    if params.duration_bars.map_or(true, |bars| bars <= 0.0) {
        kinds.push(IssueKind::MissingDuration);
    }
    if let Some(energy) = segment.metadata.energy_level {
        if !(0.0..=1.0).contains(&energy) {
            kinds.push(IssueKind::EnergyOutOfRange(energy));
        }
    }
    if segment.metadata.suitable_sections.is_empty() {
        kinds.push(IssueKind::NoSuitableSections);
    }
    match (&params.synth, &params.sample) {
        (Some(synth), None) if segment.sub_type.is_percussive() => {
            kinds.push(IssueKind::PlaybackKindMismatch {
                expected: "sample",
                found: format!("synth {}", synth),
            });
        }
        (None, Some(sample)) if !segment.sub_type.is_percussive() => {
            kinds.push(IssueKind::PlaybackKindMismatch {
                expected: "synth",
                found: format!("sample {}", sample),
            });
        }
        _ => {}
    }

    kinds
        .into_iter()
        .map(|kind| Issue {
            segment_id: segment.id.clone(),
            kind,
        })
        .collect()
}

/// Fills in missing metadata. Returns `true` if anything changed.
pub(super) fn enrich(segment: &mut Segment) -> bool {
    let mut changed = false;

    if segment.metadata.suitable_sections.is_empty() {
        segment.metadata.suitable_sections = default_sections(segment.sub_type)
            .iter()
            .map(|s| s.to_string())
            .collect();
        changed = true;
    }
    if segment.metadata.energy_level.is_none() {
        segment.metadata.energy_level = Some(estimate_energy(segment));
        changed = true;
    }
    if segment.metadata.complexity.is_none() {
        segment.metadata.complexity = Some(estimate_complexity(segment));
        changed = true;
    }

    changed
}

fn default_sections(sub_type: SubType) -> &'static [&'static str] {
    use SubType::*;
    match sub_type {
        KickPattern => &["intro", "verse", "drop", "build_up"],
        SnarePattern => &["drop", "verse", "transition"],
        HihatPattern => &["verse", "drop", "build_up"],
        PercussionLayer => &["verse", "breakdown", "bridge"],
        FullDrumKit => &["drop", "chorus"],
        Breakbeat => &["drop", "breakdown", "bridge"],
        BassLine => &["intro", "verse", "drop", "chorus"],
        ChordProgression => &["verse", "chorus", "bridge"],
        Pad => &["intro", "breakdown", "bridge", "outro"],
        SubBass => &["intro", "verse", "drop", "outro"],
        LeadMelody => &["drop", "chorus", "bridge"],
        Arpeggio => &["build_up", "drop", "verse"],
        Hook => &["chorus", "drop"],
        Ornament => &["verse", "bridge", "breakdown"],
        SynthTexture => &["intro", "breakdown", "bridge", "outro"],
        NoiseLayer => &["build_up", "transition"],
        Riser => &["build_up"],
        Impact => &["drop", "transition"],
        Transition => &["transition", "build_up", "breakdown"],
        AmbientLayer | FieldRecording => &["intro", "breakdown", "outro"],
    }
}

fn estimate_energy(segment: &Segment) -> f64 {
    use SubType::*;
    let mut energy: f64 = match segment.sub_type {
        KickPattern | Breakbeat | LeadMelody | Impact => 0.7,
        Pad | AmbientLayer | SynthTexture => 0.3,
        _ => 0.5,
    };
    let tags = segment.tags();
    if tags.contains("intense") || tags.contains("driving") {
        energy += 0.1;
    }
    if tags.contains("soft") || tags.contains("ambient") {
        energy -= 0.1;
    }
    energy.clamp(0.0, 1.0)
}

fn estimate_complexity(segment: &Segment) -> f64 {
    use SubType::*;
    let params = &segment.playback_params;
    let mut complexity: f64 = 0.5;

    match params.notes.len() {
        0 => {}
        n if n > 8 => complexity += 0.2,
        n if n < 4 => complexity -= 0.1,
        _ => {}
    }
    match segment.sub_type {
        Breakbeat | Arpeggio | Ornament => complexity += 0.1,
        Pad | SubBass | AmbientLayer => complexity -= 0.1,
        _ => {}
    }
    if params.pattern_density().map_or(false, |density| density > 0.5) {
        complexity += 0.1;
    }

    complexity.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_check_reports_every_problem() {
        let mut segment = Segment::new("snare_01", SubType::SnarePattern);
        segment.metadata.energy_level = Some(1.4);
        segment.playback_params.synth = Some("tb303".into());

        let kinds: Vec<_> = check(&segment).into_iter().map(|issue| issue.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::MissingDuration,
                IssueKind::EnergyOutOfRange(1.4),
                IssueKind::NoSuitableSections,
                IssueKind::PlaybackKindMismatch {
                    expected: "sample",
                    found: "synth tb303".into()
                },
            ]
        );
    }

    #[test]
    fn test_check_clean_segment() {
        let mut segment = Segment::new("pad_01", SubType::Pad);
        segment.playback_params.duration_bars = Some(8.0);
        segment.playback_params.synth = Some("hollow".into());
        segment.metadata.suitable_sections = vec!["intro".into()];
        assert!(check(&segment).is_empty());
    }

    #[test]
    fn test_enrich_only_fills_gaps() {
        let mut segment = Segment::new("arp_01", SubType::Arpeggio);
        segment.metadata.element_tags = vec!["driving".into()];
        segment.playback_params.notes = (0..10).map(|n| json!(60 + n)).collect();

        assert!(enrich(&mut segment));
        assert_eq!(segment.metadata.suitable_sections, vec!["build_up", "drop", "verse"]);
        assert_close(segment.metadata.energy_level, 0.6);
        assert_close(segment.metadata.complexity, 0.8);

        segment.metadata.energy_level = Some(0.1);
        assert!(!enrich(&mut segment));
        assert_eq!(segment.metadata.energy_level, Some(0.1));
    }

    #[test]
    fn test_enrich_soft_pad() {
        let mut segment = Segment::new("pad_02", SubType::Pad);
        segment.metadata.mood_tags = vec!["soft".into()];
        segment.playback_params.notes = vec![json!(48), json!(55)];
        enrich(&mut segment);
        assert_close(segment.metadata.energy_level, 0.2);
        assert_close(segment.metadata.complexity, 0.3);
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.unwrap();
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }
}
