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

//! Sends resolved sections to the engine, skipping values that have not changed.
//!
//! The [`Dispatcher`] remembers the last value it sent for every numeric parameter and every
//! toggle. A parameter or toggle is only sent when its value differs from the remembered one, and
//! the remembered value is only updated when the send succeeds.
//!
//! At the start of every section, every managed toggle the section does not set is switched off.
//! Numeric parameters are never reset; they keep their last value until a section changes it.
//!
//! Within a section, messages go out in this order: the core values (`chord_index`, `energy`,
//! `density`, parts), pattern overrides, toggles, then numeric parameters.
//!
//! Send failures are logged and otherwise ignored. Nothing is retried.
//!
//! The dispatcher also owns the records of segment tracks that are currently playing. It is
//! shared by the player and at most one transition worker, so all of its state sits behind a
//! mutex.

use crate::{
    engine::{self, Command, Transport},
    library::Segment,
    params::{self, ResolvedSection, Rules},
};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Instant,
};

/// Where a segment is being played from, used to name its track.
#[derive(Debug, Clone, Copy)]
pub struct SegmentContext<'a> {
    pub track_id: &'a str,
    pub chapter: &'a str,
    pub section: &'a str,
    pub bpm: f64,
}

/// A segment track that has been started and not yet stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrack {
    pub name: String,
    pub segment_id: String,
    pub chapter: String,
    pub started_at: Instant,
    /// The parameters sent with the play command, updated by later parameter changes.
    pub params: Map<String, Value>,
}

/// A change-gated sender of engine commands.
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    rules: Rules,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    last_sent: HashMap<String, f32>,
    toggle_state: HashMap<String, bool>,
    active: HashMap<String, ActiveTrack>,
    counter: u64,
}

impl Dispatcher {
    pub fn new(transport: impl Transport + 'static, rules: Rules) -> Dispatcher {
        Dispatcher {
            transport: Box::new(transport),
            rules,
            state: Mutex::new(State::default()),
        }
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Sends a command without any gating. Returns `false` if the send failed.
    pub fn send(&self, command: impl Command) -> bool {
        match engine::send(&*self.transport, command) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("{}", err);
                false
            }
        }
    }

    /// Sends a numeric parameter if it differs from the last value sent.
    ///
    /// `pad_cutoff` is clamped first. Returns `true` if a message was sent.
    pub fn send_param(&self, name: &str, value: f64) -> bool {
        let value = if name == params::PAD_CUTOFF {
            params::clamp_pad_cutoff(Some(value))
        } else {
            value
        } as f32;

        let mut state = self.lock();
        if state.last_sent.get(name) == Some(&value) {
            return false;
        }
        let sent = self.send(engine::Param::new(name, value));
        if sent {
            state.last_sent.insert(name.to_owned(), value);
        }
        sent
    }

    /// Sends a toggle if it differs from its last state. Returns `true` if a message was sent.
    pub fn send_toggle(&self, name: &str, on: bool) -> bool {
        let mut state = self.lock();
        if state.toggle_state.get(name) == Some(&on) {
            return false;
        }
        let sent = self.send(engine::Toggle::new(name, on));
        if sent {
            state.toggle_state.insert(name.to_owned(), on);
        }
        sent
    }

    /// Sends everything a section needs.
    pub fn dispatch_section(&self, section: &ResolvedSection) {
        self.send(engine::Param::int("chord_index", section.chord_index));
        self.send(engine::Param::new("energy", section.energy as f32));
        self.send(engine::Param::new("density", section.density as f32));
        self.send(engine::Parts::new(&section.parts));

        for (part, pattern) in &section.patterns {
            self.send(engine::PatternOverride::new(part, pattern));
        }

        for (name, on) in &section.toggles {
            self.send_toggle(name, *on);
        }
        for name in &self.rules.managed_toggles {
            if !section.toggles.contains_key(name) {
                self.send_toggle(name, false);
            }
        }

        for (name, value) in &section.params {
            self.send_param(name, *value);
        }
    }

    /// Starts a segment as a new track and returns the track name.
    ///
    /// The parameters sent are the segment's playback parameters, overridden by the section
    /// tempo, overridden by `overrides`. Returns `None` if the play command could not be sent.
    pub fn play_segment(
        &self,
        segment: &Segment,
        context: SegmentContext<'_>,
        overrides: &Map<String, Value>,
    ) -> Option<String> {
        let mut params = segment.playback_params.to_map();
        params.insert("bpm".to_owned(), Value::from(context.bpm));
        for (key, value) in overrides {
            params.insert(key.clone(), value.clone());
        }

        let mut state = self.lock();
        state.counter += 1;
        let name = format!(
            "t{}_c{}_s{}_{}_{}",
            sanitize(context.track_id, 8),
            sanitize(context.chapter, 8),
            sanitize(context.section, 8),
            sanitize(&segment.id, 12),
            state.counter
        );

        let params_json = Value::Object(params.clone()).to_string();
        if !self.send(engine::SegmentPlay::new(&name, segment.sub_type.as_str(), params_json)) {
            return None;
        }
        log::info!("segment {} playing as {}", segment.id, name);
        state.active.insert(
            name.clone(),
            ActiveTrack {
                name: name.clone(),
                segment_id: segment.id.clone(),
                chapter: context.chapter.to_owned(),
                started_at: Instant::now(),
                params,
            },
        );
        Some(name)
    }

    /// Stops a segment track and forgets it. Returns `false` if no such track was playing.
    pub fn stop_segment(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.active.remove(name).is_none() {
            return false;
        }
        self.send(engine::SegmentStop::new(name));
        true
    }

    /// Changes one parameter of a playing segment track. Not gated.
    pub fn set_segment_param(&self, name: &str, param: &str, value: f64) {
        let mut state = self.lock();
        if let Some(track) = state.active.get_mut(name) {
            track.params.insert(param.to_owned(), Value::from(value));
        }
        self.send(engine::SegmentParam::new(name, param, value as f32));
    }

    /// Stops every segment track.
    pub fn stop_all_segments(&self) {
        let mut state = self.lock();
        state.active.clear();
        self.send(engine::SegmentStopAll::new());
    }

    /// Tracks currently playing, ordered by name.
    pub fn active_tracks(&self) -> Vec<ActiveTrack> {
        let mut tracks: Vec<_> = self.lock().active.values().cloned().collect();
        tracks.sort_by(|a, b| a.name.cmp(&b.name));
        tracks
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // the maps stay consistent even if a holder panicked
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reduces an ID to `[A-Za-z0-9_]` and at most `max` characters.
fn sanitize(id: &str, max: usize) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::Recorder, library::SubType};
    use pretty_assertions::assert_eq;
    use rosc::OscType;
    use std::{collections::BTreeMap, sync::Arc};

    fn dispatcher() -> (Arc<Recorder>, Dispatcher) {
        let recorder = Arc::new(Recorder::new());
        let dispatcher = Dispatcher::new(recorder.clone(), Rules::default());
        (recorder, dispatcher)
    }

    fn resolved(toggles: &[(&str, bool)], params: &[(&str, f64)]) -> ResolvedSection {
        ResolvedSection {
            chord_index: 0,
            energy: 0.5,
            density: 0.5,
            parts: vec!["kick".into()],
            patterns: BTreeMap::new(),
            toggles: toggles.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            params: params.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn gated(recorder: &Recorder) -> Vec<String> {
        recorder
            .addrs()
            .into_iter()
            .filter(|addr| addr.starts_with("/engine/toggle/") || addr.starts_with("/engine/param/pad"))
            .collect()
    }

    #[test]
    fn test_change_gating_is_idempotent() {
        let (recorder, dispatcher) = dispatcher();
        let section = resolved(&[("drop_gap", true)], &[("pad_cutoff", 110.0)]);

        dispatcher.dispatch_section(&section);
        assert_eq!(
            gated(&recorder),
            vec![
                "/engine/toggle/drop_gap",
                "/engine/toggle/sub_fade",
                "/engine/toggle/texture_air",
                "/engine/toggle/texture_grain",
                "/engine/toggle/snare_roll",
                "/engine/toggle/snare_fill",
                "/engine/param/pad_cutoff",
            ]
        );

        recorder.clear();
        dispatcher.dispatch_section(&section);
        assert!(gated(&recorder).is_empty());
        // core values are always sent
        assert_eq!(recorder.messages().len(), 4);
    }

    #[test]
    fn test_unset_toggles_reset_to_off() {
        let (recorder, dispatcher) = dispatcher();
        dispatcher.dispatch_section(&resolved(&[("snare_roll", true)], &[]));
        recorder.clear();

        dispatcher.dispatch_section(&resolved(&[], &[]));
        let messages = recorder.messages();
        let toggles: Vec<_> = messages
            .iter()
            .filter(|m| m.addr.starts_with("/engine/toggle/"))
            .map(|m| (m.addr.as_str(), m.args.clone()))
            .collect();
        assert_eq!(toggles, vec![("/engine/toggle/snare_roll", vec![OscType::Int(0)])]);
    }

    #[test]
    fn test_numeric_params_persist() {
        let (recorder, dispatcher) = dispatcher();
        dispatcher.dispatch_section(&resolved(&[], &[("reverb_bus", 0.3)]));
        recorder.clear();
        dispatcher.dispatch_section(&resolved(&[], &[]));
        assert!(!recorder.addrs().iter().any(|a| a == "/engine/param/reverb_bus"));
    }

    #[test]
    fn test_dispatch_order() {
        let (recorder, dispatcher) = dispatcher();
        let mut section = resolved(&[("texture_air", true)], &[("hat_density", 0.6)]);
        section.patterns.insert("kick".into(), "broken".into());
        dispatcher.dispatch_section(&section);

        let addrs = recorder.addrs();
        let position = |addr: &str| addrs.iter().position(|a| a == addr).unwrap();
        assert_eq!(
            &addrs[..4],
            &["/engine/param/chord_index", "/engine/param/energy", "/engine/param/density", "/engine/parts"]
        );
        assert!(position("/engine/pattern/kick") < position("/engine/toggle/texture_air"));
        assert!(position("/engine/toggle/snare_fill") < position("/engine/param/hat_density"));
    }

    #[test]
    fn test_pad_cutoff_clamped_before_gating() {
        let (recorder, dispatcher) = dispatcher();
        assert!(dispatcher.send_param("pad_cutoff", 400.0));
        assert!(!dispatcher.send_param("pad_cutoff", 130.0));
        assert_eq!(recorder.messages()[0].args, vec![OscType::Float(130.0)]);
    }

    #[test]
    fn test_segment_tracks() {
        let (recorder, dispatcher) = dispatcher();
        let mut segment = Segment::new("riser-white/noise", SubType::Riser);
        segment.playback_params.synth = Some("noise".into());
        let context = SegmentContext {
            track_id: "dawn ignition",
            chapter: "chapter_01_intro",
            section: "a",
            bpm: 128.0,
        };
        let mut overrides = Map::new();
        overrides.insert("amp".into(), Value::from(0.5));

        let first = dispatcher.play_segment(&segment, context, &overrides).unwrap();
        let second = dispatcher.play_segment(&segment, context, &Map::new()).unwrap();
        assert_eq!(first, "tdawn_ign_cchapter__sa_riser_white__1");
        assert_eq!(second, "tdawn_ign_cchapter__sa_riser_white__2");
        assert_eq!(dispatcher.active_tracks().len(), 2);

        let play = &recorder.messages()[0];
        assert_eq!(play.addr, "/engine/segment/play");
        assert_eq!(play.args[1], OscType::String("riser".into()));
        let params: Value = match &play.args[2] {
            OscType::String(json) => serde_json::from_str(json).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(params["synth"], "noise");
        assert_eq!(params["bpm"], 128.0);
        assert_eq!(params["amp"], 0.5);

        dispatcher.set_segment_param(&first, "volume", 0.25);
        assert_eq!(dispatcher.active_tracks()[0].params["volume"], 0.25);

        assert!(dispatcher.stop_segment(&first));
        assert!(!dispatcher.stop_segment(&first));
        dispatcher.stop_all_segments();
        assert!(dispatcher.active_tracks().is_empty());
        assert_eq!(recorder.addrs().last().map(String::as_str), Some("/engine/segment/stop_all"));
    }

    #[test]
    fn test_counters_are_per_dispatcher() {
        let (_, a) = dispatcher();
        let (_, b) = dispatcher();
        let segment = Segment::new("pad", SubType::Pad);
        let context = SegmentContext {
            track_id: "t",
            chapter: "c",
            section: "s",
            bpm: 120.0,
        };
        assert_eq!(a.play_segment(&segment, context, &Map::new()).unwrap(), "tt_cc_ss_pad_1");
        assert_eq!(b.play_segment(&segment, context, &Map::new()).unwrap(), "tt_cc_ss_pad_1");
    }
}
