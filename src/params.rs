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

//! Derived section parameters.
//!
//! [`resolve`] turns a [`Section`] into the exact set of values the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) should send for it. Open fields are routed to
//! toggles or numeric parameters, then a fixed series of derivation steps fills in and adjusts
//! values the document does not set itself:
//!
//! 1. `pad_cutoff`, from the sweep start phase or from the section energy.
//! 2. `micro_energy`, nudging `sidechain_depth` and `pad_cutoff` upward.
//! 3. `callback_theme`, opening up the reverb and the pad and switching on `texture_air`.
//! 4. `anti_drop`, holding back the low end and forcing `drop_gap` and `sub_fade` on.
//! 5. A `sub_fade_level` of 0.5 when `sub_fade` is on and no level was resolved.
//! 6. The hard `pad_cutoff` clamp.
//!
//! Later steps overwrite earlier ones. The derivations are deterministic.

use crate::dna::{FieldValue, Section, Sweep};
use std::collections::{BTreeMap, BTreeSet};

/// The range swept by `sweep_phase_start`/`sweep_phase_end`.
pub const SWEEP_CUTOFF_MIN: f64 = 70.0;
pub const SWEEP_CUTOFF_MAX: f64 = 132.0;

/// No `pad_cutoff` leaves the dispatcher outside of this range.
pub const PAD_CUTOFF_MIN: f64 = 40.0;
pub const PAD_CUTOFF_MAX: f64 = 130.0;
pub const PAD_CUTOFF_DEFAULT: f64 = 100.0;

pub const PAD_CUTOFF: &str = "pad_cutoff";

/// Routing rules for open section fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    /// Toggles that are switched off in every section that does not set them, in send order.
    pub managed_toggles: Vec<String>,
    /// Names that are always numeric parameters, even when their value is 0 or 1.
    pub numeric_params: BTreeSet<String>,
}

impl Default for Rules {
    fn default() -> Rules {
        Rules {
            managed_toggles: [
                "sub_fade",
                "texture_air",
                "texture_grain",
                "drop_gap",
                "snare_roll",
                "snare_fill",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            numeric_params: [
                "pad_cutoff",
                "sub_fade_level",
                "hat_density",
                "sidechain_depth",
                "bass_drive",
                "lead_detune",
                "reverb_bus",
                "delay_mix",
                "chord_inversion",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Everything to send at the start of a section.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSection {
    pub chord_index: i32,
    pub energy: f64,
    pub density: f64,
    pub parts: Vec<String>,
    pub patterns: BTreeMap<String, String>,
    pub toggles: BTreeMap<String, bool>,
    pub params: BTreeMap<String, f64>,
}

/// Resolves the values to send for `section`.
pub fn resolve(section: &Section, rules: &Rules) -> ResolvedSection {
    let mut toggles = BTreeMap::new();
    let mut params = BTreeMap::new();

    for (name, value) in &section.fields {
        match *value {
            FieldValue::Bool(on) => {
                toggles.insert(name.clone(), on);
            }
            FieldValue::Number(x) if rules.numeric_params.contains(name) => {
                params.insert(name.clone(), x);
            }
            FieldValue::Number(x) if x == 0.0 || x == 1.0 => {
                toggles.insert(name.clone(), x == 1.0);
            }
            FieldValue::Number(x) => {
                params.insert(name.clone(), x);
            }
            FieldValue::Text(_) => log::trace!("{}: ignoring text field {}", section.label(), name),
        }
    }

    if !params.contains_key(PAD_CUTOFF) {
        params.insert(PAD_CUTOFF.to_owned(), baseline_pad_cutoff(section));
    }
    if let Some(micro_energy) = section.micro_energy {
        apply_micro_energy(micro_energy, &mut params);
    }
    if section.callback_theme {
        apply_callback_theme(&mut params, &mut toggles);
    }
    if section.anti_drop {
        apply_anti_drop(&mut params, &mut toggles);
    }
    let sub_fade = section.field("sub_fade").map_or(false, FieldValue::is_truthy);
    if sub_fade && !params.contains_key("sub_fade_level") {
        params.insert("sub_fade_level".to_owned(), 0.5);
    }
    let pad_cutoff = clamp_pad_cutoff(params.get(PAD_CUTOFF).copied());
    params.insert(PAD_CUTOFF.to_owned(), pad_cutoff);

    ResolvedSection {
        chord_index: section.chord_index,
        energy: section.energy,
        density: section.density,
        parts: section.active_parts.clone(),
        patterns: section.pattern_overrides.clone(),
        toggles,
        params,
    }
}

/// The pad cutoff a section starts with when it does not set one.
pub fn baseline_pad_cutoff(section: &Section) -> f64 {
    match section.sweep {
        Some(sweep) => sweep_cutoff(sweep.start),
        None => (90.0 + section.energy * 40.0).trunc(),
    }
}

/// The pad cutoff `elapsed` seconds into a sweep that lasts `total` seconds.
pub fn interpolate_sweep(sweep: Sweep, elapsed: f64, total: f64) -> f64 {
    let start = sweep.start.clamp(0.0, 1.0);
    let end = sweep.end.clamp(0.0, 1.0);
    if total <= 0.0 {
        return sweep_cutoff(end);
    }
    let t = (elapsed / total).clamp(0.0, 1.0);
    sweep_cutoff(start + (end - start) * t)
}

/// Clamps a cutoff into the range the engine accepts, defaulting when there is none.
pub fn clamp_pad_cutoff(value: Option<f64>) -> f64 {
    value.map_or(PAD_CUTOFF_DEFAULT, |v| v.clamp(PAD_CUTOFF_MIN, PAD_CUTOFF_MAX))
}

fn sweep_cutoff(phase: f64) -> f64 {
    (SWEEP_CUTOFF_MIN + (SWEEP_CUTOFF_MAX - SWEEP_CUTOFF_MIN) * phase.clamp(0.0, 1.0)).trunc()
}

fn apply_micro_energy(micro_energy: f64, params: &mut BTreeMap<String, f64>) {
    let sidechain = params.get("sidechain_depth").copied().unwrap_or(0.2);
    params.insert(
        "sidechain_depth".to_owned(),
        round4((sidechain + micro_energy * 0.04).min(0.65)),
    );
    let pad = params.get(PAD_CUTOFF).copied().unwrap_or(110.0);
    params.insert(PAD_CUTOFF.to_owned(), (pad + micro_energy * 2.0).min(132.0));
}

fn apply_callback_theme(params: &mut BTreeMap<String, f64>, toggles: &mut BTreeMap<String, bool>) {
    let reverb = params.get("reverb_bus").copied().unwrap_or(0.30);
    params.insert("reverb_bus".to_owned(), (reverb + 0.08).min(0.45));
    let pad = params.get(PAD_CUTOFF).copied().unwrap_or(100.0);
    params.insert(PAD_CUTOFF.to_owned(), pad.max(105.0));
    toggles.insert("texture_air".to_owned(), true);
}

fn apply_anti_drop(params: &mut BTreeMap<String, f64>, toggles: &mut BTreeMap<String, bool>) {
    for (name, default, cap) in [
        ("sidechain_depth", 0.2, 0.25),
        ("bass_drive", 0.2, 0.25),
        ("sub_fade_level", 0.4, 0.4),
    ] {
        let value = params.get(name).copied().unwrap_or(default);
        params.insert(name.to_owned(), value.min(cap));
    }
    toggles.insert("drop_gap".to_owned(), true);
    toggles.insert("sub_fade".to_owned(), true);
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
