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

//! Timeline orchestration for a live music synthesis engine.
//!
//! # Introduction
//!
//! Numus plays music described as data. A track is a JSON "DNA" document: a set of chapters,
//! each made of sections, each section saying how energetic and dense the music should be, which
//! parts play, which chord the harmony sits on and any number of extra engine parameters. Numus
//! walks the document in time and tells an external synthesis engine, listening for
//! [Open Sound Control](http://opensoundcontrol.org/) messages over UDP, what to do. The engine
//! makes all the sound.
//!
//! The crate contains:
//!
//!  * [`dna`](crate::dna) - The document model. Loads tracks and albums and resolves every section
//!    onto an absolute timeline.
//!
//!  * [`scheduler`](crate::scheduler) - A [`Scheduler`](scheduler::Scheduler) that yields sections
//!    as they come due in wall-clock time, with a time scale, a resume point and cancellation.
//!
//!  * [`params`](crate::params) - Derives the parameters a section sends: sweeps, micro-energy,
//!    callback and anti-drop moods, and the pad cutoff clamp.
//!
//!  * [`engine`](crate::engine) - The OSC commands understood by the engine and the transports
//!    that carry them.
//!
//!  * [`dispatcher`](crate::dispatcher) - Sends only what changed, resets toggles a section does
//!    not set, and keeps track of playing segments.
//!
//!  * [`library`](crate::library) - A searchable catalog of reusable segments.
//!
//!  * [`transition`](crate::transition) - DJ-style ramps between chapters.
//!
//!  * [`player`](crate::player) - Plays a document from start to finish.
//!
//!  * [`render`](crate::render) - Renders short ornaments to audio files offline.
//!
//!  * [`config`](crate::config) - The `numus.toml` configuration file.
//!
//! # Examples
//!
//! This example plays a two-section track through an engine listening on the default port.
//!
//! ```no_run
//! # use anyhow::Result;
//! use numus::{
//!     dispatcher::Dispatcher,
//!     dna::Document,
//!     engine::{Engine, DEFAULT_ADDRESS},
//!     params::Rules,
//!     player::Player,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let doc = Document::from_json(
//!         r#"{
//!             "bpm": 128,
//!             "chord_progression": ["Am", "F", "C", "G"],
//!             "chapters": {
//!                 "ch1": {
//!                     "sections": {
//!                         "intro": {"start_time": 0, "duration": 16, "energy": 0.2},
//!                         "drop": {"start_time": 16, "duration": 16, "energy": 0.9, "anti_drop": true}
//!                     }
//!                 }
//!             }
//!         }"#,
//!     )?;
//!
//!     let engine = Engine::connect(DEFAULT_ADDRESS)?;
//!     let dispatcher = Arc::new(Dispatcher::new(engine, Rules::default()));
//!     Player::new(dispatcher).play(&doc)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod dna;
pub mod engine;
pub mod library;
pub mod params;
pub mod player;
pub mod render;
pub mod scheduler;
pub mod transition;
