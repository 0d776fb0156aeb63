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

//! Play documents on the engine.
//!
//! The [`Player`] ties the other modules together. For each section yielded by a
//! [`Schedule`](crate::scheduler::Schedule), it resolves the section's parameters with
//! [`params::resolve`] and hands them to the [`Dispatcher`]. Between sections it runs the
//! section's cues:
//!
//! * Pad sweeps. A section with a sweep range sends an updated `pad_cutoff` every
//!   [`PlayOptions::pad_sweep_interval`] seconds of wall-clock time.
//! * Segment cues. With a [`Library`] attached, segments listed in a section are started at their
//!   bar offset and stopped after their length in bars.
//!
//! When the chapter changes, segment tracks left over from the previous chapter are handed to a
//! [transition](crate::transition) if the document lists one for the pair of chapters, and are
//! stopped otherwise.
//!
//! A run starts by sending the tempo and chord progression and ends by stopping any tracks that
//! are still playing and sending [`Stop`](crate::engine::Stop).
//!
//! # Examples
//!
//! ```no_run
//! use numus::{
//!     dispatcher::Dispatcher,
//!     dna::Document,
//!     engine::{Engine, DEFAULT_ADDRESS},
//!     params::Rules,
//!     player::Player,
//! };
//! use std::sync::Arc;
//!
//! let doc = Document::load("dawn_ignition.json")?;
//! let engine = Engine::connect(DEFAULT_ADDRESS)?;
//! let dispatcher = Arc::new(Dispatcher::new(engine, Rules::default()));
//! let summary = Player::new(dispatcher).play(&doc)?;
//! println!("played {} sections", summary.sections);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::{
    dispatcher::{Dispatcher, SegmentContext},
    dna::{Document, SegmentCue, Section},
    engine::{Bpm, ChordProgression, DebugText, Stop},
    library::Library,
    params,
    scheduler::{Clock, Handle, Resume, Schedule, ScheduleError, Scheduler, WallClock},
    transition::{self, TransitionHandle, TransitionKind},
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

/// The error type returned by [`Player::play`].
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("scheduling document")]
    Schedule(#[from] ScheduleError),

    #[error("bpm {0} gives no usable bar length")]
    InvalidTempo(f64),
}

/// A document's tempo, counted in 4/4 bars.
///
/// Segment cues and transitions are measured in bars, so this is what turns them into document
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
    bar: Duration,
}

impl Tempo {
    /// # Errors
    ///
    /// Returns [`PlayError::InvalidTempo`] unless `bpm` is positive and a bar at that tempo fits
    /// in a [`Duration`].
    ///
    /// # Examples
    ///
    /// ```
    /// use numus::player::Tempo;
    ///
    /// let tempo = Tempo::new(120.0)?;
    /// assert_eq!(tempo.bars(8.0), 16.0);
    /// assert!(Tempo::new(1e-300).is_err());
    /// # Ok::<(), numus::player::PlayError>(())
    /// ```
    pub fn new(bpm: f64) -> Result<Tempo, PlayError> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(PlayError::InvalidTempo(bpm));
        }
        let bar = Duration::try_from_secs_f64(240.0 / bpm).map_err(|_| PlayError::InvalidTempo(bpm))?;
        Ok(Tempo { bpm, bar })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn bar(&self) -> Duration {
        self.bar
    }

    /// Document seconds spanned by `bars` bars.
    pub fn bars(&self, bars: f64) -> f64 {
        bars * self.bar.as_secs_f64()
    }
}

/// How to play a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOptions {
    pub resume: Resume,
    pub time_scale: f64,
    /// Send `/engine/debug` lines.
    pub debug: bool,
    /// Wall-clock seconds between pad sweep updates.
    pub pad_sweep_interval: f64,
}

impl Default for PlayOptions {
    fn default() -> PlayOptions {
        PlayOptions {
            resume: Resume::default(),
            time_scale: 1.0,
            debug: true,
            pad_sweep_interval: 1.0,
        }
    }
}

/// What happened during [`Player::play`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub sections: usize,
    pub segments_started: usize,
    pub transitions: usize,
    /// The latest any section was dispatched.
    pub max_lateness: Duration,
    pub cancelled: bool,
}

/// Plays documents through a dispatcher.
pub struct Player<C = WallClock> {
    dispatcher: Arc<Dispatcher>,
    library: Option<Arc<Library>>,
    options: PlayOptions,
    scheduler: Scheduler<C>,
}

impl Player<WallClock> {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Player<WallClock> {
        Player::with_clock(dispatcher, WallClock::default())
    }
}

impl<C: Clock> Player<C> {
    pub fn with_clock(dispatcher: Arc<Dispatcher>, clock: C) -> Player<C> {
        Player {
            dispatcher,
            library: None,
            options: PlayOptions::default(),
            scheduler: Scheduler::with_clock(clock),
        }
    }

    /// Attach a segment library so section segment cues can be played.
    pub fn library(mut self, library: Arc<Library>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn options(mut self, options: PlayOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns a [`Handle`] which can stop playback from another thread.
    pub fn handle(&self) -> Handle {
        self.scheduler.handle()
    }

    /// Plays `doc` and blocks until it has finished or been cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the document's bpm is unusable, if nothing is left to play after
    /// applying the resume point, or if the schedule cannot be timed. Nothing is sent in that case.
    pub fn play(self, doc: &Document) -> Result<Summary, PlayError> {
        let tempo = Tempo::new(doc.bpm)?;
        let schedule = self
            .scheduler
            .time_scale(self.options.time_scale)
            .schedule(&doc.sections, &self.options.resume)?;

        let mut playback = Playback {
            dispatcher: &self.dispatcher,
            library: self.library.as_deref(),
            options: &self.options,
            doc,
            tempo,
            schedule,
            pending: Vec::new(),
            transition: None,
            summary: Summary::default(),
        };
        playback.run();
        Ok(playback.summary)
    }
}

#[derive(Debug)]
struct Cue<'a> {
    /// Document seconds.
    at: f64,
    action: CueAction<'a>,
}

#[derive(Debug)]
enum CueAction<'a> {
    Sweep(f64),
    Start(&'a Section, &'a SegmentCue),
    Stop(String),
}

struct Playback<'a, C> {
    dispatcher: &'a Arc<Dispatcher>,
    library: Option<&'a Library>,
    options: &'a PlayOptions,
    doc: &'a Document,
    tempo: Tempo,
    schedule: Schedule<'a, C>,
    /// Sorted by time.
    pending: Vec<Cue<'a>>,
    transition: Option<TransitionHandle>,
    summary: Summary,
}

impl<'a, C: Clock> Playback<'a, C> {
    fn run(&mut self) {
        let doc = self.doc;
        self.dispatcher.send(Bpm::new(doc.bpm));
        if !doc.chord_progression.is_empty() {
            self.dispatcher.send(ChordProgression::new(&doc.chord_progression));
        }
        self.debug(format!(
            "INIT track={} bpm={} sections={} total_time={}s",
            doc.track_id,
            doc.bpm,
            self.schedule.sections().len(),
            doc.total_time()
        ));

        let mut previous: Option<&'a Section> = None;
        loop {
            let next_start = self.schedule.peek().map(|s| s.start_time);
            self.run_cues(next_start);
            let due = match self.schedule.next() {
                Some(due) => due,
                None => break,
            };
            if due.lateness > Duration::from_millis(50) {
                log::debug!("{} dispatched {:?} late", due.section.label(), due.lateness);
            }
            self.summary.max_lateness = self.summary.max_lateness.max(due.lateness);
            self.enter_section(due.index, due.section, previous);
            previous = Some(due.section);
        }

        self.run_cues(None);
        self.summary.cancelled = self.schedule.is_cancelled();
        if let Some(transition) = self.transition.take() {
            if self.summary.cancelled {
                transition.cancel();
            }
            transition.join();
        }
        if !self.dispatcher.active_tracks().is_empty() {
            self.dispatcher.stop_all_segments();
        }
        self.debug("DONE timeline".to_owned());
        self.dispatcher.send(Stop::new());
        log::info!(
            "{} sections played{}",
            self.summary.sections,
            if self.summary.cancelled { ", cancelled" } else { "" }
        );
    }

    fn enter_section(&mut self, index: usize, section: &'a Section, previous: Option<&'a Section>) {
        log::info!("section {} {} at {}s", index, section.label(), section.start_time);
        self.summary.sections += 1;
        self.pending.retain(|cue| !matches!(cue.action, CueAction::Sweep(_)));

        let resolved = params::resolve(section, self.dispatcher.rules());
        self.dispatcher.dispatch_section(&resolved);
        self.debug(format!(
            "SEC {} {} E={} D={} parts={}",
            index,
            section.label(),
            section.energy,
            section.density,
            section.active_parts.len()
        ));

        let mut started = Vec::new();
        for cue in &section.segments {
            if cue.start_bar <= 0.0 {
                started.extend(self.start_segment(section, cue, section.start_time));
            } else {
                let at = section.start_time + self.tempo.bars(cue.start_bar);
                self.push(at, CueAction::Start(section, cue));
            }
        }

        if let Some(previous) = previous.filter(|p| p.chapter != section.chapter) {
            self.change_chapter(previous, section, started);
        }

        if let Some(sweep) = section.sweep {
            if section.duration > 0.0 {
                let scaled = section.duration / self.schedule.time_scale();
                let steps = if self.options.pad_sweep_interval > 0.0 {
                    (scaled / self.options.pad_sweep_interval).floor() as usize
                } else {
                    1
                }
                .max(1);
                for step in 1..=steps {
                    let fraction = step as f64 / steps as f64;
                    let value = params::interpolate_sweep(sweep, fraction * section.duration, section.duration);
                    let at = section.start_time + section.duration * (step - 1) as f64 / steps as f64;
                    self.push(at, CueAction::Sweep(value));
                }
            }
        }
    }

    fn change_chapter(&mut self, previous: &Section, section: &Section, incoming: Vec<String>) {
        if let Some(transition) = self.transition.take() {
            transition.join();
        }
        let outgoing: Vec<String> = self
            .dispatcher
            .active_tracks()
            .into_iter()
            .filter(|track| track.chapter == previous.chapter)
            .map(|track| track.name)
            .collect();
        // pending stops for outgoing tracks are now the transition's job
        self.pending.retain(|cue| match &cue.action {
            CueAction::Stop(name) => !outgoing.contains(name),
            _ => true,
        });

        let doc = self.doc;
        match doc.transition_between(&previous.chapter, &section.chapter) {
            Some(listed) => {
                self.summary.transitions += 1;
                self.transition = Some(transition::start(
                    Arc::clone(self.dispatcher),
                    TransitionKind::parse(&listed.kind),
                    listed.duration_bars,
                    self.schedule.scaled(self.tempo.bars(1.0)).as_secs_f64(),
                    outgoing,
                    incoming,
                ));
            }
            None => {
                for name in outgoing {
                    self.dispatcher.stop_segment(&name);
                }
            }
        }
    }

    /// Runs pending cues that fall before `until`, or all of them.
    fn run_cues(&mut self, until: Option<f64>) {
        while let Some(cue) = self.pending.first() {
            if until.map_or(false, |until| cue.at >= until) {
                break;
            }
            let cue = self.pending.remove(0);
            if !self.schedule.wait_until(cue.at) {
                return;
            }
            match cue.action {
                CueAction::Sweep(value) => {
                    self.dispatcher.send_param(params::PAD_CUTOFF, value);
                }
                CueAction::Start(section, segment_cue) => {
                    self.start_segment(section, segment_cue, cue.at);
                }
                CueAction::Stop(name) => {
                    self.dispatcher.stop_segment(&name);
                }
            }
        }
    }

    fn start_segment(&mut self, section: &'a Section, cue: &'a SegmentCue, at: f64) -> Option<String> {
        let library = match self.library {
            Some(library) => library,
            None => {
                log::warn!("{}: no segment library loaded, skipping {}", section.label(), cue.segment_id);
                return None;
            }
        };
        let segment = match library.get(&cue.segment_id) {
            Some(segment) => segment,
            None => {
                log::warn!("{}: segment {} not found, skipping", section.label(), cue.segment_id);
                return None;
            }
        };

        let context = SegmentContext {
            track_id: &self.doc.track_id,
            chapter: &section.chapter,
            section: &section.id,
            bpm: self.doc.bpm,
        };
        let name = self.dispatcher.play_segment(segment, context, &cue.params)?;
        self.summary.segments_started += 1;
        if let Some(bars) = cue.duration_bars.or_else(|| segment.duration_bars()) {
            self.push(at + self.tempo.bars(bars), CueAction::Stop(name.clone()));
        }
        Some(name)
    }

    fn push(&mut self, at: f64, action: CueAction<'a>) {
        let index = self.pending.partition_point(|cue| cue.at <= at);
        self.pending.insert(index, Cue { at, action });
    }

    fn debug(&self, text: String) {
        if self.options.debug {
            self.dispatcher.send(DebugText::new(text));
        }
    }
}

/// Formats sections as a table of timing, energy and flags.
pub fn section_table(sections: &[&Section]) -> String {
    let mut rows = vec![[
        "Idx".to_owned(),
        "Chapter.Section".to_owned(),
        "Start".to_owned(),
        "Dur".to_owned(),
        "E".to_owned(),
        "D".to_owned(),
        "µE".to_owned(),
        "Flags".to_owned(),
    ]];
    for (index, section) in sections.iter().enumerate() {
        let mut flags = Vec::new();
        if section.callback_theme {
            flags.push("callbacktheme");
        }
        if section.anti_drop {
            flags.push("antidrop");
        }
        for name in ["sub_fade", "drop_gap"] {
            if section.field(name).map_or(false, |f| f.is_truthy()) {
                flags.push(if name == "sub_fade" { "subfade" } else { "dropgap" });
            }
        }
        rows.push([
            index.to_string(),
            section.label(),
            format!("{:.1}", section.start_time),
            format!("{:.1}", section.duration),
            section.energy.to_string(),
            section.density.to_string(),
            section.micro_energy.map_or("-".to_owned(), |x| x.to_string()),
            flags.join(","),
        ]);
    }

    let mut widths = [0; 8];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    rows.iter()
        .map(|row| {
            row.iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<w$}", cell, w = width))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
