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

//! A wall-clock scheduler for document sections.
//!
//! A [`Scheduler`] turns the resolved sections of a [`Document`](crate::dna::Document) into a
//! [`Schedule`]: an iterator that blocks until each section is due and then yields it. Sections
//! come out in the order of their `start_time`.
//!
//! # Examples
//!
//! ```no_run
//! use numus::{dna::Document, scheduler::{Resume, Scheduler}};
//!
//! let doc = Document::load("dawn_ignition.json")?;
//! let schedule = Scheduler::new()
//!     .time_scale(2.0)
//!     .schedule(&doc.sections, &Resume::default())?;
//! for due in schedule {
//!     println!("{} late by {:?}", due.section.label(), due.lateness);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Timing
//!
//! The wait before each section is measured against the time the schedule was created, not
//! against the previous section: `start_time / time_scale - elapsed`. A section that is already
//! due is yielded immediately, late, and nothing is skipped. Because every wait is relative to
//! the same origin, lateness does not carry over into later sections: one slow dispatch delays
//! only the sections that were due while it ran.
//!
//! # Cancellation
//!
//! [`Scheduler::handle`] returns a [`Handle`] that can stop a schedule from another thread. A
//! cancelled schedule wakes up from its current wait and yields nothing more.

use crate::dna::Section;
use std::{
    sync::mpsc::{self, Receiver, Sender},
    time::Duration,
};
use thiserror::Error;

mod clock;

pub use clock::{Clock, ManualClock, WallClock};

/// A specialized [`Result`] type for scheduler errors.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// The error type returned by [`Scheduler::schedule`].
#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("no playable sections")]
    Empty,

    #[error("time scale must be a positive number, got {0}")]
    InvalidTimeScale(f64),

    #[error("{section} ends at {seconds}s, too far out to schedule")]
    OutOfRange { section: String, seconds: f64 },
}

/// Where to start playing a document.
///
/// With a chapter, playback begins at that chapter's first section, or at `section` within it
/// when one is given. Everything before that point is skipped, but the clock still starts at
/// document time zero: a resumed section is yielded at its own `start_time`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resume {
    pub chapter: Option<String>,
    pub section: Option<String>,
}

impl Resume {
    pub fn new(chapter: Option<String>, section: Option<String>) -> Resume {
        Resume { chapter, section }
    }

    /// Returns the sections at and after the resume point.
    ///
    /// A section without a chapter never matches anything.
    pub fn filter<'a>(&self, sections: &'a [Section]) -> Vec<&'a Section> {
        let mut started = self.chapter.is_none() && self.section.is_none();
        sections
            .iter()
            .filter(|s| {
                if !started {
                    started = self.chapter.as_deref() == Some(s.chapter.as_str())
                        && self.section.as_deref().map_or(true, |id| id == s.id);
                }
                started
            })
            .collect()
    }
}

/// A handle to a schedule.
///
/// Returned by [`Scheduler::handle`].
#[derive(Debug, Clone)]
pub struct Handle {
    sender: Sender<()>,
}

impl Handle {
    /// Cancel the schedule that was created by the same scheduler as this handle.
    pub fn cancel(self) {
        let _ = self.sender.send(());
    }
}

/// Creates [`Schedule`]s.
#[derive(Debug)]
pub struct Scheduler<C = WallClock> {
    clock: C,
    time_scale: f64,
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl Scheduler<WallClock> {
    /// Create a new scheduler running on the system clock.
    pub fn new() -> Scheduler<WallClock> {
        Scheduler::with_clock(WallClock::default())
    }
}

impl Default for Scheduler<WallClock> {
    fn default() -> Scheduler<WallClock> {
        Scheduler::new()
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(clock: C) -> Scheduler<C> {
        let (sender, receiver) = mpsc::channel();
        Scheduler {
            clock,
            time_scale: 1.0,
            sender,
            receiver,
        }
    }

    /// Play the document faster (greater than one) or slower (less than one).
    ///
    /// Defaults to 1.
    pub fn time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    /// Returns a [`Handle`] which can be used to cancel the schedule from another thread.
    pub fn handle(&self) -> Handle {
        Handle {
            sender: self.sender.clone(),
        }
    }

    /// Starts the clock and returns the sections at and after `resume`, in start time order.
    ///
    /// `sections` must already be sorted, as [`Document::sections`](crate::dna::Document) are.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Empty`] when nothing is left to play after filtering,
    /// [`ScheduleError::InvalidTimeScale`] when the time scale is not a positive number, and
    /// [`ScheduleError::OutOfRange`] when a section ends later than a [`Duration`] can hold once
    /// scaled.
    pub fn schedule<'a>(self, sections: &'a [Section], resume: &Resume) -> Result<Schedule<'a, C>> {
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(ScheduleError::InvalidTimeScale(self.time_scale));
        }
        let sections = resume.filter(sections);
        if sections.is_empty() {
            return Err(ScheduleError::Empty);
        }
        for section in &sections {
            let end = section.start_time + section.duration.max(0.0);
            if Duration::try_from_secs_f64(end.max(0.0) / self.time_scale).is_err() {
                return Err(ScheduleError::OutOfRange {
                    section: section.label(),
                    seconds: end,
                });
            }
        }

        let origin = self.clock.now();
        Ok(Schedule {
            clock: self.clock,
            time_scale: self.time_scale,
            origin,
            sections,
            position: 0,
            cancelled: false,
            _sender: self.sender,
            receiver: self.receiver,
        })
    }
}

/// A section that has come due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Due<'a> {
    /// Position in the filtered schedule, starting at zero.
    pub index: usize,
    pub section: &'a Section,
    /// How long after its scaled start time the section was yielded.
    pub lateness: Duration,
}

/// A running schedule.
///
/// Iterating blocks until the next section is due.
#[derive(Debug)]
pub struct Schedule<'a, C = WallClock> {
    clock: C,
    time_scale: f64,
    origin: Duration,
    sections: Vec<&'a Section>,
    position: usize,
    cancelled: bool,
    // Keeps the channel connected while no handle exists.
    _sender: Sender<()>,
    receiver: Receiver<()>,
}

impl<'a, C: Clock> Schedule<'a, C> {
    /// The sections this schedule will yield, including those already yielded.
    pub fn sections(&self) -> &[&'a Section] {
        &self.sections
    }

    /// The next section, without waiting for it.
    pub fn peek(&self) -> Option<&'a Section> {
        self.sections.get(self.position).copied()
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Wall-clock time since the schedule started.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.origin)
    }

    /// Converts a span of document seconds into wall-clock time.
    ///
    /// Negative spans are zero. Spans too long for a [`Duration`] saturate.
    pub fn scaled(&self, seconds: f64) -> Duration {
        saturating_secs(seconds / self.time_scale)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Blocks until the document time `seconds` is reached.
    ///
    /// Returns immediately if that time has already passed. Returns `false` if the schedule was
    /// cancelled instead.
    pub fn wait_until(&mut self, seconds: f64) -> bool {
        if self.cancelled {
            return false;
        }
        let wait = seconds / self.time_scale - self.elapsed().as_secs_f64();
        if wait > 0.0 && self.clock.wait(saturating_secs(wait), &self.receiver) {
            log::debug!("schedule cancelled");
            self.cancelled = true;
        }
        !self.cancelled
    }

    fn lateness(&self, seconds: f64) -> Duration {
        saturating_secs(self.elapsed().as_secs_f64() - seconds / self.time_scale)
    }
}

fn saturating_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

impl<'a, C: Clock> Iterator for Schedule<'a, C> {
    type Item = Due<'a>;

    fn next(&mut self) -> Option<Due<'a>> {
        let section = self.peek()?;
        if !self.wait_until(section.start_time) {
            return None;
        }
        let due = Due {
            index: self.position,
            section,
            lateness: self.lateness(section.start_time),
        };
        self.position += 1;
        Some(due)
    }
}
