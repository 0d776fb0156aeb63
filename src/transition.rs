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

//! DJ-style transitions between chapters.
//!
//! A transition ramps the segment tracks of the outgoing chapter down and those of the incoming
//! chapter up. [`plan`] computes the ramp as a list of timed [`Step`]s and [`start`] plays it on a
//! worker thread, so the schedule can carry on while the ramp runs. The worker is owned by a
//! [`TransitionHandle`]: it is cancelled and joined when the handle is dropped, so a transition
//! never outlives the playback that started it.

use crate::dispatcher::Dispatcher;
use std::{
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Ramp resolution, in steps per bar.
pub const STEPS_PER_BAR: f64 = 16.0;

/// Most steps one ramp is split into. Longer transitions get coarser ramps.
pub const MAX_RAMP_STEPS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Fade the outgoing tracks out while fading the incoming tracks in.
    EnergyCrossfade,
    /// Close the outgoing filters while opening the incoming ones.
    FilterSweep,
    /// Fade out over the first half, pause for half a bar, fade in over the second half.
    BreakdownBuild,
    /// Cut the outgoing tracks and bring the incoming ones in at full volume after a pause.
    ImpactDrop,
}

impl TransitionKind {
    /// Parses a transition type name. Unknown names fall back to a crossfade.
    pub fn parse(name: &str) -> TransitionKind {
        match name {
            "energy_crossfade" => TransitionKind::EnergyCrossfade,
            "filter_sweep" => TransitionKind::FilterSweep,
            "breakdown_build" => TransitionKind::BreakdownBuild,
            "impact_drop" => TransitionKind::ImpactDrop,
            other => {
                log::warn!("unknown transition type {:?}, using energy_crossfade", other);
                TransitionKind::EnergyCrossfade
            }
        }
    }
}

/// What to do at one point of a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Outgoing(&'static str, f64),
    Incoming(&'static str, f64),
    StopOutgoing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Seconds after the transition starts.
    pub at: f64,
    pub action: Action,
}

/// Lays out a transition of `duration_bars` bars, each lasting `bar_seconds`.
pub fn plan(kind: TransitionKind, duration_bars: f64, bar_seconds: f64) -> Vec<Step> {
    let total = duration_bars.max(0.0) * bar_seconds;
    let mut steps = Vec::new();
    let mut push = |at: f64, action: Action| steps.push(Step { at, action });

    match kind {
        TransitionKind::EnergyCrossfade | TransitionKind::FilterSweep => {
            let n = step_count(duration_bars, STEPS_PER_BAR);
            for i in 0..=n {
                let t = i as f64 / n as f64;
                let at = total * t;
                if kind == TransitionKind::EnergyCrossfade {
                    push(at, Action::Outgoing("volume", 1.0 - t));
                    push(at, Action::Incoming("volume", t));
                } else {
                    push(at, Action::Outgoing("cutoff", 130.0 - 90.0 * t));
                    push(at, Action::Incoming("cutoff", 40.0 + 90.0 * t));
                }
            }
            push(total, Action::StopOutgoing);
        }
        TransitionKind::BreakdownBuild => {
            let half = total / 2.0;
            let n = step_count(duration_bars, STEPS_PER_BAR / 2.0);
            for i in 0..n {
                let t = i as f64 / n as f64;
                push(half * t, Action::Outgoing("volume", 1.0 - t));
            }
            push(half, Action::StopOutgoing);
            let build = half + bar_seconds * 0.5;
            for i in 0..=n {
                let t = i as f64 / n as f64;
                push(build + half * t, Action::Incoming("volume", t));
            }
        }
        TransitionKind::ImpactDrop => {
            push(0.0, Action::StopOutgoing);
            push(total.min(bar_seconds), Action::Incoming("volume", 1.0));
        }
    }
    steps
}

fn step_count(duration_bars: f64, per_bar: f64) -> usize {
    // saturating cast, NaN becomes 0
    ((duration_bars * per_bar) as usize).clamp(1, MAX_RAMP_STEPS)
}

/// A transition running on a worker thread.
///
/// Dropping the handle cancels the transition and waits for the worker to exit.
#[derive(Debug)]
pub struct TransitionHandle {
    cancel: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl TransitionHandle {
    /// Asks the worker to stop at its next step.
    pub fn cancel(&self) {
        let _ = self.cancel.send(());
    }

    /// Waits for the transition to finish.
    pub fn join(mut self) {
        self.wait();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("transition worker panicked");
            }
        }
    }
}

impl Drop for TransitionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
            self.wait();
        }
    }
}

/// Plays a transition between the `outgoing` and `incoming` segment tracks.
///
/// `bar_seconds` is the wall-clock length of a bar, with any time scale already applied.
pub fn start(
    dispatcher: Arc<Dispatcher>,
    kind: TransitionKind,
    duration_bars: f64,
    bar_seconds: f64,
    outgoing: Vec<String>,
    incoming: Vec<String>,
) -> TransitionHandle {
    let (cancel, cancelled) = mpsc::channel();
    let steps = plan(kind, duration_bars, bar_seconds);
    log::info!(
        "transition {:?} over {} bars: {} outgoing, {} incoming",
        kind,
        duration_bars,
        outgoing.len(),
        incoming.len()
    );

    let worker = thread::spawn(move || {
        let origin = Instant::now();
        for step in steps {
            let wait = Duration::try_from_secs_f64(step.at.max(0.0))
                .ok()
                .and_then(|at| origin.checked_add(at))
                .map_or(Duration::MAX, |due| due.saturating_duration_since(Instant::now()));
            match cancelled.recv_timeout(wait) {
                Ok(()) => {
                    log::debug!("transition {:?} cancelled", kind);
                    return;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
            match step.action {
                Action::Outgoing(param, value) => {
                    for track in &outgoing {
                        dispatcher.set_segment_param(track, param, value);
                    }
                }
                Action::Incoming(param, value) => {
                    for track in &incoming {
                        dispatcher.set_segment_param(track, param, value);
                    }
                }
                Action::StopOutgoing => {
                    for track in &outgoing {
                        dispatcher.stop_segment(track);
                    }
                }
            }
        }
        log::debug!("transition {:?} complete", kind);
    });

    TransitionHandle {
        cancel,
        worker: Some(worker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::SegmentContext,
        engine::Recorder,
        library::{Segment, SubType},
        params::Rules,
    };
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    #[test]
    fn test_parse_falls_back_to_crossfade() {
        assert_eq!(TransitionKind::parse("impact_drop"), TransitionKind::ImpactDrop);
        assert_eq!(TransitionKind::parse("spinback"), TransitionKind::EnergyCrossfade);
    }

    #[test]
    fn test_crossfade_plan() {
        let steps = plan(TransitionKind::EnergyCrossfade, 1.0, 2.0);
        // 17 ramp points for each side, then the stop
        assert_eq!(steps.len(), 17 * 2 + 1);
        assert_eq!(steps[0], Step { at: 0.0, action: Action::Outgoing("volume", 1.0) });
        assert_eq!(steps[1], Step { at: 0.0, action: Action::Incoming("volume", 0.0) });
        assert_eq!(steps[33], Step { at: 2.0, action: Action::Incoming("volume", 1.0) });
        assert_eq!(steps[34], Step { at: 2.0, action: Action::StopOutgoing });
    }

    #[test]
    fn test_filter_sweep_plan() {
        let steps = plan(TransitionKind::FilterSweep, 2.0, 1.0);
        assert_eq!(steps[0].action, Action::Outgoing("cutoff", 130.0));
        assert_eq!(steps[1].action, Action::Incoming("cutoff", 40.0));
        let last_in = steps[steps.len() - 2];
        assert_eq!(last_in, Step { at: 2.0, action: Action::Incoming("cutoff", 130.0) });
    }

    #[test]
    fn test_breakdown_build_plan() {
        let steps = plan(TransitionKind::BreakdownBuild, 2.0, 1.0);
        let stop = steps.iter().position(|s| s.action == Action::StopOutgoing).unwrap();
        assert_eq!(stop, 16);
        assert_eq!(steps[stop].at, 1.0);
        assert_eq!(steps[stop + 1], Step { at: 1.5, action: Action::Incoming("volume", 0.0) });
        assert_eq!(
            steps.last(),
            Some(&Step { at: 2.5, action: Action::Incoming("volume", 1.0) })
        );
    }

    #[test]
    fn test_long_transitions_are_coarser() {
        let steps = plan(TransitionKind::EnergyCrossfade, 1e12, 2.0);
        assert_eq!(steps.len(), (MAX_RAMP_STEPS + 1) * 2 + 1);
        assert_eq!(steps.last().map(|s| s.at), Some(2e12));
        assert_eq!(plan(TransitionKind::BreakdownBuild, f64::NAN, 1.0).len(), 1 + 1 + 2);
    }

    #[test]
    fn test_impact_drop_plan() {
        assert_eq!(
            plan(TransitionKind::ImpactDrop, 4.0, 2.0),
            vec![
                Step { at: 0.0, action: Action::StopOutgoing },
                Step { at: 2.0, action: Action::Incoming("volume", 1.0) },
            ]
        );
        assert_eq!(plan(TransitionKind::ImpactDrop, 0.25, 2.0)[1].at, 0.5);
    }

    #[test]
    fn test_worker_stops_outgoing_tracks() {
        let recorder = Arc::new(Recorder::new());
        let dispatcher = Arc::new(Dispatcher::new(recorder.clone(), Rules::default()));
        let context = SegmentContext {
            track_id: "t",
            chapter: "c1",
            section: "s",
            bpm: 120.0,
        };
        let out = dispatcher
            .play_segment(&Segment::new("pad", SubType::Pad), context, &Map::new())
            .unwrap();
        let incoming = dispatcher
            .play_segment(&Segment::new("lead", SubType::LeadMelody), context, &Map::new())
            .unwrap();

        let handle = start(
            dispatcher.clone(),
            TransitionKind::EnergyCrossfade,
            1.0,
            0.016,
            vec![out],
            vec![incoming.clone()],
        );
        handle.join();

        let active: Vec<_> = dispatcher.active_tracks().into_iter().map(|t| t.name).collect();
        assert_eq!(active, vec![incoming]);
        assert_eq!(recorder.addrs().last().map(String::as_str), Some("/engine/segment/stop"));
    }

    #[test]
    fn test_drop_cancels_worker() {
        let recorder = Arc::new(Recorder::new());
        let dispatcher = Arc::new(Dispatcher::new(recorder.clone(), Rules::default()));
        let handle = start(
            dispatcher,
            TransitionKind::ImpactDrop,
            1.0,
            3600.0,
            vec!["a".into()],
            vec!["b".into()],
        );
        let started = Instant::now();
        drop(handle);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(!recorder.addrs().iter().any(|a| a == "/engine/segment/param"));
    }

    #[test]
    fn test_unreachable_steps_wait_until_cancelled() {
        let recorder = Arc::new(Recorder::new());
        let dispatcher = Arc::new(Dispatcher::new(recorder, Rules::default()));
        let handle = start(
            dispatcher,
            TransitionKind::EnergyCrossfade,
            1e300,
            1e10,
            vec!["a".into()],
            vec!["b".into()],
        );
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        handle.cancel();
        handle.join();
    }
}
