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

use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError},
        Mutex, MutexGuard,
    },
    thread,
    time::{Duration, Instant},
};

/// A source of time that can block until a deadline.
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    /// Blocks for `duration` or until a message arrives on `cancel`.
    ///
    /// Returns `true` if the wait was cancelled.
    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> bool;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> bool {
        (**self).wait(duration, cancel)
    }
}

/// The system's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl Default for WallClock {
    fn default() -> WallClock {
        WallClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> bool {
        match cancel.recv_timeout(duration) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(duration);
                false
            }
        }
    }
}

/// A clock that only moves when told to.
///
/// Every wait advances the clock by exactly the requested duration and is recorded, so tests can
/// check the waits a schedule asked for without sleeping. [`ManualClock::advance`] simulates time
/// spent doing work between waits.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    waits: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    /// Moves the clock forward without recording a wait.
    pub fn advance(&self, duration: Duration) {
        self.lock().now += duration;
    }

    /// Every wait requested so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.lock().waits.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.lock().now
    }

    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> bool {
        if cancel.try_recv().is_ok() {
            return true;
        }
        let mut state = self.lock();
        state.now += duration;
        state.waits.push(duration);
        false
    }
}
