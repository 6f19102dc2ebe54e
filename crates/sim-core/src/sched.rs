//! Simulated time and the cooperative-suspension contract.
//!
//! The event-driven scheduler itself is an external collaborator; peripherals
//! only depend on two primitives it provides: "resume me after a delay" and
//! "resume me when my mode register changes". Device measurement processes
//! are written as explicit state machines that return a [`Suspend`] directive
//! from every resumption, and a [`Task`] tracks the pending suspension in
//! absolute time so the owner can poll it forward with wall-clock-free
//! `advance(now)` calls.

use std::ops::{Add, AddAssign, Mul, Sub};

/// A point in (or span of) simulated time, counted in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimTime(u64);

impl SimTime {
    /// Zero duration / start of simulation.
    pub const ZERO: Self = Self(0);

    /// Builds a time from raw nanoseconds.
    #[must_use]
    pub const fn from_ns(ns: u64) -> Self {
        Self(ns)
    }

    /// Builds a time from microseconds.
    #[must_use]
    pub const fn from_us(us: u64) -> Self {
        Self(us * 1_000)
    }

    /// Builds a time from milliseconds.
    #[must_use]
    pub const fn from_ms(ms: u64) -> Self {
        Self(ms * 1_000_000)
    }

    /// Builds a time from a second count expressed as a float.
    ///
    /// Sub-nanosecond remainders are truncated. Negative and non-finite
    /// inputs collapse to zero.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_finite() && secs > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Self((secs * 1e9) as u64)
        } else {
            Self::ZERO
        }
    }

    /// Raw nanosecond count.
    #[must_use]
    pub const fn as_ns(self) -> u64 {
        self.0
    }

    /// Whole microseconds (activity-log resolution).
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Seconds as a float, for power arithmetic.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// `true` for the zero instant/duration.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for SimTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u32> for SimTime {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        Self(self.0.saturating_mul(u64::from(rhs)))
    }
}

/// Why a suspended process was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wakeup {
    /// A timed delay elapsed.
    Timer,
    /// A mode-change notification fired.
    ModeChange,
}

/// What a process waits on after a resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suspend {
    /// Suspend for a relative delay.
    Timer(SimTime),
    /// Suspend until the next mode-change notification.
    OnModeChange,
}

/// Pending suspension of one cooperative process, tracked in absolute time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Pending {
    Until(SimTime),
    OnModeChange,
}

/// Bookkeeping for one device measurement process between resumptions.
///
/// Mirrors the cooperative model: a notification is only latched while the
/// process is actually waiting for it; notifications raised while the
/// process sleeps on a timer are dropped, exactly as a signal with no waiter
/// is lost in the event-driven kernel this plugs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pending: Pending,
    notified: bool,
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Task {
    /// A fresh task, parked waiting for its first mode-change notification.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Pending::OnModeChange,
            notified: false,
        }
    }

    /// Returns the task to its initial parked state, discarding any pending
    /// notification or deadline. Used by full peripheral resets.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Raises the zero-delay mode-change notification.
    pub fn notify_mode_change(&mut self) {
        if self.pending == Pending::OnModeChange {
            self.notified = true;
        }
    }

    /// Absolute resume time, when the task is suspended on a timer.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<SimTime> {
        match self.pending {
            Pending::Until(deadline) => Some(deadline),
            Pending::OnModeChange => None,
        }
    }

    /// Returns the wakeup to deliver at or before `now`, if any, together
    /// with the timestamp the process should observe when it resumes.
    ///
    /// Timer wakeups resume at their own deadline, not at `now`, so that a
    /// caller advancing time in large steps still produces correctly-stamped
    /// samples.
    #[must_use]
    pub fn due(&self, now: SimTime) -> Option<(SimTime, Wakeup)> {
        match self.pending {
            Pending::Until(deadline) if deadline <= now => Some((deadline, Wakeup::Timer)),
            Pending::OnModeChange if self.notified => Some((now, Wakeup::ModeChange)),
            Pending::Until(_) | Pending::OnModeChange => None,
        }
    }

    /// Records the suspension a process returned from a resumption at `at`.
    pub fn park(&mut self, at: SimTime, suspend: Suspend) {
        self.notified = false;
        self.pending = match suspend {
            Suspend::Timer(delay) => Pending::Until(at + delay),
            Suspend::OnModeChange => Pending::OnModeChange,
        };
    }
}
