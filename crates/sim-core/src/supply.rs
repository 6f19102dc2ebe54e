//! Per-timestep power aggregation against an external supply net.
//!
//! The analog supply circuit itself lives outside this crate; the
//! [`SupplyNet`] trait is the seam it plugs into. Each simulation timestep
//! the [`PowerAggregator`] drains the event channel, folds in continuous
//! state draw, presents the resulting average load to the net and reports
//! back the rail state boards use to hold peripherals in reset.

use log::debug;

use crate::fault::Fault;
use crate::power::SharedPowerChannel;
use crate::sched::SimTime;

/// Supply rail state after one update.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SupplyState {
    /// Rail voltage in volts.
    pub vcc: f64,
    /// `true` while the rail is above the board's operating threshold.
    /// Boards propagate `false` to peripherals as a reset condition.
    pub power_good: bool,
}

/// External supply-net collaborator.
///
/// Implementations model the analog side (storage capacitor, harvester,
/// regulator). The aggregator calls `update` exactly once per timestep with
/// the average load current over that step.
pub trait SupplyNet {
    /// Advances the net by `dt` under `load_amperes` and returns the
    /// resulting rail state.
    fn update(&mut self, load_amperes: f64, dt: SimTime) -> SupplyState;

    /// Present rail voltage, used to price charge-based event costs before
    /// the step is applied.
    fn vcc(&self) -> f64;
}

/// Fixed-voltage rail with a power-good threshold comparator.
///
/// The reference net for tests and simple always-powered boards.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstantSupply {
    vcc: f64,
    threshold: f64,
}

impl ConstantSupply {
    /// A rail pinned at `vcc` volts with power-good asserted above
    /// `threshold` volts.
    #[must_use]
    pub const fn new(vcc: f64, threshold: f64) -> Self {
        Self { vcc, threshold }
    }

    /// A 3.3 V rail with a 1.8 V power-good threshold.
    #[must_use]
    pub const fn rail_3v3() -> Self {
        Self::new(3.3, 1.8)
    }
}

impl Default for ConstantSupply {
    fn default() -> Self {
        Self::rail_3v3()
    }
}

impl SupplyNet for ConstantSupply {
    fn update(&mut self, _load_amperes: f64, _dt: SimTime) -> SupplyState {
        SupplyState {
            vcc: self.vcc,
            power_good: self.vcc > self.threshold,
        }
    }

    fn vcc(&self) -> f64 {
        self.vcc
    }
}

/// One timestep's aggregated power figures.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PowerSample {
    /// Total event energy drained this step, in joules.
    pub energy: f64,
    /// Average load current over the step, in amperes.
    pub current: f64,
    /// Rail voltage after the step.
    pub vcc: f64,
    /// Rail power-good flag after the step.
    pub power_good: bool,
}

/// Drives the event channel and a supply net in lock-step.
#[derive(Debug)]
pub struct PowerAggregator {
    channel: SharedPowerChannel,
    timestep: SimTime,
    now: SimTime,
}

impl PowerAggregator {
    /// An aggregator stepping `channel` every `timestep`.
    #[must_use]
    pub const fn new(channel: SharedPowerChannel, timestep: SimTime) -> Self {
        Self {
            channel,
            timestep,
            now: SimTime::ZERO,
        }
    }

    /// Simulated time of the next step boundary.
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Runs one aggregation step.
    ///
    /// Drains all event energy at the net's present voltage, adds the
    /// continuous state draw, converts the step's energy to an average
    /// current, advances the supply net and samples the activity log.
    ///
    /// # Errors
    ///
    /// [`Fault::Io`] when the activity log fails to flush.
    pub fn step(&mut self, net: &mut dyn SupplyNet) -> Result<PowerSample, Fault> {
        let vcc = net.vcc();
        let dt = self.timestep.as_secs_f64();

        let mut channel = self.channel.borrow_mut();
        let energy = channel.pop_energy_all(vcc);
        let state_current = channel.current_draw(vcc);

        // Average current over the step: continuous draw plus the event
        // energy spread across the interval at the present voltage.
        let event_current = if vcc > 0.0 && dt > 0.0 {
            energy / (vcc * dt)
        } else {
            0.0
        };
        let current = state_current + event_current;

        let state = net.update(current, self.timestep);
        self.now += self.timestep;
        channel.log_tick(self.now)?;
        drop(channel);

        debug!(
            "power step @ {} us: {energy:.3e} J, {current:.3e} A, vcc {:.3} V",
            self.now.as_micros(),
            state.vcc
        );
        Ok(PowerSample {
            energy,
            current,
            vcc: state.vcc,
            power_good: state.power_good,
        })
    }
}
