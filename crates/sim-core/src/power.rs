//! Power model event channel and per-peripheral reporting ports.
//!
//! Every simulated activity is translated into either a discrete energy
//! *event* (a one-shot cost such as "sample taken") or a continuous current
//! *state* ("active", "sleep"). Peripherals report both through a
//! [`PowerModelPort`]; the shared [`PowerModelChannel`] accumulates event
//! counts and tracks each peripheral's active state until the system-level
//! aggregation stage drains them once per timestep.
//!
//! The channel can optionally keep a timestamped activity log: one CSV row
//! of event counts per log timestep, buffered in memory and flushed to disk
//! once the buffer crosses a threshold or the channel is finalized.

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use std::rc::Rc;

use log::{error, info};

use crate::fault::Fault;
use crate::sched::SimTime;

/// Stable identifier of a registered power event.
///
/// Identifiers are allocated in registration order and never reused for the
/// lifetime of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(usize);

/// Stable identifier of a registered power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(usize);

/// Per-occurrence cost model of a power event.
///
/// Whether an event's cost scales with the supply voltage is a property of
/// the event itself, not of the channel, so it is an explicit descriptor
/// parameter rather than hard-coded behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EnergyCost {
    /// Fixed energy per occurrence, independent of the supply voltage.
    Constant {
        /// Energy in joules per occurrence.
        joules: f64,
    },
    /// Fixed charge per occurrence; energy is `coulombs * supply_voltage`
    /// at the instant the counter is drained.
    ChargePerOccurrence {
        /// Charge in coulombs per occurrence.
        coulombs: f64,
    },
}

impl EnergyCost {
    /// Energy of one occurrence at the given supply voltage.
    #[must_use]
    pub fn energy(&self, supply_voltage: f64) -> f64 {
        match *self {
            Self::Constant { joules } => joules,
            Self::ChargePerOccurrence { coulombs } => coulombs * supply_voltage,
        }
    }
}

/// Continuous current-draw model of a power state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CurrentDraw {
    /// Fixed current while the state is active.
    Constant {
        /// Current in amperes.
        amperes: f64,
    },
}

impl CurrentDraw {
    /// Current drawn at the given supply voltage.
    #[must_use]
    pub const fn current(&self, _supply_voltage: f64) -> f64 {
        match *self {
            Self::Constant { amperes } => amperes,
        }
    }
}

/// Registration-time description of a discrete energy event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDescriptor {
    /// Owning peripheral, e.g. `"Accelerometer"`.
    pub module: String,
    /// Event name within the peripheral, e.g. `"sample"`.
    pub name: String,
    /// Per-occurrence cost model.
    pub cost: EnergyCost,
}

impl EventDescriptor {
    /// Convenience constructor.
    pub fn new(module: impl Into<String>, name: impl Into<String>, cost: EnergyCost) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            cost,
        }
    }
}

/// Registration-time description of a continuous current state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDescriptor {
    /// Owning peripheral.
    pub module: String,
    /// State name within the peripheral, e.g. `"sleep"`.
    pub name: String,
    /// Current-draw model while active.
    pub draw: CurrentDraw,
}

impl StateDescriptor {
    /// Convenience constructor.
    pub fn new(module: impl Into<String>, name: impl Into<String>, draw: CurrentDraw) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            draw,
        }
    }
}

/// Number of buffered activity-log rows that triggers a flush to disk.
pub const LOG_DUMP_THRESHOLD: usize = 100_000;

/// Channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelConfig {
    /// Activity-log destination; `None` disables logging entirely.
    pub log_path: Option<PathBuf>,
    /// Interval between activity-log rows.
    pub log_timestep: SimTime,
}

struct LogRow {
    counts: Vec<u64>,
    timestamp_us: u64,
}

/// Aggregator for all registered power events and states.
///
/// Shared by every peripheral and the per-timestep aggregation stage; the
/// surrounding scheduler is cooperative, so no internal locking is needed —
/// all reports for a simulated instant complete before that instant's drain.
pub struct PowerModelChannel {
    config: ChannelConfig,
    events: Vec<EventDescriptor>,
    counts: Vec<u64>,
    states: Vec<StateDescriptor>,
    state_module: Vec<usize>,
    modules: Vec<String>,
    active: Vec<Option<StateId>>,
    log_rows: Vec<LogRow>,
    next_log_at: SimTime,
    log_started: bool,
    finalized: bool,
}

impl std::fmt::Debug for PowerModelChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerModelChannel")
            .field("events", &self.events.len())
            .field("states", &self.states.len())
            .field("modules", &self.modules)
            .field("buffered_log_rows", &self.log_rows.len())
            .finish_non_exhaustive()
    }
}

impl PowerModelChannel {
    /// An empty channel with the given configuration.
    #[must_use]
    pub const fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            counts: Vec::new(),
            states: Vec::new(),
            state_module: Vec::new(),
            modules: Vec::new(),
            active: Vec::new(),
            log_rows: Vec::new(),
            next_log_at: SimTime::ZERO,
            log_started: false,
            finalized: false,
        }
    }

    /// Wraps a fresh channel in the shared handle peripherals expect.
    #[must_use]
    pub fn shared(config: ChannelConfig) -> SharedPowerChannel {
        Rc::new(RefCell::new(Self::new(config)))
    }

    /// Registers a discrete energy event and returns its stable identifier.
    pub fn register_event(&mut self, descriptor: EventDescriptor) -> EventId {
        let id = EventId(self.events.len());
        self.module_index(&descriptor.module);
        self.events.push(descriptor);
        self.counts.push(0);
        id
    }

    /// Registers a continuous current state and returns its stable
    /// identifier.
    pub fn register_state(&mut self, descriptor: StateDescriptor) -> StateId {
        let id = StateId(self.states.len());
        let module = self.module_index(&descriptor.module);
        self.states.push(descriptor);
        self.state_module.push(module);
        id
    }

    /// Adds `n` occurrences to an event's counter.
    pub fn report_event(&mut self, id: EventId, n: u64) {
        self.counts[id.0] += n;
    }

    /// Marks a state as its peripheral's current state, superseding any
    /// previously active state of that peripheral.
    pub fn report_state(&mut self, id: StateId) {
        let module = self.state_module[id.0];
        self.active[module] = Some(id);
    }

    /// Returns and zeroes one event's accumulated occurrence count.
    pub fn pop(&mut self, id: EventId) -> u64 {
        std::mem::take(&mut self.counts[id.0])
    }

    /// Drains one event's counter into energy at the given supply voltage.
    pub fn pop_energy(&mut self, id: EventId, supply_voltage: f64) -> f64 {
        let count = self.pop(id);
        #[allow(clippy::cast_precision_loss)]
        let count_f = count as f64;
        count_f * self.events[id.0].cost.energy(supply_voltage)
    }

    /// Drains every event's counter and returns the summed energy. Used
    /// once per timestep by the system-level aggregation stage.
    pub fn pop_energy_all(&mut self, supply_voltage: f64) -> f64 {
        (0..self.events.len())
            .map(|index| self.pop_energy(EventId(index), supply_voltage))
            .sum()
    }

    /// Number of registered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` when no events are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Summed current of every peripheral's active state.
    #[must_use]
    pub fn current_draw(&self, supply_voltage: f64) -> f64 {
        self.active
            .iter()
            .flatten()
            .map(|id| self.states[id.0].draw.current(supply_voltage))
            .sum()
    }

    /// Descriptor of a registered event.
    #[must_use]
    pub fn event(&self, id: EventId) -> &EventDescriptor {
        &self.events[id.0]
    }

    /// Descriptor of a registered state.
    #[must_use]
    pub fn state(&self, id: StateId) -> &StateDescriptor {
        &self.states[id.0]
    }

    /// Samples the activity log if `now` has reached the next log instant.
    ///
    /// Counts are snapshotted without draining. Rows buffer in memory until
    /// [`LOG_DUMP_THRESHOLD`] accumulate, then flush to the configured file.
    /// A no-op when no log path is configured.
    ///
    /// # Errors
    ///
    /// [`Fault::Io`] when a flush fails.
    pub fn log_tick(&mut self, now: SimTime) -> Result<(), Fault> {
        if self.config.log_path.is_none() || self.config.log_timestep.is_zero() {
            return Ok(());
        }
        if now < self.next_log_at {
            return Ok(());
        }
        self.next_log_at = now + self.config.log_timestep;
        self.log_rows.push(LogRow {
            counts: self.counts.clone(),
            timestamp_us: now.as_micros(),
        });
        if self.log_rows.len() >= LOG_DUMP_THRESHOLD {
            self.flush_log()?;
        }
        Ok(())
    }

    /// Flushes any buffered activity-log rows and marks the log complete.
    /// Called at simulation teardown; also invoked (best-effort) on drop.
    ///
    /// # Errors
    ///
    /// [`Fault::Io`] when the flush fails.
    pub fn finalize(&mut self) -> Result<(), Fault> {
        self.finalized = true;
        self.flush_log()
    }

    fn module_index(&mut self, module: &str) -> usize {
        if let Some(index) = self.modules.iter().position(|name| name == module) {
            return index;
        }
        self.modules.push(module.to_owned());
        self.active.push(None);
        self.modules.len() - 1
    }

    fn flush_log(&mut self) -> Result<(), Fault> {
        let Some(path) = self.config.log_path.clone() else {
            self.log_rows.clear();
            return Ok(());
        };
        if self.log_rows.is_empty() {
            return Ok(());
        }

        let first_flush = !self.log_started;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(first_flush)
            .append(!first_flush)
            .open(&path)?;
        let mut writer = BufWriter::new(file);

        if first_flush {
            for descriptor in &self.events {
                write!(writer, "{}.{},", descriptor.module, descriptor.name)?;
            }
            writeln!(writer, "time_us")?;
            self.log_started = true;
        }
        for row in &self.log_rows {
            for count in &row.counts {
                write!(writer, "{count},")?;
            }
            writeln!(writer, "{}", row.timestamp_us)?;
        }
        writer.flush()?;

        info!(
            "power activity log: flushed {} rows to {}",
            self.log_rows.len(),
            path.display()
        );
        self.log_rows.clear();
        Ok(())
    }
}

impl Drop for PowerModelChannel {
    fn drop(&mut self) {
        if !self.finalized && !self.log_rows.is_empty() {
            if let Err(err) = self.flush_log() {
                error!("power activity log: flush on drop failed: {err}");
            }
        }
    }
}

/// Shared ownership handle for the channel.
///
/// The simulation is single-threaded and cooperative, so `Rc<RefCell<_>>` is
/// the whole synchronization story: every borrow is confined to one call.
pub type SharedPowerChannel = Rc<RefCell<PowerModelChannel>>;

/// Per-peripheral handle onto the shared channel.
///
/// This is the only interface through which device logic communicates its
/// energy impact to the rest of the system.
#[derive(Debug, Clone)]
pub struct PowerModelPort {
    channel: SharedPowerChannel,
    module: String,
}

impl PowerModelPort {
    /// A port scoped to one peripheral's module name.
    pub fn new(channel: SharedPowerChannel, module: impl Into<String>) -> Self {
        Self {
            channel,
            module: module.into(),
        }
    }

    /// Owning peripheral name this port reports under.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Registers a discrete energy event for this peripheral.
    pub fn register_event(&self, name: impl Into<String>, cost: EnergyCost) -> EventId {
        self.channel
            .borrow_mut()
            .register_event(EventDescriptor::new(self.module.clone(), name, cost))
    }

    /// Registers a continuous current state for this peripheral.
    pub fn register_state(&self, name: impl Into<String>, draw: CurrentDraw) -> StateId {
        self.channel
            .borrow_mut()
            .register_state(StateDescriptor::new(self.module.clone(), name, draw))
    }

    /// Reports `n` occurrences of an event.
    pub fn report_event(&self, id: EventId, n: u64) {
        self.channel.borrow_mut().report_event(id, n);
    }

    /// Reports a state as this peripheral's current state.
    pub fn report_state(&self, id: StateId) {
        self.channel.borrow_mut().report_state(id);
    }
}
