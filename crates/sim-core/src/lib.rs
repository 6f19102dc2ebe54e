//! Peripheral simulation and power-accounting framework for discrete-event
//! board models.

/// Fatal protocol-violation taxonomy.
pub mod fault;
pub use fault::Fault;

/// Simulated time and the cooperative-suspension contract.
pub mod sched;
pub use sched::{SimTime, Suspend, Task, Wakeup};

/// Addressable register storage with per-register access control.
pub mod regfile;
pub use regfile::{AccessMode, Register, RegisterFile};

/// Chip-select-framed serial protocol engine.
pub mod spi;
pub use spi::{ChipSelectPolarity, Header, SpiEngine, SpiPhase, SpiSlave, WriteOutcome};

/// Power model event channel and reporting ports.
pub mod power;
pub use power::{
    ChannelConfig, CurrentDraw, EnergyCost, EventDescriptor, EventId, PowerModelChannel,
    PowerModelPort, SharedPowerChannel, StateDescriptor, StateId, LOG_DUMP_THRESHOLD,
};

/// Per-timestep power aggregation and the supply-net seam.
pub mod supply;
pub use supply::{ConstantSupply, PowerAggregator, PowerSample, SupplyNet, SupplyState};

/// Three-axis input traces with cyclic replay.
pub mod trace;
pub use trace::{InputTrace, TraceSample};

/// Serial peripheral device models.
pub mod devices;
pub use devices::accel::{AccelConfig, AccelState, Accelerometer};
pub use devices::bme280::{oversampling_count, Bme280, Bme280Config, Bme280Mode};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
