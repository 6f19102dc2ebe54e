//! Environmental sensor with an oversampled, IIR-filtered measurement
//! pipeline.
//!
//! Register layout and behavior follow the common combined
//! temperature/pressure/humidity SPI sensor: a control register selects
//! per-channel oversampling and the operating mode, a config register the
//! standby interval and filter coefficient, and results land in a burst
//! data block the master reads with auto-incrementing addresses. Each
//! measurement cycle runs as one timed suspension of the cooperative state
//! machine; results commit when the cycle completes.

use log::{debug, trace};

use crate::fault::Fault;
use crate::power::{CurrentDraw, EnergyCost, EventId, PowerModelPort, StateId};
use crate::regfile::{AccessMode, RegisterFile};
use crate::sched::{SimTime, Suspend, Task, Wakeup};
use crate::spi::{ChipSelectPolarity, Header, SpiEngine, SpiSlave, WriteOutcome};

/// Operating mode, decoded from `CTRL_MEAS[1:0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bme280Mode {
    /// No measurements; registers accessible.
    Sleep,
    /// One measurement cycle, then automatic decay back to sleep.
    Forced,
    /// Perpetual cycles separated by the configured standby interval.
    Normal,
}

impl Bme280Mode {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Sleep,
            0b11 => Self::Normal,
            _ => Self::Forced,
        }
    }
}

/// Decodes a 3-bit oversampling field into a sample count.
///
/// `0` skips the channel entirely; `1..=4` give `1 << (field - 1)` samples;
/// anything larger saturates at 16.
#[must_use]
pub const fn oversampling_count(field: u8) -> u32 {
    match field & 0b111 {
        0 => 0,
        f @ 1..=4 => 1 << (f - 1),
        _ => 16,
    }
}

/// What the measurement process is currently doing between wakeups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Parked on the mode-change notification.
    Idle,
    /// Mid measurement cycle; the timer commits the results.
    Measuring,
    /// Normal-mode standby gap between cycles.
    Standby,
}

/// Static sensor parameters.
///
/// The raw channel values stand in for the physical environment; every
/// oversampled reading within a cycle observes the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bme280Config {
    /// Raw temperature reading.
    pub temperature_sample: u16,
    /// Raw pressure reading.
    pub pressure_sample: u16,
    /// Raw humidity reading.
    pub humidity_sample: u16,
}

impl Default for Bme280Config {
    fn default() -> Self {
        Self {
            temperature_sample: 300,
            pressure_sample: 300,
            humidity_sample: 300,
        }
    }
}

/// Simulated SPI environmental sensor.
#[derive(Debug)]
pub struct Bme280 {
    config: Bme280Config,
    regs: RegisterFile,
    engine: SpiEngine,
    task: Task,
    phase: Phase,
    mode: Bme280Mode,
    powered: bool,
    port: PowerModelPort,
    ev_sample: EventId,
    st_sleep: StateId,
    st_measure: StateId,
}

impl Bme280 {
    /// Chip identification register.
    pub const ID: u8 = 0xD0;
    /// Value read from [`Self::ID`].
    pub const CHIP_ID: u8 = 0x60;
    /// Reset register; writing the sentinel triggers a full reset.
    pub const RESET: u8 = 0xE0;
    /// Reset sentinel value.
    pub const RESET_SENTINEL: u8 = 0xB6;
    /// Humidity oversampling control.
    pub const CTRL_HUM: u8 = 0xF2;
    /// Status register.
    pub const STATUS: u8 = 0xF3;
    /// `STATUS` measuring flag.
    pub const STATUS_MEASURING: u8 = 1 << 3;
    /// Measurement control: `[7:5]` osrs_t, `[4:2]` osrs_p, `[1:0]` mode.
    pub const CTRL_MEAS: u8 = 0xF4;
    /// Config: `[7:5]` standby select, `[4:2]` filter select, bit 1 reserved.
    pub const CONFIG: u8 = 0xF5;
    /// First register of the pressure result (msb/lsb/xlsb).
    pub const PRESS_MSB: u8 = 0xF7;
    /// First register of the temperature result (msb/lsb/xlsb).
    pub const TEMP_MSB: u8 = 0xFA;
    /// First register of the humidity result (msb/lsb).
    pub const HUM_MSB: u8 = 0xFD;

    /// Stored value marking a channel skipped by oversampling.
    pub const SKIPPED: u32 = 0x8000;

    /// Normal-mode standby intervals in microseconds, indexed by
    /// `CONFIG[7:5]`.
    pub const STANDBY_US: [u64; 8] = [
        500, 62_500, 125_000, 250_000, 500_000, 1_000_000, 10_000, 20_000,
    ];

    const CYCLE_OVERHEAD: SimTime = SimTime::from_ms(1);
    const SAMPLE_PERIOD: SimTime = SimTime::from_ms(2);
    const PRESSURE_SETUP: SimTime = SimTime::from_us(500);
    const HUMIDITY_SETUP: SimTime = SimTime::from_us(500);

    /// A powered sensor in sleep mode.
    #[must_use]
    pub fn new(config: Bme280Config, port: PowerModelPort) -> Self {
        let mut regs = RegisterFile::new();
        regs.add_register(Self::ID, Self::CHIP_ID, AccessMode::Read, 0xFF);
        regs.add_register(Self::RESET, 0x00, AccessMode::ReadWrite, 0x00);
        regs.add_register(Self::CTRL_HUM, 0x00, AccessMode::ReadWrite, 0x07);
        regs.add_register(Self::STATUS, 0x00, AccessMode::Read, 0xFF);
        regs.add_register(Self::CTRL_MEAS, 0x00, AccessMode::ReadWrite, 0xFF);
        regs.add_register(Self::CONFIG, 0x00, AccessMode::ReadWrite, 0xFD);
        for offset in 0..3 {
            regs.add_register(Self::PRESS_MSB + offset, msb_reset(offset), AccessMode::Read, 0xFF);
            regs.add_register(Self::TEMP_MSB + offset, msb_reset(offset), AccessMode::Read, 0xFF);
        }
        regs.add_register(Self::HUM_MSB, 0x80, AccessMode::Read, 0xFF);
        regs.add_register(Self::HUM_MSB + 1, 0x00, AccessMode::Read, 0xFF);
        for address in 0x88..=0xA1 {
            regs.add_register(address, 0x00, AccessMode::Read, 0xFF);
        }
        for address in 0xE1..=0xF0 {
            regs.add_register(address, 0x00, AccessMode::Read, 0xFF);
        }

        let ev_sample = port.register_event("sample", EnergyCost::Constant { joules: 580e-9 });
        let st_sleep = port.register_state("sleep", CurrentDraw::Constant { amperes: 0.1e-6 });
        let st_measure = port.register_state("measure", CurrentDraw::Constant { amperes: 714e-6 });
        port.report_state(st_sleep);

        Self {
            config,
            regs,
            engine: SpiEngine::new(ChipSelectPolarity::ActiveLow),
            task: Task::new(),
            phase: Phase::Idle,
            mode: Bme280Mode::Sleep,
            powered: true,
            port,
            ev_sample,
            st_sleep,
            st_measure,
        }
    }

    /// Present operating mode of the measurement machine.
    #[must_use]
    pub const fn mode(&self) -> Bme280Mode {
        self.mode
    }

    /// `true` while a measurement cycle is in flight.
    #[must_use]
    pub const fn measuring(&self) -> bool {
        matches!(self.phase, Phase::Measuring)
    }

    /// Absolute resume time of the measurement process, when it is
    /// suspended on a timer.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<SimTime> {
        if self.powered {
            self.task.next_deadline()
        } else {
            None
        }
    }

    /// Drives the supply power-good line. Losing power performs a full
    /// reset and parks the device until power returns; regaining power
    /// lands it in sleep mode.
    pub fn set_power_good(&mut self, good: bool) {
        if good == self.powered {
            return;
        }
        self.powered = good;
        if good {
            debug!("bme280: supply restored, entering sleep");
        } else {
            debug!("bme280: supply lost, holding in reset");
            self.full_reset();
            self.engine.reset();
        }
    }

    /// Drives the chip-select line.
    pub fn set_chip_select(&mut self, level: bool) {
        self.engine.set_chip_select(level);
    }

    /// Shifts one byte through the device and returns the response byte.
    ///
    /// # Errors
    ///
    /// Fatal when the framed transaction addresses an unmapped register or
    /// writes one the bus is never allowed to write.
    pub fn transfer(&mut self, mosi: u8) -> Result<u8, Fault> {
        if !self.powered {
            return Ok(0);
        }
        let mut engine = std::mem::replace(
            &mut self.engine,
            SpiEngine::new(ChipSelectPolarity::ActiveLow),
        );
        let result = engine.transfer(self, mosi);
        self.engine = engine;
        result
    }

    /// Runs the measurement process up to (and including) `now`.
    ///
    /// # Errors
    ///
    /// Propagates register faults from device logic; with the static map
    /// intact these do not occur.
    pub fn advance(&mut self, now: SimTime) -> Result<(), Fault> {
        if !self.powered {
            return Ok(());
        }
        while let Some((at, wakeup)) = self.task.due(now) {
            match (wakeup, self.phase) {
                (Wakeup::ModeChange, _) | (Wakeup::Timer, Phase::Idle | Phase::Standby) => {
                    self.evaluate_mode(at)?;
                }
                (Wakeup::Timer, Phase::Measuring) => self.commit_cycle(at)?,
            }
        }
        Ok(())
    }

    fn evaluate_mode(&mut self, at: SimTime) -> Result<(), Fault> {
        match Bme280Mode::from_bits(self.regs.read(Self::CTRL_MEAS)?) {
            Bme280Mode::Sleep => {
                self.enter_sleep(at);
                Ok(())
            }
            Bme280Mode::Normal => {
                self.mode = Bme280Mode::Normal;
                self.begin_cycle(at)
            }
            Bme280Mode::Forced => {
                // A one-shot only arms out of sleep; a cycling machine holds
                // its cadence until the field reads sleep or normal.
                if self.mode == Bme280Mode::Sleep {
                    self.mode = Bme280Mode::Forced;
                }
                self.begin_cycle(at)
            }
        }
    }

    /// Parks the machine in sleep until the next mode write.
    fn enter_sleep(&mut self, at: SimTime) {
        self.mode = Bme280Mode::Sleep;
        self.phase = Phase::Idle;
        self.port.report_state(self.st_sleep);
        self.task.park(at, Suspend::OnModeChange);
    }

    fn begin_cycle(&mut self, at: SimTime) -> Result<(), Fault> {
        let ctrl_meas = self.regs.read(Self::CTRL_MEAS)?;
        let osrs_t = oversampling_count(ctrl_meas >> 5);
        let osrs_p = oversampling_count(ctrl_meas >> 2);
        let osrs_h = oversampling_count(self.regs.read(Self::CTRL_HUM)?);

        let mut duration = Self::CYCLE_OVERHEAD + Self::SAMPLE_PERIOD * (osrs_t + osrs_p + osrs_h);
        if osrs_p > 0 {
            duration += Self::PRESSURE_SETUP;
        }
        if osrs_h > 0 {
            duration += Self::HUMIDITY_SETUP;
        }

        trace!(
            "bme280: cycle @ {} us, {osrs_t}/{osrs_p}/{osrs_h} samples, {} us",
            at.as_micros(),
            duration.as_micros()
        );
        self.regs.set_bit_mask(Self::STATUS, Self::STATUS_MEASURING, true)?;
        self.port.report_state(self.st_measure);
        self.phase = Phase::Measuring;
        self.task.park(at, Suspend::Timer(duration));
        Ok(())
    }

    fn commit_cycle(&mut self, at: SimTime) -> Result<(), Fault> {
        let ctrl_meas = self.regs.read(Self::CTRL_MEAS)?;
        let osrs_t = oversampling_count(ctrl_meas >> 5);
        let osrs_p = oversampling_count(ctrl_meas >> 2);
        let osrs_h = oversampling_count(self.regs.read(Self::CTRL_HUM)?);
        let coefficient = oversampling_count(self.regs.read(Self::CONFIG)? >> 2);

        self.commit_filtered(Self::TEMP_MSB, osrs_t, self.config.temperature_sample, coefficient)?;
        self.commit_filtered(Self::PRESS_MSB, osrs_p, self.config.pressure_sample, coefficient)?;
        self.commit_humidity(osrs_h)?;

        self.port
            .report_event(self.ev_sample, u64::from(osrs_t + osrs_p + osrs_h));
        self.regs.clear_bit_mask(Self::STATUS, Self::STATUS_MEASURING, true)?;

        match Bme280Mode::from_bits(self.regs.read(Self::CTRL_MEAS)?) {
            Bme280Mode::Forced if self.mode == Bme280Mode::Forced => {
                // One-shot cycle decays back to sleep.
                let ctrl = self.regs.read(Self::CTRL_MEAS)? & !0b11;
                self.regs.write(Self::CTRL_MEAS, ctrl, true)?;
                self.enter_sleep(at);
            }
            Bme280Mode::Normal | Bme280Mode::Forced => {
                // A cycling machine treats a stray forced field as normal.
                let select = usize::from(self.regs.read(Self::CONFIG)? >> 5);
                self.mode = Bme280Mode::Normal;
                self.phase = Phase::Standby;
                self.port.report_state(self.st_sleep);
                self.task
                    .park(at, Suspend::Timer(SimTime::from_us(Self::STANDBY_US[select])));
            }
            Bme280Mode::Sleep => {
                // The mode was rewritten mid-cycle; park after committing.
                self.enter_sleep(at);
            }
        }
        Ok(())
    }

    /// Averages one oversampled channel, applies the IIR filter against the
    /// previously stored value and stores the 20-bit result.
    fn commit_filtered(
        &mut self,
        base: u8,
        count: u32,
        raw: u16,
        coefficient: u32,
    ) -> Result<(), Fault> {
        if count == 0 {
            return self.store_20bit(base, Self::SKIPPED);
        }
        let sum: u32 = (0..count).map(|_| u32::from(raw)).sum();
        let average = sum / count;
        let value = if coefficient == 0 {
            average
        } else {
            let old = self.load_20bit(base)?;
            (old * (coefficient - 1) + average) / coefficient
        };
        self.store_20bit(base, value)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn commit_humidity(&mut self, count: u32) -> Result<(), Fault> {
        let value = if count == 0 {
            Self::SKIPPED
        } else {
            let sum: u32 = (0..count).map(|_| u32::from(self.config.humidity_sample)).sum();
            sum / count
        };
        self.regs.write(Self::HUM_MSB, (value >> 8) as u8, true)?;
        self.regs.write(Self::HUM_MSB + 1, (value & 0xFF) as u8, true)
    }

    /// Stores bits `[19:12]` in msb, `[11:4]` in lsb and `[3:0]` in the low
    /// nibble of xlsb.
    #[allow(clippy::cast_possible_truncation)]
    fn store_20bit(&mut self, base: u8, value: u32) -> Result<(), Fault> {
        self.regs.write(base, ((value >> 12) & 0xFF) as u8, true)?;
        self.regs.write(base + 1, ((value >> 4) & 0xFF) as u8, true)?;
        self.regs.write(base + 2, (value & 0x0F) as u8, true)
    }

    fn load_20bit(&self, base: u8) -> Result<u32, Fault> {
        let msb = u32::from(self.regs.read(base)?);
        let lsb = u32::from(self.regs.read(base + 1)?);
        let xlsb = u32::from(self.regs.read(base + 2)?);
        Ok((msb << 12) | (lsb << 4) | (xlsb & 0x0F))
    }

    /// Restores the device to its power-on state.
    fn full_reset(&mut self) {
        self.regs.reset();
        self.task.reset();
        self.phase = Phase::Idle;
        self.mode = Bme280Mode::Sleep;
        self.port.report_state(self.st_sleep);
    }
}

const fn msb_reset(offset: u8) -> u8 {
    if offset == 0 {
        0x80
    } else {
        0x00
    }
}

impl SpiSlave for Bme280 {
    const WRITE_BURST: bool = false;
    const AUTO_INCREMENT: bool = true;

    fn decode_header(&self, byte: u8) -> Header {
        // The register map carries the marker bit in every address.
        Header {
            address: byte | 0x80,
            is_read: byte & 0x80 != 0,
        }
    }

    fn read_latch(&mut self, address: u8) -> Result<u8, Fault> {
        self.regs.read(address)
    }

    fn addressed_write(&mut self, address: u8, byte: u8) -> Result<WriteOutcome, Fault> {
        match address {
            Self::RESET => {
                if byte == Self::RESET_SENTINEL {
                    debug!("bme280: reset sentinel written");
                    self.full_reset();
                    return Ok(WriteOutcome::DeviceReset);
                }
                Ok(WriteOutcome::Applied)
            }
            Self::CTRL_HUM | Self::CONFIG => {
                self.regs.write(address, byte, false)?;
                Ok(WriteOutcome::Applied)
            }
            Self::CTRL_MEAS => {
                self.regs.write(address, byte, false)?;
                self.task.notify_mode_change();
                Ok(WriteOutcome::Applied)
            }
            _ if self.regs.contains(address) => Err(Fault::NonWritableSpiAddress { address }),
            _ => Err(Fault::UnmappedRegisterWrite { address }),
        }
    }
}
