//! Three-axis accelerometer with a byte FIFO and an interrupt line.
//!
//! The device samples a physical input trace at a divider-programmed rate,
//! quantizes each enabled axis into a byte and queues framed samples in a
//! bounded FIFO the bus master drains through the `DATA` register. Mode
//! transitions between sleep, standby and the two measurement modes run as
//! an explicit cooperative state machine polled forward with
//! [`Accelerometer::advance`].

use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::fault::Fault;
use crate::power::{CurrentDraw, EnergyCost, EventId, PowerModelPort, StateId};
use crate::regfile::{AccessMode, RegisterFile};
use crate::sched::{SimTime, Suspend, Task, Wakeup};
use crate::spi::{ChipSelectPolarity, Header, SpiEngine, SpiSlave, WriteOutcome};
use crate::trace::InputTrace;

/// Operating mode, decoded from `CTRL[1:0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelState {
    /// Lowest-power mode; measurement modes are unreachable from here.
    Sleep,
    /// Ready mode; measurement can start immediately.
    Standby,
    /// Takes one sample, then falls back to standby.
    Single,
    /// Samples at the programmed rate until the mode changes.
    Continuous,
}

impl AccelState {
    const fn from_ctrl(ctrl: u8) -> Self {
        match ctrl & Accelerometer::CTRL_MODE_MASK {
            0 => Self::Sleep,
            1 => Self::Standby,
            2 => Self::Single,
            _ => Self::Continuous,
        }
    }

    const fn mode_bits(self) -> u8 {
        match self {
            Self::Sleep => 0,
            Self::Standby => 1,
            Self::Single => 2,
            Self::Continuous => 3,
        }
    }
}

/// What the measurement process is currently doing between wakeups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Parked on the mode-change notification.
    Idle,
    /// Mid mode transition; the timer completes it.
    Transition(AccelState),
    /// Armed for the next sample tick.
    Sampling,
}

/// Static accelerometer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccelConfig {
    /// Sample period at divider 0; the effective period is
    /// `base_sample_period * (CTRL_FS + 1)`.
    pub base_sample_period: SimTime,
    /// Duration of the sleep-to-standby transition.
    pub sleep_to_standby: SimTime,
    /// Duration of the standby-to-sleep transition.
    pub standby_to_sleep: SimTime,
    /// FIFO capacity in bytes.
    pub fifo_capacity: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            base_sample_period: SimTime::from_us(100),
            sleep_to_standby: SimTime::from_ms(1),
            standby_to_sleep: SimTime::from_us(500),
            fifo_capacity: 128,
        }
    }
}

/// Simulated SPI accelerometer.
#[derive(Debug)]
pub struct Accelerometer {
    config: AccelConfig,
    input: InputTrace,
    regs: RegisterFile,
    engine: SpiEngine,
    task: Task,
    phase: Phase,
    state: AccelState,
    fifo: VecDeque<u8>,
    irq: bool,
    powered: bool,
    port: PowerModelPort,
    ev_sample: EventId,
    st_sleep: StateId,
    st_active: StateId,
}

impl Accelerometer {
    /// Mode/control register.
    pub const CTRL: u8 = 0x00;
    /// Sample-rate divider register.
    pub const CTRL_FS: u8 = 0x01;
    /// Status register.
    pub const STATUS: u8 = 0x02;
    /// FIFO read port.
    pub const DATA: u8 = 0x03;
    /// Interrupt threshold, in frames, for continuous mode.
    pub const FIFO_THR: u8 = 0x04;

    /// `CTRL` operating-mode field.
    pub const CTRL_MODE_MASK: u8 = 0b0000_0011;
    /// `CTRL` interrupt enable.
    pub const CTRL_IRQ_EN: u8 = 1 << 2;
    /// `CTRL` X-axis enable.
    pub const CTRL_X_EN: u8 = 1 << 3;
    /// `CTRL` Y-axis enable.
    pub const CTRL_Y_EN: u8 = 1 << 4;
    /// `CTRL` Z-axis enable.
    pub const CTRL_Z_EN: u8 = 1 << 5;
    /// `CTRL` soft-reset trigger.
    pub const CTRL_SW_RESET: u8 = 1 << 7;
    /// `STATUS` busy flag.
    pub const STATUS_BUSY: u8 = 1 << 0;

    /// A powered accelerometer in sleep mode, sampling `input`.
    #[must_use]
    pub fn new(config: AccelConfig, input: InputTrace, port: PowerModelPort) -> Self {
        let mut regs = RegisterFile::new();
        regs.add_register(Self::CTRL, 0x00, AccessMode::ReadWrite, 0xFF);
        regs.add_register(Self::CTRL_FS, 0x00, AccessMode::ReadWrite, 0xFF);
        regs.add_register(Self::STATUS, Self::STATUS_BUSY, AccessMode::Read, 0xFF);
        regs.add_register(Self::DATA, 0x00, AccessMode::Read, 0xFF);
        regs.add_register(Self::FIFO_THR, 0x00, AccessMode::ReadWrite, 0xFF);

        let ev_sample = port.register_event("sample", EnergyCost::Constant { joules: 24e-9 });
        let st_sleep = port.register_state("sleep", CurrentDraw::Constant { amperes: 0.32e-6 });
        let st_active = port.register_state("active", CurrentDraw::Constant { amperes: 145e-6 });
        port.report_state(st_sleep);

        Self {
            config,
            input,
            regs,
            engine: SpiEngine::new(ChipSelectPolarity::ActiveLow),
            task: Task::new(),
            phase: Phase::Idle,
            state: AccelState::Sleep,
            fifo: VecDeque::new(),
            irq: false,
            powered: true,
            port,
            ev_sample,
            st_sleep,
            st_active,
        }
    }

    /// Present operating mode.
    #[must_use]
    pub const fn state(&self) -> AccelState {
        self.state
    }

    /// Interrupt line level.
    #[must_use]
    pub const fn irq(&self) -> bool {
        self.irq
    }

    /// Bytes currently queued in the FIFO.
    #[must_use]
    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
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
    /// reset and freezes the device until power returns.
    pub fn set_power_good(&mut self, good: bool) {
        if good == self.powered {
            return;
        }
        self.powered = good;
        if good {
            debug!("accelerometer: supply restored");
        } else {
            debug!("accelerometer: supply lost, holding in reset");
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
    /// Fatal when the framed transaction addresses an unmapped register.
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

    /// Runs the measurement process up to (and including) `now`: every due
    /// timer wakeup fires at its own deadline, then any pending mode-change
    /// notification runs as a zero-delay delta cycle.
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
            match wakeup {
                Wakeup::ModeChange => self.evaluate_mode(at)?,
                Wakeup::Timer => self.on_timer(at)?,
            }
        }
        Ok(())
    }

    fn evaluate_mode(&mut self, at: SimTime) -> Result<(), Fault> {
        let ctrl = self.regs.read(Self::CTRL)?;
        let mut requested = AccelState::from_ctrl(ctrl);

        if self.state == AccelState::Sleep
            && matches!(requested, AccelState::Single | AccelState::Continuous)
        {
            warn!("accelerometer: measurement unreachable from sleep, downgrading to standby");
            let downgraded =
                (ctrl & !Self::CTRL_MODE_MASK) | AccelState::Standby.mode_bits();
            self.regs.write(Self::CTRL, downgraded, true)?;
            requested = AccelState::Standby;
        }

        if requested == self.state {
            return self.settle(at);
        }
        match requested {
            AccelState::Sleep => {
                self.begin_transition(at, AccelState::Sleep, self.config.standby_to_sleep)
            }
            AccelState::Standby if self.state == AccelState::Sleep => {
                self.begin_transition(at, AccelState::Standby, self.config.sleep_to_standby)
            }
            AccelState::Standby => {
                // Leaving a measurement mode is immediate.
                self.state = AccelState::Standby;
                self.report_power_state();
                self.settle(at)
            }
            AccelState::Single | AccelState::Continuous => self.begin_sampling(at, requested),
        }
    }

    fn on_timer(&mut self, at: SimTime) -> Result<(), Fault> {
        match self.phase {
            Phase::Idle => {
                self.task.park(at, Suspend::OnModeChange);
                Ok(())
            }
            Phase::Transition(target) => {
                debug!("accelerometer: entered {target:?}");
                self.state = target;
                self.phase = Phase::Idle;
                self.report_power_state();
                self.settle(at)
            }
            Phase::Sampling => self.take_sample(at),
        }
    }

    /// Clears busy and parks the process until the next mode write.
    fn settle(&mut self, at: SimTime) -> Result<(), Fault> {
        self.phase = Phase::Idle;
        self.regs.clear_bit_mask(Self::STATUS, Self::STATUS_BUSY, true)?;
        self.task.park(at, Suspend::OnModeChange);
        Ok(())
    }

    fn begin_transition(
        &mut self,
        at: SimTime,
        target: AccelState,
        delay: SimTime,
    ) -> Result<(), Fault> {
        self.phase = Phase::Transition(target);
        self.regs.set_bit_mask(Self::STATUS, Self::STATUS_BUSY, true)?;
        self.task.park(at, Suspend::Timer(delay));
        Ok(())
    }

    fn begin_sampling(&mut self, at: SimTime, target: AccelState) -> Result<(), Fault> {
        self.state = target;
        self.phase = Phase::Sampling;
        self.report_power_state();
        self.regs.set_bit_mask(Self::STATUS, Self::STATUS_BUSY, true)?;
        self.task.park(at, Suspend::Timer(self.sample_period()?));
        Ok(())
    }

    fn take_sample(&mut self, at: SimTime) -> Result<(), Fault> {
        let ctrl = self.regs.read(Self::CTRL)?;
        let header = (ctrl >> 3) & 0x07;
        let sample = self.input.sample_at(at);

        self.fifo.push_back(header);
        if ctrl & Self::CTRL_X_EN != 0 {
            self.fifo.push_back(quantize(sample.x));
        }
        if ctrl & Self::CTRL_Y_EN != 0 {
            self.fifo.push_back(quantize(sample.y));
        }
        if ctrl & Self::CTRL_Z_EN != 0 {
            self.fifo.push_back(quantize(sample.z));
        }
        self.evict_oldest_frames();
        self.port.report_event(self.ev_sample, 1);
        trace!(
            "accelerometer: sample @ {} us, header {header:#04x}, fifo {} bytes",
            at.as_micros(),
            self.fifo.len()
        );

        self.regs.clear_bit_mask(Self::STATUS, Self::STATUS_BUSY, true)?;
        self.refresh_irq()?;

        if self.state == AccelState::Single {
            let ctrl = (ctrl & !Self::CTRL_MODE_MASK) | AccelState::Standby.mode_bits();
            self.regs.write(Self::CTRL, ctrl, true)?;
            self.state = AccelState::Standby;
            self.report_power_state();
            return self.settle(at);
        }
        // Mode writes that landed while the timer ran take effect at the
        // sample tick, as the process re-reads its mode register here.
        if AccelState::from_ctrl(ctrl) == AccelState::Continuous {
            self.regs.set_bit_mask(Self::STATUS, Self::STATUS_BUSY, true)?;
            self.task.park(at, Suspend::Timer(self.sample_period()?));
            Ok(())
        } else {
            self.evaluate_mode(at)
        }
    }

    /// Drops whole frames from the front until the FIFO fits its capacity.
    fn evict_oldest_frames(&mut self) {
        while self.fifo.len() > self.config.fifo_capacity {
            let header = self.fifo.front().copied().unwrap_or(0);
            let frame_len = 1 + (header & 0x07).count_ones() as usize;
            for _ in 0..frame_len {
                self.fifo.pop_front();
            }
        }
    }

    fn irq_condition(&self) -> Result<bool, Fault> {
        let ctrl = self.regs.read(Self::CTRL)?;
        if ctrl & Self::CTRL_IRQ_EN == 0 {
            return Ok(false);
        }
        let threshold_bytes = usize::from(self.regs.read(Self::FIFO_THR)?) * 4;
        Ok(if self.state == AccelState::Continuous {
            self.fifo.len() >= threshold_bytes
        } else {
            !self.fifo.is_empty()
        })
    }

    /// Recomputes the interrupt line after a sample lands.
    fn refresh_irq(&mut self) -> Result<(), Fault> {
        self.irq = self.irq_condition()?;
        Ok(())
    }

    /// Drops the line once its condition no longer holds. Reads only ever
    /// clear the interrupt; a sample is what raises it.
    fn release_irq(&mut self) -> Result<(), Fault> {
        if self.irq && !self.irq_condition()? {
            self.irq = false;
        }
        Ok(())
    }

    /// Reports the draw for the mode just entered: sleep is the only
    /// low-power state, every other mode draws the active current.
    fn report_power_state(&mut self) {
        let id = if self.state == AccelState::Sleep {
            self.st_sleep
        } else {
            self.st_active
        };
        self.port.report_state(id);
    }

    fn sample_period(&self) -> Result<SimTime, Fault> {
        let divider = self.regs.read(Self::CTRL_FS)?;
        Ok(self.config.base_sample_period * (u32::from(divider) + 1))
    }

    /// Restores the device to its power-on state.
    fn full_reset(&mut self) {
        self.regs.reset();
        self.fifo.clear();
        self.task.reset();
        self.phase = Phase::Idle;
        self.state = AccelState::Sleep;
        self.irq = false;
        self.report_power_state();
    }
}

impl SpiSlave for Accelerometer {
    // The address holds for the whole frame in both directions: writes
    // stream into the addressed register until chip-select deasserts.
    const WRITE_BURST: bool = true;
    const AUTO_INCREMENT: bool = false;

    fn decode_header(&self, byte: u8) -> Header {
        Header {
            address: byte & 0x7F,
            is_read: byte & 0x80 != 0,
        }
    }

    fn read_latch(&mut self, address: u8) -> Result<u8, Fault> {
        if address == Self::DATA {
            // Mapped as a register but backed by the FIFO.
            Ok(self.fifo.front().copied().unwrap_or(0))
        } else {
            self.regs.read(address)
        }
    }

    fn on_data_read(&mut self, address: u8) -> Result<u8, Fault> {
        let value = if address == Self::DATA {
            self.fifo.pop_front();
            self.fifo.front().copied().unwrap_or(0)
        } else {
            self.regs.read(address)?
        };
        self.release_irq()?;
        Ok(value)
    }

    fn addressed_write(&mut self, address: u8, byte: u8) -> Result<WriteOutcome, Fault> {
        if address == Self::CTRL && byte & Self::CTRL_SW_RESET != 0 {
            debug!("accelerometer: soft reset");
            self.full_reset();
            return Ok(WriteOutcome::DeviceReset);
        }
        self.regs.write(address, byte, false)?;
        if address == Self::CTRL {
            self.task.notify_mode_change();
        }
        Ok(WriteOutcome::Applied)
    }
}

/// Maps an acceleration in m/s² onto the device's 8-bit scale.
fn quantize(g: f64) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = (4.0 * g + 128.0).round().clamp(0.0, 255.0) as u8;
    value
}

#[cfg(test)]
mod tests {
    use super::{quantize, AccelConfig, AccelState, Accelerometer};
    use crate::power::{ChannelConfig, PowerModelChannel, PowerModelPort, SharedPowerChannel};
    use crate::sched::SimTime;
    use crate::trace::InputTrace;

    fn device() -> (Accelerometer, SharedPowerChannel) {
        let channel = PowerModelChannel::shared(ChannelConfig::default());
        let port = PowerModelPort::new(channel.clone(), "Accelerometer");
        let dev = Accelerometer::new(
            AccelConfig::default(),
            InputTrace::constant_fallback(),
            port,
        );
        (dev, channel)
    }

    fn spi_write(dev: &mut Accelerometer, address: u8, value: u8) {
        dev.set_chip_select(false);
        dev.transfer(address).unwrap();
        dev.transfer(value).unwrap();
        dev.set_chip_select(true);
    }

    fn spi_read(dev: &mut Accelerometer, address: u8) -> u8 {
        dev.set_chip_select(false);
        dev.transfer(0x80 | address).unwrap();
        let value = dev.transfer(0x00).unwrap();
        dev.set_chip_select(true);
        value
    }

    #[test]
    fn quantize_is_offset_scaled_and_clamped() {
        assert_eq!(quantize(0.0), 128);
        assert_eq!(quantize(9.81), 128 + 39);
        assert_eq!(quantize(-9.81), 128 - 39);
        assert_eq!(quantize(1000.0), 255);
        assert_eq!(quantize(-1000.0), 0);
    }

    #[test]
    fn sleep_to_standby_takes_the_transition_delay() {
        let (mut dev, _channel) = device();
        spi_write(&mut dev, Accelerometer::CTRL, 0x01);
        dev.advance(SimTime::ZERO).unwrap();
        // Mid-transition the device reads busy and is still asleep.
        assert_eq!(dev.state(), AccelState::Sleep);
        assert_eq!(
            spi_read(&mut dev, Accelerometer::STATUS) & Accelerometer::STATUS_BUSY,
            1
        );
        dev.advance(SimTime::from_ms(1)).unwrap();
        assert_eq!(dev.state(), AccelState::Standby);
        assert_eq!(
            spi_read(&mut dev, Accelerometer::STATUS) & Accelerometer::STATUS_BUSY,
            0
        );
    }

    #[test]
    fn measurement_from_sleep_downgrades_to_standby() {
        let (mut dev, _channel) = device();
        spi_write(&mut dev, Accelerometer::CTRL, 0x03); // continuous from sleep
        dev.advance(SimTime::ZERO).unwrap();
        // The mode field was rewritten at the delta cycle already.
        assert_eq!(
            spi_read(&mut dev, Accelerometer::CTRL) & Accelerometer::CTRL_MODE_MASK,
            0x01
        );
        dev.advance(SimTime::from_ms(1)).unwrap();
        assert_eq!(dev.state(), AccelState::Standby);
        assert_eq!(dev.fifo_len(), 0);
    }

    #[test]
    fn single_mode_takes_one_frame_and_falls_back() {
        let (mut dev, _channel) = device();
        spi_write(&mut dev, Accelerometer::CTRL, 0x01);
        dev.advance(SimTime::ZERO).unwrap();
        dev.advance(SimTime::from_ms(1)).unwrap();
        // Single shot, all three axes enabled. The delta cycle arms the
        // sample timer; the frame lands one sample period later.
        spi_write(&mut dev, Accelerometer::CTRL, 0x02 | 0b0011_1000);
        dev.advance(SimTime::from_ms(2)).unwrap();
        dev.advance(SimTime::from_ms(3)).unwrap();
        assert_eq!(dev.state(), AccelState::Standby);
        assert_eq!(dev.fifo_len(), 4); // header + x + y + z
        assert_eq!(
            spi_read(&mut dev, Accelerometer::CTRL) & Accelerometer::CTRL_MODE_MASK,
            0x01
        );
        // One frame only, even well past several sample periods.
        dev.advance(SimTime::from_ms(10)).unwrap();
        assert_eq!(dev.fifo_len(), 4);
    }

    #[test]
    fn sample_period_scales_with_the_divider() {
        let (mut dev, _channel) = device();
        spi_write(&mut dev, Accelerometer::CTRL_FS, 4); // 500 us period
        spi_write(&mut dev, Accelerometer::CTRL, 0x01);
        dev.advance(SimTime::ZERO).unwrap();
        dev.advance(SimTime::from_ms(1)).unwrap();
        spi_write(&mut dev, Accelerometer::CTRL, 0x03 | Accelerometer::CTRL_Z_EN);
        dev.advance(SimTime::from_ms(1)).unwrap();
        assert_eq!(
            dev.next_deadline(),
            Some(SimTime::from_ms(1) + SimTime::from_us(500))
        );
        dev.advance(SimTime::from_ms(2)).unwrap();
        assert_eq!(dev.fifo_len(), 2 * 2); // two frames of header + z
    }

    #[test]
    fn soft_reset_restores_power_on_state() {
        let (mut dev, _channel) = device();
        spi_write(&mut dev, Accelerometer::CTRL, 0x01);
        dev.advance(SimTime::ZERO).unwrap();
        dev.advance(SimTime::from_ms(1)).unwrap();
        spi_write(&mut dev, Accelerometer::CTRL, 0x02 | Accelerometer::CTRL_X_EN);
        dev.advance(SimTime::from_ms(2)).unwrap();
        dev.advance(SimTime::from_ms(3)).unwrap();
        assert!(dev.fifo_len() > 0);

        spi_write(&mut dev, Accelerometer::CTRL, Accelerometer::CTRL_SW_RESET);
        assert_eq!(dev.state(), AccelState::Sleep);
        assert_eq!(dev.fifo_len(), 0);
        assert!(!dev.irq());
        assert_eq!(spi_read(&mut dev, Accelerometer::CTRL), 0x00);
    }

    #[test]
    fn standby_draws_the_active_current() {
        let (mut dev, channel) = device();
        assert!((channel.borrow().current_draw(3.3) - 0.32e-6).abs() < 1e-12);

        spi_write(&mut dev, Accelerometer::CTRL, 0x01);
        dev.advance(SimTime::ZERO).unwrap();
        dev.advance(SimTime::from_ms(1)).unwrap();
        assert_eq!(dev.state(), AccelState::Standby);
        assert!((channel.borrow().current_draw(3.3) - 145e-6).abs() < 1e-12);

        // Dropping back to sleep restores the sleep draw.
        spi_write(&mut dev, Accelerometer::CTRL, 0x00);
        dev.advance(SimTime::from_ms(1)).unwrap();
        dev.advance(SimTime::from_ms(2)).unwrap();
        assert_eq!(dev.state(), AccelState::Sleep);
        assert!((channel.borrow().current_draw(3.3) - 0.32e-6).abs() < 1e-12);
    }

    #[test]
    fn losing_power_resets_and_freezes_the_device() {
        let (mut dev, _channel) = device();
        spi_write(&mut dev, Accelerometer::CTRL, 0x01);
        dev.set_power_good(false);
        assert_eq!(dev.next_deadline(), None);
        // Bus traffic while unpowered is inert.
        assert_eq!(dev.transfer(0x80).unwrap(), 0);
        dev.set_power_good(true);
        assert_eq!(dev.state(), AccelState::Sleep);
        assert_eq!(spi_read(&mut dev, Accelerometer::CTRL), 0x00);
    }
}
