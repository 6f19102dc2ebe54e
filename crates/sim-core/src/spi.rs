//! Chip-select-framed serial protocol engine.
//!
//! The framing and phase transitions are identical for every serial
//! peripheral; what differs per device is the address-byte decode convention
//! and the side effects of addressed reads and writes. [`SpiEngine`] is the
//! shared state-machine driver; a peripheral supplies the varying policy
//! through the [`SpiSlave`] capability trait and two associated constants.
//!
//! The data path models a half-duplex shift register: the byte returned for
//! a transfer is the value latched during the *previous* transfer, so a read
//! sequence carries a one-transaction pipeline delay.

use crate::fault::Fault;

/// Electrical polarity of the chip-select line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChipSelectPolarity {
    /// Device selected while the line is low.
    ActiveLow,
    /// Device selected while the line is high.
    ActiveHigh,
}

/// Phase of the transaction group framed by one chip-select assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpiPhase {
    /// The next byte is an address/direction header.
    AwaitingAddress,
    /// Subsequent transfers stream register data out to the master.
    Reading,
    /// Subsequent transfers carry register data in from the master.
    Writing,
}

/// Decoded address-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Register address selected for the rest of the transaction group.
    pub address: u8,
    /// `true` for a read transaction, `false` for a write.
    pub is_read: bool,
}

/// Result of one addressed data-byte write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOutcome {
    /// The write took effect (or was masked); framing continues normally.
    Applied,
    /// The write hit the device's reset sentinel and the peripheral fully
    /// reset itself; the engine discards its transaction state too.
    DeviceReset,
}

/// Per-device protocol policy consumed by [`SpiEngine`].
pub trait SpiSlave {
    /// Whether the device stays in the `Writing` phase after a data byte
    /// (multi-byte burst writes) or returns to `AwaitingAddress`.
    const WRITE_BURST: bool;

    /// Whether the active address advances after each read latch.
    const AUTO_INCREMENT: bool;

    /// Decodes the first byte of a transaction group into address/direction.
    fn decode_header(&self, byte: u8) -> Header;

    /// Latches the value the next transfer will shift out, without consuming
    /// side effects. Called once when a read transaction is set up.
    ///
    /// # Errors
    ///
    /// Fatal when the address has no backing register.
    fn read_latch(&mut self, address: u8) -> Result<u8, Fault>;

    /// Consuming read step for one data transfer: applies side effects tied
    /// to the address (FIFO pop, opportunistic interrupt clear) and returns
    /// the value to latch for the following transfer.
    ///
    /// # Errors
    ///
    /// Fatal when the address has no backing register.
    fn on_data_read(&mut self, address: u8) -> Result<u8, Fault> {
        self.read_latch(address)
    }

    /// Applies one addressed data-byte write, including device-specific side
    /// effects (mode-change notification, reset sentinel).
    ///
    /// # Errors
    ///
    /// Fatal when the address has no backing register or the device never
    /// allows the bus to write it.
    fn addressed_write(&mut self, address: u8, byte: u8) -> Result<WriteOutcome, Fault>;
}

/// Shared transaction state machine for one serial peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiEngine {
    polarity: ChipSelectPolarity,
    selected: bool,
    phase: SpiPhase,
    address: u8,
    latch: u8,
}

impl SpiEngine {
    /// A deselected engine with the given chip-select polarity.
    #[must_use]
    pub const fn new(polarity: ChipSelectPolarity) -> Self {
        Self {
            polarity,
            selected: false,
            phase: SpiPhase::AwaitingAddress,
            address: 0,
            latch: 0,
        }
    }

    /// `true` while the chip-select line holds the device selected.
    #[must_use]
    pub const fn selected(&self) -> bool {
        self.selected
    }

    /// Current transaction phase.
    #[must_use]
    pub const fn phase(&self) -> SpiPhase {
        self.phase
    }

    /// Drives the chip-select line. Deassertion unconditionally discards any
    /// partially-framed transaction and clears the output latch.
    pub fn set_chip_select(&mut self, level: bool) {
        let active = match self.polarity {
            ChipSelectPolarity::ActiveLow => !level,
            ChipSelectPolarity::ActiveHigh => level,
        };
        if !active {
            self.discard_transaction();
        }
        self.selected = active;
    }

    /// Discards transaction state, as after a chip-select deassertion or a
    /// full device reset.
    pub fn reset(&mut self) {
        self.discard_transaction();
    }

    /// Shifts one byte through the device and returns the byte latched
    /// during the previous transfer.
    ///
    /// Transfers while deselected do not belong to any transaction group:
    /// they reset the phase and shift out zero. Read bursts that
    /// auto-increment past the device's register window shift zeroes; only
    /// an address the master explicitly framed can fault.
    ///
    /// # Errors
    ///
    /// Propagates the device's fatal protocol faults.
    pub fn transfer<D: SpiSlave>(&mut self, device: &mut D, mosi: u8) -> Result<u8, Fault> {
        if !self.selected {
            self.discard_transaction();
            return Ok(0);
        }

        let miso = self.latch;
        match self.phase {
            SpiPhase::AwaitingAddress => {
                let header = device.decode_header(mosi);
                self.address = header.address;
                if header.is_read {
                    self.phase = SpiPhase::Reading;
                    self.latch = device.read_latch(self.address)?;
                    self.advance_address::<D>();
                } else {
                    self.phase = SpiPhase::Writing;
                    self.latch = 0;
                }
            }
            SpiPhase::Reading => {
                // The prefetch can auto-increment past the register window;
                // unmapped successors latch zero instead of faulting.
                self.latch = match device.on_data_read(self.address) {
                    Ok(value) => value,
                    Err(Fault::UnmappedRegisterRead { .. }) => 0,
                    Err(fault) => return Err(fault),
                };
                self.advance_address::<D>();
            }
            SpiPhase::Writing => {
                match device.addressed_write(self.address, mosi)? {
                    WriteOutcome::Applied => {
                        if D::WRITE_BURST {
                            self.advance_address::<D>();
                        } else {
                            self.phase = SpiPhase::AwaitingAddress;
                        }
                    }
                    WriteOutcome::DeviceReset => self.discard_transaction(),
                }
                self.latch = 0;
            }
        }
        Ok(miso)
    }

    fn advance_address<D: SpiSlave>(&mut self) {
        if D::AUTO_INCREMENT {
            self.address = self.address.wrapping_add(1);
        }
    }

    fn discard_transaction(&mut self) {
        self.phase = SpiPhase::AwaitingAddress;
        self.latch = 0;
    }
}
