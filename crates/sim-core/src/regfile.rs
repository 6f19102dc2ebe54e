//! Addressable register storage with per-register access control.
//!
//! Every serial peripheral owns exactly one [`RegisterFile`] describing its
//! memory-mapped register space: addresses, reset values, access modes and
//! write masks are static per-device data. Runtime accesses to addresses
//! that were never registered are fatal — they represent the firmware bug
//! the simulator exists to surface.

use crate::fault::Fault;

/// Bus-visible access policy for one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessMode {
    /// Readable by the bus; writable only by device logic (forced writes).
    Read,
    /// Writable by the bus; reads are a protocol violation.
    Write,
    /// Readable and writable by the bus.
    ReadWrite,
}

/// One 8-bit register and its static metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    address: u8,
    value: u8,
    reset_value: u8,
    access: AccessMode,
    write_mask: u8,
}

impl Register {
    /// Current value.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.value
    }

    /// Address within the owning file.
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Value restored by [`RegisterFile::reset`].
    #[must_use]
    pub const fn reset_value(&self) -> u8 {
        self.reset_value
    }

    /// Bus-visible access policy.
    #[must_use]
    pub const fn access(&self) -> AccessMode {
        self.access
    }

    /// Bits an unforced write may change.
    #[must_use]
    pub const fn write_mask(&self) -> u8 {
        self.write_mask
    }
}

/// Insertion-ordered collection of a peripheral's registers.
///
/// Register maps are small and fixed at construction, so lookup is a linear
/// scan over the insertion order.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    regs: Vec<Register>,
}

impl RegisterFile {
    /// An empty register file.
    #[must_use]
    pub const fn new() -> Self {
        Self { regs: Vec::new() }
    }

    /// Adds a register at construction time.
    ///
    /// # Panics
    ///
    /// Panics if `address` is already present; duplicate addresses are a bug
    /// in the peripheral's static register map, not a runtime condition.
    pub fn add_register(&mut self, address: u8, reset_value: u8, access: AccessMode, write_mask: u8) {
        assert!(
            !self.contains(address),
            "duplicate register address {address:#04x}"
        );
        self.regs.push(Register {
            address,
            value: reset_value,
            reset_value,
            access,
            write_mask,
        });
    }

    /// Returns `true` when `address` has a backing register.
    #[must_use]
    pub fn contains(&self, address: u8) -> bool {
        self.regs.iter().any(|reg| reg.address == address)
    }

    /// Number of registers in the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// `true` when no registers have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Reads the current value at `address`.
    ///
    /// # Errors
    ///
    /// [`Fault::UnmappedRegisterRead`] when the address has no register, and
    /// [`Fault::WriteOnlyRegisterRead`] when the register is write-only:
    /// unreadable registers read as an error, never as a silent default.
    pub fn read(&self, address: u8) -> Result<u8, Fault> {
        let reg = self
            .regs
            .iter()
            .find(|reg| reg.address == address)
            .ok_or(Fault::UnmappedRegisterRead { address })?;
        if reg.access == AccessMode::Write {
            return Err(Fault::WriteOnlyRegisterRead { address });
        }
        Ok(reg.value)
    }

    /// Writes `value` to `address`.
    ///
    /// Unforced writes respect the register's access mode and write mask:
    /// a write to a read-only register is silently dropped (reserved/status
    /// bits the bus cannot touch), and masked-out bits keep their previous
    /// value. Device logic passes `force == true` to update read-only
    /// registers and bypass the mask.
    ///
    /// # Errors
    ///
    /// [`Fault::UnmappedRegisterWrite`] when the address has no register.
    pub fn write(&mut self, address: u8, value: u8, force: bool) -> Result<(), Fault> {
        let reg = self
            .regs
            .iter_mut()
            .find(|reg| reg.address == address)
            .ok_or(Fault::UnmappedRegisterWrite { address })?;
        if force {
            reg.value = value;
        } else if reg.access != AccessMode::Read {
            reg.value = (reg.value & !reg.write_mask) | (value & reg.write_mask);
        }
        Ok(())
    }

    /// Restores every register to its reset value.
    pub fn reset(&mut self) {
        for reg in &mut self.regs {
            reg.value = reg.reset_value;
        }
    }

    /// Sets one bit. Read-modify-write over [`Self::read`] / [`Self::write`].
    ///
    /// # Errors
    ///
    /// Propagates the underlying read/write faults.
    pub fn set_bit(&mut self, address: u8, bit: u8, force: bool) -> Result<(), Fault> {
        self.set_bit_mask(address, 1 << bit, force)
    }

    /// Clears one bit.
    ///
    /// # Errors
    ///
    /// Propagates the underlying read/write faults.
    pub fn clear_bit(&mut self, address: u8, bit: u8, force: bool) -> Result<(), Fault> {
        self.clear_bit_mask(address, 1 << bit, force)
    }

    /// Sets every bit in `mask`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying read/write faults.
    pub fn set_bit_mask(&mut self, address: u8, mask: u8, force: bool) -> Result<(), Fault> {
        let value = self.read_any(address)?;
        self.write(address, value | mask, force)
    }

    /// Clears every bit in `mask`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying read/write faults.
    pub fn clear_bit_mask(&mut self, address: u8, mask: u8, force: bool) -> Result<(), Fault> {
        let value = self.read_any(address)?;
        self.write(address, value & !mask, force)
    }

    /// Internal read that ignores the access mode, for read-modify-write
    /// helpers used by device logic on write-only registers.
    fn read_any(&self, address: u8) -> Result<u8, Fault> {
        self.regs
            .iter()
            .find(|reg| reg.address == address)
            .map(|reg| reg.value)
            .ok_or(Fault::UnmappedRegisterRead { address })
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessMode, RegisterFile};
    use crate::fault::Fault;
    use proptest::prelude::*;

    fn file_with(address: u8, reset: u8, access: AccessMode, mask: u8) -> RegisterFile {
        let mut file = RegisterFile::new();
        file.add_register(address, reset, access, mask);
        file
    }

    #[test]
    fn read_returns_reset_value_after_construction() {
        let file = file_with(0x10, 0xA5, AccessMode::ReadWrite, 0xFF);
        assert_eq!(file.read(0x10).unwrap(), 0xA5);
    }

    #[test]
    #[should_panic(expected = "duplicate register address")]
    fn duplicate_address_is_a_construction_bug() {
        let mut file = file_with(0x10, 0, AccessMode::ReadWrite, 0xFF);
        file.add_register(0x10, 0, AccessMode::Read, 0xFF);
    }

    #[test]
    fn unmapped_access_is_fatal_in_both_directions() {
        let mut file = file_with(0x00, 0, AccessMode::ReadWrite, 0xFF);
        assert!(matches!(
            file.read(0x01),
            Err(Fault::UnmappedRegisterRead { address: 0x01 })
        ));
        assert!(matches!(
            file.write(0x01, 0xFF, false),
            Err(Fault::UnmappedRegisterWrite { address: 0x01 })
        ));
    }

    #[test]
    fn write_only_register_reads_as_an_error_not_a_default() {
        let file = file_with(0x07, 0, AccessMode::Write, 0xFF);
        assert!(matches!(
            file.read(0x07),
            Err(Fault::WriteOnlyRegisterRead { address: 0x07 })
        ));
    }

    #[test]
    fn unforced_write_to_read_only_register_is_dropped() {
        let mut file = file_with(0x02, 0x11, AccessMode::Read, 0xFF);
        file.write(0x02, 0xFF, false).unwrap();
        assert_eq!(file.read(0x02).unwrap(), 0x11);
        file.write(0x02, 0xFF, true).unwrap();
        assert_eq!(file.read(0x02).unwrap(), 0xFF);
    }

    #[test]
    fn masked_bits_are_preserved_across_unforced_writes() {
        let mut file = file_with(0x05, 0b1010_0000, AccessMode::ReadWrite, 0b0000_1111);
        file.write(0x05, 0b0101_0101, false).unwrap();
        assert_eq!(file.read(0x05).unwrap(), 0b1010_0101);
    }

    #[test]
    fn forced_write_bypasses_the_mask() {
        let mut file = file_with(0x05, 0b1010_0000, AccessMode::ReadWrite, 0b0000_1111);
        file.write(0x05, 0b0101_0101, true).unwrap();
        assert_eq!(file.read(0x05).unwrap(), 0b0101_0101);
    }

    #[test]
    fn reset_restores_every_register() {
        let mut file = RegisterFile::new();
        file.add_register(0x00, 0x00, AccessMode::ReadWrite, 0xFF);
        file.add_register(0x01, 0x80, AccessMode::Read, 0xFF);
        file.write(0x00, 0x3C, false).unwrap();
        file.write(0x01, 0x55, true).unwrap();
        file.reset();
        assert_eq!(file.read(0x00).unwrap(), 0x00);
        assert_eq!(file.read(0x01).unwrap(), 0x80);
    }

    #[test]
    fn bit_helpers_are_read_modify_write() {
        let mut file = file_with(0x03, 0b0000_0000, AccessMode::ReadWrite, 0xFF);
        file.set_bit(0x03, 3, false).unwrap();
        file.set_bit_mask(0x03, 0b0000_0011, false).unwrap();
        assert_eq!(file.read(0x03).unwrap(), 0b0000_1011);
        file.clear_bit(0x03, 0, false).unwrap();
        file.clear_bit_mask(0x03, 0b0000_1000, false).unwrap();
        assert_eq!(file.read(0x03).unwrap(), 0b0000_0010);
    }

    #[test]
    fn bit_helpers_reach_read_only_registers_when_forced() {
        let mut file = file_with(0x06, 0b0000_0001, AccessMode::Read, 0xFF);
        file.set_bit(0x06, 4, true).unwrap();
        assert_eq!(file.read(0x06).unwrap(), 0b0001_0001);
        file.clear_bit(0x06, 0, true).unwrap();
        assert_eq!(file.read(0x06).unwrap(), 0b0001_0000);
    }

    proptest! {
        #[test]
        fn masked_round_trip_holds_for_all_values(
            prior in any::<u8>(),
            value in any::<u8>(),
            mask in any::<u8>(),
        ) {
            let mut file = file_with(0x20, prior, AccessMode::ReadWrite, mask);
            file.write(0x20, value, false).unwrap();
            prop_assert_eq!(
                file.read(0x20).unwrap(),
                (prior & !mask) | (value & mask)
            );
        }

        #[test]
        fn never_registered_addresses_always_fault(address in 1u8..=u8::MAX) {
            let mut file = file_with(0x00, 0, AccessMode::ReadWrite, 0xFF);
            prop_assert!(file.read(address).is_err());
            prop_assert!(file.write(address, 0, false).is_err());
            prop_assert!(file.write(address, 0, true).is_err());
        }
    }
}
