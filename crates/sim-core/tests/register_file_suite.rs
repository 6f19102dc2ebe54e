//! Register-file access-control and round-trip coverage.

use log as _;
use rstest as _;
use thiserror as _;

use proptest::prelude::*;
use sim_core::{AccessMode, Fault, RegisterFile};

fn peripheral_map() -> RegisterFile {
    let mut file = RegisterFile::new();
    file.add_register(0x00, 0x00, AccessMode::ReadWrite, 0xFF);
    file.add_register(0x01, 0x00, AccessMode::ReadWrite, 0b0011_1111);
    file.add_register(0x02, 0x01, AccessMode::Read, 0xFF);
    file.add_register(0x03, 0x00, AccessMode::Write, 0xFF);
    file
}

#[test]
fn access_modes_partition_bus_visibility() {
    let mut file = peripheral_map();

    // Read-only: bus writes dropped, device writes land.
    file.write(0x02, 0xAA, false).unwrap();
    assert_eq!(file.read(0x02).unwrap(), 0x01);
    file.write(0x02, 0xAA, true).unwrap();
    assert_eq!(file.read(0x02).unwrap(), 0xAA);

    // Write-only: bus writes land, reads are a protocol violation.
    file.write(0x03, 0x55, false).unwrap();
    assert!(matches!(
        file.read(0x03),
        Err(Fault::WriteOnlyRegisterRead { address: 0x03 })
    ));
}

#[test]
fn reset_restores_the_whole_map() {
    let mut file = peripheral_map();
    file.write(0x00, 0xFF, false).unwrap();
    file.write(0x02, 0xFF, true).unwrap();
    file.reset();
    assert_eq!(file.read(0x00).unwrap(), 0x00);
    assert_eq!(file.read(0x02).unwrap(), 0x01);
}

proptest! {
    #[test]
    fn unforced_writes_honor_the_write_mask(value in any::<u8>(), next in any::<u8>()) {
        let mut file = peripheral_map();
        file.write(0x01, value, false).unwrap();
        let first = file.read(0x01).unwrap();
        prop_assert_eq!(first, value & 0b0011_1111);

        file.write(0x01, next, false).unwrap();
        prop_assert_eq!(
            file.read(0x01).unwrap(),
            (first & !0b0011_1111) | (next & 0b0011_1111)
        );
    }

    #[test]
    fn unmapped_addresses_fault_for_every_operation(address in 0x04u8..) {
        let mut file = peripheral_map();
        prop_assert!(
            matches!(
                file.read(address),
                Err(Fault::UnmappedRegisterRead { address: _ })
            ),
            "expected UnmappedRegisterRead fault"
        );
        prop_assert!(
            matches!(
                file.write(address, 0, false),
                Err(Fault::UnmappedRegisterWrite { address: _ })
            ),
            "expected UnmappedRegisterWrite fault"
        );
        prop_assert!(file.set_bit(address, 0, true).is_err());
        prop_assert!(file.clear_bit(address, 0, true).is_err());
    }
}
