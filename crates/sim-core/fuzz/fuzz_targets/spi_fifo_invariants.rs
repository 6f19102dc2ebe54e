#![no_main]

use libfuzzer_sys::fuzz_target;
use sim_core::{
    AccelConfig, Accelerometer, ChannelConfig, Fault, InputTrace, PowerModelChannel,
    PowerModelPort, SimTime,
};

fuzz_target!(|data: &[u8]| {
    let channel = PowerModelChannel::shared(ChannelConfig::default());
    let port = PowerModelPort::new(channel, "Accelerometer");
    let mut dev = Accelerometer::new(AccelConfig::default(), InputTrace::constant_fallback(), port);

    let mut now = SimTime::ZERO;
    for chunk in data.chunks(2) {
        let op = chunk[0];
        let arg = chunk.get(1).copied().unwrap_or(0);
        match op % 4 {
            0 => dev.set_chip_select(arg & 1 == 0),
            1 => match dev.transfer(arg) {
                Ok(_) => {}
                // The only fatal paths are unmapped register accesses.
                Err(
                    Fault::UnmappedRegisterRead { .. }
                    | Fault::UnmappedRegisterWrite { .. }
                    | Fault::WriteOnlyRegisterRead { .. },
                ) => return,
                Err(_) => panic!("unexpected fault class from a transfer"),
            },
            2 => {
                now += SimTime::from_us(u64::from(arg));
                dev.advance(now).expect("device logic never faults");
            }
            _ => dev.set_power_good(arg & 1 == 0),
        }

        assert!(dev.fifo_len() <= 128, "fifo exceeded its capacity");
    }
});
