use thiserror::Error;

/// Fatal simulation faults.
///
/// A fault means the simulated firmware exercised the hardware model outside
/// its contract (for example, addressing a register that does not exist).
/// Faults are deliberately unrecoverable: they surface firmware bugs under
/// test, so the embedding simulation loop is expected to stop at the first
/// `Err` rather than paper over it.
#[derive(Debug, Error)]
pub enum Fault {
    /// A read referenced an address with no backing register.
    #[error("read from unmapped register address {address:#04x}")]
    UnmappedRegisterRead {
        /// Offending register address.
        address: u8,
    },
    /// A write referenced an address with no backing register.
    #[error("write to unmapped register address {address:#04x}")]
    UnmappedRegisterWrite {
        /// Offending register address.
        address: u8,
    },
    /// A read referenced a register declared write-only.
    #[error("read from write-only register address {address:#04x}")]
    WriteOnlyRegisterRead {
        /// Offending register address.
        address: u8,
    },
    /// A serial write addressed a register the bus is never allowed to write.
    #[error("serial write to non-writable register address {address:#04x}")]
    NonWritableSpiAddress {
        /// Offending register address.
        address: u8,
    },
    /// An input trace file could not be parsed.
    #[error("malformed input trace at line {line}: {reason}")]
    TraceFormat {
        /// 1-based line number of the offending row.
        line: usize,
        /// Short description of what was wrong with the row.
        reason: &'static str,
    },
    /// Host I/O failed while loading a trace or flushing the activity log.
    #[error("host i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl Fault {
    /// Returns the register address involved in the fault, when there is one.
    #[must_use]
    pub const fn address(&self) -> Option<u8> {
        match self {
            Self::UnmappedRegisterRead { address }
            | Self::UnmappedRegisterWrite { address }
            | Self::WriteOnlyRegisterRead { address }
            | Self::NonWritableSpiAddress { address } => Some(*address),
            Self::TraceFormat { .. } | Self::Io(_) => None,
        }
    }
}
