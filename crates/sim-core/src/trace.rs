//! Three-axis input traces replayed cyclically over simulated time.
//!
//! The accelerometer samples its physical input from a comma-delimited file
//! of `time_s,x,y,z` rows. The timestep is derived from the first two rows
//! and assumed fixed; lookups past the end wrap around so short recordings
//! drive arbitrarily long simulations.

use std::path::Path;

use crate::fault::Fault;
use crate::sched::SimTime;

/// One three-axis acceleration sample, in m/s².
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceSample {
    /// X-axis acceleration.
    pub x: f64,
    /// Y-axis acceleration.
    pub y: f64,
    /// Z-axis acceleration.
    pub z: f64,
}

/// Fixed-rate input recording with cyclic replay.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTrace {
    samples: Vec<TraceSample>,
    timestep: SimTime,
}

impl InputTrace {
    /// The fallback when no trace file is configured: a device at rest,
    /// gravity on the Z axis, one sample per second.
    #[must_use]
    pub fn constant_fallback() -> Self {
        Self {
            samples: vec![TraceSample {
                x: 0.0,
                y: 0.0,
                z: 9.81,
            }],
            timestep: SimTime::from_secs_f64(1.0),
        }
    }

    /// Parses a trace from file content.
    ///
    /// # Errors
    ///
    /// [`Fault::TraceFormat`] for non-numeric fields, wrong column counts,
    /// fewer than two rows, or a non-increasing timestamp pair.
    pub fn from_csv_str(content: &str) -> Result<Self, Fault> {
        let mut samples = Vec::new();
        let mut times = Vec::new();

        for (index, raw) in content.lines().enumerate() {
            let line = index + 1;
            let row = raw.trim();
            if row.is_empty() {
                continue;
            }
            let fields: Vec<&str> = row.split(',').collect();
            if fields.len() != 4 {
                return Err(Fault::TraceFormat {
                    line,
                    reason: "expected four comma-separated fields",
                });
            }
            let mut values = [0.0_f64; 4];
            for (slot, field) in values.iter_mut().zip(&fields) {
                *slot = field.trim().parse().map_err(|_| Fault::TraceFormat {
                    line,
                    reason: "non-numeric field",
                })?;
            }
            times.push(values[0]);
            samples.push(TraceSample {
                x: values[1],
                y: values[2],
                z: values[3],
            });
        }

        if samples.len() < 2 {
            return Err(Fault::TraceFormat {
                line: samples.len(),
                reason: "at least two rows are required to derive the timestep",
            });
        }
        let timestep = SimTime::from_secs_f64(times[1] - times[0]);
        if timestep.is_zero() {
            return Err(Fault::TraceFormat {
                line: 2,
                reason: "timestamps must be strictly increasing",
            });
        }
        Ok(Self { samples, timestep })
    }

    /// Loads and parses a trace file.
    ///
    /// # Errors
    ///
    /// [`Fault::Io`] when the file cannot be read, plus the parse errors of
    /// [`Self::from_csv_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Fault> {
        let content = std::fs::read_to_string(path)?;
        Self::from_csv_str(&content)
    }

    /// Interval between consecutive samples.
    #[must_use]
    pub const fn timestep(&self) -> SimTime {
        self.timestep
    }

    /// Number of samples in one replay cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when the trace holds no samples. Construction guarantees this
    /// never happens; provided for the len/is_empty lint pair.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The sample active at simulated time `now`, wrapping cyclically.
    #[must_use]
    pub fn sample_at(&self, now: SimTime) -> TraceSample {
        #[allow(clippy::cast_possible_truncation)]
        let index = (now.as_ns() / self.timestep.as_ns()) as usize % self.samples.len();
        self.samples[index]
    }
}

impl Default for InputTrace {
    fn default() -> Self {
        Self::constant_fallback()
    }
}
