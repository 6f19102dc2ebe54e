//! Serial peripheral device models.

pub mod accel;
pub mod bme280;
