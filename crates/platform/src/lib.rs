//! Linux power-supply telemetry for chargecap.
//!
//! Reads instantaneous battery attributes (charge percent, energy,
//! voltage, power draw, cycle count) from the kernel's
//! `/sys/class/power_supply` interface and normalizes them into a
//! [`BatteryReading`] snapshot.
//!
//! # Example
//!
//! ```ignore
//! use chargecap_platform::{BatterySource, SysfsBattery};
//!
//! let battery = SysfsBattery::new()?;
//! let reading = battery.read()?;
//! println!("Charge: {}%", reading.percent);
//! ```

mod battery;
mod sysfs;
mod types;

pub use battery::{BatteryReading, BatterySource, ReadError};
pub use sysfs::SysfsBattery;
pub use types::PowerSource;
