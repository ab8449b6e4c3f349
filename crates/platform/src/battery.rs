//! Battery reading types and the source trait.

use crate::types::PowerSource;

/// Errors raised while reading battery telemetry.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// No battery device exists under the power-supply tree.
    #[error("no battery device found")]
    NoBattery,

    /// The charge percentage could not be read or parsed. Everything
    /// else is best-effort, but a reading without a percent is useless.
    #[error("failed to read charge percent: {0}")]
    Percent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot of battery telemetry, produced fresh on each read.
///
/// `percent` and `power_source` are always populated; every other field
/// is best-effort and absent when the platform does not expose it or
/// the value fails to parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatteryReading {
    /// Current charge level, clamped to 0-100.
    pub percent: u8,

    /// Current power source.
    pub power_source: PowerSource,

    /// Energy remaining in watt-hours.
    pub energy_wh: Option<f64>,

    /// Full-charge capacity in watt-hours.
    pub energy_full_wh: Option<f64>,

    /// Design (factory) capacity in watt-hours.
    pub energy_design_wh: Option<f64>,

    /// Battery voltage in volts.
    pub voltage_v: Option<f64>,

    /// Number of charge cycles.
    pub cycle_count: Option<u32>,

    /// Instantaneous power in watts. Positive while charging, negative
    /// while discharging.
    pub watts: Option<f64>,
}

impl BatteryReading {
    /// Battery health as a percentage of design capacity, when both
    /// capacities are known.
    pub fn health_percent(&self) -> Option<f64> {
        match (self.energy_full_wh, self.energy_design_wh) {
            (Some(full), Some(design)) if design > 0.0 => Some(full / design * 100.0),
            _ => None,
        }
    }

    /// Estimated hours until empty (discharging) or full (charging),
    /// from the instantaneous power draw.
    pub fn time_estimate_hours(&self) -> Option<f64> {
        let watts = self.watts?;
        if watts.abs() < 0.1 {
            return None;
        }
        if watts < 0.0 {
            Some(self.energy_wh? / watts.abs())
        } else {
            let remaining = self.energy_full_wh? - self.energy_wh?;
            Some(remaining.max(0.0) / watts)
        }
    }
}

/// Trait for battery telemetry sources.
///
/// The production implementation reads the kernel sysfs tree; tests
/// substitute a fake pointed at a temp directory.
pub trait BatterySource {
    /// Take a fresh reading.
    fn read(&self) -> Result<BatteryReading, ReadError>;
}
