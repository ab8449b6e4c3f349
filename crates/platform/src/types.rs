//! Shared types for power-supply telemetry.

use std::fmt;

/// Where the machine is currently drawing power from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerSource {
    /// External power (mains adapter) is online.
    Ac,
    /// Running from the battery.
    Battery,
    /// Source cannot be determined.
    #[default]
    Unknown,
}

impl PowerSource {
    /// Returns a human-readable label for the power source.
    pub fn label(&self) -> &'static str {
        match self {
            PowerSource::Ac => "AC",
            PowerSource::Battery => "Battery",
            PowerSource::Unknown => "Unknown",
        }
    }

    /// Returns true if external power is connected.
    pub fn is_ac(&self) -> bool {
        matches!(self, PowerSource::Ac)
    }
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_source_labels() {
        assert_eq!(PowerSource::Ac.label(), "AC");
        assert_eq!(PowerSource::Battery.label(), "Battery");
        assert_eq!(PowerSource::Unknown.label(), "Unknown");
    }

    #[test]
    fn test_is_ac() {
        assert!(PowerSource::Ac.is_ac());
        assert!(!PowerSource::Battery.is_ac());
        assert!(!PowerSource::Unknown.is_ac());
    }
}
