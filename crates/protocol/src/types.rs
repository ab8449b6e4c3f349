use serde::{Deserialize, Serialize};

/// Maximum number of concurrent push subscribers the daemon accepts.
pub const MAX_SUBSCRIBERS: usize = 8;

/// Power source as carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerSourceKind {
    Ac,
    Battery,
    #[default]
    Unknown,
}

impl PowerSourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            PowerSourceKind::Ac => "AC",
            PowerSourceKind::Battery => "Battery",
            PowerSourceKind::Unknown => "Unknown",
        }
    }
}

/// The last alert the monitor fired, used for edge detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[default]
    None,
    LimitReached,
    TopUpComplete,
}

/// Point-in-time battery telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub percent: u8,
    pub power_source: PowerSourceKind,
    pub energy_wh: Option<f64>,
    pub energy_full_wh: Option<f64>,
    pub energy_design_wh: Option<f64>,
    pub voltage_v: Option<f64>,
    pub cycle_count: Option<u32>,
    pub watts: Option<f64>,
    pub health_percent: Option<f64>,
}

/// The monitor's durable state, as exposed to clients. Read-only from
/// the client side; mutation goes through [`crate::MonitorRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub limit: u8,
    pub top_up_active: bool,
    pub last_alert: AlertKind,
    pub last_percent: u8,
}

/// One poll's worth of status: telemetry plus monitor state.
///
/// `battery` is None when no battery device is available; the daemon
/// keeps running in that degraded mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: i64,
    pub battery: Option<BatterySnapshot>,
    pub monitor: MonitorSnapshot,
}

/// Daemon metadata returned by `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub version: String,
    pub protocol_version: u32,
    pub min_supported_version: u32,
    pub subscriber_count: usize,
    pub poll_interval_secs: u64,
    pub last_poll_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_kind_wire_format_is_stable() {
        // State files and IPC both carry these tags; renames break
        // persisted state.
        assert_eq!(
            serde_json::to_string(&AlertKind::LimitReached).unwrap(),
            "\"limit_reached\""
        );
        assert_eq!(
            serde_json::to_string(&AlertKind::TopUpComplete).unwrap(),
            "\"top_up_complete\""
        );
        assert_eq!(serde_json::to_string(&AlertKind::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_status_snapshot_round_trip() {
        let snapshot = StatusSnapshot {
            timestamp: 1756100000,
            battery: Some(BatterySnapshot {
                percent: 82,
                power_source: PowerSourceKind::Ac,
                energy_wh: Some(41.2),
                energy_full_wh: Some(50.3),
                energy_design_wh: Some(70.1),
                voltage_v: Some(12.4),
                cycle_count: Some(190),
                watts: Some(18.5),
                health_percent: Some(71.8),
            }),
            monitor: MonitorSnapshot {
                limit: 80,
                top_up_active: false,
                last_alert: AlertKind::LimitReached,
                last_percent: 82,
            },
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_degraded_snapshot_has_no_battery() {
        let json = r#"{"timestamp":0,"battery":null,"monitor":{"limit":80,"top_up_active":false,"last_alert":"none","last_percent":0}}"#;
        let parsed: StatusSnapshot = serde_json::from_str(json).unwrap();
        assert!(parsed.battery.is_none());
    }
}
