//! Sysfs-backed battery source.
//!
//! The kernel exposes one directory per power-supply device under
//! `/sys/class/power_supply`, each with a `type` file (`Battery`,
//! `Mains`, ...). Energy, voltage and power attributes arrive in
//! micro-units and are normalized to whole units here.

use std::fs;
use std::path::{Path, PathBuf};

use crate::battery::{BatteryReading, BatterySource, ReadError};
use crate::types::PowerSource;

const POWER_SUPPLY_PATH: &str = "/sys/class/power_supply";
const MICRO: f64 = 1_000_000.0;

pub struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    /// Create a source backed by the real sysfs tree.
    ///
    /// Fails with [`ReadError::NoBattery`] when no battery device is
    /// present at construction time.
    pub fn new() -> Result<Self, ReadError> {
        Self::with_root(POWER_SUPPLY_PATH)
    }

    /// Create a source backed by an arbitrary power-supply tree root.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, ReadError> {
        let source = Self { root: root.into() };
        source.battery_dir()?;
        Ok(source)
    }

    fn battery_dir(&self) -> Result<PathBuf, ReadError> {
        find_device_dir(&self.root, "Battery").ok_or(ReadError::NoBattery)
    }

    fn power_source(&self, battery_dir: &Path) -> PowerSource {
        if let Some(mains) = find_device_dir(&self.root, "Mains") {
            return match read_trimmed(&mains.join("online")).as_deref() {
                Some("1") => PowerSource::Ac,
                Some(_) => PowerSource::Battery,
                None => PowerSource::Unknown,
            };
        }

        // No mains device exposed; infer from the battery status.
        match read_trimmed(&battery_dir.join("status")).as_deref() {
            Some("Discharging") => PowerSource::Battery,
            Some("Charging") | Some("Full") | Some("Not charging") => PowerSource::Ac,
            _ => PowerSource::Unknown,
        }
    }
}

impl BatterySource for SysfsBattery {
    fn read(&self) -> Result<BatteryReading, ReadError> {
        // Re-discover on every read so a device that disappears (or
        // reappears after a dock/undock) is handled without restarting.
        let dir = self.battery_dir()?;

        let percent = read_trimmed(&dir.join("capacity"))
            .ok_or_else(|| ReadError::Percent("capacity attribute missing".into()))?
            .parse::<i64>()
            .map_err(|e| ReadError::Percent(e.to_string()))?
            .clamp(0, 100) as u8;

        let power_source = self.power_source(&dir);
        let discharging =
            read_trimmed(&dir.join("status")).as_deref() == Some("Discharging");

        // power_now is reported as a magnitude on most hardware; the
        // sign comes from the charge status.
        let watts = read_micro(&dir.join("power_now")).map(|w| {
            if discharging {
                -w.abs()
            } else {
                w.abs()
            }
        });

        Ok(BatteryReading {
            percent,
            power_source,
            energy_wh: read_micro(&dir.join("energy_now")),
            energy_full_wh: read_micro(&dir.join("energy_full")),
            energy_design_wh: read_micro(&dir.join("energy_full_design")),
            voltage_v: read_micro(&dir.join("voltage_now")),
            cycle_count: read_trimmed(&dir.join("cycle_count"))
                .and_then(|v| v.parse::<u32>().ok()),
            watts,
        })
    }
}

fn find_device_dir(root: &Path, device_type: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(kind) = read_trimmed(&path.join("type")) {
            if kind == device_type {
                return Some(path);
            }
        }
    }
    None
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_micro(path: &Path) -> Option<f64> {
    read_trimmed(path)?.parse::<i64>().ok().map(|v| v as f64 / MICRO)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::TempDir;

    fn write_attr(dir: &Path, name: &str, value: &str) {
        fs::write(dir.join(name), format!("{}\n", value)).unwrap();
    }

    fn fake_tree(ac_online: Option<&str>) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let bat = tmp.path().join("BAT1");
        fs::create_dir(&bat).unwrap();
        write_attr(&bat, "type", "Battery");
        write_attr(&bat, "capacity", "76");
        write_attr(&bat, "status", "Charging");
        write_attr(&bat, "energy_now", "38500000");
        write_attr(&bat, "energy_full", "51200000");
        write_attr(&bat, "energy_full_design", "70100000");
        write_attr(&bat, "voltage_now", "12400000");
        write_attr(&bat, "power_now", "24300000");
        write_attr(&bat, "cycle_count", "187");

        if let Some(online) = ac_online {
            let ac = tmp.path().join("ACAD");
            fs::create_dir(&ac).unwrap();
            write_attr(&ac, "type", "Mains");
            write_attr(&ac, "online", online);
        }
        tmp
    }

    #[test]
    fn test_full_reading_with_micro_unit_normalization() {
        let tmp = fake_tree(Some("1"));
        let source = SysfsBattery::with_root(tmp.path()).unwrap();
        let reading = source.read().unwrap();

        assert_eq!(reading.percent, 76);
        assert_eq!(reading.power_source, PowerSource::Ac);
        assert!((reading.energy_wh.unwrap() - 38.5).abs() < 0.001);
        assert!((reading.energy_full_wh.unwrap() - 51.2).abs() < 0.001);
        assert!((reading.energy_design_wh.unwrap() - 70.1).abs() < 0.001);
        assert!((reading.voltage_v.unwrap() - 12.4).abs() < 0.001);
        assert!((reading.watts.unwrap() - 24.3).abs() < 0.001);
        assert_eq!(reading.cycle_count, Some(187));
    }

    #[test]
    fn test_discharging_power_is_negative() {
        let tmp = fake_tree(Some("0"));
        let bat = tmp.path().join("BAT1");
        write_attr(&bat, "status", "Discharging");

        let source = SysfsBattery::with_root(tmp.path()).unwrap();
        let reading = source.read().unwrap();

        assert_eq!(reading.power_source, PowerSource::Battery);
        assert!((reading.watts.unwrap() + 24.3).abs() < 0.001);
    }

    #[test]
    fn test_partial_attributes_degrade_to_none() {
        let tmp = fake_tree(Some("1"));
        let bat = tmp.path().join("BAT1");
        fs::remove_file(bat.join("voltage_now")).unwrap();
        fs::remove_file(bat.join("cycle_count")).unwrap();
        write_attr(&bat, "energy_now", "not-a-number");

        let source = SysfsBattery::with_root(tmp.path()).unwrap();
        let reading = source.read().unwrap();

        assert_eq!(reading.percent, 76);
        assert_eq!(reading.voltage_v, None);
        assert_eq!(reading.cycle_count, None);
        assert_eq!(reading.energy_wh, None);
        // the rest is still there
        assert!(reading.energy_full_wh.is_some());
    }

    #[test]
    fn test_missing_capacity_is_a_read_error() {
        let tmp = fake_tree(Some("1"));
        fs::remove_file(tmp.path().join("BAT1/capacity")).unwrap();

        let source = SysfsBattery::with_root(tmp.path()).unwrap();
        assert!(matches!(source.read(), Err(ReadError::Percent(_))));
    }

    #[test]
    fn test_capacity_clamped_to_100() {
        let tmp = fake_tree(Some("1"));
        write_attr(&tmp.path().join("BAT1"), "capacity", "103");

        let source = SysfsBattery::with_root(tmp.path()).unwrap();
        assert_eq!(source.read().unwrap().percent, 100);
    }

    #[test]
    fn test_no_battery_device() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            SysfsBattery::with_root(tmp.path()),
            Err(ReadError::NoBattery)
        ));
    }

    #[test]
    fn test_power_source_inferred_without_mains_device() {
        let tmp = fake_tree(None);
        let source = SysfsBattery::with_root(tmp.path()).unwrap();
        assert_eq!(source.read().unwrap().power_source, PowerSource::Ac);

        write_attr(&tmp.path().join("BAT1"), "status", "Discharging");
        assert_eq!(source.read().unwrap().power_source, PowerSource::Battery);
    }
}
