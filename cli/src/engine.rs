//! The threshold state machine.
//!
//! [`evaluate`] is a pure transition function: it consumes one battery
//! reading plus the current durable state, mutates the state, and
//! returns the alert to fire, if any. All I/O (polling, persistence,
//! notification delivery) lives in the monitor loop, which keeps this
//! logic trivially testable.
//!
//! Alerts are edge-triggered: each fires once on the transition into
//! its condition and re-arms only after the condition has lapsed
//! (unplugged and drained below the limit, or dropped below 100% after
//! a completed top-up).

use chargecap_platform::BatteryReading;
use chargecap_protocol::AlertKind;

use crate::state::MonitorState;

/// An alert the monitor loop should deliver to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    /// The battery reached the configured charge limit.
    LimitReached { percent: u8, limit: u8 },
    /// A top-up cycle reached 100%.
    TopUpComplete,
}

/// Evaluate one poll.
///
/// Notifications only fire while on AC power; a battery sitting above
/// the limit while discharging needs no "unplug now" nag. Unplug
/// resets are evaluated before firing rules, and `last_percent` is
/// updated unconditionally.
pub fn evaluate(reading: &BatteryReading, state: &mut MonitorState) -> Option<AlertEvent> {
    let percent = reading.percent;
    let on_ac = reading.power_source.is_ac();

    // Unplug reset: discharging below the limit re-arms the limit
    // alert for the next charge cycle. Applies in top-up mode too.
    if !on_ac && percent < state.limit && state.last_alert != AlertKind::None {
        state.last_alert = AlertKind::None;
    }

    // A completed top-up re-arms once the charge drops back below 100.
    if state.last_alert == AlertKind::TopUpComplete && percent < 100 {
        state.last_alert = AlertKind::None;
    }

    let mut event = None;
    if on_ac {
        if state.top_up_active {
            if percent >= 100 && state.last_alert != AlertKind::TopUpComplete {
                state.last_alert = AlertKind::TopUpComplete;
                // The one-shot exception consumes itself.
                state.top_up_active = false;
                event = Some(AlertEvent::TopUpComplete);
            }
        } else if percent >= state.limit && state.last_alert != AlertKind::LimitReached {
            state.last_alert = AlertKind::LimitReached;
            event = Some(AlertEvent::LimitReached {
                percent,
                limit: state.limit,
            });
        }
    }

    state.last_percent = percent;
    event
}

/// Arm top-up mode: suppress the limit alert until 100% is reached
/// once. Clearing `last_alert` lets the 100% edge fire even when the
/// battery already sits above the normal limit.
pub fn activate_top_up(state: &mut MonitorState) {
    state.top_up_active = true;
    state.last_alert = AlertKind::None;
}

/// Cancel top-up mode and re-arm the normal limit alert.
pub fn cancel_top_up(state: &mut MonitorState) {
    state.top_up_active = false;
    state.last_alert = AlertKind::None;
}
