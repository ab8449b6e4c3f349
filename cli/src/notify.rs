//! Desktop notification delivery.
//!
//! Fire-and-forget: the monitor does not retry dropped notifications,
//! it only logs the failure and moves on.

use notify_rust::{Notification, Urgency};

use crate::config::UserConfig;
use crate::engine::AlertEvent;

const APP_NAME: &str = "chargecap";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertUrgency {
    Low,
    Normal,
    Critical,
}

/// A notification ready to hand to the desktop notification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub summary: String,
    pub body: String,
    pub urgency: AlertUrgency,
    pub icon: String,
}

impl AlertMessage {
    /// Render an engine alert into user-facing text.
    pub fn from_event(event: &AlertEvent, config: &UserConfig) -> Self {
        match event {
            AlertEvent::LimitReached { percent, limit } => Self {
                summary: format!("{}% - Unplug Now", percent),
                body: format!(
                    "Battery hit your {}% limit. Unplug to protect battery life.",
                    limit
                ),
                urgency: AlertUrgency::Critical,
                icon: config.notify_icon_limit.clone(),
            },
            AlertEvent::TopUpComplete => Self {
                summary: "Battery Full".to_string(),
                body: "Reached 100%, safe to unplug now.".to_string(),
                urgency: AlertUrgency::Normal,
                icon: config.notify_icon_full.clone(),
            },
        }
    }

    /// Confirmation shown when the user arms top-up mode.
    pub fn top_up_activated(config: &UserConfig) -> Self {
        Self {
            summary: "Top Up activated".to_string(),
            body: "Will notify when the battery reaches 100%.".to_string(),
            urgency: AlertUrgency::Low,
            icon: config.notify_icon_full.clone(),
        }
    }
}

/// Notification sink. The desktop implementation talks to the session
/// notification service; tests substitute a recording fake.
pub trait Notify {
    fn send(&self, message: &AlertMessage) -> color_eyre::eyre::Result<()>;
}

pub struct DesktopNotifier;

impl Notify for DesktopNotifier {
    fn send(&self, message: &AlertMessage) -> color_eyre::eyre::Result<()> {
        Notification::new()
            .appname(APP_NAME)
            .summary(&message.summary)
            .body(&message.body)
            .icon(&message.icon)
            .urgency(match message.urgency {
                AlertUrgency::Low => Urgency::Low,
                AlertUrgency::Normal => Urgency::Normal,
                AlertUrgency::Critical => Urgency::Critical,
            })
            .show()?;
        Ok(())
    }
}
