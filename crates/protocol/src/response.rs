use serde::{Deserialize, Serialize};

use crate::types::{MonitorStatus, StatusSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorResponse {
    Status(MonitorStatus),
    Current(StatusSnapshot),
    Ok,
    Error(String),
    Subscribed,
    Unsubscribed,
    SubscriptionRejected { reason: String },
    Update(StatusSnapshot),
}

impl MonitorResponse {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
