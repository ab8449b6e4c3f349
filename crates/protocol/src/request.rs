use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorRequest {
    GetStatus,
    GetCurrent,
    SetLimit { limit: u8 },
    ActivateTopUp,
    CancelTopUp,
    Subscribe,
    Unsubscribe,
    Shutdown,
}

impl MonitorRequest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
