mod request;
mod response;
mod types;
mod version;

pub use request::MonitorRequest;
pub use response::MonitorResponse;
pub use types::{
    AlertKind, BatterySnapshot, MonitorSnapshot, MonitorStatus, PowerSourceKind, StatusSnapshot,
    MAX_SUBSCRIBERS,
};
pub use version::{MIN_SUPPORTED_VERSION, PROTOCOL_VERSION};
