mod client;
mod server;
pub mod service;

pub use client::{ClientError, MonitorClient};
pub use server::run_monitor;
#[allow(unused_imports)]
pub use server::MonitorError;

use std::path::PathBuf;

use crate::config::runtime_dir;

const SOCKET_NAME: &str = "chargecap.sock";

pub fn socket_path() -> PathBuf {
    runtime_dir().join(SOCKET_NAME)
}

pub fn is_monitor_running() -> bool {
    MonitorClient::connect().is_ok()
}

/// Most recent rolled log file in the runtime dir, if any.
pub fn latest_log_file() -> Option<PathBuf> {
    let entries = std::fs::read_dir(runtime_dir()).ok()?;
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("chargecap") && n.ends_with(".log"))
        })
        .max_by_key(|p| {
            p.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
}
