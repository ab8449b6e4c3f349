use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use chargecap_protocol::{
    MonitorRequest, MonitorResponse, MonitorStatus, StatusSnapshot, MIN_SUPPORTED_VERSION,
    PROTOCOL_VERSION,
};

use crate::monitor::socket_path;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    #[error(
        "Protocol version mismatch: this CLI speaks v{cli_version}, daemon {daemon_binary} \
         speaks v{daemon_version}. Restart the daemon or update chargecap."
    )]
    VersionMismatch {
        cli_version: u32,
        daemon_version: u32,
        daemon_binary: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Checks that this CLI and the running daemon can talk to each other.
pub fn check_version_compatibility(status: &MonitorStatus) -> Result<()> {
    if PROTOCOL_VERSION < status.min_supported_version
        || status.protocol_version < MIN_SUPPORTED_VERSION
    {
        return Err(ClientError::VersionMismatch {
            cli_version: PROTOCOL_VERSION,
            daemon_version: status.protocol_version,
            daemon_binary: status.version.clone(),
        });
    }
    Ok(())
}

pub struct MonitorClient {
    stream: UnixStream,
    read_buffer: Vec<u8>,
}

impl MonitorClient {
    pub fn connect() -> Result<Self> {
        let path = socket_path();
        let stream = UnixStream::connect(&path)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;
        Ok(Self {
            stream,
            read_buffer: Vec::with_capacity(8 * 1024),
        })
    }

    /// Connects and validates protocol compatibility in one step.
    pub fn connect_with_version_check() -> Result<Self> {
        let mut client = Self::connect()?;
        let status = client.get_status()?;
        check_version_compatibility(&status)?;
        Ok(client)
    }

    fn read_line_blocking(&mut self) -> Result<String> {
        let mut temp_buf = [0u8; 8192];
        loop {
            if let Some(pos) = self.read_buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = self.read_buffer.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line_bytes).to_string());
            }
            let n = self.stream.read(&mut temp_buf)?;
            if n == 0 {
                return Err(ClientError::Protocol("Connection closed".into()));
            }
            self.read_buffer.extend_from_slice(&temp_buf[..n]);
        }
    }

    fn send_request(&mut self, request: MonitorRequest) -> Result<MonitorResponse> {
        let json = request
            .to_json()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        writeln!(self.stream, "{}", json)?;
        self.stream.flush()?;

        let line = self.read_line_blocking()?;
        MonitorResponse::from_json(&line).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    pub fn get_status(&mut self) -> Result<MonitorStatus> {
        match self.send_request(MonitorRequest::GetStatus)? {
            MonitorResponse::Status(status) => Ok(status),
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub fn get_current(&mut self) -> Result<StatusSnapshot> {
        match self.send_request(MonitorRequest::GetCurrent)? {
            MonitorResponse::Current(snapshot) => Ok(snapshot),
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub fn set_limit(&mut self, limit: u8) -> Result<()> {
        match self.send_request(MonitorRequest::SetLimit { limit })? {
            MonitorResponse::Ok => Ok(()),
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub fn activate_top_up(&mut self) -> Result<()> {
        match self.send_request(MonitorRequest::ActivateTopUp)? {
            MonitorResponse::Ok => Ok(()),
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub fn cancel_top_up(&mut self) -> Result<()> {
        match self.send_request(MonitorRequest::CancelTopUp)? {
            MonitorResponse::Ok => Ok(()),
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub fn subscribe(&mut self) -> Result<()> {
        match self.send_request(MonitorRequest::Subscribe)? {
            MonitorResponse::Subscribed => Ok(()),
            MonitorResponse::SubscriptionRejected { reason } => {
                Err(ClientError::SubscriptionRejected(reason))
            }
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    /// Blocks until the daemon pushes the next status update.
    pub fn next_update(&mut self) -> Result<StatusSnapshot> {
        // Updates arrive on the poll interval, which can be well above
        // the default socket timeout.
        self.stream.set_read_timeout(None)?;
        loop {
            let line = self.read_line_blocking()?;
            match MonitorResponse::from_json(&line)
                .map_err(|e| ClientError::Protocol(e.to_string()))?
            {
                MonitorResponse::Update(snapshot) => return Ok(snapshot),
                MonitorResponse::Error(e) => return Err(ClientError::Daemon(e)),
                _ => continue,
            }
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        match self.send_request(MonitorRequest::Shutdown)? {
            MonitorResponse::Ok => Ok(()),
            MonitorResponse::Error(e) => Err(ClientError::Daemon(e)),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_status(protocol_version: u32, min_supported_version: u32) -> MonitorStatus {
        MonitorStatus {
            running: true,
            uptime_secs: 0,
            version: "0.3.1".to_string(),
            protocol_version,
            min_supported_version,
            subscriber_count: 0,
            poll_interval_secs: 30,
            last_poll_time: None,
        }
    }

    #[test]
    fn test_version_compatible_same_version() {
        let status = make_status(PROTOCOL_VERSION, MIN_SUPPORTED_VERSION);
        assert!(check_version_compatibility(&status).is_ok());
    }

    #[test]
    fn test_version_compatible_daemon_newer() {
        let status = make_status(PROTOCOL_VERSION + 1, MIN_SUPPORTED_VERSION);
        assert!(check_version_compatibility(&status).is_ok());
    }

    #[test]
    fn test_version_cli_too_old() {
        let status = make_status(PROTOCOL_VERSION + 1, PROTOCOL_VERSION + 1);
        assert!(matches!(
            check_version_compatibility(&status),
            Err(ClientError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_version_daemon_too_old() {
        if MIN_SUPPORTED_VERSION == 0 {
            return;
        }
        let status = make_status(MIN_SUPPORTED_VERSION - 1, MIN_SUPPORTED_VERSION - 1);
        assert!(matches!(
            check_version_compatibility(&status),
            Err(ClientError::VersionMismatch { .. })
        ));
    }
}
