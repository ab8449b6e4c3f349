//! The monitor daemon: poll, evaluate, persist, notify, serve IPC.
//!
//! One logical thread of control. A poll-evaluate-persist-notify cycle
//! always runs to completion before the next begins; client commands
//! are queued through the same select loop and never mutate state
//! concurrently. Transient hardware or state errors are logged and
//! absorbed here; the loop exits only on an explicit shutdown request
//! or signal.

use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use chargecap_platform::{BatteryReading, BatterySource, PowerSource, ReadError, SysfsBattery};
use chargecap_protocol::{
    BatterySnapshot, MonitorRequest, MonitorResponse, MonitorStatus, PowerSourceKind,
    StatusSnapshot, MAX_SUBSCRIBERS, MIN_SUPPORTED_VERSION, PROTOCOL_VERSION,
};

use crate::config::{runtime_dir, state_path, UserConfig};
use crate::engine::{self, AlertEvent};
use crate::monitor::socket_path;
use crate::notify::{AlertMessage, DesktopNotifier, Notify};
use crate::state::{MonitorState, StateStore};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Already running")]
    AlreadyRunning,

    #[error("Failed to daemonize: {0}")]
    Daemonize(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

type ClientId = u64;

enum ClientMessage {
    Request { request: MonitorRequest },
    Disconnect,
}

struct ClientHandle {
    response_tx: mpsc::Sender<MonitorResponse>,
    is_subscriber: bool,
}

struct MonitorDaemon<S: BatterySource, N: Notify> {
    source: Option<S>,
    /// Re-runs device discovery when `source` is gone.
    discover: fn() -> Option<S>,
    store: StateStore,
    state: MonitorState,
    notifier: N,
    config: UserConfig,
    last_reading: Option<BatteryReading>,
    last_poll_time: Option<i64>,
    start_time: Instant,
}

fn discover_sysfs() -> Option<SysfsBattery> {
    SysfsBattery::new().ok()
}

impl<S: BatterySource, N: Notify> MonitorDaemon<S, N> {
    fn new(store: StateStore, discover: fn() -> Option<S>, notifier: N, config: UserConfig) -> Self {
        let state = store.load_or_default();

        let source = discover();
        if source.is_none() {
            warn!("No battery device, reporting unknown status");
        }

        Self {
            source,
            discover,
            store,
            state,
            notifier,
            config,
            last_reading: None,
            last_poll_time: None,
            start_time: Instant::now(),
        }
    }

    /// One poll cycle: read telemetry, run the threshold engine, and
    /// apply its side effects (persist + notify).
    fn poll(&mut self) {
        // A battery can appear after startup (or after an undock), so
        // retry discovery on every poll while we have no source.
        if self.source.is_none() {
            self.source = (self.discover)();
            if self.source.is_some() {
                info!("Battery device appeared");
            }
        }

        let Some(source) = &self.source else {
            return;
        };

        let reading = match source.read() {
            Ok(reading) => reading,
            Err(ReadError::NoBattery) => {
                warn!("Battery device disappeared, reporting unknown status");
                self.source = None;
                self.last_reading = None;
                return;
            }
            Err(e) => {
                // Transient: skip this poll without touching state and
                // retry on the next interval.
                warn!(error = %e, "Battery read failed, skipping poll");
                return;
            }
        };

        self.last_poll_time = Some(chrono::Utc::now().timestamp());

        let before = self.state;
        let event = engine::evaluate(&reading, &mut self.state);

        debug!(
            percent = reading.percent,
            source = %reading.power_source,
            limit = self.state.limit,
            top_up = self.state.top_up_active,
            "Polled battery"
        );

        self.last_reading = Some(reading);

        if self.state != before {
            self.persist();
        }

        if let Some(event) = event {
            self.dispatch(&event);
        }
    }

    /// Write-through persistence. A failed save is logged, never fatal:
    /// worst case the next crossing re-fires after a restart.
    fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            error!(error = %e, path = ?self.store.path(), "Failed to persist state");
        }
    }

    fn dispatch(&self, event: &AlertEvent) {
        info!(?event, "Alert fired");
        let message = AlertMessage::from_event(event, &self.config);
        if let Err(e) = self.notifier.send(&message) {
            warn!(error = %e, "Failed to deliver notification");
        }
    }

    fn notify_info(&self, message: &AlertMessage) {
        if let Err(e) = self.notifier.send(message) {
            warn!(error = %e, "Failed to deliver notification");
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            timestamp: chrono::Utc::now().timestamp(),
            battery: self.last_reading.as_ref().map(battery_snapshot),
            monitor: self.state.snapshot(),
        }
    }

    fn status(&self, subscriber_count: usize) -> MonitorStatus {
        MonitorStatus {
            running: true,
            uptime_secs: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
            min_supported_version: MIN_SUPPORTED_VERSION,
            subscriber_count,
            poll_interval_secs: self.config.poll_interval_secs,
            last_poll_time: self.last_poll_time,
        }
    }

    fn handle_request(&mut self, request: &MonitorRequest, subscriber_count: usize) -> MonitorResponse {
        match request {
            MonitorRequest::GetStatus => MonitorResponse::Status(self.status(subscriber_count)),
            MonitorRequest::GetCurrent => MonitorResponse::Current(self.snapshot()),
            MonitorRequest::SetLimit { limit } => {
                if *limit < 1 || *limit > 100 {
                    return MonitorResponse::Error(format!(
                        "limit must be between 1 and 100, got {}",
                        limit
                    ));
                }
                self.state.limit = *limit;
                // Re-arm so a limit raised past the current charge can
                // still fire when the battery reaches it.
                self.state.last_alert = chargecap_protocol::AlertKind::None;
                self.persist();
                info!(limit, "Charge limit updated");
                MonitorResponse::Ok
            }
            MonitorRequest::ActivateTopUp => {
                engine::activate_top_up(&mut self.state);
                self.persist();
                info!("Top-up mode activated");
                self.notify_info(&AlertMessage::top_up_activated(&self.config));
                MonitorResponse::Ok
            }
            MonitorRequest::CancelTopUp => {
                engine::cancel_top_up(&mut self.state);
                self.persist();
                info!("Top-up mode cancelled");
                MonitorResponse::Ok
            }
            MonitorRequest::Shutdown => MonitorResponse::Ok,
            MonitorRequest::Subscribe | MonitorRequest::Unsubscribe => {
                MonitorResponse::Error("Handled separately".to_string())
            }
        }
    }
}

fn battery_snapshot(reading: &BatteryReading) -> BatterySnapshot {
    BatterySnapshot {
        percent: reading.percent,
        power_source: match reading.power_source {
            PowerSource::Ac => PowerSourceKind::Ac,
            PowerSource::Battery => PowerSourceKind::Battery,
            PowerSource::Unknown => PowerSourceKind::Unknown,
        },
        energy_wh: reading.energy_wh,
        energy_full_wh: reading.energy_full_wh,
        energy_design_wh: reading.energy_design_wh,
        voltage_v: reading.voltage_v,
        cycle_count: reading.cycle_count,
        watts: reading.watts,
        health_percent: reading.health_percent(),
    }
}

async fn client_reader_task(
    mut reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    msg_tx: mpsc::Sender<(ClientId, ClientMessage)>,
    client_id: ClientId,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                let _ = msg_tx.send((client_id, ClientMessage::Disconnect)).await;
                break;
            }
            Ok(_) => match MonitorRequest::from_json(line.trim()) {
                Ok(request) => {
                    if msg_tx
                        .send((client_id, ClientMessage::Request { request }))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!(client_id, error = %e, "Invalid request from client");
                }
            },
            Err(e) => {
                debug!(client_id, error = %e, "Client read error");
                let _ = msg_tx.send((client_id, ClientMessage::Disconnect)).await;
                break;
            }
        }
    }
}

async fn client_writer_task(
    mut writer: tokio::net::unix::OwnedWriteHalf,
    mut response_rx: mpsc::Receiver<MonitorResponse>,
) {
    while let Some(response) = response_rx.recv().await {
        let json = match response.to_json() {
            Ok(j) => j,
            Err(_) => continue,
        };
        if writer
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

pub fn run_monitor(
    foreground: bool,
    log_level: crate::config::LogLevel,
    log_level_override: Option<crate::config::LogLevel>,
) -> Result<()> {
    let socket = socket_path();

    if socket.exists() {
        if crate::monitor::is_monitor_running() {
            return Err(MonitorError::AlreadyRunning);
        }
        fs::remove_file(&socket)?;
    }

    fs::create_dir_all(runtime_dir())?;

    if !foreground {
        match daemonize::Daemonize::new()
            .working_directory(runtime_dir())
            .start()
        {
            Ok(_) => {}
            Err(e) => return Err(MonitorError::Daemonize(e.to_string())),
        }
        let guard =
            crate::logging::init(log_level, crate::logging::LogMode::File, log_level_override);
        // The guard owns the log writer; it must stay alive until the
        // daemonized process exits, so leak it here.
        std::mem::forget(guard);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Monitor starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run_monitor_async(socket))
}

async fn run_monitor_async(socket: std::path::PathBuf) -> Result<()> {
    let config = UserConfig::load();
    let mut daemon = MonitorDaemon::new(
        StateStore::new(state_path()),
        discover_sysfs,
        DesktopNotifier,
        config,
    );

    let listener = UnixListener::bind(&socket)?;
    info!(socket = ?socket, "Listening for connections");

    let poll_interval = Duration::from_secs(daemon.config.poll_interval_secs.max(1));
    let mut poll_tick = tokio::time::interval(poll_interval);
    poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let (msg_tx, mut msg_rx) = mpsc::channel::<(ClientId, ClientMessage)>(64);
    let mut clients: HashMap<ClientId, ClientHandle> = HashMap::new();
    let mut next_client_id: ClientId = 1;
    let mut shutdown_requested = false;

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                daemon.poll();

                let subscriber_count = clients.values().filter(|c| c.is_subscriber).count();
                if subscriber_count > 0 {
                    let update = MonitorResponse::Update(daemon.snapshot());

                    let mut disconnected = Vec::new();
                    for (id, client) in &clients {
                        if client.is_subscriber
                            && client.response_tx.send(update.clone()).await.is_err()
                        {
                            disconnected.push(*id);
                        }
                    }
                    for id in disconnected {
                        clients.remove(&id);
                        debug!(client_id = id, "Removed disconnected subscriber");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let client_id = next_client_id;
                        next_client_id += 1;
                        debug!(client_id, "Client connected");

                        let (reader, writer) = stream.into_split();
                        let (response_tx, response_rx) = mpsc::channel::<MonitorResponse>(16);

                        clients.insert(client_id, ClientHandle {
                            response_tx,
                            is_subscriber: false,
                        });

                        let msg_tx_clone = msg_tx.clone();
                        tokio::task::spawn_local(client_reader_task(
                            BufReader::new(reader),
                            msg_tx_clone,
                            client_id,
                        ));
                        tokio::task::spawn_local(client_writer_task(writer, response_rx));
                    }
                    Err(e) => {
                        error!(error = %e, "Socket accept error");
                    }
                }
            }
            Some((client_id, msg)) = msg_rx.recv() => {
                match msg {
                    ClientMessage::Disconnect => {
                        if clients.remove(&client_id).is_some() {
                            debug!(client_id, count = clients.len(), "Client disconnected");
                        }
                    }
                    ClientMessage::Request { request } => {
                        debug!(client_id, request = ?request, "Handling request");

                        let response = match &request {
                            MonitorRequest::Subscribe => {
                                let subscriber_count = clients.values().filter(|c| c.is_subscriber).count();
                                if subscriber_count >= MAX_SUBSCRIBERS {
                                    MonitorResponse::SubscriptionRejected {
                                        reason: format!("Maximum subscribers ({}) reached", MAX_SUBSCRIBERS),
                                    }
                                } else if let Some(client) = clients.get_mut(&client_id) {
                                    client.is_subscriber = true;
                                    info!(client_id, count = subscriber_count + 1, "Subscriber added");
                                    MonitorResponse::Subscribed
                                } else {
                                    MonitorResponse::Error("Client not found".to_string())
                                }
                            }
                            MonitorRequest::Unsubscribe => {
                                if let Some(client) = clients.get_mut(&client_id) {
                                    client.is_subscriber = false;
                                }
                                MonitorResponse::Unsubscribed
                            }
                            MonitorRequest::Shutdown => {
                                info!("Shutdown requested by client");
                                shutdown_requested = true;
                                MonitorResponse::Ok
                            }
                            _ => {
                                let subscriber_count = clients.values().filter(|c| c.is_subscriber).count();
                                daemon.handle_request(&request, subscriber_count)
                            }
                        };

                        if let Some(client) = clients.get(&client_id) {
                            let _ = client.response_tx.send(response).await;
                        }

                        if shutdown_requested {
                            break;
                        }
                    }
                }
            }
        }
    }

    info!("Monitor shutting down");
    fs::remove_file(&socket).ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::VecDeque;

    use chargecap_protocol::AlertKind;
    use tempfile::TempDir;

    type Reading = std::result::Result<BatteryReading, ReadError>;

    struct ScriptedSource {
        readings: RefCell<VecDeque<Reading>>,
    }

    impl ScriptedSource {
        fn new(readings: Vec<Reading>) -> Self {
            Self {
                readings: RefCell::new(readings.into()),
            }
        }
    }

    impl BatterySource for ScriptedSource {
        fn read(&self) -> Reading {
            self.readings.borrow_mut().pop_front().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<AlertMessage>>,
    }

    impl Notify for RecordingNotifier {
        fn send(&self, message: &AlertMessage) -> color_eyre::eyre::Result<()> {
            self.sent.borrow_mut().push(message.clone());
            Ok(())
        }
    }

    fn ac(percent: u8) -> Reading {
        Ok(BatteryReading {
            percent,
            power_source: PowerSource::Ac,
            ..Default::default()
        })
    }

    fn test_daemon(tmp: &TempDir) -> MonitorDaemon<ScriptedSource, RecordingNotifier> {
        MonitorDaemon::new(
            StateStore::new(tmp.path().join("state.json")),
            || None,
            RecordingNotifier::default(),
            UserConfig::default(),
        )
    }

    #[test]
    fn test_poll_fires_alert_once_and_persists() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = test_daemon(&tmp);
        daemon.source = Some(ScriptedSource::new(vec![ac(75), ac(80), ac(82)]));

        daemon.poll();
        assert!(daemon.notifier.sent.borrow().is_empty());

        // Crossing fires once; staying above the limit does not re-fire.
        daemon.poll();
        daemon.poll();
        assert_eq!(daemon.notifier.sent.borrow().len(), 1);
        assert_eq!(daemon.notifier.sent.borrow()[0].summary, "80% - Unplug Now");

        // The crossing was written through to disk.
        let persisted = daemon.store.load().unwrap();
        assert_eq!(persisted.last_alert, AlertKind::LimitReached);
        assert_eq!(persisted.last_percent, 82);
    }

    #[test]
    fn test_poll_persists_only_on_change() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = test_daemon(&tmp);
        daemon.source = Some(ScriptedSource::new(vec![ac(50), ac(50)]));

        daemon.poll();
        assert!(daemon.store.path().exists());

        // A no-op poll must not rewrite the file.
        fs::remove_file(daemon.store.path()).unwrap();
        daemon.poll();
        assert!(!daemon.store.path().exists());
    }

    #[test]
    fn test_transient_read_error_skips_poll() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = test_daemon(&tmp);
        daemon.source = Some(ScriptedSource::new(vec![
            Err(ReadError::Percent("garbage".into())),
            ac(90),
        ]));

        daemon.poll();
        assert_eq!(daemon.state, MonitorState::default());
        assert!(daemon.last_reading.is_none());
        assert!(daemon.last_poll_time.is_none());
        assert!(daemon.notifier.sent.borrow().is_empty());

        // The next interval recovers and evaluates normally.
        daemon.poll();
        assert_eq!(daemon.notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn test_vanished_battery_degrades_to_unknown() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = test_daemon(&tmp);
        daemon.source = Some(ScriptedSource::new(vec![Err(ReadError::NoBattery)]));

        daemon.poll();
        assert!(daemon.source.is_none());
        assert!(daemon.snapshot().battery.is_none());
    }

    #[test]
    fn test_set_limit_rejected_leaves_state_unchanged() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = test_daemon(&tmp);

        let response = daemon.handle_request(&MonitorRequest::SetLimit { limit: 0 }, 0);
        assert!(matches!(response, MonitorResponse::Error(_)));
        assert_eq!(daemon.state, MonitorState::default());
        assert!(!daemon.store.path().exists());
    }

    #[test]
    fn test_set_limit_rearms_and_persists() {
        let tmp = TempDir::new().unwrap();
        let mut daemon = test_daemon(&tmp);
        daemon.state.last_alert = AlertKind::LimitReached;

        let response = daemon.handle_request(&MonitorRequest::SetLimit { limit: 90 }, 0);
        assert!(matches!(response, MonitorResponse::Ok));
        assert_eq!(daemon.state.limit, 90);
        assert_eq!(daemon.state.last_alert, AlertKind::None);
        assert_eq!(daemon.store.load().unwrap().limit, 90);
    }

    #[test]
    fn test_battery_snapshot_conversion() {
        let reading = BatteryReading {
            percent: 76,
            power_source: PowerSource::Ac,
            energy_wh: Some(38.5),
            energy_full_wh: Some(51.2),
            energy_design_wh: Some(70.1),
            voltage_v: Some(12.4),
            cycle_count: Some(187),
            watts: Some(24.3),
        };

        let snapshot = battery_snapshot(&reading);
        assert_eq!(snapshot.percent, 76);
        assert_eq!(snapshot.power_source, PowerSourceKind::Ac);
        assert_eq!(snapshot.cycle_count, Some(187));
        // 51.2 / 70.1 of design capacity left
        assert!((snapshot.health_percent.unwrap() - 73.04).abs() < 0.01);
    }

    #[test]
    fn test_battery_snapshot_partial_reading() {
        let reading = BatteryReading {
            percent: 50,
            power_source: PowerSource::Battery,
            ..Default::default()
        };

        let snapshot = battery_snapshot(&reading);
        assert_eq!(snapshot.power_source, PowerSourceKind::Battery);
        assert!(snapshot.energy_wh.is_none());
        assert!(snapshot.health_percent.is_none());
    }
}
