mod config;
mod engine;
mod logging;
mod monitor;
mod notify;
mod state;

use std::os::unix::process::CommandExt;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use chargecap_protocol::AlertKind;
use config::{config_path, ensure_dirs, LogLevel, UserConfig};
use logging::LogMode;
use monitor::{is_monitor_running, MonitorClient};

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show current battery and monitor status (default)
    Status {
        /// Output status as JSON
        #[arg(long)]
        json: bool,

        /// Keep printing status after every poll
        #[arg(short, long)]
        follow: bool,
    },

    /// Set the charge limit percentage
    Limit {
        /// New limit (1-100)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=100))]
        limit: u8,
    },

    /// Arm top-up mode: charge to 100% once, suppressing the limit alert
    #[command(name = "top-up")]
    TopUp {
        /// Cancel an active top-up instead
        #[arg(long)]
        cancel: bool,
    },

    /// Manage the background monitor daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Show or edit configuration
    Config {
        /// Print config file path
        #[arg(long)]
        path: bool,

        /// Reset config to defaults
        #[arg(long)]
        reset: bool,

        /// Open config file in $EDITOR
        #[arg(short, long)]
        edit: bool,
    },
}

#[derive(Debug, Subcommand)]
enum DaemonCommands {
    /// Start the monitor
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running monitor
    Stop,

    /// Check monitor status
    Status,

    /// View monitor logs
    Logs {
        /// Number of lines to show
        #[arg(short, long, default_value_t = 50)]
        lines: usize,

        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },

    /// Install the monitor as a systemd user service
    Install,

    /// Uninstall the systemd user service
    Uninstall,
}

/// Battery charge-limit monitor with desktop notifications
#[derive(Debug, Parser)]
#[command(name = "chargecap", version, verbatim_doc_comment)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = ensure_dirs();

    let cli = Cli::parse();
    let config = UserConfig::load();
    let log_level_override = cli.log_level.as_deref().map(LogLevel::from_str);

    match cli.command {
        Some(Commands::Status { json, follow }) => {
            let _guard = logging::init(config.log_level, LogMode::Stderr, log_level_override);
            run_status(json, follow)
        }
        Some(Commands::Limit { limit }) => {
            let _guard = logging::init(config.log_level, LogMode::Stderr, log_level_override);
            run_limit(limit)
        }
        Some(Commands::TopUp { cancel }) => {
            let _guard = logging::init(config.log_level, LogMode::Stderr, log_level_override);
            run_top_up(cancel)
        }
        Some(Commands::Daemon { command }) => {
            run_daemon_command(command, config.log_level, log_level_override)
        }
        Some(Commands::Config { path, reset, edit }) => {
            let _guard = logging::init(config.log_level, LogMode::Stderr, log_level_override);
            run_config(path, reset, edit)
        }
        None => {
            let _guard = logging::init(config.log_level, LogMode::Stderr, log_level_override);
            run_status(false, false)
        }
    }
}

fn connect_or_exit() -> MonitorClient {
    match MonitorClient::connect_with_version_check() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            if !is_monitor_running() {
                eprintln!("\nThe monitor is not running. Start it with:");
                eprintln!("  chargecap daemon start");
            }
            std::process::exit(1);
        }
    }
}

fn alert_label(alert: AlertKind) -> &'static str {
    match alert {
        AlertKind::None => "none",
        AlertKind::LimitReached => "limit reached",
        AlertKind::TopUpComplete => "top-up complete",
    }
}

fn print_snapshot(snapshot: &chargecap_protocol::StatusSnapshot) {
    println!("chargecap status");
    println!("{}", "-".repeat(40));

    match &snapshot.battery {
        Some(battery) => {
            println!("Charge:       {}%", battery.percent);
            println!("Source:       {}", battery.power_source.label());
            if let Some(watts) = battery.watts {
                println!("Power:        {:+.1} W", watts);
            }
            if let (Some(now), Some(full)) = (battery.energy_wh, battery.energy_full_wh) {
                println!("Energy:       {:.1} / {:.1} Wh", now, full);
            }
            if let Some(design) = battery.energy_design_wh {
                println!("Design cap:   {:.0} Wh", design);
            }
            if let Some(health) = battery.health_percent {
                println!("Health:       {:.0}%", health);
            }
            if let Some(voltage) = battery.voltage_v {
                println!("Voltage:      {:.2} V", voltage);
            }
            if let Some(cycles) = battery.cycle_count {
                println!("Cycles:       {}", cycles);
            }
        }
        None => {
            println!("Battery:      unknown (no battery device)");
        }
    }

    println!();
    println!("Limit:        {}%", snapshot.monitor.limit);
    println!(
        "Top-up:       {}",
        if snapshot.monitor.top_up_active {
            "active"
        } else {
            "inactive"
        }
    );
    println!("Last alert:   {}", alert_label(snapshot.monitor.last_alert));
}

fn run_status(json: bool, follow: bool) -> Result<()> {
    let mut client = connect_or_exit();

    if follow {
        client.subscribe()?;
        loop {
            let snapshot = client.next_update()?;
            if json {
                println!("{}", serde_json::to_string(&snapshot)?);
            } else {
                let battery = snapshot
                    .battery
                    .as_ref()
                    .map(|b| format!("{}% on {}", b.percent, b.power_source.label()))
                    .unwrap_or_else(|| "unknown".to_string());
                println!(
                    "{}  {}  limit {}%  top-up {}",
                    chrono::DateTime::from_timestamp(snapshot.timestamp, 0)
                        .map(|dt| dt.format("%H:%M:%S").to_string())
                        .unwrap_or_default(),
                    battery,
                    snapshot.monitor.limit,
                    if snapshot.monitor.top_up_active { "on" } else { "off" },
                );
            }
        }
    }

    let snapshot = client.get_current()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    print_snapshot(&snapshot);

    let status = client.get_status()?;
    println!();
    println!(
        "Daemon:       v{}, up {}s, polling every {}s",
        status.version, status.uptime_secs, status.poll_interval_secs
    );

    Ok(())
}

fn run_limit(limit: u8) -> Result<()> {
    let mut client = connect_or_exit();
    client.set_limit(limit)?;
    println!("Charge limit set to {}%.", limit);
    Ok(())
}

fn run_top_up(cancel: bool) -> Result<()> {
    let mut client = connect_or_exit();
    if cancel {
        client.cancel_top_up()?;
        println!("Top-up cancelled.");
    } else {
        client.activate_top_up()?;
        println!("Top-up armed: you'll be notified at 100%.");
    }
    Ok(())
}

fn run_daemon_command(
    command: DaemonCommands,
    log_level: LogLevel,
    log_level_override: Option<LogLevel>,
) -> Result<()> {
    use monitor::{latest_log_file, run_monitor, service, socket_path};

    match command {
        DaemonCommands::Start { foreground } => {
            if is_monitor_running() {
                println!("Monitor is already running.");
                return Ok(());
            }

            if foreground {
                let _guard = logging::init(log_level, LogMode::Both, log_level_override);
                println!("Starting monitor in foreground...");
                println!("Press Ctrl+C to stop.");
                run_monitor(true, log_level, log_level_override)
                    .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
            } else {
                // File logging is set up inside run_monitor, after the fork.
                println!("Starting monitor...");
                run_monitor(false, log_level, log_level_override)
                    .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
                std::thread::sleep(Duration::from_millis(500));

                let mut started = false;
                for _ in 0..3 {
                    if is_monitor_running() {
                        started = true;
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }

                if started {
                    println!("Monitor started.");
                    println!("Socket: {:?}", socket_path());
                } else {
                    println!("Monitor may have failed to start. Check logs:");
                    println!("  chargecap daemon logs");
                }
            }
        }
        DaemonCommands::Stop => {
            if !is_monitor_running() {
                println!("Monitor is not running.");
                return Ok(());
            }

            match MonitorClient::connect() {
                Ok(mut client) => {
                    client.shutdown()?;
                    println!("Monitor stopped.");
                }
                Err(e) => {
                    eprintln!("Failed to connect to monitor: {}", e);
                    std::process::exit(1);
                }
            }
        }
        DaemonCommands::Status => {
            if !is_monitor_running() {
                println!("Monitor is not running.");
                return Ok(());
            }

            match MonitorClient::connect() {
                Ok(mut client) => {
                    let status = client.get_status()?;
                    println!("Monitor Status");
                    println!("{}", "-".repeat(40));
                    println!("Running:      yes");
                    println!("Version:      {}", status.version);
                    println!("Uptime:       {} seconds", status.uptime_secs);
                    println!("Interval:     {} seconds", status.poll_interval_secs);
                    println!("Subscribers:  {}", status.subscriber_count);
                    if let Some(last) = status.last_poll_time {
                        if let Some(dt) = chrono::DateTime::from_timestamp(last, 0) {
                            println!("Last poll:    {}", dt.format("%Y-%m-%d %H:%M:%S UTC"));
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Failed to connect to monitor: {}", e);
                    std::process::exit(1);
                }
            }
        }
        DaemonCommands::Logs { lines, follow } => {
            let Some(path) = latest_log_file() else {
                println!("No log file found in {:?}", config::runtime_dir());
                return Ok(());
            };

            if follow {
                // Replace this process with tail so Ctrl+C works properly.
                let err = std::process::Command::new("tail")
                    .args(["-f", "-n", &lines.to_string()])
                    .arg(&path)
                    .exec();
                // exec() only returns if it fails
                return Err(err.into());
            } else {
                std::process::Command::new("tail")
                    .args(["-n", &lines.to_string()])
                    .arg(&path)
                    .status()?;
            }
        }
        DaemonCommands::Install => service::install()?,
        DaemonCommands::Uninstall => service::uninstall()?,
    }

    Ok(())
}

fn run_config(path: bool, reset: bool, edit: bool) -> Result<()> {
    let config_file = config_path();

    if path {
        println!("{}", config_file.display());
        return Ok(());
    }

    if reset {
        let config = UserConfig::default();
        config.save()?;
        println!("Config reset to defaults at: {}", config_file.display());
        return Ok(());
    }

    if edit {
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "nano".to_string());

        if !config_file.exists() {
            let config = UserConfig::default();
            config.save()?;
        }

        std::process::Command::new(editor)
            .arg(&config_file)
            .status()?;

        return Ok(());
    }

    let config = UserConfig::load();
    println!("Config file: {}", config_file.display());
    println!();
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
