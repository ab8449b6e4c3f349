//! systemd user-service management for the monitor daemon.

use std::path::{Path, PathBuf};
use std::process::Command;

use color_eyre::eyre::{eyre, Result};

const UNIT_NAME: &str = "chargecap.service";

pub fn unit_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("systemd/user")
        .join(UNIT_NAME)
}

fn render_unit(exe: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=chargecap battery charge-limit monitor\n\
         After=graphical-session.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={} daemon start --foreground\n\
         Restart=on-failure\n\
         RestartSec=10\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        exe.display()
    )
}

fn systemctl_user(args: &[&str]) -> Result<()> {
    let status = Command::new("systemctl").arg("--user").args(args).status()?;
    if !status.success() {
        return Err(eyre!("systemctl --user {} failed", args.join(" ")));
    }
    Ok(())
}

/// Write the unit file and enable the service for the current user.
pub fn install() -> Result<()> {
    let path = unit_path();
    let exe = std::env::current_exe()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, render_unit(&exe))?;

    systemctl_user(&["daemon-reload"])?;
    systemctl_user(&["enable", "--now", UNIT_NAME])?;

    println!("Monitor installed and started.");
    println!("Unit: {}", path.display());
    println!("\nTo uninstall: chargecap daemon uninstall");
    Ok(())
}

/// Stop and remove the user service.
pub fn uninstall() -> Result<()> {
    let path = unit_path();
    if !path.exists() {
        println!("Monitor is not installed.");
        return Ok(());
    }

    systemctl_user(&["disable", "--now", UNIT_NAME])?;
    std::fs::remove_file(&path)?;
    systemctl_user(&["daemon-reload"])?;

    println!("Monitor uninstalled.");
    Ok(())
}
