use crate::process::run_checked;
use crate::RuntimeError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::info;

pub const UNIT_NAME: &str = "foundation.service";
const UNIT_DIR: &str = "/etc/systemd/system";
const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(60);

/// Keeps `foundation watch` running across reboots.
pub trait ServiceSupervisor: Send + Sync {
    fn install(&self, executable: &Path, home: &Path) -> Result<(), RuntimeError>;
}

pub struct Systemd {
    unit_dir: PathBuf,
}

impl Default for Systemd {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from(UNIT_DIR),
        }
    }
}

impl Systemd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(UNIT_NAME)
    }
}

impl ServiceSupervisor for Systemd {
    fn install(&self, executable: &Path, home: &Path) -> Result<(), RuntimeError> {
        if !is_root() {
            return Err(RuntimeError::PermissionDenied(format!(
                "writing {} requires root",
                self.unit_path().display()
            )));
        }
        fs::write(self.unit_path(), render_unit(executable, home))?;
        run_checked(
            Command::new("systemctl").arg("daemon-reload"),
            SYSTEMCTL_TIMEOUT,
        )?;
        run_checked(
            Command::new("systemctl").args(["enable", "--now", UNIT_NAME]),
            SYSTEMCTL_TIMEOUT,
        )?;
        info!("enabled {UNIT_NAME}");
        Ok(())
    }
}

#[allow(unsafe_code)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Unit file running the watcher; restarted whenever it exits.
pub fn render_unit(executable: &Path, home: &Path) -> String {
    format!(
        "[Unit]
Description=Foundation service watcher
After=docker.service network-online.target
Requires=docker.service

[Service]
ExecStart={exe} --home {home} watch
Restart=always
RestartSec=30
WorkingDirectory={home}
StandardOutput=journal
StandardError=journal

[Install]
WantedBy=multi-user.target
",
        exe = executable.display(),
        home = home.display(),
    )
}
