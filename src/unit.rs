//! Rendering and installing the worker's user-level service unit.
use std::{
    fs, io,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    config::SupervisorSettings,
    constants::{DAEMON_RELOAD_TIMEOUT, UNIT_WANTED_BY},
    error::SupervisorError,
    service_manager::ServiceManagerClient,
    strategy::ExitInfo,
};

/// Contents of the worker's service unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDefinition {
    pub description: String,
    /// Full command line, interpreter first.
    pub exec_start: String,
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
    pub wanted_by: String,
}

impl UnitDefinition {
    /// Unit running the configured worker out of `install_dir`.
    pub fn for_worker(settings: &SupervisorSettings, install_dir: &Path) -> Self {
        let worker = install_dir.join(&settings.worker_executable);
        // Older user managers refuse relative ExecStart binaries.
        let interpreter = if Path::new(&settings.interpreter).is_absolute() {
            settings.interpreter.clone()
        } else {
            format!("/usr/bin/env {}", settings.interpreter)
        };

        Self {
            description: format!("Background worker ({})", settings.unit_name),
            exec_start: format!("{interpreter} {}", worker.display()),
            working_dir: install_dir.to_path_buf(),
            log_path: settings.log_path.clone(),
            wanted_by: UNIT_WANTED_BY.to_string(),
        }
    }

    /// Renders the unit file.
    pub fn render(&self) -> String {
        let log = self.log_path.display();
        format!(
            r#"[Unit]
Description={description}
After={wanted_by}

[Service]
Type=simple
ExecStart={exec_start}
WorkingDirectory={working_dir}
Environment="DBUS_SESSION_BUS_ADDRESS=unix:path=/run/user/%U/bus"
Restart=always
RestartSec=10
TimeoutStopSec=15
KillMode=mixed
KillSignal=SIGTERM
StartLimitIntervalSec=300
StartLimitBurst=10
StandardOutput=append:{log}
StandardError=append:{log}

[Install]
WantedBy={wanted_by}
"#,
            description = self.description,
            wanted_by = self.wanted_by,
            exec_start = self.exec_start,
            working_dir = self.working_dir.display(),
        )
    }
}

/// Where an installed unit ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledUnit {
    pub unit_path: PathBuf,
    /// Enablement symlink inside `<wanted_by>.wants/`.
    pub wants_link: PathBuf,
    /// Result of asking the manager to re-read its units.
    pub reload: ExitInfo,
}

/// Writes the unit file, enables it and reloads the service manager.
///
/// Re-installing replaces both the file and the symlink. A failed reload is
/// logged and reported in [`InstalledUnit::reload`] but is not an error; the
/// manager picks the unit up on its next start anyway.
pub fn install_unit(
    settings: &SupervisorSettings,
    definition: &UnitDefinition,
    client: &dyn ServiceManagerClient,
) -> Result<InstalledUnit, SupervisorError> {
    let unit = settings.unit_name.as_str();
    let fail = |source: io::Error| SupervisorError::UnitInstallError {
        unit: unit.to_string(),
        source,
    };

    fs::create_dir_all(&settings.unit_dir).map_err(fail)?;
    if let Some(log_dir) = definition.log_path.parent() {
        fs::create_dir_all(log_dir).map_err(fail)?;
    }

    let unit_path = settings.unit_path();
    fs::write(&unit_path, definition.render()).map_err(fail)?;

    let wants_dir = settings
        .unit_dir
        .join(format!("{}.wants", definition.wanted_by));
    fs::create_dir_all(&wants_dir).map_err(fail)?;
    let wants_link = wants_dir.join(unit);
    replace_symlink(&unit_path, &wants_link).map_err(fail)?;
    info!("Installed unit {}", unit_path.display());

    let reload = client.reload(DAEMON_RELOAD_TIMEOUT)?;
    if !reload.is_success() {
        warn!("Could not reload the user service manager: {reload}");
    }

    Ok(InstalledUnit {
        unit_path,
        wants_link,
        reload,
    })
}

fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    match fs::remove_file(link) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    symlink(target, link)
}
