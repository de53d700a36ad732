#![allow(dead_code)]

use std::{
    env, fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tempfile::TempDir;
use wardeng::config::{StrategyKind, StrategySettings, SupervisorSettings};

pub struct HomeEnvGuard {
    previous_home: Option<String>,
    previous_app_dir: Option<String>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl HomeEnvGuard {
    pub fn set(home: &Path) -> Self {
        let lock = wardeng::test_utils::env_lock();
        let previous_home = env::var("HOME").ok();
        let previous_app_dir = env::var("APP_DIR").ok();
        unsafe {
            env::set_var("HOME", home);
            env::remove_var("APP_DIR");
        }
        Self {
            previous_home,
            previous_app_dir,
            _lock: lock,
        }
    }
}

impl Drop for HomeEnvGuard {
    fn drop(&mut self) {
        restore("HOME", &self.previous_home);
        restore("APP_DIR", &self.previous_app_dir);
    }
}

fn restore(key: &str, previous: &Option<String>) {
    match previous {
        Some(value) => unsafe {
            env::set_var(key, value);
        },
        None => unsafe {
            env::remove_var(key);
        },
    }
}

/// A throwaway home directory plus an installation directory for the worker.
pub struct Fixture {
    pub temp: TempDir,
    pub home: PathBuf,
    pub install: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("failed to create tempdir");
        let home = temp.path().join("home");
        let install = temp.path().join("app");
        fs::create_dir_all(&home).expect("failed to create home dir");
        fs::create_dir_all(install.join("src")).expect("failed to create install dir");
        Self {
            temp,
            home,
            install,
        }
    }

    /// Settings pointing every path into the fixture, with `sh` as interpreter
    /// and short timings.
    pub fn settings(&self) -> SupervisorSettings {
        let mut settings = SupervisorSettings::for_home(&self.home);
        settings.worker_pattern = format!(
            "sh {}",
            regex::escape(&self.worker_path().display().to_string())
        );
        settings.interpreter = "sh".into();
        settings.worker_executable = PathBuf::from("src/worker.sh");
        settings.bootstrap_script = PathBuf::from("src/bootstrap.sh");
        settings.install_dirs = vec![self.temp.path().join("missing"), self.install.clone()];
        settings.settle_interval = Duration::from_millis(10);
        settings.strategies = vec![
            quick(StrategyKind::ServiceManager, Duration::from_millis(100)),
            quick(StrategyKind::Bootstrap, Duration::from_millis(300)),
            quick(StrategyKind::DirectLaunch, Duration::from_millis(500)),
        ];
        settings
    }

    pub fn worker_path(&self) -> PathBuf {
        self.install.join("src/worker.sh")
    }

    pub fn bootstrap_path(&self) -> PathBuf {
        self.install.join("src/bootstrap.sh")
    }

    pub fn write_worker(&self, body: &str) {
        write_script(&self.worker_path(), body);
    }

    pub fn write_bootstrap(&self, body: &str) {
        write_script(&self.bootstrap_path(), body);
    }
}

fn quick(kind: StrategyKind, settle: Duration) -> StrategySettings {
    StrategySettings {
        kind,
        timeout: Duration::from_secs(2),
        settle,
    }
}

pub fn write_script(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create script dir");
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    let mut perms = fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("failed to chmod script");
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {what}");
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}
