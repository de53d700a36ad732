#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    path::Path,
    process::{Command as StdCommand, Stdio},
    thread,
    time::Duration,
};

use assert_cmd::Command;
use common::Fixture;
use predicates::prelude::*;

fn wardg(fixture: &Fixture) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("wardg"));
    cmd.env("HOME", &fixture.home)
        .env_remove("APP_DIR")
        .env_remove("RUST_LOG")
        .current_dir(fixture.temp.path());
    cmd
}

fn write_config(fixture: &Fixture, install_dir: &Path) -> String {
    let config_path = fixture.temp.path().join("wardeng.yaml");
    fs::write(
        &config_path,
        format!(
            r#"worker:
  pattern: "wardeng-cli-test-worker-that-never-runs"
  interpreter: "sh"
  install_dirs: ["{install}"]
heartbeat:
  file: "${{HOME}}/.worker_heartbeat"
  pid_file: "${{HOME}}/.worker.pid"
paths:
  unit_dir: "units"
settle_interval: "10ms"
"#,
            install = install_dir.display()
        ),
    )
    .expect("failed to write config");
    config_path.display().to_string()
}

#[test]
fn status_json_reports_missing_worker() {
    let fixture = Fixture::new();
    let config = write_config(&fixture, &fixture.install);

    let output = wardg(&fixture)
        .args(["status", "--json", "--config", &config])
        .output()
        .expect("failed to run status");

    assert_eq!(output.status.code(), Some(3));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status output is not JSON");
    assert_eq!(report["state"], "not_running");
    assert_eq!(report["heartbeat"]["stale"], true);
    assert!(report["heartbeat"]["last_beat"].is_null());
    assert!(report["pid"].is_null());
}

#[test]
fn status_text_shows_pid_marker() {
    let fixture = Fixture::new();
    let config = write_config(&fixture, &fixture.install);
    fs::write(fixture.home.join(".worker.pid"), "777\n").unwrap();

    wardg(&fixture)
        .args(["--config", &config, "status"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("State:      not_running"))
        .stdout(predicate::str::contains("Heartbeat:  missing"))
        .stdout(predicate::str::contains("PID marker: 777"));
}

#[test]
fn ensure_with_nothing_to_run_fails_and_clears_markers() {
    let fixture = Fixture::new();
    let config = write_config(&fixture, &fixture.temp.path().join("absent"));
    let heartbeat = fixture.home.join(".worker_heartbeat");
    fs::write(&heartbeat, "old").unwrap();

    wardg(&fixture)
        .args(["ensure", "--config", &config])
        .assert()
        .failure()
        .stdout(predicate::str::contains("all restart strategies failed"));

    assert!(!heartbeat.exists());
}

#[test]
fn watch_accepts_an_interval_past_the_end_of_time() {
    let fixture = Fixture::new();
    let config = write_config(&fixture, &fixture.temp.path().join("absent"));

    let mut child = StdCommand::new(assert_cmd::cargo::cargo_bin!("wardg"))
        .args(["watch", "--interval", "18446744073709551615s", "--config", &config])
        .env("HOME", &fixture.home)
        .env_remove("APP_DIR")
        .current_dir(fixture.temp.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start watch");

    thread::sleep(Duration::from_secs(1));
    let exited = child.try_wait().expect("failed to poll watch");
    let _ = child.kill();
    let _ = child.wait();
    assert!(exited.is_none(), "watch exited early: {exited:?}");
}

#[test]
fn invalid_config_is_reported() {
    let fixture = Fixture::new();
    let config_path = fixture.temp.path().join("broken.yaml");
    fs::write(&config_path, "worker:\n  pattern: \"(unclosed\"\n").unwrap();

    wardg(&fixture)
        .args(["status", "--config", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid worker pattern"));
}

#[test]
fn install_unit_writes_and_enables_unit() {
    let fixture = Fixture::new();
    let config = write_config(&fixture, &fixture.install);
    let install = fixture.install.display().to_string();

    wardg(&fixture)
        .env("PATH", "")
        .args(["install-unit", "--config", &config, "--install-dir", &install])
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed"));

    let unit_dir = fixture.temp.path().join("units");
    let unit = fs::read_to_string(unit_dir.join("ubtms-daemon.service")).unwrap();
    assert!(unit.contains(&format!("WorkingDirectory={install}")));
    assert!(
        unit_dir
            .join("graphical-session.target.wants/ubtms-daemon.service")
            .is_symlink()
    );
}

#[test]
fn rejects_unknown_log_level() {
    let fixture = Fixture::new();
    wardg(&fixture)
        .args(["status", "--log-level", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level"));
}
