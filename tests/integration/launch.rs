#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use common::{Fixture, is_process_alive, wait_until};
use wardeng::launch::{DetachedCommand, release, wait_with_timeout};

#[test]
fn detached_runs_append_to_the_same_log() {
    let fixture = Fixture::new();
    let log = fixture.home.join(".local/share/ubtms/daemon.log");

    for run in ["first", "second"] {
        let mut child = DetachedCommand::new("sh", &log)
            .arg("-c")
            .arg(format!("echo {run}; echo {run}-err >&2"))
            .spawn()
            .expect("failed to spawn");
        let status = wait_with_timeout(&mut child, Duration::from_secs(5))
            .expect("wait failed")
            .expect("command timed out");
        assert!(status.success());
    }

    let contents = fs::read_to_string(&log).expect("failed to read log");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "first");
    assert_eq!(lines.last(), Some(&"second-err"));
}

#[test]
fn launched_process_sees_working_dir_and_env() {
    let fixture = Fixture::new();
    let log = fixture.temp.path().join("env.log");

    let mut child = DetachedCommand::new("sh", &log)
        .arg("-c")
        .arg("pwd; echo \"$APP_DIR\"")
        .current_dir(&fixture.install)
        .env("APP_DIR", fixture.install.as_os_str())
        .spawn()
        .expect("failed to spawn");
    wait_with_timeout(&mut child, Duration::from_secs(5))
        .expect("wait failed")
        .expect("command timed out");

    let contents = fs::read_to_string(&log).expect("failed to read log");
    let lines: Vec<&str> = contents.lines().collect();
    let install = fixture.install.canonicalize().unwrap();
    assert_eq!(lines[0], install.display().to_string());
    assert_eq!(lines[1], fixture.install.display().to_string());
}

#[cfg(target_os = "linux")]
#[test]
fn released_process_is_reaped_after_exit() {
    let fixture = Fixture::new();
    let child = DetachedCommand::new("sh", fixture.temp.path().join("reap.log"))
        .arg("-c")
        .arg("sleep 0.2")
        .spawn()
        .expect("failed to spawn");
    let pid = child.id();

    release(child);
    assert!(is_process_alive(pid));
    wait_until("released process to be reaped", || !is_process_alive(pid));
}
