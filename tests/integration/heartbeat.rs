#[path = "common/mod.rs"]
mod common;

use std::{
    fs::{self, File},
    time::{Duration, SystemTime},
};

use common::Fixture;
use wardeng::heartbeat::{HeartbeatStatus, HeartbeatStore};

const MAX_AGE: Duration = Duration::from_secs(300);

fn store(fixture: &Fixture) -> HeartbeatStore {
    let settings = fixture.settings();
    HeartbeatStore::new(&settings.heartbeat_path, &settings.pid_path)
}

#[test]
fn missing_fresh_and_stale_are_told_apart() {
    let fixture = Fixture::new();
    let store = store(&fixture);
    let now = SystemTime::now();

    assert_eq!(store.status(now, MAX_AGE), HeartbeatStatus::Missing);
    assert!(store.is_stale(now, MAX_AGE));

    store.touch().expect("failed to touch heartbeat");
    let status = store.status(SystemTime::now(), MAX_AGE);
    assert!(matches!(status, HeartbeatStatus::Fresh(_)));
    assert!(!status.is_stale());

    let old = SystemTime::now() - Duration::from_secs(400);
    File::options()
        .write(true)
        .open(store.heartbeat_path())
        .and_then(|file| file.set_modified(old))
        .expect("failed to backdate heartbeat");

    match store.status(SystemTime::now(), MAX_AGE) {
        HeartbeatStatus::Stale(record) => {
            assert!(record.age >= Duration::from_secs(400));
            assert_eq!(record.timestamp, old);
        }
        other => panic!("expected stale heartbeat, got {other:?}"),
    }
}

#[test]
fn heartbeat_exactly_at_max_age_is_fresh() {
    let fixture = Fixture::new();
    let store = store(&fixture);
    store.touch().expect("failed to touch heartbeat");

    let beat = store.last_beat().expect("heartbeat should exist");
    assert!(!store.is_stale(beat + MAX_AGE, MAX_AGE));
    assert!(store.is_stale(beat + MAX_AGE + Duration::from_millis(1), MAX_AGE));
}

#[test]
fn clear_removes_both_markers_and_is_idempotent() {
    let fixture = Fixture::new();
    let store = store(&fixture);

    store.touch().expect("failed to touch heartbeat");
    fs::write(store.pid_path(), "4242\n").expect("failed to write pid marker");
    assert_eq!(store.read_pid(), Some(4242));

    store.clear().expect("first clear failed");
    assert!(!store.heartbeat_path().exists());
    assert!(!store.pid_path().exists());
    assert_eq!(store.read_pid(), None);

    store.clear().expect("clearing absent markers must succeed");
}

#[test]
fn garbage_pid_marker_reads_as_none() {
    let fixture = Fixture::new();
    let store = store(&fixture);
    fs::write(store.pid_path(), "not-a-pid").expect("failed to write pid marker");
    assert_eq!(store.read_pid(), None);
}
