#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    time::{Duration, Instant},
};

use common::{Fixture, is_process_alive, wait_for_path, write_script};
use wardeng::{
    service_manager::{ServiceManagerClient, SystemctlClient},
    strategy::ExitInfo,
};

#[test]
fn hung_start_request_is_killed_at_its_deadline() {
    let fixture = Fixture::new();
    let pid_file = fixture.temp.path().join("systemctl.pid");
    let stub = fixture.temp.path().join("bin/systemctl");
    write_script(
        &stub,
        &format!("echo $$ > '{}'\nexec sleep 5", pid_file.display()),
    );
    let client = SystemctlClient::new(fixture.temp.path().join("units")).with_program(&stub);

    let started = Instant::now();
    let result = client
        .start("worker.service", Duration::from_millis(300))
        .expect("start should not be an environment fault");

    assert_eq!(result, ExitInfo::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(4));

    wait_for_path(&pid_file);
    let pid: u32 = fs::read_to_string(&pid_file)
        .expect("failed to read stub pid")
        .trim()
        .parse()
        .expect("stub pid is not a number");
    assert!(!is_process_alive(pid));
}

#[test]
fn start_passes_user_flag_and_unit() {
    let fixture = Fixture::new();
    let args_file = fixture.temp.path().join("systemctl.args");
    let stub = fixture.temp.path().join("bin/systemctl");
    write_script(&stub, &format!("echo \"$@\" > '{}'", args_file.display()));
    let client = SystemctlClient::new(fixture.temp.path().join("units")).with_program(&stub);

    let result = client
        .start("worker.service", Duration::from_secs(5))
        .expect("start failed");

    assert_eq!(result, ExitInfo::Exited(0));
    let args = fs::read_to_string(&args_file).expect("stub did not record its arguments");
    assert_eq!(args.trim(), "--user start worker.service");
}
