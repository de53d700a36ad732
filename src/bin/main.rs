use std::{
    error::Error,
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wardeng::{
    cli::{Cli, Commands, parse_args},
    config::{SupervisorSettings, load_config, parse_duration},
    constants::DEFAULT_WATCH_INTERVAL,
    heartbeat::HeartbeatStatus,
    service_manager::SystemctlClient,
    supervisor::{EnsureOutcome, Supervisor, SupervisorState},
    unit::{UnitDefinition, install_unit},
};

/// Step used while sleeping in the watch loop so Ctrl-C is noticed quickly.
const WATCH_TICK: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let mut settings = load_config(args.config.as_deref())?;
    // Separate `wardg` invocations share one worker.
    if settings.lock_path.is_none() {
        settings.lock_path = Some(settings.default_lock_path());
    }

    match args.command {
        Commands::Status { json } => {
            let supervisor = Supervisor::from_settings(settings)?;
            let state = supervisor.is_healthy();
            print_status(&supervisor, state, json)?;
            Ok(status_exit_code(state))
        }
        Commands::Ensure => {
            let supervisor = Supervisor::from_settings(settings)?;
            let outcome = supervisor.ensure_running()?;
            println!("{}", describe_outcome(&outcome));
            Ok(if outcome.is_running() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Watch { interval } => {
            let interval = match interval {
                Some(raw) => parse_duration(&raw)?,
                None => DEFAULT_WATCH_INTERVAL,
            };
            let supervisor = Supervisor::from_settings(settings)?;
            watch(&supervisor, interval)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::InstallUnit { install_dir } => {
            let install_dir = resolve_install_dir(&settings, install_dir)?;
            let definition = UnitDefinition::for_worker(&settings, &install_dir);
            let client = SystemctlClient::new(&settings.unit_dir);
            let installed = install_unit(&settings, &definition, &client)?;
            println!("Installed {}", installed.unit_path.display());
            println!("Enabled via {}", installed.wants_link.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_status(
    supervisor: &Supervisor,
    state: SupervisorState,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let heartbeat = supervisor.heartbeat_status();
    let record = heartbeat.record();
    let last_beat = record.map(|r| DateTime::<Local>::from(r.timestamp).to_rfc3339());
    let age_secs = record.map(|r| r.age.as_secs());
    let pid = supervisor.heartbeat().read_pid();

    if as_json {
        let report = json!({
            "state": state,
            "pattern": supervisor.identity().as_str(),
            "heartbeat": {
                "path": supervisor.heartbeat().heartbeat_path(),
                "last_beat": last_beat,
                "age_secs": age_secs,
                "stale": heartbeat.is_stale(),
                "max_age_secs": supervisor.settings().max_heartbeat_age.as_secs(),
            },
            "pid": pid,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("State:      {state}");
    match heartbeat {
        HeartbeatStatus::Missing => println!("Heartbeat:  missing"),
        HeartbeatStatus::Fresh(record) | HeartbeatStatus::Stale(record) => println!(
            "Heartbeat:  {}s ago ({})",
            record.age.as_secs(),
            last_beat.unwrap_or_default()
        ),
    }
    match pid {
        Some(pid) => println!("PID marker: {pid}"),
        None => println!("PID marker: none"),
    }
    Ok(())
}

/// Exit codes follow `systemctl status`: 0 healthy, 3 not running.
fn status_exit_code(state: SupervisorState) -> ExitCode {
    match state {
        SupervisorState::Running => ExitCode::SUCCESS,
        SupervisorState::RunningStale => ExitCode::from(1),
        SupervisorState::NotRunning => ExitCode::from(3),
        SupervisorState::Unknown => ExitCode::from(4),
    }
}

fn describe_outcome(outcome: &EnsureOutcome) -> String {
    match outcome {
        EnsureOutcome::AlreadyRunning { stale: false } => "Worker already running".into(),
        EnsureOutcome::AlreadyRunning { stale: true } => {
            "Worker already running (heartbeat stale)".into()
        }
        EnsureOutcome::Restarted { strategy, .. } => format!("Worker restarted via {strategy}"),
        EnsureOutcome::StrategyExhausted { report } => format!(
            "Worker not running: all restart strategies failed ({} attempted, {} skipped)",
            report.attempts.len(),
            report.skipped.len()
        ),
    }
}

fn watch(supervisor: &Supervisor, interval: Duration) -> Result<(), Box<dyn Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })?;

    info!("Watching worker every {:?}", interval);
    while running.load(Ordering::SeqCst) {
        match supervisor.ensure_running() {
            Ok(outcome) => info!("{}", describe_outcome(&outcome)),
            Err(err) if err.is_environment_fault() => {
                error!("Environment fault while ensuring worker: {err}")
            }
            Err(err) => return Err(err.into()),
        }

        // An interval past the end of time means one check, then wait for Ctrl-C.
        let deadline = Instant::now().checked_add(interval);
        while running.load(Ordering::SeqCst) {
            let tick = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => WATCH_TICK,
            };
            if tick.is_zero() {
                break;
            }
            thread::sleep(WATCH_TICK.min(tick));
        }
    }

    info!("Watch loop stopped");
    Ok(())
}

fn resolve_install_dir(
    settings: &SupervisorSettings,
    explicit: Option<String>,
) -> Result<PathBuf, Box<dyn Error>> {
    if let Some(dir) = explicit {
        return Ok(PathBuf::from(dir));
    }

    match settings.discover_install_dir() {
        Some(dir) => Ok(dir),
        None => {
            warn!(
                "No installation directory found among {:?}",
                settings.install_dirs
            );
            Err("no installation directory found; pass --install-dir".into())
        }
    }
}
