use std::fs::OpenOptions;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use cx_backup_lib::cli::{Action, Cli};
use cx_backup_lib::config::AppConfig;
use cx_backup_lib::credentials::{CredentialStore, SealedCredentials};
use cx_backup_lib::device::{ConfigFetcher, HttpTransport};
use cx_backup_lib::events::{BackupEvent, PassOutcome, Trigger};
use cx_backup_lib::orchestrator::BackupOrchestrator;
use cx_backup_lib::schedule::Scheduler;
use cx_backup_lib::secret::SecretBox;
use cx_backup_lib::status::StatusTable;

use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Some(log_file) = &cli.log_file {
        match OpenOptions::new().create(true).append(true).open(log_file) {
            Ok(file) => {
                env_logger.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Opening log file {} failed: {e}", log_file.display()),
        }
    }
    env_logger.try_init().expect("env_logger should not fail");

    let secrets = match SecretBox::load_or_create(&cli.key_file) {
        Ok(secrets) => Arc::new(secrets),
        Err(e) => {
            log::error!(target: "secret", "{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match AppConfig::load_or_default(&cli.config, &secrets) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let status = match StatusTable::load(&config.status_file) {
        Ok(status) => status,
        Err(e) => {
            log::error!(target: "status", "{e}");
            return ExitCode::FAILURE;
        }
    };

    let action = cli.action.unwrap_or_default();
    if action == Action::Status {
        print!("{status}");
        return ExitCode::SUCCESS;
    }

    let mut credentials = config.credential_store(secrets.clone());
    if cli.username.is_some() || cli.password.is_some() {
        let defaults = credentials.default_credentials();
        credentials = SealedCredentials::new(
            cli.username.unwrap_or(defaults.username),
            cli.password.unwrap_or(defaults.password),
            secrets.clone(),
        );
    }
    if credentials.default_credentials().username.is_empty() {
        log::warn!("No default username configured, switches without own credentials will fail");
    }

    let mirrors = match config.mirrors(&secrets) {
        Ok(mirrors) => mirrors,
        Err(e) => {
            log::error!(target: "mirror", "{e}");
            return ExitCode::FAILURE;
        }
    };

    let transport = match HttpTransport::new(config.http_settings()) {
        Ok(transport) => transport,
        Err(e) => {
            log::error!(target: "device", "Creating the HTTP client failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (events, events_rx) = mpsc::channel();
    let orchestrator = BackupOrchestrator::new(
        config.orchestrator_settings(),
        ConfigFetcher::new(transport, config.retry_policy()),
        credentials,
        status,
    )
    .with_mirrors(mirrors.build())
    .with_observer(events);
    let progress = thread::spawn(move || print_progress(events_rx));

    let exit_code = match action {
        Action::Serve => serve(Arc::new(orchestrator), &config),
        _ => backup(orchestrator),
    };

    // all senders are dropped with the orchestrator by now
    if progress.join().is_err() {
        log::error!("Progress output panicked");
    }

    exit_code
}

/// Runs a single manual pass.
fn backup(orchestrator: BackupOrchestrator) -> ExitCode {
    let report = orchestrator.run(Trigger::Manual);
    match report.outcome {
        PassOutcome::Completed => ExitCode::SUCCESS,
        PassOutcome::PartiallyCompleted | PassOutcome::Aborted(_) => ExitCode::from(1),
        PassOutcome::AlreadyRunning => ExitCode::from(2),
    }
}

/// Runs the scheduler and reads commands from stdin until `quit` or EOF.
fn serve(orchestrator: Arc<BackupOrchestrator>, config: &AppConfig) -> ExitCode {
    let scheduler = match config.schedule() {
        Ok(Some(schedule)) => {
            let orchestrator = orchestrator.clone();
            let scheduler = Scheduler::spawn(schedule, move || {
                orchestrator.run(Trigger::Scheduled);
            });
            match scheduler {
                Ok(scheduler) => Some(scheduler),
                Err(e) => {
                    log::error!(target: "schedule", "Starting the scheduler failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        Ok(None) => {
            log::info!(target: "schedule", "Automatic backups are disabled");
            None
        }
        Err(e) => {
            log::error!(target: "schedule", "{e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Commands: run, status, quit");
    let mut manual_runs = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Reading stdin failed: {e}");
                break;
            }
        };
        match line.trim() {
            "run" => {
                let orchestrator = orchestrator.clone();
                manual_runs.push(thread::spawn(move || {
                    orchestrator.run(Trigger::Manual);
                }));
            }
            "status" => {
                if orchestrator.is_running() {
                    println!("Backup in progress");
                }
                print!("{}", orchestrator.status());
            }
            "quit" => break,
            "" => {}
            other => println!("Unknown command {other:?}, expected run, status or quit"),
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }
    for run in manual_runs {
        if run.join().is_err() {
            log::error!(target: "orchestrator", "Manual backup panicked");
        }
    }

    ExitCode::SUCCESS
}

fn print_progress(events: Receiver<BackupEvent>) {
    for event in events {
        match event {
            BackupEvent::AlreadyRunning { trigger } => {
                println!("Backup already in progress, {trigger} backup skipped")
            }
            BackupEvent::PassStarted { trigger } => println!("Starting {trigger} backup"),
            BackupEvent::DeviceStarted {
                name,
                address,
                index,
                total,
            } => println!("[{index}/{total}] {name} ({address})"),
            BackupEvent::DeviceCompleted { name, result } => match result {
                Ok(path) => println!("{name}: saved {}", path.display()),
                Err(e) => println!("{name}: {e}"),
            },
            BackupEvent::MirrorCompleted { sink, status } => println!("Mirror {sink}: {status}"),
            BackupEvent::PassCompleted { trigger, outcome } => {
                println!("{trigger} backup {outcome}")
            }
        }
    }
}
