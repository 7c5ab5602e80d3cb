//! Applock daemon entrypoint.
//!
//! A single-writer service that owns the lock session: a fixed-rate ticker
//! samples the foreground app, one worker applies samples and authentication
//! results in order, and a Unix socket accepts results and policy reloads.
//! SIGINT or SIGTERM stops the scheduler after it drains accepted events.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use applock_daemon_protocol::{
    parse_auth_result, parse_verify_secret, AuthOutcome, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

mod classifier;
mod config;
mod error;
mod executor;
mod intruder;
mod observer;
mod presenter;
mod process;
mod reducer;
mod scheduler;
mod session;
mod state;

use classifier::StaticAppClassifier;
use config::{LockConfig, LockType, PolicyStore, RuntimeConfig, TomlPolicyStore};
use executor::ActionExecutor;
use intruder::CommandIntruderCapture;
use observer::CommandForegroundObserver;
use presenter::CommandChallengePresenter;
use scheduler::{EventIntake, SchedulerStats};
use state::{LockSessionMachine, VerifyError};

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

struct DaemonContext {
    machine: Arc<LockSessionMachine>,
    intake: EventIntake,
    stats: Arc<SchedulerStats>,
    policy_store: TomlPolicyStore,
    tick_interval: Duration,
}

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            error!(error = %err, "Failed to register signal listeners");
            std::process::exit(1);
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Applock daemon started");

    let applock_home = match config::applock_home() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve applock home");
            std::process::exit(1);
        }
    };
    let config_path = match config::default_config_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve config path");
            std::process::exit(1);
        }
    };

    let runtime_config = match config::load_runtime_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using safe defaults");
            RuntimeConfig::default()
        }
    };
    let policy = LockConfig::from_section(&runtime_config.policy);
    let tick_interval = runtime_config.timing.tick_interval();
    let cooldown = runtime_config.timing.cooldown();

    let observer =
        CommandForegroundObserver::from_section(&runtime_config.observer, tick_interval);
    if !observer.is_configured() {
        warn!("No foreground observer command configured; every sample will be unknown");
    }
    if policy.lock_type != LockType::Biometric && policy.secret.is_empty() {
        warn!("No lock secret configured; verify_secret will never match");
    }
    info!(
        config = %config_path.display(),
        locked_apps = policy.locked_apps.len(),
        lock_type = ?policy.lock_type,
        intruder_enabled = policy.intruder_enabled,
        intruder_threshold = policy.intruder_threshold,
        tick_interval_ms = tick_interval.as_millis() as u64,
        cooldown_ms = cooldown.num_milliseconds(),
        "Lock policy loaded"
    );

    let machine = Arc::new(LockSessionMachine::new(
        policy,
        Box::new(StaticAppClassifier::from_section(&runtime_config.classifier)),
        cooldown,
    ));
    let executor = ActionExecutor::new(
        Arc::new(CommandChallengePresenter::from_section(
            &runtime_config.presenter,
        )),
        Arc::new(CommandIntruderCapture::from_section(
            &runtime_config.capture,
            &applock_home,
        )),
    );
    let mut scheduler = scheduler::spawn_scheduler(
        Arc::clone(&machine),
        Arc::new(observer),
        executor,
        tick_interval,
    );

    let context = Arc::new(DaemonContext {
        machine,
        intake: scheduler.intake(),
        stats: scheduler.shared_stats(),
        policy_store: TomlPolicyStore::new(config_path),
        tick_interval,
    });

    thread::spawn(move || accept_connections(listener, context));

    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    scheduler.stop();
    if let Err(err) = fs::remove_file(&socket_path) {
        warn!(error = %err, path = %socket_path.display(), "Failed to remove daemon socket");
    }
    info!("Applock daemon stopped");
}

fn accept_connections(listener: UnixListener, context: Arc<DaemonContext>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let context = Arc::clone(&context);
                thread::spawn(|| handle_connection(stream, context));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("APPLOCK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = config::applock_home().map_err(|err| err.to_string())?;
    Ok(home.join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, context: Arc<DaemonContext>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &context);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, context: &DaemonContext) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let policy = context.machine.policy_snapshot();
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "tick_interval_ms": context.tick_interval.as_millis() as u64,
                "cooldown_ms": context.machine.cooldown().num_milliseconds(),
                "locked_apps": policy.locked_apps.len(),
                "intruder_enabled": policy.intruder_enabled,
            });
            if let Ok(value) = serde_json::to_value(context.stats.snapshot()) {
                data["scheduler"] = value;
            }
            Response::ok(request.id, data)
        }
        Method::GetSession => {
            let snapshot = context.machine.session_snapshot();
            match serde_json::to_value(snapshot) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize session: {}", err),
                ),
            }
        }
        Method::AuthResult => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "app and outcome are required")
                }
            };
            let result = match parse_auth_result(params) {
                Ok(result) => result,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            info!(app = %result.app, outcome = result.outcome.as_str(), "Received auth result");
            match context.intake.submit_auth_result(result.app, result.outcome) {
                Ok(()) => Response::ok(request.id, serde_json::json!({ "accepted": true })),
                Err(_) => Response::error(request.id, "shutting_down", "daemon is shutting down"),
            }
        }
        Method::VerifySecret => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "app and secret are required")
                }
            };
            let attempt = match parse_verify_secret(params) {
                Ok(attempt) => attempt,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            let outcome = match context.machine.verify_secret(&attempt.secret) {
                Ok(outcome) => outcome,
                Err(VerifyError::BiometricLock) => {
                    return Response::error(
                        request.id,
                        "biometric_lock",
                        "lock type is biometric; report the outcome with auth_result",
                    )
                }
            };

            info!(app = %attempt.app, outcome = outcome.as_str(), "Secret verified");
            match context.intake.submit_auth_result(attempt.app, outcome) {
                Ok(()) => Response::ok(
                    request.id,
                    serde_json::json!({ "matched": outcome == AuthOutcome::Authenticated }),
                ),
                Err(_) => Response::error(request.id, "shutting_down", "daemon is shutting down"),
            }
        }
        Method::ReloadPolicy => match context.policy_store.load() {
            Ok(policy) => {
                let locked_apps = policy.locked_apps.len();
                context.machine.reload_policy(policy);
                Response::ok(request.id, serde_json::json!({ "locked_apps": locked_apps }))
            }
            Err(err) => {
                warn!(
                    error = %err,
                    path = %context.policy_store.path().display(),
                    "Policy reload failed; keeping previous policy"
                );
                Response::error(
                    request.id,
                    "reload_failed",
                    format!("Failed to reload policy: {}", err),
                )
            }
        },
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
