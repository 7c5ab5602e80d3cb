//! Client helper for talking to the applock daemon.
//!
//! The daemon owns the lock session. A request that never reached it is
//! retried once; a request the daemon answered (even with an error) is not,
//! so a failed attempt is never counted twice.

use applock_daemon_protocol::{
    AuthOutcome, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use chrono::Utc;
use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const ENABLE_ENV: &str = "APPLOCK_DAEMON_ENABLED";
const SOCKET_ENV: &str = "APPLOCK_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon disabled via APPLOCK_DAEMON_ENABLED")]
    Disabled,

    #[error("Daemon unreachable: {0}")]
    Unreachable(String),

    #[error("Bad daemon response: {0}")]
    BadResponse(String),

    #[error("Daemon error {}: {}", .0.code, .0.message)]
    Daemon(ErrorInfo),
}

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => true,
    }
}

pub fn send_auth_result(app: &str, outcome: AuthOutcome) -> Result<(), ClientError> {
    call(
        Method::AuthResult,
        Some(serde_json::json!({ "app": app, "outcome": outcome })),
    )
    .map(|_| ())
}

/// Returns whether the daemon matched the secret. The secret is never logged.
pub fn verify_secret(app: &str, secret: &str) -> Result<bool, ClientError> {
    let data = call(
        Method::VerifySecret,
        Some(serde_json::json!({ "app": app, "secret": secret })),
    )?;
    data.get("matched")
        .and_then(Value::as_bool)
        .ok_or_else(|| ClientError::BadResponse("verify_secret without matched".to_string()))
}

pub fn call(method: Method, params: Option<Value>) -> Result<Value, ClientError> {
    if !daemon_enabled() {
        return Err(ClientError::Disabled);
    }

    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(make_request_id()),
        params,
    };

    let response = match send_request(&request) {
        Err(ClientError::Unreachable(err)) => {
            tracing::warn!(error = %err, method = ?method, "Failed to reach daemon; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(&request).map_err(|retry_err| {
                tracing::warn!(error = %retry_err, method = ?method, "Retry failed");
                retry_err
            })?
        }
        other => other?,
    };

    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let info = response
            .error
            .unwrap_or_else(|| ErrorInfo::new("unknown", "Unknown daemon error"));
        tracing::warn!(code = %info.code, method = ?method, "Daemon rejected request");
        Err(ClientError::Daemon(info))
    }
}

fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| ClientError::Unreachable("Home directory not found".to_string()))?;
    Ok(home.join(".applock").join(SOCKET_NAME))
}

fn send_request(request: &Request) -> Result<Response, ClientError> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        ClientError::Unreachable(format!("Failed to connect to daemon socket: {}", err))
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    let mut payload = serde_json::to_vec(request)
        .map_err(|err| ClientError::BadResponse(format!("Failed to encode request: {}", err)))?;
    payload.push(b'\n');
    stream
        .write_all(&payload)
        .map_err(|err| ClientError::Unreachable(format!("Failed to write request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::BadResponse(
                        "Response exceeded maximum size".to_string(),
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
                return Err(ClientError::BadResponse(
                    "Timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => {
                return Err(ClientError::BadResponse(format!(
                    "Failed to read response: {}",
                    err
                )))
            }
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::BadResponse(
            "Daemon response was empty".to_string(),
        ));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::BadResponse(format!("Failed to parse response JSON: {}", err)))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!(
        "hook-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}
