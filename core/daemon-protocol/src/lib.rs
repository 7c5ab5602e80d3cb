//! IPC protocol types and validation for applock-daemon.
//!
//! This crate is shared by the daemon and its clients (the hook CLI, lock
//! presenters) so both sides agree on the request schema. The daemon remains
//! the authority on validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_APP_ID_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetSession,
    AuthResult,
    VerifySecret,
    ReloadPolicy,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Platform package identifier of an installed application.
///
/// Equality is exact string match. Construction through [`AppId::parse`]
/// rejects empty, oversized or whitespace-bearing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn parse(value: &str) -> Result<Self, ErrorInfo> {
        if value.is_empty() {
            return Err(ErrorInfo::new("invalid_app_id", "app id is empty"));
        }
        if value.len() > MAX_APP_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_app_id",
                format!("app id must be {} bytes or fewer", MAX_APP_ID_LEN),
            ));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(ErrorInfo::new(
                "invalid_app_id",
                "app id must not contain whitespace",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    Authenticated,
    Failed,
}

impl AuthOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::Authenticated => "authenticated",
            AuthOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthResultParams {
    pub app: String,
    pub outcome: AuthOutcome,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySecretParams {
    pub app: String,
    pub secret: String,
}

// Hand-written so the candidate secret never reaches a log line.
impl fmt::Debug for VerifySecretParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifySecretParams")
            .field("app", &self.app)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub app: AppId,
    pub outcome: AuthOutcome,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretAttempt {
    pub app: AppId,
    pub secret: String,
}

impl fmt::Debug for SecretAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretAttempt")
            .field("app", &self.app)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub fn parse_auth_result(params: Value) -> Result<AuthResult, ErrorInfo> {
    let params: AuthResultParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("auth_result payload is invalid: {}", err),
        )
    })?;
    let app = require_app_id(&params.app)?;
    Ok(AuthResult {
        app,
        outcome: params.outcome,
    })
}

pub fn parse_verify_secret(params: Value) -> Result<SecretAttempt, ErrorInfo> {
    let params: VerifySecretParams = serde_json::from_value(params).map_err(|_| {
        // serde's message may echo the payload, which carries the secret.
        ErrorInfo::new("invalid_params", "verify_secret payload is invalid")
    })?;
    let app = require_app_id(&params.app)?;
    if params.secret.is_empty() {
        return Err(ErrorInfo::new("missing_field", "secret is required"));
    }
    Ok(SecretAttempt {
        app,
        secret: params.secret,
    })
}

fn require_app_id(value: &str) -> Result<AppId, ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "app is required"));
    }
    AppId::parse(value)
}
