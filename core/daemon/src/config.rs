//! Daemon configuration and the lock policy store.
//!
//! Everything lives in one TOML file (`~/.applock/applock.toml` unless
//! `APPLOCK_CONFIG` points elsewhere). Every table and key is optional and
//! falls back to the safe state: nothing locked, intruder capture disabled,
//! no collaborator commands.

use applock_daemon_protocol::AppId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use subtle::ConstantTimeEq;

use crate::error::{LockError, Result};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".applock/applock.toml";
pub const CONFIG_ENV: &str = "APPLOCK_CONFIG";

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 200;
pub const DEFAULT_COOLDOWN_MS: u64 = 2000;
pub const DEFAULT_INTRUDER_THRESHOLD: u32 = 3;
const MIN_TICK_INTERVAL_MS: u64 = 10;
const MAX_COOLDOWN_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_MAX_SIGNAL_AGE_SECS: u64 = 60;

const DEFAULT_LAUNCHERS: &[&str] = &[
    "com.android.launcher",
    "com.android.launcher2",
    "com.android.launcher3",
    "com.google.android.apps.nexuslauncher",
    "com.sec.android.app.launcher",
    "com.miui.home",
    "com.huawei.android.launcher",
    "com.oppo.launcher",
];
const DEFAULT_SYSTEM_UI: &[&str] = &["com.android.systemui"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    #[default]
    Pin,
    Pattern,
    Biometric,
}

/// Opaque secret material (PIN digits or a pattern such as `1-4-7-8`).
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Constant-time comparison against an entered candidate.
    /// An unset secret never matches.
    pub fn matches(&self, candidate: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        candidate.as_bytes().ct_eq(self.0.as_bytes()).into()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<unset>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntruderSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_intruder_threshold")]
    pub threshold: u32,
}

impl Default for IntruderSection {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_intruder_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PolicySection {
    #[serde(default)]
    pub locked_apps: Vec<String>,
    #[serde(default)]
    pub lock_type: LockType,
    #[serde(default)]
    pub secret: Secret,
    #[serde(default)]
    pub intruder: IntruderSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl TimingSection {
    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS))
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.cooldown_ms.min(MAX_COOLDOWN_MS) as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_launchers")]
    pub launchers: Vec<String>,
    #[serde(default = "default_system_ui")]
    pub system: Vec<String>,
    #[serde(default)]
    pub ignored: Vec<String>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            launchers: default_launchers(),
            system: default_system_ui(),
            ignored: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObserverSection {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_max_signal_age_secs")]
    pub max_signal_age_secs: u64,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_signal_age_secs: default_max_signal_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PresenterSection {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub dismiss_command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CaptureSection {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub observer: ObserverSection,
    #[serde(default)]
    pub presenter: PresenterSection,
    #[serde(default)]
    pub capture: CaptureSection,
}

/// Read-only policy snapshot held by the lock session machine.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub locked_apps: BTreeSet<AppId>,
    pub lock_type: LockType,
    pub secret: Secret,
    pub intruder_enabled: bool,
    /// Always at least 1.
    pub intruder_threshold: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            locked_apps: BTreeSet::new(),
            lock_type: LockType::default(),
            secret: Secret::default(),
            intruder_enabled: false,
            intruder_threshold: DEFAULT_INTRUDER_THRESHOLD,
        }
    }
}

impl LockConfig {
    pub fn from_section(section: &PolicySection) -> Self {
        let mut locked_apps = BTreeSet::new();
        for raw in &section.locked_apps {
            match AppId::parse(raw.trim()) {
                Ok(app) => {
                    locked_apps.insert(app);
                }
                Err(err) => {
                    tracing::warn!(app = %raw, error = %err.message, "Skipping invalid locked app id");
                }
            }
        }

        Self {
            locked_apps,
            lock_type: section.lock_type,
            secret: section.secret.clone(),
            intruder_enabled: section.intruder.enabled,
            intruder_threshold: section.intruder.threshold.max(1),
        }
    }

    pub fn is_locked(&self, app: &AppId) -> bool {
        self.locked_apps.contains(app)
    }
}

/// Source of the persisted lock policy.
pub trait PolicyStore: Send + Sync {
    fn load(&self) -> Result<LockConfig>;
}

#[derive(Debug, Clone)]
pub struct TomlPolicyStore {
    path: PathBuf,
}

impl TomlPolicyStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyStore for TomlPolicyStore {
    fn load(&self) -> Result<LockConfig> {
        let config = load_runtime_config(&self.path)?;
        Ok(LockConfig::from_section(&config.policy))
    }
}

pub fn applock_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(LockError::HomeNotFound)?;
    Ok(home.join(".applock"))
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(LockError::HomeNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| LockError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<RuntimeConfig>(&content).map_err(|source| LockError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_intruder_threshold() -> u32 {
    DEFAULT_INTRUDER_THRESHOLD
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

fn default_max_signal_age_secs() -> u64 {
    DEFAULT_MAX_SIGNAL_AGE_SECS
}

fn default_launchers() -> Vec<String> {
    DEFAULT_LAUNCHERS.iter().map(|s| s.to_string()).collect()
}

fn default_system_ui() -> Vec<String> {
    DEFAULT_SYSTEM_UI.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
impl LockConfig {
    pub fn with_locked_apps(apps: &[&str]) -> Self {
        Self {
            locked_apps: apps
                .iter()
                .map(|app| AppId::parse(app).expect("valid app id"))
                .collect(),
            ..Self::default()
        }
    }
}
