//! Configuration management for `beads_daemon`.
//!
//! Sources and precedence (highest wins):
//! 1. CLI flags
//! 2. Project config (`.beads/config.yaml`)
//! 3. Defaults
//!
//! The only environment input is `BEADS_DIR`, which names the data
//! directory and skips the upward search for `.beads/`.

use crate::error::{BeadsError, Result};
use crate::storage::SqliteStorage;
use crate::util::short_hash;
use crate::util::time::{format_duration, parse_duration};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Environment variable naming the data directory.
pub const BEADS_DIR_ENV: &str = "BEADS_DIR";
/// Default database filename used when metadata is missing.
pub const DEFAULT_DB_FILENAME: &str = "beads.db";
/// Default log filename used when metadata is missing.
pub const DEFAULT_LOG_FILENAME: &str = "issues.jsonl";
pub const CONFIG_FILENAME: &str = "config.yaml";
const METADATA_FILENAME: &str = "metadata.json";
const DAEMON_LOCK_FILENAME: &str = "daemon.lock";
const SYNC_LOCK_FILENAME: &str = "sync.lock";
const DAEMON_LOG_FILENAME: &str = "daemon.log";

/// Startup metadata naming the database and log files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub jsonl_export: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            database: DEFAULT_DB_FILENAME.to_string(),
            jsonl_export: DEFAULT_LOG_FILENAME.to_string(),
        }
    }
}

impl Metadata {
    /// Load metadata.json from the beads directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(beads_dir: &Path) -> Result<Self> {
        let path = beads_dir.join(METADATA_FILENAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let mut metadata: Self = serde_json::from_str(&contents)?;

        if metadata.database.trim().is_empty() {
            metadata.database = DEFAULT_DB_FILENAME.to_string();
        }
        if metadata.jsonl_export.trim().is_empty() {
            metadata.jsonl_export = DEFAULT_LOG_FILENAME.to_string();
        }

        Ok(metadata)
    }
}

/// Every path the daemon and its clients agree on for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeadsPaths {
    pub beads_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub socket_path: PathBuf,
    /// Held by the running daemon.
    pub lock_path: PathBuf,
    /// Held by direct-file clients while they touch the Store or the log.
    pub sync_lock_path: PathBuf,
    pub daemon_log: PathBuf,
}

impl BeadsPaths {
    /// Resolve paths for a data directory.
    ///
    /// The directory is canonicalized first so every workspace that reaches
    /// the same repository derives the same socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be canonicalized or
    /// metadata.json is malformed.
    pub fn resolve(beads_dir: &Path) -> Result<Self> {
        let beads_dir = beads_dir.canonicalize()?;
        let metadata = Metadata::load(&beads_dir)?;
        Ok(Self {
            db_path: relative_to(&beads_dir, &metadata.database),
            log_path: relative_to(&beads_dir, &metadata.jsonl_export),
            socket_path: socket_path_for(&beads_dir),
            lock_path: beads_dir.join(DAEMON_LOCK_FILENAME),
            sync_lock_path: beads_dir.join(SYNC_LOCK_FILENAME),
            daemon_log: beads_dir.join(DAEMON_LOG_FILENAME),
            beads_dir,
        })
    }

    /// Discover the data directory and resolve its paths.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if no data directory is found.
    pub fn discover(start: Option<&Path>) -> Result<Self> {
        Self::resolve(&discover_beads_dir(start)?)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.beads_dir.join(CONFIG_FILENAME)
    }
}

fn relative_to(base: &Path, name: &str) -> PathBuf {
    let candidate = PathBuf::from(name);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}

/// Socket path for a data directory: `<tmp>/bd-<16 hex>.sock`.
///
/// Derived from the canonical directory path, so distinct repositories
/// never collide and Unix socket path limits are respected.
#[must_use]
pub fn socket_path_for(beads_dir: &Path) -> PathBuf {
    let canonical = beads_dir
        .canonicalize()
        .unwrap_or_else(|_| beads_dir.to_path_buf());
    let hash = short_hash(&canonical.to_string_lossy(), 16);
    env::temp_dir().join(format!("bd-{hash}.sock"))
}

/// Discover the active `.beads` directory.
///
/// Honors `BEADS_DIR` when set, otherwise walks up from `start` (or CWD).
///
/// # Errors
///
/// Returns an error if no beads directory is found or the CWD cannot be read.
pub fn discover_beads_dir(start: Option<&Path>) -> Result<PathBuf> {
    let env_dir = env::var(BEADS_DIR_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    discover_beads_dir_with_env(start, env_dir.as_deref())
}

fn discover_beads_dir_with_env(start: Option<&Path>, env_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = env_dir {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        return Err(BeadsError::Config(format!(
            "{BEADS_DIR_ENV}={} is not a directory",
            path.display()
        )));
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(".beads");
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            break;
        }
    }

    Err(BeadsError::NotInitialized)
}

/// Open the Store for a resolved workspace.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_storage(paths: &BeadsPaths, lock_timeout: Option<Duration>) -> Result<SqliteStorage> {
    SqliteStorage::open_with_timeout(&paths.db_path, lock_timeout)
}

/// Flattened project configuration (`daemon.auto-pull`, `issue-prefix`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// # Errors
    ///
    /// Returns a YAML error if the text is not valid YAML.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let mut values = HashMap::new();
        flatten_yaml(&value, "", &mut values);
        Ok(Self {
            values: values
                .into_iter()
                .map(|(key, value)| (normalize_key(&key), value))
                .collect(),
        })
    }

    /// Value for the first matching key; `_` and `-` are interchangeable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&normalize_key(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|value| {
                parse_bool(value).ok_or_else(|| {
                    BeadsError::Config(format!("{key}: expected true/false, got '{value}'"))
                })
            })
            .transpose()
    }

    fn get_duration(&self, key: &str) -> Result<Option<Duration>> {
        self.get(key)
            .map(|value| {
                parse_duration(value).map_err(|err| BeadsError::Config(format!("{key}: {err}")))
            })
            .transpose()
    }
}

/// Load `.beads/config.yaml`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed.
pub fn load_project_config(beads_dir: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&beads_dir.join(CONFIG_FILENAME))
}

/// Typed daemon options, validated once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub auto_commit: bool,
    pub auto_pull: bool,
    pub auto_push: bool,
    /// Auto-pull period; also the commit fallback tick.
    #[serde(with = "duration_text")]
    pub interval: Duration,
    /// Quiet period after a mutation before auto-commit runs.
    #[serde(with = "duration_text")]
    pub commit_debounce: Duration,
    pub remote: String,
    #[serde(with = "duration_text")]
    pub rpc_timeout: Duration,
    /// Bound on waiting for in-flight requests during stop.
    #[serde(with = "duration_text")]
    pub drain_timeout: Duration,
    #[serde(with = "duration_text")]
    pub git_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            auto_commit: false,
            auto_pull: false,
            auto_push: false,
            interval: Duration::from_secs(30),
            commit_debounce: Duration::from_millis(500),
            remote: "origin".to_string(),
            rpc_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            git_timeout: Duration::from_secs(60),
        }
    }
}

/// CLI switches that can only turn auto-sync actions on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonFlags {
    pub auto_commit: bool,
    pub auto_pull: bool,
    pub auto_push: bool,
    pub interval: Option<Duration>,
}

impl DaemonConfig {
    /// Read `daemon.*` keys from a config layer.
    ///
    /// # Errors
    ///
    /// Returns `Config` for malformed booleans or durations.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            auto_commit: layer
                .get_bool("daemon.auto-commit")?
                .unwrap_or(defaults.auto_commit),
            auto_pull: layer
                .get_bool("daemon.auto-pull")?
                .unwrap_or(defaults.auto_pull),
            auto_push: layer
                .get_bool("daemon.auto-push")?
                .unwrap_or(defaults.auto_push),
            interval: layer
                .get_duration("daemon.interval")?
                .unwrap_or(defaults.interval),
            commit_debounce: layer
                .get_duration("daemon.commit-debounce")?
                .unwrap_or(defaults.commit_debounce),
            remote: layer
                .get("daemon.remote")
                .map_or(defaults.remote, str::to_string),
            rpc_timeout: layer
                .get_duration("daemon.rpc-timeout")?
                .unwrap_or(defaults.rpc_timeout),
            drain_timeout: layer
                .get_duration("daemon.drain-timeout")?
                .unwrap_or(defaults.drain_timeout),
            git_timeout: layer
                .get_duration("daemon.git-timeout")?
                .unwrap_or(defaults.git_timeout),
        })
    }

    /// Apply CLI switches on top of file configuration.
    #[must_use]
    pub fn with_flags(mut self, flags: DaemonFlags) -> Self {
        self.auto_commit |= flags.auto_commit;
        self.auto_pull |= flags.auto_pull;
        self.auto_push |= flags.auto_push;
        if let Some(interval) = flags.interval {
            self.interval = interval;
        }
        self
    }

    /// # Errors
    ///
    /// Returns `Config` describing the first invalid option.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("interval", self.interval),
            ("commit-debounce", self.commit_debounce),
            ("rpc-timeout", self.rpc_timeout),
            ("drain-timeout", self.drain_timeout),
            ("git-timeout", self.git_timeout),
        ] {
            if value.is_zero() {
                return Err(BeadsError::Config(format!("daemon.{name} must be non-zero")));
            }
        }
        if self.auto_push && !self.auto_commit {
            return Err(BeadsError::Config(
                "auto-push requires auto-commit".to_string(),
            ));
        }
        if self.remote.trim().is_empty() {
            return Err(BeadsError::Config("daemon.remote must not be empty".to_string()));
        }
        Ok(())
    }

    /// Flags that reproduce this configuration on a `bd daemon run` command line.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.auto_commit {
            args.push("--auto-commit".to_string());
        }
        if self.auto_pull {
            args.push("--auto-pull".to_string());
        }
        if self.auto_push {
            args.push("--auto-push".to_string());
        }
        args.push("--interval".to_string());
        args.push(format_duration(self.interval));
        args
    }
}

/// Global CLI flags that influence configuration and backend choice.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub actor: Option<String>,
    pub json: Option<bool>,
    pub no_db: Option<bool>,
    pub no_daemon: Option<bool>,
    /// Lock and busy timeout in milliseconds.
    pub lock_timeout: Option<u64>,
    pub verbose: u8,
    pub quiet: bool,
}

impl CliOverrides {
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout.map(Duration::from_millis)
    }
}

/// `issue-prefix` from project config, if set.
#[must_use]
pub fn issue_prefix(layer: &ConfigLayer) -> Option<String> {
    layer
        .get("issue-prefix")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

mod duration_text {
    use crate::util::time::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Resolve the actor: flag, then config `actor`, then `git config user.name`,
/// then `$USER`, then `unknown`.
#[must_use]
pub fn resolve_actor(cli_actor: Option<&str>, layer: &ConfigLayer) -> String {
    cli_actor
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| layer.get("actor").map(str::to_string))
        .or_else(git_user_name)
        .or_else(|| env::var("USER").ok().map(|value| value.trim().to_string()))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_user_name() -> Option<String> {
    let output = Command::new("git")
        .args(["config", "user.name"])
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}
