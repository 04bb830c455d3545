//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.kontrol/config.json`) and environment.
//! Environment variables override the file for the secret, the permissions file, the
//! insecure command endpoint and the response type.

use crate::allowlist::AllowList;
use crate::auth::SharedSecret;
use crate::render::ResponseFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "KONTROL_CONFIG_PATH";
pub const SHARED_SECRET_ENV: &str = "KONTROL_SHARED_SECRET";
pub const PERMISSION_FILE_ENV: &str = "KONTROL_PERMISSION_FILE";
pub const INSECURE_COMMANDS_ENV: &str = "KONTROL_INSECURE_COMMANDS";
pub const RESPONSE_TYPE_ENV: &str = "KONTROL_RESPONSE_TYPE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("parsing permissions file {path}: {source}")]
    AllowList {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("no shared secret configured (set auth.sharedSecret or KONTROL_SHARED_SECRET)")]
    MissingSharedSecret,

    #[error("shared secret is not valid base64")]
    BadSharedSecret,

    #[error("no permissions file configured (set permissions.file or KONTROL_PERMISSION_FILE)")]
    MissingPermissionFile,

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("cluster backend: {0}")]
    Cluster(String),
}

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port (default 9000).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a buffered request body, in bytes (default 1 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Base64-encoded HMAC key shared with the Teams outgoing webhook. Overridden by KONTROL_SHARED_SECRET.
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsConfig {
    /// YAML file with `verbs`, `resources` and `namespaces` lists. Relative paths are resolved
    /// against the config file's parent. Overridden by KONTROL_PERMISSION_FILE.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    /// Mount the unauthenticated `POST /command` endpoint. Only for trusted networks.
    #[serde(default)]
    pub insecure_endpoint: bool,

    /// Reply format: "teams" (adaptive card) or "json".
    #[serde(default)]
    pub response_type: ResponseFormat,

    /// Deadline for a single backend call (default 30s).
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_backend_timeout_secs() -> u64 {
    30
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            insecure_endpoint: false,
            response_type: ResponseFormat::default(),
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Kubernetes API server (in-cluster service account unless apiServer is set).
    #[default]
    Kubernetes,
    /// In-process pod store; nothing outside the process is touched.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// API server URL (e.g. "https://10.0.0.1:6443"). When absent, the in-cluster service account is used.
    pub api_server: Option<String>,

    /// File holding a bearer token; re-read on every request so rotated tokens are picked up.
    pub token_file: Option<PathBuf>,

    /// PEM CA bundle for the API server certificate.
    pub ca_file: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Kubeconfig to use instead of in-cluster discovery. When neither this nor apiServer is
    /// set and the process is not in a cluster, KUBECONFIG or ~/.kube/config is read.
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (default: its current-context).
    pub context: Option<String>,
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".kontrol").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf), ConfigError> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?
    };
    Ok((config, path))
}

/// Process environment; blank values count as unset.
fn env_value(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok().as_deref())
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Env wins over the file; blank values count as unset.
fn pick(env: Option<String>, file: Option<&str>) -> Option<String> {
    env.or_else(|| non_empty(file))
}

/// Resolve the shared secret: env KONTROL_SHARED_SECRET overrides config.
pub fn resolve_shared_secret(config: &Config) -> Option<String> {
    shared_secret_from(config, env_value)
}

fn shared_secret_from(config: &Config, env: impl Fn(&str) -> Option<String>) -> Option<String> {
    pick(env(SHARED_SECRET_ENV), config.auth.shared_secret.as_deref())
}

/// Resolve the permissions file: env KONTROL_PERMISSION_FILE overrides config.
/// Relative paths are resolved against the config file's parent directory.
pub fn resolve_permission_file(config: &Config, config_path: &Path) -> Option<PathBuf> {
    permission_file_from(config, config_path, env_value)
}

fn permission_file_from(
    config: &Config,
    config_path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    let file = env(PERMISSION_FILE_ENV)
        .map(PathBuf::from)
        .or_else(|| config.permissions.file.clone())
        .filter(|p| !p.as_os_str().is_empty())?;
    Some(relative_to_config(&file, config_path))
}

fn relative_to_config(file: &Path, config_path: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(file)
}

/// Env KONTROL_INSECURE_COMMANDS=TRUE enables the raw command endpoint; any other set value disables it.
pub fn resolve_insecure_commands(config: &Config) -> bool {
    insecure_commands_from(config, env_value)
}

fn insecure_commands_from(config: &Config, env: impl Fn(&str) -> Option<String>) -> bool {
    match env(INSECURE_COMMANDS_ENV) {
        Some(v) => v == "TRUE",
        None => config.commands.insecure_endpoint,
    }
}

/// Env KONTROL_RESPONSE_TYPE ("TEAMS" or "JSON", any case) overrides config.
pub fn resolve_response_type(config: &Config) -> Result<ResponseFormat, ConfigError> {
    response_type_from(config, env_value)
}

fn response_type_from(
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResponseFormat, ConfigError> {
    match env(RESPONSE_TYPE_ENV) {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: RESPONSE_TYPE_ENV,
            value: v,
        }),
        None => Ok(config.commands.response_type),
    }
}

/// Runtime settings after env overrides and validation. Built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub secret: SharedSecret,
    pub allowlist: Arc<AllowList>,
    pub response_format: ResponseFormat,
    pub insecure_commands: bool,
    pub backend_timeout: Duration,
}

impl Settings {
    /// Apply env overrides, require a decodable secret and load the allow-list.
    pub fn resolve(config: &Config, config_path: &Path) -> Result<Self, ConfigError> {
        Self::resolve_with_env(config, config_path, env_value)
    }

    /// As `resolve`, reading overrides from `env` instead of the process environment.
    pub fn resolve_with_env(
        config: &Config,
        config_path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let secret = shared_secret_from(config, &env).ok_or(ConfigError::MissingSharedSecret)?;
        let secret = SharedSecret::new(secret);
        if secret.decode().is_err() {
            return Err(ConfigError::BadSharedSecret);
        }
        let permission_file = permission_file_from(config, config_path, &env)
            .ok_or(ConfigError::MissingPermissionFile)?;
        let allowlist = AllowList::load(&permission_file)?;
        if config.commands.backend_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "commands.backendTimeoutSecs",
                value: "0".to_string(),
            });
        }
        Ok(Self {
            bind: config.server.bind.trim().to_string(),
            port: config.server.port,
            max_body_bytes: config.server.max_body_bytes,
            secret,
            allowlist: Arc::new(allowlist),
            response_format: response_type_from(config, &env)?,
            insecure_commands: insecure_commands_from(config, &env),
            backend_timeout: Duration::from_secs(config.commands.backend_timeout_secs),
        })
    }
}
