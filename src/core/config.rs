//! Layered JSON configuration.
//!
//! `common.json` is overlaid by `<env>.json` and then by the optional
//! `local.json`; the platform token may come from `BITBUCKET_API_TOKEN`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const TOKEN_ENV_VAR: &str = "BITBUCKET_API_TOKEN";
pub const CONFIG_DIR_ENV_VAR: &str = "DEPLOY_MANAGER_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "configs";

const BASE_REQUIRED_KEYS: &[&str] = &[
    "remote_git_path",
    "path_to_exportpackage",
    "path_to_importpackage",
    "path_to_deployjobs",
    "meta_repo",
    "appserver",
    "display",
    "batch_server",
    "is_bitbucket_server",
    "bitbucket_project_or_workspace",
    "bitbucket_host",
    "dm_runtime_base_dir",
];

const ENV_REQUIRED_KEYS: &[&str] = &[
    "deploy_user",
    "server_machine",
    "server_port",
    "deployed_jobs_dir",
    "meta_profile",
    "ssh_host",
    "approvals",
];

const ALLOWED_EMPTY: &[&str] = &["display"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Dev,
    Uat,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Uat => "UAT",
            Environment::Prod => "PROD",
        }
    }

    /// Name of the per-environment config file, without extension.
    pub fn file_stem(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "DEV" => Ok(Environment::Dev),
            "UAT" => Ok(Environment::Uat),
            "PROD" => Ok(Environment::Prod),
            _ => Err(Error::validation_invalid_argument(
                "env",
                format!("Unknown environment '{}'", s),
                Some(vec!["DEV".to_string(), "UAT".to_string(), "PROD".to_string()]),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    pub remote_git_path: String,
    pub path_to_exportpackage: String,
    pub path_to_importpackage: String,
    pub path_to_deployjobs: String,
    pub meta_repo: String,
    pub appserver: String,
    #[serde(default)]
    pub display: String,
    #[serde(deserialize_with = "string_or_number")]
    pub batch_server: String,
    pub is_bitbucket_server: bool,
    pub bitbucket_project_or_workspace: String,
    pub bitbucket_host: String,
    pub dm_runtime_base_dir: String,

    pub deploy_user: String,
    #[serde(deserialize_with = "string_or_number")]
    pub server_machine: String,
    #[serde(deserialize_with = "string_or_number")]
    pub server_port: String,
    pub deployed_jobs_dir: String,
    pub meta_profile: String,
    pub ssh_host: String,
    #[serde(deserialize_with = "count_from_number_or_string")]
    pub approvals: u32,

    pub bitbucket_api_token: String,

    /// Profile used by the metadata export tool; falls back to `meta_profile`.
    #[serde(default)]
    pub dev_meta_profile: Option<String>,
    #[serde(default = "default_sas_command")]
    pub sas_command: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_sas_command() -> String {
    "sas".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn count_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| serde::de::Error::custom("expected a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| serde::de::Error::custom("expected a non-negative integer")),
        other => Err(serde::de::Error::custom(format!(
            "expected a non-negative integer, got {}",
            other
        ))),
    }
}

impl DeployConfig {
    /// Runtime base directory with whitespace and trailing slashes removed.
    /// Must be an absolute path.
    pub fn runtime_base_dir(&self) -> Result<String> {
        let cleaned = self.dm_runtime_base_dir.trim().trim_end_matches('/');
        if cleaned.is_empty() {
            return Err(Error::config_invalid_value(
                "dm_runtime_base_dir",
                Some(self.dm_runtime_base_dir.clone()),
                "must not be empty",
            ));
        }
        if !cleaned.starts_with('/') {
            return Err(Error::config_invalid_value(
                "dm_runtime_base_dir",
                Some(self.dm_runtime_base_dir.clone()),
                "must be an absolute path (start with '/')",
            ));
        }
        Ok(cleaned.to_string())
    }

    pub fn export_profile(&self) -> &str {
        self.dev_meta_profile
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.meta_profile)
    }

    /// Stand-in configuration for `--mock` runs.
    pub fn mock() -> Self {
        let value = |key: &str| format!("mock_{}", key);
        Self {
            remote_git_path: "git".to_string(),
            path_to_exportpackage: value("exportpackage"),
            path_to_importpackage: value("importpackage"),
            path_to_deployjobs: value("deployjobs"),
            meta_repo: value("meta_repo"),
            appserver: value("appserver"),
            display: ":0".to_string(),
            batch_server: value("batch_server"),
            is_bitbucket_server: true,
            bitbucket_project_or_workspace: "MOCK".to_string(),
            bitbucket_host: "bitbucket.mock".to_string(),
            dm_runtime_base_dir: "/mock_runtime".to_string(),
            deploy_user: "mock_user".to_string(),
            server_machine: value("server_machine"),
            server_port: "8591".to_string(),
            deployed_jobs_dir: "/mock_runtime/deployed_jobs".to_string(),
            meta_profile: value("meta_profile"),
            ssh_host: "mock_host".to_string(),
            approvals: 0,
            bitbucket_api_token: "mock_token".to_string(),
            dev_meta_profile: None,
            sas_command: "sas".to_string(),
            ssh_port: 22,
            identity_file: None,
            command_timeout_secs: None,
            http_timeout_secs: 30,
        }
    }
}

/// Config directory from the CLI flag, then the environment, then `./configs`.
pub fn resolve_config_dir(cli_value: Option<&str>) -> PathBuf {
    let raw = cli_value
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_DIR_ENV_VAR).ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());
    PathBuf::from(shellexpand::tilde(&raw).to_string())
}

/// Load and validate configuration for `env`, taking the token from the process environment.
pub fn load(config_dir: &Path, env: Environment) -> Result<DeployConfig> {
    let token = std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty());
    load_with_token(config_dir, env, token)
}

pub fn load_with_token(
    config_dir: &Path,
    env: Environment,
    token: Option<String>,
) -> Result<DeployConfig> {
    let mut merged = Map::new();
    for (name, required) in [
        ("common".to_string(), true),
        (env.file_stem(), true),
        ("local".to_string(), false),
    ] {
        let path = config_dir.join(format!("{}.json", name));
        if let Some(layer) = read_layer(&path, required)? {
            merged.extend(layer);
        }
    }

    if let Some(token) = token {
        merged.insert("bitbucket_api_token".to_string(), Value::String(token));
    }

    validate_keys(&merged)?;

    serde_json::from_value(Value::Object(merged)).map_err(|e| {
        Error::config_invalid_value("config", None, e.to_string())
    })
}

fn read_layer(path: &Path, required: bool) -> Result<Option<Map<String, Value>>> {
    if !path.is_file() {
        if required {
            return Err(Error::config_missing_key(
                "file",
                Some(path.display().to_string()),
            ));
        }
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", path.display()))))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;

    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(Error::config_invalid_value(
            path.display().to_string(),
            None,
            "file must contain a JSON object",
        )),
    }
}

fn validate_keys(merged: &Map<String, Value>) -> Result<()> {
    let required: Vec<&str> = BASE_REQUIRED_KEYS
        .iter()
        .chain(ENV_REQUIRED_KEYS)
        .copied()
        .chain(std::iter::once("bitbucket_api_token"))
        .collect();

    let mut missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !merged.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(Error::config_missing_key(missing.join(", "), None));
    }

    let mut empty: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !ALLOWED_EMPTY.contains(key))
        .filter(|key| is_empty_value(merged.get(*key)))
        .collect();
    if !empty.is_empty() {
        empty.sort_unstable();
        return Err(Error::config_invalid_value(
            empty.join(", "),
            None,
            "required value is empty",
        ));
    }

    Ok(())
}

// `false` and `0` are legitimate values (cloud platform, DEV approvals).
fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}
