//! Typed settings built from the merged layers.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use zipcheck_archive::ExtractLimits;
use zipcheck_runner::TimeoutConfig;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::workspace::MAX_AGE_HOURS;

/// Config file picked up from the current directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "zipcheck.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: String,
    pub max_upload_bytes: u64,
    /// Where a successful upload redirects to
    pub redirect_to: String,
    /// Directory served for unmatched GET paths
    pub static_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    /// Relative to `root`
    pub staging_dir: PathBuf,
    /// Relative to `root`
    pub extract_dir: PathBuf,
    pub lock_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetentionSettings {
    pub max_destinations: usize,
    pub max_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    pub program: String,
    /// `{dest}` and `{name}` are substituted per run
    pub args: Vec<String>,
    /// Relative to the workspace root; empty means the destination itself
    pub working_dir: String,
    /// 0 disables the deadline
    pub timeout_seconds: u64,
    pub grace_seconds: u64,
    pub env: BTreeMap<String, String>,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtractSettings {
    pub max_entries: u64,
    pub max_total_bytes: u64,
}

/// Fully merged settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub workspace: WorkspaceSettings,
    pub retention: RetentionSettings,
    pub tool: ToolSettings,
    pub extract: ExtractSettings,
}

/// Settings plus the layers they came from
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub sources: Vec<ConfigSource>,
}

impl Default for Settings {
    fn default() -> Self {
        let d = BuiltinDefaults::default();
        Settings {
            server: ServerSettings {
                bind: d.bind,
                max_upload_bytes: d.max_upload_bytes,
                redirect_to: d.redirect_to,
                static_root: PathBuf::from(d.static_root),
            },
            workspace: WorkspaceSettings {
                root: PathBuf::from(d.workspace_root),
                staging_dir: PathBuf::from(d.staging_dir),
                extract_dir: PathBuf::from(d.extract_dir),
                lock_timeout_seconds: d.lock_timeout_seconds,
            },
            retention: RetentionSettings {
                max_destinations: d.max_destinations,
                max_age_hours: d.max_age_hours,
            },
            tool: ToolSettings {
                program: d.tool_program,
                args: d.tool_args,
                working_dir: d.tool_working_dir,
                timeout_seconds: d.tool_timeout_seconds,
                grace_seconds: d.tool_grace_seconds,
                env: BTreeMap::new(),
                max_output_bytes: d.tool_max_output_bytes,
            },
            extract: ExtractSettings {
                max_entries: d.extract_max_entries,
                max_total_bytes: d.extract_max_total_bytes,
            },
        }
    }
}

impl Settings {
    /// Build settings from the layers.
    ///
    /// An explicit `config_path` must exist. Without one, `zipcheck.toml` in
    /// the current directory is used when present.
    pub fn load(
        config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<LoadedSettings, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
        }];

        let file = match config_path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                candidate.exists().then_some(candidate)
            }
        };

        if let Some(path) = file {
            layers.push(load_toml_file(&path)?);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
            });
        }

        let settings = Self::from_value(merge_layers(layers))?;
        settings.validate()?;

        Ok(LoadedSettings { settings, sources })
    }

    /// Deserialize a merged value
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return invalid(format!("server.bind is not a socket address: {}", self.server.bind));
        }
        if self.server.max_upload_bytes == 0 {
            return invalid("server.max_upload_bytes must be greater than 0".to_string());
        }
        if !self.server.redirect_to.starts_with('/') {
            return invalid("server.redirect_to must be an absolute path".to_string());
        }

        if self.workspace.staging_dir.as_os_str().is_empty()
            || self.workspace.extract_dir.as_os_str().is_empty()
        {
            return invalid("workspace.staging_dir and workspace.extract_dir must be set".to_string());
        }
        let staging = normalize_lexically(&self.staging_path());
        let extract_root = normalize_lexically(&self.extract_root());
        if staging.starts_with(&extract_root) || extract_root.starts_with(&staging) {
            return invalid(format!(
                "workspace.staging_dir ({}) and workspace.extract_dir ({}) must not contain each other",
                staging.display(),
                extract_root.display()
            ));
        }
        if let Some(tool_dir) = self.tool_working_dir() {
            if normalize_lexically(&tool_dir).starts_with(&extract_root) {
                return invalid(format!(
                    "tool.working_dir ({}) must not be inside workspace.extract_dir",
                    tool_dir.display()
                ));
            }
        }
        if self.workspace.lock_timeout_seconds == 0 {
            return invalid("workspace.lock_timeout_seconds must be greater than 0".to_string());
        }

        if self.tool.program.trim().is_empty() {
            return invalid("tool.program must be set".to_string());
        }
        if self.tool.max_output_bytes == 0 {
            return invalid("tool.max_output_bytes must be greater than 0".to_string());
        }
        self.timeout()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("tool: {}", e)))?;

        if self.retention.max_age_hours > MAX_AGE_HOURS {
            return invalid(format!(
                "retention.max_age_hours must be at most {}, got {}",
                MAX_AGE_HOURS, self.retention.max_age_hours
            ));
        }

        if self.extract.max_entries == 0 || self.extract.max_total_bytes == 0 {
            return invalid("extract limits must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad bind address: {}", self.server.bind)))
    }

    pub fn staging_path(&self) -> PathBuf {
        self.workspace.root.join(&self.workspace.staging_dir)
    }

    pub fn extract_root(&self) -> PathBuf {
        self.workspace.root.join(&self.workspace.extract_dir)
    }

    /// Tool working directory, `None` when it should be the destination
    pub fn tool_working_dir(&self) -> Option<PathBuf> {
        if self.tool.working_dir.is_empty() {
            None
        } else {
            Some(self.workspace.root.join(&self.tool.working_dir))
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.workspace.lock_timeout_seconds)
    }

    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig {
            overall_seconds: self.tool.timeout_seconds,
            grace_seconds: self.tool.grace_seconds,
        }
    }

    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_entries: self.extract.max_entries,
            max_total_bytes: self.extract.max_total_bytes,
        }
    }
}

fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(toml_to_json(toml_value))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
