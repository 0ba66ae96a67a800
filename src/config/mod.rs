//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file (`--config PATH`, or `zipcheck.toml` in the current directory)
//! 3. CLI flags

mod defaults;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    ConfigError, ConfigOrigin, ConfigSource, ExtractSettings, LoadedSettings, RetentionSettings,
    ServerSettings, Settings, ToolSettings, WorkspaceSettings, DEFAULT_CONFIG_FILE,
};
