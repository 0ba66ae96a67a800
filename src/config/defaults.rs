//! Built-in defaults (layer 1)
//!
//! The defaults reproduce the reference layout: uploads are staged in
//! `uploads/`, extracted under `lockbud/Code/dest/<stem>`, and checked by
//! running `./detect.sh dest/<stem>` from `lockbud/Code`.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    pub bind: String,
    /// Upload size limit (default: 10 MiB)
    pub max_upload_bytes: u64,
    pub redirect_to: String,
    pub static_root: String,

    pub workspace_root: String,
    pub staging_dir: String,
    pub extract_dir: String,
    pub lock_timeout_seconds: u64,

    /// Destinations kept besides the current one (0 = unlimited)
    pub max_destinations: usize,
    /// Destination age limit (0 = unlimited)
    pub max_age_hours: u64,

    pub tool_program: String,
    pub tool_args: Vec<String>,
    pub tool_working_dir: String,
    pub tool_timeout_seconds: u64,
    pub tool_grace_seconds: u64,
    pub tool_max_output_bytes: usize,

    pub extract_max_entries: u64,
    pub extract_max_total_bytes: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            redirect_to: "/".to_string(),
            static_root: ".".to_string(),

            workspace_root: ".".to_string(),
            staging_dir: "uploads".to_string(),
            extract_dir: "lockbud/Code/dest".to_string(),
            lock_timeout_seconds: 30,

            max_destinations: 16,
            max_age_hours: 0,

            tool_program: "./detect.sh".to_string(),
            tool_args: vec!["dest/{name}".to_string()],
            tool_working_dir: "lockbud/Code".to_string(),
            tool_timeout_seconds: 600,
            tool_grace_seconds: 5,
            tool_max_output_bytes: zipcheck_runner::DEFAULT_MAX_OUTPUT_BYTES,

            extract_max_entries: 100_000,
            extract_max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "server": {
                "bind": self.bind,
                "max_upload_bytes": self.max_upload_bytes,
                "redirect_to": self.redirect_to,
                "static_root": self.static_root
            },
            "workspace": {
                "root": self.workspace_root,
                "staging_dir": self.staging_dir,
                "extract_dir": self.extract_dir,
                "lock_timeout_seconds": self.lock_timeout_seconds
            },
            "retention": {
                "max_destinations": self.max_destinations,
                "max_age_hours": self.max_age_hours
            },
            "tool": {
                "program": self.tool_program,
                "args": self.tool_args,
                "working_dir": self.tool_working_dir,
                "timeout_seconds": self.tool_timeout_seconds,
                "grace_seconds": self.tool_grace_seconds,
                "env": {},
                "max_output_bytes": self.tool_max_output_bytes
            },
            "extract": {
                "max_entries": self.extract_max_entries,
                "max_total_bytes": self.extract_max_total_bytes
            }
        })
    }
}
