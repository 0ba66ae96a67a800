//! zipcheck - upload, unpack and statically analyze ZIP archives
//!
//! An uploaded archive is staged in the workspace, extracted into a
//! per-archive destination with every entry path checked against the
//! destination root, and handed to an external analysis tool whose output is
//! returned to the caller. The staging directory can also be downloaded as a
//! freshly built, deterministic ZIP.

pub mod config;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod workspace;

pub use config::{ConfigError, Settings};
pub use pipeline::{FailureKind, Pipeline, PipelineError, PipelineReport, PipelineState};
pub use workspace::{NotFoundError, RetentionPolicy, UploadError, Workspace};
