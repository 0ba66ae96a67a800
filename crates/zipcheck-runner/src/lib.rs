//! Invocation of the external static-analysis tool.
//!
//! The tool is an opaque executable: it is started with a working directory
//! and arguments, its stdout and stderr are captured into one buffer, and its
//! exit status is reported without interpretation.

pub mod invoker;
pub mod timeout;

pub use invoker::{
    run, AnalysisResult, InvocationSpec, InvokeError, Invoker, DEFAULT_MAX_OUTPUT_BYTES,
    ENV_ALLOWLIST,
};
pub use timeout::{TimeoutConfig, TimeoutEnforcer, TimeoutValidationError};
