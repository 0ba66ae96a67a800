//! Pipeline orchestrator
//!
//! One pass per call: locate the uploaded archive, extract it into its
//! destination, run the analysis tool there, and compose the response. Each
//! stage is attempted once; the first failure aborts the run. The whole pass
//! holds the workspace lock.

mod report;
mod state;

pub use report::{FailureKind, PipelineOutcome, PipelineReport, GREETING};
pub use state::{PipelineState, StateError, StateMachine, StateTransition};

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use zipcheck_archive::{ExtractError, Extractor};
use zipcheck_runner::{InvocationSpec, InvokeError, Invoker};

use crate::config::Settings;
use crate::workspace::{archive_stem, LockError, NotFoundError, RetentionPolicy, Workspace};

/// Stage failures. The display text is the single message an aborted run
/// reports.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no archive uploaded ({0})")]
    NotFound(#[source] NotFoundError),

    #[error("extraction failed ({}): {0}", .0.kind())]
    Extract(#[source] ExtractError),

    #[error("failed to start analysis tool {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("analysis tool timed out after {seconds}s")]
    Timeout { seconds: u64, partial_output: Vec<u8> },

    #[error("analysis tool failed while running: {0}")]
    ToolIo(#[source] io::Error),

    #[error("workspace unavailable: {0}")]
    Lock(#[from] LockError),

    #[error("workspace I/O error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("internal error: {0}")]
    State(#[from] StateError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::NotFound(_) => FailureKind::NotFound,
            PipelineError::Extract(_) => FailureKind::Extract,
            PipelineError::Spawn { .. } | PipelineError::ToolIo(_) => FailureKind::Spawn,
            PipelineError::Timeout { .. } => FailureKind::Timeout,
            PipelineError::Lock(_) | PipelineError::Workspace { .. } | PipelineError::State(_) => {
                FailureKind::Workspace
            }
        }
    }

    pub fn outcome(&self) -> PipelineOutcome {
        match self {
            PipelineError::Extract(ExtractError::Io { .. }) => PipelineOutcome::ServerError,
            PipelineError::Extract(_) => PipelineOutcome::ClientError,
            PipelineError::Timeout { .. } => PipelineOutcome::Timeout,
            _ => PipelineOutcome::ServerError,
        }
    }
}

impl From<InvokeError> for PipelineError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Spawn { program, source } => PipelineError::Spawn { program, source },
            InvokeError::Timeout {
                seconds,
                partial_output,
            } => PipelineError::Timeout {
                seconds,
                partial_output,
            },
            InvokeError::Io(e) => PipelineError::ToolIo(e),
        }
    }
}

/// How the analysis tool is invoked for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    /// `{dest}` becomes the absolute destination, `{name}` the archive stem
    pub args: Vec<String>,
    /// Fixed working directory, or the destination when `None`
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Concrete invocation for one destination
    pub fn render(&self, destination: &Path, name: &str) -> InvocationSpec {
        let absolute = destination
            .canonicalize()
            .unwrap_or_else(|_| destination.to_path_buf());
        let dest = absolute.to_string_lossy();

        let args = self
            .args
            .iter()
            .map(|a| a.replace("{dest}", &dest).replace("{name}", name));
        let working_dir = self
            .working_dir
            .clone()
            .unwrap_or_else(|| destination.to_path_buf());

        let mut spec = InvocationSpec::new(self.program.clone(), working_dir).args(args);
        spec.env = self.env.clone();
        spec
    }
}

/// The orchestrator.
#[derive(Debug, Clone)]
pub struct Pipeline {
    workspace: Workspace,
    extractor: Extractor,
    invoker: Invoker,
    tool: ToolCommand,
    retention: RetentionPolicy,
}

impl Pipeline {
    pub fn new(workspace: Workspace, tool: ToolCommand) -> Self {
        Self {
            workspace,
            extractor: Extractor::new(),
            invoker: Invoker::new(),
            tool,
            retention: RetentionPolicy::unlimited(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut tool = ToolCommand::new(settings.tool.program.clone())
            .with_args(settings.tool.args.iter().cloned());
        tool.working_dir = settings.tool_working_dir();
        tool.env = settings.tool.env.clone();

        Self::new(Workspace::from_settings(settings), tool)
            .with_extractor(Extractor::new().with_limits(settings.extract_limits()))
            .with_invoker(
                Invoker::new()
                    .with_timeout(settings.timeout())
                    .with_max_output_bytes(settings.tool.max_output_bytes),
            )
            .with_retention(RetentionPolicy::from_settings(settings))
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_invoker(mut self, invoker: Invoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run one pass. Always returns a report; failures are inside it.
    pub fn run(&self) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut machine = StateMachine::new();
        let mut report = PipelineReport {
            run_id,
            state: PipelineState::Idle,
            archive: None,
            destination: None,
            extraction: None,
            analysis: None,
            retention: None,
            failure: None,
            history: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        info!(%run_id, "pipeline started");
        if let Err(err) = self.execute(run_id, &mut machine, &mut report) {
            warn!(%run_id, state = %machine.state(), kind = err.kind().as_str(), error = %err, "pipeline aborted");
            machine.abort();
            report.failure = Some(err);
        }

        report.state = machine.state();
        report.history = machine.into_history();
        report.finished_at = Utc::now();
        info!(%run_id, state = %report.state, exit_code = report.exit_code(), "pipeline finished");
        report
    }

    fn execute(
        &self,
        run_id: Uuid,
        machine: &mut StateMachine,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        let _lock = self.workspace.lock()?;

        let archive = self
            .workspace
            .locate_uploaded_archive()
            .map_err(PipelineError::NotFound)?;
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination = self.workspace.destination_for(&archive_name);
        report.archive = Some(archive.clone());
        report.destination = Some(destination.clone());
        machine.transition(PipelineState::Located)?;
        info!(%run_id, archive = %archive.display(), "archive located");

        self.workspace
            .prepare_destination(&destination)
            .map_err(|source| PipelineError::Workspace {
                path: destination.clone(),
                source,
            })?;
        let extraction = self
            .extractor
            .extract(&archive, &destination)
            .map_err(PipelineError::Extract)?;
        info!(
            %run_id,
            destination = %destination.display(),
            files = extraction.files,
            bytes = extraction.bytes_written,
            "archive extracted"
        );
        report.extraction = Some(extraction);
        machine.transition(PipelineState::Extracted)?;

        match self
            .retention
            .apply(self.workspace.extract_root(), Some(&destination))
        {
            Ok(r) => {
                if !r.removed.is_empty() {
                    info!(%run_id, removed = r.removed.len(), "evicted old destinations");
                }
                report.retention = Some(r);
            }
            Err(e) => warn!(%run_id, error = %e, "retention pass failed"),
        }

        let spec = self.tool.render(&destination, &archive_stem(&archive_name));
        let analysis = self.invoker.run(&spec)?;
        report.analysis = Some(analysis);
        machine.transition(PipelineState::Invoked)?;

        machine.transition(PipelineState::Done)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholders() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dest = tmp.path().join("dest").join("sample");
        std::fs::create_dir_all(&dest).unwrap();

        let tool = ToolCommand::new("./detect.sh")
            .with_args(["dest/{name}", "--root={dest}"])
            .with_working_dir("/opt/lockbud/Code");
        let spec = tool.render(&dest, "sample");

        let abs = dest.canonicalize().unwrap();
        assert_eq!(spec.program, "./detect.sh");
        assert_eq!(
            spec.args,
            vec![
                "dest/sample".to_string(),
                format!("--root={}", abs.display())
            ]
        );
        assert_eq!(spec.working_dir, PathBuf::from("/opt/lockbud/Code"));
    }

    #[test]
    fn test_render_defaults_working_dir_to_destination() {
        let dest = PathBuf::from("/nonexistent/dest/sample");
        let spec = ToolCommand::new("lockbud").render(&dest, "sample");
        assert_eq!(spec.working_dir, dest);
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_error_classification() {
        let not_found = PipelineError::NotFound(NotFoundError::NoArchivePresent {
            staging_dir: PathBuf::from("uploads"),
        });
        assert_eq!(not_found.kind(), FailureKind::NotFound);
        assert_eq!(not_found.outcome().http_status(), 500);
        assert!(not_found.to_string().starts_with("no archive uploaded"));

        let traversal = PipelineError::Extract(ExtractError::PathTraversal {
            entry: "../x".to_string(),
            reason: zipcheck_archive::UnsafeReason::EscapesRoot,
        });
        assert_eq!(traversal.kind(), FailureKind::Extract);
        assert_eq!(traversal.outcome().http_status(), 422);
        assert!(traversal.to_string().contains("path_traversal"));

        let io = PipelineError::Extract(ExtractError::Io {
            path: PathBuf::from("dest"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        });
        assert_eq!(io.outcome().http_status(), 500);

        let spawn = PipelineError::from(InvokeError::Spawn {
            program: "./detect.sh".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        });
        assert_eq!(spawn.kind(), FailureKind::Spawn);
        assert!(spawn.to_string().starts_with("failed to start analysis tool"));

        let timeout = PipelineError::from(InvokeError::Timeout {
            seconds: 5,
            partial_output: Vec::new(),
        });
        assert_eq!(timeout.kind().exit_code(), 31);
        assert_eq!(timeout.outcome().http_status(), 504);
    }
}
