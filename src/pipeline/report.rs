//! Failure taxonomy, stable exit codes, and the per-run report.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use zipcheck_archive::ExtractReport;
use zipcheck_runner::AnalysisResult;

use super::state::{PipelineState, StateTransition};
use super::PipelineError;
use crate::workspace::RetentionReport;

/// First line of every successful response
pub const GREETING: &str = "hello world";

/// Which stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// No archive in the staging directory
    NotFound,
    /// Extraction failed
    Extract,
    /// The analysis tool could not be started
    Spawn,
    /// The analysis tool hit its deadline
    Timeout,
    /// Workspace lock or filesystem failure outside extraction
    Workspace,
}

impl FailureKind {
    /// Stable process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::NotFound => 10,
            FailureKind::Extract => 20,
            FailureKind::Spawn => 30,
            FailureKind::Timeout => 31,
            FailureKind::Workspace => 40,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::Extract => "EXTRACT",
            FailureKind::Spawn => "SPAWN",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Workspace => "WORKSPACE",
        }
    }
}

/// Status class handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success,
    ClientError,
    ServerError,
    Timeout,
}

impl PipelineOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineOutcome::Success => 200,
            PipelineOutcome::ClientError => 422,
            PipelineOutcome::ServerError => 500,
            PipelineOutcome::Timeout => 504,
        }
    }
}

/// Everything one pipeline pass produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub archive: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub extraction: Option<ExtractReport>,
    pub analysis: Option<AnalysisResult>,
    pub retention: Option<RetentionReport>,
    pub failure: Option<PipelineError>,
    pub history: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }

    pub fn outcome(&self) -> PipelineOutcome {
        match &self.failure {
            None => PipelineOutcome::Success,
            Some(err) => err.outcome(),
        }
    }

    /// 0 when done, else the failure's stable code
    pub fn exit_code(&self) -> i32 {
        self.failure.as_ref().map_or(0, |e| e.kind().exit_code())
    }

    /// Response body.
    ///
    /// An aborted run renders only its failure message. A finished run
    /// renders the greeting, the extraction confirmation, the tool's exit
    /// status and its captured output.
    pub fn body(&self) -> String {
        if let Some(err) = &self.failure {
            return format!("{}\n", err);
        }

        let mut body = String::new();
        let _ = writeln!(body, "{}", GREETING);

        if let (Some(archive), Some(dest)) = (&self.archive, &self.destination) {
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let _ = write!(body, "extracted {} to {}", name, dest.display());
            if let Some(x) = &self.extraction {
                let _ = write!(
                    body,
                    " ({} files, {} directories, {} bytes)",
                    x.files, x.directories, x.bytes_written
                );
            }
            body.push('\n');
        }

        if let Some(result) = &self.analysis {
            let _ = writeln!(body, "analysis tool {}", result.status_line());
            body.push_str(&result.output_text());
            if result.truncated {
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                body.push_str("[output truncated]\n");
            }
        }

        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_stable() {
        assert_eq!(FailureKind::NotFound.exit_code(), 10);
        assert_eq!(FailureKind::Extract.exit_code(), 20);
        assert_eq!(FailureKind::Spawn.exit_code(), 30);
        assert_eq!(FailureKind::Timeout.exit_code(), 31);
        assert_eq!(FailureKind::Workspace.exit_code(), 40);
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(PipelineOutcome::Success.http_status(), 200);
        assert_eq!(PipelineOutcome::ClientError.http_status(), 422);
        assert_eq!(PipelineOutcome::ServerError.http_status(), 500);
        assert_eq!(PipelineOutcome::Timeout.http_status(), 504);
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");
    }
}
