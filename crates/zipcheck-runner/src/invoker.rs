//! Runs the external analysis tool and captures its output.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::timeout::{TimeoutConfig, TimeoutEnforcer};

/// Environment variable allowlist - only these are inherited by the tool.
pub const ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR", "USER", "TERM"];

/// Default cap on captured output (16 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 8 * 1024;

/// Errors from invoking the tool.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("analysis tool did not finish within {seconds}s")]
    Timeout { seconds: u64, partial_output: Vec<u8> },

    #[error("I/O error while waiting for tool: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of one tool run. A non-zero exit is still a result.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Terminating signal number (unix)
    pub signal: Option<i32>,
    /// Interleaved stdout and stderr, in arrival order
    pub output: Vec<u8>,
    /// Output went past the cap and the rest was dropped
    pub truncated: bool,
    pub duration: Duration,
}

impl AnalysisResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Output rendered as text, invalid UTF-8 replaced
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// One-line description of how the tool exited
    pub fn status_line(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit status {}", code),
            (None, Some(sig)) => format!("terminated by signal {}", sig),
            (None, None) => "terminated".to_string(),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra variables set on top of the allowlisted ones
    pub env: BTreeMap<String, String>,
}

impl InvocationSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Captured output shared between the reader threads.
#[derive(Debug)]
struct Capture {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl Capture {
    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// The tool invoker.
#[derive(Debug, Clone)]
pub struct Invoker {
    timeout: TimeoutConfig,
    max_output_bytes: usize,
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new()
    }
}

impl Invoker {
    pub fn new() -> Self {
        Self {
            timeout: TimeoutConfig::unbounded(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Environment passed to the child: allowlisted variables from this
    /// process, then the invocation's own variables.
    pub fn build_environment(&self, spec: &InvocationSpec) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for key in ENV_ALLOWLIST {
            if let Ok(value) = std::env::var(key) {
                env.insert(key.to_string(), value);
            }
        }
        for (key, value) in &spec.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Run the tool to completion or until the deadline.
    pub fn run(&self, spec: &InvocationSpec) -> Result<AnalysisResult, InvokeError> {
        let env = self.build_environment(spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let start = Instant::now();
        let enforcer = TimeoutEnforcer::new(self.timeout);

        let mut child = command.spawn().map_err(|source| InvokeError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        info!(
            program = %spec.program,
            args = ?spec.args,
            working_dir = %spec.working_dir.display(),
            pid = child.id(),
            "started analysis tool"
        );

        let capture = Arc::new(Mutex::new(Capture {
            buf: Vec::new(),
            cap: self.max_output_bytes,
            truncated: false,
        }));
        let readers = [
            child.stdout.take().map(|s| spawn_reader(s, Arc::clone(&capture))),
            child.stderr.take().map(|s| spawn_reader(s, Arc::clone(&capture))),
        ];

        let status = loop {
            if enforcer.expired() {
                warn!(
                    program = %spec.program,
                    seconds = self.timeout.overall_seconds,
                    "analysis tool timed out, terminating"
                );
                terminate_child(&mut child, self.timeout.grace())?;
                join_readers(readers);
                let (partial_output, _) = take_capture(&capture);
                return Err(InvokeError::Timeout {
                    seconds: self.timeout.overall_seconds,
                    partial_output,
                });
            }

            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(poll_delay(&enforcer)),
            }
        };

        // Descendants of the tool can keep the pipes open after it exits.
        while readers.iter().flatten().any(|h| !h.is_finished()) {
            if enforcer.expired() {
                warn!(
                    program = %spec.program,
                    seconds = self.timeout.overall_seconds,
                    "analysis tool left processes holding its output, killing group"
                );
                kill_group(&child);
                join_readers(readers);
                let (partial_output, _) = take_capture(&capture);
                return Err(InvokeError::Timeout {
                    seconds: self.timeout.overall_seconds,
                    partial_output,
                });
            }
            thread::sleep(poll_delay(&enforcer));
        }

        join_readers(readers);
        let (output, truncated) = take_capture(&capture);
        if truncated {
            warn!(cap = self.max_output_bytes, "analysis output truncated");
        }

        let result = AnalysisResult {
            exit_code: status.code(),
            signal: exit_signal(&status),
            output,
            truncated,
            duration: start.elapsed(),
        };
        info!(
            program = %spec.program,
            status = %result.status_line(),
            output_bytes = result.output.len(),
            duration_ms = result.duration.as_millis() as u64,
            "analysis tool finished"
        );
        Ok(result)
    }
}

/// Run `executable` with `args` in `working_dir`, no deadline.
pub fn run(
    executable: &str,
    args: &[String],
    working_dir: &Path,
) -> Result<AnalysisResult, InvokeError> {
    let spec = InvocationSpec::new(executable, working_dir).args(args.iter().cloned());
    Invoker::new().run(&spec)
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    capture: Arc<Mutex<Capture>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut c) = capture.lock() {
                        c.push(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "output reader stopped");
                    break;
                }
            }
        }
    })
}

/// Poll interval, shortened so the deadline is not overslept.
fn poll_delay(enforcer: &TimeoutEnforcer) -> Duration {
    enforcer
        .remaining()
        .map_or(POLL_INTERVAL, |left| left.min(POLL_INTERVAL))
}

fn join_readers(readers: [Option<JoinHandle<()>>; 2]) {
    for handle in readers.into_iter().flatten() {
        let _ = handle.join();
    }
}

fn take_capture(capture: &Arc<Mutex<Capture>>) -> (Vec<u8>, bool) {
    match capture.lock() {
        Ok(mut c) => (std::mem::take(&mut c.buf), c.truncated),
        Err(poisoned) => {
            let mut c = poisoned.into_inner();
            (std::mem::take(&mut c.buf), c.truncated)
        }
    }
}

/// Terminate the child's process group gracefully then forcefully.
fn terminate_child(child: &mut Child, grace: Duration) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(child.id() as i32);
        let _ = signal::killpg(pgid, Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    let start = Instant::now();
    while start.elapsed() < grace {
        match child.try_wait()? {
            Some(_) => {
                kill_group(child);
                return Ok(());
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }

    let _ = child.kill();
    kill_group(child);
    let _ = child.wait();

    Ok(())
}

/// Make sure nothing the tool spawned is left holding the output pipes.
fn kill_group(child: &Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let _ = signal::killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = child;
}

fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str, dir: &Path) -> InvocationSpec {
        InvocationSpec::new("sh", dir).args(["-c", script])
    }

    #[test]
    fn test_captures_stdout_and_stderr() {
        let dir = TempDir::new().unwrap();
        let result = Invoker::new()
            .run(&sh("echo out; echo err 1>&2", dir.path()))
            .unwrap();

        let text = result.output_text();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
        assert_eq!(result.exit_code, Some(0));
        assert!(result.success());
        assert!(!result.truncated);
    }

    #[test]
    fn test_nonzero_exit_is_a_result() {
        let dir = TempDir::new().unwrap();
        let result = Invoker::new()
            .run(&sh("echo found 3 issues; exit 3", dir.path()))
            .unwrap();

        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success());
        assert_eq!(result.status_line(), "exit status 3");
        assert_eq!(result.output_text(), "found 3 issues\n");
    }

    #[test]
    fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

        let result = Invoker::new().run(&sh("cat marker.txt", dir.path())).unwrap();
        assert_eq!(result.output_text(), "here");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let spec = InvocationSpec::new("./no-such-tool", dir.path());

        match Invoker::new().run(&spec) {
            Err(InvokeError::Spawn { program, .. }) => assert_eq!(program, "./no-such-tool"),
            other => panic!("expected spawn error, got {:?}", other),
        }
    }

    #[test]
    fn test_environment_is_filtered() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("ZIPCHECK_TEST_SECRET", "leaked");

        let spec = sh("echo \"[$ZIPCHECK_TEST_SECRET][$EXTRA]\"", dir.path()).env("EXTRA", "set");
        let result = Invoker::new().run(&spec).unwrap();

        assert_eq!(result.output_text(), "[][set]\n");
    }

    #[test]
    fn test_output_cap_truncates() {
        let dir = TempDir::new().unwrap();
        let result = Invoker::new()
            .with_max_output_bytes(10)
            .run(&sh("printf '0123456789abcdef'", dir.path()))
            .unwrap();

        assert_eq!(result.output, b"0123456789");
        assert!(result.truncated);
    }

    #[test]
    fn test_timeout_kills_hung_tool() {
        let dir = TempDir::new().unwrap();
        let invoker = Invoker::new().with_timeout(TimeoutConfig {
            overall_seconds: 1,
            grace_seconds: 1,
        });

        let start = Instant::now();
        let err = invoker
            .run(&sh("echo started; sleep 30", dir.path()))
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(10));
        match err {
            InvokeError::Timeout {
                seconds,
                partial_output,
            } => {
                assert_eq!(seconds, 1);
                assert_eq!(partial_output, b"started\n");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_covers_background_children() {
        let dir = TempDir::new().unwrap();
        let invoker = Invoker::new().with_timeout(TimeoutConfig {
            overall_seconds: 1,
            grace_seconds: 1,
        });

        let start = Instant::now();
        let err = invoker
            .run(&sh("echo started; sleep 30 &", dir.path()))
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(10));
        match err {
            InvokeError::Timeout {
                seconds,
                partial_output,
            } => {
                assert_eq!(seconds, 1);
                assert_eq!(partial_output, b"started\n");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_background_child_with_closed_output_finishes() {
        let dir = TempDir::new().unwrap();
        let invoker = Invoker::new().with_timeout(TimeoutConfig {
            overall_seconds: 5,
            grace_seconds: 1,
        });

        let start = Instant::now();
        let result = invoker
            .run(&sh("echo done; sleep 30 >/dev/null 2>&1 &", dir.path()))
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result.output_text(), "done\n");
        assert!(result.success());
    }

    #[test]
    fn test_free_run_fn() {
        let dir = TempDir::new().unwrap();
        let result = run(
            "sh",
            &["-c".to_string(), "echo hi".to_string()],
            dir.path(),
        )
        .unwrap();
        assert_eq!(result.output_text(), "hi\n");
    }
}
