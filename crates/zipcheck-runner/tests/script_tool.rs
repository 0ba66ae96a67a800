//! Running a tool script by relative path, the way the default layout does.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;

use tempfile::TempDir;
use zipcheck_runner::{InvocationSpec, Invoker, TimeoutConfig};

#[test]
fn relative_script_resolves_against_working_dir() {
    let tool_dir = TempDir::new().unwrap();
    let script = tool_dir.path().join("detect.sh");
    fs::write(&script, "#!/bin/sh\necho \"checking $1\"\nls \"$1\"\nexit 1\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    fs::create_dir_all(tool_dir.path().join("dest/sample")).unwrap();
    fs::write(tool_dir.path().join("dest/sample/a.txt"), "hello").unwrap();

    let spec = InvocationSpec::new("./detect.sh", tool_dir.path()).args(["dest/sample"]);
    let result = Invoker::new()
        .with_timeout(TimeoutConfig::default())
        .run(&spec)
        .unwrap();

    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.output_text(), "checking dest/sample\na.txt\n");
}

#[test]
fn non_executable_script_fails_to_spawn() {
    let tool_dir = TempDir::new().unwrap();
    let script = tool_dir.path().join("detect.sh");
    fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

    let spec = InvocationSpec::new("./detect.sh", tool_dir.path());
    let err = Invoker::new().run(&spec).unwrap_err();
    assert!(matches!(err, zipcheck_runner::InvokeError::Spawn { .. }));
}
