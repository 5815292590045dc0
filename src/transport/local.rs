//! FR-041: Local execution transport.

use super::{ExecOptions, ExecOutput};
use std::io::Write;
use std::process::{Command, Stdio};

/// Execute a shell script locally via `bash`, script on stdin.
pub fn exec_local(script: &str) -> Result<ExecOutput, String> {
    exec_local_with(script, &ExecOptions::default())
}

/// Execute a script with a working directory and extra environment.
pub fn exec_local_with(script: &str, opts: &ExecOptions) -> Result<ExecOutput, String> {
    let mut cmd = Command::new("bash");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(ref cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    tracing::debug!(cwd = ?opts.cwd, "exec: {}", script.lines().next().unwrap_or(""));

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_echo() {
        let out = exec_local("echo hello").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_local_failure_exit_code() {
        let out = exec_local("exit 42").unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 42);
    }

    #[test]
    fn test_local_stderr() {
        let out = exec_local("echo err >&2").unwrap();
        assert!(out.success());
        assert!(out.stderr.contains("err"));
    }

    #[test]
    fn test_local_signal_killed() {
        let out = exec_local("kill -9 $$").unwrap();
        assert_eq!(out.exit_code, -1);
    }

    #[test]
    fn test_local_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions::in_dir(dir.path()).env("FERRULE_TEST_VAR", "v1");
        let out = exec_local_with("pwd; echo $FERRULE_TEST_VAR", &opts).unwrap();
        assert!(out.success());
        let lines: Vec<_> = out.stdout.lines().collect();
        let cwd = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(std::fs::canonicalize(lines[0]).unwrap(), cwd);
        assert_eq!(lines[1], "v1");
    }
}
