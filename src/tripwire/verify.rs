//! FR-032: Verification — functional check plus PATH visibility and shadowing.
//!
//! Hidden tools only get the functional check. Visible tools go through
//! three fail-fast stages: the verify command against the install dir, the
//! current dir on PATH, and PATH resolution of every binary.

use crate::core::config::Config;
use crate::core::error::Error;
use crate::core::types::{ToolState, VerifySpec};
use crate::transport::{local, shell_quote, ExecOptions, ExecOutput};
use std::path::Path;

/// Inputs from the invoking environment.
#[derive(Debug, Clone)]
pub struct VerifyOptions<'a> {
    /// The `PATH` the user's shell sees.
    pub path_env: &'a str,
    /// Right after install the user may not have set up PATH yet.
    pub skip_path_checks: bool,
}

/// What a successful verification saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub tool: String,
    pub version: String,
    /// Output of the verify command, if one ran.
    pub output: Option<String>,
    pub path_checked: bool,
}

/// Verify the active version of an installed tool.
pub fn verify_tool(config: &Config, tool: &str, state: &ToolState, opts: &VerifyOptions<'_>) -> Result<VerifyReport, Error> {
    let version = state.active_version.clone();
    let active = state.active().ok_or_else(|| Error::NotInstalled { tool: tool.to_string() })?;
    let install_dir = &active.install_dir;
    if !install_dir.is_dir() {
        return Err(Error::Verification {
            tool: tool.to_string(),
            reason: format!("install directory {} is missing", install_dir.display()),
        });
    }

    let spec = active.verify.as_ref().filter(|v| !v.command.is_empty());
    let output = match spec {
        Some(spec) => Some(run_verify_command(tool, &version, install_dir, spec, opts.path_env)?),
        None => {
            tracing::debug!(tool, "no verify command declared");
            None
        }
    };

    if state.is_hidden || opts.skip_path_checks {
        return Ok(VerifyReport {
            tool: tool.to_string(),
            version,
            output,
            path_checked: false,
        });
    }

    check_current_on_path(config, opts.path_env)?;
    for binary in &active.binaries {
        let name = Path::new(binary)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary.clone());
        check_resolution(config, tool, &name, opts.path_env)?;
    }
    Ok(VerifyReport {
        tool: tool.to_string(),
        version,
        output,
        path_checked: true,
    })
}

/// `{version}` and `{install_dir}` substituted.
pub fn substitute(template: &str, version: &str, install_dir: &Path) -> String {
    template
        .replace("{version}", version)
        .replace("{install_dir}", &install_dir.display().to_string())
}

/// Run the verify command with `<install_dir>/bin` first on PATH and match
/// its pattern as a substring of the combined output.
fn run_verify_command(tool: &str, version: &str, install_dir: &Path, spec: &VerifySpec, path_env: &str) -> Result<String, Error> {
    let command = substitute(&spec.command, version, install_dir);
    let pattern = substitute(&spec.pattern, version, install_dir);
    let path = format!("{}:{}", install_dir.join("bin").display(), path_env);
    let out = exec(&command, &path).map_err(|e| Error::Verification {
        tool: tool.to_string(),
        reason: e,
    })?;
    let text = out.combined();
    if !out.success() {
        return Err(Error::Verification {
            tool: tool.to_string(),
            reason: format!("`{}` exited with {}\n  Output: {}", command, out.exit_code, text),
        });
    }
    if !pattern.is_empty() && !text.contains(&pattern) {
        return Err(Error::Verification {
            tool: tool.to_string(),
            reason: format!("output does not match expected pattern\n  Expected: {}\n  Got: {}", pattern, text),
        });
    }
    tracing::debug!(tool, command = %command, "verify command passed");
    Ok(text)
}

fn check_current_on_path(config: &Config, path_env: &str) -> Result<(), Error> {
    let current = config.current_dir.display().to_string();
    let wanted = current.trim_end_matches('/');
    if path_env.split(':').any(|entry| entry.trim_end_matches('/') == wanted) {
        Ok(())
    } else {
        Err(Error::NotOnPath { dir: current })
    }
}

/// The shell must resolve `name` to the managed current symlink.
fn check_resolution(config: &Config, tool: &str, name: &str, path_env: &str) -> Result<(), Error> {
    let expected = config.current_symlink(name);
    let out = exec(&format!("command -v {}", shell_quote(name)), path_env).map_err(|e| Error::Verification {
        tool: tool.to_string(),
        reason: e,
    })?;
    let found = out.stdout.trim();
    if !out.success() || found.is_empty() {
        return Err(Error::Verification {
            tool: tool.to_string(),
            reason: format!(
                "binary '{}' not found in PATH (broken symlink in {}?)",
                name,
                config.current_dir.display()
            ),
        });
    }
    if Path::new(found) != expected {
        return Err(Error::PathConflict {
            binary: name.to_string(),
            found: found.to_string(),
            expected: expected.display().to_string(),
            diagnostic: conflicting_version(found, path_env),
        });
    }
    Ok(())
}

/// First line of the shadowing binary's `--version`, best effort.
fn conflicting_version(binary: &str, path_env: &str) -> Option<String> {
    let out = exec(&format!("{} --version", shell_quote(binary)), path_env).ok()?;
    out.combined()
        .lines()
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

fn exec(script: &str, path_env: &str) -> Result<ExecOutput, String> {
    local::exec_local_with(script, &ExecOptions::default().env("PATH", path_env))
}
