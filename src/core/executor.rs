//! FR-017: Executor — apply a compiled plan on the local host.
//!
//! validate → privileged pre-flight → dependencies (depth-first) → steps in
//! order inside a scratch work dir → `tools/<name>-<version>`.
//!
//! Steps build into a staging directory beside the target, which replaces
//! `tools/<name>-<version>` only once every step and the binary check have
//! passed. A failed run leaves any previous install of that version intact.

use super::cancel::CancelToken;
use super::config::Config;
use super::download::{DownloadCache, Downloader};
use super::error::Error;
use super::parser::validate_plan;
use super::resolver::Vars;
use super::sysdeps;
use super::types::{InstallationPlan, ResolvedStep, State, VerifySpec};
use super::version::compare_versions;
use crate::actions::primitive::{self, ExecContext};
use crate::actions::{optional_str, require_str, ActionKind};
use crate::transport::{local, shell_quote};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Captures the first dotted version number in `--version` output.
const DEFAULT_VERSION_REGEX: &str = r"(\d+(?:\.\d+)+)";

/// Configuration for one apply run.
pub struct ExecuteConfig<'a> {
    pub config: &'a Config,
    pub downloader: &'a dyn Downloader,
    pub download_cache: Option<&'a DownloadCache>,
    /// Installed tools; dependencies already present are not reinstalled.
    pub state: &'a State,
    /// Continue past privileged steps other than `require_command`.
    pub skip_system_steps: bool,
    pub cancel: CancelToken,
}

/// Result of applying one plan in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub tool: String,
    pub version: String,
    pub install_dir: PathBuf,
    pub binaries: Vec<String>,
    pub verify: Option<VerifySpec>,
    /// Tool whose plan embedded this one.
    pub required_by: Option<String>,
    /// Already installed; nothing was applied.
    pub reused: bool,
    /// Only privileged steps: nothing installed, nothing to record.
    pub system_only: bool,
}

/// Apply a plan and its embedded dependencies. Outcomes are in apply order,
/// dependencies before the tools that need them.
pub fn execute_plan(plan: &InstallationPlan, cfg: &ExecuteConfig<'_>) -> Result<Vec<InstallOutcome>, Error> {
    let start = Instant::now();
    validate_plan(plan)?;
    preflight(plan, cfg)?;

    let mut outcomes = Vec::new();
    let mut walk = Walk {
        visited: HashSet::new(),
        outcomes: &mut outcomes,
    };
    apply_tree(plan, None, cfg, &mut walk)?;
    tracing::info!(
        tool = %plan.tool,
        version = %plan.version,
        applied = outcomes.iter().filter(|o| !o.reused && !o.system_only).count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "plan applied"
    );
    Ok(outcomes)
}

/// Check `require_command` steps and refuse other privileged steps before
/// anything touches the filesystem.
fn preflight(plan: &InstallationPlan, cfg: &ExecuteConfig<'_>) -> Result<(), Error> {
    let privileged = plan.privileged_steps();
    for step in privileged.iter().filter(|s| s.action == ActionKind::RequireCommand) {
        cfg.cancel.check()?;
        check_required_command(step)?;
    }
    let pending: Vec<&ResolvedStep> = privileged
        .into_iter()
        .filter(|s| s.action != ActionKind::RequireCommand)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }
    if cfg.skip_system_steps {
        tracing::warn!(steps = pending.len(), "skipping privileged steps; assuming they were completed");
        return Ok(());
    }
    let instructions = sysdeps::collect(pending)?;
    Err(Error::execution(
        "system dependencies",
        format!(
            "privileged steps must be completed manually\n\n{}",
            sysdeps::render(&plan.platform, &instructions)
        ),
    ))
}

/// Tools handled so far in one run. A dependency shared by several plans is
/// applied once.
struct Walk<'o> {
    visited: HashSet<(String, String)>,
    outcomes: &'o mut Vec<InstallOutcome>,
}

fn reused(plan: &InstallationPlan, install_dir: PathBuf, parent: &str) -> InstallOutcome {
    InstallOutcome {
        tool: plan.tool.clone(),
        version: plan.version.clone(),
        install_dir,
        binaries: plan.binaries.clone(),
        verify: plan.verify.clone(),
        required_by: Some(parent.to_string()),
        reused: true,
        system_only: false,
    }
}

fn apply_tree(
    plan: &InstallationPlan,
    parent: Option<&str>,
    cfg: &ExecuteConfig<'_>,
    walk: &mut Walk<'_>,
) -> Result<(), Error> {
    walk.visited.insert((plan.tool.clone(), plan.version.clone()));
    for dep in &plan.dependencies {
        let key = (dep.tool.clone(), dep.version.clone());
        if walk.visited.contains(&key) {
            tracing::debug!(tool = %dep.tool, version = %dep.version, "dependency already handled in this run");
            let dir = cfg.config.tool_dir(&dep.tool, &dep.version);
            walk.outcomes.push(reused(dep, dir, &plan.tool));
            continue;
        }
        if let Some(dir) = installed_dir(cfg.state, &dep.tool, &dep.version) {
            tracing::info!(tool = %dep.tool, version = %dep.version, "dependency already installed");
            walk.visited.insert(key);
            walk.outcomes.push(reused(dep, dir, &plan.tool));
            continue;
        }
        apply_tree(dep, Some(&plan.tool), cfg, walk)?;
    }

    cfg.cancel.check()?;
    if plan.is_system_dependency() {
        walk.outcomes.push(InstallOutcome {
            tool: plan.tool.clone(),
            version: plan.version.clone(),
            install_dir: PathBuf::new(),
            binaries: Vec::new(),
            verify: None,
            required_by: parent.map(str::to_string),
            reused: false,
            system_only: true,
        });
        return Ok(());
    }

    let install_dir = cfg.config.tool_dir(&plan.tool, &plan.version);
    let staging = sibling(&install_dir, "staging");
    let applied = apply_steps(plan, &staging, cfg).and_then(|()| promote(&staging, &install_dir));
    if let Err(e) = applied {
        if staging.exists() {
            if let Err(rm) = std::fs::remove_dir_all(&staging) {
                tracing::debug!(dir = %staging.display(), error = %rm, "cannot remove staging dir");
            }
        }
        return Err(e);
    }
    walk.outcomes.push(InstallOutcome {
        tool: plan.tool.clone(),
        version: plan.version.clone(),
        install_dir,
        binaries: plan.binaries.clone(),
        verify: plan.verify.clone(),
        required_by: parent.map(str::to_string),
        reused: false,
        system_only: false,
    });
    Ok(())
}

/// `tools/.<name>-<version>.<suffix>`, on the same filesystem as the target.
fn sibling(install_dir: &Path, suffix: &str) -> PathBuf {
    let name = install_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    install_dir.with_file_name(format!(".{}.{}", name, suffix))
}

/// Swap a finished staging dir into place. The previous tree is restored if
/// the final rename fails.
fn promote(staging: &Path, install_dir: &Path) -> Result<(), Error> {
    let retired = sibling(install_dir, "old");
    if retired.exists() {
        std::fs::remove_dir_all(&retired)
            .map_err(|e| Error::Io(format!("cannot remove {}: {}", retired.display(), e)))?;
    }
    let had_previous = install_dir.exists();
    if had_previous {
        std::fs::rename(install_dir, &retired)
            .map_err(|e| Error::Io(format!("cannot move {} aside: {}", install_dir.display(), e)))?;
    }
    if let Err(e) = std::fs::rename(staging, install_dir) {
        if had_previous {
            if let Err(back) = std::fs::rename(&retired, install_dir) {
                tracing::warn!(dir = %install_dir.display(), error = %back, "cannot restore previous install");
            }
        }
        return Err(Error::Io(format!("cannot move {} into place: {}", staging.display(), e)));
    }
    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            tracing::debug!(dir = %retired.display(), error = %e, "cannot remove previous install");
        }
    }
    Ok(())
}

fn apply_steps(plan: &InstallationPlan, install_dir: &Path, cfg: &ExecuteConfig<'_>) -> Result<(), Error> {
    if install_dir.exists() {
        std::fs::remove_dir_all(install_dir)
            .map_err(|e| Error::Io(format!("cannot remove {}: {}", install_dir.display(), e)))?;
    }
    std::fs::create_dir_all(install_dir)
        .map_err(|e| Error::Io(format!("cannot create dir {}: {}", install_dir.display(), e)))?;
    let work = tempfile::Builder::new()
        .prefix("ferrule-work-")
        .tempdir()
        .map_err(|e| Error::Io(format!("cannot create work dir: {}", e)))?;

    let vars = execution_vars(cfg.config, install_dir, work.path());
    let ctx = ExecContext {
        install_dir,
        work_dir: work.path(),
        vars: &vars,
        downloader: cfg.downloader,
        download_cache: cfg.download_cache,
        cancel: &cfg.cancel,
    };

    tracing::info!(tool = %plan.tool, version = %plan.version, steps = plan.steps.len(), "installing");
    for (i, step) in plan.steps.iter().enumerate() {
        if step.action.is_privileged() {
            continue;
        }
        tracing::debug!(step = i + 1, action = step.action.name(), "step");
        primitive::execute(step, &ctx)?;
    }

    for binary in &plan.binaries {
        if !install_dir.join(binary).exists() {
            return Err(Error::execution(
                "install",
                format!("{} {} did not produce {}", plan.tool, plan.version, binary),
            ));
        }
    }
    Ok(())
}

/// `install_dir`, `work_dir`, `tools_dir`, `current_dir`.
pub fn execution_vars(config: &Config, install_dir: &Path, work_dir: &Path) -> Vars {
    let mut vars = Vars::new();
    vars.insert("install_dir".into(), install_dir.display().to_string());
    vars.insert("work_dir".into(), work_dir.display().to_string());
    vars.insert("tools_dir".into(), config.tools_dir.display().to_string());
    vars.insert("current_dir".into(), config.current_dir.display().to_string());
    vars
}

fn installed_dir(state: &State, tool: &str, version: &str) -> Option<PathBuf> {
    let dir = &state.installed.get(tool)?.versions.get(version)?.install_dir;
    dir.is_dir().then(|| dir.clone())
}

/// `command -v`, then an optional minimum version read from the command's
/// own version output.
pub fn check_required_command(step: &ResolvedStep) -> Result<(), Error> {
    let kind = ActionKind::RequireCommand;
    let command = require_str(kind, &step.params, "command")?;
    let lookup = local::exec_local(&format!("command -v {}", shell_quote(command)))
        .map_err(|e| Error::execution(kind.name(), e))?;
    if !lookup.success() {
        return Err(Error::execution(
            kind.name(),
            format!("required command '{}' not found in PATH; install it and retry", command),
        ));
    }
    let Some(min) = optional_str(kind, &step.params, "min_version")?.filter(|v| !v.is_empty()) else {
        return Ok(());
    };

    let flag = optional_str(kind, &step.params, "version_flag")?.unwrap_or("--version");
    let pattern = optional_str(kind, &step.params, "version_regex")?.unwrap_or(DEFAULT_VERSION_REGEX);
    let re = Regex::new(pattern).map_err(|e| Error::malformed(kind.name(), "version_regex", e.to_string()))?;
    let output = local::exec_local(&format!("{} {}", shell_quote(command), flag))
        .map_err(|e| Error::execution(kind.name(), e))?;
    let text = output.combined();
    let found = re
        .captures(&text)
        .and_then(|c| c.get(1).or_else(|| c.get(0)))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            Error::execution(kind.name(), format!("cannot read the version of '{}' from {:?}", command, text))
        })?;
    if compare_versions(&found, min) == Ordering::Less {
        return Err(Error::execution(
            kind.name(),
            format!("'{}' is version {}, but {} or newer is required", command, found, min),
        ));
    }
    tracing::debug!(command, found = %found, min, "required command satisfied");
    Ok(())
}
