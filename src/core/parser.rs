//! FR-007: Parsing and validation — recipe TOML, plan JSON documents.
//!
//! Plan files are checked for a supported `format_version` before they are
//! deserialized, so a document from an unknown schema is rejected outright
//! rather than half-parsed.

use super::error::Error;
use super::planner::{MAX_DEPENDENCY_DEPTH, MAX_TOTAL_DEPENDENCIES, PLAN_FORMAT_VERSION};
use super::types::{InstallationPlan, Platform, Recipe};
use crate::actions::ActionKind;
use crate::tripwire::hasher;
use std::io::Read;
use std::path::Path;

/// Parse a recipe from TOML text and stamp its source hash.
pub fn parse_recipe(toml_text: &str) -> Result<Recipe, Error> {
    let mut recipe: Recipe = toml::from_str(toml_text)
        .map_err(|e| Error::Validation(format!("invalid recipe: {}", e)))?;
    if recipe.metadata.name.trim().is_empty() {
        return Err(Error::Validation("invalid recipe: metadata.name must not be empty".into()));
    }
    recipe.source_hash = hasher::sha256_string(toml_text);
    Ok(recipe)
}

/// Parse a recipe file from disk.
pub fn parse_recipe_file(path: &Path) -> Result<Recipe, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read recipe {}: {}", path.display(), e)))?;
    parse_recipe(&content).map_err(|e| match e {
        Error::Validation(msg) => Error::Validation(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse a plan document. `origin` names the source in error messages.
pub fn parse_plan(json: &str, origin: &str) -> Result<InstallationPlan, Error> {
    let raw: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::Validation(format!("failed to parse plan from {}: {}", origin, e)))?;
    check_format_version(&raw)?;
    serde_json::from_value(raw)
        .map_err(|e| Error::Validation(format!("failed to parse plan from {}: {}", origin, e)))
}

fn check_format_version(raw: &serde_json::Value) -> Result<(), Error> {
    let found = raw
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| Error::Validation("plan is missing an integer format_version".into()))?;
    if found != u64::from(PLAN_FORMAT_VERSION) {
        return Err(Error::UnsupportedFormat {
            found,
            supported: PLAN_FORMAT_VERSION,
        });
    }
    // embedded dependency plans carry their own stamp
    if let Some(deps) = raw.get("dependencies").and_then(serde_json::Value::as_array) {
        for dep in deps {
            check_format_version(dep)?;
        }
    }
    Ok(())
}

/// Load a plan from a file path, or from stdin when `source` is `-`.
pub fn load_plan(source: &str) -> Result<InstallationPlan, Error> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| Error::Io(format!("failed to read plan from stdin: {}", e)))?;
        return parse_plan(&buf, "stdin").map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!(
                "{}\nHint: pipe the output of `ferrule eval <tool>` into `ferrule install --plan -`",
                msg
            )),
            other => other,
        });
    }
    let path = Path::new(source);
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("failed to open plan file {}: {}", path.display(), e)))?;
    parse_plan(&content, &path.display().to_string())
}

/// Render a plan as pretty JSON.
pub fn plan_to_json(plan: &InstallationPlan) -> Result<String, Error> {
    serde_json::to_string_pretty(plan).map_err(|e| Error::Io(format!("serialize error: {}", e)))
}

/// Write a plan file atomically.
pub fn save_plan(path: &Path, plan: &InstallationPlan) -> Result<(), Error> {
    let json = plan_to_json(plan)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| Error::Io(format!("cannot write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| Error::Io(format!("cannot rename {} → {}: {}", tmp.display(), path.display(), e)))
}

/// Structural checks before a plan is executed.
pub fn validate_plan(plan: &InstallationPlan) -> Result<(), Error> {
    if plan.format_version != PLAN_FORMAT_VERSION {
        return Err(Error::UnsupportedFormat {
            found: u64::from(plan.format_version),
            supported: PLAN_FORMAT_VERSION,
        });
    }
    if plan.dependency_depth() > MAX_DEPENDENCY_DEPTH {
        return Err(Error::Validation(format!(
            "plan dependency depth {} exceeds the limit of {}",
            plan.dependency_depth(),
            MAX_DEPENDENCY_DEPTH
        )));
    }
    if plan.dependency_count() > MAX_TOTAL_DEPENDENCIES {
        return Err(Error::Validation(format!(
            "plan embeds {} dependencies, more than the limit of {}",
            plan.dependency_count(),
            MAX_TOTAL_DEPENDENCIES
        )));
    }
    validate_plan_tree(plan)
}

fn validate_plan_tree(plan: &InstallationPlan) -> Result<(), Error> {
    if plan.tool.is_empty() || plan.version.is_empty() {
        return Err(Error::Validation("plan must name a tool and a version".into()));
    }
    super::state::validate_version_string(&plan.version)?;
    for (i, step) in plan.steps.iter().enumerate() {
        if step.action.class() == crate::actions::ActionClass::Composite {
            return Err(Error::Validation(format!(
                "{} step {} is composite; plans may only contain primitive or system steps",
                plan.tool,
                i + 1
            )));
        }
        if step.action == ActionKind::DownloadFile && step.checksum.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Validation(format!(
                "{} step {} (download_file) has no checksum",
                plan.tool,
                i + 1
            )));
        }
    }
    for dep in &plan.dependencies {
        validate_plan_tree(dep)?;
    }
    Ok(())
}

/// The plan must target the host it is applied on.
pub fn validate_plan_platform(plan: &InstallationPlan, host: &Platform) -> Result<(), Error> {
    if plan.platform.os != host.os || plan.platform.arch != host.arch {
        return Err(Error::Validation(format!(
            "plan targets {} but this host is {}",
            plan.platform.pair(),
            host.pair()
        )));
    }
    Ok(())
}

/// An empty requested name always passes; otherwise it must equal `plan.tool`.
pub fn validate_plan_tool(plan: &InstallationPlan, requested: &str) -> Result<(), Error> {
    if requested.is_empty() || requested == plan.tool {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "plan is for tool '{}', but '{}' was requested",
        plan.tool, requested
    )))
}
