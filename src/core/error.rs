//! FR-002: Error taxonomy — structured failures, exit codes, remediation hints.
//!
//! Lower layers return these variants unchanged; only the command boundary
//! (`main`) turns them into text and a process exit code.

use thiserror::Error;

/// Categorical exit codes. Scripted callers branch on these, not on text.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const RECIPE_NOT_FOUND: i32 = 3;
    pub const VERSION_NOT_FOUND: i32 = 4;
    pub const NETWORK: i32 = 5;
    pub const INSTALL_FAILED: i32 = 6;
    pub const VERIFY_FAILED: i32 = 7;
    pub const DEPENDENCY_FAILED: i32 = 8;
    pub const CANCELLED: i32 = 130;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("version '{version}' of {tool} not found (available: {})", list_or_none(.available))]
    VersionNotFound {
        tool: String,
        version: String,
        available: Vec<String>,
    },

    #[error("{tool} is not installed")]
    NotInstalled { tool: String },

    #[error("no steps of {tool} apply to target {target}")]
    TargetUnsupported { tool: String, target: String },

    #[error("{0}")]
    Validation(String),

    #[error("missing eval-time dependencies: {}", .0.join(", "))]
    EvalDepsRequired(Vec<String>),

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("malformed parameter '{param}' in {action} step: {reason}")]
    MalformedParam {
        action: String,
        param: String,
        reason: String,
    },

    #[error("unsupported plan format version {found} (this build supports {supported})")]
    UnsupportedFormat { found: u64, supported: u32 },

    #[error("{action} step failed: {reason}")]
    Execution { action: String, reason: String },

    #[error("installation verification failed for {tool}: {reason}")]
    Verification { tool: String, reason: String },

    #[error("{dir} is not in PATH")]
    NotOnPath { dir: String },

    #[error("PATH conflict detected for {binary}\n  Using:    {found}\n  Expected: {expected}{}", diagnostic_suffix(.diagnostic))]
    PathConflict {
        binary: String,
        found: String,
        expected: String,
        diagnostic: Option<String>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Io(String),

    #[error("operation cancelled")]
    Cancelled,
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn diagnostic_suffix(diagnostic: &Option<String>) -> String {
    match diagnostic {
        Some(d) => format!("\n  Conflicting binary reports: {}", d),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for the common "named thing is missing" case.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn execution(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(action: impl Into<String>, param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedParam {
            action: action.into(),
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { kind, .. } if *kind == "version" => exit::VERSION_NOT_FOUND,
            Self::NotFound { .. } | Self::NotInstalled { .. } => exit::RECIPE_NOT_FOUND,
            Self::VersionNotFound { .. } => exit::VERSION_NOT_FOUND,
            Self::Validation(_) | Self::MalformedParam { .. } | Self::UnsupportedFormat { .. } => {
                exit::USAGE
            }
            Self::TargetUnsupported { .. } => exit::GENERAL,
            Self::EvalDepsRequired(_) | Self::CyclicDependency(_) => exit::DEPENDENCY_FAILED,
            Self::Execution { .. } => exit::INSTALL_FAILED,
            Self::Verification { .. } | Self::NotOnPath { .. } | Self::PathConflict { .. } => {
                exit::VERIFY_FAILED
            }
            Self::Network(_) => exit::NETWORK,
            Self::Io(_) => exit::GENERAL,
            Self::Cancelled => exit::CANCELLED,
        }
    }

    /// Machine-readable category for JSON error output.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::NotInstalled { .. } | Self::VersionNotFound { .. } => {
                "recipe_not_found"
            }
            Self::Validation(_)
            | Self::MalformedParam { .. }
            | Self::UnsupportedFormat { .. }
            | Self::TargetUnsupported { .. } => "validation",
            Self::EvalDepsRequired(_) | Self::CyclicDependency(_) => "missing_dep",
            Self::Execution { .. } => "install_failed",
            Self::Verification { .. } | Self::NotOnPath { .. } => "verify_failed",
            Self::PathConflict { .. } => "path_conflict",
            Self::Network(_) => "network_error",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "general",
        }
    }

    /// Remediation hint, where one can be derived from the failure.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotFound { kind, name } if *kind == "recipe" => Some(format!(
                "check the spelling of '{}' or add a recipe file for it",
                name
            )),
            Self::NotFound { .. } | Self::VersionNotFound { .. } => {
                Some("run `ferrule versions <tool>` to list available versions".to_string())
            }
            Self::NotInstalled { tool } => Some(format!("install it first: ferrule install {}", tool)),
            Self::TargetUnsupported { .. } => Some(
                "the recipe has no steps for this platform; preview another with --target-family"
                    .to_string(),
            ),
            Self::EvalDepsRequired(deps) => Some(format!(
                "install missing dependency first: ferrule install {} (or re-run with --yes)",
                deps.join(" ")
            )),
            Self::CyclicDependency(_) => {
                Some("remove the circular dependency from the recipes involved".to_string())
            }
            Self::UnsupportedFormat { .. } => {
                Some("regenerate the plan with `ferrule eval` from this build".to_string())
            }
            Self::Execution { .. } => Some(
                "re-run install; applying the same plan again replaces the partial install"
                    .to_string(),
            ),
            Self::Verification { tool, .. } => {
                Some(format!("re-run install to repair: ferrule install {}", tool))
            }
            Self::NotOnPath { dir } => Some(format!(
                "add directory to PATH: export PATH=\"{}:$PATH\"",
                dir
            )),
            Self::PathConflict { found, expected, .. } => {
                let managed_dir = std::path::Path::new(expected)
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                Some(format!(
                    "{} shadows the managed binary; put {} earlier in PATH or remove the conflicting binary",
                    found, managed_dir
                ))
            }
            Self::Network(_) => Some(
                "check connectivity; a still-valid cached version list is used when present"
                    .to_string(),
            ),
            Self::Validation(_) | Self::MalformedParam { .. } | Self::Io(_) | Self::Cancelled => {
                None
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
