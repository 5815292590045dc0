//! FR-010: Action registry — the closed set of step actions and their capabilities.
//!
//! Every consumer (compiler, advisor, executor) matches on [`ActionKind`]
//! exhaustively, so adding a kind fails to build until each one handles it.

pub mod composite;
pub mod primitive;
pub mod system;

use crate::core::error::Error;
use crate::core::types::{Constraint, ParamValue, Params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Action identifier as written in recipes and plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    // -- core primitives --
    DownloadFile,
    Extract,
    Chmod,
    InstallBinaries,
    SetEnv,
    ApplyPatch,
    RunCommand,
    // -- ecosystem primitives --
    CargoBuild,
    GoBuild,
    NpmExec,
    // -- composites --
    Download,
    DownloadArchive,
    GithubArchive,
    GithubFile,
    CargoInstall,
    GoInstall,
    NpmInstall,
    // -- privileged system actions --
    AptInstall,
    AptRepo,
    AptPpa,
    DnfInstall,
    DnfRepo,
    PacmanInstall,
    ApkInstall,
    ZypperInstall,
    BrewInstall,
    BrewCask,
    GroupAdd,
    ServiceEnable,
    ServiceStart,
    RequireCommand,
    Manual,
}

/// How the compiler treats an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Executes directly; lands in plans unchanged.
    Primitive,
    /// Expands into primitives at compile time.
    Composite,
    /// Needs privileged host changes; only ever described, never executed.
    System(Category),
}

/// Advisor buckets, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Packages,
    Configuration,
    Manual,
    Verification,
}

impl ActionKind {
    pub const ALL: [ActionKind; 32] = [
        Self::DownloadFile,
        Self::Extract,
        Self::Chmod,
        Self::InstallBinaries,
        Self::SetEnv,
        Self::ApplyPatch,
        Self::RunCommand,
        Self::CargoBuild,
        Self::GoBuild,
        Self::NpmExec,
        Self::Download,
        Self::DownloadArchive,
        Self::GithubArchive,
        Self::GithubFile,
        Self::CargoInstall,
        Self::GoInstall,
        Self::NpmInstall,
        Self::AptInstall,
        Self::AptRepo,
        Self::AptPpa,
        Self::DnfInstall,
        Self::DnfRepo,
        Self::PacmanInstall,
        Self::ApkInstall,
        Self::ZypperInstall,
        Self::BrewInstall,
        Self::BrewCask,
        Self::GroupAdd,
        Self::ServiceEnable,
        Self::ServiceStart,
        Self::RequireCommand,
        Self::Manual,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::DownloadFile => "download_file",
            Self::Extract => "extract",
            Self::Chmod => "chmod",
            Self::InstallBinaries => "install_binaries",
            Self::SetEnv => "set_env",
            Self::ApplyPatch => "apply_patch",
            Self::RunCommand => "run_command",
            Self::CargoBuild => "cargo_build",
            Self::GoBuild => "go_build",
            Self::NpmExec => "npm_exec",
            Self::Download => "download",
            Self::DownloadArchive => "download_archive",
            Self::GithubArchive => "github_archive",
            Self::GithubFile => "github_file",
            Self::CargoInstall => "cargo_install",
            Self::GoInstall => "go_install",
            Self::NpmInstall => "npm_install",
            Self::AptInstall => "apt_install",
            Self::AptRepo => "apt_repo",
            Self::AptPpa => "apt_ppa",
            Self::DnfInstall => "dnf_install",
            Self::DnfRepo => "dnf_repo",
            Self::PacmanInstall => "pacman_install",
            Self::ApkInstall => "apk_install",
            Self::ZypperInstall => "zypper_install",
            Self::BrewInstall => "brew_install",
            Self::BrewCask => "brew_cask",
            Self::GroupAdd => "group_add",
            Self::ServiceEnable => "service_enable",
            Self::ServiceStart => "service_start",
            Self::RequireCommand => "require_command",
            Self::Manual => "manual",
        }
    }

    pub fn class(self) -> ActionClass {
        match self {
            Self::DownloadFile
            | Self::Extract
            | Self::Chmod
            | Self::InstallBinaries
            | Self::SetEnv
            | Self::ApplyPatch
            | Self::RunCommand
            | Self::CargoBuild
            | Self::GoBuild
            | Self::NpmExec => ActionClass::Primitive,
            Self::Download
            | Self::DownloadArchive
            | Self::GithubArchive
            | Self::GithubFile
            | Self::CargoInstall
            | Self::GoInstall
            | Self::NpmInstall => ActionClass::Composite,
            Self::AptInstall
            | Self::AptRepo
            | Self::AptPpa
            | Self::DnfInstall
            | Self::DnfRepo
            | Self::PacmanInstall
            | Self::ApkInstall
            | Self::ZypperInstall
            | Self::BrewInstall
            | Self::BrewCask => ActionClass::System(Category::Packages),
            Self::GroupAdd | Self::ServiceEnable | Self::ServiceStart => {
                ActionClass::System(Category::Configuration)
            }
            Self::Manual => ActionClass::System(Category::Manual),
            Self::RequireCommand => ActionClass::System(Category::Verification),
        }
    }

    pub fn is_privileged(self) -> bool {
        matches!(self.class(), ActionClass::System(_))
    }

    pub fn category(self) -> Option<Category> {
        match self.class() {
            ActionClass::System(c) => Some(c),
            ActionClass::Primitive | ActionClass::Composite => None,
        }
    }

    /// Platform restriction implied by the action itself, before any `when`.
    pub fn implicit_constraint(self) -> Constraint {
        match self {
            Self::AptInstall | Self::AptRepo | Self::AptPpa => Constraint::family("debian"),
            Self::DnfInstall | Self::DnfRepo => Constraint::family("rhel"),
            Self::PacmanInstall => Constraint::family("arch"),
            Self::ApkInstall => Constraint::family("alpine"),
            Self::ZypperInstall => Constraint::family("suse"),
            Self::BrewInstall | Self::BrewCask => Constraint::os("darwin"),
            _ => Constraint::default(),
        }
    }

    /// Same inputs always produce the same install tree.
    pub fn is_deterministic(self) -> bool {
        match self.class() {
            ActionClass::System(_) => true,
            ActionClass::Primitive | ActionClass::Composite => !matches!(
                self,
                Self::RunCommand
                    | Self::CargoBuild
                    | Self::GoBuild
                    | Self::NpmExec
                    | Self::CargoInstall
                    | Self::GoInstall
                    | Self::NpmInstall
            ),
        }
    }

    /// Tools that must be installed before the step can be compiled.
    pub fn eval_deps(self) -> &'static [&'static str] {
        match self {
            Self::CargoInstall => &["rust"],
            Self::GoInstall => &["go"],
            Self::NpmInstall => &["nodejs"],
            _ => &[],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::Validation(format!("unknown action {:?}", s)))
    }
}

// ============================================================================
// Parameter access
// ============================================================================

/// Required string parameter that must be known at compile time.
pub fn require_str<'a>(action: ActionKind, params: &'a Params, key: &str) -> Result<&'a str, Error> {
    match params.get(key) {
        None => Err(Error::malformed(action.name(), key, "required parameter is missing")),
        Some(v) => v.as_str().ok_or_else(|| {
            Error::malformed(action.name(), key, "expected a string resolvable at compile time")
        }),
    }
}

pub fn optional_str<'a>(action: ActionKind, params: &'a Params, key: &str) -> Result<Option<&'a str>, Error> {
    match params.get(key) {
        None => Ok(None),
        Some(_) => require_str(action, params, key).map(Some),
    }
}

/// String or list-of-strings parameter, flattened to a list.
pub fn str_list(action: ActionKind, params: &Params, key: &str) -> Result<Vec<String>, Error> {
    match params.get(key) {
        None => Ok(Vec::new()),
        Some(ParamValue::Literal(serde_json::Value::String(s))) => Ok(vec![s.clone()]),
        Some(ParamValue::List(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::malformed(action.name(), key, "expected a list of strings")
                })
            })
            .collect(),
        Some(_) => Err(Error::malformed(action.name(), key, "expected a string or a list of strings")),
    }
}
