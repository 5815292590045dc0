//! FR-001: Core data model — recipes, targets, plans, install state.
//!
//! Recipes are read-only inputs. Plans and state are plain serde documents
//! (JSON) so they can be written, inspected, and applied by another process.

use crate::actions::ActionKind;
use crate::core::error::Error;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Recipes
// ============================================================================

/// Declarative description of how to install one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub metadata: RecipeMetadata,

    #[serde(default)]
    pub version: VersionSection,

    #[serde(default)]
    pub patches: Vec<Patch>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub verify: VerifySpec,

    /// SHA-256 of the recipe source text, filled in by the parser.
    #[serde(skip)]
    pub source_hash: String,
}

impl Recipe {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeMetadata {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub version_format: Option<String>,

    /// Install-time dependencies, embedded as sub-plans.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Binaries the tool provides, relative to its install dir (e.g. `bin/jq`).
    #[serde(default)]
    pub binaries: Vec<String>,
}

/// Where available versions come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionSection {
    /// `github_releases`, `crates_io`, `npm`, `goproxy`, or `pinned`.
    /// When absent, inferred from the fields below or the install steps.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub github_repo: Option<String>,

    /// Prefix stripped from tags (e.g. `jq-`)
    #[serde(default)]
    pub tag_prefix: Option<String>,

    #[serde(default)]
    pub crate_name: Option<String>,

    #[serde(default)]
    pub npm_package: Option<String>,

    /// Go module path, e.g. `golang.org/x/tools/gopls`
    #[serde(default)]
    pub go_module: Option<String>,

    #[serde(default)]
    pub pinned: Option<String>,
}

/// A source patch applied after extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub data: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub checksum: Option<String>,

    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

/// Post-install check declared by the recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySpec {
    #[serde(default)]
    pub command: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
}

/// One declared action with parameters and an optional platform constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: ActionKind,

    #[serde(default, skip_serializing_if = "Constraint::is_empty")]
    pub when: Constraint,

    /// Everything else in the step table.
    #[serde(flatten)]
    pub params: IndexMap<String, serde_json::Value>,
}

impl Step {
    /// True when a parameter references a variable only known at execution time.
    pub fn is_evaluable(&self) -> bool {
        self.params
            .values()
            .any(crate::core::resolver::references_execution_var)
    }
}

/// Platform constraint on a step. Every dimension is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_family: Option<String>,
}

impl Constraint {
    pub fn is_empty(&self) -> bool {
        self.os.is_none() && self.arch.is_none() && self.linux_family.is_none()
    }

    pub fn family(family: &str) -> Self {
        Self {
            os: Some("linux".to_string()),
            arch: None,
            linux_family: Some(family.to_string()),
        }
    }

    pub fn os(os: &str) -> Self {
        Self {
            os: Some(os.to_string()),
            ..Self::default()
        }
    }

    /// An empty constraint matches everything; otherwise every set dimension must match.
    pub fn matches(&self, target: &Platform) -> bool {
        if let Some(ref os) = self.os {
            if *os != target.os {
                return false;
            }
        }
        if let Some(ref arch) = self.arch {
            if *arch != target.arch {
                return false;
            }
        }
        if let Some(ref family) = self.linux_family {
            if target.linux_family.as_deref() != Some(family.as_str()) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Targets
// ============================================================================

/// OS/architecture/family triple a plan is compiled against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_family: Option<String>,
}

impl Platform {
    /// Build a platform; a linux family is only valid on linux.
    pub fn new(os: &str, arch: &str, linux_family: Option<&str>) -> Result<Self, Error> {
        let linux_family = linux_family.filter(|f| !f.is_empty());
        if linux_family.is_some() && os != "linux" {
            return Err(Error::Validation(format!(
                "linux family {:?} requires os \"linux\", got {:?}",
                linux_family.unwrap_or_default(),
                os
            )));
        }
        Ok(Self {
            os: os.to_string(),
            arch: arch.to_string(),
            linux_family: linux_family.map(str::to_string),
        })
    }

    /// `os/arch` pair as used in plan files and error messages.
    pub fn pair(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.linux_family {
            Some(ref family) => write!(f, "{}/{} ({})", self.os, self.arch, family),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

// ============================================================================
// Plans
// ============================================================================

/// A parameter value in a compiled plan.
///
/// Literal values are final. Deferred values keep an expression that is
/// evaluated against execution-time variables (`{install_dir}` etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Deferred(Deferred),
    List(Vec<ParamValue>),
    Map(IndexMap<String, ParamValue>),
    Literal(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Deferred {
    #[serde(rename = "$deferred")]
    pub expr: String,
}

impl ParamValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn is_deferred(&self) -> bool {
        match self {
            Self::Deferred(_) => true,
            Self::List(items) => items.iter().any(Self::is_deferred),
            Self::Map(map) => map.values().any(Self::is_deferred),
            Self::Literal(_) => false,
        }
    }

    /// The literal string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

pub type Params = IndexMap<String, ParamValue>;

/// One atomic, target-resolved step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStep {
    pub action: ActionKind,

    #[serde(default)]
    pub params: Params,

    /// Parameters contain deferred values evaluated at execution time.
    #[serde(default)]
    pub evaluable: bool,

    #[serde(default)]
    pub deterministic: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ResolvedStep {
    pub fn new(action: ActionKind, params: Params) -> Self {
        let evaluable = params.values().any(ParamValue::is_deferred);
        Self {
            action,
            params,
            evaluable,
            deterministic: action.is_deterministic(),
            checksum: None,
            size: None,
        }
    }
}

/// Fully resolved, self-contained installation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationPlan {
    pub format_version: u32,
    pub tool: String,
    pub version: String,
    pub platform: Platform,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipe_hash: String,

    #[serde(default)]
    pub deterministic: bool,

    /// Binaries the tool provides, relative to its install dir.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,

    /// Embedded dependency plans, applied before this plan's steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<InstallationPlan>,

    pub steps: Vec<ResolvedStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifySpec>,
}

impl InstallationPlan {
    /// Number of embedded dependency plans at every depth.
    pub fn dependency_count(&self) -> usize {
        self.dependencies
            .iter()
            .map(|d| 1 + d.dependency_count())
            .sum()
    }

    /// Depth of the deepest dependency chain (0 = no dependencies).
    pub fn dependency_depth(&self) -> usize {
        self.dependencies
            .iter()
            .map(|d| 1 + d.dependency_depth())
            .max()
            .unwrap_or(0)
    }

    /// Privileged steps of this plan and every embedded dependency.
    pub fn privileged_steps(&self) -> Vec<&ResolvedStep> {
        let mut out: Vec<&ResolvedStep> = Vec::new();
        for dep in &self.dependencies {
            out.extend(dep.privileged_steps());
        }
        out.extend(self.steps.iter().filter(|s| s.action.is_privileged()));
        out
    }

    /// A plan made only of privileged steps describes a system dependency.
    pub fn is_system_dependency(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.action.is_privileged())
    }
}

// ============================================================================
// Versions
// ============================================================================

/// A resolved version: the upstream tag and the normalized version string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub tag: String,
    pub version: String,
}

impl VersionInfo {
    pub fn new(tag: &str, version: &str) -> Self {
        Self {
            tag: tag.to_string(),
            version: version.to_string(),
        }
    }
}

/// Cached version list with staleness metadata, for CLI display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionCacheInfo {
    pub versions: Vec<String>,
    pub source: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}

// ============================================================================
// Install state
// ============================================================================

/// Every installed tool, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub installed: IndexMap<String, ToolState>,
}

/// Install record for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolState {
    pub active_version: String,

    #[serde(default)]
    pub versions: IndexMap<String, VersionState>,

    /// Installed on request, rather than pulled in as a dependency.
    #[serde(default)]
    pub is_explicit: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<String>,

    /// Excluded from the shared "current" directory.
    #[serde(default)]
    pub is_hidden: bool,
}

impl ToolState {
    pub fn active(&self) -> Option<&VersionState> {
        self.versions.get(&self.active_version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionState {
    /// What the user asked for (may be empty for "latest").
    #[serde(default)]
    pub requested: String,

    #[serde(default)]
    pub binaries: Vec<String>,

    pub install_dir: PathBuf,

    pub installed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifySpec>,
}

impl Default for InstallationPlan {
    fn default() -> Self {
        Self {
            format_version: crate::core::planner::PLAN_FORMAT_VERSION,
            tool: String::new(),
            version: String::new(),
            platform: Platform {
                os: String::new(),
                arch: String::new(),
                linux_family: None,
            },
            generated_at: None,
            recipe_hash: String::new(),
            deterministic: true,
            binaries: Vec::new(),
            dependencies: Vec::new(),
            steps: Vec::new(),
            verify: None,
        }
    }
}
