//! FR-009: Plan compiler — recipe + target → self-contained installation plan.
//!
//! Steps are filtered by their implicit and declared constraints, expanded
//! against compile-time variables, decomposed into primitives, and the
//! recipe's dependencies are compiled recursively into embedded sub-plans.

use super::cancel::CancelToken;
use super::error::Error;
use super::recipe::RecipeLoader;
use super::resolver;
use super::state::{load_state, validate_version_string};
use super::types::{InstallationPlan, Params, ParamValue, Platform, Recipe, ResolvedStep, Step, VersionInfo};
use super::version::VersionSource;
use crate::actions::composite::{self, DecomposeContext};
use crate::actions::{str_list, system, ActionClass, ActionKind};
use crate::core::download::{DownloadCache, Downloader};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Plan schema stamped into every compiled plan.
pub const PLAN_FORMAT_VERSION: u32 = 2;

/// Longest chain of embedded dependency plans.
pub const MAX_DEPENDENCY_DEPTH: usize = 5;

/// Embedded dependency plans across the whole tree.
pub const MAX_TOTAL_DEPENDENCIES: usize = 100;

/// Installs the named eval-time dependencies on request.
pub type EvalDepsCallback<'a> = &'a dyn Fn(&[String]) -> Result<(), Error>;

/// Where an installed tool lives, for steps that need its toolchain at
/// compile time.
pub trait ToolInventory {
    fn active_install_dir(&self, tool: &str) -> Option<PathBuf>;
}

/// Inventory backed by the state file. Re-read on every lookup so tools
/// installed by the eval-deps callback become visible.
#[derive(Debug, Clone)]
pub struct StateInventory {
    path: PathBuf,
}

impl StateInventory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl ToolInventory for StateInventory {
    fn active_install_dir(&self, tool: &str) -> Option<PathBuf> {
        let state = match load_state(&self.path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read install state");
                return None;
            }
        };
        let dir = state.installed.get(tool)?.active()?.install_dir.clone();
        dir.is_dir().then_some(dir)
    }
}

/// Everything compilation depends on, injected by the caller.
pub struct CompileConfig<'a> {
    pub target: Platform,
    /// Requested version of the root recipe; dependencies use their latest.
    pub version: Option<String>,
    pub versions: &'a dyn VersionSource,
    /// Without a loader, dependencies are not embedded.
    pub loader: Option<&'a dyn RecipeLoader>,
    pub downloader: Option<&'a dyn Downloader>,
    pub download_cache: Option<&'a DownloadCache>,
    pub inventory: &'a dyn ToolInventory,
    pub auto_accept_eval_deps: bool,
    pub on_eval_deps: Option<EvalDepsCallback<'a>>,
    pub cancel: CancelToken,
}

/// Compile a recipe into an installation plan.
pub fn compile(recipe: &Recipe, cfg: &CompileConfig<'_>) -> Result<InstallationPlan, Error> {
    let mut chain = Vec::new();
    let mut total = 0;
    compile_tree(recipe, cfg.version.as_deref(), cfg, &mut chain, &mut total)
}

fn compile_tree(
    recipe: &Recipe,
    requested: Option<&str>,
    cfg: &CompileConfig<'_>,
    chain: &mut Vec<String>,
    total: &mut usize,
) -> Result<InstallationPlan, Error> {
    cfg.cancel.check()?;
    let name = recipe.name().to_string();
    if let Some(pos) = chain.iter().position(|n| *n == name) {
        let mut cycle = chain[pos..].to_vec();
        cycle.push(name);
        return Err(Error::CyclicDependency(cycle));
    }
    if chain.len() > MAX_DEPENDENCY_DEPTH {
        return Err(Error::Validation(format!(
            "dependency chain {} -> {} exceeds the depth limit of {}",
            chain.join(" -> "),
            name,
            MAX_DEPENDENCY_DEPTH
        )));
    }

    chain.push(name);
    let result = compile_one(recipe, requested, cfg, chain, total);
    chain.pop();
    result
}

fn compile_one(
    recipe: &Recipe,
    requested: Option<&str>,
    cfg: &CompileConfig<'_>,
    chain: &mut Vec<String>,
    total: &mut usize,
) -> Result<InstallationPlan, Error> {
    let version = cfg.versions.resolve(recipe, requested, &cfg.cancel)?;
    validate_version_string(&version.version)?;
    tracing::debug!(tool = recipe.name(), version = %version.version, target = %cfg.target, "compiling");

    let selected = select_steps(&recipe.steps, &cfg.target);
    if !recipe.steps.is_empty() && selected.is_empty() {
        return Err(Error::TargetUnsupported {
            tool: recipe.name().to_string(),
            target: cfg.target.to_string(),
        });
    }

    let toolchains = ensure_eval_deps(&selected, cfg)?;
    let mut steps = Vec::new();
    for step in &selected {
        steps.extend(resolve_step(step, &version, cfg, &toolchains)?);
    }
    insert_patches(recipe, &version, cfg, &mut steps)?;

    let mut dependencies = Vec::new();
    if let Some(loader) = cfg.loader {
        let mut names = recipe.metadata.dependencies.clone();
        names.sort();
        names.dedup();
        for dep in names {
            *total += 1;
            if *total > MAX_TOTAL_DEPENDENCIES {
                return Err(Error::Validation(format!(
                    "{} pulls in more than {} dependencies",
                    chain.first().map(String::as_str).unwrap_or(recipe.name()),
                    MAX_TOTAL_DEPENDENCIES
                )));
            }
            let dep_recipe = loader.get(&dep)?;
            dependencies.push(compile_tree(&dep_recipe, None, cfg, chain, total)?);
        }
    }

    let deterministic = steps.iter().all(|s| s.deterministic) && dependencies.iter().all(|d| d.deterministic);
    let binaries = if recipe.metadata.binaries.is_empty() {
        derive_binaries(&steps)?
    } else {
        recipe.metadata.binaries.clone()
    };
    let verify = (!recipe.verify.command.is_empty()).then(|| recipe.verify.clone());

    Ok(InstallationPlan {
        format_version: PLAN_FORMAT_VERSION,
        tool: recipe.name().to_string(),
        version: version.version,
        platform: cfg.target.clone(),
        generated_at: Some(Utc::now()),
        recipe_hash: recipe.source_hash.clone(),
        deterministic,
        binaries,
        dependencies,
        steps,
        verify,
    })
}

/// Steps that apply to `target`: the action's implicit constraint and the
/// step's own `when` must both match.
pub fn select_steps<'r>(steps: &'r [Step], target: &Platform) -> Vec<&'r Step> {
    steps
        .iter()
        .filter(|s| s.action.implicit_constraint().matches(target) && s.when.matches(target))
        .collect()
}

fn resolve_step(
    step: &Step,
    version: &VersionInfo,
    cfg: &CompileConfig<'_>,
    toolchains: &IndexMap<String, PathBuf>,
) -> Result<Vec<ResolvedStep>, Error> {
    let kind = step.action;
    let vars = resolver::compile_vars(kind.name(), version, &cfg.target, &step.params)?;
    let params = resolver::expand_params(kind.name(), &step.params, &vars)?;
    match kind.class() {
        ActionClass::Composite => {
            let toolchain = kind.eval_deps().first().and_then(|dep| toolchains.get(*dep));
            let ctx = DecomposeContext {
                version,
                downloader: cfg.downloader,
                download_cache: cfg.download_cache,
                toolchain_dir: toolchain.map(PathBuf::as_path),
                cancel: &cfg.cancel,
            };
            composite::decompose(kind, &params, &ctx)
        }
        ActionClass::System(_) => {
            // reject malformed parameters now rather than when advising
            system::describe(kind, &params)?;
            Ok(vec![ResolvedStep::new(kind, params)])
        }
        ActionClass::Primitive => Ok(vec![ResolvedStep::new(kind, params)]),
    }
}

/// Install directories of every eval-time dependency the steps need.
fn ensure_eval_deps(steps: &[&Step], cfg: &CompileConfig<'_>) -> Result<IndexMap<String, PathBuf>, Error> {
    let mut needed: Vec<&str> = steps.iter().flat_map(|s| s.action.eval_deps().iter().copied()).collect();
    needed.sort_unstable();
    needed.dedup();

    let lookup = || {
        let mut found = IndexMap::new();
        let mut missing = Vec::new();
        for dep in &needed {
            match cfg.inventory.active_install_dir(dep) {
                Some(dir) => {
                    found.insert(dep.to_string(), dir);
                }
                None => missing.push(dep.to_string()),
            }
        }
        (found, missing)
    };

    let (found, missing) = lookup();
    if missing.is_empty() {
        return Ok(found);
    }
    let callback = match cfg.on_eval_deps {
        Some(cb) if cfg.auto_accept_eval_deps => cb,
        _ => return Err(Error::EvalDepsRequired(missing)),
    };
    tracing::info!(deps = ?missing, "installing eval-time dependencies");
    callback(&missing)?;
    cfg.cancel.check()?;

    let (found, still_missing) = lookup();
    if still_missing.is_empty() {
        Ok(found)
    } else {
        Err(Error::EvalDepsRequired(still_missing))
    }
}

/// Patches run after the last `extract`, or at the end when nothing is extracted.
fn insert_patches(
    recipe: &Recipe,
    version: &VersionInfo,
    cfg: &CompileConfig<'_>,
    steps: &mut Vec<ResolvedStep>,
) -> Result<(), Error> {
    if recipe.patches.is_empty() {
        return Ok(());
    }
    let kind = ActionKind::ApplyPatch;
    let vars = resolver::compile_vars(kind.name(), version, &cfg.target, &IndexMap::new())?;
    let mut patch_steps = Vec::new();
    for (i, patch) in recipe.patches.iter().enumerate() {
        let mut params = Params::new();
        params.insert("strip".into(), ParamValue::literal(patch.strip));
        match (&patch.data, &patch.url) {
            (Some(data), None) => {
                params.insert("data".into(), ParamValue::literal(data.as_str()));
            }
            (None, Some(url)) => {
                let dest = format!("patch-{}.diff", i + 1);
                let mut download = Params::new();
                download.insert("url".into(), resolver::expand_str(kind.name(), "url", url, &vars)?);
                download.insert("dest".into(), ParamValue::literal(dest.as_str()));
                if let Some(ref checksum) = patch.checksum {
                    download.insert("checksum".into(), ParamValue::literal(checksum.as_str()));
                }
                let ctx = DecomposeContext {
                    version,
                    downloader: cfg.downloader,
                    download_cache: cfg.download_cache,
                    toolchain_dir: None,
                    cancel: &cfg.cancel,
                };
                patch_steps.extend(composite::decompose(ActionKind::Download, &download, &ctx)?);
                params.insert("file".into(), ParamValue::literal(dest));
            }
            _ => {
                return Err(Error::Validation(format!(
                    "{}: patch {} needs exactly one of data or url",
                    recipe.name(),
                    i + 1
                )))
            }
        }
        patch_steps.push(ResolvedStep::new(kind, params));
    }

    let at = steps
        .iter()
        .rposition(|s| s.action == ActionKind::Extract)
        .map_or(steps.len(), |i| i + 1);
    steps.splice(at..at, patch_steps);
    Ok(())
}

/// `bin/<name>` for every installed binary and built executable.
fn derive_binaries(steps: &[ResolvedStep]) -> Result<Vec<String>, Error> {
    let mut out: Vec<String> = Vec::new();
    for step in steps {
        let names = match step.action {
            ActionKind::InstallBinaries => str_list(step.action, &step.params, "binaries")?,
            ActionKind::CargoBuild | ActionKind::GoBuild | ActionKind::NpmExec => {
                str_list(step.action, &step.params, "executables")?
            }
            _ => continue,
        };
        for name in names {
            let base = Path::new(&name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(name);
            let binary = format!("bin/{}", base);
            if !out.contains(&binary) {
                out.push(binary);
            }
        }
    }
    Ok(out)
}

/// Privileged steps of a recipe (and, with a loader, its dependencies) for
/// `target`, expanded without downloading or resolving eval-time deps.
/// `version` applies to the root recipe only; dependencies are expanded as
/// `latest`. A dependency reached through several paths contributes once.
pub fn system_steps(
    recipe: &Recipe,
    target: &Platform,
    version: &VersionInfo,
    loader: Option<&dyn RecipeLoader>,
) -> Result<Vec<ResolvedStep>, Error> {
    let mut walk = SystemWalk {
        target,
        loader,
        chain: Vec::new(),
        seen: HashSet::new(),
        out: Vec::new(),
    };
    walk.collect(recipe, version)?;
    Ok(walk.out)
}

struct SystemWalk<'a> {
    target: &'a Platform,
    loader: Option<&'a dyn RecipeLoader>,
    chain: Vec<String>,
    seen: HashSet<String>,
    out: Vec<ResolvedStep>,
}

impl SystemWalk<'_> {
    fn collect(&mut self, recipe: &Recipe, version: &VersionInfo) -> Result<(), Error> {
        let name = recipe.name().to_string();
        if let Some(pos) = self.chain.iter().position(|n| *n == name) {
            let mut cycle = self.chain[pos..].to_vec();
            cycle.push(name);
            return Err(Error::CyclicDependency(cycle));
        }
        if !self.seen.insert(name.clone()) {
            return Ok(());
        }
        self.chain.push(name);
        if let Some(loader) = self.loader {
            let mut deps = recipe.metadata.dependencies.clone();
            deps.sort();
            deps.dedup();
            let latest = VersionInfo::new("latest", "latest");
            for dep in deps {
                let dep_recipe = loader.get(&dep)?;
                self.collect(&dep_recipe, &latest)?;
            }
        }
        for step in select_steps(&recipe.steps, self.target) {
            if !step.action.is_privileged() {
                continue;
            }
            let vars = resolver::compile_vars(step.action.name(), version, self.target, &step.params)?;
            let params = resolver::expand_params(step.action.name(), &step.params, &vars)?;
            system::describe(step.action, &params)?;
            self.out.push(ResolvedStep::new(step.action, params));
        }
        self.chain.pop();
        Ok(())
    }
}
