//! FR-050: CLI subcommands — install, eval, sysdeps, activate, update, verify,
//! versions, list, cache, completions.
//!
//! Commands build their collaborators from [`Config`] and hand typed errors
//! back to `main`, which owns the exit code.

use crate::core::activate::activate;
use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::download::{DownloadCache, Downloader, HttpDownloader};
use crate::core::error::Error;
use crate::core::executor::{self, ExecuteConfig, InstallOutcome};
use crate::core::planner::{self, CompileConfig, StateInventory};
use crate::core::recipe::{split_tool_spec, validate_tool_name, DirRecipeLoader, RecipeLoader};
use crate::core::state::{load_state, record_install, save_state, InstallRecord};
use crate::core::types::{InstallationPlan, VersionInfo};
use crate::core::version::{compare_versions, provider_for, RecipeVersions, VersionSource};
use crate::core::version_cache::{self, CachedVersionLister, Origin};
use crate::core::{parser, sysdeps, target};
use crate::tripwire::eventlog::{Event, EventLog, Telemetry};
use crate::tripwire::verify::{verify_tool, VerifyOptions};
use chrono::{DateTime, Utc};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "ferrule",
    version,
    about = "Developer tool and version manager with reproducible installation plans"
)]
pub struct Cli {
    /// Only print errors and requested data
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a tool from its recipe, or apply a plan file
    Install {
        /// Tool to install, optionally as tool@version
        tool: Option<String>,

        /// Apply a plan produced by `eval` (`-` reads stdin)
        #[arg(long)]
        plan: Option<String>,

        /// Install missing eval-time dependencies without asking
        #[arg(short, long)]
        yes: bool,

        /// Assume privileged system steps were completed by hand
        #[arg(long)]
        skip_system_deps: bool,
    },

    /// Compile an installation plan and print it as JSON
    Eval {
        /// Tool to compile, optionally as tool@version
        tool: String,

        /// Compile for a linux family other than the host's
        #[arg(long)]
        target_family: Option<String>,

        /// Write the plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Install missing eval-time dependencies without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the privileged setup a tool needs
    Sysdeps {
        tool: String,

        /// Preview instructions for another linux family
        #[arg(long)]
        target_family: Option<String>,
    },

    /// Switch the active version of an installed tool
    Activate { tool: String, version: String },

    /// Install and activate the latest version of an installed tool
    Update {
        tool: String,

        /// Report what would change without installing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check that an installed tool works and is the one on PATH
    Verify { tool: String },

    /// List available versions of a tool
    Versions {
        tool: String,

        /// Machine-readable output, including errors
        #[arg(long)]
        json: bool,

        /// Ignore the cached list and fetch again
        #[arg(long)]
        refresh: bool,
    },

    /// List installed tools
    List,

    /// Inspect or clear the version cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Entry count and size
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached version list
    Clear {
        #[arg(long)]
        json: bool,
    },
}

/// Per-invocation collaborators.
pub struct Ctx {
    pub config: Config,
    pub quiet: bool,
    pub downloader: Box<dyn Downloader>,
    /// `PATH` as the user's shell sees it.
    pub path_env: String,
    pub telemetry: Box<dyn Telemetry>,
    pub cancel: CancelToken,
}

impl Ctx {
    pub fn from_env(quiet: bool) -> Result<Self, Error> {
        let config = Config::from_env()?;
        let telemetry = EventLog::new(&config.events_path(), config.telemetry);
        Ok(Self {
            config,
            quiet,
            downloader: Box::new(HttpDownloader),
            path_env: std::env::var("PATH").unwrap_or_default(),
            telemetry: Box::new(telemetry),
            cancel: CancelToken::new(),
        })
    }

    fn say(&self, line: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", line.as_ref());
        }
    }

    fn loader(&self) -> DirRecipeLoader {
        DirRecipeLoader::new(&self.config.recipes_dir)
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, quiet: bool) -> Result<(), Error> {
    if let Commands::Completions { shell } = cmd {
        clap_complete::generate(shell, &mut Cli::command(), "ferrule", &mut std::io::stdout());
        return Ok(());
    }
    let ctx = Ctx::from_env(quiet)?;
    run(&ctx, cmd)
}

/// Run a command against an explicit context.
pub fn run(ctx: &Ctx, cmd: Commands) -> Result<(), Error> {
    let name = command_name(&cmd);
    let result = match cmd {
        Commands::Install {
            tool,
            plan,
            yes,
            skip_system_deps,
        } => cmd_install(ctx, tool.as_deref(), plan.as_deref(), yes, skip_system_deps),
        Commands::Eval {
            tool,
            target_family,
            output,
            yes,
        } => cmd_eval(ctx, &tool, target_family.as_deref(), output.as_deref(), yes),
        Commands::Sysdeps { tool, target_family } => cmd_sysdeps(ctx, &tool, target_family.as_deref()),
        Commands::Activate { tool, version } => cmd_activate(ctx, &tool, &version),
        Commands::Update { tool, dry_run } => cmd_update(ctx, &tool, dry_run),
        Commands::Verify { tool } => cmd_verify(ctx, &tool),
        Commands::Versions { tool, json, refresh } => cmd_versions(ctx, &tool, json, refresh),
        Commands::List => cmd_list(ctx),
        Commands::Cache { action } => cmd_cache(ctx, action),
        Commands::Completions { .. } => Ok(()),
    };
    if let Err(ref e) = result {
        ctx.telemetry.send(Event::Failed {
            command: name.to_string(),
            category: e.category().to_string(),
        });
    }
    result
}

fn command_name(cmd: &Commands) -> &'static str {
    match cmd {
        Commands::Install { .. } => "install",
        Commands::Eval { .. } => "eval",
        Commands::Sysdeps { .. } => "sysdeps",
        Commands::Activate { .. } => "activate",
        Commands::Update { .. } => "update",
        Commands::Verify { .. } => "verify",
        Commands::Versions { .. } => "versions",
        Commands::List => "list",
        Commands::Cache { .. } => "cache",
        Commands::Completions { .. } => "completions",
    }
}

// ============================================================================
// install / eval / sysdeps
// ============================================================================

/// Why a tool is being installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Explicit,
    /// Needed to compile another tool's plan; kept out of current/.
    EvalDep,
}

fn cmd_install(ctx: &Ctx, tool: Option<&str>, plan_src: Option<&str>, yes: bool, skip_system: bool) -> Result<(), Error> {
    let root = match (tool, plan_src) {
        (_, Some(src)) => {
            let plan = parser::load_plan(src)?;
            let requested = tool.map(|t| split_tool_spec(t).0).unwrap_or("");
            parser::validate_plan_tool(&plan, requested)?;
            parser::validate_plan_platform(&plan, &target::host_platform())?;
            apply_plan(ctx, &plan, "", Role::Explicit, skip_system)?
        }
        (Some(spec), None) => {
            let (name, version) = split_tool_spec(spec);
            install_named(ctx, name, version, Role::Explicit, yes, skip_system)?
        }
        (None, None) => {
            return Err(Error::Validation("install needs a tool name or --plan <path>".into()));
        }
    };

    let Some(root) = root else {
        return Ok(());
    };
    let state = load_state(&ctx.config.state_path()).map_err(Error::Io)?;
    if let Some(tool_state) = state.installed.get(&root.tool) {
        let opts = VerifyOptions {
            path_env: &ctx.path_env,
            skip_path_checks: true,
        };
        verify_tool(&ctx.config, &root.tool, tool_state, &opts)?;
    }
    ctx.say(format!("Installed {} {}", root.tool, root.version));
    if !path_contains(&ctx.path_env, &ctx.config.current_dir) {
        ctx.say(format!(
            "\nAdd this to your shell profile to use installed tools:\n  export PATH=\"{}:$PATH\"",
            ctx.config.current_dir.display()
        ));
    }
    Ok(())
}

/// Compile and apply one tool by name. Returns the root outcome, or `None`
/// when the tool turned out to be a system dependency.
fn install_named(
    ctx: &Ctx,
    tool: &str,
    version: Option<&str>,
    role: Role,
    yes: bool,
    skip_system: bool,
) -> Result<Option<InstallOutcome>, Error> {
    validate_tool_name(tool)?;
    let loader = ctx.loader();
    let recipe = loader.get(tool)?;
    let cache = DownloadCache::new(&ctx.config.download_cache_dir);
    let inventory = StateInventory::new(&ctx.config.state_path());
    let install_deps = |deps: &[String]| -> Result<(), Error> {
        for dep in deps {
            ctx.say(format!("Installing eval-time dependency {}", dep));
            install_named(ctx, dep, None, Role::EvalDep, yes, skip_system)?;
        }
        Ok(())
    };
    let compile_cfg = CompileConfig {
        target: target::host_platform(),
        version: version.map(str::to_string),
        versions: &RecipeVersions,
        loader: Some(&loader),
        downloader: Some(ctx.downloader.as_ref()),
        download_cache: Some(&cache),
        inventory: &inventory,
        auto_accept_eval_deps: yes,
        on_eval_deps: Some(&install_deps),
        cancel: ctx.cancel.clone(),
    };
    let plan = planner::compile(&recipe, &compile_cfg)?;
    apply_plan(ctx, &plan, version.unwrap_or(""), role, skip_system)
}

/// Execute a plan, record every installed tool, activate, and persist state.
fn apply_plan(
    ctx: &Ctx,
    plan: &InstallationPlan,
    requested: &str,
    role: Role,
    skip_system: bool,
) -> Result<Option<InstallOutcome>, Error> {
    ctx.config.ensure_dirs()?;
    let state_path = ctx.config.state_path();
    let mut state = load_state(&state_path).map_err(Error::Io)?;
    let cache = DownloadCache::new(&ctx.config.download_cache_dir);
    let outcomes = {
        let exec = ExecuteConfig {
            config: &ctx.config,
            downloader: ctx.downloader.as_ref(),
            download_cache: Some(&cache),
            state: &state,
            skip_system_steps: skip_system,
            cancel: ctx.cancel.clone(),
        };
        executor::execute_plan(plan, &exec)?
    };

    let mut root = None;
    for outcome in outcomes {
        let is_root = outcome.required_by.is_none();
        if outcome.system_only {
            ctx.say(format!("{} is provided by the system; nothing to record", outcome.tool));
            continue;
        }
        if outcome.reused {
            if let (Some(tool), Some(parent)) = (state.installed.get_mut(&outcome.tool), &outcome.required_by) {
                if !tool.required_by.contains(parent) {
                    tool.required_by.push(parent.clone());
                    tool.required_by.sort();
                }
            }
            continue;
        }
        let hidden = is_root && role == Role::EvalDep;
        let explicit = is_root && role == Role::Explicit;
        record_install(
            &mut state,
            &outcome.tool,
            &outcome.version,
            InstallRecord {
                requested: if is_root { requested.to_string() } else { String::new() },
                binaries: outcome.binaries.clone(),
                install_dir: outcome.install_dir.clone(),
                verify: outcome.verify.clone(),
                explicit,
                required_by: outcome.required_by.clone(),
                hidden,
            },
        );
        let becomes_active = is_root
            || state
                .installed
                .get(&outcome.tool)
                .is_some_and(|t| t.active_version == outcome.version);
        if becomes_active {
            let activation = activate(&ctx.config, &mut state, &outcome.tool, &outcome.version)?;
            tracing::debug!(tool = %outcome.tool, links = activation.links.len(), "activated");
        }
        ctx.telemetry.send(Event::Installed {
            tool: outcome.tool.clone(),
            version: outcome.version.clone(),
            explicit,
            hidden,
        });
        if is_root {
            root = Some(outcome);
        } else {
            ctx.say(format!("Installed dependency {} {}", outcome.tool, outcome.version));
        }
    }
    save_state(&state_path, &state).map_err(Error::Io)?;
    Ok(root)
}

fn cmd_eval(ctx: &Ctx, spec: &str, family: Option<&str>, output: Option<&Path>, yes: bool) -> Result<(), Error> {
    let (tool, version) = split_tool_spec(spec);
    validate_tool_name(tool)?;
    let target = target::resolve_target(family)?;
    let loader = ctx.loader();
    let recipe = loader.get(tool)?;
    let cache = DownloadCache::new(&ctx.config.download_cache_dir);
    let inventory = StateInventory::new(&ctx.config.state_path());
    let install_deps = |deps: &[String]| -> Result<(), Error> {
        for dep in deps {
            install_named(ctx, dep, None, Role::EvalDep, yes, false)?;
        }
        Ok(())
    };
    let compile_cfg = CompileConfig {
        target,
        version: version.map(str::to_string),
        versions: &RecipeVersions,
        loader: Some(&loader),
        downloader: Some(ctx.downloader.as_ref()),
        download_cache: Some(&cache),
        inventory: &inventory,
        auto_accept_eval_deps: yes,
        on_eval_deps: Some(&install_deps),
        cancel: ctx.cancel.clone(),
    };
    let plan = planner::compile(&recipe, &compile_cfg)?;
    match output {
        Some(path) => {
            parser::save_plan(path, &plan)?;
            ctx.say(format!("Wrote plan for {} {} to {}", plan.tool, plan.version, path.display()));
        }
        None => println!("{}", parser::plan_to_json(&plan)?),
    }
    Ok(())
}

fn cmd_sysdeps(ctx: &Ctx, tool: &str, family: Option<&str>) -> Result<(), Error> {
    validate_tool_name(tool)?;
    let target = target::resolve_target(family)?;
    let loader = ctx.loader();
    let recipe = loader.get(tool)?;
    let steps = planner::system_steps(&recipe, &target, &VersionInfo::new("latest", "latest"), Some(&loader))?;
    let instructions = sysdeps::collect(&steps)?;
    if instructions.is_empty() {
        ctx.say(format!("{} needs no system dependencies on {}", tool, sysdeps::target_display_name(&target)));
        return Ok(());
    }
    print!("{}", sysdeps::render(&target, &instructions));
    Ok(())
}

// ============================================================================
// activate / update / verify / list
// ============================================================================

fn cmd_activate(ctx: &Ctx, tool: &str, version: &str) -> Result<(), Error> {
    validate_tool_name(tool)?;
    let state_path = ctx.config.state_path();
    let mut state = load_state(&state_path).map_err(Error::Io)?;
    let result = activate(&ctx.config, &mut state, tool, version)?;
    if !result.changed {
        ctx.say(format!("{} {} is already active", tool, version));
        return Ok(());
    }
    save_state(&state_path, &state).map_err(Error::Io)?;
    ctx.telemetry.send(Event::Activated {
        tool: tool.to_string(),
        from: result.from.clone(),
        to: result.to.clone(),
    });
    match result.from {
        Some(from) => ctx.say(format!("Activated {} {} (was {})", tool, version, from)),
        None => ctx.say(format!("Activated {} {}", tool, version)),
    }
    Ok(())
}

fn cmd_update(ctx: &Ctx, tool: &str, dry_run: bool) -> Result<(), Error> {
    validate_tool_name(tool)?;
    let state = load_state(&ctx.config.state_path()).map_err(Error::Io)?;
    let current = state
        .installed
        .get(tool)
        .map(|t| t.active_version.clone())
        .ok_or_else(|| Error::NotInstalled { tool: tool.to_string() })?;
    let recipe = ctx.loader().get(tool)?;
    let latest = RecipeVersions.resolve(&recipe, None, &ctx.cancel)?;

    if compare_versions(&latest.version, &current) != Ordering::Greater {
        ctx.say(format!("{} {} is up to date", tool, current));
        return Ok(());
    }
    if dry_run {
        ctx.say(format!("Would update {} from {} to {}", tool, current, latest.version));
        return Ok(());
    }
    install_named(ctx, tool, Some(&latest.version), Role::Explicit, false, false)?;
    ctx.telemetry.send(Event::Updated {
        tool: tool.to_string(),
        from: current.clone(),
        to: latest.version.clone(),
    });
    ctx.say(format!("Updated {} from {} to {}", tool, current, latest.version));
    Ok(())
}

fn cmd_verify(ctx: &Ctx, tool: &str) -> Result<(), Error> {
    validate_tool_name(tool)?;
    let state = load_state(&ctx.config.state_path()).map_err(Error::Io)?;
    let tool_state = state
        .installed
        .get(tool)
        .ok_or_else(|| Error::NotInstalled { tool: tool.to_string() })?;
    let opts = VerifyOptions {
        path_env: &ctx.path_env,
        skip_path_checks: false,
    };
    let result = verify_tool(&ctx.config, tool, tool_state, &opts);
    ctx.telemetry.send(Event::Verified {
        tool: tool.to_string(),
        version: tool_state.active_version.clone(),
        ok: result.is_ok(),
    });
    let report = result?;
    if let Some(ref output) = report.output {
        ctx.say(format!("  {}", output.lines().next().unwrap_or("")));
    }
    if tool_state.is_hidden {
        ctx.say(format!("{} {} is working (hidden; not on PATH)", tool, report.version));
    } else {
        ctx.say(format!("{} {} is working and first on PATH", tool, report.version));
    }
    Ok(())
}

fn cmd_list(ctx: &Ctx) -> Result<(), Error> {
    let state = load_state(&ctx.config.state_path()).map_err(Error::Io)?;
    if state.installed.is_empty() {
        ctx.say("No tools installed.");
        return Ok(());
    }
    for (name, tool) in &state.installed {
        let others: Vec<&str> = tool
            .versions
            .keys()
            .filter(|v| **v != tool.active_version)
            .map(String::as_str)
            .collect();
        let mut line = format!("{:<20} {}", name, tool.active_version);
        if !others.is_empty() {
            line.push_str(&format!(" (also {})", others.join(", ")));
        }
        if tool.is_hidden {
            line.push_str(" [hidden]");
        } else if !tool.is_explicit && !tool.required_by.is_empty() {
            line.push_str(&format!(" [dependency of {}]", tool.required_by.join(", ")));
        }
        println!("{}", line);
    }
    Ok(())
}

// ============================================================================
// versions / cache
// ============================================================================

/// `versions --json` document.
#[derive(Debug, Clone, Serialize)]
pub struct VersionsReport {
    pub tool: String,
    pub versions: Vec<String>,
    pub source: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
    #[serde(skip)]
    pub from_cache: bool,
}

fn cmd_versions(ctx: &Ctx, tool: &str, json: bool, refresh: bool) -> Result<(), Error> {
    match (versions_report(ctx, tool, refresh), json) {
        (Ok(report), true) => {
            let text = serde_json::to_string_pretty(&report)
                .map_err(|e| Error::Io(format!("serialize error: {}", e)))?;
            println!("{}", text);
            Ok(())
        }
        (Ok(report), false) => {
            ctx.say(format!("Available versions of {} ({}):", tool, report.source));
            for version in &report.versions {
                println!("  {}", version);
            }
            if report.from_cache {
                ctx.say(format!(
                    "(cached {}, refresh with --refresh)",
                    report.cached_at.format("%Y-%m-%d %H:%M UTC")
                ));
            }
            Ok(())
        }
        (Err(e), true) => {
            let body = serde_json::json!({
                "error": e.to_string(),
                "category": e.category(),
                "exit_code": e.exit_code(),
            });
            println!("{}", body);
            Err(e)
        }
        (Err(e), false) => Err(e),
    }
}

fn versions_report(ctx: &Ctx, tool: &str, refresh: bool) -> Result<VersionsReport, Error> {
    validate_tool_name(tool)?;
    let recipe = ctx.loader().get(tool)?;
    let provider = provider_for(&recipe)?
        .ok_or_else(|| Error::Validation(format!("{} declares no version source", tool)))?;
    let lister = provider.as_lister().ok_or_else(|| {
        Error::Validation(format!(
            "{} cannot list versions ({})",
            tool,
            provider.source_description()
        ))
    })?;
    let cached = CachedVersionLister::new(lister, &ctx.config.version_cache_dir, ctx.config.version_cache_ttl);
    let (versions, origin) = if refresh {
        cached.refresh(&ctx.cancel)?
    } else {
        cached.list_with_origin(&ctx.cancel)?
    };
    if origin == Origin::StaleFallback {
        ctx.say("warning: refresh failed, showing cached versions");
    }
    let now = Utc::now();
    let (cached_at, expires_at, is_expired) = match cached.cache_info() {
        Some(info) => (info.cached_at, info.expires_at, info.is_expired),
        None => (now, now, true),
    };
    Ok(VersionsReport {
        tool: tool.to_string(),
        versions,
        source: provider.source_description(),
        cached_at,
        expires_at,
        is_expired,
        from_cache: origin != Origin::Network,
    })
}

fn cmd_cache(ctx: &Ctx, action: CacheAction) -> Result<(), Error> {
    let dir = &ctx.config.version_cache_dir;
    match action {
        CacheAction::Info { json } => {
            let stats = version_cache::cache_stats(dir)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "dir": dir.display().to_string(),
                        "entries": stats.entries,
                        "bytes": stats.bytes,
                        "ttl_seconds": ctx.config.version_cache_ttl.as_secs(),
                    })
                );
            } else {
                println!("Version cache: {}", dir.display());
                println!("  Entries: {}", stats.entries);
                println!("  Size:    {} bytes", stats.bytes);
                println!("  TTL:     {}s", ctx.config.version_cache_ttl.as_secs());
            }
        }
        CacheAction::Clear { json } => {
            let removed = version_cache::clear(dir)?;
            if json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else {
                ctx.say(format!("Removed {} cached version list(s)", removed));
            }
        }
    }
    Ok(())
}

fn path_contains(path_env: &str, dir: &Path) -> bool {
    let wanted = dir.display().to_string();
    let wanted = wanted.trim_end_matches('/');
    path_env.split(':').any(|entry| entry.trim_end_matches('/') == wanted)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::download::DownloadResult;
    use crate::core::error::exit;
    use crate::tripwire::eventlog::read_events;

    struct NoNetwork;

    impl Downloader for NoNetwork {
        fn download(&self, url: &str, _cancel: &CancelToken) -> Result<DownloadResult, Error> {
            Err(Error::Network(format!("offline: {}", url)))
        }
    }

    fn demo_recipe(version: &str) -> String {
        format!(
            r#"
[metadata]
name = "demo"
binaries = ["bin/demo"]

[version]
pinned = "{version}"

[[steps]]
action = "run_command"
command = "mkdir -p {{install_dir}}/bin && echo 'echo demo {{version}}' > {{install_dir}}/bin/demo && chmod +x {{install_dir}}/bin/demo"

[verify]
command = "demo"
pattern = "demo {{version}}"
"#
        )
    }

    fn ctx() -> (tempfile::TempDir, Ctx) {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        std::fs::create_dir_all(&config.recipes_dir).unwrap();
        let path_env = format!("{}:/usr/local/bin:/usr/bin:/bin", config.current_dir.display());
        let telemetry = EventLog::new(&config.events_path(), true);
        let ctx = Ctx {
            config,
            quiet: true,
            downloader: Box::new(NoNetwork),
            path_env,
            telemetry: Box::new(telemetry),
            cancel: CancelToken::new(),
        };
        (home, ctx)
    }

    fn write_recipe(ctx: &Ctx, name: &str, body: &str) {
        std::fs::write(ctx.config.recipes_dir.join(format!("{}.toml", name)), body).unwrap();
    }

    fn install(tool: &str) -> Commands {
        Commands::Install {
            tool: Some(tool.into()),
            plan: None,
            yes: false,
            skip_system_deps: false,
        }
    }

    #[test]
    fn test_cli_install_records_and_activates() {
        let (_home, ctx) = ctx();
        write_recipe(&ctx, "demo", &demo_recipe("1.0"));
        run(&ctx, install("demo")).unwrap();

        let state = load_state(&ctx.config.state_path()).unwrap();
        let demo = &state.installed["demo"];
        assert_eq!(demo.active_version, "1.0");
        assert!(demo.is_explicit);
        let link = ctx.config.current_symlink("demo");
        assert_eq!(std::fs::read_link(link).unwrap(), ctx.config.tool_dir("demo", "1.0").join("bin/demo"));

        run(&ctx, Commands::Verify { tool: "demo".into() }).unwrap();
        run(&ctx, Commands::List).unwrap();

        let events = read_events(&ctx.config.events_path()).unwrap();
        assert!(events.iter().any(|e| matches!(e.event, Event::Installed { ref tool, .. } if tool == "demo")));
        assert!(events.iter().any(|e| matches!(e.event, Event::Verified { ok: true, .. })));
    }

    #[test]
    fn test_cli_install_twice_is_idempotent() {
        let (_home, ctx) = ctx();
        write_recipe(&ctx, "demo", &demo_recipe("1.0"));
        run(&ctx, install("demo")).unwrap();
        run(&ctx, install("demo")).unwrap();
        let state = load_state(&ctx.config.state_path()).unwrap();
        assert_eq!(state.installed["demo"].versions.len(), 1);
    }

    #[test]
    fn test_cli_update_and_activate() {
        let (_home, ctx) = ctx();
        write_recipe(&ctx, "demo", &demo_recipe("1.0"));
        run(&ctx, install("demo")).unwrap();

        write_recipe(&ctx, "demo", &demo_recipe("1.1"));
        run(&ctx, Commands::Update { tool: "demo".into(), dry_run: true }).unwrap();
        assert_eq!(load_state(&ctx.config.state_path()).unwrap().installed["demo"].active_version, "1.0");

        run(&ctx, Commands::Update { tool: "demo".into(), dry_run: false }).unwrap();
        let state = load_state(&ctx.config.state_path()).unwrap();
        assert_eq!(state.installed["demo"].active_version, "1.1");
        assert_eq!(state.installed["demo"].versions.len(), 2);

        run(&ctx, Commands::Activate { tool: "demo".into(), version: "1.0".into() }).unwrap();
        let link = std::fs::read_link(ctx.config.current_symlink("demo")).unwrap();
        assert!(link.starts_with(ctx.config.tool_dir("demo", "1.0")));

        let err = run(&ctx, Commands::Activate { tool: "demo".into(), version: "2.0".into() }).unwrap_err();
        assert_eq!(err.exit_code(), exit::VERSION_NOT_FOUND);
    }

    #[test]
    fn test_cli_update_not_installed() {
        let (_home, ctx) = ctx();
        write_recipe(&ctx, "demo", &demo_recipe("1.0"));
        let err = run(&ctx, Commands::Update { tool: "demo".into(), dry_run: false }).unwrap_err();
        assert!(matches!(err, Error::NotInstalled { .. }));
    }

    #[test]
    fn test_cli_eval_then_install_plan() {
        let (home, ctx) = ctx();
        write_recipe(&ctx, "demo", &demo_recipe("1.0"));
        let plan_path = home.path().join("demo.plan.json");
        run(
            &ctx,
            Commands::Eval {
                tool: "demo".into(),
                target_family: None,
                output: Some(plan_path.clone()),
                yes: false,
            },
        )
        .unwrap();
        let plan = parser::load_plan(&plan_path.display().to_string()).unwrap();
        assert_eq!((plan.tool.as_str(), plan.version.as_str()), ("demo", "1.0"));

        let wrong = run(
            &ctx,
            Commands::Install {
                tool: Some("other".into()),
                plan: Some(plan_path.display().to_string()),
                yes: false,
                skip_system_deps: false,
            },
        );
        assert!(wrong.is_err());

        run(
            &ctx,
            Commands::Install {
                tool: None,
                plan: Some(plan_path.display().to_string()),
                yes: false,
                skip_system_deps: false,
            },
        )
        .unwrap();
        assert!(ctx.config.current_symlink("demo").symlink_metadata().is_ok());
    }

    #[test]
    fn test_cli_missing_recipe_exit_code() {
        let (_home, ctx) = ctx();
        let err = run(&ctx, install("ghost")).unwrap_err();
        assert_eq!(err.exit_code(), exit::RECIPE_NOT_FOUND);
        let events = read_events(&ctx.config.events_path()).unwrap();
        assert!(matches!(events[0].event, Event::Failed { ref category, .. } if category == "recipe_not_found"));
    }

    #[test]
    fn test_cli_eval_deps_need_yes() {
        let (_home, ctx) = ctx();
        write_recipe(
            &ctx,
            "bat",
            "[metadata]\nname = \"bat\"\n[version]\npinned = \"0.24.0\"\n[[steps]]\naction = \"cargo_install\"\ncrate = \"bat\"\n",
        );
        let err = run(&ctx, install("bat")).unwrap_err();
        assert!(matches!(err, Error::EvalDepsRequired(ref d) if d == &vec!["rust".to_string()]));
        assert_eq!(err.exit_code(), exit::DEPENDENCY_FAILED);
    }

    #[test]
    fn test_cli_eval_dep_installed_hidden() {
        let (_home, ctx) = ctx();
        write_recipe(
            &ctx,
            "rust",
            "[metadata]\nname = \"rust\"\n[version]\npinned = \"1.80.0\"\n[[steps]]\naction = \"run_command\"\ncommand = \"mkdir -p {install_dir}/bin\"\n",
        );
        write_recipe(
            &ctx,
            "bat",
            "[metadata]\nname = \"bat\"\n[version]\npinned = \"0.24.0\"\n[[steps]]\naction = \"cargo_install\"\ncrate = \"bat\"\n",
        );
        let out = ctx.config.home.join("bat.json");
        run(
            &ctx,
            Commands::Eval {
                tool: "bat".into(),
                target_family: None,
                output: Some(out.clone()),
                yes: true,
            },
        )
        .unwrap();
        let state = load_state(&ctx.config.state_path()).unwrap();
        assert!(state.installed["rust"].is_hidden);
        let plan = parser::load_plan(&out.display().to_string()).unwrap();
        assert_eq!(plan.steps[0].action, crate::actions::ActionKind::CargoBuild);
    }

    #[test]
    fn test_cli_sysdeps_with_family_override() {
        let (_home, ctx) = ctx();
        write_recipe(
            &ctx,
            "docker",
            "[metadata]\nname = \"docker\"\n\
             [[steps]]\naction = \"apt_install\"\npackages = [\"docker.io\"]\n\
             [[steps]]\naction = \"dnf_install\"\npackages = [\"moby-engine\"]\n",
        );
        run(&ctx, Commands::Sysdeps { tool: "docker".into(), target_family: Some("rhel".into()) }).unwrap();
        let err = run(&ctx, Commands::Sysdeps { tool: "docker".into(), target_family: Some("gentoo".into()) })
            .unwrap_err();
        assert!(err.to_string().contains("debian, rhel, arch, alpine, suse"));
    }

    #[test]
    fn test_cli_versions_pinned_cannot_list() {
        let (_home, ctx) = ctx();
        write_recipe(&ctx, "demo", &demo_recipe("1.0"));
        let err = run(&ctx, Commands::Versions { tool: "demo".into(), json: true, refresh: false }).unwrap_err();
        assert!(err.to_string().contains("cannot list versions"));
        assert_eq!(err.exit_code(), exit::USAGE);
    }

    #[test]
    fn test_cli_cache_info_and_clear() {
        let (_home, ctx) = ctx();
        std::fs::create_dir_all(&ctx.config.version_cache_dir).unwrap();
        std::fs::write(ctx.config.version_cache_dir.join("abc.json"), "{}").unwrap();
        run(&ctx, Commands::Cache { action: CacheAction::Info { json: true } }).unwrap();
        run(&ctx, Commands::Cache { action: CacheAction::Clear { json: false } }).unwrap();
        assert_eq!(version_cache::cache_stats(&ctx.config.version_cache_dir).unwrap().entries, 0);
    }

    #[test]
    fn test_cli_install_needs_tool_or_plan() {
        let (_home, ctx) = ctx();
        let err = run(
            &ctx,
            Commands::Install {
                tool: None,
                plan: None,
                yes: false,
                skip_system_deps: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["ferrule", "-q", "versions", "jq", "--json", "-vv"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Versions { json: true, refresh: false, .. }));
        Cli::command().debug_assert();
    }
}
