//! FR-003: Configuration — home layout, optional config.yaml, env overrides.

use super::error::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time a fetched version list stays fresh.
pub const DEFAULT_VERSION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

pub const ENV_HOME: &str = "FERRULE_HOME";
pub const ENV_VERSION_CACHE_TTL: &str = "FERRULE_VERSION_CACHE_TTL";
pub const ENV_RECIPES: &str = "FERRULE_RECIPES";
pub const ENV_TELEMETRY: &str = "FERRULE_TELEMETRY";

/// Fixed directories and tunables for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub tools_dir: PathBuf,
    pub current_dir: PathBuf,
    pub apps_dir: PathBuf,
    pub download_cache_dir: PathBuf,
    pub key_cache_dir: PathBuf,
    pub version_cache_dir: PathBuf,
    pub recipes_dir: PathBuf,
    pub version_cache_ttl: Duration,
    pub telemetry: bool,
}

/// `$FERRULE_HOME/config.yaml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    version_cache_ttl: Option<String>,
    #[serde(default)]
    recipes_dir: Option<PathBuf>,
    #[serde(default)]
    telemetry: Option<bool>,
}

impl Config {
    /// Layout rooted at `home` with every default applied.
    pub fn with_home(home: &Path) -> Self {
        let tools_dir = home.join("tools");
        let cache = home.join("cache");
        Self {
            home: home.to_path_buf(),
            current_dir: tools_dir.join("current"),
            tools_dir,
            apps_dir: home.join("apps"),
            download_cache_dir: cache.join("downloads"),
            key_cache_dir: cache.join("keys"),
            version_cache_dir: cache.join("versions"),
            recipes_dir: home.join("recipes"),
            version_cache_ttl: DEFAULT_VERSION_CACHE_TTL,
            telemetry: true,
        }
    }

    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let home = match lookup(ENV_HOME).filter(|h| !h.is_empty()) {
            Some(h) => PathBuf::from(h),
            None => dirs::home_dir()
                .map(|h| h.join(".ferrule"))
                .ok_or_else(|| Error::Io(format!("cannot determine home directory; set {}", ENV_HOME)))?,
        };
        let mut config = Self::with_home(&home);

        let file = load_config_file(&home.join("config.yaml"))?;
        if let Some(dir) = file.recipes_dir {
            config.recipes_dir = dir;
        }
        if let Some(enabled) = file.telemetry {
            config.telemetry = enabled;
        }
        if let Some(ttl) = file.version_cache_ttl {
            config.version_cache_ttl = ttl_or_default(&ttl, "config.yaml");
        }

        if let Some(dir) = lookup(ENV_RECIPES).filter(|d| !d.is_empty()) {
            config.recipes_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = lookup(ENV_VERSION_CACHE_TTL) {
            config.version_cache_ttl = ttl_or_default(&ttl, ENV_VERSION_CACHE_TTL);
        }
        if let Some(flag) = lookup(ENV_TELEMETRY) {
            config.telemetry = !matches!(flag.trim(), "0" | "false" | "off" | "no");
        }
        Ok(config)
    }

    /// `tools/<name>-<version>`
    pub fn tool_dir(&self, name: &str, version: &str) -> PathBuf {
        self.tools_dir.join(format!("{}-{}", name, version))
    }

    /// `tools/current/<binary>`
    pub fn current_symlink(&self, binary: &str) -> PathBuf {
        self.current_dir.join(binary)
    }

    pub fn state_path(&self) -> PathBuf {
        self.home.join("state.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.home.join("events.jsonl")
    }

    /// Create every managed directory.
    pub fn ensure_dirs(&self) -> Result<(), Error> {
        for dir in [
            &self.tools_dir,
            &self.current_dir,
            &self.apps_dir,
            &self.download_cache_dir,
            &self.key_cache_dir,
            &self.version_cache_dir,
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Io(format!("cannot create dir {}: {}", dir.display(), e)))?;
        }
        Ok(())
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile, Error> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read {}: {}", path.display(), e)))?;
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Validation(format!("invalid config file {}: {}", path.display(), e)))
}

fn ttl_or_default(raw: &str, origin: &str) -> Duration {
    match parse_duration(raw) {
        Some(ttl) => ttl,
        None => {
            tracing::warn!(
                value = raw,
                origin,
                "invalid version cache TTL, using default of 1h"
            );
            DEFAULT_VERSION_CACHE_TTL
        }
    }
}

/// Parse `90`, `90s`, `30m`, `1h`, or `2d`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => n,
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(60 * 60)?,
        "d" => n.checked_mul(24 * 60 * 60)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}
