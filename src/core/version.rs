//! FR-015: Version providers — resolve a version reference, optionally list all.
//!
//! Resolving is always possible. Listing is a separate capability: a pinned
//! source can name its one version but has nothing to enumerate.

use super::cancel::CancelToken;
use super::error::Error;
use super::types::{Recipe, VersionInfo};
use crate::actions::ActionKind;
use std::cmp::Ordering;
use std::time::Duration;

const GITHUB_API: &str = "https://api.github.com";
const CRATES_IO_API: &str = "https://crates.io";
const NPM_REGISTRY: &str = "https://registry.npmjs.org";
const GO_PROXY: &str = "https://proxy.golang.org";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("ferrule/", env!("CARGO_PKG_VERSION"));

/// Resolves version references for one upstream source.
pub trait VersionResolver {
    fn resolve_latest(&self, cancel: &CancelToken) -> Result<VersionInfo, Error>;

    /// Exact match first, then the newest version under a `1.29`-style prefix.
    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error>;

    /// Stable identifier of the source, e.g. `GitHub:jqlang/jq`.
    fn source_description(&self) -> String;

    /// The listing capability, when the source has one.
    fn as_lister(&self) -> Option<&dyn VersionLister> {
        None
    }
}

/// A source that can enumerate its versions.
pub trait VersionLister: VersionResolver {
    /// Every available version, newest first.
    fn list_versions(&self, cancel: &CancelToken) -> Result<Vec<String>, Error>;
}

/// Version resolution as the compiler sees it: recipe in, version out.
pub trait VersionSource {
    fn resolve(&self, recipe: &Recipe, requested: Option<&str>, cancel: &CancelToken) -> Result<VersionInfo, Error>;
}

/// Resolves through the provider each recipe declares.
/// Recipes without a version source compile as version `dev`.
#[derive(Debug, Default)]
pub struct RecipeVersions;

impl VersionSource for RecipeVersions {
    fn resolve(&self, recipe: &Recipe, requested: Option<&str>, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        let Some(provider) = provider_for(recipe)? else {
            tracing::debug!(recipe = recipe.name(), "no version source, using dev");
            return Ok(VersionInfo::new("dev", requested.unwrap_or("dev")));
        };
        let result = match requested {
            Some(v) if !v.is_empty() && v != "latest" => provider.resolve_version(v, cancel),
            _ => provider.resolve_latest(cancel),
        };
        result.map_err(|e| match e {
            Error::VersionNotFound { version, available, .. } => Error::VersionNotFound {
                tool: recipe.name().to_string(),
                version,
                available,
            },
            other => other,
        })
    }
}

/// Build the provider a recipe's `[version]` table describes.
///
/// Without an explicit source, the first install step that names an upstream
/// package (`github_archive`/`github_file` repo, `cargo_install` crate,
/// `npm_install` package, `go_install` module) decides.
pub fn provider_for(recipe: &Recipe) -> Result<Option<Box<dyn VersionResolver>>, Error> {
    let section = &recipe.version;
    let inferred = inferred_from_steps(recipe);
    let source = match section.source.as_deref() {
        Some(s) => s,
        None if section.github_repo.is_some() => "github_releases",
        None if section.pinned.is_some() => "pinned",
        None if section.crate_name.is_some() => "crates_io",
        None if section.npm_package.is_some() => "npm",
        None if section.go_module.is_some() => "goproxy",
        None => match inferred {
            Some((source, _)) => {
                tracing::debug!(recipe = recipe.name(), source, "version source inferred from steps");
                source
            }
            None => return Ok(None),
        },
    };
    let from_steps = |kind: &str| {
        inferred
            .as_ref()
            .filter(|(source, _)| *source == kind)
            .map(|(_, name)| name.as_str())
    };
    let missing = |field: &str| Error::Validation(format!("{}: {} requires version.{}", recipe.name(), source, field));
    let provider: Box<dyn VersionResolver> = match source {
        "github_releases" => {
            let repo = section
                .github_repo
                .as_deref()
                .or_else(|| from_steps("github_releases"))
                .ok_or_else(|| missing("github_repo"))?;
            Box::new(GitHubReleases::new(repo, section.tag_prefix.as_deref()))
        }
        "crates_io" => {
            let name = section
                .crate_name
                .as_deref()
                .or_else(|| from_steps("crates_io"))
                .unwrap_or(recipe.name());
            Box::new(CratesIo::new(name)?)
        }
        "npm" => {
            let name = section
                .npm_package
                .as_deref()
                .or_else(|| from_steps("npm"))
                .unwrap_or(recipe.name());
            Box::new(Npm::new(name)?)
        }
        "goproxy" => {
            let module = section
                .go_module
                .as_deref()
                .or_else(|| from_steps("goproxy"))
                .ok_or_else(|| missing("go_module"))?;
            Box::new(GoProxy::new(module)?)
        }
        "pinned" => {
            let version = section.pinned.as_deref().ok_or_else(|| missing("pinned"))?;
            Box::new(Pinned::new(version))
        }
        other => {
            return Err(Error::Validation(format!(
                "{}: unknown version source {:?} (expected github_releases, crates_io, npm, goproxy, pinned)",
                recipe.name(),
                other
            )))
        }
    };
    Ok(Some(provider))
}

/// `(source, upstream name)` from the first step naming a literal package.
fn inferred_from_steps(recipe: &Recipe) -> Option<(&'static str, String)> {
    recipe.steps.iter().find_map(|step| {
        let (source, key) = match step.action {
            ActionKind::GithubArchive | ActionKind::GithubFile => ("github_releases", "repo"),
            ActionKind::CargoInstall => ("crates_io", "crate"),
            ActionKind::NpmInstall => ("npm", "package"),
            ActionKind::GoInstall => ("goproxy", "module"),
            _ => return None,
        };
        let name = step.params.get(key)?.as_str()?;
        (!name.is_empty() && !name.contains('{')).then(|| (source, name.to_string()))
    })
}

// ============================================================================
// Version ordering
// ============================================================================

/// Strip `v`, `go`, and `name/v` style decorations from a tag.
pub fn normalize_version(tag: &str) -> String {
    let mut v = tag.rsplit('/').next().unwrap_or(tag);
    v = v.strip_prefix('v').unwrap_or(v);
    v = v.strip_prefix("go").unwrap_or(v);
    v.to_string()
}

/// Semver-ish comparison: numeric core, then a release sorts above its
/// prereleases. Build metadata is ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (normalize_version(a), normalize_version(b));
    let (core_a, pre_a) = split_prerelease(&a);
    let (core_b, pre_b) = split_prerelease(&b);
    let parts_a: Vec<&str> = core_a.split('.').collect();
    let parts_b: Vec<&str> = core_b.split('.').collect();
    for i in 0..parts_a.len().max(parts_b.len()) {
        let x = parts_a.get(i).map(|p| leading_number(p)).unwrap_or(0);
        let y = parts_b.get(i).map(|p| leading_number(p)).unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    match (pre_a, pre_b) {
        ("", "") => Ordering::Equal,
        ("", _) => Ordering::Greater,
        (_, "") => Ordering::Less,
        (x, y) => x.cmp(y),
    }
}

fn split_prerelease(v: &str) -> (&str, &str) {
    let v = v.split('+').next().unwrap_or(v);
    v.split_once('-').unwrap_or((v, ""))
}

fn leading_number(part: &str) -> u64 {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Sort newest first.
pub fn sort_newest_first(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(b, a));
}

/// Preview, alpha, beta, rc, and nightly builds are not "latest".
pub fn is_stable(version: &str) -> bool {
    let lower = version.to_ascii_lowercase();
    !["preview", "alpha", "beta", "rc", "dev", "snapshot", "nightly"]
        .iter()
        .any(|p| lower.contains(p))
}

/// Pick from `(tag, version)` pairs sorted newest first.
fn pick(releases: &[VersionInfo], requested: Option<&str>, source: &str) -> Result<VersionInfo, Error> {
    let found = match requested {
        None => releases
            .iter()
            .find(|r| is_stable(&r.version))
            .or_else(|| releases.first()),
        Some(req) => {
            let req = req.strip_prefix('v').unwrap_or(req);
            let dotted = format!("{}.", req);
            releases
                .iter()
                .find(|r| r.version == req)
                .or_else(|| releases.iter().find(|r| r.version.starts_with(&dotted)))
        }
    };
    found.cloned().ok_or_else(|| Error::VersionNotFound {
        tool: source.to_string(),
        version: requested.unwrap_or("latest").to_string(),
        available: releases.iter().take(10).map(|r| r.version.clone()).collect(),
    })
}

// ============================================================================
// HTTP
// ============================================================================

fn fetch(url: &str, github: bool, what: &str) -> Result<ureq::Response, Error> {
    let mut request = ureq::get(url)
        .timeout(HTTP_TIMEOUT)
        .set("User-Agent", USER_AGENT);
    if github {
        request = request.set("Accept", "application/vnd.github+json");
        if let Some(token) = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()) {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
    }
    tracing::debug!(url, "fetching version list");
    request.call().map_err(|e| match e {
        ureq::Error::Status(404, _) | ureq::Error::Status(410, _) => Error::not_found("version source", what),
        ureq::Error::Status(403, _) | ureq::Error::Status(429, _) if github => Error::Network(
            "GitHub API rate limit exceeded; try again later or set GITHUB_TOKEN".to_string(),
        ),
        ureq::Error::Status(429, _) => Error::Network(format!("{}: rate limit exceeded; try again later", what)),
        other => Error::Network(format!("{}: {}", what, other)),
    })
}

fn get_json(url: &str, github: bool, what: &str) -> Result<serde_json::Value, Error> {
    fetch(url, github, what)?
        .into_json()
        .map_err(|e| Error::Network(format!("invalid response from {}: {}", what, e)))
}

fn get_text(url: &str, what: &str) -> Result<String, Error> {
    fetch(url, false, what)?
        .into_string()
        .map_err(|e| Error::Network(format!("invalid response from {}: {}", what, e)))
}

// ============================================================================
// Providers
// ============================================================================

/// Releases of a GitHub repository.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    repo: String,
    tag_prefix: Option<String>,
    api_base: String,
}

impl GitHubReleases {
    pub fn new(repo: &str, tag_prefix: Option<&str>) -> Self {
        Self {
            repo: repo.to_string(),
            tag_prefix: tag_prefix.filter(|p| !p.is_empty()).map(str::to_string),
            api_base: GITHUB_API.to_string(),
        }
    }

    fn releases(&self, cancel: &CancelToken) -> Result<Vec<VersionInfo>, Error> {
        cancel.check()?;
        let url = format!("{}/repos/{}/releases?per_page=100", self.api_base, self.repo);
        let body = get_json(&url, true, &self.repo)?;
        cancel.check()?;
        Ok(releases_from_github(&body, self.tag_prefix.as_deref()))
    }
}

/// Tags of non-draft releases, prefix-filtered, newest first.
pub fn releases_from_github(body: &serde_json::Value, tag_prefix: Option<&str>) -> Vec<VersionInfo> {
    let mut releases: Vec<VersionInfo> = body
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|r| !r.get("draft").and_then(serde_json::Value::as_bool).unwrap_or(false))
        .filter_map(|r| r.get("tag_name").and_then(serde_json::Value::as_str))
        .filter_map(|tag| match tag_prefix {
            Some(prefix) => tag.strip_prefix(prefix).map(|v| VersionInfo::new(tag, v)),
            None => Some(VersionInfo::new(tag, &normalize_version(tag))),
        })
        .collect();
    releases.sort_by(|a, b| compare_versions(&b.version, &a.version));
    releases
}

impl VersionResolver for GitHubReleases {
    fn resolve_latest(&self, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        pick(&self.releases(cancel)?, None, &self.source_description())
    }

    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        pick(&self.releases(cancel)?, Some(requested), &self.source_description())
    }

    fn source_description(&self) -> String {
        match self.tag_prefix {
            Some(ref prefix) => format!("GitHub:{} (prefix {})", self.repo, prefix),
            None => format!("GitHub:{}", self.repo),
        }
    }

    fn as_lister(&self) -> Option<&dyn VersionLister> {
        Some(self)
    }
}

impl VersionLister for GitHubReleases {
    fn list_versions(&self, cancel: &CancelToken) -> Result<Vec<String>, Error> {
        Ok(self.releases(cancel)?.into_iter().map(|r| r.version).collect())
    }
}

/// Letter first, then alphanumerics, `-`, `_`; at most 64 characters.
fn is_valid_crate_name(name: &str) -> bool {
    let mut chars = name.chars();
    name.len() <= 64
        && matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Published, non-yanked versions of a crate.
#[derive(Debug, Clone)]
pub struct CratesIo {
    name: String,
    api_base: String,
}

impl CratesIo {
    pub fn new(name: &str) -> Result<Self, Error> {
        if !is_valid_crate_name(name) {
            return Err(Error::Validation(format!("invalid crate name {:?}", name)));
        }
        Ok(Self {
            name: name.to_string(),
            api_base: CRATES_IO_API.to_string(),
        })
    }

    fn releases(&self, cancel: &CancelToken) -> Result<Vec<VersionInfo>, Error> {
        cancel.check()?;
        let url = format!("{}/api/v1/crates/{}/versions", self.api_base, self.name);
        let body = get_json(&url, false, &self.name)?;
        cancel.check()?;
        Ok(versions_from_crates_io(&body)
            .into_iter()
            .map(|v| VersionInfo::new(&v, &v))
            .collect())
    }
}

/// Non-yanked version numbers, newest first.
pub fn versions_from_crates_io(body: &serde_json::Value) -> Vec<String> {
    let mut versions: Vec<String> = body
        .get("versions")
        .and_then(serde_json::Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|v| !v.get("yanked").and_then(serde_json::Value::as_bool).unwrap_or(false))
        .filter_map(|v| v.get("num").and_then(serde_json::Value::as_str))
        .map(str::to_string)
        .collect();
    sort_newest_first(&mut versions);
    versions
}

impl VersionResolver for CratesIo {
    fn resolve_latest(&self, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        pick(&self.releases(cancel)?, None, &self.source_description())
    }

    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        pick(&self.releases(cancel)?, Some(requested), &self.source_description())
    }

    fn source_description(&self) -> String {
        format!("crates.io:{}", self.name)
    }

    fn as_lister(&self) -> Option<&dyn VersionLister> {
        Some(self)
    }
}

impl VersionLister for CratesIo {
    fn list_versions(&self, cancel: &CancelToken) -> Result<Vec<String>, Error> {
        Ok(self.releases(cancel)?.into_iter().map(|r| r.version).collect())
    }
}

/// Lowercase name, optionally `@scope/`-qualified; at most 214 characters.
fn is_valid_npm_name(name: &str) -> bool {
    fn part_ok(part: &str) -> bool {
        let first_last_ok = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        part.chars().next().is_some_and(first_last_ok)
            && part.chars().last().is_some_and(first_last_ok)
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    }
    if name.is_empty() || name.len() > 214 {
        return false;
    }
    match name.strip_prefix('@') {
        Some(scoped) => matches!(scoped.split_once('/'), Some((scope, pkg)) if part_ok(scope) && part_ok(pkg)),
        None => part_ok(name),
    }
}

/// Published versions of an npm package.
#[derive(Debug, Clone)]
pub struct Npm {
    package: String,
    registry: String,
}

impl Npm {
    pub fn new(package: &str) -> Result<Self, Error> {
        if !is_valid_npm_name(package) {
            return Err(Error::Validation(format!("invalid npm package name {:?}", package)));
        }
        Ok(Self {
            package: package.to_string(),
            registry: NPM_REGISTRY.to_string(),
        })
    }

    fn document(&self, cancel: &CancelToken) -> Result<serde_json::Value, Error> {
        cancel.check()?;
        // the registry expects `@scope%2Fname`
        let url = format!("{}/{}", self.registry, self.package.replacen('/', "%2F", 1));
        let body = get_json(&url, false, &self.package)?;
        cancel.check()?;
        Ok(body)
    }

    fn releases(&self, cancel: &CancelToken) -> Result<Vec<VersionInfo>, Error> {
        Ok(versions_from_npm(&self.document(cancel)?)
            .into_iter()
            .map(|v| VersionInfo::new(&v, &v))
            .collect())
    }
}

/// Non-deprecated versions from a registry document, newest first.
pub fn versions_from_npm(body: &serde_json::Value) -> Vec<String> {
    let mut versions: Vec<String> = body
        .get("versions")
        .and_then(serde_json::Value::as_object)
        .map(|versions| {
            versions
                .iter()
                .filter(|(_, meta)| meta.get("deprecated").is_none())
                .map(|(v, _)| v.clone())
                .collect()
        })
        .unwrap_or_default();
    sort_newest_first(&mut versions);
    versions
}

/// The registry's own `latest` dist-tag.
pub fn latest_from_npm(body: &serde_json::Value) -> Option<String> {
    body.pointer("/dist-tags/latest")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

impl VersionResolver for Npm {
    fn resolve_latest(&self, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        let body = self.document(cancel)?;
        match latest_from_npm(&body) {
            Some(latest) => Ok(VersionInfo::new(&latest, &latest)),
            None => {
                let releases: Vec<_> = versions_from_npm(&body).iter().map(|v| VersionInfo::new(v, v)).collect();
                pick(&releases, None, &self.source_description())
            }
        }
    }

    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        pick(&self.releases(cancel)?, Some(requested), &self.source_description())
    }

    fn source_description(&self) -> String {
        format!("npm:{}", self.package)
    }

    fn as_lister(&self) -> Option<&dyn VersionLister> {
        Some(self)
    }
}

impl VersionLister for Npm {
    fn list_versions(&self, cancel: &CancelToken) -> Result<Vec<String>, Error> {
        Ok(self.releases(cancel)?.into_iter().map(|r| r.version).collect())
    }
}

/// Case-encode a module path for the Go module proxy: `A` becomes `!a`.
pub fn escape_module_path(module: &str) -> String {
    let mut out = String::with_capacity(module.len());
    for c in module.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Tagged versions of a Go module, via the module proxy.
#[derive(Debug, Clone)]
pub struct GoProxy {
    module: String,
    proxy: String,
}

impl GoProxy {
    pub fn new(module: &str) -> Result<Self, Error> {
        let valid = !module.is_empty()
            && !module.starts_with('/')
            && !module.ends_with('/')
            && !module.split('/').any(|part| part.is_empty() || part == "." || part == "..")
            && module
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '~' | '/'));
        if !valid {
            return Err(Error::Validation(format!("invalid Go module path {:?}", module)));
        }
        Ok(Self {
            module: module.to_string(),
            proxy: GO_PROXY.to_string(),
        })
    }

    fn base(&self) -> String {
        format!("{}/{}", self.proxy, escape_module_path(&self.module))
    }

    fn releases(&self, cancel: &CancelToken) -> Result<Vec<VersionInfo>, Error> {
        cancel.check()?;
        let body = get_text(&format!("{}/@v/list", self.base()), &self.module)?;
        cancel.check()?;
        Ok(releases_from_goproxy(&body))
    }
}

/// One `vX.Y.Z` tag per line; the tag is kept, the version drops the `v`.
pub fn releases_from_goproxy(body: &str) -> Vec<VersionInfo> {
    let mut releases: Vec<VersionInfo> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|tag| VersionInfo::new(tag, &normalize_version(tag)))
        .collect();
    releases.sort_by(|a, b| compare_versions(&b.version, &a.version));
    releases
}

impl VersionResolver for GoProxy {
    fn resolve_latest(&self, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        let releases = self.releases(cancel)?;
        if !releases.is_empty() {
            return pick(&releases, None, &self.source_description());
        }
        // untagged modules only have a pseudo-version under @latest
        let body = get_json(&format!("{}/@latest", self.base()), false, &self.module)?;
        let tag = body
            .get("Version")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::Network(format!("invalid response from {}: missing Version", self.module)))?;
        Ok(VersionInfo::new(tag, &normalize_version(tag)))
    }

    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        pick(&self.releases(cancel)?, Some(requested), &self.source_description())
    }

    fn source_description(&self) -> String {
        format!("goproxy:{}", self.module)
    }

    fn as_lister(&self) -> Option<&dyn VersionLister> {
        Some(self)
    }
}

impl VersionLister for GoProxy {
    fn list_versions(&self, cancel: &CancelToken) -> Result<Vec<String>, Error> {
        Ok(self.releases(cancel)?.into_iter().map(|r| r.version).collect())
    }
}

/// A single fixed version. Resolves, cannot list.
#[derive(Debug, Clone)]
pub struct Pinned {
    version: String,
}

impl Pinned {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }
}

impl VersionResolver for Pinned {
    fn resolve_latest(&self, _cancel: &CancelToken) -> Result<VersionInfo, Error> {
        Ok(VersionInfo::new(&self.version, &normalize_version(&self.version)))
    }

    fn resolve_version(&self, requested: &str, cancel: &CancelToken) -> Result<VersionInfo, Error> {
        let pinned = self.resolve_latest(cancel)?;
        if requested == pinned.version || requested == pinned.tag {
            Ok(pinned)
        } else {
            Err(Error::VersionNotFound {
                tool: self.source_description(),
                version: requested.to_string(),
                available: vec![pinned.version],
            })
        }
    }

    fn source_description(&self) -> String {
        format!("pinned:{}", self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_recipe;
    use serde_json::json;

    #[test]
    fn test_version_normalize() {
        assert_eq!(normalize_version("v1.2.3"), "1.2.3");
        assert_eq!(normalize_version("go1.21.5"), "1.21.5");
        assert_eq!(normalize_version("kustomize/v5.7.1"), "5.7.1");
        assert_eq!(normalize_version("1.0"), "1.0");
    }

    #[test]
    fn test_version_compare() {
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("v1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0", "1.0.0-rc.1"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0+build.5", "1.0.0"), Ordering::Equal);
        let mut v = vec!["1.6".to_string(), "1.7.1".into(), "1.7.0".into(), "1.7.1-rc1".into()];
        sort_newest_first(&mut v);
        assert_eq!(v, vec!["1.7.1", "1.7.1-rc1", "1.7.0", "1.6"]);
    }

    #[test]
    fn test_version_github_releases_parsing() {
        let body = json!([
            {"tag_name": "jq-1.7.1", "draft": false},
            {"tag_name": "jq-1.8.0rc1", "draft": false},
            {"tag_name": "jq-1.9.0", "draft": true},
            {"tag_name": "other-2.0", "draft": false},
            {"tag_name": "jq-1.6", "draft": false}
        ]);
        let releases = releases_from_github(&body, Some("jq-"));
        let versions: Vec<_> = releases.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["1.8.0rc1", "1.7.1", "1.6"]);
        assert_eq!(releases[1].tag, "jq-1.7.1");

        let latest = pick(&releases, None, "GitHub:jqlang/jq").unwrap();
        assert_eq!(latest, VersionInfo::new("jq-1.7.1", "1.7.1"));
    }

    #[test]
    fn test_version_github_without_prefix_keeps_tag() {
        let body = json!([{"tag_name": "v14.1.0"}, {"tag_name": "v14.0.3"}]);
        let releases = releases_from_github(&body, None);
        assert_eq!(releases[0], VersionInfo::new("v14.1.0", "14.1.0"));
        assert_eq!(pick(&releases, Some("v14.0.3"), "x").unwrap().tag, "v14.0.3");
    }

    #[test]
    fn test_version_pick_fuzzy_and_missing() {
        let releases: Vec<_> = ["1.29.3", "1.29.2", "1.2.9"]
            .iter()
            .map(|v| VersionInfo::new(v, v))
            .collect();
        assert_eq!(pick(&releases, Some("1.29"), "s").unwrap().version, "1.29.3");
        assert_eq!(pick(&releases, Some("1.2"), "s").unwrap().version, "1.2.9");
        match pick(&releases, Some("2.0"), "s") {
            Err(Error::VersionNotFound { version, available, .. }) => {
                assert_eq!(version, "2.0");
                assert_eq!(available.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_crates_io_parsing() {
        let body = json!({"versions": [
            {"num": "14.0.0", "yanked": false},
            {"num": "14.1.0", "yanked": false},
            {"num": "14.1.1", "yanked": true}
        ]});
        assert_eq!(versions_from_crates_io(&body), vec!["14.1.0", "14.0.0"]);
        assert!(versions_from_crates_io(&json!({})).is_empty());
    }

    #[test]
    fn test_version_crate_name_validation() {
        assert!(CratesIo::new("ripgrep").is_ok());
        assert!(CratesIo::new("cargo-nextest").is_ok());
        assert!(CratesIo::new("1bad").is_err());
        assert!(CratesIo::new("bad/name").is_err());
        assert!(CratesIo::new(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_version_pinned_cannot_list() {
        let cancel = CancelToken::new();
        let p = Pinned::new("v2.1.0");
        assert!(p.as_lister().is_none());
        assert_eq!(p.resolve_latest(&cancel).unwrap(), VersionInfo::new("v2.1.0", "2.1.0"));
        assert!(p.resolve_version("2.1.0", &cancel).is_ok());
        assert!(p.resolve_version("2.0.0", &cancel).is_err());
    }

    #[test]
    fn test_version_provider_for_recipe() {
        let cancel = CancelToken::new();
        let r = parse_recipe("[metadata]\nname = \"jq\"\n[version]\ngithub_repo = \"jqlang/jq\"\ntag_prefix = \"jq-\"\n").unwrap();
        let p = provider_for(&r).unwrap().unwrap();
        assert_eq!(p.source_description(), "GitHub:jqlang/jq (prefix jq-)");
        assert!(p.as_lister().is_some());

        let r = parse_recipe("[metadata]\nname = \"rg\"\n[version]\nsource = \"crates_io\"\ncrate_name = \"ripgrep\"\n").unwrap();
        assert_eq!(provider_for(&r).unwrap().unwrap().source_description(), "crates.io:ripgrep");

        let r = parse_recipe("[metadata]\nname = \"x\"\n[version]\nsource = \"svn\"\n").unwrap();
        assert!(provider_for(&r).is_err());

        let r = parse_recipe("[metadata]\nname = \"local\"\n").unwrap();
        assert!(provider_for(&r).unwrap().is_none());
        assert_eq!(RecipeVersions.resolve(&r, None, &cancel).unwrap().version, "dev");
    }

    #[test]
    fn test_version_source_inferred_from_steps() {
        let r = parse_recipe(
            "[metadata]\nname = \"rg\"\n[[steps]]\naction = \"github_file\"\nrepo = \"BurntSushi/ripgrep\"\nasset_pattern = \"rg-{version}\"\nbinary = \"rg\"\n",
        )
        .unwrap();
        let p = provider_for(&r).unwrap().unwrap();
        assert_eq!(p.source_description(), "GitHub:BurntSushi/ripgrep");

        let r = parse_recipe("[metadata]\nname = \"nextest\"\n[[steps]]\naction = \"cargo_install\"\ncrate = \"cargo-nextest\"\n").unwrap();
        assert_eq!(provider_for(&r).unwrap().unwrap().source_description(), "crates.io:cargo-nextest");

        let r = parse_recipe("[metadata]\nname = \"tsc\"\n[[steps]]\naction = \"npm_install\"\npackage = \"typescript\"\n").unwrap();
        assert_eq!(provider_for(&r).unwrap().unwrap().source_description(), "npm:typescript");

        let r = parse_recipe("[metadata]\nname = \"gopls\"\n[[steps]]\naction = \"go_install\"\nmodule = \"golang.org/x/tools/gopls\"\n").unwrap();
        let p = provider_for(&r).unwrap().unwrap();
        assert_eq!(p.source_description(), "goproxy:golang.org/x/tools/gopls");
        assert!(p.as_lister().is_some());
    }

    #[test]
    fn test_version_explicit_source_beats_steps() {
        let r = parse_recipe(
            "[metadata]\nname = \"rg\"\n[version]\npinned = \"14.0.0\"\n[[steps]]\naction = \"cargo_install\"\ncrate = \"ripgrep\"\n",
        )
        .unwrap();
        assert_eq!(provider_for(&r).unwrap().unwrap().source_description(), "pinned:14.0.0");

        let r = parse_recipe(
            "[metadata]\nname = \"rg\"\n[version]\nsource = \"crates_io\"\n[[steps]]\naction = \"cargo_install\"\ncrate = \"ripgrep\"\n",
        )
        .unwrap();
        assert_eq!(provider_for(&r).unwrap().unwrap().source_description(), "crates.io:ripgrep");
    }

    #[test]
    fn test_version_npm_parsing() {
        let body = json!({
            "dist-tags": {"latest": "5.4.5", "next": "5.5.0-beta"},
            "versions": {
                "5.4.5": {},
                "5.5.0-beta": {},
                "4.9.5": {},
                "0.8.0": {"deprecated": "too old"}
            }
        });
        assert_eq!(versions_from_npm(&body), vec!["5.5.0-beta", "5.4.5", "4.9.5"]);
        assert_eq!(latest_from_npm(&body).as_deref(), Some("5.4.5"));
        assert!(latest_from_npm(&json!({})).is_none());
    }

    #[test]
    fn test_version_npm_name_validation() {
        assert!(Npm::new("typescript").is_ok());
        assert!(Npm::new("@aws-amplify/cli").is_ok());
        assert!(Npm::new("@scope/my-package.name").is_ok());
        assert!(Npm::new("TypeScript").is_err());
        assert!(Npm::new("@scope/").is_err());
        assert!(Npm::new("@scope1/@scope2/pkg").is_err());
        assert!(Npm::new("my@package").is_err());
    }

    #[test]
    fn test_version_goproxy_parsing() {
        let releases = releases_from_goproxy("v1.64.7\nv1.64.8\n\nv1.65.0-rc.1\nv1.9.0\n");
        let versions: Vec<_> = releases.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["1.65.0-rc.1", "1.64.8", "1.64.7", "1.9.0"]);
        let latest = pick(&releases, None, "goproxy:x").unwrap();
        assert_eq!(latest, VersionInfo::new("v1.64.8", "1.64.8"));
        assert_eq!(pick(&releases, Some("1.64.7"), "s").unwrap().tag, "v1.64.7");
        assert!(releases_from_goproxy("").is_empty());
    }

    #[test]
    fn test_version_goproxy_module_paths() {
        assert_eq!(escape_module_path("github.com/User/Repo"), "github.com/!user/!repo");
        assert!(GoProxy::new("golang.org/x/tools/gopls").is_ok());
        assert!(GoProxy::new("../etc/passwd").is_err());
        assert!(GoProxy::new("github.com/a b/c").is_err());
        assert!(GoProxy::new("").is_err());
    }

    #[test]
    fn test_version_recipe_versions_names_the_tool() {
        let cancel = CancelToken::new();
        let r = parse_recipe("[metadata]\nname = \"tool\"\n[version]\npinned = \"1.0\"\n").unwrap();
        assert_eq!(RecipeVersions.resolve(&r, Some("latest"), &cancel).unwrap().version, "1.0");
        match RecipeVersions.resolve(&r, Some("2.0"), &cancel) {
            Err(Error::VersionNotFound { tool, .. }) => assert_eq!(tool, "tool"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_cancelled_before_network() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let gh = GitHubReleases::new("jqlang/jq", None);
        assert!(matches!(gh.list_versions(&cancel), Err(Error::Cancelled)));
    }
}
