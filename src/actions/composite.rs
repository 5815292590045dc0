//! FR-011: Composite actions — compile-time decomposition into primitives.
//!
//! Composites never reach a plan. Each one expands into the primitive steps
//! that implement it, with URLs, checksums, and toolchain paths resolved.

use super::{optional_str, require_str, str_list, ActionKind};
use crate::core::cancel::CancelToken;
use crate::core::download::{file_name_for, DownloadCache, Downloader};
use crate::core::error::Error;
use crate::core::types::{ParamValue, Params, ResolvedStep, VersionInfo};
use crate::tripwire::hasher;
use std::path::Path;

/// Inputs a decomposition may need beyond the step's own parameters.
pub struct DecomposeContext<'a> {
    pub version: &'a VersionInfo,
    pub downloader: Option<&'a dyn Downloader>,
    pub download_cache: Option<&'a DownloadCache>,
    /// Install directory of the step's eval-time dependency, when it has one.
    pub toolchain_dir: Option<&'a Path>,
    pub cancel: &'a CancelToken,
}

/// `https://github.com/<repo>/releases/download/<tag>/<asset>`
pub fn github_release_url(repo: &str, tag: &str, asset: &str) -> String {
    format!("https://github.com/{}/releases/download/{}/{}", repo, tag, asset)
}

/// Archive format implied by a file name.
pub fn archive_format_for(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some("tar.gz")
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
        Some("tar.bz2")
    } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
        Some("tar.zst")
    } else if lower.ends_with(".tar") {
        Some("tar")
    } else if lower.ends_with(".zip") {
        Some("zip")
    } else {
        None
    }
}

/// Expand a composite step. Non-composite kinds are rejected.
pub fn decompose(kind: ActionKind, params: &Params, ctx: &DecomposeContext<'_>) -> Result<Vec<ResolvedStep>, Error> {
    ctx.cancel.check()?;
    match kind {
        ActionKind::Download => {
            let url = require_str(kind, params, "url")?;
            let dest = match optional_str(kind, params, "dest")? {
                Some(d) => d.to_string(),
                None => file_name_for(url),
            };
            Ok(vec![download_step(kind, url, &dest, params, ctx)?])
        }
        ActionKind::DownloadArchive => {
            let url = require_str(kind, params, "url")?.to_string();
            archive_steps(kind, &url, params, ctx)
        }
        ActionKind::GithubArchive => {
            let url = github_url(kind, params, ctx)?;
            archive_steps(kind, &url, params, ctx)
        }
        ActionKind::GithubFile => {
            let url = github_url(kind, params, ctx)?;
            let binary = require_str(kind, params, "binary")?;
            let name = Path::new(binary)
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::malformed(kind.name(), "binary", "must name a file"))?;
            Ok(vec![
                download_step(kind, &url, name, params, ctx)?,
                primitive(ActionKind::Chmod, [("files", list([name]))]),
                primitive(ActionKind::InstallBinaries, [("binaries", list([name]))]),
            ])
        }
        ActionKind::CargoInstall => ecosystem_step(kind, ActionKind::CargoBuild, "crate", params, ctx),
        ActionKind::GoInstall => ecosystem_step(kind, ActionKind::GoBuild, "module", params, ctx),
        ActionKind::NpmInstall => ecosystem_step(kind, ActionKind::NpmExec, "package", params, ctx),
        other => Err(Error::Validation(format!("{} is not a composite action", other))),
    }
}

fn github_url(kind: ActionKind, params: &Params, ctx: &DecomposeContext<'_>) -> Result<String, Error> {
    let repo = require_str(kind, params, "repo")?;
    if repo.split('/').count() != 2 || repo.split('/').any(str::is_empty) {
        return Err(Error::malformed(kind.name(), "repo", "expected owner/name"));
    }
    let asset = require_str(kind, params, "asset_pattern")?;
    Ok(github_release_url(repo, &ctx.version.tag, asset))
}

fn archive_steps(kind: ActionKind, url: &str, params: &Params, ctx: &DecomposeContext<'_>) -> Result<Vec<ResolvedStep>, Error> {
    let archive = file_name_for(url);
    let format = match optional_str(kind, params, "archive_format")? {
        Some(f) => f.to_string(),
        None => archive_format_for(&archive)
            .ok_or_else(|| {
                Error::malformed(kind.name(), "archive_format", format!("cannot infer format of {}", archive))
            })?
            .to_string(),
    };
    let strip_dirs = match params.get("strip_dirs") {
        None => 0,
        Some(ParamValue::Literal(v)) => v
            .as_u64()
            .ok_or_else(|| Error::malformed(kind.name(), "strip_dirs", "expected a non-negative integer"))?,
        Some(_) => return Err(Error::malformed(kind.name(), "strip_dirs", "expected a non-negative integer")),
    };
    let binaries = str_list(kind, params, "binaries")?;
    if binaries.is_empty() {
        return Err(Error::malformed(kind.name(), "binaries", "at least one binary is required"));
    }

    let mut extract = Params::new();
    extract.insert("archive".into(), ParamValue::literal(archive.as_str()));
    extract.insert("format".into(), ParamValue::literal(format));
    extract.insert("strip_dirs".into(), ParamValue::literal(strip_dirs));

    Ok(vec![
        download_step(kind, url, &archive, params, ctx)?,
        ResolvedStep::new(ActionKind::Extract, extract),
        primitive(ActionKind::Chmod, [("files", list(binaries.iter().map(String::as_str)))]),
        primitive(
            ActionKind::InstallBinaries,
            [("binaries", list(binaries.iter().map(String::as_str)))],
        ),
    ])
}

/// A `download_file` step, with checksum and size filled in when a
/// downloader is available.
fn download_step(kind: ActionKind, url: &str, dest: &str, params: &Params, ctx: &DecomposeContext<'_>) -> Result<ResolvedStep, Error> {
    let declared = optional_str(kind, params, "checksum")?;
    let mut step = primitive(
        ActionKind::DownloadFile,
        [("url", ParamValue::literal(url)), ("dest", ParamValue::literal(dest))],
    );

    match ctx.downloader {
        Some(downloader) => {
            let fetched = downloader.download(url, ctx.cancel)?;
            if let Some(expected) = declared {
                if !hasher::checksum_matches(expected, &fetched.checksum) {
                    return Err(Error::malformed(
                        kind.name(),
                        "checksum",
                        format!("expected {} but {} hashes to {}", expected, url, fetched.checksum),
                    ));
                }
            }
            if let Some(cache) = ctx.download_cache {
                cache.save(url, &fetched.path, &fetched.checksum, fetched.size)?;
            }
            step.checksum = Some(fetched.checksum);
            step.size = Some(fetched.size);
        }
        None => {
            step.checksum = declared.map(|c| c.trim_start_matches("sha256:").to_ascii_lowercase());
        }
    }
    Ok(step)
}

fn ecosystem_step(
    kind: ActionKind,
    primitive_kind: ActionKind,
    source_key: &str,
    params: &Params,
    ctx: &DecomposeContext<'_>,
) -> Result<Vec<ResolvedStep>, Error> {
    let source = require_str(kind, params, source_key)?;
    let toolchain = ctx
        .toolchain_dir
        .ok_or_else(|| Error::EvalDepsRequired(kind.eval_deps().iter().map(|d| d.to_string()).collect()))?;
    let version = optional_str(kind, params, "version")?.unwrap_or(ctx.version.version.as_str());
    let mut executables = str_list(kind, params, "executables")?;
    if executables.is_empty() {
        executables.push(source.rsplit('/').next().unwrap_or(source).to_string());
    }

    let mut out = Params::new();
    out.insert(source_key.into(), ParamValue::literal(source));
    out.insert("version".into(), ParamValue::literal(version));
    out.insert("executables".into(), list(executables.iter().map(String::as_str)));
    out.insert("toolchain_dir".into(), ParamValue::literal(toolchain.display().to_string()));
    Ok(vec![ResolvedStep::new(primitive_kind, out)])
}

fn primitive<const N: usize>(kind: ActionKind, pairs: [(&str, ParamValue); N]) -> ResolvedStep {
    ResolvedStep::new(
        kind,
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    )
}

fn list<'a>(items: impl IntoIterator<Item = &'a str>) -> ParamValue {
    ParamValue::List(items.into_iter().map(ParamValue::literal).collect())
}
