//! FR-012: Primitive actions — applied by the executor, one step at a time.
//!
//! Deferred parameters are evaluated first, so every handler sees plain JSON
//! values. Relative paths resolve against the scratch work directory.

use super::ActionKind;
use crate::core::cancel::CancelToken;
use crate::core::download::{DownloadCache, Downloader};
use crate::core::error::Error;
use crate::core::resolver::{self, Vars};
use crate::core::types::ResolvedStep;
use crate::transport::{self, local, shell_quote, ExecOptions};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Where and with what a primitive runs.
pub struct ExecContext<'a> {
    pub install_dir: &'a Path,
    pub work_dir: &'a Path,
    pub vars: &'a Vars,
    pub downloader: &'a dyn Downloader,
    pub download_cache: Option<&'a DownloadCache>,
    pub cancel: &'a CancelToken,
}

type Args = IndexMap<String, Value>;

/// Apply one primitive step.
pub fn execute(step: &ResolvedStep, ctx: &ExecContext<'_>) -> Result<(), Error> {
    ctx.cancel.check()?;
    let kind = step.action;
    let args = resolver::evaluate_params(kind.name(), &step.params, ctx.vars)?;
    tracing::debug!(action = kind.name(), "applying step");
    match kind {
        ActionKind::DownloadFile => download_file(step, &args, ctx),
        ActionKind::Extract => extract(&args, ctx),
        ActionKind::Chmod => chmod(&args, ctx),
        ActionKind::InstallBinaries => install_binaries(&args, ctx),
        ActionKind::SetEnv => set_env(&args, ctx),
        ActionKind::ApplyPatch => apply_patch(&args, ctx),
        ActionKind::RunCommand => run_command(&args, ctx),
        ActionKind::CargoBuild => {
            let krate = arg_str(kind, &args, "crate")?;
            let version = arg_str(kind, &args, "version")?;
            let script = format!(
                "set -euo pipefail\ncargo install --locked --root {} --version {} {}",
                shell_quote(&ctx.install_dir.display().to_string()),
                shell_quote(version),
                shell_quote(krate)
            );
            ecosystem_build(kind, &args, &script, ctx)
        }
        ActionKind::GoBuild => {
            let module = arg_str(kind, &args, "module")?;
            let version = arg_str(kind, &args, "version")?;
            let tag = if version.starts_with('v') || version == "latest" {
                version.to_string()
            } else {
                format!("v{}", version)
            };
            let script = format!(
                "set -euo pipefail\nexport GOBIN={}\nexport GOPATH={}\ngo install {}@{}",
                shell_quote(&ctx.install_dir.join("bin").display().to_string()),
                shell_quote(&ctx.work_dir.join("gopath").display().to_string()),
                shell_quote(module),
                shell_quote(&tag)
            );
            ecosystem_build(kind, &args, &script, ctx)
        }
        ActionKind::NpmExec => {
            let package = arg_str(kind, &args, "package")?;
            let version = arg_str(kind, &args, "version")?;
            let script = format!(
                "set -euo pipefail\nnpm install -g --prefix {} {}",
                shell_quote(&ctx.install_dir.display().to_string()),
                shell_quote(&format!("{}@{}", package, version))
            );
            ecosystem_build(kind, &args, &script, ctx)
        }
        other => Err(Error::execution(
            other.name(),
            "not a primitive action; plans may only execute primitives",
        )),
    }
}

// ============================================================================
// Argument access
// ============================================================================

fn arg_str<'a>(kind: ActionKind, args: &'a Args, key: &str) -> Result<&'a str, Error> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed(kind.name(), key, "expected a string"))
}

fn arg_list(kind: ActionKind, args: &Args, key: &str) -> Result<Vec<String>, Error> {
    match args.get(key) {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::malformed(kind.name(), key, "expected a list of strings"))
            })
            .collect(),
        Some(_) => Err(Error::malformed(kind.name(), key, "expected a string or list of strings")),
    }
}

fn arg_u32(kind: ActionKind, args: &Args, key: &str, default: u32) -> Result<u32, Error> {
    match args.get(key) {
        None => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::malformed(kind.name(), key, "expected a non-negative integer")),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| Error::malformed(kind.name(), key, "expected a non-negative integer")),
        Some(_) => Err(Error::malformed(kind.name(), key, "expected a non-negative integer")),
    }
}

/// Resolve a step path against the work dir. `..` components are refused.
fn work_path(kind: ActionKind, key: &str, ctx: &ExecContext<'_>, raw: &str) -> Result<PathBuf, Error> {
    let path = Path::new(raw);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::malformed(kind.name(), key, format!("path {:?} escapes the work directory", raw)));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(ctx.work_dir.join(path))
    }
}

fn io_err(kind: ActionKind, what: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::execution(kind.name(), format!("{} {}: {}", what, path.display(), e))
}

// ============================================================================
// File primitives
// ============================================================================

fn download_file(step: &ResolvedStep, args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::DownloadFile;
    let url = arg_str(kind, args, "url")?;
    let dest = work_path(kind, "dest", ctx, arg_str(kind, args, "dest")?)?;
    let expected = step
        .checksum
        .as_deref()
        .ok_or_else(|| Error::execution(kind.name(), format!("no checksum recorded for {}", url)))?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(kind, "cannot create dir", parent, e))?;
    }

    if let Some(hit) = ctx.download_cache.and_then(|c| c.lookup(url, expected)) {
        tracing::info!(url, "using cached artifact");
        std::fs::copy(&hit, &dest).map_err(|e| io_err(kind, "cannot copy to", &dest, e))?;
        return Ok(());
    }

    let fetched = ctx.downloader.download(url, ctx.cancel)?;
    if !hasher::checksum_matches(expected, &fetched.checksum) {
        return Err(Error::execution(
            kind.name(),
            format!("checksum mismatch for {}: expected {}, got {}", url, expected, fetched.checksum),
        ));
    }
    std::fs::copy(&fetched.path, &dest).map_err(|e| io_err(kind, "cannot copy to", &dest, e))?;
    if let Some(cache) = ctx.download_cache {
        if let Err(e) = cache.save(url, &fetched.path, &fetched.checksum, fetched.size) {
            tracing::warn!(url, error = %e, "cannot populate download cache");
        }
    }
    Ok(())
}

fn extract(args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::Extract;
    let archive = work_path(kind, "archive", ctx, arg_str(kind, args, "archive")?)?;
    let dest = match args.get("dest").and_then(Value::as_str) {
        Some(d) => work_path(kind, "dest", ctx, d)?,
        None => ctx.work_dir.to_path_buf(),
    };
    let strip = arg_u32(kind, args, "strip_dirs", 0)? as usize;
    let format = match args.get("format").and_then(Value::as_str) {
        Some(f) => f.to_string(),
        None => super::composite::archive_format_for(&archive.to_string_lossy())
            .ok_or_else(|| Error::malformed(kind.name(), "format", "cannot infer archive format"))?
            .to_string(),
    };
    std::fs::create_dir_all(&dest).map_err(|e| io_err(kind, "cannot create dir", &dest, e))?;
    let file = File::open(&archive).map_err(|e| io_err(kind, "cannot open", &archive, e))?;
    tracing::debug!(archive = %archive.display(), format, strip, "extracting");

    match format.as_str() {
        "tar.gz" | "tgz" => unpack_tar(flate2::read::GzDecoder::new(file), &dest, strip),
        "tar.bz2" => unpack_tar(bzip2::read::BzDecoder::new(file), &dest, strip),
        "tar.zst" => {
            let decoder = zstd::stream::read::Decoder::new(file)
                .map_err(|e| io_err(kind, "cannot read", &archive, e))?;
            unpack_tar(decoder, &dest, strip)
        }
        "tar" => unpack_tar(file, &dest, strip),
        "zip" => unpack_zip(file, &dest, strip),
        other => Err(Error::malformed(kind.name(), "format", format!("unsupported archive format {:?}", other))),
    }
}

/// Drop the first `strip` components. `None` when nothing remains or the
/// entry would land outside the destination.
fn stripped(path: &Path, strip: usize) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components().filter(|c| !matches!(c, Component::CurDir)).skip(strip) {
        match component {
            Component::Normal(part) => out.push(part),
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path, strip: usize) -> Result<(), Error> {
    let kind = ActionKind::Extract;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let entries = archive
        .entries()
        .map_err(|e| io_err(kind, "cannot read archive into", dest, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| io_err(kind, "corrupt archive entry in", dest, e))?;
        let path = entry
            .path()
            .map_err(|e| io_err(kind, "bad entry path in", dest, e))?
            .into_owned();
        let Some(rel) = stripped(&path, strip) else {
            continue;
        };
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(kind, "cannot create dir", parent, e))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| io_err(kind, "cannot unpack", &target, e))?;
    }
    Ok(())
}

fn unpack_zip(file: File, dest: &Path, strip: usize) -> Result<(), Error> {
    let kind = ActionKind::Extract;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| io_err(kind, "cannot read zip into", dest, e))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| io_err(kind, "corrupt zip entry in", dest, e))?;
        let Some(path) = entry.enclosed_name() else {
            continue;
        };
        let Some(rel) = stripped(&path, strip) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| io_err(kind, "cannot create dir", &target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(kind, "cannot create dir", parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| io_err(kind, "cannot create", &target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| io_err(kind, "cannot write", &target, e))?;
        if let Some(mode) = entry.unix_mode() {
            set_mode(&target, mode & 0o7777).map_err(|e| io_err(kind, "cannot chmod", &target, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn parse_mode(kind: ActionKind, args: &Args) -> Result<u32, Error> {
    match args.get("mode") {
        None => Ok(0o755),
        Some(Value::String(s)) => u32::from_str_radix(s.trim_start_matches("0o"), 8)
            .map_err(|_| Error::malformed(kind.name(), "mode", format!("invalid octal mode {:?}", s))),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::malformed(kind.name(), "mode", "invalid mode")),
        Some(_) => Err(Error::malformed(kind.name(), "mode", "invalid mode")),
    }
}

fn chmod(args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::Chmod;
    let mode = parse_mode(kind, args)?;
    for file in arg_list(kind, args, "files")? {
        let path = work_path(kind, "files", ctx, &file)?;
        set_mode(&path, mode).map_err(|e| io_err(kind, "cannot chmod", &path, e))?;
    }
    Ok(())
}

fn install_binaries(args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::InstallBinaries;
    let bin_dir = ctx.install_dir.join("bin");
    std::fs::create_dir_all(&bin_dir).map_err(|e| io_err(kind, "cannot create dir", &bin_dir, e))?;
    for binary in arg_list(kind, args, "binaries")? {
        let src = work_path(kind, "binaries", ctx, &binary)?;
        let name = src
            .file_name()
            .ok_or_else(|| Error::malformed(kind.name(), "binaries", format!("{:?} names no file", binary)))?;
        let dest = bin_dir.join(name);
        std::fs::copy(&src, &dest).map_err(|e| io_err(kind, "cannot install", &src, e))?;
        set_mode(&dest, 0o755).map_err(|e| io_err(kind, "cannot chmod", &dest, e))?;
    }
    Ok(())
}

fn set_env(args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::SetEnv;
    let vars = match args.get("vars") {
        Some(Value::Object(map)) => map,
        _ => return Err(Error::malformed(kind.name(), "vars", "expected a table of strings")),
    };
    let mut lines = String::new();
    for (key, value) in vars {
        let value = value
            .as_str()
            .ok_or_else(|| Error::malformed(kind.name(), "vars", format!("{} must be a string", key)))?;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::malformed(kind.name(), "vars", format!("invalid variable name {:?}", key)));
        }
        lines.push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }
    let path = ctx.install_dir.join("env.sh");
    std::fs::create_dir_all(ctx.install_dir).map_err(|e| io_err(kind, "cannot create dir", ctx.install_dir, e))?;
    let mut content = std::fs::read_to_string(&path).unwrap_or_default();
    content.push_str(&lines);
    std::fs::write(&path, content).map_err(|e| io_err(kind, "cannot write", &path, e))
}

// ============================================================================
// Shell primitives
// ============================================================================

fn shell_env(ctx: &ExecContext<'_>, cwd: PathBuf) -> ExecOptions {
    let mut opts = ExecOptions::in_dir(cwd);
    for (key, value) in ctx.vars {
        opts = opts.env(&key.to_ascii_uppercase(), value.clone());
    }
    opts
}

fn run(kind: ActionKind, script: &str, opts: &ExecOptions) -> Result<(), Error> {
    let out = local::exec_local_with(script, opts).map_err(|e| Error::execution(kind.name(), e))?;
    if out.success() {
        return Ok(());
    }
    let detail = out.stderr.trim();
    Err(Error::execution(
        kind.name(),
        format!(
            "exit code {}{}",
            out.exit_code,
            if detail.is_empty() { String::new() } else { format!(": {}", detail) }
        ),
    ))
}

fn apply_patch(args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::ApplyPatch;
    let strip = arg_u32(kind, args, "strip", 1)?;
    let patch_file = match (args.get("data").and_then(Value::as_str), args.get("file").and_then(Value::as_str)) {
        (Some(data), _) => {
            let path = ctx.work_dir.join(format!(".ferrule-patch-{}.diff", hasher::short_hash(data, 12)));
            std::fs::write(&path, data).map_err(|e| io_err(kind, "cannot write", &path, e))?;
            path
        }
        (None, Some(file)) => work_path(kind, "file", ctx, file)?,
        (None, None) => return Err(Error::malformed(kind.name(), "data", "either data or file is required")),
    };
    let cwd = match args.get("dir").and_then(Value::as_str) {
        Some(d) => work_path(kind, "dir", ctx, d)?,
        None => ctx.work_dir.to_path_buf(),
    };
    let script = format!(
        "set -euo pipefail\npatch -p{} --batch -i {}",
        strip,
        shell_quote(&patch_file.display().to_string())
    );
    run(kind, &script, &shell_env(ctx, cwd))
}

fn run_command(args: &Args, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let kind = ActionKind::RunCommand;
    let command = arg_str(kind, args, "command")?;
    let cwd = match args.get("cwd").and_then(Value::as_str) {
        Some(d) => work_path(kind, "cwd", ctx, d)?,
        None => ctx.work_dir.to_path_buf(),
    };
    run(kind, &format!("set -euo pipefail\n{}", command), &shell_env(ctx, cwd))
}

fn ecosystem_build(kind: ActionKind, args: &Args, script: &str, ctx: &ExecContext<'_>) -> Result<(), Error> {
    let toolchain = PathBuf::from(arg_str(kind, args, "toolchain_dir")?);
    let opts = shell_env(ctx, ctx.work_dir.to_path_buf()).env("PATH", transport::path_with(&toolchain.join("bin")));
    run(kind, script, &opts)?;
    for exe in arg_list(kind, args, "executables")? {
        let path = ctx.install_dir.join("bin").join(&exe);
        if !path.exists() {
            return Err(Error::execution(
                kind.name(),
                format!("build finished but {} was not produced", path.display()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::DownloadResult;
    use crate::core::types::{Deferred, ParamValue, Params};
    use std::io::Write;

    struct NoNetwork;

    impl Downloader for NoNetwork {
        fn download(&self, url: &str, _cancel: &CancelToken) -> Result<DownloadResult, Error> {
            Err(Error::Network(format!("offline: {}", url)))
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        install: PathBuf,
        work: PathBuf,
        vars: Vars,
        cancel: CancelToken,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let install = root.path().join("tools/demo-1.0");
            let work = root.path().join("work");
            std::fs::create_dir_all(&install).unwrap();
            std::fs::create_dir_all(&work).unwrap();
            let mut vars = Vars::new();
            vars.insert("install_dir".into(), install.display().to_string());
            vars.insert("work_dir".into(), work.display().to_string());
            Self {
                _root: root,
                install,
                work,
                vars,
                cancel: CancelToken::new(),
            }
        }

        fn ctx<'a>(&'a self, cache: Option<&'a DownloadCache>) -> ExecContext<'a> {
            ExecContext {
                install_dir: &self.install,
                work_dir: &self.work,
                vars: &self.vars,
                downloader: &NoNetwork,
                download_cache: cache,
                cancel: &self.cancel,
            }
        }
    }

    fn step(kind: ActionKind, pairs: &[(&str, ParamValue)]) -> ResolvedStep {
        let params: Params = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ResolvedStep::new(kind, params)
    }

    fn tar_gz_with(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_primitive_download_from_cache_offline() {
        let fx = Fixture::new();
        let cache = DownloadCache::new(&fx.work.join("../cache"));
        let src = fx.work.join("seed");
        std::fs::write(&src, "artifact").unwrap();
        let sum = hasher::sha256_string("artifact");
        cache.save("https://x/tool", &src, &sum, 8).unwrap();

        let mut s = step(
            ActionKind::DownloadFile,
            &[("url", ParamValue::literal("https://x/tool")), ("dest", ParamValue::literal("tool"))],
        );
        s.checksum = Some(sum);
        execute(&s, &fx.ctx(Some(&cache))).unwrap();
        assert_eq!(std::fs::read_to_string(fx.work.join("tool")).unwrap(), "artifact");
    }

    #[test]
    fn test_primitive_download_cache_miss_uses_downloader() {
        let fx = Fixture::new();
        let mut s = step(
            ActionKind::DownloadFile,
            &[("url", ParamValue::literal("https://x/tool")), ("dest", ParamValue::literal("tool"))],
        );
        s.checksum = Some(hasher::sha256_string("artifact"));
        assert!(matches!(execute(&s, &fx.ctx(None)), Err(Error::Network(_))));
    }

    #[test]
    fn test_primitive_download_requires_checksum() {
        let fx = Fixture::new();
        let s = step(
            ActionKind::DownloadFile,
            &[("url", ParamValue::literal("https://x/tool")), ("dest", ParamValue::literal("tool"))],
        );
        assert!(matches!(execute(&s, &fx.ctx(None)), Err(Error::Execution { .. })));
    }

    #[test]
    fn test_primitive_extract_tar_gz_strip() {
        let fx = Fixture::new();
        tar_gz_with(
            &fx.work.join("rg.tar.gz"),
            &[("ripgrep-14.1.0/rg", "#!/bin/sh\necho rg\n"), ("ripgrep-14.1.0/doc/README", "docs")],
        );
        let s = step(
            ActionKind::Extract,
            &[("archive", ParamValue::literal("rg.tar.gz")), ("strip_dirs", ParamValue::literal(1))],
        );
        execute(&s, &fx.ctx(None)).unwrap();
        assert!(fx.work.join("rg").exists());
        assert_eq!(std::fs::read_to_string(fx.work.join("doc/README")).unwrap(), "docs");
        assert!(!fx.work.join("ripgrep-14.1.0").exists());
    }

    #[test]
    fn test_primitive_extract_zip() {
        let fx = Fixture::new();
        let path = fx.work.join("tool.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("pkg/tool", zip::write::SimpleFileOptions::default().unix_permissions(0o755))
            .unwrap();
        writer.write_all(b"binary").unwrap();
        writer.finish().unwrap();

        let s = step(
            ActionKind::Extract,
            &[
                ("archive", ParamValue::literal("tool.zip")),
                ("format", ParamValue::literal("zip")),
                ("strip_dirs", ParamValue::literal(1)),
            ],
        );
        execute(&s, &fx.ctx(None)).unwrap();
        assert_eq!(std::fs::read_to_string(fx.work.join("tool")).unwrap(), "binary");
    }

    #[test]
    fn test_primitive_paths_cannot_escape() {
        let fx = Fixture::new();
        let s = step(ActionKind::Chmod, &[("files", ParamValue::literal("../outside"))]);
        assert!(matches!(execute(&s, &fx.ctx(None)), Err(Error::MalformedParam { .. })));
        assert_eq!(stripped(Path::new("a/../../b"), 0), None);
        assert_eq!(stripped(Path::new("./a/b"), 1), Some(PathBuf::from("b")));
        assert_eq!(stripped(Path::new("a"), 1), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_primitive_chmod_and_install_binaries() {
        use std::os::unix::fs::PermissionsExt;
        let fx = Fixture::new();
        std::fs::write(fx.work.join("jq"), "#!/bin/sh\n").unwrap();
        let chmod = step(
            ActionKind::Chmod,
            &[("files", ParamValue::List(vec![ParamValue::literal("jq")])), ("mode", ParamValue::literal("700"))],
        );
        execute(&chmod, &fx.ctx(None)).unwrap();
        let mode = std::fs::metadata(fx.work.join("jq")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let install = step(ActionKind::InstallBinaries, &[("binaries", ParamValue::literal("jq"))]);
        execute(&install, &fx.ctx(None)).unwrap();
        let installed = fx.install.join("bin/jq");
        let mode = std::fs::metadata(&installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_primitive_set_env_quotes_values() {
        let fx = Fixture::new();
        let mut vars = indexmap::IndexMap::new();
        vars.insert(
            "DEMO_HOME".to_string(),
            ParamValue::Deferred(Deferred { expr: "{install_dir}/share".into() }),
        );
        let s = step(ActionKind::SetEnv, &[("vars", ParamValue::Map(vars))]);
        assert!(s.evaluable);
        execute(&s, &fx.ctx(None)).unwrap();
        let env = std::fs::read_to_string(fx.install.join("env.sh")).unwrap();
        assert_eq!(env, format!("export DEMO_HOME={}/share\n", fx.install.display()));
    }

    #[test]
    fn test_primitive_run_command_sees_exec_vars() {
        let fx = Fixture::new();
        let s = step(
            ActionKind::RunCommand,
            &[(
                "command",
                ParamValue::Deferred(Deferred {
                    expr: "mkdir -p {install_dir}/share && echo \"$INSTALL_DIR\" > {install_dir}/share/where".into(),
                }),
            )],
        );
        execute(&s, &fx.ctx(None)).unwrap();
        let written = std::fs::read_to_string(fx.install.join("share/where")).unwrap();
        assert_eq!(written.trim(), fx.install.display().to_string());
    }

    #[test]
    fn test_primitive_run_command_failure_is_execution_error() {
        let fx = Fixture::new();
        let s = step(ActionKind::RunCommand, &[("command", ParamValue::literal("echo boom >&2; exit 3"))]);
        match execute(&s, &fx.ctx(None)) {
            Err(Error::Execution { action, reason }) => {
                assert_eq!(action, "run_command");
                assert!(reason.contains("exit code 3"));
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_primitive_apply_patch_inline() {
        let fx = Fixture::new();
        if local::exec_local("command -v patch").map(|o| !o.success()).unwrap_or(true) {
            return;
        }
        std::fs::write(fx.work.join("hello.txt"), "hello\n").unwrap();
        let diff = "--- a/hello.txt\n+++ b/hello.txt\n@@ -1 +1 @@\n-hello\n+patched\n";
        let s = step(ActionKind::ApplyPatch, &[("data", ParamValue::literal(diff))]);
        execute(&s, &fx.ctx(None)).unwrap();
        assert_eq!(std::fs::read_to_string(fx.work.join("hello.txt")).unwrap(), "patched\n");
    }

    #[test]
    fn test_primitive_rejects_composite_and_system() {
        let fx = Fixture::new();
        assert!(execute(&step(ActionKind::GithubFile, &[]), &fx.ctx(None)).is_err());
        assert!(execute(&step(ActionKind::AptInstall, &[]), &fx.ctx(None)).is_err());
    }
}
