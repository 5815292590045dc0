//! FR-021: Activation — repoint `tools/current/<binary>` at one installed version.
//!
//! Each link is replaced by staging a new symlink next to it and renaming it
//! over the old one, so a reader sees either the previous target or the new
//! one, never a missing link.

use super::config::Config;
use super::error::Error;
use super::state::{installed_versions, validate_version_string};
use super::types::{State, VersionState};
use std::path::{Path, PathBuf};

/// Outcome of an activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub tool: String,
    pub from: Option<String>,
    pub to: String,
    /// False when the version was already active with intact links.
    pub changed: bool,
    pub links: Vec<PathBuf>,
}

/// Make `version` the active version of `tool`. Never installs anything.
/// The caller persists `state` afterwards.
pub fn activate(config: &Config, state: &mut State, tool: &str, version: &str) -> Result<Activation, Error> {
    validate_version_string(version)?;
    let available = installed_versions(state, tool);
    let tool_state = state
        .installed
        .get_mut(tool)
        .ok_or_else(|| Error::NotInstalled { tool: tool.to_string() })?;
    let target = tool_state
        .versions
        .get(version)
        .ok_or_else(|| Error::VersionNotFound {
            tool: tool.to_string(),
            version: version.to_string(),
            available,
        })?;
    if !target.install_dir.is_dir() {
        return Err(Error::execution(
            "activate",
            format!(
                "install directory {} for {} {} is missing; re-run install",
                target.install_dir.display(),
                tool,
                version
            ),
        ));
    }

    let previous = tool_state.active_version.clone();
    let hidden = tool_state.is_hidden;
    let links: Vec<(PathBuf, PathBuf)> = if hidden {
        Vec::new()
    } else {
        link_pairs(config, target)?
    };

    let intact = links.iter().all(|(link, dest)| points_to(link, dest));
    if previous == version && intact {
        tracing::debug!(tool, version, "already active");
        return Ok(Activation {
            tool: tool.to_string(),
            from: Some(previous),
            to: version.to_string(),
            changed: false,
            links: links.into_iter().map(|(l, _)| l).collect(),
        });
    }

    for (_, dest) in &links {
        if !dest.exists() {
            return Err(Error::execution(
                "activate",
                format!("binary {} is missing from the install; re-run install", dest.display()),
            ));
        }
    }
    let retired = match tool_state.versions.get(&previous) {
        Some(old) if !hidden && previous != version => stale_links(config, old, &links)?,
        _ => Vec::new(),
    };

    std::fs::create_dir_all(&config.current_dir)
        .map_err(|e| Error::Io(format!("cannot create dir {}: {}", config.current_dir.display(), e)))?;
    for (link, dest) in &links {
        let staged = stage_link(dest, link)?;
        commit_link(&staged, link)?;
    }
    for link in &retired {
        std::fs::remove_file(link).map_err(|e| Error::Io(format!("cannot remove {}: {}", link.display(), e)))?;
        tracing::debug!(link = %link.display(), "removed link the new version does not provide");
    }
    tool_state.active_version = version.to_string();
    tracing::info!(tool, from = %previous, to = version, hidden, "activated");

    Ok(Activation {
        tool: tool.to_string(),
        from: if previous.is_empty() || previous == version { None } else { Some(previous) },
        to: version.to_string(),
        changed: true,
        links: links.into_iter().map(|(l, _)| l).collect(),
    })
}

/// `(current/<name>, <install_dir>/<binary>)` for every binary.
fn link_pairs(config: &Config, version: &VersionState) -> Result<Vec<(PathBuf, PathBuf)>, Error> {
    version
        .binaries
        .iter()
        .map(|binary| {
            let name = Path::new(binary)
                .file_name()
                .ok_or_else(|| Error::Validation(format!("binary {:?} names no file", binary)))?;
            let name = name.to_string_lossy();
            Ok((config.current_symlink(&name), version.install_dir.join(binary)))
        })
        .collect()
}

/// Links the previous version owns that the new one will not replace. Links
/// repointed elsewhere since are left alone.
fn stale_links(config: &Config, old: &VersionState, keep: &[(PathBuf, PathBuf)]) -> Result<Vec<PathBuf>, Error> {
    Ok(link_pairs(config, old)?
        .into_iter()
        .filter(|(link, dest)| !keep.iter().any(|(k, _)| k == link) && points_to(link, dest))
        .map(|(link, _)| link)
        .collect())
}

fn points_to(link: &Path, dest: &Path) -> bool {
    std::fs::read_link(link).map(|t| t == dest).unwrap_or(false)
}

fn staging_path(link: &Path) -> PathBuf {
    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    link.with_file_name(format!(".{}.ferrule-tmp", name))
}

/// Create the replacement link beside `link` without touching `link`.
pub fn stage_link(dest: &Path, link: &Path) -> Result<PathBuf, Error> {
    let staged = staging_path(link);
    if staged.symlink_metadata().is_ok() {
        std::fs::remove_file(&staged)
            .map_err(|e| Error::Io(format!("cannot remove stale {}: {}", staged.display(), e)))?;
    }
    symlink(dest, &staged)?;
    Ok(staged)
}

/// Rename a staged link over `link`. Atomic on the same filesystem.
pub fn commit_link(staged: &Path, link: &Path) -> Result<(), Error> {
    std::fs::rename(staged, link)
        .map_err(|e| Error::Io(format!("cannot rename {} → {}: {}", staged.display(), link.display(), e)))
}

#[cfg(unix)]
fn symlink(dest: &Path, link: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(dest, link)
        .map_err(|e| Error::Io(format!("cannot link {} → {}: {}", link.display(), dest.display(), e)))
}

#[cfg(not(unix))]
fn symlink(_dest: &Path, link: &Path) -> Result<(), Error> {
    Err(Error::Io(format!("cannot link {}: symlinks require a unix host", link.display())))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::state::{record_install, InstallRecord};

    fn install(config: &Config, state: &mut State, tool: &str, version: &str, hidden: bool) {
        let dir = config.tool_dir(tool, version);
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        std::fs::write(dir.join("bin").join(tool), format!("#!/bin/sh\necho {}\n", version)).unwrap();
        record_install(
            state,
            tool,
            version,
            InstallRecord {
                requested: String::new(),
                binaries: vec![format!("bin/{}", tool)],
                install_dir: dir,
                verify: None,
                explicit: !hidden,
                required_by: None,
                hidden,
            },
        );
    }

    fn setup() -> (tempfile::TempDir, Config, State) {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        config.ensure_dirs().unwrap();
        (home, config, State::default())
    }

    #[test]
    fn test_activate_links_into_version_dir() {
        let (_home, config, mut state) = setup();
        install(&config, &mut state, "jq", "1.6", false);
        install(&config, &mut state, "jq", "1.7.1", false);

        let first = activate(&config, &mut state, "jq", "1.6").unwrap();
        assert!(first.changed);
        let link = config.current_symlink("jq");
        assert_eq!(std::fs::read_link(&link).unwrap(), config.tool_dir("jq", "1.6").join("bin/jq"));

        let second = activate(&config, &mut state, "jq", "1.7.1").unwrap();
        assert_eq!(second.from.as_deref(), Some("1.6"));
        assert_eq!(state.installed["jq"].active_version, "1.7.1");
        assert_eq!(std::fs::read_link(&link).unwrap(), config.tool_dir("jq", "1.7.1").join("bin/jq"));
        assert!(std::fs::read_link(&link).unwrap().starts_with(config.tool_dir("jq", "1.7.1")));
    }

    #[test]
    fn test_activate_already_active_is_noop() {
        let (_home, config, mut state) = setup();
        install(&config, &mut state, "jq", "1.7.1", false);
        assert!(activate(&config, &mut state, "jq", "1.7.1").unwrap().changed);
        assert!(!activate(&config, &mut state, "jq", "1.7.1").unwrap().changed);

        // a removed link is repaired even though the version is already active
        std::fs::remove_file(config.current_symlink("jq")).unwrap();
        assert!(activate(&config, &mut state, "jq", "1.7.1").unwrap().changed);
        assert!(config.current_symlink("jq").symlink_metadata().is_ok());
    }

    #[test]
    fn test_activate_errors() {
        let (_home, config, mut state) = setup();
        assert!(matches!(
            activate(&config, &mut state, "jq", "1.7.1"),
            Err(Error::NotInstalled { .. })
        ));
        install(&config, &mut state, "jq", "1.6", false);
        match activate(&config, &mut state, "jq", "9.9") {
            Err(Error::VersionNotFound { available, .. }) => assert_eq!(available, vec!["1.6"]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            activate(&config, &mut state, "jq", "../1.6"),
            Err(Error::Validation(_))
        ));

        std::fs::remove_dir_all(config.tool_dir("jq", "1.6")).unwrap();
        let err = activate(&config, &mut state, "jq", "1.6").unwrap_err();
        assert!(err.to_string().contains("re-run install"));
    }

    #[test]
    fn test_activate_hidden_tool_gets_no_links() {
        let (_home, config, mut state) = setup();
        install(&config, &mut state, "rust", "1.80.0", true);
        install(&config, &mut state, "rust", "1.81.0", true);
        let result = activate(&config, &mut state, "rust", "1.81.0").unwrap();
        assert!(result.links.is_empty());
        assert_eq!(state.installed["rust"].active_version, "1.81.0");
        assert!(config.current_symlink("rust").symlink_metadata().is_err());
    }

    #[test]
    fn test_activate_interrupted_keeps_old_target() {
        let (_home, config, mut state) = setup();
        install(&config, &mut state, "jq", "1.6", false);
        install(&config, &mut state, "jq", "1.7.1", false);
        activate(&config, &mut state, "jq", "1.6").unwrap();
        let link = config.current_symlink("jq");
        let old = config.tool_dir("jq", "1.6").join("bin/jq");
        let new = config.tool_dir("jq", "1.7.1").join("bin/jq");

        // crash between staging and rename
        let staged = stage_link(&new, &link).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), old);
        assert!(std::fs::read_link(&staged).is_ok());

        // the next activation replaces the stale staging link and completes
        activate(&config, &mut state, "jq", "1.7.1").unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), new);
        assert!(staged.symlink_metadata().is_err());
    }

    #[test]
    fn test_activate_drops_links_the_new_version_lacks() {
        let (_home, config, mut state) = setup();
        install(&config, &mut state, "go", "1.21.0", false);
        install(&config, &mut state, "go", "1.22.0", false);
        let old_dir = config.tool_dir("go", "1.21.0");
        std::fs::write(old_dir.join("bin/gofmt"), "#!/bin/sh\n").unwrap();
        state.installed["go"].versions["1.21.0"].binaries.push("bin/gofmt".into());

        activate(&config, &mut state, "go", "1.21.0").unwrap();
        assert!(config.current_symlink("gofmt").symlink_metadata().is_ok());

        let result = activate(&config, &mut state, "go", "1.22.0").unwrap();
        assert_eq!(result.links, vec![config.current_symlink("go")]);
        assert!(config.current_symlink("gofmt").symlink_metadata().is_err());
        assert_eq!(
            std::fs::read_link(config.current_symlink("go")).unwrap(),
            config.tool_dir("go", "1.22.0").join("bin/go")
        );
    }

    #[test]
    fn test_activate_keeps_links_owned_elsewhere() {
        let (_home, config, mut state) = setup();
        install(&config, &mut state, "go", "1.21.0", false);
        install(&config, &mut state, "go", "1.22.0", false);
        std::fs::write(config.tool_dir("go", "1.21.0").join("bin/gofmt"), "#!/bin/sh\n").unwrap();
        state.installed["go"].versions["1.21.0"].binaries.push("bin/gofmt".into());
        activate(&config, &mut state, "go", "1.21.0").unwrap();

        // gofmt now belongs to another tool
        let other = config.home.join("gofmt");
        std::fs::write(&other, "#!/bin/sh\n").unwrap();
        let staged = stage_link(&other, &config.current_symlink("gofmt")).unwrap();
        commit_link(&staged, &config.current_symlink("gofmt")).unwrap();

        activate(&config, &mut state, "go", "1.22.0").unwrap();
        assert_eq!(std::fs::read_link(config.current_symlink("gofmt")).unwrap(), other);
    }

    #[test]
    fn test_activate_commit_replaces_existing_link() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("tool");
        symlink(Path::new("/old/target"), &link).unwrap();
        let staged = stage_link(Path::new("/new/target"), &link).unwrap();
        commit_link(&staged, &link).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("/new/target"));
    }
}
