//! FR-004: Target resolution — host probing, os-release family detection, overrides.

use super::error::Error;
use super::types::Platform;
use std::path::Path;

pub const SUPPORTED_OS: [&str; 2] = ["linux", "darwin"];
pub const SUPPORTED_ARCH: [&str; 2] = ["amd64", "arm64"];
pub const LINUX_FAMILIES: [&str; 5] = ["debian", "rhel", "arch", "alpine", "suse"];

const OS_RELEASE: &str = "/etc/os-release";

/// Accept exactly "", "linux", "darwin".
pub fn validate_os(os: &str) -> Result<(), Error> {
    if os.is_empty() || SUPPORTED_OS.contains(&os) {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "invalid OS value {:?}: must be one of {}",
        os,
        SUPPORTED_OS.join(", ")
    )))
}

/// Accept exactly "", "amd64", "arm64".
pub fn validate_arch(arch: &str) -> Result<(), Error> {
    if arch.is_empty() || SUPPORTED_ARCH.contains(&arch) {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "invalid arch value {:?}: must be one of {}",
        arch,
        SUPPORTED_ARCH.join(", ")
    )))
}

/// Accept "" or one of the five known families.
pub fn validate_linux_family(family: &str) -> Result<(), Error> {
    if family.is_empty() || LINUX_FAMILIES.contains(&family) {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "invalid target-family {:?}, must be one of: {}",
        family,
        LINUX_FAMILIES.join(", ")
    )))
}

/// Host OS in plan vocabulary (`macos` is reported as `darwin`).
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Host architecture in plan vocabulary.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// The `ID` and `ID_LIKE` fields of an os-release file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
}

/// Parse os-release content. Comments, blank lines and quoting are handled.
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "ID" => release.id = value.to_lowercase(),
            "ID_LIKE" => {
                release.id_like = value
                    .split_whitespace()
                    .map(|s| s.to_lowercase())
                    .collect();
            }
            _ => {}
        }
    }
    release
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn family_for_id(id: &str) -> Option<&'static str> {
    match id {
        "debian" | "ubuntu" | "linuxmint" | "pop" | "elementary" | "zorin" | "kali"
        | "raspbian" => Some("debian"),
        "rhel" | "fedora" | "centos" | "rocky" | "almalinux" | "ol" | "amzn" => Some("rhel"),
        "arch" | "manjaro" | "endeavouros" | "garuda" => Some("arch"),
        "alpine" => Some("alpine"),
        "suse" | "sles" | "opensuse" => Some("suse"),
        other if other.starts_with("opensuse") => Some("suse"),
        _ => None,
    }
}

/// Classify a release: `ID` first, then each `ID_LIKE` entry in order.
pub fn family_from_os_release(release: &OsRelease) -> Option<&'static str> {
    family_for_id(&release.id).or_else(|| release.id_like.iter().find_map(|id| family_for_id(id)))
}

/// Detect the linux family from an os-release file.
pub fn detect_family(path: &Path) -> Result<&'static str, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read {}: {}", path.display(), e)))?;
    let release = parse_os_release(&content);
    family_from_os_release(&release).ok_or_else(|| {
        Error::Validation(format!(
            "unrecognized linux distribution {:?} in {}",
            release.id,
            path.display()
        ))
    })
}

/// The platform this process runs on. Family detection failure is not fatal.
pub fn host_platform() -> Platform {
    let os = host_os();
    let family = if os == "linux" {
        match detect_family(Path::new(OS_RELEASE)) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(error = %e, "could not detect linux family; family-specific steps will be skipped");
                None
            }
        }
    } else {
        None
    };
    Platform {
        os: os.to_string(),
        arch: host_arch().to_string(),
        linux_family: family.map(str::to_string),
    }
}

/// Resolve the compile target, optionally forcing a linux family.
pub fn resolve_target(family_override: Option<&str>) -> Result<Platform, Error> {
    match family_override.filter(|f| !f.is_empty()) {
        None => Ok(host_platform()),
        Some(family) => resolve_override(host_os(), host_arch(), family),
    }
}

/// Override semantics: a non-linux host synthesizes linux/amd64; a linux host
/// keeps its own architecture.
pub fn resolve_override(host_os: &str, host_arch: &str, family: &str) -> Result<Platform, Error> {
    if family.is_empty() {
        return Err(Error::Validation(format!(
            "invalid target-family \"\", must be one of: {}",
            LINUX_FAMILIES.join(", ")
        )));
    }
    validate_linux_family(family)?;
    let arch = if host_os == "linux" { host_arch } else { "amd64" };
    Platform::new("linux", arch, Some(family))
}
