//! FR-014: Privileged system actions — parameter validation and human descriptions.
//!
//! Nothing here touches the host. Descriptions are the exact commands a user
//! would run themselves.

use super::{optional_str, require_str, str_list, ActionKind};
use crate::core::error::Error;
use crate::core::types::Params;

/// Human-readable instruction for a privileged step.
/// Returns `None` for actions that are not privileged.
pub fn describe(kind: ActionKind, params: &Params) -> Result<Option<String>, Error> {
    let text = match kind {
        ActionKind::AptInstall => format!("sudo apt-get install -y {}", packages(kind, params)?),
        ActionKind::AptRepo => {
            let url = require_str(kind, params, "url")?;
            let key_url = require_str(kind, params, "key_url")?;
            match optional_str(kind, params, "key_sha256")? {
                Some(sha) => format!(
                    "Add APT repository {} (signing key {}, sha256 {})",
                    url, key_url, sha
                ),
                None => format!("Add APT repository {} (signing key {})", url, key_url),
            }
        }
        ActionKind::AptPpa => {
            let ppa = require_str(kind, params, "ppa")?;
            validate_ppa(kind, ppa)?;
            format!("sudo add-apt-repository ppa:{}", ppa)
        }
        ActionKind::DnfInstall => format!("sudo dnf install -y {}", packages(kind, params)?),
        ActionKind::DnfRepo => format!(
            "sudo dnf config-manager --add-repo {}",
            require_str(kind, params, "url")?
        ),
        ActionKind::PacmanInstall => {
            format!("sudo pacman -S --noconfirm {}", packages(kind, params)?)
        }
        ActionKind::ApkInstall => format!("sudo apk add {}", packages(kind, params)?),
        ActionKind::ZypperInstall => format!("sudo zypper install -y {}", packages(kind, params)?),
        ActionKind::BrewInstall => format!("brew install {}", packages(kind, params)?),
        ActionKind::BrewCask => format!("brew install --cask {}", packages(kind, params)?),
        ActionKind::GroupAdd => {
            let group = require_str(kind, params, "group")?;
            validate_group_name(kind, group)?;
            format!("sudo usermod -aG {} $USER", group)
        }
        ActionKind::ServiceEnable => {
            let service = require_str(kind, params, "service")?;
            validate_service_name(kind, service)?;
            format!("sudo systemctl enable {}", service)
        }
        ActionKind::ServiceStart => {
            let service = require_str(kind, params, "service")?;
            validate_service_name(kind, service)?;
            format!("sudo systemctl start {}", service)
        }
        ActionKind::RequireCommand => {
            let command = require_str(kind, params, "command")?;
            validate_package_name(kind, "command", command)?;
            match optional_str(kind, params, "min_version")?.filter(|v| !v.is_empty()) {
                Some(min) => format!("Requires: {} (version >= {})", command, min),
                None => format!("Requires: {}", command),
            }
        }
        ActionKind::Manual => require_str(kind, params, "text")?.to_string(),
        ActionKind::DownloadFile
        | ActionKind::Extract
        | ActionKind::Chmod
        | ActionKind::InstallBinaries
        | ActionKind::SetEnv
        | ActionKind::ApplyPatch
        | ActionKind::RunCommand
        | ActionKind::CargoBuild
        | ActionKind::GoBuild
        | ActionKind::NpmExec
        | ActionKind::Download
        | ActionKind::DownloadArchive
        | ActionKind::GithubArchive
        | ActionKind::GithubFile
        | ActionKind::CargoInstall
        | ActionKind::GoInstall
        | ActionKind::NpmInstall => return Ok(None),
    };
    Ok(Some(text))
}

fn packages(kind: ActionKind, params: &Params) -> Result<String, Error> {
    let list = str_list(kind, params, "packages")?;
    if list.is_empty() {
        return Err(Error::malformed(kind.name(), "packages", "at least one package is required"));
    }
    for pkg in &list {
        validate_package_name(kind, "packages", pkg)?;
    }
    Ok(list.join(" "))
}

/// Package and command names: non-empty, no whitespace or shell metacharacters.
pub fn validate_package_name(kind: ActionKind, param: &str, name: &str) -> Result<(), Error> {
    let ok = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@' | '/' | ':'));
    if ok {
        Ok(())
    } else {
        Err(Error::malformed(kind.name(), param, format!("invalid name {:?}", name)))
    }
}

/// Group names start with a letter or `_`; then alphanumerics, `_`, `-`.
pub fn validate_group_name(kind: ActionKind, group: &str) -> Result<(), Error> {
    let mut chars = group.chars();
    let ok = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::malformed(kind.name(), "group", format!("invalid group name {:?}", group)))
    }
}

/// Service names also allow `@` (templated units) and `.` (unit suffixes).
pub fn validate_service_name(kind: ActionKind, service: &str) -> Result<(), Error> {
    let mut chars = service.chars();
    let ok = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == '_' => chars
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@' | '.')),
        _ => false,
    };
    if ok && !service.contains("..") {
        Ok(())
    } else {
        Err(Error::malformed(kind.name(), "service", format!("invalid service name {:?}", service)))
    }
}

fn validate_ppa(kind: ActionKind, ppa: &str) -> Result<(), Error> {
    match ppa.split_once('/') {
        Some((owner, name))
            if !owner.is_empty()
                && !name.is_empty()
                && !name.contains('/')
                && ppa.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')) =>
        {
            Ok(())
        }
        _ => Err(Error::malformed(kind.name(), "ppa", format!("expected owner/name, got {:?}", ppa))),
    }
}
