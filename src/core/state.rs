//! FR-020: Install state — load, save (atomic), record installs.
//!
//! One JSON document for every tool. Commands load it whole, mutate it in
//! memory, and write it back through a temp file and rename.

use super::error::Error;
use super::types::{State, ToolState, VerifySpec, VersionState};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Load state. A missing file is an empty state.
pub fn load_state(path: &Path) -> Result<State, String> {
    if !path.exists() {
        return Ok(State::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if content.trim().is_empty() {
        return Ok(State::default());
    }
    serde_json::from_str(&content).map_err(|e| format!("invalid state file {}: {}", path.display(), e))
}

/// Save state atomically (write to temp, then rename).
pub fn save_state(path: &Path, state: &State) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let json = serde_json::to_string_pretty(state).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))?;

    Ok(())
}

/// Versions become directory names; reject anything that could escape.
pub fn validate_version_string(version: &str) -> Result<(), Error> {
    if version.is_empty() {
        return Err(Error::Validation("version must not be empty".into()));
    }
    if version.contains("..") || version.contains('/') || version.contains('\\') {
        return Err(Error::Validation(format!(
            "invalid version format {:?}: must not contain '..', '/' or '\\'",
            version
        )));
    }
    Ok(())
}

/// What an install leaves behind for one tool version.
#[derive(Debug, Clone)]
pub struct InstallRecord {
    pub requested: String,
    pub binaries: Vec<String>,
    pub install_dir: PathBuf,
    pub verify: Option<VerifySpec>,
    pub explicit: bool,
    /// Tool that pulled this one in as a dependency.
    pub required_by: Option<String>,
    pub hidden: bool,
}

/// Record an installed version. A brand-new tool becomes active at this
/// version; activation of an existing tool is left to the caller.
pub fn record_install(state: &mut State, tool: &str, version: &str, record: InstallRecord) {
    let entry = state
        .installed
        .entry(tool.to_string())
        .or_insert_with(|| ToolState {
            active_version: version.to_string(),
            versions: Default::default(),
            is_explicit: false,
            required_by: Vec::new(),
            is_hidden: record.hidden,
        });

    if record.explicit {
        entry.is_explicit = true;
        entry.is_hidden = false;
    }
    if let Some(parent) = record.required_by {
        if !entry.required_by.contains(&parent) {
            entry.required_by.push(parent);
            entry.required_by.sort();
        }
    }
    entry.versions.insert(
        version.to_string(),
        VersionState {
            requested: record.requested,
            binaries: record.binaries,
            install_dir: record.install_dir,
            installed_at: Utc::now(),
            verify: record.verify,
        },
    );
}

/// Installed versions of a tool, in install order.
pub fn installed_versions(state: &State, tool: &str) -> Vec<String> {
    state
        .installed
        .get(tool)
        .map(|t| t.versions.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(explicit: bool, hidden: bool, required_by: Option<&str>) -> InstallRecord {
        InstallRecord {
            requested: String::new(),
            binaries: vec!["bin/jq".into()],
            install_dir: PathBuf::from("/h/tools/jq-1.7.1"),
            verify: None,
            explicit,
            required_by: required_by.map(str::to_string),
            hidden,
        }
    }

    #[test]
    fn test_state_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_state(&dir.path().join("state.json")).unwrap();
        assert!(state.installed.is_empty());
    }

    #[test]
    fn test_state_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let mut state = State::default();
        record_install(&mut state, "jq", "1.7.1", record(true, false, None));
        save_state(&path, &state).unwrap();
        assert!(!dir.path().join("nested/state.json.tmp").exists());

        let loaded = load_state(&path).unwrap();
        let jq = &loaded.installed["jq"];
        assert_eq!(jq.active_version, "1.7.1");
        assert!(jq.is_explicit);
        assert_eq!(jq.active().unwrap().binaries, vec!["bin/jq"]);
    }

    #[test]
    fn test_state_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(load_state(&path).unwrap_err().contains("invalid state file"));
    }

    #[test]
    fn test_state_record_keeps_active_version() {
        let mut state = State::default();
        record_install(&mut state, "jq", "1.6", record(true, false, None));
        record_install(&mut state, "jq", "1.7.1", record(true, false, None));
        assert_eq!(state.installed["jq"].active_version, "1.6");
        assert_eq!(installed_versions(&state, "jq"), vec!["1.6", "1.7.1"]);
        assert!(installed_versions(&state, "yq").is_empty());
    }

    #[test]
    fn test_state_dependency_then_explicit() {
        let mut state = State::default();
        record_install(&mut state, "rust", "1.80.0", record(false, true, Some("ripgrep")));
        record_install(&mut state, "rust", "1.80.0", record(false, true, Some("bat")));
        record_install(&mut state, "rust", "1.80.0", record(false, true, Some("bat")));
        let rust = &state.installed["rust"];
        assert!(rust.is_hidden);
        assert!(!rust.is_explicit);
        assert_eq!(rust.required_by, vec!["bat", "ripgrep"]);

        record_install(&mut state, "rust", "1.80.0", record(true, false, None));
        let rust = &state.installed["rust"];
        assert!(rust.is_explicit);
        assert!(!rust.is_hidden);
    }

    #[test]
    fn test_state_version_string_validation() {
        assert!(validate_version_string("1.7.1").is_ok());
        assert!(validate_version_string("v2.0.0-rc.1").is_ok());
        assert!(validate_version_string("").is_err());
        assert!(validate_version_string("../1.0").is_err());
        assert!(validate_version_string("1.0/evil").is_err());
        assert!(validate_version_string("1.0\\evil").is_err());
    }
}
