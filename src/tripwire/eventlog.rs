//! FR-031: Append-only JSONL event log — the local telemetry sink.
//!
//! Recording is fire-and-forget: a failed write is logged and never changes
//! the outcome of the command that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Something worth recording about a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Installed {
        tool: String,
        version: String,
        explicit: bool,
        hidden: bool,
    },
    Activated {
        tool: String,
        from: Option<String>,
        to: String,
    },
    Updated {
        tool: String,
        from: String,
        to: String,
    },
    Verified {
        tool: String,
        version: String,
        ok: bool,
    },
    Failed {
        command: String,
        category: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
    pub ferrule_version: String,
}

/// Telemetry client seam.
pub trait Telemetry {
    fn send(&self, event: Event);
}

/// Events appended to `events.jsonl` under the ferrule home.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    enabled: bool,
}

impl EventLog {
    pub fn new(path: &Path, enabled: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            enabled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Telemetry for EventLog {
    fn send(&self, event: Event) {
        if !self.enabled {
            return;
        }
        if let Err(e) = append_event(&self.path, event) {
            tracing::debug!(error = %e, "telemetry event dropped");
        }
    }
}

/// Append one event as a JSON line.
pub fn append_event(path: &Path, event: Event) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let te = TimestampedEvent {
        ts: Utc::now(),
        event,
        ferrule_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event back, skipping lines that do not parse.
pub fn read_events(path: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventlog_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        append_event(
            &path,
            Event::Installed {
                tool: "jq".into(),
                version: "1.7.1".into(),
                explicit: true,
                hidden: false,
            },
        )
        .unwrap();
        append_event(
            &path,
            Event::Activated {
                tool: "jq".into(),
                from: None,
                to: "1.7.1".into(),
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"event\":\"installed\""));
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].event, Event::Activated { .. }));
    }

    #[test]
    fn test_eventlog_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        append_event(
            &path,
            Event::Failed {
                command: "install".into(),
                category: "network_error".into(),
            },
        )
        .unwrap();
        assert_eq!(read_events(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_eventlog_send_never_fails() {
        // parent is a regular file, so the append cannot succeed
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let log = EventLog::new(&blocker.join("events.jsonl"), true);
        log.send(Event::Verified {
            tool: "jq".into(),
            version: "1".into(),
            ok: true,
        });
        assert!(!log.path().exists());
    }

    #[test]
    fn test_eventlog_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(&dir.path().join("events.jsonl"), false);
        log.send(Event::Updated {
            tool: "jq".into(),
            from: "1.6".into(),
            to: "1.7.1".into(),
        });
        assert!(!log.path().exists());
    }
}
