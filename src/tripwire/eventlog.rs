//! TB-016: Append-only JSONL provenance log of bridging sessions.

use crate::core::error::{BridgeError, Result};
use crate::core::types::{BridgeEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generate an ISO 8601 timestamp.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Days since epoch to Y-M-D (simplified Gregorian)
    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let leap = is_leap(y);
    let month_days = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut m = 0;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md as i64 {
            m = i + 1;
            break;
        }
        remaining -= md as i64;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a session run ID.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Event log of a bridging session, next to the synthesized provisioning app.
pub fn event_log_path(dir: &Path) -> PathBuf {
    dir.join("events.jsonl")
}

/// Append an event to `<dir>/events.jsonl`.
pub fn append_event(dir: &Path, event: BridgeEvent) -> Result<()> {
    let path = event_log_path(dir);
    std::fs::create_dir_all(dir).map_err(|e| BridgeError::io("create", dir, e))?;

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BridgeError::io("open event log", &path, e))?;

    writeln!(file, "{}", json).map_err(|e| BridgeError::io("append to", &path, e))?;

    Ok(())
}

/// Read every event back, oldest first.
pub fn read_events(dir: &Path) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(dir);
    let content = std::fs::read_to_string(&path).map_err(|e| BridgeError::io("read", &path, e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(BridgeError::from))
        .collect()
}
