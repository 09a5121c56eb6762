//! Session file naming and rotation.
//!
//! Filenames look like `session-1-2026-08-29T10-00-00-dev-ttyUSB0.log`:
//! a rotation-number prefix (1 = most recent), an ISO-ish timestamp, and
//! the sanitized port identifier.

use std::path::Path;

use chrono::{DateTime, Utc};

/// Build the filename for a new session, always numbered 1.
pub(crate) fn session_filename(port: &str, started: DateTime<Utc>) -> String {
    let stamp = started.format("%Y-%m-%dT%H-%M-%S");
    format!("session-1-{stamp}-{}.log", sanitize_port(port))
}

/// Replace path separators and colons so a port id is filename-safe.
pub(crate) fn sanitize_port(port: &str) -> String {
    port.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Split a session filename into its rotation number and the remainder.
pub(crate) fn parse_session_filename(name: &str) -> Option<(u64, &str)> {
    if !name.ends_with(".log") {
        return None;
    }
    let rest = name.strip_prefix("session-")?;
    let (number, tail) = rest.split_once('-')?;
    let number = number.parse().ok()?;
    Some((number, tail))
}

/// Shift every existing session file one number up so a new `session-1`
/// can be created, deleting files whose new number would exceed
/// `max_files`.
pub(crate) async fn rotate(dir: &Path, max_files: usize) -> std::io::Result<()> {
    let max_files = u64::try_from(max_files).unwrap_or(u64::MAX);
    let mut found: Vec<(u64, String, String)> = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((number, tail)) = parse_session_filename(&name) {
            let tail = tail.to_string();
            found.push((number, name, tail));
        }
    }

    // Highest number first so renames never collide.
    found.sort_by(|a, b| b.0.cmp(&a.0));

    for (number, name, tail) in found {
        let src = dir.join(&name);
        let shifted = number.saturating_add(1);
        if shifted > max_files {
            tracing::debug!(file = %src.display(), "Deleting session file beyond retention");
            tokio::fs::remove_file(&src).await?;
        } else {
            let dst = dir.join(format!("session-{shifted}-{tail}"));
            tokio::fs::rename(&src, &dst).await?;
        }
    }

    Ok(())
}
