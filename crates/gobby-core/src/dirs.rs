//! The `~/.gobby` directory layout.

use std::path::PathBuf;

/// Root of the Gobby home directory (`~/.gobby`).
///
/// Falls back to `.gobby` relative to the current directory when no home
/// directory can be determined (containers, stripped-down CI).
#[must_use]
pub fn gobby_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".gobby"))
        .unwrap_or_else(|| PathBuf::from(".gobby"))
}

/// `~/.gobby/logs` — rotating daemon and hook logs.
#[must_use]
pub fn logs_dir() -> PathBuf {
    gobby_home().join("logs")
}

/// `~/.gobby/gobby.sqlite` — the embedded store.
#[must_use]
pub fn database_path() -> PathBuf {
    gobby_home().join("gobby.sqlite")
}

/// `~/.gobby/gobby.pid` — ASCII PID of the running daemon.
#[must_use]
pub fn pid_path() -> PathBuf {
    gobby_home().join("gobby.pid")
}

/// `~/.gobby/session_summaries` — handoff failback files.
#[must_use]
pub fn session_summaries_dir() -> PathBuf {
    gobby_home().join("session_summaries")
}

/// `~/.gobby/workflows` — user-global workflow documents.
#[must_use]
pub fn workflows_dir() -> PathBuf {
    gobby_home().join("workflows")
}

/// Failback summary file for a session: `session_{yyyymmdd}_{external_id}.md`.
#[must_use]
pub fn summary_file_path(date_yyyymmdd: &str, external_id: &str) -> PathBuf {
    session_summaries_dir().join(format!("session_{date_yyyymmdd}_{external_id}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_hangs_off_home() {
        let home = gobby_home();
        assert!(logs_dir().starts_with(&home));
        assert!(database_path().starts_with(&home));
        assert!(pid_path().starts_with(&home));
    }

    #[test]
    fn test_summary_file_name() {
        let path = summary_file_path("20260801", "abc-123");
        assert!(path.ends_with("session_20260801_abc-123.md"));
    }
}
