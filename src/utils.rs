//! Small helpers for logging and filesystem preparation.

use chrono::{DateTime, TimeDelta, Utc};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary at or before `max` bytes and
/// get `"…(+N bytes)"` appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// The instant `days` days before `now`.
///
/// # Returns
///
/// `None` when `days` is negative or the result falls outside the
/// representable date range.
///
/// # Examples
///
/// ```ignore
/// let week_ago = days_before(Utc::now(), 7).unwrap();
/// assert!(days_before(Utc::now(), i64::MAX).is_none());
/// ```
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days < 0 {
        return None;
    }
    now.checked_sub_signed(TimeDelta::try_days(days)?)
}

/// File path behind a SQLite connection string, if it names a file.
pub fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Make sure the directory holding a file-backed database exists.
///
/// SQLite creates the database file on demand but not its parent directories.
#[instrument(level = "info", skip_all, fields(%database_url))]
pub async fn ensure_database_dir(database_url: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(parent) = sqlite_file_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(&parent).await?;
    info!(dir = %parent.display(), "Database directory ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with("é…"));
        assert!(result.contains("(+8 bytes)"));
    }

    #[test]
    fn test_days_before() {
        let now = DateTime::parse_from_rfc3339("2024-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let week_ago = days_before(now, 7).unwrap();
        assert_eq!(week_ago.to_rfc3339(), "2024-03-03T12:00:00+00:00");
        assert_eq!(days_before(now, 0), Some(now));
    }

    #[test]
    fn test_days_before_out_of_range_is_none() {
        let now = Utc::now();
        assert_eq!(days_before(now, -1), None);
        assert_eq!(days_before(now, i64::MAX), None);
        assert_eq!(days_before(now, 1_000_000_000), None);
    }

    #[test]
    fn test_sqlite_file_path() {
        assert_eq!(
            sqlite_file_path("sqlite://data/items.db"),
            Some(PathBuf::from("data/items.db"))
        );
        assert_eq!(
            sqlite_file_path("sqlite:data/items.db?mode=rwc"),
            Some(PathBuf::from("data/items.db"))
        );
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://localhost/db"), None);
    }

    #[tokio::test]
    async fn test_ensure_database_dir_creates_parent() {
        let root = std::env::temp_dir().join(format!("adoption_watch_dir_{}", rand::random::<u32>()));
        let url = format!("sqlite://{}/nested/items.db", root.display());
        ensure_database_dir(&url).await.unwrap();
        assert!(root.join("nested").is_dir());
        let _ = std::fs::remove_dir_all(&root);
    }
}
