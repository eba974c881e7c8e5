//! # Logging Setup
//!
//! Installs a `fern` dispatcher behind the `log` facade: every record goes to
//! stdout and to a timestamped file under the log directory. Older files of
//! the same application are pruned at startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Log directory error: {0}")]
    Io(#[from] io::Error),

    #[error("A global logger is already installed: {0}")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

/// Maps a level name to a filter; anything unknown is `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `<app_name>_<local time>.log`
pub fn log_file_name(app_name: &str) -> String {
    format!("{}_{}.log", app_name, chrono::Local::now().format(LOG_TIMESTAMP_FORMAT))
}

/// `true` for names produced by [`log_file_name`] for exactly `app_name`.
fn is_log_of(file_name: &str, app_name: &str) -> bool {
    file_name
        .strip_suffix(".log")
        .and_then(|stem| stem.strip_prefix(app_name))
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|stamp| chrono::NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT).is_ok())
}

/// Sets up stdout and file logging for `app_name`.
///
/// Returns the path of the new log file.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<PathBuf, LoggerError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    cleanup_old_logs(log_dir, app_name, 1)?;

    let log_path = log_dir.join(log_file_name(app_name));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        // sqlx logs every statement at info
        .level_for("sqlx", LevelFilter::Warn)
        .chain(io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    Ok(log_path)
}

/// Deletes `<app_name>_<timestamp>.log` files in `log_dir`, keeping the `keep`
/// most recent. Files of other applications are left alone, even when their
/// name starts with `app_name`.
///
/// Returns how many files were removed.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize, LoggerError> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| is_log_of(&e.file_name().to_string_lossy(), app_name))
        .collect();

    // Newest first
    entries.sort_by_key(|e| std::cmp::Reverse(e.metadata().and_then(|m| m.modified()).ok()));

    let mut removed = 0;
    for entry in entries.iter().skip(keep) {
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), LevelFilter::Debug);
        assert_eq!(parse_level(" warning "), LevelFilter::Warn);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
    }

    #[test]
    fn test_log_file_name() {
        let name = log_file_name("sync");
        assert!(name.starts_with("sync_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_log_name_matching() {
        assert!(is_log_of(&log_file_name("sync"), "sync"));
        assert!(is_log_of("sync_2026-01-01_08-30-00.log", "sync"));
        assert!(!is_log_of("sync_worker_2026-01-01_08-30-00.log", "sync"));
        assert!(!is_log_of("sync_2026-01-01.log", "sync"));
        assert!(!is_log_of("sync_2026-01-01_08-30-00.txt", "sync"));
        assert!(!is_log_of("other_2026-01-01_08-30-00.log", "sync"));
    }

    #[test]
    fn test_cleanup_keeps_newest_of_same_app() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let own = ["app_2026-01-01_00-00-01.log", "app_2026-01-02_00-00-01.log", "app_2026-01-03_00-00-01.log"];
        for (i, name) in own.iter().enumerate() {
            let file = fs::File::create(dir.path().join(name)).unwrap();
            file.set_modified(now - Duration::from_secs(100 - i as u64 * 10)).unwrap();
        }
        fs::write(dir.path().join("other_2026-01-01_00-00-01.log"), "").unwrap();
        fs::write(dir.path().join("app_notes.txt"), "").unwrap();

        let removed = cleanup_old_logs(dir.path(), "app", 1).unwrap();
        assert_eq!(removed, 2);

        let mut left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["app_2026-01-03_00-00-01.log", "app_notes.txt", "other_2026-01-01_00-00-01.log"]);
    }

    #[test]
    fn test_cleanup_spares_apps_sharing_a_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sync_worker_2026-01-01_00-00-01.log"), "").unwrap();
        fs::write(dir.path().join("sync_2026-01-01_00-00-01.log"), "").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), "sync", 0).unwrap(), 1);
        assert!(dir.path().join("sync_worker_2026-01-01_00-00-01.log").exists());
        assert!(!dir.path().join("sync_2026-01-01_00-00-01.log").exists());
    }
}
