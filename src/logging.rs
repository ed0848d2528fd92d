// src/logging.rs
//
// Timestamped logging to stderr and a per-run log file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDateTime};

const LOG_SUFFIX: &str = "-serialtap.log";
const LOG_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
#[doc(hidden)]
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Whether `tlog!` echoes to stderr. The console turns this off so log lines
/// do not interleave with received data.
#[doc(hidden)]
pub static CONSOLE_ECHO: AtomicBool = AtomicBool::new(true);

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        if $crate::logging::console_echo() {
            eprintln!("{}", msg);
        }
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

/// Like `tlog!`, but only ever written to the log file. Used for per-line traffic.
#[macro_export]
macro_rules! tlog_file {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
            }
        }
    }};
}

pub fn set_console_echo(enabled: bool) {
    CONSOLE_ECHO.store(enabled, Ordering::Relaxed);
}

#[doc(hidden)]
pub fn console_echo() -> bool {
    CONSOLE_ECHO.load(Ordering::Relaxed)
}

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and a `serialtap.log` symlink (Unix only).
/// Returns the path of the new log file.
pub fn init_file_logging(log_dir: &Path) -> Result<std::path::PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = format!("{}{}", Local::now().format(LOG_TIMESTAMP_FORMAT), LOG_SUFFIX);
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    // Windows symlinks require elevated privileges
    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("serialtap.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create serialtap.log symlink: {}",
                Local::now().format("%H:%M:%S%.3f"),
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would try to lock LOG_FILE, which we just set
    if console_echo() {
        eprintln!(
            "{} [logging] File logging started: {}",
            Local::now().format("%H:%M:%S%.3f"),
            log_path.display()
        );
    }

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            if console_echo() {
                eprintln!(
                    "{} [logging] File logging stopped",
                    Local::now().format("%H:%M:%S%.3f")
                );
            }
        }
    }
}

/// Delete log files in `log_dir` whose timestamp is older than `retention_days`.
/// Files whose names do not carry a timestamp (including the symlink) are left alone.
/// Returns the number of files removed.
pub fn prune_old_logs(log_dir: &Path, retention_days: u32, now: DateTime<Local>) -> usize {
    let cutoff = now.naive_local() - chrono::Duration::days(retention_days as i64);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(created) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(log_file_timestamp)
        else {
            continue;
        };

        if created < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tlog!("[logging] Removed log older than {} days: {}", retention_days, path.display());
                    removed += 1;
                }
                Err(e) => {
                    tlog!("[logging] Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    removed
}

fn log_file_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let stamp = filename.strip_suffix(LOG_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_timestamp() {
        let ts = log_file_timestamp("20260301-084500-serialtap.log").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-03-01 08:45:00");
        assert!(log_file_timestamp("serialtap.log").is_none());
        assert!(log_file_timestamp("notes.txt").is_none());
    }

    #[test]
    fn test_prune_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("20260101-000000-serialtap.log");
        let recent = dir.path().join("20260309-120000-serialtap.log");
        let other = dir.path().join("keep-me.log");
        for p in [&old, &recent, &other] {
            std::fs::write(p, b"x").unwrap();
        }

        let now = Local.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let removed = prune_old_logs(dir.path(), 3, now);

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_prune_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(prune_old_logs(&missing, 3, Local::now()), 0);
    }
}
