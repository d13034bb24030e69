use crate::paths::default_logs_dir;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber: stderr plus a per-run file under the logs dir.
///
/// `RUST_LOG` takes precedence over `verbose`. Returns the log file path when one
/// could be opened. Calling this twice keeps the first subscriber.
pub fn init(verbose: bool) -> Option<PathBuf> {
    init_in(&default_logs_dir(), verbose)
}

pub fn init_in(logs_dir: &Path, verbose: bool) -> Option<PathBuf> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = open_log_file(logs_dir);
    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    let file_layer = log_file.map(|(_, file)| {
        fmt::layer()
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(Mutex::new(file))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    log_path
}

fn open_log_file(logs_dir: &Path) -> Option<(PathBuf, File)> {
    std::fs::create_dir_all(logs_dir).ok()?;
    let path = logs_dir.join(log_file_name(Local::now()));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()?;
    Some((path, file))
}

fn log_file_name(now: chrono::DateTime<Local>) -> String {
    format!("screencal_{}.log", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::{log_file_name, open_log_file};
    use chrono::{Local, TimeZone};
    use tempfile::tempdir;

    #[test]
    fn log_file_name_uses_timestamp() {
        let now = Local
            .with_ymd_and_hms(2024, 11, 5, 9, 3, 7)
            .single()
            .expect("valid local time");
        assert_eq!(log_file_name(now), "screencal_20241105_090307.log");
    }

    #[test]
    fn creates_log_directory() {
        let temp = tempdir().expect("tempdir");
        let logs = temp.path().join("logs");
        let (path, _file) = open_log_file(&logs).expect("log file opens");
        assert!(path.starts_with(&logs));
        assert!(path.exists());
    }
}
