use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Configuration for the run's tracing subscriber
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_path: PathBuf,
    /// Rotated copies of previous logs to keep
    pub n_logs: usize,
    pub console_level: LevelFilter,
    /// Emit console output as JSON lines
    pub json: bool,
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Shift `log` to `log.1`, `log.1` to `log.2` and so on, keeping at most `n_logs`
/// backups. With `n_logs == 0` the previous log is removed.
pub fn rotate_log(path: &Path, n_logs: usize) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if n_logs == 0 {
        return std::fs::remove_file(path);
    }
    for n in (1..n_logs).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            std::fs::rename(&from, backup_path(path, n + 1))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1))
}

/// Rotate the previous log and install the global subscriber: every record at DEBUG and
/// above goes to the log file, the console gets `console_level` and above on stderr.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    if let Some(parent) = config.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    rotate_log(&config.log_path, config.n_logs)
        .with_context(|| format!("Failed to rotate {}", config.log_path.display()))?;
    let file = File::create(&config.log_path)
        .with_context(|| format!("Failed to create {}", config.log_path.display()))?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::DEBUG);
    // WHY: Option layers keep one concrete subscriber type for both console formats
    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(config.console_level)
    });
    let text_layer = (!config.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(config.console_level)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("run.log");
        std::fs::write(&log, "third").unwrap();
        std::fs::write(backup_path(&log, 1), "second").unwrap();
        std::fs::write(backup_path(&log, 2), "first").unwrap();

        rotate_log(&log, 2).unwrap();
        assert!(!log.exists());
        assert_eq!(read(&backup_path(&log, 1)), "third");
        assert_eq!(read(&backup_path(&log, 2)), "second");
        assert!(!backup_path(&log, 3).exists());
    }

    #[test]
    fn test_rotation_without_previous_log() {
        let dir = TempDir::new().unwrap();
        rotate_log(&dir.path().join("absent.log"), 10).unwrap();
    }

    #[test]
    fn test_zero_backups_removes_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("run.log");
        std::fs::write(&log, "old").unwrap();
        rotate_log(&log, 0).unwrap();
        assert!(!log.exists());
        assert!(!backup_path(&log, 1).exists());
    }

    #[test]
    fn test_backup_naming() {
        assert_eq!(
            backup_path(Path::new("logs/out.log"), 3),
            PathBuf::from("logs/out.log.3")
        );
    }
}
