//
use crate::{LogError, LogLevel, Logger, set_logger};
use dirs::data_dir;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Console logger with an optional file sink.
///
/// A previous log file at the same path is archived to a timestamped `.7z`
/// before the new one is created.
pub struct AdvancedLogger {
    level: AtomicU8,
    log_file: Option<Mutex<File>>,
}

impl AdvancedLogger {
    pub fn new(level: LogLevel, log_file: Option<PathBuf>) -> Self {
        let log_file = log_file.and_then(|path| match prepare_log_file(&path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                eprintln!("Failed to create log file {}: {e}", path.display());
                None
            }
        });

        AdvancedLogger {
            level: AtomicU8::new(level as u8),
            log_file,
        }
    }

    /// Installs a logger writing to `<data_dir>/<app>/latest.log`.
    pub fn init(app: &str, log_level: LogLevel) -> Result<(), LogError> {
        let path = data_dir().map(|dir| dir.join(app).join("latest.log"));
        let logger = Arc::new(AdvancedLogger::new(log_level, path));

        set_logger(logger)?;

        Ok(())
    }
}

fn archive_previous(file: &Path) {
    let mut renamed_path = file.to_path_buf();
    renamed_path.set_file_name(format!(
        "{}.log",
        chrono::Local::now().format("%d%m%Y_%H%M%S")
    ));

    if let Err(e) = std::fs::rename(file, &renamed_path) {
        eprintln!("Failed to rename existing log file: {e}");
        return;
    }

    let mut compressed_file = renamed_path.clone();
    compressed_file.set_extension("7z");

    match sevenz_rust2::compress_to_path(&renamed_path, &compressed_file) {
        Ok(()) => {
            std::fs::remove_file(&renamed_path)
                .unwrap_or_else(|e| eprintln!("Failed to remove old log file: {e}"));
        }
        // Keep the plain copy rather than lose it.
        Err(e) => eprintln!("Failed to compress file: {e}"),
    }
}

fn prepare_log_file(file: &Path) -> std::io::Result<File> {
    if file.exists() {
        archive_previous(file);
    }

    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(file)
}

impl Logger for AdvancedLogger {
    fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }

        let timestamp = chrono::Local::now().format("%d%m%Y %H:%M:%S");
        println!("{timestamp} - [{level}] - {message}");

        if let Some(file) = &self.log_file {
            let mut file = match file.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            writeln!(file, "{} - [{}] - {}", timestamp, level.raw_str(), message)
                .unwrap_or_else(|e| eprintln!("Failed to write to log file: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_and_rotation() {
        let dir = std::env::temp_dir().join(format!("log-test-{}", std::process::id()));
        let path = dir.join("latest.log");

        let logger = AdvancedLogger::new(LogLevel::Info, Some(path.clone()));
        logger.debug("hidden");
        logger.warning("kept");
        drop(logger);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[WARNING] - kept"));
        assert!(!content.contains("hidden"));

        // Second logger archives the first file and starts empty.
        let logger = AdvancedLogger::new(LogLevel::Info, Some(path.clone()));
        drop(logger);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        std::fs::remove_dir_all(&dir).ok();
    }
}
