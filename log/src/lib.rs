//! # Logging Library
//!
//! Process-wide logger with leveled, colored console output and an optional
//! rotating file sink. The logger is installed once with [`set_logger`]; the
//! macros are no-ops until then.
use colored::Colorize;
use once_cell::sync::OnceCell;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Submodule containing advanced logger implementations
pub mod logger;

static LOGGER: OnceCell<Arc<dyn Logger>> = OnceCell::new();

/// Sets the global logger instance for the application
///
/// # Returns
///
/// * `Ok(())` if the logger was successfully set
/// * `Err(LogError::AlreadyInitialized)` if a logger has already been installed
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use log::logger::AdvancedLogger;
/// use log::{set_logger, LogLevel};
///
/// let logger = Arc::new(AdvancedLogger::new(LogLevel::Debug, None));
/// set_logger(logger).expect("Failed to initialize logger");
/// ```
pub fn set_logger(logger: Arc<dyn Logger>) -> Result<(), LogError> {
    LOGGER
        .set(logger)
        .map_err(|_| LogError::AlreadyInitialized)
}

/// Retrieves the global logger, if one is set
pub fn logger() -> Option<&'static Arc<dyn Logger>> {
    LOGGER.get()
}

/// Errors that can occur during logger operations
#[derive(Debug)]
pub enum LogError {
    /// Returned when attempting to initialize a logger after one has already been set
    AlreadyInitialized,
    /// Returned when the log file could not be prepared
    Io(std::io::Error),
    /// Returned when a level name is not recognized
    UnknownLevel(String),
}

impl Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::AlreadyInitialized => write!(f, "Logger has already been initialized"),
            LogError::Io(e) => write!(f, "Log file error: {e}"),
            LogError::UnknownLevel(name) => write!(f, "Unknown log level '{name}'"),
        }
    }
}

impl std::error::Error for LogError {}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Io(e)
    }
}

/// Trait that all logger implementations must implement
pub trait Logger: Send + Sync {
    /// Writes a message if `level` passes the current filter
    fn log(&self, level: LogLevel, message: &str);
    /// Sets the minimum logging level that will be output
    fn set_level(&self, level: LogLevel);
    /// Current minimum level
    fn level(&self) -> LogLevel;

    fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::NoLog && level >= self.level()
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
}

/// Logging levels in order of increasing severity.
///
/// `NoLog` sorts above everything, so a logger set to it prints nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Debug information for development purposes
    Debug = 1,
    #[default]
    /// Standard informational messages
    Info = 2,
    /// Warning messages indicating potential issues
    Warning = 3,
    /// Error messages for recoverable failures
    Error = 4,
    /// Critical messages for severe errors that might cause program termination
    Critical = 5,
    /// Special level that suppresses all logging
    NoLog = 6,
}

impl LogLevel {
    /// Returns the string representation of the log level
    pub fn raw_str(&self) -> &'static str {
        match self {
            LogLevel::NoLog => "NOLOG",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warning,
            4 => LogLevel::Error,
            5 => LogLevel::Critical,
            _ => LogLevel::NoLog,
        }
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            "off" | "nolog" | "none" => Ok(LogLevel::NoLog),
            other => Err(LogError::UnknownLevel(other.to_string())),
        }
    }
}

impl Display for LogLevel {
    /// Provides colored text formatting for each log level
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use LogLevel::*;
        let level_str = match self {
            NoLog => String::new(),
            Info => format!("{}", "INFO".blue().bold()),
            Warning => format!("{}", "WARNING".yellow().bold()),
            Error => format!("{}", "ERROR".red().bold()),
            Critical => format!("{}", "CRITICAL".bright_red().bold()),
            Debug => format!("{}", "DEBUG".cyan().bold()),
        };
        write!(f, "{level_str}")
    }
}

/// Logs a message with the specified log level
///
/// # Example
///
/// ```
/// use log::{log, LogLevel};
///
/// log!(LogLevel::Warning, "This is a {} message", "warning");
/// ```
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {{
        if let Some(logger) = $crate::logger() {
            let level = $level;
            if logger.enabled(level) {
                let message = format!($($arg)*);
                logger.log(level, &message);
            }
        }
    }};
}

/// Logs a message at INFO level
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Info, $($arg)*);
    }};
}

/// Logs a message at WARNING level
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Warning, $($arg)*);
    }};
}

/// Logs a message at ERROR level
///
/// # Example
///
/// ```
/// use log::error;
///
/// let err = "connection refused";
/// error!("Failed to open pairing store: {}", err);
/// ```
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Error, $($arg)*);
    }};
}

/// Logs a message at CRITICAL level
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Critical, $($arg)*);
    }};
}

/// Logs a message at DEBUG level
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Debug, $($arg)*);
    }};
}
