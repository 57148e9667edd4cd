//! Structured logging for the CO2 frame acquisition engine.
//!
//! Provides context-rich logging with a pipeline stage tag, an optional
//! per-file identifier, timestamps, and severity levels. Supports both console
//! output and file-based logging for scheduled runs.
//!
//! Credentials are never passed to any function in this module.

use crate::model::IngestError;
use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Session,
    Listing,
    Select,
    Fetch,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Session => write!(f, "SESSION"),
            Stage::Listing => write!(f, "LIST"),
            Stage::Select => write!(f, "SELECT"),
            Stage::Fetch => write!(f, "FETCH"),
            Stage::Run => write!(f, "RUN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - e.g. a file the archive lists but has not finished publishing
    Expected,
    /// Unexpected failure - indicates archive degradation or a format change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, stage: Stage, item: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let item_part = item.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!("{} {} {}{}: {}", timestamp, level, stage, item_part, message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, item_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, item_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", stage, item_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, stage: Stage, item: Option<&str>, message: &str) {
    if let Ok(slot) = LOGGER.lock() {
        if let Some(logger) = slot.as_ref() {
            logger.log(level, stage, item, message);
        }
    }
}

pub fn info(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Info, stage, item, message);
}

pub fn warn(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Warning, stage, item, message);
}

pub fn error(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Error, stage, item, message);
}

pub fn debug(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Debug, stage, item, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a per-file failure.
///
/// A 404 on a listed file usually means the archive re-processed the day and
/// the listing was stale; decode failures point at a format change.
pub fn classify_fetch_failure(err: &IngestError) -> FailureType {
    match err {
        IngestError::Fetch { reason, .. } if reason.contains("HTTP 404") => FailureType::Expected,
        IngestError::Fetch { reason, .. } if reason.contains("timed out") => FailureType::Unknown,
        IngestError::Fetch { .. } => FailureType::Unexpected,
        IngestError::Decode { .. } => FailureType::Unexpected,
        IngestError::MalformedFilename(_) => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a per-file failure with automatic classification
pub fn log_fetch_failure(path: &str, operation: &str, err: &IngestError) {
    let failure_type = classify_fetch_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(Stage::Fetch, Some(path), &message),
        FailureType::Unexpected => error(Stage::Fetch, Some(path), &message),
        FailureType::Unknown => warn(Stage::Fetch, Some(path), &message),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one invocation's fetch loop
pub fn log_run_summary(selected: usize, successful: usize, failed: usize) {
    let message = format!(
        "Run complete: {}/{} frames delivered, {} failed",
        successful, selected, failed
    );

    if selected == 0 {
        warn(Stage::Run, None, "Run complete: no files selected for the requested month");
    } else if failed == 0 {
        info(Stage::Run, None, &message);
    } else if successful == 0 {
        error(Stage::Run, None, &message);
    } else {
        warn(Stage::Run, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parses_config_spellings() {
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        let missing = IngestError::Fetch { path: "/a".into(), reason: "HTTP 404 Not Found".into() };
        assert_eq!(classify_fetch_failure(&missing), FailureType::Expected);

        let server = IngestError::Fetch { path: "/a".into(), reason: "HTTP 500".into() };
        assert_eq!(classify_fetch_failure(&server), FailureType::Unexpected);

        let timeout = IngestError::Fetch { path: "/a".into(), reason: "request timed out".into() };
        assert_eq!(classify_fetch_failure(&timeout), FailureType::Unknown);

        let decode = IngestError::Decode { path: "/a".into(), reason: "no Data marker".into() };
        assert_eq!(classify_fetch_failure(&decode), FailureType::Unexpected);
    }

    #[test]
    fn test_log_file_receives_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let logger = Logger {
            min_level: LogLevel::Info,
            log_file: Some(path.to_string_lossy().into_owned()),
            console_timestamps: false,
        };
        logger.log(LogLevel::Debug, Stage::Fetch, None, "filtered out");
        logger.log(LogLevel::Warning, Stage::Listing, Some("2021"), "rows not paired");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("filtered out"), "debug entry should be below min level");
        assert!(written.contains("WARN LIST [2021]: rows not paired"), "got: {}", written);
    }
}
