//! Log filter selection and the rolling file sink.
//!
//! The console and the log file share one user filter. Unless the filter was
//! chosen on the command line, the file filter also carries the configured
//! detail directive so filter construction and render summaries from
//! `atrous_core` land in the file even when the console stays at `info`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_FILE_DETAIL_FILTER: &str = "atrous_core=debug";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;

const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "atrous";
const LOG_FILE_SUFFIX: &str = "log";

/// `[logging]` table of config.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when neither the command line nor `RUST_LOG` sets one.
    pub filter: Option<String>,
    /// Write a daily log file under `<data_dir>/logs`.
    pub file: bool,
    /// Appended to the file filter for implicit selections. Empty disables it.
    pub file_detail: String,
    /// Daily files kept on disk. 0 keeps every file.
    pub retention_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            file: true,
            file_detail: DEFAULT_FILE_DETAIL_FILTER.to_string(),
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingInitOptions {
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_log_filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub config: LoggingConfig,
}

/// Where the user filter came from, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    CommandLine,
    Verbosity,
    Environment,
    ConfigFile,
    BuiltIn,
}

impl FilterSource {
    /// Filters picked on the command line are honoured as-is in the file too.
    pub fn is_explicit(self) -> bool {
        matches!(self, Self::CommandLine | Self::Verbosity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilters {
    pub source: FilterSource,
    pub console: String,
    pub file: String,
}

#[derive(Debug)]
pub enum FileSink {
    Rolling {
        dir: PathBuf,
        max_files: Option<usize>,
        appender: RollingFileAppender,
    },
    /// `logging.file = false`.
    Off,
    Unavailable {
        dir: Option<PathBuf>,
        reason: String,
    },
}

#[derive(Debug)]
pub struct LoggingPlan {
    pub filters: LogFilters,
    pub file: FileSink,
}

pub fn plan_logging(options: &LoggingInitOptions) -> LoggingPlan {
    LoggingPlan {
        filters: resolve_filters(options),
        file: open_file_sink(options),
    }
}

pub fn resolve_filters(options: &LoggingInitOptions) -> LogFilters {
    let (source, user) = user_filter(options);
    let detail = options.config.file_detail.trim();
    let file = if source.is_explicit() || detail.is_empty() {
        user.clone()
    } else {
        format!("{user},{detail}")
    };
    LogFilters {
        source,
        console: user,
        file,
    }
}

fn user_filter(options: &LoggingInitOptions) -> (FilterSource, String) {
    let non_empty = |filter: &Option<String>| {
        filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
    };

    if let Some(filter) = non_empty(&options.cli_log_filter) {
        return (FilterSource::CommandLine, filter);
    }
    match options.verbose {
        0 => {}
        1 => return (FilterSource::Verbosity, "debug".to_string()),
        _ => return (FilterSource::Verbosity, "trace".to_string()),
    }
    if let Some(filter) = non_empty(&options.rust_log_env) {
        return (FilterSource::Environment, filter);
    }
    if let Some(filter) = non_empty(&options.config.filter) {
        return (FilterSource::ConfigFile, filter);
    }
    (FilterSource::BuiltIn, DEFAULT_LOG_FILTER.to_string())
}

pub fn open_file_sink(options: &LoggingInitOptions) -> FileSink {
    if !options.config.file {
        return FileSink::Off;
    }
    let Some(data_dir) = options.data_dir.as_deref() else {
        return FileSink::Unavailable {
            dir: None,
            reason: "no data directory".to_string(),
        };
    };
    let dir = log_dir(data_dir);
    if let Err(error) = fs::create_dir_all(&dir) {
        return FileSink::Unavailable {
            dir: Some(dir),
            reason: format!("failed to create log directory: {error}"),
        };
    }

    let max_files = Some(options.config.retention_files).filter(|&n| n > 0);
    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX);
    if let Some(n) = max_files {
        builder = builder.max_log_files(n);
    }

    match builder.build(&dir) {
        Ok(appender) => FileSink::Rolling {
            dir,
            max_files,
            appender,
        },
        Err(error) => FileSink::Unavailable {
            dir: Some(dir),
            reason: format!("failed to open rolling log file: {error}"),
        },
    }
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_DIR_NAME)
}
