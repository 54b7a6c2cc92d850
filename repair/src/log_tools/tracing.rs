use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use error_stack::ResultExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::Error;
use crate::error::Result;

const LOG_FILE_PREFIX: &str = "rem-repair";
const LOG_FILE_SUFFIX: &str = "log";
const MAX_LOG_FILES: usize = 60;

/// Represents tracing levels selectable from the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for TracingLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "Invalid tracing level '{s}'. Valid levels are: error, warn, info, debug, trace"
            )),
        }
    }
}

impl TracingLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Filter for this level; `RUST_LOG` wins when set
    fn env_filter(self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.as_str()))
    }

    /// Initialize tracing with a stderr layer and a daily rotated file layer.
    ///
    /// The returned guard flushes the file writer when dropped, so it has to
    /// live until the process is done logging.
    pub fn init(self, log_dir: &Path) -> Result<WorkerGuard> {
        std::fs::create_dir_all(log_dir)
            .change_context(Error::failed_to("create log directory", log_dir.display()))?;

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix(LOG_FILE_SUFFIX)
            .max_log_files(MAX_LOG_FILES)
            .build(log_dir)
            .change_context(Error::Configuration("cannot build log file appender".to_string()))
            .attach(format!("Log directory: {}", log_dir.display()))?;
        let (file_writer, guard) = tracing_appender::non_blocking(appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(self.env_filter());

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .with_filter(self.env_filter());

        Registry::default()
            .with(file_layer)
            .with(stderr_layer)
            .try_init()
            .change_context(Error::Configuration(
                "tracing subscriber already installed".to_string(),
            ))?;

        Ok(guard)
    }
}

/// Directory holding rotated log files
pub fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("rem-repair").join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("warn".parse::<TracingLevel>(), Ok(TracingLevel::Warn));
        assert_eq!("DEBUG".parse::<TracingLevel>(), Ok(TracingLevel::Debug));
        assert!("verbose".parse::<TracingLevel>().is_err());
    }

    #[test]
    fn test_round_trip_through_as_str() {
        for level in [
            TracingLevel::Error,
            TracingLevel::Warn,
            TracingLevel::Info,
            TracingLevel::Debug,
            TracingLevel::Trace,
        ] {
            assert_eq!(level.as_str().parse::<TracingLevel>(), Ok(level));
        }
    }
}
