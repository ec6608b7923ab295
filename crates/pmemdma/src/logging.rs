//! Diagnostics for the CLI. Everything goes to stderr; stdout carries only
//! command output so `--format json` stays machine-readable.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One compact line per event.
    Text,
    /// One JSON object per event, with event fields at the top level.
    Json,
}

/// Most to least severe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogSettings {
    /// Install the global subscriber. Returns false if one was already set.
    ///
    /// Thread names are kept in text output: transfers from different
    /// contexts run on different threads in `bench` and `selftest`.
    pub fn install(self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(self.level.filter())
            .with_ansi(false)
            .with_target(false);

        match self.format {
            LogFormat::Text => builder.compact().with_thread_names(true).try_init().is_ok(),
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .try_init()
                .is_ok(),
        }
    }
}
