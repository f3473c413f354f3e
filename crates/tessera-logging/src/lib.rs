//! Structured logging for Tessera
//!
//! JSONL to the console by default, optionally mirrored to rotating files,
//! with the active tenant attached to every span.
//!
//! ```ignore
//! use tessera_logging::{LogConfig, TesseraSubscriberBuilder};
//!
//! let _guard = TesseraSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```
//!
//! Use [`TenantContextGuard`] to scope work to a tenant:
//!
//! ```ignore
//! let _ctx = TenantContextGuard::new("t1");
//! tracing::info!("listing resources");
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{TenantContextData, TenantContextGuard};
pub use layers::{TenantContextExtension, TenantContextLayer, jsonl_layer};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Log appender error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("Subscriber already installed: {0}")]
    Init(#[from] TryInitError),
}

/// Builder for the global Tessera subscriber
pub struct TesseraSubscriberBuilder {
    config: LogConfig,
}

impl TesseraSubscriberBuilder {
    /// JSONL output to the console at `info`
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Filter from RUST_LOG, else the configured level plus directives
    fn env_filter(&self) -> Result<EnvFilter, LogError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut filter = EnvFilter::try_new(&self.config.default_level)?;
        for directive in &self.config.directives {
            filter = filter.add_directive(directive.parse()?);
        }
        Ok(filter)
    }

    /// Install the subscriber globally
    ///
    /// With file output enabled the returned guard flushes the writer on
    /// drop and must be held for the life of the program.
    pub fn init(self) -> Result<Option<WorkerGuard>, LogError> {
        let filter = self.env_filter()?;
        let console = &self.config.console;
        let jsonl = &self.config.jsonl;

        let pretty_console = (console.enabled && console.pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(console.ansi)
                .with_target(true)
                .with_writer(console_writer(console))
        });
        let json_console = (console.enabled && !console.pretty)
            .then(|| jsonl_layer(console_writer(console), jsonl));

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                (Some(jsonl_layer(writer, jsonl)), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(filter)
            .with(TenantContextLayer::new())
            .with(pretty_console)
            .with(json_console)
            .with(file_layer)
            .try_init()?;
        Ok(guard)
    }
}

impl Default for TesseraSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn console_writer(config: &ConsoleConfig) -> BoxMakeWriter {
    if config.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    }
}

/// Non-blocking writer for the configured log file
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let file = File::create(config.directory.join(format!("{}.log", config.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// JSONL to the console at `info`
pub fn init_default() -> Result<(), LogError> {
    TesseraSubscriberBuilder::new().init().map(|_| ())
}

/// Verbose, pretty console output
pub fn init_development() -> Result<(), LogError> {
    TesseraSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .map(|_| ())
}

/// Warnings only; a subscriber installed earlier is left in place
pub fn init_testing() {
    let _ = TesseraSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_jsonl() {
        let builder = TesseraSubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = TesseraSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false);
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
    }

    #[test]
    fn test_bad_directive_is_reported() {
        let mut config = LogConfig::default();
        config.directives.push("tessera_storage=loud".to_string());
        let builder = TesseraSubscriberBuilder::new().with_config(config);
        // RUST_LOG takes precedence when set
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(builder.env_filter(), Err(LogError::Filter(_))));
        }
    }

    #[test]
    fn test_single_file_writer_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = FileConfig {
            directory: dir.path().join("logs"),
            rotation: RotationStrategy::Never,
            ..FileConfig::default()
        };
        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(dir.path().join("logs/tessera.log").exists());
    }
}
