use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tessera_core::{ProgramType, ResourceType};
use tessera_logging::LogConfig;
use tessera_storage::StorageConfig;

#[derive(Parser, Debug)]
#[command(name = "tessera", about = "Tenant-scoped resource storage", version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, env = "TESSERA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Tenant to operate on
    #[arg(long, short, default_value = "default")]
    pub tenant: String,

    /// Operate on UDF packages instead of file resources
    #[arg(long)]
    pub udf: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the tenant's resource and UDF roots
    Init,
    /// List a directory, relative to the tenant root
    Ls {
        path: Option<String>,
        /// Keep entries whose name contains this
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the tree below a directory
    Tree { path: Option<String> },
    /// Show one resource as JSON
    Stat { path: String },
    /// Create a directory
    Mkdir {
        name: String,
        /// Parent directory, relative to the tenant root
        #[arg(long = "in")]
        parent: Option<String>,
    },
    /// Upload a local file
    Put {
        local: PathBuf,
        /// Resource name, defaults to the local file name
        #[arg(long)]
        name: Option<String>,
        /// Target directory, relative to the tenant root
        #[arg(long = "in")]
        parent: Option<String>,
    },
    /// Download a file into a local directory
    Get { path: String, dir: PathBuf },
    /// Print lines of a text resource
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Delete a file or a directory tree
    Rm { path: String },
    /// Rename a resource within its directory
    Mv { path: String, new_name: String },
    /// Tree of resources a program can load (java, scala, python, sql)
    Loadable { program: ProgramType },
    /// Write text to a file, creating missing directories on the way
    Write { path: String, content: String },
}

impl Cli {
    pub fn resource_type(&self) -> ResourceType {
        if self.udf {
            ResourceType::Udf
        } else {
            ResourceType::File
        }
    }

    /// Storage and logging configuration, from `--config` or defaults
    pub fn load_config(&self) -> anyhow::Result<CliConfig> {
        let mut config = match &self.config {
            Some(path) => CliConfig::load(path)?,
            None => CliConfig::default(),
        };
        if let Some(level) = &self.log_level {
            config.logging.default_level = level.clone();
        }
        // Command output owns stdout
        config.logging.console.stderr = true;
        Ok(config)
    }
}

/// Logging section of the configuration file
#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    #[serde(default)]
    logging: Option<LogConfig>,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub storage: StorageConfig,
    pub logging: LogConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            logging: quiet_logging(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Storage settings at the top level, logging under `[logging]`
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let storage = StorageConfig::from_toml_str(content)?;
        let section: LoggingSection = toml::from_str(content)?;
        Ok(Self {
            storage,
            logging: section.logging.unwrap_or_else(quiet_logging),
        })
    }
}

fn quiet_logging() -> LogConfig {
    LogConfig {
        default_level: "warn".to_string(),
        ..LogConfig::default()
    }
}
