//! Backend configuration loading and construction

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_core::{PathResolver, StorageError};
use thiserror::Error;
use tracing::info;

use crate::StorageBackend;
use crate::dfs::{DfsBackend, DfsSettings, InMemoryDfsClient};
use crate::local::LocalBackend;
use crate::object::{InMemoryObjectClient, ObjectStoreBackend, ObjectStoreSettings, S3ObjectClient};

/// Endpoint scheme served by the in-memory clients
pub const MEMORY_SCHEME: &str = "memory://";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::Configuration(err.to_string())
    }
}

/// Which store to use and how to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    ObjectStore(ObjectStoreSettings),
    Dfs(DfsSettings),
    Local { root: PathBuf },
}

/// Top-level storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Upload base path below which tenant roots live
    #[serde(default = "default_base_path")]
    pub base_path: String,
    pub backend: BackendConfig,
}

fn default_base_path() -> String {
    "/tessera".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            backend: BackendConfig::Local {
                root: PathBuf::from("./data/tessera"),
            },
        }
    }
}

impl StorageConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StorageConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Local-disk configuration rooted at `root`
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Local { root: root.into() },
            ..Default::default()
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Path layout derived from `base_path`
    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(&self.base_path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_path.trim().is_empty() {
            return Err(ConfigError::Invalid("base_path must not be empty".to_string()));
        }

        match &self.backend {
            BackendConfig::ObjectStore(settings) => {
                if settings.bucket.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "backend.bucket must not be empty".to_string(),
                    ));
                }
                if settings.page_size == 0 {
                    return Err(ConfigError::Invalid(
                        "backend.page_size must be > 0".to_string(),
                    ));
                }
            }
            BackendConfig::Dfs(settings) => {
                if settings.root_uri.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "backend.root_uri must not be empty".to_string(),
                    ));
                }
            }
            BackendConfig::Local { root } => {
                if root.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "backend.root must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Construct the backend selected by `config`
///
/// Performs the reachability check of the chosen variant, so a returned
/// backend is ready for use. `memory://` endpoints are served by the
/// in-memory clients. Any other object-store endpoint (or none, meaning AWS)
/// goes through [`S3ObjectClient`]. A distributed filesystem needs its client
/// passed to [`DfsBackend::connect`] directly.
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    config.validate()?;
    let resolver = config.resolver();

    let backend: Arc<dyn StorageBackend> = match &config.backend {
        BackendConfig::ObjectStore(settings) => {
            let in_memory = settings
                .endpoint
                .as_deref()
                .is_some_and(|e| e.starts_with(MEMORY_SCHEME));
            if in_memory {
                let client = Arc::new(
                    InMemoryObjectClient::new()
                        .with_bucket(settings.bucket.clone())
                        .with_max_page_size(settings.page_size),
                );
                Arc::new(ObjectStoreBackend::connect(client, settings.clone(), resolver).await?)
            } else {
                let client = Arc::new(S3ObjectClient::connect(settings).await?);
                Arc::new(ObjectStoreBackend::connect(client, settings.clone(), resolver).await?)
            }
        }
        BackendConfig::Dfs(settings) => {
            if !settings.root_uri.starts_with(MEMORY_SCHEME) {
                return Err(StorageError::configuration(format!(
                    "no filesystem client available for `{}`",
                    settings.root_uri
                )));
            }
            let client = Arc::new(InMemoryDfsClient::new());
            Arc::new(DfsBackend::connect(client, settings.clone(), resolver).await?)
        }
        BackendConfig::Local { root } => Arc::new(LocalBackend::open(root.clone(), resolver).await?),
    };

    info!(kind = %backend.storage_kind(), "storage backend opened");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::StorageKind;

    #[test]
    fn test_parse_object_store() {
        let config = StorageConfig::from_toml_str(
            r#"
            base_path = "/base"

            [backend]
            type = "object_store"
            bucket = "res"
            endpoint = "memory://"
            region = "us-east-1"
            page_size = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.resolver().resource_root("t1"), "base/t1/resources/");
        match config.backend {
            BackendConfig::ObjectStore(settings) => {
                assert_eq!(settings.bucket, "res");
                assert_eq!(settings.page_size, 2);
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn test_base_path_defaults() {
        let config = StorageConfig::from_toml_str(
            r#"
            [backend]
            type = "dfs"
            root_uri = "memory://dfs"
            "#,
        )
        .unwrap();
        assert_eq!(config.base_path, "/tessera");
    }

    #[test]
    fn test_rejects_blank_bucket() {
        let result = StorageConfig::from_toml_str(
            r#"
            [backend]
            type = "object_store"
            bucket = "  "
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let result = StorageConfig::from_toml_str(
            r#"
            [backend]
            type = "tape"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StorageConfig::local("/srv/tessera").with_base_path("/data");
        let text = config.to_toml_string().unwrap();
        assert_eq!(StorageConfig::from_toml_str(&text).unwrap(), config);
    }

    #[tokio::test]
    async fn test_open_backend_variants() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let local = open_backend(&StorageConfig::local(temp_dir.path())).await.unwrap();
        assert_eq!(local.storage_kind(), StorageKind::Local);

        let object = StorageConfig {
            base_path: "base".into(),
            backend: BackendConfig::ObjectStore(
                ObjectStoreSettings::new("res").with_endpoint("memory://"),
            ),
        };
        let backend = open_backend(&object).await.unwrap();
        assert_eq!(backend.storage_kind(), StorageKind::ObjectStore);
        assert!(!backend.supports_native_rename());

        let dfs = StorageConfig {
            base_path: "base".into(),
            backend: BackendConfig::Dfs(DfsSettings::new("memory://dfs")),
        };
        assert_eq!(open_backend(&dfs).await.unwrap().storage_kind(), StorageKind::Dfs);
    }

    #[tokio::test]
    async fn test_open_backend_reports_unreachable_endpoint() {
        let config = StorageConfig {
            base_path: "base".into(),
            backend: BackendConfig::ObjectStore(
                ObjectStoreSettings::new("res")
                    .with_endpoint("http://127.0.0.1:1")
                    .with_region("us-east-1")
                    .with_credentials("id", "secret"),
            ),
        };
        let err = open_backend(&config).await.err();
        assert!(matches!(err, Some(StorageError::Service(_))), "{err:?}");
    }

    #[tokio::test]
    async fn test_open_backend_rejects_partial_credentials() {
        let mut settings = ObjectStoreSettings::new("res")
            .with_endpoint("http://127.0.0.1:1")
            .with_region("us-east-1");
        settings.secret_access_key = Some("secret".into());
        let config = StorageConfig {
            base_path: "base".into(),
            backend: BackendConfig::ObjectStore(settings),
        };
        assert!(matches!(
            open_backend(&config).await,
            Err(StorageError::Configuration(_))
        ));
    }
}
