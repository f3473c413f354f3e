//! Behaviour every backend variant must share
//!
//! Each scenario runs against the object store, the distributed filesystem
//! and local disk, so callers can treat the three interchangeably.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tessera_core::{PathResolver, ResourceType, StorageError, StorageKind};
use tessera_storage::dfs::DfsSettings;
use tessera_storage::{
    DfsBackend, InMemoryDfsClient, InMemoryObjectClient, LocalBackend, ObjectStoreBackend,
    ObjectStoreSettings, StorageBackend,
};
use tokio_util::sync::CancellationToken;

const ROOT: &str = "base/t1/resources/";

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    backend: Arc<dyn StorageBackend>,
    scratch: TempDir,
}

impl Fixture {
    async fn all() -> Vec<Fixture> {
        let resolver = PathResolver::new("base");

        let objects = Arc::new(InMemoryObjectClient::new().with_bucket("res").with_max_page_size(2));
        let object_store = ObjectStoreBackend::connect(
            objects,
            ObjectStoreSettings::new("res").with_page_size(2),
            resolver.clone(),
        )
        .await
        .unwrap();

        let dfs = DfsBackend::connect(
            Arc::new(InMemoryDfsClient::new()),
            DfsSettings::new("memory://dfs"),
            resolver.clone(),
        )
        .await
        .unwrap();

        let local_dir = TempDir::new().unwrap();
        let local = LocalBackend::open(local_dir.path().join("store"), resolver)
            .await
            .unwrap();

        vec![
            Fixture {
                backend: Arc::new(object_store),
                scratch: TempDir::new().unwrap(),
            },
            Fixture {
                backend: Arc::new(dfs),
                scratch: TempDir::new().unwrap(),
            },
            Fixture {
                backend: Arc::new(local),
                scratch: local_dir,
            },
        ]
    }

    async fn put(&self, key: &str, body: &str) {
        let src: PathBuf = self.scratch.path().join("upload.tmp");
        tokio::fs::write(&src, body).await.unwrap();
        assert!(
            self.backend.upload("t1", &src, key, true, true).await.unwrap(),
            "upload of {key} failed on {}",
            self.backend.storage_kind()
        );
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// Tenant roots are created and end with the separator
#[tokio::test]
async fn test_tenant_roots() {
    for fx in Fixture::all().await {
        let resolver = fx.backend.resolver();
        assert_eq!(resolver.resource_root("t1"), ROOT);

        assert!(fx.backend.create_tenant_dirs("t1").await.unwrap());
        assert!(fx.backend.exists(ROOT).await.unwrap());
        assert!(fx.backend.exists("base/t1/udfs/").await.unwrap());
    }
}

/// Creating a directory twice succeeds both times and changes nothing the second time
#[tokio::test]
async fn test_mkdir_is_idempotent() {
    for fx in Fixture::all().await {
        let kind = fx.backend.storage_kind();
        assert!(fx.backend.mkdir("t1", "base/t1/resources/sub").await.unwrap(), "{kind}");
        let first = fx
            .backend
            .list_recursive(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();

        assert!(fx.backend.mkdir("t1", "base/t1/resources/sub").await.unwrap(), "{kind}");
        let second = fx
            .backend
            .list_recursive(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();

        assert_eq!(first.len(), 1, "{kind}");
        assert_eq!(first, second, "{kind}");
        assert!(fx.backend.exists("base/t1/resources/sub/").await.unwrap());
    }
}

/// Downloaded bytes are identical to the uploaded ones
#[tokio::test]
async fn test_upload_download_round_trip() {
    let body: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    for fx in Fixture::all().await {
        let kind = fx.backend.storage_kind();
        let src = fx.scratch.path().join("payload.bin");
        tokio::fs::write(&src, &body).await.unwrap();

        assert!(fx
            .backend
            .upload("t1", &src, "base/t1/resources/data/payload.bin", false, true)
            .await
            .unwrap());
        assert!(src.exists(), "{kind}");

        let out = fx.scratch.path().join("downloads/payload.bin");
        fx.backend
            .download("t1", "base/t1/resources/data/payload.bin", &out, false, true)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap(), body, "{kind}");
    }
}

/// Downloading an absent key fails as not found
#[tokio::test]
async fn test_download_of_missing_key() {
    for fx in Fixture::all().await {
        let out = fx.scratch.path().join("nothing");
        let result = fx
            .backend
            .download("t1", "base/t1/resources/nothing", &out, false, true)
            .await;
        assert!(
            matches!(result, Err(StorageError::NotFound(_))),
            "{}",
            fx.backend.storage_kind()
        );
    }
}

/// One file and one directory at the root list as two entities
#[tokio::test]
async fn test_one_level_listing() {
    for fx in Fixture::all().await {
        fx.backend.create_tenant_dirs("t1").await.unwrap();
        fx.put("base/t1/resources/x.txt", "hello").await;
        fx.backend.mkdir("t1", "base/t1/resources/sub").await.unwrap();

        let mut entities = fx
            .backend
            .list_one_level(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        entities.sort_by(|a, b| a.full_name.cmp(&b.full_name));

        let kind = fx.backend.storage_kind();
        assert_eq!(entities.len(), 2, "{kind}");
        assert_eq!(entities[0].alias, "sub", "{kind}");
        assert!(entities[0].is_directory);
        assert_eq!(entities[1].alias, "x.txt", "{kind}");
        assert_eq!(entities[1].size, 5, "{kind}");
        assert!(entities.iter().all(|e| e.parent_full_name == ROOT));
    }
}

/// Recursive listing reaches every level and a batch delete of it empties the tree
#[tokio::test]
async fn test_recursive_listing_then_batch_delete() {
    for fx in Fixture::all().await {
        fx.backend.mkdir("t1", "base/t1/resources/a").await.unwrap();
        fx.put("base/t1/resources/a/x.txt", "x").await;
        fx.put("base/t1/resources/a/y.txt", "y").await;
        fx.put("base/t1/resources/a/deep/z.txt", "z").await;

        let entities = fx
            .backend
            .list_recursive(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        let kind = fx.backend.storage_kind();
        assert_eq!(entities.len(), 5, "{kind}");

        let mut keys: Vec<String> = entities.iter().map(|e| e.full_name.clone()).collect();
        keys.push("base/t1/resources/a/".to_string());
        assert!(fx.backend.delete_batch(&keys).await.unwrap());

        assert!(
            fx.backend
                .list_keys_under_prefix("base/t1/resources/a")
                .await
                .unwrap()
                .is_empty(),
            "{kind}"
        );
    }
}

/// A missing path is reported as not found
#[tokio::test]
async fn test_status_of_missing_path() {
    for fx in Fixture::all().await {
        let result = fx
            .backend
            .get_status("base/t1/resources/none.txt", ROOT, "t1", ResourceType::File)
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}

/// A cancelled walk stops before listing anything
#[tokio::test]
async fn test_cancelled_recursive_listing() {
    for fx in Fixture::all().await {
        fx.put("base/t1/resources/a/x.txt", "x").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = fx
            .backend
            .list_recursive_until(ROOT, ROOT, "t1", ResourceType::File, &cancel)
            .await;
        assert!(matches!(result, Err(StorageError::Cancelled(_))));
    }
}

/// Renaming a file is copy-then-delete on every variant
#[tokio::test]
async fn test_file_rename() {
    for fx in Fixture::all().await {
        fx.put("base/t1/resources/old.sh", "echo").await;

        assert!(fx
            .backend
            .copy("base/t1/resources/old.sh", "base/t1/resources/new.sh", true, true)
            .await
            .unwrap());

        assert!(!fx.backend.exists("base/t1/resources/old.sh").await.unwrap());
        let lines = fx.backend.read_lines("base/t1/resources/new.sh", 0, 10).await.unwrap();
        assert_eq!(lines, vec!["echo"]);
    }
}

/// A failed overwriting copy leaves the existing target alone
#[tokio::test]
async fn test_copy_from_missing_source_keeps_target() {
    for fx in Fixture::all().await {
        let kind = fx.backend.storage_kind();
        fx.put("base/t1/resources/keep.txt", "keep").await;

        assert!(!fx
            .backend
            .copy("base/t1/resources/missing.txt", "base/t1/resources/keep.txt", true, true)
            .await
            .unwrap(), "{kind}");

        let lines = fx.backend.read_lines("base/t1/resources/keep.txt", 0, 10).await.unwrap();
        assert_eq!(lines, vec!["keep"], "{kind}");
    }
}

/// Directory renames move children only where the store renames natively
#[tokio::test]
async fn test_directory_rename_capability() {
    for fx in Fixture::all().await {
        fx.put("base/t1/resources/d/child.txt", "c").await;
        fx.backend.mkdir("t1", "base/t1/resources/d").await.unwrap();

        fx.backend
            .copy("base/t1/resources/d/", "base/t1/resources/e/", true, true)
            .await
            .unwrap();

        let moved = fx.backend.exists("base/t1/resources/e/child.txt").await.unwrap();
        match fx.backend.storage_kind() {
            StorageKind::ObjectStore => assert!(!moved),
            StorageKind::Dfs | StorageKind::Local => assert!(moved),
        }
        assert_eq!(moved, fx.backend.supports_native_rename());
    }
}

/// Removing a tenant clears both roots
#[tokio::test]
async fn test_delete_tenant() {
    for fx in Fixture::all().await {
        fx.backend.create_tenant_dirs("t1").await.unwrap();
        fx.put("base/t1/udfs/f.jar", "jar").await;

        assert!(fx.backend.delete_tenant("t1").await.unwrap());
        assert!(!fx.backend.exists("base/t1/udfs/f.jar").await.unwrap());
        assert!(!fx.backend.exists(ROOT).await.unwrap());
    }
}

/// A released backend refuses further work
#[tokio::test]
async fn test_shutdown_is_final() {
    for fx in Fixture::all().await {
        fx.put("base/t1/resources/x.txt", "x").await;
        fx.backend.shutdown().await.unwrap();

        let kind = fx.backend.storage_kind();
        assert!(
            matches!(fx.backend.exists(ROOT).await, Err(StorageError::ShutDown)),
            "{kind}"
        );
        assert!(
            matches!(
                fx.backend.delete("base/t1/resources/x.txt", false).await,
                Err(StorageError::ShutDown)
            ),
            "{kind}"
        );
    }
}
