//! Tessera Resources - consistency layer over tenant storage
//!
//! [`ResourceConsistencyGuard`] sits between callers and a
//! [`tessera_storage::StorageBackend`]. It keeps resource names unique,
//! refuses deletes that would break live references, applies rename and
//! replace semantics, and propagates file size changes to every tracked
//! ancestor directory.
//!
//! The bookkeeping it maintains lives behind two traits so that any
//! persistence layer can provide it:
//!
//! - [`ReferenceIndex`]: which task definitions and UDF functions point at a
//!   resource
//! - [`DirectorySizeStore`]: recorded directory sizes
//!
//! In-memory implementations of both are included.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_resources::*;
//!
//! let guard = ResourceConsistencyGuard::new(
//!     backend,
//!     Arc::new(InMemoryReferenceIndex::new()),
//!     Arc::new(InMemoryDirectorySizeStore::new()),
//! );
//! let actor = Actor::user(1, "alice", "t1");
//! guard.create_directory(&actor, "scripts", ResourceType::File, "").await?;
//! ```

pub mod access;
pub mod error;
pub mod guard;
pub mod page;
pub mod reference;
pub mod size;

pub use access::{Actor, AllowAll, PermissionCheck, ResourceOperation, StaticPermissions};
pub use error::ResourceError;
pub use guard::{DEFAULT_MAX_FULL_NAME_LEN, DeleteReport, GuardConfig, ResourceConsistencyGuard};
pub use page::PageInfo;
pub use reference::{
    BlockingReference, InMemoryReferenceIndex, ReferenceHolder, ReferenceIndex, TaskDefinition,
    UdfFunction,
};
pub use size::{DirectorySizeStore, InMemoryDirectorySizeStore, propagate_size};

pub use tessera_core::{ResourceNode, ResourceType, StorageEntity};
