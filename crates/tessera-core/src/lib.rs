//! Core types for Tessera
//!
//! Tessera stores tenant-scoped resource files and UDF packages on an object
//! store, a distributed filesystem or local disk, and presents all three as
//! one hierarchical namespace.
//!
//! This crate holds the backend-independent pieces:
//!
//! - [`StorageEntity`]: uniform view of a file or directory from a listing
//! - [`PathResolver`]: canonical per-tenant locations
//! - [`EntityTreeBuilder`]: nested tree from a flat recursive listing
//! - [`StorageError`]: error taxonomy shared by every backend

pub mod entity;
pub mod error;
pub mod path;
pub mod tree;

pub use entity::{ListingScope, ProgramType, ResourceType, StorageEntity, StorageKind};
pub use error::StorageError;
pub use path::{PathResolver, SEPARATOR};
pub use tree::{EntityTreeBuilder, ResourceNode};
