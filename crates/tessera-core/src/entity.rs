//! Storage entities: the uniform view of files and directories returned by every backend

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::{difference, directory_alias, file_alias};

/// Category of a tenant resource, selecting which root it lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceType {
    /// Ordinary resource files (scripts, jars, configs)
    File,
    /// User-defined function packages
    Udf,
}

impl ResourceType {
    /// Directory name of this category below a tenant root
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceType::File => "resources",
            ResourceType::Udf => "udfs",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::File => write!(f, "FILE"),
            ResourceType::Udf => write!(f, "UDF"),
        }
    }
}

/// Language of a task program, selecting which resource files it can load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProgramType {
    Java,
    Scala,
    Python,
    Sql,
}

impl ProgramType {
    /// File extension of loadable resources; jars unless the program is Python
    pub fn resource_suffix(&self) -> &'static str {
        match self {
            ProgramType::Python => "py",
            ProgramType::Java | ProgramType::Scala | ProgramType::Sql => "jar",
        }
    }
}

impl FromStr for ProgramType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JAVA" => Ok(ProgramType::Java),
            "SCALA" => Ok(ProgramType::Scala),
            "PYTHON" => Ok(ProgramType::Python),
            "SQL" => Ok(ProgramType::Sql),
            other => Err(format!("unknown program type {other}")),
        }
    }
}

/// Which backend family a store belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Flat key/value object store with simulated directories
    ObjectStore,
    /// Distributed filesystem with native directories
    Dfs,
    /// Local disk
    Local,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::ObjectStore => write!(f, "object_store"),
            StorageKind::Dfs => write!(f, "dfs"),
            StorageKind::Local => write!(f, "local"),
        }
    }
}

/// A file or directory as seen through a backend listing
///
/// Entities are produced fresh on every listing and never updated in place.
/// Directory `full_name`s always end with the path separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntity {
    /// Display name (last path segment)
    pub alias: String,
    /// Path relative to the tenant's resource root
    pub file_name: String,
    /// Absolute key
    pub full_name: String,
    /// Absolute key of the directory this entity was listed under
    #[serde(rename = "pfullName")]
    pub parent_full_name: String,
    pub is_directory: bool,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Size in bytes, zero for directories
    pub size: u64,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub owner_tenant: String,
}

impl StorageEntity {
    /// Extension of the entity's alias, if any
    pub fn suffix(&self) -> Option<&str> {
        if self.is_directory {
            return None;
        }
        self.alias
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// Context shared by every entity produced from one listing call
///
/// Holds the directory being listed, the tenant's root for the resource type
/// (used to compute relative `file_name`s) and the owning tenant.
#[derive(Debug, Clone, Copy)]
pub struct ListingScope<'a> {
    pub parent: &'a str,
    pub default_path: &'a str,
    pub tenant: &'a str,
    pub resource_type: ResourceType,
}

impl<'a> ListingScope<'a> {
    pub fn new(
        parent: &'a str,
        default_path: &'a str,
        tenant: &'a str,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            parent,
            default_path,
            tenant,
            resource_type,
        }
    }

    /// Same scope re-rooted at another parent directory
    pub fn under(&self, parent: &'a str) -> Self {
        Self { parent, ..*self }
    }

    /// Build a file entity for `key`
    pub fn file(&self, key: &str, size: u64, modified: Option<DateTime<Utc>>) -> StorageEntity {
        StorageEntity {
            alias: file_alias(key).to_string(),
            file_name: difference(self.default_path, key).to_string(),
            full_name: key.to_string(),
            parent_full_name: self.parent.to_string(),
            is_directory: false,
            resource_type: self.resource_type,
            size,
            create_time: modified,
            update_time: modified,
            owner_tenant: self.tenant.to_string(),
        }
    }

    /// Build a directory entity for `prefix` (which must end with the separator)
    pub fn directory(&self, prefix: &str, modified: Option<DateTime<Utc>>) -> StorageEntity {
        StorageEntity {
            alias: directory_alias(prefix).to_string(),
            file_name: difference(self.default_path, prefix).to_string(),
            full_name: prefix.to_string(),
            parent_full_name: self.parent.to_string(),
            is_directory: true,
            resource_type: self.resource_type,
            size: 0,
            create_time: modified,
            update_time: modified,
            owner_tenant: self.tenant.to_string(),
        }
    }
}
