//! Tenant path layout and key helpers
//!
//! All keys use `/` as separator. Directory keys end with it; file keys never do.
//!
//! ```text
//! <base>/<tenant>/resources/...   FILE resources
//! <base>/<tenant>/udfs/...        UDF packages
//! ```

use crate::entity::ResourceType;

/// Path separator shared by every backend
pub const SEPARATOR: char = '/';

/// Computes the canonical storage locations for a tenant
///
/// Pure and infallible. Callers reject path traversal before joining
/// user-supplied names (see [`is_traversal`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    base: String,
}

impl PathResolver {
    /// Create a resolver for the configured upload base path
    ///
    /// Leading and trailing separators are dropped, so `/data` and `data/`
    /// resolve identically. A base of `/` places tenants at the store root.
    pub fn new(base_path: impl AsRef<str>) -> Self {
        Self {
            base: base_path.as_ref().trim_matches(SEPARATOR).to_string(),
        }
    }

    /// Normalised base path, without separators at either end
    pub fn base(&self) -> &str {
        &self.base
    }

    /// `<base>/<tenant>/`
    pub fn tenant_root(&self, tenant: &str) -> String {
        if self.base.is_empty() {
            format!("{tenant}/")
        } else {
            format!("{}/{tenant}/", self.base)
        }
    }

    /// `<base>/<tenant>/resources/`
    pub fn resource_root(&self, tenant: &str) -> String {
        self.dir_for(ResourceType::File, tenant)
    }

    /// `<base>/<tenant>/udfs/`
    pub fn udf_root(&self, tenant: &str) -> String {
        self.dir_for(ResourceType::Udf, tenant)
    }

    /// Root directory of `tenant` for the given resource type
    pub fn dir_for(&self, resource_type: ResourceType, tenant: &str) -> String {
        format!("{}{}/", self.tenant_root(tenant), resource_type.dir_name())
    }

    /// Full key of a FILE resource named relative to the tenant's resource root
    pub fn resource_file_name(&self, tenant: &str, name: &str) -> String {
        self.file_name(ResourceType::File, tenant, name)
    }

    /// Full key of a UDF package named relative to the tenant's UDF root
    pub fn udf_file_name(&self, tenant: &str, name: &str) -> String {
        self.file_name(ResourceType::Udf, tenant, name)
    }

    /// Join `name` below the tenant's root for `resource_type`
    ///
    /// One leading separator on `name` is ignored.
    pub fn file_name(&self, resource_type: ResourceType, tenant: &str, name: &str) -> String {
        let name = name.strip_prefix(SEPARATOR).unwrap_or(name);
        format!("{}{name}", self.dir_for(resource_type, tenant))
    }

    /// Tenant that owns `full_name`, if the key lies below this resolver's base
    pub fn tenant_of<'a>(&self, full_name: &'a str) -> Option<&'a str> {
        let rest = if self.base.is_empty() {
            full_name
        } else {
            full_name
                .strip_prefix(self.base.as_str())?
                .strip_prefix(SEPARATOR)?
        };
        rest.split_once(SEPARATOR)
            .map(|(tenant, _)| tenant)
            .filter(|tenant| !tenant.is_empty())
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new("/tessera")
    }
}

/// Display name of a directory path: its last non-empty segment
///
/// `/a/b/c/` -> `c`, `/a/` -> `a`, `plainfile` -> `plainfile`.
pub fn directory_alias(path: &str) -> &str {
    file_alias(path.trim_end_matches(SEPARATOR))
}

/// Last segment of a file key
pub fn file_alias(key: &str) -> &str {
    key.rsplit_once(SEPARATOR).map_or(key, |(_, last)| last)
}

/// Remainder of `full` from the first position where it differs from `base`
///
/// When `base` is a prefix of `full` this is the relative path below `base`.
/// Identical strings yield an empty remainder.
pub fn difference<'a>(base: &str, full: &'a str) -> &'a str {
    let mut base_chars = base.chars();
    for (i, c) in full.char_indices() {
        match base_chars.next() {
            Some(b) if b == c => {}
            _ => return &full[i..],
        }
    }
    ""
}

/// Directory containing `path`, with trailing separator
///
/// Works for both file keys and directory keys. A top-level entry has an
/// empty parent.
pub fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(pos) => &path[..=pos],
        None => "",
    }
}

/// Every directory above `full_name`, outermost first
///
/// `base/t1/resources/a/x.txt` yields `base/`, `base/t1/`,
/// `base/t1/resources/` and `base/t1/resources/a/`.
pub fn ancestor_dirs(full_name: &str) -> Vec<String> {
    let trimmed = full_name.trim_end_matches(SEPARATOR);
    trimmed
        .match_indices(SEPARATOR)
        .map(|(pos, _)| &trimmed[..=pos])
        .filter(|dir| *dir != "/")
        .map(str::to_string)
        .collect()
}

/// Append the separator unless already present
pub fn as_directory(path: &str) -> String {
    if path.ends_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{path}{SEPARATOR}")
    }
}

/// Whether a key addresses a directory
pub fn is_directory_key(key: &str) -> bool {
    key.ends_with(SEPARATOR)
}

/// Whether a user-supplied name tries to escape its directory
pub fn is_traversal(name: &str) -> bool {
    name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_layout() {
        let resolver = PathResolver::new("base");

        assert_eq!(resolver.tenant_root("t1"), "base/t1/");
        assert_eq!(resolver.resource_root("t1"), "base/t1/resources/");
        assert_eq!(resolver.udf_root("t1"), "base/t1/udfs/");
        assert_eq!(resolver.dir_for(ResourceType::Udf, "t2"), "base/t2/udfs/");
    }

    #[test]
    fn test_resolver_strips_separators_from_base() {
        assert_eq!(PathResolver::new("/base/").resource_root("t1"), "base/t1/resources/");
        assert_eq!(PathResolver::new("/").tenant_root("t1"), "t1/");
        assert_eq!(PathResolver::new("").udf_root("t1"), "t1/udfs/");
    }

    #[test]
    fn test_resolver_is_deterministic() {
        let resolver = PathResolver::new("/base");
        assert_eq!(resolver.resource_root("t1"), resolver.resource_root("t1"));
        assert!(resolver.resource_root("t1").ends_with('/'));
    }

    #[test]
    fn test_file_name_drops_one_leading_separator() {
        let resolver = PathResolver::new("base");

        assert_eq!(
            resolver.resource_file_name("t1", "/a/x.txt"),
            "base/t1/resources/a/x.txt"
        );
        assert_eq!(resolver.udf_file_name("t1", "f.jar"), "base/t1/udfs/f.jar");
    }

    #[test]
    fn test_tenant_of() {
        let resolver = PathResolver::new("base");

        assert_eq!(resolver.tenant_of("base/t1/resources/x.txt"), Some("t1"));
        assert_eq!(resolver.tenant_of("other/t1/resources/x.txt"), None);
        assert_eq!(resolver.tenant_of("base/t1"), None);
        assert_eq!(PathResolver::new("/").tenant_of("t9/udfs/"), Some("t9"));
    }

    #[test]
    fn test_directory_alias() {
        assert_eq!(directory_alias("/a/b/c/"), "c");
        assert_eq!(directory_alias("/a/"), "a");
        assert_eq!(directory_alias("plainfile"), "plainfile");
    }

    #[test]
    fn test_difference() {
        assert_eq!(difference("base/t1/resources/", "base/t1/resources/a/x"), "a/x");
        assert_eq!(difference("", "abc"), "abc");
        assert_eq!(difference("abc", "abc"), "");
        assert_eq!(difference("abX", "abc"), "c");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("base/t1/resources/a/x.txt"), "base/t1/resources/a/");
        assert_eq!(parent_dir("base/t1/resources/a/"), "base/t1/resources/");
        assert_eq!(parent_dir("top"), "");
    }

    #[test]
    fn test_ancestor_dirs() {
        assert_eq!(
            ancestor_dirs("base/t1/resources/a/x.txt"),
            vec!["base/", "base/t1/", "base/t1/resources/", "base/t1/resources/a/"]
        );
        assert_eq!(ancestor_dirs("a/b/"), vec!["a/"]);
        assert!(ancestor_dirs("plain").is_empty());
    }

    #[test]
    fn test_traversal() {
        assert!(is_traversal("../t2/secret"));
        assert!(is_traversal("a/../../b"));
        assert!(!is_traversal("a/b.c"));
    }
}
