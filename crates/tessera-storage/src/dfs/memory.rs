//! In-memory distributed filesystem used by tests and `memory://` URIs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tessera_core::StorageError;

use super::{DfsClient, DfsStatus};

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: DateTime<Utc> },
    File { body: Bytes, modified: DateTime<Utc> },
}

/// Tree of directories and files keyed by absolute path
pub struct InMemoryDfsClient {
    nodes: RwLock<BTreeMap<String, Node>>,
    fail_writes: AtomicBool,
    shut_down: AtomicBool,
}

impl InMemoryDfsClient {
    /// Create a filesystem containing only `/`
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                modified: Utc::now(),
            },
        );
        Self {
            nodes: RwLock::new(nodes),
            fail_writes: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Make every mutating call fail with a service error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::service("injected write failure"));
        }
        Ok(())
    }

    fn parent(path: &str) -> Option<&str> {
        match path.rfind('/') {
            Some(0) if path.len() > 1 => Some("/"),
            Some(0) | None => None,
            Some(pos) => Some(&path[..pos]),
        }
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        }
    }

    fn status(path: &str, node: &Node) -> DfsStatus {
        match node {
            Node::Dir { modified } => DfsStatus {
                path: path.to_string(),
                is_dir: true,
                len: 0,
                modification_time: *modified,
            },
            Node::File { body, modified } => DfsStatus {
                path: path.to_string(),
                is_dir: false,
                len: body.len() as u64,
                modification_time: *modified,
            },
        }
    }

    fn make_dirs(nodes: &mut BTreeMap<String, Node>, path: &str) -> Result<(), StorageError> {
        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            match nodes.get(dir) {
                Some(Node::Dir { .. }) => break,
                Some(Node::File { .. }) => {
                    return Err(StorageError::service(format!("{dir} is a file")));
                }
                None => missing.push(dir.to_string()),
            }
            current = Self::parent(dir);
        }
        for dir in missing {
            nodes.insert(
                dir,
                Node::Dir {
                    modified: Utc::now(),
                },
            );
        }
        Ok(())
    }

    fn subtree_keys(nodes: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
        let prefix = Self::child_prefix(path);
        let mut keys: Vec<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        keys.push(path.to_string());
        keys
    }
}

impl Default for InMemoryDfsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DfsClient for InMemoryDfsClient {
    async fn get_file_status(&self, path: &str) -> Result<Option<DfsStatus>, StorageError> {
        self.check_open()?;
        Ok(self.nodes.read().get(path).map(|node| Self::status(path, node)))
    }

    async fn list_status(&self, path: &str) -> Result<Vec<DfsStatus>, StorageError> {
        self.check_open()?;
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(Node::Dir { .. }) => {}
            _ => return Err(StorageError::not_found(path)),
        }

        let prefix = Self::child_prefix(path);
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len() && !key[prefix.len()..].contains('/'))
            .map(|(key, node)| Self::status(key, node))
            .collect())
    }

    async fn mkdirs(&self, path: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        Self::make_dirs(&mut self.nodes.write(), path)
    }

    async fn create(&self, path: &str, body: Bytes, overwrite: bool) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            Some(Node::Dir { .. }) => {
                return Err(StorageError::service(format!("{path} is a directory")));
            }
            Some(Node::File { .. }) if !overwrite => {
                return Err(StorageError::service(format!("{path} already exists")));
            }
            _ => {}
        }
        if let Some(parent) = Self::parent(path) {
            Self::make_dirs(&mut nodes, parent)?;
        }
        nodes.insert(
            path.to_string(),
            Node::File {
                body,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<Bytes, StorageError> {
        self.check_open()?;
        match self.nodes.read().get(path) {
            Some(Node::File { body, .. }) => Ok(body.clone()),
            Some(Node::Dir { .. }) => Err(StorageError::service(format!("{path} is a directory"))),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, StorageError> {
        self.check_writable()?;
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(path) {
            return Ok(false);
        }
        let keys = Self::subtree_keys(&nodes, path);
        if keys.len() > 1 && !recursive {
            return Err(StorageError::service(format!("{path} is not empty")));
        }
        for key in keys {
            nodes.remove(&key);
        }
        Ok(true)
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(src) {
            return Err(StorageError::not_found(src));
        }
        if nodes.contains_key(dst) {
            return Err(StorageError::service(format!("{dst} already exists")));
        }
        if let Some(parent) = Self::parent(dst) {
            Self::make_dirs(&mut nodes, parent)?;
        }
        for key in Self::subtree_keys(&nodes, src) {
            if let Some(node) = nodes.remove(&key) {
                let moved = format!("{dst}{}", &key[src.len()..]);
                nodes.insert(moved, node);
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
