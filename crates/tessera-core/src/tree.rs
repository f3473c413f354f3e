//! Builds a nested resource tree from a flat recursive listing

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::entity::{ResourceType, StorageEntity};
use crate::path::{as_directory, directory_alias, parent_dir};

/// One node of a resource tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    pub name: String,
    pub full_name: String,
    pub file_name: String,
    pub is_directory: bool,
    /// `None` for the synthetic root
    #[serde(rename = "type")]
    pub resource_type: Option<ResourceType>,
    pub size: u64,
    pub children: Vec<ResourceNode>,
}

impl ResourceNode {
    fn root(path: &str) -> Self {
        Self {
            name: directory_alias(path).to_string(),
            full_name: path.to_string(),
            file_name: String::new(),
            is_directory: true,
            resource_type: None,
            size: 0,
            children: Vec::new(),
        }
    }

    fn from_entity(entity: &StorageEntity) -> Self {
        Self {
            name: entity.alias.clone(),
            full_name: entity.full_name.clone(),
            file_name: entity.file_name.clone(),
            is_directory: entity.is_directory,
            resource_type: Some(entity.resource_type),
            size: entity.size,
            children: Vec::new(),
        }
    }

    /// Number of nodes below this one
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// Depth-first search for a node by full name
    pub fn find(&self, full_name: &str) -> Option<&ResourceNode> {
        if self.full_name == full_name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(full_name))
    }
}

/// Groups entities under their parent directories by comparing path values
///
/// The input is typically the output of a recursive listing. Nodes are linked
/// by `pfullName` equality, never by shared references, and a child's path is
/// always strictly longer than its parent's. Entities whose recorded parent has
/// no directory entity of its own are attached to the nearest ancestor that
/// does; entities outside the root are ignored.
pub struct EntityTreeBuilder<'a> {
    entities: &'a [StorageEntity],
}

impl<'a> EntityTreeBuilder<'a> {
    pub fn new(entities: &'a [StorageEntity]) -> Self {
        Self { entities }
    }

    /// Build the tree rooted at `root`
    pub fn build(&self, root: &str) -> ResourceNode {
        let root = as_directory(root);

        let directories: HashSet<&str> = self
            .entities
            .iter()
            .filter(|e| e.is_directory && Self::is_below(&root, &e.full_name))
            .map(|e| e.full_name.as_str())
            .collect();

        let mut by_parent: HashMap<String, Vec<&StorageEntity>> = HashMap::new();
        for entity in self.entities {
            if !Self::is_below(&root, &entity.full_name) {
                continue;
            }
            let parent = Self::effective_parent(entity, &root, &directories);
            by_parent.entry(parent).or_default().push(entity);
        }

        let mut node = ResourceNode::root(&root);
        node.children = Self::children_of(&root, &by_parent);
        node
    }

    fn children_of(
        path: &str,
        by_parent: &HashMap<String, Vec<&StorageEntity>>,
    ) -> Vec<ResourceNode> {
        let Some(entities) = by_parent.get(path) else {
            return Vec::new();
        };

        entities
            .iter()
            .map(|entity| {
                let mut node = ResourceNode::from_entity(entity);
                if entity.is_directory && entity.full_name.len() > path.len() {
                    node.children = Self::children_of(&entity.full_name, by_parent);
                }
                node
            })
            .collect()
    }

    fn is_below(root: &str, full_name: &str) -> bool {
        full_name.len() > root.len() && full_name.starts_with(root)
    }

    fn effective_parent(entity: &StorageEntity, root: &str, directories: &HashSet<&str>) -> String {
        let is_anchor = |candidate: &str| candidate == root || directories.contains(candidate);
        let recorded = entity.parent_full_name.as_str();

        if is_anchor(recorded)
            && recorded.len() < entity.full_name.len()
            && entity.full_name.starts_with(recorded)
        {
            return recorded.to_string();
        }

        let mut candidate = parent_dir(&entity.full_name);
        while !is_anchor(candidate) {
            if candidate.len() <= root.len() {
                return root.to_string();
            }
            candidate = parent_dir(candidate);
        }
        candidate.to_string()
    }
}
