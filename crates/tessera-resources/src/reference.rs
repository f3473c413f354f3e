//! Reference index: which task definitions and UDF functions use a resource
//!
//! Task definitions embed resources two ways: by path inside the serialized
//! task parameters (`{"resourceList":[{"resourceName": ...}]}`) and by
//! numeric resource id in a comma-separated list. Tasks that belong to a
//! live process definition, and UDF functions bound to a package, hold
//! *blocking* references that veto deletion.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tessera_core::ResourceType;
use tracing::debug;

use crate::error::ResourceError;

/// Who holds a blocking reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceHolder {
    /// A task inside a live process definition
    ProcessDefinition { code: u64, task_id: u64 },
    /// A UDF function bound to a package
    UdfFunction { id: u64, name: String },
}

impl fmt::Display for ReferenceHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceHolder::ProcessDefinition { code, task_id } => {
                write!(f, "process definition {code} (task {task_id})")
            }
            ReferenceHolder::UdfFunction { id, name } => write!(f, "udf function {name} ({id})"),
        }
    }
}

/// A key that may not be deleted, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingReference {
    pub full_name: String,
    pub holder: ReferenceHolder,
}

/// Lookup and maintenance of resource references
#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    /// Live references to any of `keys`
    ///
    /// A non-empty result means deleting `keys` must be refused in full.
    async fn blocking_references(
        &self,
        keys: &[String],
        resource_type: ResourceType,
    ) -> Result<Vec<BlockingReference>, ResourceError>;

    /// Remove every mention of `keys` from task definitions
    ///
    /// Returns the number of task definitions rewritten.
    async fn scrub(&self, keys: &[String], resource_type: ResourceType)
    -> Result<usize, ResourceError>;

    /// Point references at `old` to `new` after a rename
    async fn rewrite_path(
        &self,
        old: &str,
        new: &str,
        resource_type: ResourceType,
    ) -> Result<usize, ResourceError>;
}

/// Drop entries whose `resourceName` equals `full_name` from a task's
/// serialized `resourceList`
///
/// Parameters without a `resourceList` array are returned unchanged.
pub fn remove_resource_from_resource_list(
    full_name: &str,
    task_params: &str,
) -> Result<String, serde_json::Error> {
    let mut params: Value = serde_json::from_str(task_params)?;
    let Some(list) = params.get_mut("resourceList").and_then(Value::as_array_mut) else {
        return Ok(task_params.to_string());
    };
    let before = list.len();
    list.retain(|entry| resource_name(entry) != Some(full_name));
    if list.len() == before {
        return Ok(task_params.to_string());
    }
    serde_json::to_string(&params)
}

/// Replace `old` with `new` as `resourceName` in a task's `resourceList`
pub fn rename_resource_in_resource_list(
    old: &str,
    new: &str,
    task_params: &str,
) -> Result<String, serde_json::Error> {
    let mut params: Value = serde_json::from_str(task_params)?;
    let Some(list) = params.get_mut("resourceList").and_then(Value::as_array_mut) else {
        return Ok(task_params.to_string());
    };
    let mut changed = false;
    for entry in list.iter_mut() {
        if resource_name(entry) != Some(old) {
            continue;
        }
        if let Some(obj) = entry.as_object_mut() {
            obj.insert("resourceName".to_string(), Value::String(new.to_string()));
            changed = true;
        }
    }
    if !changed {
        return Ok(task_params.to_string());
    }
    serde_json::to_string(&params)
}

/// Drop `resource_id` from a comma-separated id list
pub fn remove_resource_from_ids(resource_id: u64, ids: &str) -> String {
    let target = resource_id.to_string();
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && *id != target)
        .collect::<Vec<_>>()
        .join(",")
}

fn resource_name(entry: &Value) -> Option<&str> {
    entry.get("resourceName").and_then(Value::as_str)
}

/// A task definition as far as resource references are concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: u64,
    /// Code of the live process definition this task belongs to, if any
    pub process_code: Option<u64>,
    /// Serialized task parameters
    pub task_params: String,
    /// Comma-separated resource ids
    pub resource_ids: String,
}

impl TaskDefinition {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            process_code: None,
            task_params: r#"{"resourceList":[]}"#.to_string(),
            resource_ids: String::new(),
        }
    }

    pub fn in_process(mut self, code: u64) -> Self {
        self.process_code = Some(code);
        self
    }

    pub fn with_params(mut self, task_params: impl Into<String>) -> Self {
        self.task_params = task_params.into();
        self
    }

    /// Add a resource by path and by id
    pub fn with_resource(mut self, full_name: &str, resource_id: u64) -> Self {
        if let Ok(mut params) = serde_json::from_str::<Value>(&self.task_params) {
            if let Some(list) = params
                .as_object_mut()
                .map(|obj| obj.entry("resourceList").or_insert_with(|| Value::Array(Vec::new())))
                .and_then(Value::as_array_mut)
            {
                list.push(serde_json::json!({ "id": resource_id, "resourceName": full_name }));
            }
            self.task_params = params.to_string();
        }
        self.resource_ids = if self.resource_ids.is_empty() {
            resource_id.to_string()
        } else {
            format!("{},{resource_id}", self.resource_ids)
        };
        self
    }

    /// Whether this task mentions `full_name` by path or `resource_id` by id
    pub fn references(&self, full_name: &str, resource_id: Option<u64>) -> bool {
        let by_path = serde_json::from_str::<Value>(&self.task_params)
            .ok()
            .and_then(|params| {
                params.get("resourceList").and_then(Value::as_array).map(|list| {
                    list.iter().any(|entry| resource_name(entry) == Some(full_name))
                })
            })
            .unwrap_or(false);
        let by_id = resource_id.is_some_and(|id| {
            let target = id.to_string();
            self.resource_ids.split(',').any(|s| s.trim() == target)
        });
        by_path || by_id
    }
}

/// A UDF function bound to a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdfFunction {
    pub id: u64,
    pub name: String,
    pub resource_name: String,
}

/// Reference index held in memory
pub struct InMemoryReferenceIndex {
    resource_ids: DashMap<String, u64>,
    tasks: DashMap<u64, TaskDefinition>,
    udf_functions: DashMap<u64, UdfFunction>,
    next_id: AtomicU64,
}

impl InMemoryReferenceIndex {
    pub fn new() -> Self {
        Self {
            resource_ids: DashMap::new(),
            tasks: DashMap::new(),
            udf_functions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Id of `full_name`, assigning a fresh one on first use
    pub fn register_resource(&self, full_name: &str) -> u64 {
        *self
            .resource_ids
            .entry(full_name.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn resource_id(&self, full_name: &str) -> Option<u64> {
        self.resource_ids.get(full_name).map(|id| *id)
    }

    pub fn add_task(&self, task: TaskDefinition) {
        self.tasks.insert(task.id, task);
    }

    pub fn task(&self, id: u64) -> Option<TaskDefinition> {
        self.tasks.get(&id).map(|task| task.clone())
    }

    /// Bind a UDF function to the package at `resource_name`
    pub fn bind_udf(&self, id: u64, name: impl Into<String>, resource_name: impl Into<String>) {
        self.udf_functions.insert(
            id,
            UdfFunction {
                id,
                name: name.into(),
                resource_name: resource_name.into(),
            },
        );
    }

    fn snapshot_tasks(&self) -> Vec<TaskDefinition> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for InMemoryReferenceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReferenceIndex for InMemoryReferenceIndex {
    async fn blocking_references(
        &self,
        keys: &[String],
        resource_type: ResourceType,
    ) -> Result<Vec<BlockingReference>, ResourceError> {
        let mut found = Vec::new();

        if resource_type == ResourceType::Udf {
            for function in self.udf_functions.iter() {
                if keys.contains(&function.resource_name) {
                    found.push(BlockingReference {
                        full_name: function.resource_name.clone(),
                        holder: ReferenceHolder::UdfFunction {
                            id: function.id,
                            name: function.name.clone(),
                        },
                    });
                }
            }
        }

        for task in self.snapshot_tasks() {
            let Some(code) = task.process_code else {
                continue;
            };
            for key in keys {
                if task.references(key, self.resource_id(key)) {
                    found.push(BlockingReference {
                        full_name: key.clone(),
                        holder: ReferenceHolder::ProcessDefinition {
                            code,
                            task_id: task.id,
                        },
                    });
                }
            }
        }

        Ok(found)
    }

    async fn scrub(
        &self,
        keys: &[String],
        _resource_type: ResourceType,
    ) -> Result<usize, ResourceError> {
        let mut rewritten = 0;
        for mut task in self.snapshot_tasks() {
            let mut changed = false;
            for key in keys {
                let id = self.resource_id(key);
                if !task.references(key, id) {
                    continue;
                }
                task.task_params = remove_resource_from_resource_list(key, &task.task_params)
                    .map_err(|e| ResourceError::ReferenceIndex(e.to_string()))?;
                if let Some(id) = id {
                    task.resource_ids = remove_resource_from_ids(id, &task.resource_ids);
                }
                changed = true;
            }
            if changed {
                debug!(task_id = task.id, "scrubbed deleted resources from task");
                self.tasks.insert(task.id, task);
                rewritten += 1;
            }
        }
        for key in keys {
            self.resource_ids.remove(key);
        }
        Ok(rewritten)
    }

    async fn rewrite_path(
        &self,
        old: &str,
        new: &str,
        _resource_type: ResourceType,
    ) -> Result<usize, ResourceError> {
        if let Some((_, id)) = self.resource_ids.remove(old) {
            self.resource_ids.insert(new.to_string(), id);
        }

        let mut rewritten = 0;
        for mut task in self.snapshot_tasks() {
            let params = rename_resource_in_resource_list(old, new, &task.task_params)
                .map_err(|e| ResourceError::ReferenceIndex(e.to_string()))?;
            if params != task.task_params {
                task.task_params = params;
                self.tasks.insert(task.id, task);
                rewritten += 1;
            }
        }
        for mut function in self.udf_functions.iter_mut() {
            if function.resource_name == old {
                function.resource_name = new.to_string();
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: &str = "base/t1/resources/a/x.txt";

    #[test]
    fn test_remove_from_resource_list() {
        let params = r#"{"rawScript":"cat x","resourceList":[{"id":1,"resourceName":"base/t1/resources/a/x.txt"},{"id":2,"resourceName":"base/t1/resources/b"}]}"#;
        let cleaned = remove_resource_from_resource_list(X, params).unwrap();

        let value: Value = serde_json::from_str(&cleaned).unwrap();
        let list = value["resourceList"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["resourceName"], "base/t1/resources/b");
        assert_eq!(value["rawScript"], "cat x");
    }

    #[test]
    fn test_params_without_resource_list_are_untouched() {
        let params = r#"{ "rawScript" : "echo hi" }"#;
        assert_eq!(remove_resource_from_resource_list(X, params).unwrap(), params);
    }

    #[test]
    fn test_invalid_params_are_an_error() {
        assert!(remove_resource_from_resource_list(X, "not json").is_err());
    }

    #[test]
    fn test_remove_from_ids() {
        assert_eq!(remove_resource_from_ids(2, "1,2,3"), "1,3");
        assert_eq!(remove_resource_from_ids(2, "2"), "");
        assert_eq!(remove_resource_from_ids(2, " 12, 2 ,21"), "12,21");
        assert_eq!(remove_resource_from_ids(9, ""), "");
    }

    #[test]
    fn test_task_references() {
        let task = TaskDefinition::new(1).with_resource(X, 5);
        assert!(task.references(X, None));
        assert!(task.references("other", Some(5)));
        assert!(!task.references("other", Some(6)));
    }

    #[tokio::test]
    async fn test_blocking_references_only_from_live_processes() {
        let index = InMemoryReferenceIndex::new();
        let id = index.register_resource(X);
        index.add_task(TaskDefinition::new(1).in_process(100).with_resource(X, id));
        index.add_task(TaskDefinition::new(2).with_resource(X, id));

        let refs = index
            .blocking_references(&[X.to_string()], ResourceType::File)
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].holder,
            ReferenceHolder::ProcessDefinition { code: 100, task_id: 1 }
        );
    }

    #[tokio::test]
    async fn test_bound_udf_blocks() {
        let index = InMemoryReferenceIndex::new();
        index.bind_udf(3, "to_upper", "base/t1/udfs/str.jar");

        let refs = index
            .blocking_references(&["base/t1/udfs/str.jar".to_string()], ResourceType::Udf)
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].holder.to_string(), "udf function to_upper (3)");

        let refs = index
            .blocking_references(&["base/t1/udfs/other.jar".to_string()], ResourceType::Udf)
            .await
            .unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn test_scrub_rewrites_tasks() {
        let index = InMemoryReferenceIndex::new();
        let id = index.register_resource(X);
        let keep = index.register_resource("base/t1/resources/keep");
        index.add_task(
            TaskDefinition::new(1)
                .with_resource(X, id)
                .with_resource("base/t1/resources/keep", keep),
        );

        let rewritten = index.scrub(&[X.to_string()], ResourceType::File).await.unwrap();
        assert_eq!(rewritten, 1);

        let task = index.task(1).unwrap();
        assert!(!task.references(X, Some(id)));
        assert!(task.references("base/t1/resources/keep", Some(keep)));
        assert_eq!(task.resource_ids, keep.to_string());
        assert!(index.resource_id(X).is_none());
    }

    #[tokio::test]
    async fn test_rewrite_path() {
        let index = InMemoryReferenceIndex::new();
        let id = index.register_resource(X);
        index.add_task(TaskDefinition::new(1).with_resource(X, id));

        let rewritten = index
            .rewrite_path(X, "base/t1/resources/a/z.txt", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(rewritten, 1);
        assert_eq!(index.resource_id("base/t1/resources/a/z.txt"), Some(id));
        assert!(index.task(1).unwrap().references("base/t1/resources/a/z.txt", None));
    }
}
