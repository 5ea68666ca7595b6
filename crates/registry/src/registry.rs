use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ring::digest;
use serde_json::Value;

use taskhub_domain::{RegistrySnapshot, TaskDescriptor};
use taskhub_errors::{TaskHubError, TaskHubResult};

use crate::params;

/// Produces the child's argv from validated parameters.
pub type BuildCommandFn = Arc<dyn Fn(&Value) -> Result<Vec<String>, String> + Send + Sync>;

/// One registered task definition.
#[derive(Clone)]
pub struct TaskSpec {
    pub task_id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub version: String,
    pub is_enabled: bool,
    /// `None` means unbounded concurrency.
    pub concurrency_limit: Option<i64>,
    pub timeout_seconds: Option<i64>,
    pub params_schema: Value,
    pub schema_hash: String,
    build_command: BuildCommandFn,
}

impl TaskSpec {
    pub fn new(
        task_id: &str,
        name: &str,
        version: &str,
        params_schema: Value,
        build_command: BuildCommandFn,
    ) -> Self {
        let schema_hash = schema_hash(&params_schema);
        Self {
            task_id: task_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            tags: Vec::new(),
            version: version.to_string(),
            is_enabled: true,
            concurrency_limit: None,
            timeout_seconds: None,
            params_schema,
            schema_hash,
            build_command,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_concurrency_limit(mut self, limit: i64) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout: i64) -> Self {
        self.timeout_seconds = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    /// Validate `params` against the schema, then build the argv.
    pub fn build_command(&self, params: &Value) -> TaskHubResult<Vec<String>> {
        params::validate(params, &self.params_schema)?;
        (self.build_command)(params).map_err(TaskHubError::BuildCommand)
    }

    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            task_id: self.task_id.clone(),
            version: self.version.clone(),
            schema_hash: self.schema_hash.clone(),
            is_enabled: self.is_enabled,
            concurrency_limit: self.concurrency_limit,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("task_id", &self.task_id)
            .field("version", &self.version)
            .field("is_enabled", &self.is_enabled)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

/// Process-wide read-mostly registry. Populated at startup, immutable after.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: HashMap<String, TaskSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard startup registry: every built-in task.
    pub fn with_builtin_tasks() -> Self {
        let mut registry = Self::new();
        for task in crate::builtin::builtin_tasks() {
            registry.register(task);
        }
        registry
    }

    pub fn register(&mut self, task: TaskSpec) {
        self.tasks.insert(task.task_id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskSpec> {
        self.tasks.get(task_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Immutable view for store operations (claim admission, enqueue checks).
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::new(self.tasks.values().map(TaskSpec::descriptor).collect())
    }
}

/// SHA-256 over the canonically serialized schema (object keys sorted), so
/// the hash is stable across construction order.
pub fn schema_hash(schema: &Value) -> String {
    let canonical = canonicalize(schema);
    let hash = digest::digest(&digest::SHA256, canonical.as_bytes());
    hash.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key = Value::String(k.clone()).to_string();
                    format!("{}:{}", key, canonicalize(&map[k]))
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
