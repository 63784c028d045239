use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::BatchError;

/// Checkpointed key-value state attached to a job or step execution.
///
/// Values are stored as JSON so that any `Serialize` type can be saved and the
/// whole context can be persisted by a [`JobRepository`](super::repository::JobRepository)
/// without the engine knowing what the keys mean.
///
/// # Examples
///
/// ```
/// use batch_engine::core::context::ExecutionContext;
///
/// let mut context = ExecutionContext::new();
/// context.put_usize("reader.read.count", 42);
/// assert_eq!(context.get_usize("reader.read.count"), Some(42));
/// assert!(context.get_string("missing").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), BatchError> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BatchError> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn put_string(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn put_usize(&mut self, key: &str, value: usize) {
        self.entries.insert(key.to_string(), Value::from(value));
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }

    pub fn put_u64(&mut self, key: &str, value: u64) {
        self.entries.insert(key.to_string(), Value::from(value));
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(Value::as_u64)
    }

    pub fn put_bool(&mut self, key: &str, value: bool) {
        self.entries.insert(key.to_string(), Value::Bool(value));
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(Value::as_bool)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn put_value(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies every entry of `other` into this context, overwriting existing keys.
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}

/// Copies `keys` from a step context into the job context.
///
/// Keys absent from the step context are ignored. Returns the number of keys
/// actually promoted.
///
/// ```
/// use batch_engine::core::context::{promote, ExecutionContext};
///
/// let mut step = ExecutionContext::new();
/// step.put_string("customer.file", "customers.csv");
/// step.put_usize("reader.read.count", 10);
///
/// let mut job = ExecutionContext::new();
/// assert_eq!(promote(&step, &mut job, &["customer.file", "absent"]), 1);
/// assert_eq!(job.get_string("customer.file").as_deref(), Some("customers.csv"));
/// assert!(!job.contains_key("reader.read.count"));
/// ```
pub fn promote(
    step_context: &ExecutionContext,
    job_context: &mut ExecutionContext,
    keys: &[&str],
) -> usize {
    let mut promoted = 0;
    for key in keys {
        if let Some(value) = step_context.get_value(key) {
            debug!("Promoting {} to job context", key);
            job_context.put_value(key, value.clone());
            promoted += 1;
        }
    }
    promoted
}
