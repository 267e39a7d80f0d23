//! Shared step context
//!
//! The only channel through which steps of one job exchange data. It is a
//! plain JSON map so that it can be persisted on the job record after every
//! step and picked up by another worker.

use resflow_core::{Resource, ResourceError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entries under this prefix are released by the lifecycle post-steps
pub const HELD_PREFIX: &str = "held.";

const RESULTS_KEY: &str = "results";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepContext(Map<String, Value>);

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context every job starts with
    pub fn seeded(resource: &Resource, params: &Value) -> Self {
        let mut ctx = Self::new();
        ctx.insert("resource_id", Value::from(resource.id));
        ctx.insert("resource_uuid", Value::from(resource.uuid.to_string()));
        ctx.insert("objid", Value::from(resource.objid.as_str()));
        ctx.insert("params", params.clone());
        ctx
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Decode an entry, `None` when the key is absent or null
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Decode an entry a previous step must have written
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_as(key)?.ok_or_else(|| {
            ResourceError::Validation(format!("step context has no '{key}' entry"))
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Store an entry that lives until the workflow's post-step
    pub fn hold(&mut self, key: &str, value: Value) {
        self.0.insert(format!("{HELD_PREFIX}{key}"), value);
    }

    pub fn held(&self, key: &str) -> Option<&Value> {
        self.0.get(&format!("{HELD_PREFIX}{key}"))
    }

    /// Drop every held entry, returning how many were released
    pub fn release_held(&mut self) -> usize {
        let before = self.0.len();
        self.0.retain(|key, _| !key.starts_with(HELD_PREFIX));
        before - self.0.len()
    }

    pub fn resource_id(&self) -> Result<u64> {
        self.require("resource_id")
    }

    pub fn params(&self) -> &Value {
        self.0.get("params").unwrap_or(&Value::Null)
    }

    /// Typed view of one parameter
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Keep a step's non-null return value under `results.<step>`
    pub fn record_result(&mut self, step: &str, result: Value) {
        if result.is_null() {
            return;
        }
        let results = self
            .0
            .entry(RESULTS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(map) = results.as_object_mut() {
            map.insert(step.to_string(), result);
        }
    }

    pub fn result(&self, step: &str) -> Option<&Value> {
        self.0.get(RESULTS_KEY).and_then(|r| r.get(step))
    }
}
