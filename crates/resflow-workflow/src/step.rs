//! Steps and the step registry
//!
//! Step ids are resolved against the registry when a workflow is built, so
//! an unknown id is a validation error raised before anything is mutated.

use crate::context::StepContext;
use crate::task::TaskHandle;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use resflow_core::{ResourceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fully qualified step identifier, e.g. `Provider.Project.create_remote`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One named unit of work inside a workflow
///
/// Steps must tolerate being re-run: creating something that already exists
/// or removing something already gone is success.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value>;
}

/// Adapter turning a closure into a [`Step`]
pub struct FnStep<F>(F);

impl<F> FnStep<F>
where
    F: for<'a> Fn(&'a TaskHandle, &'a mut StepContext) -> BoxFuture<'a, Result<Value>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: for<'a> Fn(&'a TaskHandle, &'a mut StepContext) -> BoxFuture<'a, Result<Value>>
        + Send
        + Sync,
{
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
        (self.0)(task, ctx).await
    }
}

/// A step id paired with its implementation
#[derive(Clone)]
pub struct ResolvedStep {
    pub id: StepId,
    pub step: Arc<dyn Step>,
}

impl std::fmt::Debug for ResolvedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedStep")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Registration table from step id to implementation
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<StepId, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the generic lifecycle and cascade steps
    pub fn with_lifecycle_steps() -> Self {
        let mut registry = Self::new();
        crate::lifecycle::register(&mut registry);
        crate::cascade::register(&mut registry);
        registry
    }

    /// Fails with `Conflict` if the id is taken
    pub fn register(&mut self, id: impl Into<StepId>, step: Arc<dyn Step>) -> Result<()> {
        let id = id.into();
        if self.steps.contains_key(&id) {
            return Err(ResourceError::Conflict(format!(
                "step {id} is already registered"
            )));
        }
        self.steps.insert(id, step);
        Ok(())
    }

    /// Insert or replace without the duplicate check
    pub(crate) fn insert(&mut self, id: &str, step: Arc<dyn Step>) {
        self.steps.insert(StepId::new(id), step);
    }

    pub fn register_fn<F>(&mut self, id: impl Into<StepId>, f: F) -> Result<()>
    where
        F: for<'a> Fn(&'a TaskHandle, &'a mut StepContext) -> BoxFuture<'a, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.register(id, Arc::new(FnStep::new(f)))
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.steps.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Resolve a step list, failing on the first unknown id
    pub fn resolve(&self, ids: &[StepId]) -> Result<Vec<ResolvedStep>> {
        ids.iter()
            .map(|id| {
                self.steps
                    .get(id)
                    .map(|step| ResolvedStep {
                        id: id.clone(),
                        step: step.clone(),
                    })
                    .ok_or_else(|| ResourceError::Validation(format!("unknown step: {id}")))
            })
            .collect()
    }
}
