//! Step plans and the planner seam

use crate::lifecycle;
use crate::step::StepId;
use resflow_core::{Operation, Resource, Result, TypeTag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Parameters plus the ordered step list of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    pub params: Value,
    pub steps: Vec<StepId>,
}

impl StepPlan {
    pub fn new(params: Value, steps: Vec<StepId>) -> Self {
        Self { params, steps }
    }

    /// `[<op>_resource_pre_step, middle.., <op>_resource_post_step]`
    pub fn lifecycle(operation: &Operation, middle: Vec<StepId>, params: Value) -> Self {
        let mut steps = Vec::with_capacity(middle.len() + 2);
        steps.push(lifecycle::pre_step(operation));
        steps.extend(middle);
        steps.push(lifecycle::post_step(operation));
        Self { params, steps }
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.to_string()).collect()
    }
}

/// Request to create a logical resource through the factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub resource_type: TypeTag,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub attribs: Value,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Extra workflow parameters not stored on the resource
    #[serde(default)]
    pub params: Value,
    /// Fixed objid suffix; a random one is generated when unset
    #[serde(default)]
    pub suffix: Option<String>,
}

impl CreateRequest {
    pub fn new(resource_type: impl Into<TypeTag>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            desc: String::new(),
            parent_id: None,
            attribs: Value::Object(Default::default()),
            tags: BTreeSet::new(),
            params: Value::Null,
            suffix: None,
        }
    }

    pub fn under(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_attribs(mut self, attribs: Value) -> Self {
        self.attribs = attribs;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

/// Builds step plans from type-specific knowledge
///
/// Implemented by the container's descriptor registry. Steps reach it
/// through their task handle to plan nested workflows.
pub trait Planner: Send + Sync {
    /// Validate a create request (type known, parent type allowed,
    /// attributes well formed) and return its plan
    fn plan_create(&self, request: &CreateRequest, parent: Option<&Resource>) -> Result<StepPlan>;

    /// Plan `operation` on an existing resource; custom actions validate
    /// their parameters here
    fn plan(&self, resource: &Resource, operation: &Operation, params: Value) -> Result<StepPlan>;
}
