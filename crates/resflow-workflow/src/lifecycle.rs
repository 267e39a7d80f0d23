//! Generic lifecycle steps
//!
//! Every plan is wrapped in `<op>_resource_pre_step` and
//! `<op>_resource_post_step`. The pre-step checks that the row is in the
//! in-flight state the engine set and persists the logical change; the
//! post-step moves the row to the operation's success state and releases
//! held context entries.

use crate::context::StepContext;
use crate::step::{Step, StepId, StepRegistry};
use crate::task::TaskHandle;
use async_trait::async_trait;
use resflow_core::{Operation, Resource, ResourceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const CREATE_PRE_STEP: &str = "create_resource_pre_step";
pub const CREATE_POST_STEP: &str = "create_resource_post_step";
pub const UPDATE_PRE_STEP: &str = "update_resource_pre_step";
pub const UPDATE_POST_STEP: &str = "update_resource_post_step";
pub const PATCH_PRE_STEP: &str = "patch_resource_pre_step";
pub const PATCH_POST_STEP: &str = "patch_resource_post_step";
pub const DELETE_PRE_STEP: &str = "delete_resource_pre_step";
pub const DELETE_POST_STEP: &str = "delete_resource_post_step";
pub const EXPUNGE_PRE_STEP: &str = "expunge_resource_pre_step";
pub const EXPUNGE_POST_STEP: &str = "expunge_resource_post_step";
pub const ACTION_PRE_STEP: &str = "action_resource_pre_step";
pub const ACTION_POST_STEP: &str = "action_resource_post_step";

pub fn pre_step(operation: &Operation) -> StepId {
    StepId::new(match operation {
        Operation::Create => CREATE_PRE_STEP,
        Operation::Update => UPDATE_PRE_STEP,
        Operation::Patch => PATCH_PRE_STEP,
        Operation::Delete => DELETE_PRE_STEP,
        Operation::Expunge => EXPUNGE_PRE_STEP,
        Operation::Action(_) => ACTION_PRE_STEP,
    })
}

pub fn post_step(operation: &Operation) -> StepId {
    StepId::new(match operation {
        Operation::Create => CREATE_POST_STEP,
        Operation::Update => UPDATE_POST_STEP,
        Operation::Patch => PATCH_POST_STEP,
        Operation::Delete => DELETE_POST_STEP,
        Operation::Expunge => EXPUNGE_POST_STEP,
        Operation::Action(_) => ACTION_POST_STEP,
    })
}

pub(crate) fn register(registry: &mut StepRegistry) {
    let pre: Arc<dyn Step> = Arc::new(PreStep);
    let post: Arc<dyn Step> = Arc::new(PostStep);
    for id in [
        CREATE_PRE_STEP,
        UPDATE_PRE_STEP,
        PATCH_PRE_STEP,
        DELETE_PRE_STEP,
        EXPUNGE_PRE_STEP,
        ACTION_PRE_STEP,
    ] {
        registry.insert(id, pre.clone());
    }
    for id in [
        CREATE_POST_STEP,
        UPDATE_POST_STEP,
        PATCH_POST_STEP,
        DELETE_POST_STEP,
        EXPUNGE_POST_STEP,
        ACTION_POST_STEP,
    ] {
        registry.insert(id, post.clone());
    }
}

/// Logical changes carried by an update's parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Merged key by key into the stored attributes; `null` removes a key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribs: Option<serde_json::Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

impl ResourceChanges {
    /// Read the changes out of workflow parameters; unrelated keys are ignored
    pub fn from_params(params: &Value) -> Result<Self> {
        if !params.is_object() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(params.clone())?)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.desc.is_none() && self.attribs.is_none() && self.tags.is_none()
    }

    /// Apply to a row, returning whether anything changed
    pub fn apply(&self, resource: &mut Resource) -> bool {
        let before = resource.clone();
        if let Some(name) = &self.name {
            resource.name = name.clone();
        }
        if let Some(desc) = &self.desc {
            resource.desc = desc.clone();
        }
        if let Some(attribs) = &self.attribs {
            for (key, value) in attribs {
                if value.is_null() {
                    if let Some(map) = resource.attribs.as_object_mut() {
                        map.remove(key);
                    }
                } else {
                    resource.set_attrib(key.clone(), value.clone());
                }
            }
        }
        if let Some(tags) = &self.tags {
            resource.tags = tags.clone();
        }
        *resource != before
    }
}

struct PreStep;

#[async_trait]
impl Step for PreStep {
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
        let resource = task.resource().await?;
        let operation = task.operation();
        if resource.state != operation.in_flight_state() {
            return Err(ResourceError::InvalidState {
                id: resource.id,
                state: resource.state,
                operation: operation.name().to_string(),
            });
        }

        match operation {
            Operation::Create => check_hierarchy(task, &resource, ctx).await?,
            Operation::Update => {
                let changes = ResourceChanges::from_params(ctx.params())?;
                if !changes.is_empty() {
                    task.update_resource(|r| {
                        changes.apply(r);
                        Ok(())
                    })
                    .await?;
                }
            }
            Operation::Delete | Operation::Expunge => {
                if let Some(ext_id) = resource.valid_ext_id() {
                    ctx.hold("ext_id", json!(ext_id));
                }
            }
            Operation::Patch => {}
            Operation::Action(name) => {
                ctx.insert("action", json!(name));
            }
        }

        ctx.insert("ext_id", json!(resource.valid_ext_id()));
        ctx.insert("resource_type", json!(resource.resource_type));
        Ok(Value::Null)
    }
}

/// The stored objid must extend the parent's and the parent must be live
async fn check_hierarchy(task: &TaskHandle, resource: &Resource, ctx: &mut StepContext) -> Result<()> {
    let Some(parent_id) = resource.parent_id else {
        ctx.insert("parent_id", Value::Null);
        return Ok(());
    };

    let parent = task.store().get_resource(parent_id).await?;
    if parent.state.is_terminal() {
        return Err(ResourceError::InvalidParent(format!(
            "parent {parent_id} has been expunged"
        )));
    }
    if !resource.objid.is_descendant_of(&parent.objid) {
        return Err(ResourceError::InvalidParent(format!(
            "objid {} is not below parent objid {}",
            resource.objid, parent.objid
        )));
    }

    ctx.insert("parent_id", json!(parent.id));
    ctx.insert("parent_objid", json!(parent.objid));
    ctx.insert("parent_ext_id", json!(parent.valid_ext_id()));
    Ok(())
}

struct PostStep;

#[async_trait]
impl Step for PostStep {
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
        let operation = task.operation().clone();

        if operation == Operation::Expunge {
            let detached = task.graph().detach(task.resource_id()).await?;
            ctx.insert("detached_links", json!(detached));
        }

        let success = operation.success_state();
        let resource = task.update_resource(|r| r.transition_to(success)).await?;
        let released = ctx.release_held();

        tracing::debug!(
            resource_id = resource.id,
            state = %resource.state,
            released,
            "Lifecycle finished"
        );
        Ok(json!({ "state": resource.state }))
    }
}
