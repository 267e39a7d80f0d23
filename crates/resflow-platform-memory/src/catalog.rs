//! Reference catalog of resource types served by the memory platform
//!
//! | type | remote kind | parent |
//! |---|---|---|
//! | `Provider.Domain` | `domain` | - |
//! | `Provider.Project` | `project` | domain or project |
//! | `Provider.SecurityGroup` | `security_group` | project |
//! | `Monitor.UserGroup` | `usergroup` | - |
//! | `Monitor.Action` | `action` | - |
//! | `Monitor.Trigger` | `trigger` | - |
//!
//! A project gets a default security group as part of its create workflow.
//! A trigger provisions its own user group and notification action; both
//! are owned by the trigger and the action references the user group.

use resflow_container::{ActionSpec, DescriptorRegistry, StandardDescriptor};
use resflow_core::{
    LinkAttributes, LinkTypeFilter, RELATION, Resource, ResourceError, ResourceStatus, Result,
    TypeTag,
};
use resflow_workflow::{CreateRequest, FnStep, StepContext, StepId, TaskHandle, find_sibling};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DOMAIN: &str = "Provider.Domain";
pub const PROJECT: &str = "Provider.Project";
pub const SECURITY_GROUP: &str = "Provider.SecurityGroup";
pub const USER_GROUP: &str = "Monitor.UserGroup";
pub const ACTION: &str = "Monitor.Action";
pub const TRIGGER: &str = "Monitor.Trigger";

const DEFAULT_SECURITY_GROUP: &str = "default";

/// Attributes of a `Monitor.UserGroup`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserGroupAttribs {
    #[serde(default)]
    pub users: BTreeSet<String>,
}

/// Attributes of a `Monitor.Action`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAttribs {
    #[serde(default)]
    pub usergroup: Option<u64>,
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "email".to_string()
}

/// Registry with every catalog type, parents first
pub fn memory_catalog() -> Result<DescriptorRegistry> {
    DescriptorRegistry::new()
        .with(StandardDescriptor::new(DOMAIN, "domain"))?
        .with(
            StandardDescriptor::new(PROJECT, "project")
                .with_parent_types([DOMAIN])
                .requiring_parent()
                .hierarchical()
                .with_step(
                    "Provider.Project.default_security_group",
                    Arc::new(FnStep::new(|task, ctx| {
                        Box::pin(default_security_group(task, ctx))
                    })),
                )
                .with_create_steps(["Provider.Project.default_security_group"])
                .with_step(
                    "Provider.Project.add_security_group",
                    Arc::new(FnStep::new(|task, ctx| {
                        Box::pin(add_security_group(task, ctx))
                    })),
                )
                .with_action(
                    ActionSpec::new(
                        "add_security_group",
                        vec![StepId::new("Provider.Project.add_security_group")],
                    )
                    .with_check(check_security_group_params),
                ),
        )?
        .with(
            StandardDescriptor::new(SECURITY_GROUP, "security_group")
                .with_parent_types([PROJECT])
                .requiring_parent(),
        )?
        .with(
            StandardDescriptor::new(USER_GROUP, "usergroup")
                .with_step(
                    "Monitor.UserGroup.add_user",
                    Arc::new(FnStep::new(|task, ctx| Box::pin(add_user(task, ctx)))),
                )
                .with_action(
                    ActionSpec::new(
                        "add_user",
                        vec![
                            StepId::new("Monitor.UserGroup.add_user"),
                            StepId::new("Monitor.UserGroup.update_remote"),
                        ],
                    )
                    .with_check(check_user_params),
                ),
        )?
        .with(StandardDescriptor::new(ACTION, "action"))?
        .with(
            StandardDescriptor::new(TRIGGER, "trigger")
                .with_step(
                    "Monitor.Trigger.provision_dependents",
                    Arc::new(FnStep::new(|task, ctx| {
                        Box::pin(provision_dependents(task, ctx))
                    })),
                )
                .with_create_steps(["Monitor.Trigger.provision_dependents"]),
        )
}

fn check_security_group_params(params: &Value) -> Result<()> {
    match params.get("security_group_id").and_then(Value::as_u64) {
        Some(_) => Ok(()),
        None => Err(ResourceError::Validation(
            "'security_group_id' must be a resource id".into(),
        )),
    }
}

fn check_user_params(params: &Value) -> Result<()> {
    match params.get("user").and_then(Value::as_str) {
        Some(user) if !user.trim().is_empty() => Ok(()),
        _ => Err(ResourceError::Validation("'user' must be a non-empty string".into())),
    }
}

/// Child created through the factory, or the sibling a previous run made
///
/// A sibling left in `ERROR` by that run has its create retried.
async fn ensure_child(task: &TaskHandle, request: CreateRequest) -> Result<Resource> {
    match find_sibling(
        task.store().as_ref(),
        task.container().id,
        &request.resource_type,
        request.parent_id,
        &request.name,
    )
    .await?
    {
        Some(existing) if existing.state == ResourceStatus::Error => {
            task.retry_child(existing.id).await
        }
        Some(existing) => Ok(existing),
        None => task.create_child(request).await,
    }
}

/// Add an edge unless an identical one exists
async fn ensure_link(
    task: &TaskHandle,
    name: &str,
    start_id: u64,
    end_id: u64,
    attributes: LinkAttributes,
) -> Result<()> {
    let existing = task
        .store()
        .links_from(start_id, &LinkTypeFilter::new(RELATION))
        .await?;
    if existing.iter().any(|l| l.end_id == end_id && l.name == name) {
        return Ok(());
    }
    task.graph()
        .add_link(RELATION, name, start_id, end_id, attributes)
        .await?;
    Ok(())
}

async fn default_security_group(task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
    let project_id = task.resource_id();
    let group = ensure_child(
        task,
        CreateRequest::new(SECURITY_GROUP, DEFAULT_SECURITY_GROUP)
            .under(project_id)
            .with_desc("default security group"),
    )
    .await?;
    ensure_link(
        task,
        "default_security_group",
        project_id,
        group.id,
        LinkAttributes::owned(),
    )
    .await?;

    ctx.insert("security_group_id", json!(group.id));
    Ok(json!({ "security_group_id": group.id }))
}

async fn add_security_group(task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
    let group_id: u64 = ctx
        .param("security_group_id")
        .ok_or_else(|| ResourceError::Validation("'security_group_id' is missing".into()))?;
    let group = task.store().get_resource(group_id).await?;
    if group.resource_type != TypeTag::new(SECURITY_GROUP) || group.state.is_terminal() {
        return Err(ResourceError::Validation(format!(
            "resource {group_id} is not a live security group"
        )));
    }

    ensure_link(
        task,
        "security_group",
        task.resource_id(),
        group.id,
        LinkAttributes::reused(),
    )
    .await?;
    Ok(json!({ "security_group_id": group.id }))
}

async fn add_user(task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
    let user: String = ctx
        .param("user")
        .ok_or_else(|| ResourceError::Validation("'user' is missing".into()))?;

    let resource = task
        .update_resource(|r| {
            let mut attribs: UserGroupAttribs = if r.attribs.is_null() {
                UserGroupAttribs::default()
            } else {
                r.attribs_as()?
            };
            attribs.users.insert(user.clone());
            r.set_attribs(&attribs)
        })
        .await?;
    Ok(resource.attribs)
}

async fn provision_dependents(task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
    let trigger = task.resource().await?;

    let group = ensure_child(
        task,
        CreateRequest::new(USER_GROUP, format!("{}-members", trigger.name)),
    )
    .await?;
    let action_attribs = ActionAttribs {
        usergroup: Some(group.id),
        channel: default_channel(),
    };
    let action = ensure_child(
        task,
        CreateRequest::new(ACTION, format!("{}-notify", trigger.name))
            .with_attribs(serde_json::to_value(&action_attribs)?),
    )
    .await?;

    ensure_link(task, "members", trigger.id, group.id, LinkAttributes::owned()).await?;
    ensure_link(task, "notify", trigger.id, action.id, LinkAttributes::owned()).await?;
    // the action only references the group; the trigger owns both
    ensure_link(task, "notifies", action.id, group.id, LinkAttributes::reused()).await?;

    ctx.insert("usergroup_id", json!(group.id));
    ctx.insert("action_id", json!(action.id));
    Ok(json!({ "usergroup_id": group.id, "action_id": action.id }))
}
