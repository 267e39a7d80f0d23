//! Remote-backed descriptor shared by most resource types
//!
//! Maps one resource type onto one remote kind of the container's client.
//! Provisioning, update, refresh and teardown each run one idempotent step
//! named `<type>.create_remote`, `<type>.update_remote`,
//! `<type>.refresh_remote` and `<type>.delete_remote`.

use crate::descriptor::{ActionSpec, ResourceDescriptor};
use crate::discovery::{DiscoveredEntity, ParentRef, RemoteIdentity, assign_levels};
use async_trait::async_trait;
use resflow_core::{
    Operation, PlatformClient, RemoteEntity, RemoteSpec, Resource, ResourceError, ResourceInfo,
    Result, TypeTag,
};
use resflow_workflow::{
    CASCADE_OWNED_LINKS_STEP, CreateRequest, Step, StepContext, StepId, StepPlan, StepRegistry,
    TaskHandle,
};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct StandardDescriptor {
    tag: TypeTag,
    remote_kind: String,
    parent_types: Vec<TypeTag>,
    requires_parent: bool,
    discoverable: bool,
    create_steps: Vec<StepId>,
    extra_steps: Vec<(StepId, Arc<dyn Step>)>,
    actions: Vec<ActionSpec>,
}

impl StandardDescriptor {
    pub fn new(tag: impl Into<TypeTag>, remote_kind: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            remote_kind: remote_kind.into(),
            parent_types: Vec::new(),
            requires_parent: false,
            discoverable: true,
            create_steps: Vec::new(),
            extra_steps: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_parent_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeTag>,
    {
        self.parent_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn requiring_parent(mut self) -> Self {
        self.requires_parent = true;
        self
    }

    /// Entities of this type may nest under each other
    pub fn hierarchical(mut self) -> Self {
        if !self.parent_types.contains(&self.tag) {
            self.parent_types.push(self.tag.clone());
        }
        self
    }

    /// Leave the type out of reconciliation
    pub fn not_discoverable(mut self) -> Self {
        self.discoverable = false;
        self
    }

    /// Register a type-specific step
    pub fn with_step(mut self, id: impl Into<StepId>, step: Arc<dyn Step>) -> Self {
        self.extra_steps.push((id.into(), step));
        self
    }

    /// Steps run after the remote entity exists, inside the create workflow
    pub fn with_create_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.create_steps.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn remote_kind(&self) -> &str {
        &self.remote_kind
    }

    pub fn step_id(&self, suffix: &str) -> StepId {
        StepId::new(format!("{}.{suffix}", self.tag))
    }

    fn discovered(&self, entity: RemoteEntity) -> DiscoveredEntity {
        let objdef = entity.to_value();
        DiscoveredEntity {
            resource_type: self.tag.clone(),
            parent: entity.parent.map(ParentRef::ExtId).unwrap_or_default(),
            ext_id: entity.ext_id,
            objdef,
            name: entity.name,
            attributes: entity.attributes,
            discriminator: None,
            level: 0,
        }
    }
}

#[async_trait]
impl ResourceDescriptor for StandardDescriptor {
    fn type_tag(&self) -> &TypeTag {
        &self.tag
    }

    fn parent_types(&self) -> &[TypeTag] {
        &self.parent_types
    }

    fn requires_parent(&self) -> bool {
        self.requires_parent
    }

    fn register_steps(&self, registry: &mut StepRegistry) -> Result<()> {
        let kind = self.remote_kind.clone();
        registry.register(
            self.step_id("create_remote"),
            Arc::new(CreateRemote { kind: kind.clone() }),
        )?;
        registry.register(
            self.step_id("update_remote"),
            Arc::new(UpdateRemote { kind: kind.clone() }),
        )?;
        registry.register(
            self.step_id("refresh_remote"),
            Arc::new(RefreshRemote { kind: kind.clone() }),
        )?;
        registry.register(self.step_id("delete_remote"), Arc::new(DeleteRemote { kind }))?;
        for (id, step) in &self.extra_steps {
            registry.register(id.clone(), step.clone())?;
        }
        Ok(())
    }

    fn pre_create(&self, request: &CreateRequest, _parent: Option<&Resource>) -> Result<StepPlan> {
        if !request.attribs.is_object() && !request.attribs.is_null() {
            return Err(ResourceError::Validation(format!(
                "attributes of {} must be an object",
                self.tag
            )));
        }
        let mut middle = vec![self.step_id("create_remote")];
        middle.extend(self.create_steps.iter().cloned());
        Ok(StepPlan::lifecycle(
            &Operation::Create,
            middle,
            request.params.clone(),
        ))
    }

    fn pre_update(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Update,
            vec![self.step_id("update_remote")],
            params,
        ))
    }

    fn pre_patch(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Patch,
            vec![self.step_id("refresh_remote")],
            params,
        ))
    }

    fn pre_delete(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Delete,
            vec![
                StepId::new(CASCADE_OWNED_LINKS_STEP),
                self.step_id("delete_remote"),
            ],
            params,
        ))
    }

    fn pre_expunge(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Expunge,
            vec![
                StepId::new(CASCADE_OWNED_LINKS_STEP),
                self.step_id("delete_remote"),
            ],
            params,
        ))
    }

    fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name.clone()).collect()
    }

    fn discoverable(&self) -> bool {
        self.discoverable
    }

    async fn discover_new(
        &self,
        client: &dyn PlatformClient,
        ext_id: Option<&str>,
        known: &HashSet<String>,
    ) -> Result<Vec<DiscoveredEntity>> {
        let population = match ext_id {
            Some(ext_id) => client
                .get(&self.remote_kind, ext_id)
                .await?
                .into_iter()
                .collect(),
            None => client.list(&self.remote_kind).await?,
        };

        let mut entities: Vec<DiscoveredEntity> = population
            .into_iter()
            .filter(|e| !known.contains(&e.ext_id))
            .map(|e| self.discovered(e))
            .collect();
        if self.parent_types.contains(&self.tag) {
            assign_levels(&mut entities);
        }
        Ok(entities)
    }

    async fn discover_died(&self, client: &dyn PlatformClient) -> Result<Option<Vec<RemoteIdentity>>> {
        let alive = client
            .list(&self.remote_kind)
            .await?
            .into_iter()
            .map(|e| RemoteIdentity {
                id: e.ext_id,
                name: e.name,
            })
            .collect();
        Ok(Some(alive))
    }

    async fn post_get(&self, client: &dyn PlatformClient, resource: &Resource) -> Result<Option<Value>> {
        let Some(ext_id) = resource.valid_ext_id() else {
            return Ok(None);
        };
        Ok(client
            .get(&self.remote_kind, ext_id)
            .await?
            .map(|e| e.to_value()))
    }

    async fn customize_list(
        &self,
        client: &dyn PlatformClient,
        page: &mut [ResourceInfo],
    ) -> Result<()> {
        let remote: HashMap<String, RemoteEntity> = client
            .list(&self.remote_kind)
            .await?
            .into_iter()
            .map(|e| (e.ext_id.clone(), e))
            .collect();

        for info in page
            .iter_mut()
            .filter(|i| i.resource_type == self.tag.as_str())
        {
            if let Some(entity) = info.ext_id.as_ref().and_then(|id| remote.get(id)) {
                info.ext_obj = Some(entity.to_value());
            }
        }
        Ok(())
    }
}

/// Provision the remote entity, adopting one that already exists
struct CreateRemote {
    kind: String,
}

#[async_trait]
impl Step for CreateRemote {
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
        let resource = task.resource().await?;
        let client = task.client();
        let parent_ext_id: Option<String> = ctx.get_as("parent_ext_id")?;

        if let Some(ext_id) = resource.valid_ext_id()
            && client.get(&self.kind, ext_id).await?.is_some()
        {
            tracing::info!(resource_id = resource.id, ext_id, "Remote entity already exists");
            return Ok(json!({ "ext_id": ext_id, "adopted": true }));
        }

        if let Some(existing) = client
            .find(&self.kind, &resource.name, parent_ext_id.as_deref())
            .await?
        {
            tracing::info!(
                resource_id = resource.id,
                ext_id = %existing.ext_id,
                "Adopting remote entity with the same name"
            );
            let ext_id = existing.ext_id;
            task.update_resource(|r| {
                r.ext_id = Some(ext_id.clone());
                Ok(())
            })
            .await?;
            ctx.insert("ext_id", json!(ext_id));
            return Ok(json!({ "ext_id": ext_id, "adopted": true }));
        }

        let spec = RemoteSpec {
            name: resource.name.clone(),
            parent: parent_ext_id,
            attributes: resource.attribs.clone(),
        };
        let ticket = client.create(&self.kind, &spec).await?;

        // a re-run after a failed poll finds the entity by ext_id
        let ext_id = ticket.ext_id.clone();
        task.update_resource(|r| {
            r.ext_id = Some(ext_id.clone());
            Ok(())
        })
        .await?;
        ctx.insert("ext_id", json!(ticket.ext_id));

        if let Some(job) = &ticket.job_id {
            task.poll_remote_job(job).await?;
        }
        Ok(json!({ "ext_id": ticket.ext_id, "adopted": false }))
    }
}

/// Push the stored name and attributes to the remote entity
struct UpdateRemote {
    kind: String,
}

#[async_trait]
impl Step for UpdateRemote {
    async fn run(&self, task: &TaskHandle, _ctx: &mut StepContext) -> Result<Value> {
        let resource = task.resource().await?;
        let ext_id = require_ext_id(&resource)?;
        let parent = match resource.parent_id {
            Some(parent_id) => task
                .store()
                .get_resource(parent_id)
                .await?
                .valid_ext_id()
                .map(str::to_string),
            None => None,
        };
        let spec = RemoteSpec {
            name: resource.name.clone(),
            parent,
            attributes: resource.attribs.clone(),
        };
        let ticket = task.client().update(&self.kind, ext_id, &spec).await?;
        if let Some(job) = &ticket.job_id {
            task.poll_remote_job(job).await?;
        }
        Ok(json!({ "ext_id": ext_id }))
    }
}

/// Pull name and attributes back from the remote entity
struct RefreshRemote {
    kind: String,
}

#[async_trait]
impl Step for RefreshRemote {
    async fn run(&self, task: &TaskHandle, _ctx: &mut StepContext) -> Result<Value> {
        let resource = task.resource().await?;
        let ext_id = require_ext_id(&resource)?;
        let entity = task
            .client()
            .get(&self.kind, ext_id)
            .await?
            .ok_or_else(|| ResourceError::remote_not_found(&self.kind, ext_id))?;

        task.update_resource(|r| {
            r.name = entity.name.clone();
            if !entity.attributes.is_null() {
                r.attribs = entity.attributes.clone();
            }
            Ok(())
        })
        .await?;
        Ok(entity.to_value())
    }
}

/// Remove the remote entity; one that is already gone counts as removed
struct DeleteRemote {
    kind: String,
}

#[async_trait]
impl Step for DeleteRemote {
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
        let held: Option<String> = match ctx.held("ext_id") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => None,
        };
        let ext_id = match held {
            Some(ext_id) => ext_id,
            None => match task.resource().await?.valid_ext_id() {
                Some(ext_id) => ext_id.to_string(),
                None => {
                    tracing::info!(
                        resource_id = task.resource_id(),
                        "No remote entity to delete"
                    );
                    return Ok(json!({ "deleted": null }));
                }
            },
        };

        match task.client().delete(&self.kind, &ext_id).await {
            Ok(ticket) => {
                if let Some(job) = &ticket.job_id {
                    task.poll_remote_job(job).await?;
                }
            }
            Err(e) if e.is_remote_not_found() => {
                tracing::info!(
                    resource_id = task.resource_id(),
                    ext_id = %ext_id,
                    "Remote entity already absent"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(json!({ "deleted": ext_id }))
    }
}

fn require_ext_id(resource: &Resource) -> Result<&str> {
    resource.valid_ext_id().ok_or_else(|| {
        ResourceError::Validation(format!(
            "resource {} has no remote entity",
            resource.id
        ))
    })
}
