//! Resource descriptor trait
//!
//! A descriptor carries everything type-specific: which parents a type may
//! have, the step plans of its lifecycle operations and custom actions, and
//! the discovery probes the reconciler runs for it.

use crate::discovery::{DiscoveredEntity, NewResourceDraft, RemoteIdentity};
use async_trait::async_trait;
use resflow_core::{Operation, PlatformClient, Resource, ResourceInfo, Result, TypeTag};
use resflow_workflow::{
    CASCADE_OWNED_LINKS_STEP, ContainerInfo, CreateRequest, StepId, StepPlan, StepRegistry,
};
use serde_json::Value;
use std::collections::HashSet;

/// Validator run on action parameters before any step
pub type ParamCheck = fn(&Value) -> Result<()>;

/// A custom action: the steps it runs between the generic action pre/post
/// steps, and an optional parameter check
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: String,
    pub steps: Vec<StepId>,
    pub check: Option<ParamCheck>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, steps: Vec<StepId>) -> Self {
        Self {
            name: name.into(),
            steps,
            check: None,
        }
    }

    pub fn with_check(mut self, check: ParamCheck) -> Self {
        self.check = Some(check);
        self
    }

    /// Validate `params` and build the plan
    pub fn plan(&self, params: Value) -> Result<StepPlan> {
        if let Some(check) = self.check {
            check(&params)?;
        }
        Ok(StepPlan::lifecycle(
            &Operation::Action(self.name.clone()),
            self.steps.clone(),
            params,
        ))
    }
}

#[async_trait]
pub trait ResourceDescriptor: Send + Sync {
    fn type_tag(&self) -> &TypeTag;

    /// Types a parent may have; empty means the type lives at the top
    fn parent_types(&self) -> &[TypeTag] {
        &[]
    }

    fn requires_parent(&self) -> bool {
        false
    }

    /// Register the type's own steps
    fn register_steps(&self, _registry: &mut StepRegistry) -> Result<()> {
        Ok(())
    }

    fn pre_create(&self, request: &CreateRequest, _parent: Option<&Resource>) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Create,
            Vec::new(),
            request.params.clone(),
        ))
    }

    fn pre_update(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(&Operation::Update, Vec::new(), params))
    }

    fn pre_patch(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(&Operation::Patch, Vec::new(), params))
    }

    fn pre_delete(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Delete,
            vec![StepId::new(CASCADE_OWNED_LINKS_STEP)],
            params,
        ))
    }

    fn pre_expunge(&self, _resource: &Resource, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Expunge,
            vec![StepId::new(CASCADE_OWNED_LINKS_STEP)],
            params,
        ))
    }

    fn action(&self, _name: &str) -> Option<&ActionSpec> {
        None
    }

    fn action_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the reconciler visits this type
    fn discoverable(&self) -> bool {
        false
    }

    /// Remote entities not represented in `known`, parents first
    ///
    /// With `ext_id` set only that entity is probed.
    async fn discover_new(
        &self,
        _client: &dyn PlatformClient,
        _ext_id: Option<&str>,
        _known: &HashSet<String>,
    ) -> Result<Vec<DiscoveredEntity>> {
        Ok(Vec::new())
    }

    /// Identities of every remote entity still alive
    ///
    /// `None` when the type cannot list its population; died detection is
    /// then skipped.
    async fn discover_died(&self, _client: &dyn PlatformClient) -> Result<Option<Vec<RemoteIdentity>>> {
        Ok(None)
    }

    /// Map one discovered entity to the row to persist
    fn synchronize(
        &self,
        container: &ContainerInfo,
        entity: &DiscoveredEntity,
        parent: Option<&Resource>,
    ) -> Result<NewResourceDraft> {
        Ok(NewResourceDraft::from_entity(container, entity, parent))
    }

    /// Live remote snapshot for `detail()`
    async fn post_get(&self, _client: &dyn PlatformClient, _resource: &Resource) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Attach remote snapshots to a page of projections
    async fn customize_list(
        &self,
        _client: &dyn PlatformClient,
        _page: &mut [ResourceInfo],
    ) -> Result<()> {
        Ok(())
    }
}
