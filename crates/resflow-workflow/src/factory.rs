//! Resource factory
//!
//! Validates a create request, stores the resource in `PENDING` with its
//! derived objid and hands it to the engine, which moves it to `BUILDING`
//! before returning. A resource whose create failed can be sent through
//! the same plan again with `retry_create`.

use crate::engine::{Accepted, WorkflowEngine};
use crate::plan::{CreateRequest, StepPlan};
use resflow_core::{
    JobStatus, NewResource, ObjId, Operation, Resource, ResourceError, ResourceQuery,
    ResourceStatus, ResourceStore, Result, TypeTag, modify_resource,
};
use serde_json::Value;
use uuid::Uuid;

/// A sibling with the same type and name under the same parent
///
/// Deleted and expunged rows free their name.
pub async fn find_sibling(
    store: &dyn ResourceStore,
    container_id: u64,
    resource_type: &TypeTag,
    parent_id: Option<u64>,
    name: &str,
) -> Result<Option<Resource>> {
    let query = ResourceQuery::new()
        .in_container(container_id)
        .of_type(resource_type.clone())
        .with_parent(parent_id)
        .named(name);
    Ok(store
        .list_resources(&query)
        .await?
        .into_iter()
        .find(|r| r.state != ResourceStatus::Deleted))
}

/// Live parent of a resource being built, checked against its container
async fn load_parent(
    store: &dyn ResourceStore,
    container_id: u64,
    parent_id: Option<u64>,
) -> Result<Option<Resource>> {
    let Some(parent_id) = parent_id else {
        return Ok(None);
    };
    let parent = store.get_resource(parent_id).await.map_err(|e| match e {
        ResourceError::NotFound { .. } => {
            ResourceError::InvalidParent(format!("parent {parent_id} does not exist"))
        }
        other => other,
    })?;
    if parent.container_id != container_id {
        return Err(ResourceError::InvalidParent(format!(
            "parent {} belongs to container {}, not {}",
            parent.id, parent.container_id, container_id
        )));
    }
    if parent.state.is_terminal() {
        return Err(ResourceError::InvalidParent(format!(
            "parent {} has been expunged",
            parent.id
        )));
    }
    Ok(Some(parent))
}

fn check_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() || suffix.contains('.') || suffix.contains("//") {
        return Err(ResourceError::Validation(format!(
            "objid suffix '{suffix}' must be non-empty and contain neither '.' nor '//'"
        )));
    }
    Ok(())
}

impl WorkflowEngine {
    /// Create a logical resource and start its create workflow
    pub async fn create(&self, request: CreateRequest) -> Result<Accepted> {
        self.create_with_parent(request, None).await
    }

    pub(crate) async fn create_with_parent(
        &self,
        mut request: CreateRequest,
        parent_job: Option<Uuid>,
    ) -> Result<Accepted> {
        let container_id = self.container().id;
        let store = self.store().as_ref();

        if request.name.trim().is_empty() {
            return Err(ResourceError::Validation("resource name is empty".into()));
        }
        if request.attribs.is_null() {
            request.attribs = Value::Object(Default::default());
        }
        if let Some(suffix) = &request.suffix {
            check_suffix(suffix)?;
        }

        let parent = load_parent(store, container_id, request.parent_id).await?;

        let plan = self.planner().plan_create(&request, parent.as_ref())?;
        self.registry().resolve(&plan.steps)?;

        if find_sibling(
            store,
            container_id,
            &request.resource_type,
            request.parent_id,
            &request.name,
        )
        .await?
        .is_some()
        {
            return Err(ResourceError::DuplicateName(request.name));
        }

        let base = match &parent {
            Some(parent) => parent.objid.clone(),
            None => ObjId::container(container_id),
        };
        let objid = match &request.suffix {
            Some(suffix) => base.child(suffix),
            None => base.child_generated(),
        };

        let mut new = NewResource::pending(
            container_id,
            request.resource_type.clone(),
            objid,
            request.name.clone(),
        );
        new.desc = request.desc.clone();
        new.attribs = request.attribs.clone();
        new.parent_id = request.parent_id;
        new.tags = request.tags.clone();
        let resource = store.insert_resource(new).await?;

        tracing::info!(
            resource_id = resource.id,
            objid = %resource.objid,
            resource_type = %resource.resource_type,
            "Resource created in PENDING"
        );

        self.start_create(resource.id, plan, parent_job).await
    }

    /// Run the create workflow again for a resource whose last create failed
    ///
    /// The plan is rebuilt from the stored row and the failed job's
    /// parameters. Steps find whatever the failed run already provisioned.
    pub async fn retry_create(&self, resource_id: u64) -> Result<Accepted> {
        self.retry_create_with_parent(resource_id, None).await
    }

    pub(crate) async fn retry_create_with_parent(
        &self,
        resource_id: u64,
        parent_job: Option<Uuid>,
    ) -> Result<Accepted> {
        let container_id = self.container().id;
        let store = self.store().as_ref();
        let resource = store.get_resource(resource_id).await?;
        if resource.container_id != container_id {
            return Err(ResourceError::Validation(format!(
                "resource {} belongs to container {}, not {}",
                resource.id, resource.container_id, container_id
            )));
        }

        let last = self.jobs_for_resource(resource.id).await?.pop();
        let failed_create = last.as_ref().filter(|job| {
            job.operation == Operation::Create
                && matches!(job.status, JobStatus::Failure | JobStatus::Cancelled)
        });
        let Some(failed) = failed_create.filter(|_| resource.state == ResourceStatus::Error)
        else {
            return Err(ResourceError::InvalidState {
                id: resource.id,
                state: resource.state,
                operation: "retry_create".to_string(),
            });
        };

        let parent = load_parent(store, container_id, resource.parent_id).await?;
        let mut request = CreateRequest::new(resource.resource_type.clone(), resource.name.clone())
            .with_desc(resource.desc.clone())
            .with_attribs(resource.attribs.clone())
            .with_params(failed.params.clone());
        request.parent_id = resource.parent_id;
        request.tags = resource.tags.clone();

        let plan = self.planner().plan_create(&request, parent.as_ref())?;
        self.registry().resolve(&plan.steps)?;

        modify_resource(store, resource.id, |r| {
            r.force_state(ResourceStatus::Pending);
            Ok(())
        })
        .await?;
        tracing::info!(
            resource_id = resource.id,
            failed_job = %failed.id,
            "Retrying create"
        );
        self.start_create(resource.id, plan, parent_job).await
    }

    async fn start_create(
        &self,
        resource_id: u64,
        plan: StepPlan,
        parent_job: Option<Uuid>,
    ) -> Result<Accepted> {
        match self
            .start(
                resource_id,
                Operation::Create,
                Some(plan),
                Value::Null,
                false,
                parent_job,
            )
            .await
        {
            Ok(accepted) => Ok(accepted),
            Err(e) => {
                modify_resource(self.store().as_ref(), resource_id, |r| {
                    r.force_state(ResourceStatus::Error);
                    Ok(())
                })
                .await?;
                Err(e)
            }
        }
    }
}
