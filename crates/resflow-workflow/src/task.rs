//! Handle given to every running step

use crate::engine::{ContainerInfo, WorkflowEngine, require_success};
use crate::plan::{CreateRequest, Planner};
use crate::poller::poll_until;
use resflow_core::{
    JobRecord, LinkGraph, Operation, PlatformClient, RemoteJobStatus, Resource, ResourceError,
    ResourceStore, Result, modify_resource,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskHandle {
    engine: WorkflowEngine,
    job_id: Uuid,
    resource_id: u64,
    operation: Operation,
}

impl TaskHandle {
    pub(crate) fn new(engine: WorkflowEngine, job: &JobRecord) -> Self {
        Self {
            engine,
            job_id: job.id,
            resource_id: job.resource_id,
            operation: job.operation.clone(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn resource_id(&self) -> u64 {
        self.resource_id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        self.engine.store()
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        self.engine.client()
    }

    pub fn container(&self) -> &ContainerInfo {
        self.engine.container()
    }

    pub fn planner(&self) -> &Arc<dyn Planner> {
        self.engine.planner()
    }

    pub fn graph(&self) -> LinkGraph {
        self.engine.graph()
    }

    /// Current row of the resource this job works on
    pub async fn resource(&self) -> Result<Resource> {
        self.store().get_resource(self.resource_id).await
    }

    pub async fn update_resource<F>(&self, change: F) -> Result<Resource>
    where
        F: FnOnce(&mut Resource) -> Result<()> + Send,
    {
        modify_resource(self.store().as_ref(), self.resource_id, change).await
    }

    /// Run a workflow on another resource and block this step until it ends
    ///
    /// A child that does not succeed fails the calling step.
    pub async fn run_child(
        &self,
        resource_id: u64,
        operation: Operation,
        params: Value,
        force: bool,
    ) -> Result<JobRecord> {
        tracing::debug!(
            parent_job = %self.job_id,
            resource_id,
            operation = %operation,
            "Starting child workflow"
        );
        self.engine
            .run_nested(self.job_id, resource_id, operation, params, force)
            .await
    }

    /// Create a resource through the factory and wait for it to be built
    pub async fn create_child(&self, request: CreateRequest) -> Result<Resource> {
        let accepted = self
            .engine
            .create_with_parent(request, Some(self.job_id))
            .await?;
        require_success(self.engine.wait(accepted.taskid).await?)?;
        self.store().get_resource(accepted.resource_id).await
    }

    /// Retry the failed create of a child resource and wait for it
    pub async fn retry_child(&self, resource_id: u64) -> Result<Resource> {
        let accepted = self
            .engine
            .retry_create_with_parent(resource_id, Some(self.job_id))
            .await?;
        require_success(self.engine.wait(accepted.taskid).await?)?;
        self.store().get_resource(resource_id).await
    }

    /// Wait for an asynchronous platform-side job
    ///
    /// A remote failure keeps the platform's code and message.
    pub async fn poll_remote_job(&self, remote_job: &str) -> Result<()> {
        let client = self.client().clone();
        poll_until(
            &self.engine.settings().remote_poll,
            &format!("remote job {remote_job}"),
            || {
                let client = client.clone();
                async move {
                    match client.job_status(remote_job).await? {
                        RemoteJobStatus::Running => Ok(None),
                        RemoteJobStatus::Succeeded => Ok(Some(())),
                        RemoteJobStatus::Failed { code, message } => {
                            Err(ResourceError::remote(code, message))
                        }
                    }
                }
            },
        )
        .await?;
        tracing::debug!(job_id = %self.job_id, remote_job, "Remote job finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepRegistry;
    use crate::test_support::{StaticPlanner, active_resource, engine_with};
    use resflow_core::{JobStatus, ResourceStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_remote_job_failure_fails_step() {
        let mut registry = StepRegistry::with_lifecycle_steps();
        registry
            .register_fn("test.remote", |task, _ctx| {
                Box::pin(async move {
                    task.poll_remote_job("fail:E503:quota exceeded").await?;
                    Ok(Value::Null)
                })
            })
            .unwrap();
        let (store, engine) = engine_with(registry, StaticPlanner::new().on("patch", &["test.remote"]));
        let resource = active_resource(&store, "web").await;

        let job = engine
            .run(resource.id, Operation::Patch, json!({}), false)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failure);
        assert!(job.error.unwrap().contains("[E503]: quota exceeded"));
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().state,
            ResourceStatus::Error
        );
    }

    #[tokio::test]
    async fn test_remote_job_success() {
        let mut registry = StepRegistry::with_lifecycle_steps();
        registry
            .register_fn("test.remote", |task, ctx| {
                Box::pin(async move {
                    task.poll_remote_job("ok").await?;
                    ctx.insert("remote_done", json!(true));
                    Ok(Value::Null)
                })
            })
            .unwrap();
        let (store, engine) = engine_with(registry, StaticPlanner::new().on("patch", &["test.remote"]));
        let resource = active_resource(&store, "web").await;

        let job = engine
            .run(resource.id, Operation::Patch, json!({}), false)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.context["remote_done"], json!(true));
    }

    #[tokio::test]
    async fn test_child_workflow_blocks_parent_step() {
        let mut registry = StepRegistry::with_lifecycle_steps();
        registry
            .register_fn("test.touch_sibling", |task, ctx| {
                Box::pin(async move {
                    let sibling: u64 = ctx.param("sibling").unwrap_or_default();
                    let child = task
                        .run_child(sibling, Operation::Update, json!({"desc": "touched"}), false)
                        .await?;
                    ctx.insert("child_job", json!(child.id));
                    Ok(Value::Null)
                })
            })
            .unwrap();
        let (store, engine) =
            engine_with(registry, StaticPlanner::new().on("action", &["test.touch_sibling"]));
        let resource = active_resource(&store, "web").await;
        let sibling = active_resource(&store, "db").await;

        let job = engine
            .run(
                resource.id,
                Operation::Action("touch".into()),
                json!({"sibling": sibling.id}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Success);

        let child_id: Uuid = serde_json::from_value(job.context["child_job"].clone()).unwrap();
        let child = engine.job(child_id).await.unwrap();
        assert_eq!(child.parent_job, Some(job.id));
        assert_eq!(child.status, JobStatus::Success);
        assert!(child.stop_time.unwrap() <= job.stop_time.unwrap());
        assert_eq!(store.get_resource(sibling.id).await.unwrap().desc, "touched");
    }
}
