//! Workflow engine
//!
//! One engine per container. A submitted operation becomes one job: the
//! resource is moved to its in-flight state, a job record is written, and
//! the steps run sequentially on a spawned tokio task. Jobs for different
//! resources run in parallel; the state guard on the resource row is the
//! only mutual exclusion.

use crate::context::StepContext;
use crate::plan::{Planner, StepPlan};
use crate::poller::poll_until;
use crate::step::{ResolvedStep, StepRegistry};
use crate::task::TaskHandle;
use resflow_config::{ContainerSettings, WorkflowSettings};
use resflow_core::{
    JobQuery, JobRecord, JobStatus, LinkGraph, Operation, PlatformClient, ResourceError,
    ResourceStatus, ResourceStore, Result, modify_resource,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Identity of the container an engine works for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: u64,
    pub name: String,
    /// Platform kind
    pub kind: String,
}

impl From<&ContainerSettings> for ContainerInfo {
    fn from(settings: &ContainerSettings) -> Self {
        Self {
            id: settings.id,
            name: settings.name.clone(),
            kind: settings.kind.clone(),
        }
    }
}

/// Handle returned for an asynchronously accepted operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accepted {
    pub taskid: Uuid,
    pub uuid: Uuid,
    pub resource_id: u64,
    pub steps: Vec<String>,
}

impl Accepted {
    pub fn status_code(&self) -> u16 {
        202
    }
}

/// Turn a finished job into an error unless it succeeded
pub fn require_success(job: JobRecord) -> Result<JobRecord> {
    if job.status == JobStatus::Success {
        return Ok(job);
    }
    Err(ResourceError::JobFailed {
        job: job.id.to_string(),
        message: job.error.clone().unwrap_or_else(|| job.status.to_string()),
    })
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ResourceStore>,
    client: Arc<dyn PlatformClient>,
    container: ContainerInfo,
    registry: StepRegistry,
    planner: Arc<dyn Planner>,
    settings: WorkflowSettings,
    worker: String,
    cancelled: Mutex<HashSet<Uuid>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn PlatformClient>,
        container: ContainerInfo,
        registry: StepRegistry,
        planner: Arc<dyn Planner>,
        settings: WorkflowSettings,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                container,
                registry,
                planner,
                settings,
                worker: worker.into(),
                cancelled: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.inner.store
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.inner.client
    }

    pub fn container(&self) -> &ContainerInfo {
        &self.inner.container
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.inner.registry
    }

    pub fn planner(&self) -> &Arc<dyn Planner> {
        &self.inner.planner
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.inner.settings
    }

    pub fn worker(&self) -> &str {
        &self.inner.worker
    }

    pub fn graph(&self) -> LinkGraph {
        LinkGraph::new(self.inner.store.clone())
    }

    /// Plan `operation` through the planner and start it
    pub async fn submit(
        &self,
        resource_id: u64,
        operation: Operation,
        params: Value,
        force: bool,
    ) -> Result<Accepted> {
        self.start(resource_id, operation, None, params, force, None)
            .await
    }

    /// Start `operation` with an explicit step plan
    pub async fn submit_plan(
        &self,
        resource_id: u64,
        operation: Operation,
        plan: StepPlan,
        force: bool,
    ) -> Result<Accepted> {
        self.start(resource_id, operation, Some(plan), Value::Null, force, None)
            .await
    }

    /// Submit and wait for the job to reach a terminal status
    pub async fn run(
        &self,
        resource_id: u64,
        operation: Operation,
        params: Value,
        force: bool,
    ) -> Result<JobRecord> {
        let accepted = self.submit(resource_id, operation, params, force).await?;
        self.wait(accepted.taskid).await
    }

    /// Poll the job record until it is terminal
    pub async fn wait(&self, job_id: Uuid) -> Result<JobRecord> {
        let store = self.inner.store.clone();
        poll_until(
            &self.inner.settings.job_poll,
            &format!("job {job_id}"),
            || {
                let store = store.clone();
                async move {
                    let job = store.get_job(job_id).await?;
                    Ok(job.status.is_terminal().then_some(job))
                }
            },
        )
        .await
    }

    /// Ask a running job to stop before its next step
    ///
    /// The cancel set stays locked across the status check; a job drops its
    /// entry only after its terminal record is saved.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let mut cancelled = self.inner.cancelled.lock().await;
        let job = self.inner.store.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(ResourceError::Conflict(format!(
                "job {job_id} already finished with {}",
                job.status
            )));
        }
        cancelled.insert(job_id);
        drop(cancelled);
        tracing::info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    pub async fn job(&self, job_id: Uuid) -> Result<JobRecord> {
        self.inner.store.get_job(job_id).await
    }

    pub async fn jobs_for_resource(&self, resource_id: u64) -> Result<Vec<JobRecord>> {
        self.inner
            .store
            .list_jobs(&JobQuery::for_resource(resource_id))
            .await
    }

    /// Fail jobs a dead worker left running
    ///
    /// Must run before this engine accepts work: every `Running` job of the
    /// container is considered orphaned. The resources land in `ERROR` and
    /// nothing is retried.
    pub async fn recover_interrupted_jobs(&self) -> Result<usize> {
        let query =
            JobQuery::for_container(self.inner.container.id).with_status(JobStatus::Running);
        let jobs = self.inner.store.list_jobs(&query).await?;
        let count = jobs.len();

        for mut job in jobs {
            let message = format!(
                "interrupted: worker {} stopped during {}",
                job.worker,
                job.current_step.as_deref().unwrap_or("startup")
            );
            tracing::warn!(job_id = %job.id, resource_id = job.resource_id, "{message}");
            job.finish(JobStatus::Failure, Some(message));
            self.inner.store.save_job(&job).await?;
            self.mark_failed(job.resource_id).await?;
        }
        Ok(count)
    }

    /// Run a nested workflow for a step of `parent_job` and wait for it
    pub(crate) async fn run_nested(
        &self,
        parent_job: Uuid,
        resource_id: u64,
        operation: Operation,
        params: Value,
        force: bool,
    ) -> Result<JobRecord> {
        let accepted = self
            .start(resource_id, operation, None, params, force, Some(parent_job))
            .await?;
        require_success(self.wait(accepted.taskid).await?)
    }

    pub(crate) async fn start(
        &self,
        resource_id: u64,
        operation: Operation,
        plan: Option<StepPlan>,
        params: Value,
        force: bool,
        parent_job: Option<Uuid>,
    ) -> Result<Accepted> {
        let store = &self.inner.store;
        let mut resource = store.get_resource(resource_id).await?;
        if resource.container_id != self.inner.container.id {
            return Err(ResourceError::Validation(format!(
                "resource {} belongs to container {}, not {}",
                resource.id, resource.container_id, self.inner.container.id
            )));
        }
        operation.guard(resource.id, resource.state, force)?;

        let plan = match plan {
            Some(plan) => plan,
            None => self.inner.planner.plan(&resource, &operation, params)?,
        };
        let steps = self.inner.registry.resolve(&plan.steps)?;

        resource.force_state(operation.in_flight_state());
        let resource = store.save_resource(&resource).await?;

        let mut job = JobRecord::new(
            format!("{operation} {} {}", resource.resource_type, resource.name),
            resource.id,
            self.inner.container.id,
            operation.clone(),
            self.inner.worker.clone(),
        );
        job.params = plan.params.clone();
        job.steps = plan.step_names();
        job.parent_job = parent_job;
        job.status = JobStatus::Running;

        let ctx = StepContext::seeded(&resource, &plan.params);
        job.context = ctx.as_map().clone();

        if let Err(e) = store.insert_job(&job).await {
            self.mark_failed(resource.id).await?;
            return Err(e);
        }

        tracing::info!(
            job_id = %job.id,
            resource_id = resource.id,
            operation = %operation,
            steps = job.steps.len(),
            "Workflow accepted"
        );

        let accepted = Accepted {
            taskid: job.id,
            uuid: resource.uuid,
            resource_id: resource.id,
            steps: job.steps.clone(),
        };

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(job, steps, ctx).await;
        });

        Ok(accepted)
    }

    async fn execute(self, mut job: JobRecord, steps: Vec<ResolvedStep>, mut ctx: StepContext) {
        let task = TaskHandle::new(self.clone(), &job);
        let outcome = self.run_steps(&task, &mut job, &steps, &mut ctx).await;

        match outcome {
            Ok(()) => {
                job.finish(JobStatus::Success, None);
                tracing::info!(
                    job_id = %job.id,
                    resource_id = job.resource_id,
                    elapsed_ms = job.elapsed_ms,
                    "Workflow succeeded"
                );
            }
            Err(e) => {
                let message = match &job.current_step {
                    Some(step) => format!("{step}: {e}"),
                    None => e.to_string(),
                };
                let status = match e {
                    ResourceError::Cancelled(_) => {
                        tracing::warn!(job_id = %job.id, "{message}");
                        JobStatus::Cancelled
                    }
                    _ => {
                        tracing::error!(
                            job_id = %job.id,
                            resource_id = job.resource_id,
                            error = %message,
                            "Workflow failed"
                        );
                        JobStatus::Failure
                    }
                };
                if let Err(e) = self.mark_failed(job.resource_id).await {
                    tracing::error!(resource_id = job.resource_id, error = %e, "Failed to mark resource ERROR");
                }
                job.finish(status, Some(message));
            }
        }

        job.context = ctx.into_map();
        if let Err(e) = self.inner.store.save_job(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
        self.inner.cancelled.lock().await.remove(&job.id);
    }

    async fn run_steps(
        &self,
        task: &TaskHandle,
        job: &mut JobRecord,
        steps: &[ResolvedStep],
        ctx: &mut StepContext,
    ) -> Result<()> {
        for resolved in steps {
            if self.inner.cancelled.lock().await.contains(&job.id) {
                return Err(ResourceError::Cancelled(format!(
                    "job {} cancelled before {}",
                    job.id, resolved.id
                )));
            }

            job.current_step = Some(resolved.id.to_string());
            self.inner.store.save_job(job).await?;
            tracing::debug!(job_id = %job.id, step = %resolved.id, "Running step");

            let result = resolved.step.run(task, ctx).await?;

            ctx.record_result(resolved.id.as_str(), result);
            job.completed_steps.push(resolved.id.to_string());
            job.context = ctx.as_map().clone();
            self.inner.store.save_job(job).await?;
            tracing::debug!(job_id = %job.id, step = %resolved.id, "Step finished");
        }
        Ok(())
    }

    /// In-flight resource of a failed job goes to `ERROR`
    async fn mark_failed(&self, resource_id: u64) -> Result<()> {
        modify_resource(self.inner.store.as_ref(), resource_id, |resource| {
            if resource.state.is_in_flight() || resource.state == ResourceStatus::Pending {
                resource.force_state(ResourceStatus::Error);
            }
            Ok(())
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StaticPlanner, active_resource, engine_with};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(counter: Arc<AtomicUsize>) -> StepRegistry {
        let mut registry = StepRegistry::with_lifecycle_steps();
        registry
            .register_fn("test.count", move |_task, ctx| {
                let counter = counter.clone();
                Box::pin(async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    ctx.insert("count", json!(n));
                    Ok(json!(n))
                })
            })
            .unwrap();
        registry
            .register_fn("test.fail", |_task, _ctx| {
                Box::pin(async { Err(ResourceError::remote("E500", "platform exploded")) })
            })
            .unwrap();
        registry
            .register_fn("test.slow", |_task, _ctx| {
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                    Ok(Value::Null)
                })
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_update_runs_steps_in_order_and_persists_context() {
        let counter = Arc::new(AtomicUsize::new(0));
        let planner = StaticPlanner::new().on("update", &["test.count", "test.count"]);
        let (store, engine) = engine_with(counting_registry(counter.clone()), planner);
        let resource = active_resource(&store, "web").await;

        let job = engine
            .run(resource.id, Operation::Update, json!({}), false)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(
            job.completed_steps,
            vec![
                "update_resource_pre_step",
                "test.count",
                "test.count",
                "update_resource_post_step"
            ]
        );
        assert_eq!(job.context["count"], json!(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().state,
            ResourceStatus::Active
        );
    }

    #[tokio::test]
    async fn test_failed_step_pins_error_without_rollback() {
        let counter = Arc::new(AtomicUsize::new(0));
        let planner = StaticPlanner::new().on("update", &["test.count", "test.fail", "test.count"]);
        let (store, engine) = engine_with(counting_registry(counter.clone()), planner);
        let resource = active_resource(&store, "web").await;

        let job = engine
            .run(resource.id, Operation::Update, json!({}), false)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Failure);
        assert!(job.error.as_deref().unwrap().starts_with("test.fail:"));
        assert!(job.error.as_deref().unwrap().contains("platform exploded"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(job.context["count"], json!(1));
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().state,
            ResourceStatus::Error
        );
        assert!(require_success(job).is_err());
    }

    #[tokio::test]
    async fn test_guard_refuses_in_flight_resource_without_change() {
        let planner = StaticPlanner::new().on("update", &["test.slow"]);
        let (store, engine) =
            engine_with(counting_registry(Arc::new(AtomicUsize::new(0))), planner);
        let resource = active_resource(&store, "web").await;

        let first = engine
            .submit(resource.id, Operation::Update, json!({}), false)
            .await
            .unwrap();
        let before = store.get_resource(resource.id).await.unwrap();
        assert_eq!(before.state, ResourceStatus::Updating);

        let err = engine
            .submit(resource.id, Operation::Delete, json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidState { .. }));
        assert_eq!(err.status_code(), 409);
        assert_eq!(store.get_resource(resource.id).await.unwrap(), before);
        assert_eq!(engine.jobs_for_resource(resource.id).await.unwrap().len(), 1);

        engine.wait(first.taskid).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_step_rejected_before_mutation() {
        let planner = StaticPlanner::new().on("update", &["test.missing"]);
        let (store, engine) = engine_with(StepRegistry::with_lifecycle_steps(), planner);
        let resource = active_resource(&store, "web").await;

        let err = engine
            .submit(resource.id, Operation::Update, json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Validation(_)));
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().state,
            ResourceStatus::Active
        );
    }

    #[tokio::test]
    async fn test_cancel_between_steps() {
        let planner = StaticPlanner::new().on("update", &["test.slow", "test.count"]);
        let counter = Arc::new(AtomicUsize::new(0));
        let (store, engine) = engine_with(counting_registry(counter.clone()), planner);
        let resource = active_resource(&store, "web").await;

        let accepted = engine
            .submit(resource.id, Operation::Update, json!({}), false)
            .await
            .unwrap();
        engine.cancel(accepted.taskid).await.unwrap();
        let job = engine.wait(accepted.taskid).await.unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().state,
            ResourceStatus::Error
        );
        assert!(engine.cancel(accepted.taskid).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_racing_completion_leaves_no_entry() {
        let (store, engine) =
            engine_with(StepRegistry::with_lifecycle_steps(), StaticPlanner::new());
        let resource = active_resource(&store, "web").await;

        for _ in 0..20 {
            let accepted = engine
                .submit(resource.id, Operation::Patch, Value::Null, false)
                .await
                .unwrap();
            let _ = engine.cancel(accepted.taskid).await;
            engine.wait(accepted.taskid).await.unwrap();
            // a cancelled patch leaves ERROR behind, which patch admits
            assert!(engine.inner.cancelled.lock().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_recover_interrupted_jobs() {
        let (store, engine) =
            engine_with(StepRegistry::with_lifecycle_steps(), StaticPlanner::new());
        let mut resource = active_resource(&store, "web").await;
        resource.force_state(ResourceStatus::Updating);
        store.save_resource(&resource).await.unwrap();

        let mut orphan = JobRecord::new("update web", resource.id, 10, Operation::Update, "dead");
        orphan.status = JobStatus::Running;
        orphan.current_step = Some("test.slow".into());
        store.insert_job(&orphan).await.unwrap();

        assert_eq!(engine.recover_interrupted_jobs().await.unwrap(), 1);
        let job = engine.job(orphan.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failure);
        assert!(job.error.unwrap().contains("worker dead"));
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().state,
            ResourceStatus::Error
        );
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (store, engine) = engine_with(
            StepRegistry::with_lifecycle_steps(),
            StaticPlanner::new(),
        );
        let resource = active_resource(&store, "web").await;
        let mut stuck = JobRecord::new("stuck", resource.id, 10, Operation::Update, "w");
        stuck.status = JobStatus::Running;
        store.insert_job(&stuck).await.unwrap();

        let err = engine.wait(stuck.id).await.unwrap_err();
        assert!(matches!(err, ResourceError::Timeout(_)));
    }
}
