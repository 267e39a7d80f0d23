//! Container: one remote platform and the resources it holds
//!
//! Composes the workflow engine, the descriptor registry and the
//! reconciler behind a CRUD-style surface. Every lookup is scoped to the
//! container; a resource of another container reads as not found.

use crate::descriptor::ResourceDescriptor;
use crate::discovery::ReconcileReport;
use crate::reconcile::Reconciler;
use crate::registry::DescriptorRegistry;
use resflow_config::{ReconcileSettings, WorkflowSettings};
use resflow_core::{
    AuthStatus, JobQuery, JobRecord, Link, LinkAttributes, LinkGraph, LinkTypeFilter, Operation,
    PlatformClient, Resource, ResourceError, ResourceInfo, ResourceQuery, ResourceStore, Result,
    TypeTag, modify_resource,
};
use resflow_workflow::{
    Accepted, ContainerInfo, CreateRequest, Planner, ResourceChanges, WorkflowEngine, find_sibling,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub struct Container {
    info: ContainerInfo,
    engine: WorkflowEngine,
    descriptors: Arc<DescriptorRegistry>,
    reconcile: ReconcileSettings,
}

impl Container {
    /// Fails when two descriptors register the same step id
    pub fn new(
        info: ContainerInfo,
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn PlatformClient>,
        descriptors: Arc<DescriptorRegistry>,
        workflow: WorkflowSettings,
        reconcile: ReconcileSettings,
        worker: impl Into<String>,
    ) -> Result<Self> {
        let steps = descriptors.step_registry()?;
        let planner: Arc<dyn Planner> = descriptors.clone();
        let engine = WorkflowEngine::new(
            store,
            client,
            info.clone(),
            steps,
            planner,
            workflow,
            worker,
        );
        Ok(Self {
            info,
            engine,
            descriptors,
            reconcile,
        })
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn container_info(&self) -> &ContainerInfo {
        &self.info
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn descriptors(&self) -> &DescriptorRegistry {
        &self.descriptors
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        self.engine.store()
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        self.engine.client()
    }

    pub fn graph(&self) -> LinkGraph {
        self.engine.graph()
    }

    /// Resource types this container can hold
    pub fn child_classes(&self) -> Vec<TypeTag> {
        self.descriptors.type_tags()
    }

    pub async fn check_auth(&self) -> Result<AuthStatus> {
        self.client().check_auth().await
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a resource and start its create workflow
    pub async fn resource_factory(&self, request: CreateRequest) -> Result<Accepted> {
        self.engine.create(request).await
    }

    /// Wait for a job to reach a terminal status
    pub async fn wait(&self, job_id: Uuid) -> Result<JobRecord> {
        self.engine.wait(job_id).await
    }

    pub async fn get_resource(&self, id: u64) -> Result<Resource> {
        let resource = self.store().get_resource(id).await?;
        if resource.container_id != self.id() || resource.state.is_terminal() {
            return Err(ResourceError::resource_not_found(id));
        }
        Ok(resource)
    }

    pub async fn get_resource_by_uuid(&self, uuid: Uuid) -> Result<Resource> {
        match self.store().find_resource_by_uuid(uuid).await? {
            Some(r) if r.container_id == self.id() && !r.state.is_terminal() => Ok(r),
            _ => Err(ResourceError::not_found("resource", uuid)),
        }
    }

    pub async fn get_resources(&self, query: ResourceQuery) -> Result<Vec<Resource>> {
        self.store()
            .list_resources(&query.in_container(self.id()))
            .await
    }

    /// Apply logical changes and push them to the remote
    pub async fn update_resource(&self, id: u64, changes: ResourceChanges) -> Result<Accepted> {
        let resource = self.get_resource(id).await?;
        if let Some(name) = &changes.name
            && *name != resource.name
        {
            if name.trim().is_empty() {
                return Err(ResourceError::Validation("resource name is empty".into()));
            }
            if find_sibling(
                self.store().as_ref(),
                self.id(),
                &resource.resource_type,
                resource.parent_id,
                name,
            )
            .await?
            .is_some()
            {
                return Err(ResourceError::DuplicateName(name.clone()));
            }
        }
        let params = serde_json::to_value(&changes)?;
        self.engine
            .submit(id, Operation::Update, params, false)
            .await
    }

    /// Re-run the create workflow of a resource left in `ERROR` by a failed create
    pub async fn retry_create(&self, id: u64) -> Result<Accepted> {
        self.get_resource(id).await?;
        self.engine.retry_create(id).await
    }

    /// Refresh the row from its remote entity
    pub async fn patch_resource(&self, id: u64) -> Result<Accepted> {
        self.get_resource(id).await?;
        self.engine
            .submit(id, Operation::Patch, Value::Null, false)
            .await
    }

    pub async fn delete_resource(&self, id: u64, force: bool) -> Result<Accepted> {
        self.get_resource(id).await?;
        self.engine
            .submit(id, Operation::Delete, Value::Null, force)
            .await
    }

    pub async fn expunge_resource(&self, id: u64, force: bool) -> Result<Accepted> {
        self.get_resource(id).await?;
        self.engine
            .submit(id, Operation::Expunge, Value::Null, force)
            .await
    }

    /// Run a custom action; parameters are checked before any step runs
    pub async fn action(&self, id: u64, name: &str, params: Value) -> Result<Accepted> {
        self.get_resource(id).await?;
        self.engine
            .submit(id, Operation::Action(name.to_string()), params, false)
            .await
    }

    /// Administrative override: the resource stops taking part in operations
    pub async fn disable(&self, id: u64) -> Result<Resource> {
        self.get_resource(id).await?;
        let resource = modify_resource(self.store().as_ref(), id, |r| {
            r.transition_to(resflow_core::ResourceStatus::Disabled)?;
            r.active = false;
            Ok(())
        })
        .await?;
        tracing::info!(resource_id = id, "Resource disabled");
        Ok(resource)
    }

    pub async fn enable(&self, id: u64) -> Result<Resource> {
        self.get_resource(id).await?;
        let resource = modify_resource(self.store().as_ref(), id, |r| {
            r.transition_to(resflow_core::ResourceStatus::Active)?;
            r.active = true;
            Ok(())
        })
        .await?;
        tracing::info!(resource_id = id, "Resource enabled");
        Ok(resource)
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    /// Locally known view
    pub async fn info(&self, id: u64) -> Result<ResourceInfo> {
        Ok(self.get_resource(id).await?.info())
    }

    /// Locally known view enriched with a live remote snapshot
    ///
    /// A failing remote read leaves `ext_obj` unset.
    pub async fn detail(&self, id: u64) -> Result<ResourceInfo> {
        let resource = self.get_resource(id).await?;
        let mut info = resource.info();
        let descriptor = self.descriptors.get(&resource.resource_type)?;
        match descriptor.post_get(self.client().as_ref(), &resource).await {
            Ok(ext_obj) => info.ext_obj = ext_obj,
            Err(e) => {
                tracing::warn!(resource_id = id, error = %e, "Remote read failed");
            }
        }
        Ok(info)
    }

    /// Project a listing, optionally attaching remote snapshots
    pub async fn list_info(&self, query: ResourceQuery, with_remote: bool) -> Result<Vec<ResourceInfo>> {
        let mut page: Vec<ResourceInfo> = self
            .get_resources(query)
            .await?
            .iter()
            .map(Resource::info)
            .collect();
        if !with_remote {
            return Ok(page);
        }

        let types: BTreeSet<String> = page.iter().map(|i| i.resource_type.clone()).collect();
        for tag in types {
            let Ok(descriptor) = self.descriptors.get(&TypeTag::new(tag.as_str())) else {
                continue;
            };
            if let Err(e) = descriptor
                .customize_list(self.client().as_ref(), &mut page)
                .await
            {
                tracing::warn!(resource_type = %tag, error = %e, "Remote listing failed");
            }
        }
        Ok(page)
    }

    // ------------------------------------------------------------------
    // Links and tags
    // ------------------------------------------------------------------

    pub async fn add_link(
        &self,
        link_type: &str,
        name: &str,
        start_id: u64,
        end_id: u64,
        attributes: LinkAttributes,
    ) -> Result<Link> {
        self.get_resource(start_id).await?;
        self.get_resource(end_id).await?;
        self.graph()
            .add_link(link_type, name, start_id, end_id, attributes)
            .await
    }

    pub async fn linked_resources(
        &self,
        id: u64,
        filter: &str,
        objdef: Option<&TypeTag>,
    ) -> Result<Vec<Resource>> {
        self.get_resource(id).await?;
        self.graph()
            .linked_resources(id, &LinkTypeFilter::new(filter), objdef)
            .await
    }

    pub async fn linking_resources(
        &self,
        id: u64,
        filter: &str,
        objdef: Option<&TypeTag>,
    ) -> Result<Vec<Resource>> {
        self.get_resource(id).await?;
        self.graph()
            .linking_resources(id, &LinkTypeFilter::new(filter), objdef)
            .await
    }

    pub async fn remove_link(&self, link_id: u64) -> Result<()> {
        let link = self.store().get_link(link_id).await?;
        let start = self.store().get_resource(link.start_id).await?;
        if start.container_id != self.id() {
            return Err(ResourceError::not_found("link", link_id));
        }
        self.store().delete_link(link_id).await
    }

    pub async fn add_tag(&self, id: u64, tag: &str) -> Result<Resource> {
        self.get_resource(id).await?;
        modify_resource(self.store().as_ref(), id, |r| {
            r.add_tag(tag);
            Ok(())
        })
        .await
    }

    pub async fn remove_tag(&self, id: u64, tag: &str) -> Result<Resource> {
        self.get_resource(id).await?;
        modify_resource(self.store().as_ref(), id, |r| {
            if r.remove_tag(tag) {
                Ok(())
            } else {
                Err(ResourceError::not_found("tag", tag))
            }
        })
        .await
    }

    pub async fn resources_tagged(&self, tag: &str) -> Result<Vec<Resource>> {
        self.get_resources(ResourceQuery::new().with_tag(tag)).await
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub async fn jobs(&self) -> Result<Vec<JobRecord>> {
        self.store()
            .list_jobs(&JobQuery::for_container(self.id()))
            .await
    }

    pub async fn jobs_for_resource(&self, id: u64) -> Result<Vec<JobRecord>> {
        self.engine.jobs_for_resource(id).await
    }

    pub async fn job(&self, job_id: Uuid) -> Result<JobRecord> {
        let job = self.engine.job(job_id).await?;
        if job.container_id != self.id() {
            return Err(ResourceError::not_found("job", job_id));
        }
        Ok(job)
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        self.job(job_id).await?;
        self.engine.cancel(job_id).await
    }

    pub async fn recover_interrupted_jobs(&self) -> Result<usize> {
        self.engine.recover_interrupted_jobs().await
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(
            self.store(),
            self.client().as_ref(),
            &self.info,
            &self.reconcile,
        )
    }

    fn discoverable(&self, types: Option<&[TypeTag]>) -> Result<Vec<Arc<dyn ResourceDescriptor>>> {
        match types {
            Some(types) => types
                .iter()
                .map(|t| self.descriptors.get(t).cloned())
                .collect(),
            None => Ok(self
                .descriptors
                .iter()
                .filter(|d| d.discoverable())
                .cloned()
                .collect()),
        }
    }

    /// Dry run: what a pass would adopt, flag and update
    pub async fn discover(&self, types: Option<&[TypeTag]>) -> Result<Vec<ReconcileReport>> {
        self.run_passes(types, false).await
    }

    /// Reconcile the given types, or every discoverable type in
    /// registration order
    pub async fn synchronize_resources(
        &self,
        types: Option<&[TypeTag]>,
    ) -> Result<Vec<ReconcileReport>> {
        self.run_passes(types, true).await
    }

    async fn run_passes(&self, types: Option<&[TypeTag]>, apply: bool) -> Result<Vec<ReconcileReport>> {
        let reconciler = self.reconciler();
        let mut reports = Vec::new();
        for descriptor in self.discoverable(types)? {
            reports.push(reconciler.reconcile(descriptor.as_ref(), apply).await?);
        }
        Ok(reports)
    }

    /// Adopt one remote entity without a provisioning workflow
    pub async fn adopt(&self, resource_type: &TypeTag, ext_id: &str) -> Result<Resource> {
        let descriptor = self.descriptors.get(resource_type)?;
        self.reconciler().adopt_one(descriptor.as_ref(), ext_id).await
    }

    /// Reconcile on a timer until `shutdown` turns true
    ///
    /// Reports of every pass go to `passes` when given. A failing pass is
    /// logged and the timer keeps running.
    pub async fn run_reconcile_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        passes: Option<mpsc::Sender<Vec<ReconcileReport>>>,
    ) {
        let period = Duration::from_secs(self.reconcile.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        tracing::info!(
            container = self.id(),
            interval_secs = period.as_secs(),
            "Reconcile loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.synchronize_resources(None).await {
                        Ok(reports) => {
                            if let Some(tx) = &passes
                                && tx.send(reports).await.is_err()
                            {
                                tracing::debug!("Pass receiver dropped");
                            }
                        }
                        Err(e) => {
                            tracing::error!(container = self.id(), error = %e, "Reconcile pass failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(container = self.id(), "Reconcile loop stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeClient, container_with};
    use resflow_config::DiedPolicy;
    use resflow_core::{JobStatus, ResourceStatus};
    use serde_json::json;

    fn settings(died_policy: DiedPolicy) -> ReconcileSettings {
        ReconcileSettings {
            interval_secs: 1,
            died_policy,
            detect_changes: true,
        }
    }

    async fn domain(container: &Container, name: &str) -> Resource {
        let accepted = container
            .resource_factory(CreateRequest::new("Provider.Domain", name))
            .await
            .unwrap();
        let job = container.wait(accepted.taskid).await.unwrap();
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error);
        container.get_resource(accepted.resource_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_provisions_remote_entity() {
        let client = Arc::new(FakeClient::new());
        let (_, container) = container_with(client.clone(), settings(DiedPolicy::MarkUnknown));

        let d = domain(&container, "default").await;
        assert_eq!(d.state, ResourceStatus::Active);
        let ext_id = d.valid_ext_id().unwrap();
        assert!(client.contains(ext_id));

        let detail = container.detail(d.id).await.unwrap();
        assert_eq!(detail.ext_obj.unwrap()["name"], json!("default"));
        assert!(container.info(d.id).await.unwrap().ext_obj.is_none());
    }

    #[tokio::test]
    async fn test_create_adopts_same_named_remote_entity() {
        let client = Arc::new(FakeClient::new());
        client.put("domain", "d-7", "default", None);
        let (_, container) = container_with(client.clone(), settings(DiedPolicy::MarkUnknown));

        let d = domain(&container, "default").await;
        assert_eq!(d.ext_id.as_deref(), Some("d-7"));
        assert_eq!(client.list("domain").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rename_checks_siblings() {
        let client = Arc::new(FakeClient::new());
        let (_, container) = container_with(client, settings(DiedPolicy::MarkUnknown));
        domain(&container, "a").await;
        let b = domain(&container, "b").await;

        let err = container
            .update_resource(
                b.id,
                ResourceChanges {
                    name: Some("a".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateName(_)));

        let accepted = container
            .update_resource(
                b.id,
                ResourceChanges {
                    desc: Some("second".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        container.wait(accepted.taskid).await.unwrap();
        assert_eq!(container.get_resource(b.id).await.unwrap().desc, "second");
    }

    #[tokio::test]
    async fn test_delete_of_vanished_entity_succeeds() {
        let client = Arc::new(FakeClient::new());
        let (_, container) = container_with(client.clone(), settings(DiedPolicy::MarkUnknown));
        let d = domain(&container, "default").await;
        client.remove(d.valid_ext_id().unwrap());

        let accepted = container.delete_resource(d.id, false).await.unwrap();
        let job = container.wait(accepted.taskid).await.unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(
            container.get_resource(d.id).await.unwrap().state,
            ResourceStatus::Deleted
        );

        let accepted = container.expunge_resource(d.id, false).await.unwrap();
        container.wait(accepted.taskid).await.unwrap();
        assert!(matches!(
            container.get_resource(d.id).await.unwrap_err(),
            ResourceError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_disable_enable_round_trip() {
        let client = Arc::new(FakeClient::new());
        let (_, container) = container_with(client, settings(DiedPolicy::MarkUnknown));
        let d = domain(&container, "default").await;

        let disabled = container.disable(d.id).await.unwrap();
        assert_eq!(disabled.state, ResourceStatus::Disabled);
        assert!(!disabled.active);

        let err = container
            .update_resource(d.id, ResourceChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidState { .. }));

        let enabled = container.enable(d.id).await.unwrap();
        assert_eq!(enabled.state, ResourceStatus::Active);
        assert!(enabled.active);
    }

    #[tokio::test]
    async fn test_tags_and_links_scoped_to_container() {
        let client = Arc::new(FakeClient::new());
        let (_, container) = container_with(client, settings(DiedPolicy::MarkUnknown));
        let a = domain(&container, "a").await;
        let b = domain(&container, "b").await;

        container.add_tag(a.id, "prod").await.unwrap();
        let tagged = container.resources_tagged("prod").await.unwrap();
        assert_eq!(tagged.len(), 1);
        assert!(matches!(
            container.remove_tag(b.id, "prod").await.unwrap_err(),
            ResourceError::NotFound { .. }
        ));

        let link = container
            .add_link("relation.3", "uses", a.id, b.id, LinkAttributes::reused())
            .await
            .unwrap();
        let linked = container.linked_resources(a.id, "relation%", None).await.unwrap();
        assert_eq!(linked[0].id, b.id);
        let linking = container.linking_resources(b.id, "relation%", None).await.unwrap();
        assert_eq!(linking[0].id, a.id);

        container.remove_link(link.id).await.unwrap();
        assert!(container.linked_resources(a.id, "%", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_is_dry_run() {
        let client = Arc::new(FakeClient::new());
        client.put("domain", "d-1", "one", None);
        let (store, container) = container_with(client, settings(DiedPolicy::MarkUnknown));

        let reports = container.discover(None).await.unwrap();
        assert_eq!(reports[0].new.len(), 1);
        assert!(!reports[0].applied);
        assert!(
            store
                .list_resources(&ResourceQuery::new())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_died_and_revived() {
        let client = Arc::new(FakeClient::new());
        client.put("domain", "d-1", "one", None);
        let (_, container) = container_with(client.clone(), settings(DiedPolicy::MarkUnknown));
        container.synchronize_resources(None).await.unwrap();
        let adopted = container
            .adopt(&TypeTag::new("Provider.Domain"), "d-1")
            .await
            .unwrap_err();
        assert!(matches!(adopted, ResourceError::Conflict(_)));

        client.remove("d-1");
        let reports = container.synchronize_resources(None).await.unwrap();
        let id = reports[0].died[0].resource_id.unwrap();
        assert_eq!(
            container.get_resource(id).await.unwrap().state,
            ResourceStatus::Unknown
        );

        client.put("domain", "d-1", "one", None);
        let reports = container.synchronize_resources(None).await.unwrap();
        assert_eq!(reports[0].revived.len(), 1);
        assert_eq!(
            container.get_resource(id).await.unwrap().state,
            ResourceStatus::Active
        );
    }

    #[tokio::test]
    async fn test_expunge_policy_removes_row() {
        let client = Arc::new(FakeClient::new());
        client.put("domain", "d-1", "one", None);
        let (_, container) = container_with(client.clone(), settings(DiedPolicy::Expunge));
        let reports = container.synchronize_resources(None).await.unwrap();
        let id = reports[0].new[0].resource_id.unwrap();

        client.remove("d-1");
        container.synchronize_resources(None).await.unwrap();
        assert!(container.get_resource(id).await.is_err());
    }

    #[tokio::test]
    async fn test_change_detection_updates_name() {
        let client = Arc::new(FakeClient::new());
        client.put("domain", "d-1", "one", None);
        let (_, container) = container_with(client.clone(), settings(DiedPolicy::MarkUnknown));
        let reports = container.synchronize_resources(None).await.unwrap();
        let id = reports[0].new[0].resource_id.unwrap();

        client.rename("d-1", "uno");
        let reports = container.synchronize_resources(None).await.unwrap();
        assert_eq!(reports[0].changed.len(), 1);
        assert_eq!(container.get_resource(id).await.unwrap().name, "uno");

        let reports = container.synchronize_resources(None).await.unwrap();
        assert!(reports.iter().all(ReconcileReport::is_clean));
    }

    #[tokio::test]
    async fn test_reconcile_loop_stops_on_shutdown() {
        let client = Arc::new(FakeClient::new());
        client.put("domain", "d-1", "one", None);
        let (_, container) = container_with(client, settings(DiedPolicy::MarkUnknown));
        let container = Arc::new(container);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(container.clone().run_reconcile_loop(shutdown_rx, Some(tx)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first[0].new.len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
