use resflow_config::{
    ContainerSettings, DiedPolicy, PollSettings, ReconcileSettings, Settings, WorkflowSettings,
};
use resflow_container::Container;
use resflow_core::{InMemoryStore, JobStatus, Resource, ResourceStore};
use resflow_platform_memory::{MemoryPlatform, memory_container};
use resflow_workflow::{Accepted, CreateRequest};
use std::sync::Arc;

pub const CONTAINER_ID: u64 = 10;

/// One memory platform, one store and the container joining them
pub struct Lab {
    pub platform: Arc<MemoryPlatform>,
    pub store: Arc<dyn ResourceStore>,
    pub container: Container,
}

impl Lab {
    pub fn new() -> Self {
        Self::build(MemoryPlatform::new("lab"), DiedPolicy::MarkUnknown)
    }

    #[allow(dead_code)]
    pub fn with_policy(policy: DiedPolicy) -> Self {
        Self::build(MemoryPlatform::new("lab"), policy)
    }

    /// Remote jobs stay `Running` for `polls` status checks of 10ms
    #[allow(dead_code)]
    pub fn slow(polls: u32) -> Self {
        let mut lab = Self::build(
            MemoryPlatform::new("lab").with_job_latency(polls),
            DiedPolicy::MarkUnknown,
        );
        let settings = settings(DiedPolicy::MarkUnknown, PollSettings::fixed(10, 200));
        lab.container = memory_container(
            &settings.containers[0],
            lab.store.clone(),
            lab.platform.clone(),
            &settings,
        )
        .unwrap();
        lab
    }

    fn build(platform: MemoryPlatform, policy: DiedPolicy) -> Self {
        let platform = Arc::new(platform);
        let store: Arc<dyn ResourceStore> = Arc::new(InMemoryStore::new());
        let settings = settings(policy, PollSettings::fixed(1, 100));
        let container = memory_container(
            &settings.containers[0],
            store.clone(),
            platform.clone(),
            &settings,
        )
        .unwrap();
        Self {
            platform,
            store,
            container,
        }
    }

    /// Create through the factory and wait for the workflow to succeed
    pub async fn create(&self, request: CreateRequest) -> Resource {
        let accepted = self.container.resource_factory(request).await.unwrap();
        self.finish(&accepted).await
    }

    pub async fn finish(&self, accepted: &Accepted) -> Resource {
        let job = self.container.wait(accepted.taskid).await.unwrap();
        assert_eq!(job.status, JobStatus::Success, "job failed: {:?}", job.error);
        self.store.get_resource(accepted.resource_id).await.unwrap()
    }

    #[allow(dead_code)]
    pub async fn reload(&self, resource: &Resource) -> Resource {
        self.store.get_resource(resource.id).await.unwrap()
    }
}

fn settings(died_policy: DiedPolicy, remote_poll: PollSettings) -> Settings {
    Settings {
        worker_name: "test-worker".into(),
        workflow: WorkflowSettings {
            job_poll: PollSettings::fixed(5, 2000),
            remote_poll,
        },
        reconcile: ReconcileSettings {
            interval_secs: 1,
            died_policy,
            detect_changes: true,
        },
        containers: vec![ContainerSettings {
            id: CONTAINER_ID,
            name: "lab".into(),
            kind: "memory".into(),
        }],
        ..Default::default()
    }
}
