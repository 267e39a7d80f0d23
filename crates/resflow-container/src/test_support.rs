//! Fixtures shared by the unit tests of this crate

use crate::container::Container;
use crate::registry::DescriptorRegistry;
use crate::standard::StandardDescriptor;
use async_trait::async_trait;
use resflow_config::{PollSettings, ReconcileSettings, WorkflowSettings};
use resflow_core::{
    AuthStatus, InMemoryStore, PlatformClient, RemoteEntity, RemoteJobStatus, RemoteSpec,
    RemoteTicket, ResourceError, ResourceStore, Result,
};
use resflow_workflow::ContainerInfo;
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const CONTAINER_ID: u64 = 10;

/// Synchronous remote population kept in a vector
#[derive(Default)]
pub(crate) struct FakeClient {
    entities: Mutex<Vec<RemoteEntity>>,
    next_id: AtomicU64,
}

impl FakeClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, kind: &str, ext_id: &str, name: &str, parent: Option<&str>) {
        self.lock().push(RemoteEntity {
            ext_id: ext_id.into(),
            kind: kind.into(),
            name: name.into(),
            parent: parent.map(str::to_string),
            attributes: json!({}),
        });
    }

    pub(crate) fn remove(&self, ext_id: &str) {
        self.lock().retain(|e| e.ext_id != ext_id);
    }

    pub(crate) fn rename(&self, ext_id: &str, name: &str) {
        for entity in self.lock().iter_mut().filter(|e| e.ext_id == ext_id) {
            entity.name = name.into();
        }
    }

    pub(crate) fn contains(&self, ext_id: &str) -> bool {
        self.lock().iter().any(|e| e.ext_id == ext_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RemoteEntity>> {
        self.entities.lock().unwrap()
    }
}

#[async_trait]
impl PlatformClient for FakeClient {
    fn name(&self) -> &str {
        "fake"
    }

    fn display_name(&self) -> &str {
        "Fake platform"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("tester"))
    }

    async fn list(&self, kind: &str) -> Result<Vec<RemoteEntity>> {
        Ok(self.lock().iter().filter(|e| e.kind == kind).cloned().collect())
    }

    async fn get(&self, kind: &str, ext_id: &str) -> Result<Option<RemoteEntity>> {
        Ok(self
            .lock()
            .iter()
            .find(|e| e.kind == kind && e.ext_id == ext_id)
            .cloned())
    }

    async fn create(&self, kind: &str, spec: &RemoteSpec) -> Result<RemoteTicket> {
        let ext_id = format!("{kind}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 100);
        self.lock().push(RemoteEntity {
            ext_id: ext_id.clone(),
            kind: kind.into(),
            name: spec.name.clone(),
            parent: spec.parent.clone(),
            attributes: spec.attributes.clone(),
        });
        Ok(RemoteTicket::pending(ext_id, "job-ok"))
    }

    async fn update(&self, kind: &str, ext_id: &str, spec: &RemoteSpec) -> Result<RemoteTicket> {
        let mut entities = self.lock();
        let entity = entities
            .iter_mut()
            .find(|e| e.kind == kind && e.ext_id == ext_id)
            .ok_or_else(|| ResourceError::remote_not_found(kind, ext_id))?;
        entity.name = spec.name.clone();
        entity.attributes = spec.attributes.clone();
        Ok(RemoteTicket::completed(ext_id))
    }

    async fn delete(&self, kind: &str, ext_id: &str) -> Result<RemoteTicket> {
        let mut entities = self.lock();
        let before = entities.len();
        entities.retain(|e| !(e.kind == kind && e.ext_id == ext_id));
        if entities.len() == before {
            return Err(ResourceError::remote_not_found(kind, ext_id));
        }
        Ok(RemoteTicket::completed(ext_id))
    }

    async fn job_status(&self, _job_id: &str) -> Result<RemoteJobStatus> {
        Ok(RemoteJobStatus::Succeeded)
    }
}

pub(crate) fn descriptors() -> DescriptorRegistry {
    let mut registry = DescriptorRegistry::new();
    registry
        .register(Arc::new(StandardDescriptor::new("Provider.Domain", "domain")))
        .unwrap();
    registry
        .register(Arc::new(
            StandardDescriptor::new("Provider.Project", "project")
                .with_parent_types(["Provider.Domain"])
                .requiring_parent()
                .hierarchical(),
        ))
        .unwrap();
    registry
}

pub(crate) fn container_with(
    client: Arc<FakeClient>,
    reconcile: ReconcileSettings,
) -> (Arc<dyn ResourceStore>, Container) {
    let store: Arc<dyn ResourceStore> = Arc::new(InMemoryStore::new());
    let container = Container::new(
        ContainerInfo {
            id: CONTAINER_ID,
            name: "fake".into(),
            kind: "fake".into(),
        },
        store.clone(),
        client,
        Arc::new(descriptors()),
        WorkflowSettings {
            job_poll: PollSettings::fixed(5, 400),
            remote_poll: PollSettings::fixed(1, 50),
        },
        reconcile,
        "test-worker",
    )
    .unwrap();
    (store, container)
}
