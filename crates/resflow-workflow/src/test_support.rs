//! Fixtures shared by the unit tests of this crate

use crate::engine::{ContainerInfo, WorkflowEngine};
use crate::plan::{CreateRequest, Planner, StepPlan};
use crate::step::{StepId, StepRegistry};
use async_trait::async_trait;
use resflow_config::{PollSettings, WorkflowSettings};
use resflow_core::{
    AuthStatus, InMemoryStore, NewResource, ObjId, Operation, PlatformClient, RemoteEntity,
    RemoteJobStatus, RemoteSpec, RemoteTicket, Resource, ResourceStatus, ResourceStore, Result,
    TypeTag,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const CONTAINER_ID: u64 = 10;

/// Client whose remote jobs succeed unless the id reads `fail:<code>:<message>`
pub(crate) struct TestClient;

#[async_trait]
impl PlatformClient for TestClient {
    fn name(&self) -> &str {
        "test"
    }

    fn display_name(&self) -> &str {
        "Test platform"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("tester"))
    }

    async fn list(&self, _kind: &str) -> Result<Vec<RemoteEntity>> {
        Ok(Vec::new())
    }

    async fn get(&self, _kind: &str, _ext_id: &str) -> Result<Option<RemoteEntity>> {
        Ok(None)
    }

    async fn create(&self, _kind: &str, spec: &RemoteSpec) -> Result<RemoteTicket> {
        Ok(RemoteTicket::completed(format!("x-{}", spec.name)))
    }

    async fn update(&self, _kind: &str, ext_id: &str, _spec: &RemoteSpec) -> Result<RemoteTicket> {
        Ok(RemoteTicket::completed(ext_id))
    }

    async fn delete(&self, _kind: &str, ext_id: &str) -> Result<RemoteTicket> {
        Ok(RemoteTicket::completed(ext_id))
    }

    async fn job_status(&self, job_id: &str) -> Result<RemoteJobStatus> {
        Ok(match job_id.strip_prefix("fail:") {
            Some(rest) => {
                let (code, message) = rest.split_once(':').unwrap_or((rest, ""));
                RemoteJobStatus::Failed {
                    code: code.to_string(),
                    message: message.to_string(),
                }
            }
            None => RemoteJobStatus::Succeeded,
        })
    }
}

/// Planner wrapping a fixed middle section per operation
#[derive(Default)]
pub(crate) struct StaticPlanner {
    middles: HashMap<String, Vec<StepId>>,
}

impl StaticPlanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `operation` is an operation name, or "action" for every custom action
    pub(crate) fn on(mut self, operation: &str, steps: &[&str]) -> Self {
        self.middles.insert(
            operation.to_string(),
            steps.iter().map(|s| StepId::new(*s)).collect(),
        );
        self
    }

    fn middle(&self, operation: &Operation) -> Vec<StepId> {
        let key = match operation {
            Operation::Action(_) => "action",
            other => other.name(),
        };
        self.middles.get(key).cloned().unwrap_or_default()
    }
}

impl Planner for StaticPlanner {
    fn plan_create(&self, request: &CreateRequest, _parent: Option<&Resource>) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(
            &Operation::Create,
            self.middle(&Operation::Create),
            request.params.clone(),
        ))
    }

    fn plan(&self, _resource: &Resource, operation: &Operation, params: Value) -> Result<StepPlan> {
        Ok(StepPlan::lifecycle(operation, self.middle(operation), params))
    }
}

pub(crate) fn engine_on(
    store: Arc<dyn ResourceStore>,
    registry: StepRegistry,
    planner: StaticPlanner,
) -> (Arc<dyn ResourceStore>, WorkflowEngine) {
    let settings = WorkflowSettings {
        job_poll: PollSettings::fixed(5, 400),
        remote_poll: PollSettings::fixed(1, 50),
    };
    let engine = WorkflowEngine::new(
        store.clone(),
        Arc::new(TestClient),
        ContainerInfo {
            id: CONTAINER_ID,
            name: "test".into(),
            kind: "test".into(),
        },
        registry,
        Arc::new(planner),
        settings,
        "test-worker",
    );
    (store, engine)
}

pub(crate) fn engine_with(
    registry: StepRegistry,
    planner: StaticPlanner,
) -> (Arc<dyn ResourceStore>, WorkflowEngine) {
    engine_on(Arc::new(InMemoryStore::new()), registry, planner)
}

/// An adopted resource, ready for mutations
pub(crate) async fn active_resource(store: &Arc<dyn ResourceStore>, name: &str) -> Resource {
    let mut new = NewResource::pending(
        CONTAINER_ID,
        TypeTag::new("Provider.Domain"),
        ObjId::container(CONTAINER_ID).child(name),
        name,
    );
    new.state = ResourceStatus::Active;
    new.active = true;
    store.insert_resource(new).await.unwrap()
}

pub(crate) fn sample_resource() -> Resource {
    let now = chrono::Utc::now();
    Resource {
        id: 1,
        uuid: uuid::Uuid::new_v4(),
        objid: ObjId::new("10//abc"),
        resource_type: TypeTag::new("Provider.Domain"),
        name: "default".into(),
        desc: String::new(),
        ext_id: None,
        state: ResourceStatus::Active,
        attribs: Value::Object(Default::default()),
        parent_id: None,
        tags: Default::default(),
        active: true,
        container_id: CONTAINER_ID,
        created_at: now,
        updated_at: now,
    }
}
