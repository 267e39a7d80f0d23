//! In-process simulated platform
//!
//! Entities live in a table guarded by a tokio mutex. Mutations return a
//! ticket whose job finishes after a configurable number of status polls,
//! and faults can be queued to make the next matching call or job fail.

use async_trait::async_trait;
use resflow_core::{
    AuthStatus, PlatformClient, RemoteEntity, RemoteJobStatus, RemoteSpec, RemoteTicket,
    ResourceError, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Platform call kinds, as recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteOp::List => "list",
            RemoteOp::Get => "get",
            RemoteOp::Create => "create",
            RemoteOp::Update => "update",
            RemoteOp::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRecord {
    pub op: RemoteOp,
    pub kind: String,
    pub ext_id: Option<String>,
}

#[derive(Debug, Clone)]
enum FaultTarget {
    /// The call itself fails
    Call(RemoteOp),
    /// The call succeeds but its asynchronous job fails
    Job,
}

#[derive(Debug, Clone)]
struct Fault {
    target: FaultTarget,
    kind: String,
    code: String,
    message: String,
}

#[derive(Debug, Clone)]
struct SimJob {
    polls_left: u32,
    outcome: RemoteJobStatus,
}

#[derive(Default)]
struct PlatformState {
    entities: Vec<RemoteEntity>,
    jobs: HashMap<String, SimJob>,
    faults: Vec<Fault>,
    log: Vec<OpRecord>,
    next_id: u64,
    next_job: u64,
}

impl PlatformState {
    fn record(&mut self, op: RemoteOp, kind: &str, ext_id: Option<&str>) {
        self.log.push(OpRecord {
            op,
            kind: kind.to_string(),
            ext_id: ext_id.map(str::to_string),
        });
    }

    fn take_fault(&mut self, matches: impl Fn(&FaultTarget) -> bool, kind: &str) -> Option<Fault> {
        let pos = self
            .faults
            .iter()
            .position(|f| f.kind == kind && matches(&f.target))?;
        Some(self.faults.remove(pos))
    }

    fn fail_call(&mut self, op: RemoteOp, kind: &str) -> Result<()> {
        match self.take_fault(|t| matches!(t, FaultTarget::Call(o) if *o == op), kind) {
            Some(fault) => {
                tracing::debug!(%op, kind, code = %fault.code, "Injected call failure");
                Err(ResourceError::remote(fault.code, fault.message))
            }
            None => Ok(()),
        }
    }

    fn start_job(&mut self, kind: &str, latency: u32) -> String {
        self.next_job += 1;
        let job_id = format!("job-{}", self.next_job);
        let outcome = match self.take_fault(|t| matches!(t, FaultTarget::Job), kind) {
            Some(fault) => RemoteJobStatus::Failed {
                code: fault.code,
                message: fault.message,
            },
            None => RemoteJobStatus::Succeeded,
        };
        self.jobs.insert(
            job_id.clone(),
            SimJob {
                polls_left: latency,
                outcome,
            },
        );
        job_id
    }

    fn position(&self, kind: &str, ext_id: &str) -> Option<usize> {
        self.entities
            .iter()
            .position(|e| e.kind == kind && e.ext_id == ext_id)
    }
}

/// Simulated platform implementing [`PlatformClient`]
pub struct MemoryPlatform {
    name: String,
    job_latency: u32,
    state: Mutex<PlatformState>,
}

impl MemoryPlatform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_latency: 1,
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Status polls a job answers `Running` before it finishes
    pub fn with_job_latency(mut self, polls: u32) -> Self {
        self.job_latency = polls;
        self
    }

    /// Create an entity out of band, as an operator on the platform would
    pub async fn insert_remote(
        &self,
        kind: &str,
        name: &str,
        parent: Option<&str>,
        attributes: Value,
    ) -> String {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let ext_id = format!("{kind}-{:04}", state.next_id);
        state.entities.push(RemoteEntity {
            ext_id: ext_id.clone(),
            kind: kind.to_string(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
            attributes,
        });
        ext_id
    }

    /// Remove an entity out of band; returns whether it existed
    pub async fn remove_remote(&self, ext_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.entities.len();
        state.entities.retain(|e| e.ext_id != ext_id);
        state.entities.len() != before
    }

    pub async fn rename_remote(&self, ext_id: &str, name: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.entities.iter_mut().find(|e| e.ext_id == ext_id) {
            Some(entity) => {
                entity.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Move an entity under another remote parent
    pub async fn set_parent(&self, ext_id: &str, parent: Option<&str>) -> bool {
        let mut state = self.state.lock().await;
        match state.entities.iter_mut().find(|e| e.ext_id == ext_id) {
            Some(entity) => {
                entity.parent = parent.map(str::to_string);
                true
            }
            None => false,
        }
    }

    pub async fn entity(&self, ext_id: &str) -> Option<RemoteEntity> {
        let state = self.state.lock().await;
        state.entities.iter().find(|e| e.ext_id == ext_id).cloned()
    }

    pub async fn entities(&self, kind: &str) -> Vec<RemoteEntity> {
        let state = self.state.lock().await;
        state
            .entities
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Make the next `op` call on `kind` fail with a remote error
    pub async fn fail_next(&self, op: RemoteOp, kind: &str, code: &str, message: &str) {
        self.state.lock().await.faults.push(Fault {
            target: FaultTarget::Call(op),
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Make the next asynchronous job on `kind` end in failure
    pub async fn fail_next_job(&self, kind: &str, code: &str, message: &str) {
        self.state.lock().await.faults.push(Fault {
            target: FaultTarget::Job,
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    pub async fn operations(&self) -> Vec<OpRecord> {
        self.state.lock().await.log.clone()
    }

    /// Number of logged `op` calls on `kind`
    pub async fn count(&self, op: RemoteOp, kind: &str) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|r| r.op == op && r.kind == kind)
            .count()
    }

    pub async fn clear_log(&self) {
        self.state.lock().await.log.clear();
    }

    /// Every entity, for persisting the platform between runs
    pub async fn export(&self) -> Vec<RemoteEntity> {
        self.state.lock().await.entities.clone()
    }

    /// Replace the entity table; new ids continue after the highest imported one
    pub async fn import(&self, entities: Vec<RemoteEntity>) {
        let mut state = self.state.lock().await;
        state.next_id = entities
            .iter()
            .filter_map(|e| e.ext_id.rsplit('-').next()?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        state.entities = entities;
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(format!("memory platform {}", self.name)))
    }

    async fn list(&self, kind: &str) -> Result<Vec<RemoteEntity>> {
        let mut state = self.state.lock().await;
        state.record(RemoteOp::List, kind, None);
        state.fail_call(RemoteOp::List, kind)?;
        Ok(state
            .entities
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    async fn get(&self, kind: &str, ext_id: &str) -> Result<Option<RemoteEntity>> {
        let mut state = self.state.lock().await;
        state.record(RemoteOp::Get, kind, Some(ext_id));
        state.fail_call(RemoteOp::Get, kind)?;
        Ok(state
            .position(kind, ext_id)
            .map(|i| state.entities[i].clone()))
    }

    async fn create(&self, kind: &str, spec: &RemoteSpec) -> Result<RemoteTicket> {
        let mut state = self.state.lock().await;
        state.record(RemoteOp::Create, kind, None);
        state.fail_call(RemoteOp::Create, kind)?;

        if let Some(parent) = &spec.parent
            && !state.entities.iter().any(|e| e.ext_id == *parent)
        {
            return Err(ResourceError::remote(
                "E404",
                format!("parent {parent} does not exist"),
            ));
        }

        state.next_id += 1;
        let ext_id = format!("{kind}-{:04}", state.next_id);
        state.entities.push(RemoteEntity {
            ext_id: ext_id.clone(),
            kind: kind.to_string(),
            name: spec.name.clone(),
            parent: spec.parent.clone(),
            attributes: spec.attributes.clone(),
        });
        let job_id = state.start_job(kind, self.job_latency);
        tracing::debug!(kind, ext_id = %ext_id, job_id = %job_id, "Remote entity created");
        Ok(RemoteTicket::pending(ext_id, job_id))
    }

    async fn update(&self, kind: &str, ext_id: &str, spec: &RemoteSpec) -> Result<RemoteTicket> {
        let mut state = self.state.lock().await;
        state.record(RemoteOp::Update, kind, Some(ext_id));
        state.fail_call(RemoteOp::Update, kind)?;

        let pos = state
            .position(kind, ext_id)
            .ok_or_else(|| ResourceError::remote_not_found(kind, ext_id))?;
        let entity = &mut state.entities[pos];
        entity.name = spec.name.clone();
        entity.attributes = spec.attributes.clone();
        let job_id = state.start_job(kind, self.job_latency);
        Ok(RemoteTicket::pending(ext_id, job_id))
    }

    async fn delete(&self, kind: &str, ext_id: &str) -> Result<RemoteTicket> {
        let mut state = self.state.lock().await;
        state.record(RemoteOp::Delete, kind, Some(ext_id));
        state.fail_call(RemoteOp::Delete, kind)?;

        let pos = state
            .position(kind, ext_id)
            .ok_or_else(|| ResourceError::remote_not_found(kind, ext_id))?;
        if state
            .entities
            .iter()
            .any(|e| e.parent.as_deref() == Some(ext_id))
        {
            return Err(ResourceError::remote(
                "E409",
                format!("{ext_id} still has children"),
            ));
        }
        state.entities.remove(pos);
        let job_id = state.start_job(kind, self.job_latency);
        Ok(RemoteTicket::pending(ext_id, job_id))
    }

    async fn job_status(&self, job_id: &str) -> Result<RemoteJobStatus> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ResourceError::not_found("remote job", job_id))?;
        if job.polls_left > 0 {
            job.polls_left -= 1;
            return Ok(RemoteJobStatus::Running);
        }
        Ok(job.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, parent: Option<&str>) -> RemoteSpec {
        RemoteSpec {
            name: name.into(),
            parent: parent.map(str::to_string),
            attributes: json!({}),
        }
    }

    #[tokio::test]
    async fn test_job_runs_for_latency_polls() {
        let platform = MemoryPlatform::new("test").with_job_latency(2);
        let ticket = platform.create("domain", &spec("d", None)).await.unwrap();
        let job = ticket.job_id.unwrap();

        assert_eq!(platform.job_status(&job).await.unwrap(), RemoteJobStatus::Running);
        assert_eq!(platform.job_status(&job).await.unwrap(), RemoteJobStatus::Running);
        assert_eq!(platform.job_status(&job).await.unwrap(), RemoteJobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_faults_fire_once() {
        let platform = MemoryPlatform::new("test");
        platform
            .fail_next(RemoteOp::Create, "domain", "E500", "backend down")
            .await;

        let err = platform.create("domain", &spec("d", None)).await.unwrap_err();
        assert!(err.to_string().contains("backend down"));
        platform.create("domain", &spec("d", None)).await.unwrap();

        platform.fail_next_job("domain", "E503", "quota").await;
        let ticket = platform.create("domain", &spec("e", None)).await.unwrap();
        let job = ticket.job_id.unwrap();
        platform.job_status(&job).await.unwrap();
        assert_eq!(
            platform.job_status(&job).await.unwrap(),
            RemoteJobStatus::Failed {
                code: "E503".into(),
                message: "quota".into()
            }
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_remote_not_found() {
        let platform = MemoryPlatform::new("test");
        let err = platform.delete("domain", "domain-9").await.unwrap_err();
        assert!(err.is_remote_not_found());
    }

    #[tokio::test]
    async fn test_parent_must_exist_and_outlive_children() {
        let platform = MemoryPlatform::new("test");
        let err = platform
            .create("project", &spec("p", Some("domain-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::RemoteError { .. }));

        let domain = platform.insert_remote("domain", "d", None, json!({})).await;
        platform
            .create("project", &spec("p", Some(&domain)))
            .await
            .unwrap();
        let err = platform.delete("domain", &domain).await.unwrap_err();
        assert!(err.to_string().contains("still has children"));

        assert_eq!(platform.count(RemoteOp::Create, "project").await, 2);
    }

    #[tokio::test]
    async fn test_import_continues_id_sequence() {
        let source = MemoryPlatform::new("a");
        source.insert_remote("domain", "d", None, json!({})).await;
        source.insert_remote("domain", "e", None, json!({})).await;

        let restored = MemoryPlatform::new("b");
        restored.import(source.export().await).await;
        assert_eq!(restored.entities("domain").await.len(), 2);

        let next = restored.insert_remote("domain", "f", None, json!({})).await;
        assert_eq!(next, "domain-0003");
    }
}
