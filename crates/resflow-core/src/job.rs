//! Workflow job records kept for audit and for waiting on completion

use crate::state::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Failure => write!(f, "FAILURE"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub name: String,
    pub params: serde_json::Value,
    pub resource_id: u64,
    pub container_id: u64,
    pub operation: Operation,

    /// Step ids in execution order
    pub steps: Vec<String>,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,

    /// Shared step context as of the last completed step
    pub context: serde_json::Map<String, serde_json::Value>,

    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub worker: String,
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,

    /// Job whose step spawned this one
    pub parent_job: Option<Uuid>,
}

impl JobRecord {
    pub fn new(
        name: impl Into<String>,
        resource_id: u64,
        container_id: u64,
        operation: Operation,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            params: serde_json::Value::Null,
            resource_id,
            container_id,
            operation,
            steps: Vec::new(),
            current_step: None,
            completed_steps: Vec::new(),
            context: Default::default(),
            start_time: Utc::now(),
            stop_time: None,
            status: JobStatus::Pending,
            worker: worker.into(),
            elapsed_ms: None,
            error: None,
            parent_job: None,
        }
    }

    pub fn finish(&mut self, status: JobStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.current_step = None;
        self.stop_time = Some(now);
        self.elapsed_ms = Some(
            now.signed_duration_since(self.start_time)
                .num_milliseconds()
                .max(0) as u64,
        );
    }
}

/// Filter for listing job records
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub resource_id: Option<u64>,
    pub container_id: Option<u64>,
    pub status: Option<JobStatus>,
}

impl JobQuery {
    pub fn for_resource(resource_id: u64) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Self::default()
        }
    }

    pub fn for_container(container_id: u64) -> Self {
        Self {
            container_id: Some(container_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.resource_id.is_none_or(|id| id == job.resource_id)
            && self.container_id.is_none_or(|id| id == job.container_id)
            && self.status.is_none_or(|status| status == job.status)
    }
}
