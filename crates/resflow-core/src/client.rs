//! Platform client trait
//!
//! The only boundary through which workflow steps and the reconciler talk
//! to a remote platform. Every container owns one client.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Returns the platform kind (e.g., "memory")
    fn name(&self) -> &str;

    /// Returns the platform display name for UI
    fn display_name(&self) -> &str;

    /// Check that the connection is usable
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// All remote entities of one kind
    async fn list(&self, kind: &str) -> Result<Vec<RemoteEntity>>;

    async fn get(&self, kind: &str, ext_id: &str) -> Result<Option<RemoteEntity>>;

    /// Look an entity up by name under a remote parent
    async fn find(
        &self,
        kind: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<RemoteEntity>> {
        let entities = self.list(kind).await?;
        Ok(entities
            .into_iter()
            .find(|e| e.name == name && e.parent.as_deref() == parent))
    }

    async fn create(&self, kind: &str, spec: &RemoteSpec) -> Result<RemoteTicket>;

    /// Rename the entity and replace its attributes
    ///
    /// `spec.parent` names the entity's current parent; updates never move
    /// an entity.
    async fn update(&self, kind: &str, ext_id: &str, spec: &RemoteSpec) -> Result<RemoteTicket>;

    /// Fails with `RemoteNotFound` when the entity is already gone
    async fn delete(&self, kind: &str, ext_id: &str) -> Result<RemoteTicket>;

    /// Status of an asynchronous platform-side job
    async fn job_status(&self, job_id: &str) -> Result<RemoteJobStatus>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Remote view of one physical entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub ext_id: String,
    pub kind: String,
    pub name: String,

    /// Remote id of the parent entity, if the platform nests this kind
    pub parent: Option<String>,

    pub attributes: serde_json::Value,
}

impl RemoteEntity {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Desired shape of an entity to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub name: String,
    pub parent: Option<String>,
    pub attributes: serde_json::Value,
}

/// Acknowledgement of a remote mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTicket {
    pub ext_id: String,

    /// Set when the platform finishes the work asynchronously
    pub job_id: Option<String>,
}

impl RemoteTicket {
    pub fn completed(ext_id: impl Into<String>) -> Self {
        Self {
            ext_id: ext_id.into(),
            job_id: None,
        }
    }

    pub fn pending(ext_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            ext_id: ext_id.into(),
            job_id: Some(job_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteJobStatus {
    Running,
    Succeeded,
    Failed { code: String, message: String },
}
