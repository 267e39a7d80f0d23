//! Error taxonomy shared by every resflow crate

use crate::state::ResourceStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot {operation} resource {id} while it is {state}")]
    InvalidState {
        id: u64,
        state: ResourceStatus,
        operation: String,
    },

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("a sibling named '{0}' already exists")]
    DuplicateName(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("remote entity not found: {kind}/{ext_id}")]
    RemoteNotFound { kind: String, ext_id: String },

    #[error("remote error [{code}]: {message}")]
    RemoteError { code: String, message: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("job {job} failed: {message}")]
    JobFailed { job: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("state file error: {0}")]
    StateError(String),

    #[error("lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResourceError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn resource_not_found(id: u64) -> Self {
        Self::not_found("resource", id)
    }

    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteError {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn remote_not_found(kind: impl Into<String>, ext_id: impl Into<String>) -> Self {
        Self::RemoteNotFound {
            kind: kind.into(),
            ext_id: ext_id.into(),
        }
    }

    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, Self::RemoteNotFound { .. })
    }

    /// HTTP-like status for surfacing the error to an API caller
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidParent(_) => 400,
            Self::NotFound { .. } => 404,
            Self::InvalidState { .. } | Self::DuplicateName(_) | Self::Conflict(_) => 409,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ResourceError::Validation("bad".into()).status_code(), 400);
        assert_eq!(ResourceError::resource_not_found(7).status_code(), 404);
        assert_eq!(ResourceError::DuplicateName("web".into()).status_code(), 409);
        assert_eq!(
            ResourceError::InvalidState {
                id: 1,
                state: ResourceStatus::Building,
                operation: "update".into(),
            }
            .status_code(),
            409
        );
        assert_eq!(ResourceError::remote("E42", "quota").status_code(), 500);
    }

    #[test]
    fn test_remote_error_keeps_platform_message() {
        let err = ResourceError::remote("409.3", "name already taken on platform");
        assert_eq!(
            err.to_string(),
            "remote error [409.3]: name already taken on platform"
        );
    }
}
