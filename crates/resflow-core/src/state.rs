//! Resource lifecycle state machine
//!
//! ```text
//! PENDING ──► BUILDING ──► ACTIVE ◄──► UPDATING
//!                │           │
//!                ▼           ▼
//!              ERROR ──► DELETING ──► DELETED ──► EXPUNGING ──► EXPUNGED
//!
//! ACTIVE | ERROR | UNKNOWN ◄──► DISABLED
//! ```
//!
//! Every mutating operation passes through [`Operation::guard`], which is the
//! only concurrency control on a resource row.

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Pending,
    Building,
    Active,
    Updating,
    Error,
    Deleting,
    Deleted,
    Expunging,
    Expunged,
    Unknown,
    Disabled,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 11] = [
        ResourceStatus::Pending,
        ResourceStatus::Building,
        ResourceStatus::Active,
        ResourceStatus::Updating,
        ResourceStatus::Error,
        ResourceStatus::Deleting,
        ResourceStatus::Deleted,
        ResourceStatus::Expunging,
        ResourceStatus::Expunged,
        ResourceStatus::Unknown,
        ResourceStatus::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "PENDING",
            ResourceStatus::Building => "BUILDING",
            ResourceStatus::Active => "ACTIVE",
            ResourceStatus::Updating => "UPDATING",
            ResourceStatus::Error => "ERROR",
            ResourceStatus::Deleting => "DELETING",
            ResourceStatus::Deleted => "DELETED",
            ResourceStatus::Expunging => "EXPUNGING",
            ResourceStatus::Expunged => "EXPUNGED",
            ResourceStatus::Unknown => "UNKNOWN",
            ResourceStatus::Disabled => "DISABLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ResourceStatus::Expunged
    }

    /// A workflow currently owns the resource
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ResourceStatus::Building
                | ResourceStatus::Updating
                | ResourceStatus::Deleting
                | ResourceStatus::Expunging
        )
    }

    /// States from which update, patch, delete, expunge and actions may start
    pub fn is_mutable(self) -> bool {
        matches!(
            self,
            ResourceStatus::Active | ResourceStatus::Error | ResourceStatus::Unknown
        )
    }

    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;

        match (self, next) {
            (Expunged, _) => false,
            (Pending, Building) => true,
            (Building, Active) => true,
            (Updating, Active) => true,
            (Deleting, Deleted) => true,
            (Expunging, Expunged) => true,
            (Active | Error | Unknown, Updating | Deleting | Expunging | Disabled) => true,
            (Deleted, Expunging) => true,
            (Expunging, Deleting | Expunging) => true,
            (Disabled, Active) => true,
            // reconciler verdicts
            (Active | Error | Disabled, Unknown) => true,
            (Unknown, Active) => true,
            (Deleted, Error) => false,
            (_, Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceStatus::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ResourceError::Validation(format!("unknown resource state: {s}")))
    }
}

/// A mutation carried out by a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Patch,
    Delete,
    Expunge,
    /// Custom, type-specific action such as `add_security_group`
    Action(String),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
            Operation::Expunge => "expunge",
            Operation::Action(name) => name,
        }
    }

    /// Whether the operation may start from `state`
    ///
    /// `force` lets delete and expunge take any non-terminal resource.
    pub fn admits(&self, state: ResourceStatus, force: bool) -> bool {
        match self {
            Operation::Create => state == ResourceStatus::Pending,
            Operation::Update | Operation::Patch | Operation::Action(_) => state.is_mutable(),
            Operation::Delete => {
                state.is_mutable()
                    || state == ResourceStatus::Expunging
                    || (force && !state.is_terminal())
            }
            Operation::Expunge => {
                state.is_mutable()
                    || matches!(state, ResourceStatus::Deleted | ResourceStatus::Expunging)
                    || (force && !state.is_terminal())
            }
        }
    }

    pub fn guard(&self, resource_id: u64, state: ResourceStatus, force: bool) -> Result<()> {
        if self.admits(state, force) {
            Ok(())
        } else {
            Err(ResourceError::InvalidState {
                id: resource_id,
                state,
                operation: self.name().to_string(),
            })
        }
    }

    /// State held while the workflow runs
    pub fn in_flight_state(&self) -> ResourceStatus {
        match self {
            Operation::Create => ResourceStatus::Building,
            Operation::Update | Operation::Patch | Operation::Action(_) => {
                ResourceStatus::Updating
            }
            Operation::Delete => ResourceStatus::Deleting,
            Operation::Expunge => ResourceStatus::Expunging,
        }
    }

    /// State written by the post-step when every step succeeded
    pub fn success_state(&self) -> ResourceStatus {
        match self {
            Operation::Delete => ResourceStatus::Deleted,
            Operation::Expunge => ResourceStatus::Expunged,
            _ => ResourceStatus::Active,
        }
    }

    pub fn is_teardown(&self) -> bool {
        matches!(self, Operation::Delete | Operation::Expunge)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Action(name) => write!(f, "action:{name}"),
            other => f.write_str(other.name()),
        }
    }
}
