//! resflow core model
//!
//! Logical resources mirrored onto entities of remote platforms, the typed
//! link graph between them, and the persistence boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            resflow-container (Container)         │
//! │   factory / CRUD / actions / reconciliation      │
//! └───────┬─────────────────────────┬───────────────┘
//!         │                         │
//! ┌───────▼───────────┐   ┌─────────▼───────────────┐
//! │ resflow-workflow  │   │  PlatformClient (trait) │
//! │ steps, jobs, poll │   │  list/get/create/...    │
//! └───────┬───────────┘   └─────────────────────────┘
//!         │
//! ┌───────▼─────────────────────────────────────────┐
//! │                  resflow-core                    │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ Resource +   │  │  LinkGraph   │             │
//! │  │ state machine│  │              │             │
//! │  └──────────────┘  └──────────────┘             │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │ ResourceStore (trait) / InMemoryStore    │   │
//! │  │ StateManager (state.json snapshots)      │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod error;
pub mod graph;
pub mod job;
pub mod link;
pub mod memory;
pub mod objid;
pub mod resource;
pub mod snapshot;
pub mod state;
pub mod store;

// Re-exports
pub use client::{
    AuthStatus, PlatformClient, RemoteEntity, RemoteJobStatus, RemoteSpec, RemoteTicket,
};
pub use error::{ResourceError, Result};
pub use graph::LinkGraph;
pub use job::{JobQuery, JobRecord, JobStatus};
pub use link::{Link, LinkAttributes, LinkTypeFilter, NewLink, RELATION};
pub use memory::InMemoryStore;
pub use objid::ObjId;
pub use resource::{NewResource, Resource, ResourceInfo, ResourceQuery, TypeTag};
pub use snapshot::{StateLock, StateManager, StoreSnapshot};
pub use state::{Operation, ResourceStatus};
pub use store::{ResourceStore, modify_resource};
