//! resflow container orchestration
//!
//! A [`Container`] owns the connection to one remote platform. It holds the
//! [`DescriptorRegistry`] of the resource types it can provision, runs their
//! workflows on a [`resflow_workflow::WorkflowEngine`] and keeps the local
//! resource set aligned with the remote population through the
//! [`Reconciler`].
//!
//! ```text
//!                  ┌──────────────── Container ────────────────┐
//!  create/update ─►│ DescriptorRegistry ─► Planner ─► engine   │─► PlatformClient
//!  discover/sync ─►│ Reconciler: discover_new / discover_died  │
//!                  │             synchronize ─► adopt (ACTIVE) │
//!                  └───────────────────────────────────────────┘
//! ```

pub mod container;
pub mod descriptor;
pub mod discovery;
pub mod reconcile;
pub mod registry;
pub mod standard;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use container::Container;
pub use descriptor::{ActionSpec, ParamCheck, ResourceDescriptor};
pub use discovery::{
    DiscoveredEntity, NewResourceDraft, ParentRef, ReconcileFailure, ReconcileReport,
    ReconciledEntity, RemoteIdentity, assign_levels,
};
pub use reconcile::Reconciler;
pub use registry::DescriptorRegistry;
pub use standard::StandardDescriptor;
