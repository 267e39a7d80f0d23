//! resflow task-step workflow engine
//!
//! A lifecycle operation on a resource becomes one job: an ordered list of
//! named steps, wrapped in generic pre/post steps, run sequentially with a
//! shared serializable context.
//!
//! ```text
//! factory / submit ──► guard ──► in-flight state ──► job record
//!                                                        │
//!                          tokio task ◄──────────────────┘
//!                              │
//!   pre_step ─► step ─► step ─► ... ─► post_step ─► success state
//!                 │                │
//!                 │                └─ failure: resource ERROR, no rollback
//!                 └─ run_child / create_child / poll_remote_job
//! ```

pub mod cascade;
pub mod context;
pub mod engine;
pub mod factory;
pub mod lifecycle;
pub mod plan;
pub mod poller;
pub mod step;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use cascade::CASCADE_OWNED_LINKS_STEP;
pub use context::{HELD_PREFIX, StepContext};
pub use engine::{Accepted, ContainerInfo, WorkflowEngine, require_success};
pub use factory::find_sibling;
pub use lifecycle::{ResourceChanges, post_step, pre_step};
pub use plan::{CreateRequest, Planner, StepPlan};
pub use poller::poll_until;
pub use step::{FnStep, ResolvedStep, Step, StepId, StepRegistry};
pub use task::TaskHandle;
