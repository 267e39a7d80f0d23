//! In-process simulated platform for resflow
//!
//! [`MemoryPlatform`] implements [`resflow_core::PlatformClient`] over an
//! in-memory entity table with asynchronous jobs, fault injection and an
//! operation log. [`memory_catalog`] registers the reference resource types
//! it serves.
//!
//! # Example
//!
//! ```ignore
//! use resflow_platform_memory::{MemoryPlatform, memory_container};
//!
//! let platform = Arc::new(MemoryPlatform::new("lab"));
//! let container = memory_container(&settings.containers[0], store, platform, &settings)?;
//! let reports = container.synchronize_resources(None).await?;
//! ```

pub mod catalog;
pub mod platform;

pub use catalog::{
    ACTION, ActionAttribs, DOMAIN, PROJECT, SECURITY_GROUP, TRIGGER, USER_GROUP,
    UserGroupAttribs, memory_catalog,
};
pub use platform::{MemoryPlatform, OpRecord, RemoteOp};

use resflow_config::{ContainerSettings, Settings};
use resflow_container::Container;
use resflow_core::{ResourceStore, Result};
use std::sync::Arc;

/// Platform kind this crate serves
pub const KIND: &str = "memory";

/// Container over a memory platform with the reference catalog
pub fn memory_container(
    container: &ContainerSettings,
    store: Arc<dyn ResourceStore>,
    platform: Arc<MemoryPlatform>,
    settings: &Settings,
) -> Result<Container> {
    Container::new(
        container.into(),
        store,
        platform,
        Arc::new(memory_catalog()?),
        settings.workflow.clone(),
        settings.reconcile.clone(),
        settings.worker_name.clone(),
    )
}
