//! Persistence boundary
//!
//! One row per resource (tags travel with the row), one row per link and
//! one per job record. Implementations enforce:
//!
//! - `(container_id, ext_id)` is unique among non-expunged resources
//! - both link endpoints exist
//! - expunged resources are hidden unless a query asks for them

use crate::error::Result;
use crate::job::{JobQuery, JobRecord};
use crate::link::{Link, LinkTypeFilter, NewLink};
use crate::resource::{NewResource, Resource, ResourceQuery};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn insert_resource(&self, new: NewResource) -> Result<Resource>;

    /// Fails with `NotFound`; expunged rows are still returned by id
    async fn get_resource(&self, id: u64) -> Result<Resource>;

    async fn find_resource_by_uuid(&self, uuid: Uuid) -> Result<Option<Resource>>;

    /// Non-expunged resource of a container bound to `ext_id`
    async fn find_by_ext_id(&self, container_id: u64, ext_id: &str) -> Result<Option<Resource>>;

    /// Matching rows ordered by id
    async fn list_resources(&self, query: &ResourceQuery) -> Result<Vec<Resource>>;

    /// Replace a row, returning it with a refreshed `updated_at`
    async fn save_resource(&self, resource: &Resource) -> Result<Resource>;

    async fn insert_link(&self, new: NewLink) -> Result<Link>;

    async fn get_link(&self, id: u64) -> Result<Link>;

    async fn links_from(&self, start_id: u64, filter: &LinkTypeFilter) -> Result<Vec<Link>>;

    async fn links_to(&self, end_id: u64, filter: &LinkTypeFilter) -> Result<Vec<Link>>;

    async fn delete_link(&self, id: u64) -> Result<()>;

    async fn insert_job(&self, job: &JobRecord) -> Result<()>;

    async fn save_job(&self, job: &JobRecord) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<JobRecord>;

    /// Matching jobs ordered by start time
    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<JobRecord>>;
}

/// Read a row, apply `change`, and write it back
///
/// Read-then-write without a lock: the state guard in front of every
/// mutation is optimistic.
pub async fn modify_resource<F>(store: &dyn ResourceStore, id: u64, change: F) -> Result<Resource>
where
    F: FnOnce(&mut Resource) -> Result<()> + Send,
{
    let mut resource = store.get_resource(id).await?;
    change(&mut resource)?;
    store.save_resource(&resource).await
}
