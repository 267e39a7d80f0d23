//! In-memory `ResourceStore`

use crate::error::{ResourceError, Result};
use crate::job::{JobQuery, JobRecord};
use crate::link::{Link, LinkTypeFilter, NewLink};
use crate::resource::{NewResource, Resource, ResourceQuery, valid_ext_id};
use crate::snapshot::StoreSnapshot;
use crate::store::ResourceStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    resources: BTreeMap<u64, Resource>,
    links: BTreeMap<u64, Link>,
    jobs: HashMap<Uuid, JobRecord>,
    next_resource_id: u64,
    next_link_id: u64,
}

impl Tables {
    fn ext_id_owner(&self, container_id: u64, ext_id: &str) -> Option<&Resource> {
        self.resources.values().find(|r| {
            r.container_id == container_id
                && !r.state.is_terminal()
                && r.valid_ext_id() == Some(ext_id)
        })
    }

    fn check_ext_id(&self, container_id: u64, ext_id: Option<&str>, row: u64) -> Result<()> {
        let Some(ext_id) = valid_ext_id(ext_id) else {
            return Ok(());
        };
        match self.ext_id_owner(container_id, ext_id) {
            Some(owner) if owner.id != row => Err(ResourceError::Conflict(format!(
                "ext_id {ext_id} is already bound to resource {} in container {container_id}",
                owner.id
            ))),
            _ => Ok(()),
        }
    }
}

/// Store kept entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let next_resource_id = snapshot.resources.iter().map(|r| r.id).max().unwrap_or(0);
        let next_link_id = snapshot.links.iter().map(|l| l.id).max().unwrap_or(0);
        let tables = Tables {
            resources: snapshot.resources.into_iter().map(|r| (r.id, r)).collect(),
            links: snapshot.links.into_iter().map(|l| (l.id, l)).collect(),
            jobs: snapshot.jobs.into_iter().map(|j| (j.id, j)).collect(),
            next_resource_id,
            next_link_id,
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.read().await;
        let mut jobs: Vec<JobRecord> = tables.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.start_time);
        StoreSnapshot::new(
            tables.resources.values().cloned().collect(),
            tables.links.values().cloned().collect(),
            jobs,
        )
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn insert_resource(&self, new: NewResource) -> Result<Resource> {
        let mut tables = self.tables.write().await;
        tables.check_ext_id(new.container_id, new.ext_id.as_deref(), 0)?;
        if let Some(parent_id) = new.parent_id
            && !tables.resources.contains_key(&parent_id)
        {
            return Err(ResourceError::resource_not_found(parent_id));
        }

        tables.next_resource_id += 1;
        let now = Utc::now();
        let resource = Resource {
            id: tables.next_resource_id,
            uuid: Uuid::new_v4(),
            objid: new.objid,
            resource_type: new.resource_type,
            name: new.name,
            desc: new.desc,
            ext_id: new.ext_id,
            state: new.state,
            attribs: new.attribs,
            parent_id: new.parent_id,
            tags: new.tags,
            active: new.active,
            container_id: new.container_id,
            created_at: now,
            updated_at: now,
        };
        tables.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn get_resource(&self, id: u64) -> Result<Resource> {
        let tables = self.tables.read().await;
        tables
            .resources
            .get(&id)
            .cloned()
            .ok_or_else(|| ResourceError::resource_not_found(id))
    }

    async fn find_resource_by_uuid(&self, uuid: Uuid) -> Result<Option<Resource>> {
        let tables = self.tables.read().await;
        Ok(tables.resources.values().find(|r| r.uuid == uuid).cloned())
    }

    async fn find_by_ext_id(&self, container_id: u64, ext_id: &str) -> Result<Option<Resource>> {
        let tables = self.tables.read().await;
        Ok(tables.ext_id_owner(container_id, ext_id).cloned())
    }

    async fn list_resources(&self, query: &ResourceQuery) -> Result<Vec<Resource>> {
        let tables = self.tables.read().await;
        Ok(tables
            .resources
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn save_resource(&self, resource: &Resource) -> Result<Resource> {
        let mut tables = self.tables.write().await;
        if !tables.resources.contains_key(&resource.id) {
            return Err(ResourceError::resource_not_found(resource.id));
        }
        if !resource.state.is_terminal() {
            tables.check_ext_id(resource.container_id, resource.ext_id.as_deref(), resource.id)?;
        }

        let mut row = resource.clone();
        row.updated_at = Utc::now();
        tables.resources.insert(row.id, row.clone());
        Ok(row)
    }

    async fn insert_link(&self, new: NewLink) -> Result<Link> {
        let mut tables = self.tables.write().await;
        for endpoint in [new.start_id, new.end_id] {
            if !tables.resources.contains_key(&endpoint) {
                return Err(ResourceError::resource_not_found(endpoint));
            }
        }

        tables.next_link_id += 1;
        let link = Link {
            id: tables.next_link_id,
            link_type: new.link_type,
            name: new.name,
            start_id: new.start_id,
            end_id: new.end_id,
            attributes: new.attributes,
            created_at: Utc::now(),
        };
        tables.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn get_link(&self, id: u64) -> Result<Link> {
        let tables = self.tables.read().await;
        tables
            .links
            .get(&id)
            .cloned()
            .ok_or_else(|| ResourceError::not_found("link", id))
    }

    async fn links_from(&self, start_id: u64, filter: &LinkTypeFilter) -> Result<Vec<Link>> {
        let tables = self.tables.read().await;
        Ok(tables
            .links
            .values()
            .filter(|l| l.start_id == start_id && filter.matches(&l.link_type))
            .cloned()
            .collect())
    }

    async fn links_to(&self, end_id: u64, filter: &LinkTypeFilter) -> Result<Vec<Link>> {
        let tables = self.tables.read().await;
        Ok(tables
            .links
            .values()
            .filter(|l| l.end_id == end_id && filter.matches(&l.link_type))
            .cloned()
            .collect())
    }

    async fn delete_link(&self, id: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .links
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ResourceError::not_found("link", id))
    }

    async fn insert_job(&self, job: &JobRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.id) {
            return Err(ResourceError::Conflict(format!("job {} already exists", job.id)));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn save_job(&self, job: &JobRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.jobs.contains_key(&job.id) {
            return Err(ResourceError::not_found("job", job.id));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<JobRecord> {
        let tables = self.tables.read().await;
        tables
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| ResourceError::not_found("job", id))
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<JobRecord>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<JobRecord> = tables
            .jobs
            .values()
            .filter(|j| query.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.start_time);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objid::ObjId;
    use crate::resource::TypeTag;
    use crate::state::{Operation, ResourceStatus};

    fn draft(name: &str, ext_id: Option<&str>) -> NewResource {
        let mut new = NewResource::pending(
            10,
            TypeTag::new("Provider.Domain"),
            ObjId::container(10).child(name),
            name,
        );
        new.ext_id = ext_id.map(str::to_string);
        new
    }

    #[tokio::test]
    async fn test_ext_id_unique_per_container() {
        let store = InMemoryStore::new();
        store.insert_resource(draft("a", Some("d-1"))).await.unwrap();

        let err = store.insert_resource(draft("b", Some("d-1"))).await.unwrap_err();
        assert!(matches!(err, ResourceError::Conflict(_)));

        let mut other = draft("c", Some("d-1"));
        other.container_id = 11;
        assert!(store.insert_resource(other).await.is_ok());
    }

    #[tokio::test]
    async fn test_expunged_rows_release_ext_id_and_hide() {
        let store = InMemoryStore::new();
        let mut first = store.insert_resource(draft("a", Some("d-1"))).await.unwrap();
        first.force_state(ResourceStatus::Expunged);
        store.save_resource(&first).await.unwrap();

        assert!(store.find_by_ext_id(10, "d-1").await.unwrap().is_none());
        assert!(store.insert_resource(draft("b", Some("d-1"))).await.is_ok());

        let visible = store.list_resources(&ResourceQuery::new()).await.unwrap();
        assert_eq!(visible.len(), 1);
        let all = store
            .list_resources(&ResourceQuery::new().include_expunged())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_save_rejects_colliding_ext_id() {
        let store = InMemoryStore::new();
        store.insert_resource(draft("a", Some("d-1"))).await.unwrap();
        let mut second = store.insert_resource(draft("b", None)).await.unwrap();

        second.ext_id = Some("d-1".into());
        assert!(store.save_resource(&second).await.is_err());
        assert_eq!(store.get_resource(second.id).await.unwrap().ext_id, None);
    }

    #[tokio::test]
    async fn test_link_endpoints_must_exist() {
        let store = InMemoryStore::new();
        let a = store.insert_resource(draft("a", None)).await.unwrap();

        let err = store
            .insert_link(NewLink::new("relation", a.id, 99))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::NotFound { .. }));

        let b = store.insert_resource(draft("b", None)).await.unwrap();
        store
            .insert_link(NewLink::new("relation.3", a.id, b.id))
            .await
            .unwrap();
        let found = store.links_from(a.id, &"relation%".into()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.links_to(b.id, &"owner".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_id_sequence() {
        let store = InMemoryStore::new();
        let a = store.insert_resource(draft("a", None)).await.unwrap();
        let job = JobRecord::new("create a", a.id, 10, Operation::Create, "test");
        store.insert_job(&job).await.unwrap();

        let restored = InMemoryStore::from_snapshot(store.snapshot().await);
        let b = restored.insert_resource(draft("b", None)).await.unwrap();
        assert_eq!(b.id, a.id + 1);
        assert_eq!(restored.get_job(job.id).await.unwrap().resource_id, a.id);
    }
}
