//! Link graph queries on top of a store

use crate::error::{ResourceError, Result};
use crate::link::{Link, LinkAttributes, LinkTypeFilter, NewLink};
use crate::resource::{Resource, TypeTag};
use crate::store::ResourceStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone)]
pub struct LinkGraph {
    store: Arc<dyn ResourceStore>,
}

impl LinkGraph {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Add a typed edge; both endpoints must exist and not be expunged
    pub async fn add_link(
        &self,
        link_type: &str,
        name: &str,
        start_id: u64,
        end_id: u64,
        attributes: LinkAttributes,
    ) -> Result<Link> {
        for endpoint in [start_id, end_id] {
            let resource = self.store.get_resource(endpoint).await?;
            if resource.state.is_terminal() {
                return Err(ResourceError::resource_not_found(endpoint));
            }
        }

        let link = self
            .store
            .insert_link(
                NewLink::new(link_type, start_id, end_id)
                    .named(name)
                    .with_attributes(attributes),
            )
            .await?;
        tracing::debug!(link_id = link.id, link_type, start_id, end_id, "Added link");
        Ok(link)
    }

    /// Resources at the end of matching outgoing links
    pub async fn linked_resources(
        &self,
        resource_id: u64,
        filter: &LinkTypeFilter,
        objdef: Option<&TypeTag>,
    ) -> Result<Vec<Resource>> {
        let links = self.store.links_from(resource_id, filter).await?;
        self.resolve(links.iter().map(|l| l.end_id), objdef).await
    }

    /// Resources at the start of matching incoming links
    pub async fn linking_resources(
        &self,
        resource_id: u64,
        filter: &LinkTypeFilter,
        objdef: Option<&TypeTag>,
    ) -> Result<Vec<Resource>> {
        let links = self.store.links_to(resource_id, filter).await?;
        self.resolve(links.iter().map(|l| l.start_id), objdef).await
    }

    async fn resolve(
        &self,
        ids: impl Iterator<Item = u64>,
        objdef: Option<&TypeTag>,
    ) -> Result<Vec<Resource>> {
        let ids: BTreeSet<u64> = ids.collect();
        let mut resources = Vec::with_capacity(ids.len());
        for id in ids {
            let resource = self.store.get_resource(id).await?;
            if resource.state.is_terminal() {
                continue;
            }
            if objdef.is_some_and(|t| *t != resource.resource_type) {
                continue;
            }
            resources.push(resource);
        }
        Ok(resources)
    }

    /// Resources owned by `resource_id` through `reuse=false` links, in the
    /// order they must be expunged
    ///
    /// A dependent that links to another dependent goes first, so an action
    /// is removed before the user group it references. Cycles fall back to
    /// id order.
    pub async fn owned_dependents(&self, resource_id: u64) -> Result<Vec<Resource>> {
        let any = LinkTypeFilter::any();
        let owned_ids: BTreeSet<u64> = self
            .store
            .links_from(resource_id, &any)
            .await?
            .into_iter()
            .filter(|l| l.owns_end() && l.end_id != resource_id)
            .map(|l| l.end_id)
            .collect();

        let mut owned: BTreeMap<u64, Resource> = BTreeMap::new();
        for id in owned_ids {
            let resource = self.store.get_resource(id).await?;
            if !resource.state.is_terminal() {
                owned.insert(id, resource);
            }
        }

        // edge a -> b among dependents: a references b, so a goes first
        let mut referenced_by: BTreeMap<u64, usize> = owned.keys().map(|id| (*id, 0)).collect();
        let mut references: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for id in owned.keys() {
            for link in self.store.links_from(*id, &any).await? {
                if link.end_id != *id && owned.contains_key(&link.end_id) {
                    references.entry(*id).or_default().push(link.end_id);
                    if let Some(count) = referenced_by.get_mut(&link.end_id) {
                        *count += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<u64> = referenced_by
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(owned.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            referenced_by.remove(&id);
            for target in references.get(&id).into_iter().flatten() {
                if let Some(count) = referenced_by.get_mut(target) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*target);
                    }
                }
            }
        }

        if !referenced_by.is_empty() {
            tracing::warn!(
                resource_id,
                cycle = ?referenced_by.keys().collect::<Vec<_>>(),
                "Owned dependents reference each other in a cycle"
            );
            order.extend(referenced_by.keys().copied());
        }

        Ok(order
            .into_iter()
            .filter_map(|id| owned.remove(&id))
            .collect())
    }

    /// Remove every link touching the resource
    pub async fn detach(&self, resource_id: u64) -> Result<usize> {
        let any = LinkTypeFilter::any();
        let mut ids: BTreeSet<u64> = BTreeSet::new();
        ids.extend(self.store.links_from(resource_id, &any).await?.iter().map(|l| l.id));
        ids.extend(self.store.links_to(resource_id, &any).await?.iter().map(|l| l.id));

        for id in &ids {
            self.store.delete_link(*id).await?;
        }
        Ok(ids.len())
    }
}
