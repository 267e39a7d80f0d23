//! Discover/synchronize reconciliation
//!
//! One pass over one resource type:
//!
//! 1. collect the ext_ids the store already knows for the type
//! 2. adopt every remote entity not among them, in discovery order
//! 3. flag local resources whose remote entity is gone, per `DiedPolicy`
//! 4. optionally diff known entities against their rows and update
//!
//! A failure on one entity is logged and recorded in the report; the pass
//! goes on with the next entity.

use crate::descriptor::ResourceDescriptor;
use crate::discovery::{
    DiscoveredEntity, NewResourceDraft, ParentRef, ReconcileReport, ReconciledEntity,
};
use resflow_config::{DiedPolicy, ReconcileSettings};
use resflow_core::{
    LinkGraph, PlatformClient, Resource, ResourceError, ResourceQuery, ResourceStatus,
    ResourceStore, Result, modify_resource,
};
use resflow_workflow::ContainerInfo;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct Reconciler<'a> {
    store: &'a Arc<dyn ResourceStore>,
    client: &'a dyn PlatformClient,
    container: &'a ContainerInfo,
    settings: &'a ReconcileSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a Arc<dyn ResourceStore>,
        client: &'a dyn PlatformClient,
        container: &'a ContainerInfo,
        settings: &'a ReconcileSettings,
    ) -> Self {
        Self {
            store,
            client,
            container,
            settings,
        }
    }

    /// Run one pass; with `apply` unset nothing is written
    #[tracing::instrument(
        skip(self, descriptor),
        fields(container = self.container.id, resource_type = %descriptor.type_tag())
    )]
    pub async fn reconcile(
        &self,
        descriptor: &dyn ResourceDescriptor,
        apply: bool,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new(descriptor.type_tag().clone(), apply);

        let local = self
            .store
            .list_resources(
                &ResourceQuery::new()
                    .in_container(self.container.id)
                    .of_type(descriptor.type_tag().clone()),
            )
            .await?;
        let by_ext: HashMap<String, Resource> = local
            .iter()
            .filter_map(|r| r.valid_ext_id().map(|ext| (ext.to_string(), r.clone())))
            .collect();
        let known: HashSet<String> = by_ext.keys().cloned().collect();

        // with change detection the probe returns known entities too
        let probe_known = if self.settings.detect_changes {
            HashSet::new()
        } else {
            known.clone()
        };
        match descriptor.discover_new(self.client, None, &probe_known).await {
            Ok(discovered) => {
                let (existing, new): (Vec<_>, Vec<_>) = discovered
                    .into_iter()
                    .partition(|e| known.contains(&e.ext_id));
                self.adopt_all(descriptor, new, &mut report).await;
                if self.settings.detect_changes {
                    self.update_changed(descriptor, existing, &by_ext, &mut report)
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discovery of new entities failed");
                report.fail(None, e);
            }
        }

        match descriptor.discover_died(self.client).await {
            Ok(Some(alive)) => {
                let alive: HashSet<String> = alive.into_iter().map(|i| i.id).collect();
                self.flag_died(&local, &alive, &mut report).await;
            }
            Ok(None) => {
                tracing::debug!("Type cannot list its population; died detection skipped");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discovery of died entities failed");
                report.fail(None, e);
            }
        }

        tracing::info!(
            applied = apply,
            new = report.new.len(),
            died = report.died.len(),
            changed = report.changed.len(),
            revived = report.revived.len(),
            failures = report.failures.len(),
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    /// Adopt a single remote entity by ext_id
    pub async fn adopt_one(
        &self,
        descriptor: &dyn ResourceDescriptor,
        ext_id: &str,
    ) -> Result<Resource> {
        if let Some(existing) = self.store.find_by_ext_id(self.container.id, ext_id).await? {
            return Err(ResourceError::Conflict(format!(
                "{ext_id} is already represented by resource {}",
                existing.id
            )));
        }
        let entity = descriptor
            .discover_new(self.client, Some(ext_id), &HashSet::new())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ResourceError::remote_not_found(descriptor.type_tag().as_str(), ext_id)
            })?;
        self.adopt(descriptor, &entity).await
    }

    async fn adopt_all(
        &self,
        descriptor: &dyn ResourceDescriptor,
        entities: Vec<DiscoveredEntity>,
        report: &mut ReconcileReport,
    ) {
        for entity in entities {
            if !report.applied {
                report.new.push(ReconciledEntity {
                    ext_id: entity.ext_id.clone(),
                    name: entity.name.clone(),
                    resource_id: None,
                });
                continue;
            }

            match self.adopt(descriptor, &entity).await {
                Ok(resource) => report.new.push(ReconciledEntity {
                    ext_id: entity.ext_id,
                    name: resource.name,
                    resource_id: Some(resource.id),
                }),
                Err(e) => {
                    tracing::warn!(ext_id = %entity.ext_id, error = %e, "Adoption failed");
                    report.fail(Some(&entity.ext_id), e);
                }
            }
        }
    }

    async fn adopt(
        &self,
        descriptor: &dyn ResourceDescriptor,
        entity: &DiscoveredEntity,
    ) -> Result<Resource> {
        let parent = self.resolve_parent(descriptor, entity).await?;
        let draft = descriptor.synchronize(self.container, entity, parent.as_ref())?;
        if let Some(parent) = &parent
            && !draft.objid.is_descendant_of(&parent.objid)
        {
            return Err(ResourceError::InvalidParent(format!(
                "objid {} is not below parent objid {}",
                draft.objid, parent.objid
            )));
        }

        let resource = self
            .store
            .insert_resource(draft.into_adopted(self.container.id))
            .await?;
        tracing::info!(
            resource_id = resource.id,
            ext_id = ?resource.ext_id,
            objid = %resource.objid,
            "Adopted remote entity"
        );
        Ok(resource)
    }

    async fn resolve_parent(
        &self,
        descriptor: &dyn ResourceDescriptor,
        entity: &DiscoveredEntity,
    ) -> Result<Option<Resource>> {
        let parent = match &entity.parent {
            ParentRef::None => None,
            ParentRef::Resource(id) => {
                let parent = self.store.get_resource(*id).await?;
                if parent.container_id != self.container.id || parent.state.is_terminal() {
                    return Err(ResourceError::InvalidParent(format!(
                        "parent resource {id} is not live in container {}",
                        self.container.id
                    )));
                }
                Some(parent)
            }
            // a remote parent of a type nothing models stays outside the tree
            ParentRef::ExtId(_) if descriptor.parent_types().is_empty() => None,
            ParentRef::ExtId(ext_id) => Some(
                self.store
                    .find_by_ext_id(self.container.id, ext_id)
                    .await?
                    .ok_or_else(|| {
                        ResourceError::InvalidParent(format!(
                            "parent {ext_id} of {} is not known yet",
                            entity.ext_id
                        ))
                    })?,
            ),
        };

        match &parent {
            Some(parent) if !descriptor.parent_types().contains(&parent.resource_type) => {
                Err(ResourceError::InvalidParent(format!(
                    "{} cannot live under {}",
                    descriptor.type_tag(),
                    parent.resource_type
                )))
            }
            None if descriptor.requires_parent() => Err(ResourceError::InvalidParent(format!(
                "{} {} has no parent",
                descriptor.type_tag(),
                entity.ext_id
            ))),
            _ => Ok(parent),
        }
    }

    async fn flag_died(
        &self,
        local: &[Resource],
        alive: &HashSet<String>,
        report: &mut ReconcileReport,
    ) {
        let target = match self.settings.died_policy {
            DiedPolicy::MarkUnknown => ResourceStatus::Unknown,
            DiedPolicy::MarkError => ResourceStatus::Error,
            DiedPolicy::Expunge => ResourceStatus::Expunged,
        };

        for resource in local {
            let Some(ext_id) = resource.valid_ext_id() else {
                continue;
            };

            if alive.contains(ext_id) {
                if resource.state == ResourceStatus::Unknown {
                    self.revive(resource, ext_id, report).await;
                }
                continue;
            }

            // workflows own in-flight rows; deleted rows have no remote side
            if resource.state.is_in_flight()
                || matches!(
                    resource.state,
                    ResourceStatus::Pending | ResourceStatus::Deleted
                )
                || resource.state == target
            {
                continue;
            }

            let entry = ReconciledEntity {
                ext_id: ext_id.to_string(),
                name: resource.name.clone(),
                resource_id: Some(resource.id),
            };
            if !report.applied {
                report.died.push(entry);
                continue;
            }

            match self.mark_died(resource, target).await {
                Ok(()) => report.died.push(entry),
                Err(e) => {
                    tracing::warn!(resource_id = resource.id, error = %e, "Could not flag died resource");
                    report.fail(Some(ext_id), e);
                }
            }
        }
    }

    async fn mark_died(&self, resource: &Resource, target: ResourceStatus) -> Result<()> {
        if target == ResourceStatus::Expunged {
            LinkGraph::new(self.store.clone()).detach(resource.id).await?;
        }

        let updated = modify_resource(self.store.as_ref(), resource.id, |r| {
            // the row may have moved since it was listed
            if r.state.is_in_flight() {
                return Err(ResourceError::InvalidState {
                    id: r.id,
                    state: r.state,
                    operation: "reconcile".into(),
                });
            }
            if target == ResourceStatus::Expunged {
                r.force_state(target);
                Ok(())
            } else {
                r.transition_to(target)
            }
        })
        .await?;

        tracing::info!(
            resource_id = updated.id,
            state = %updated.state,
            "Remote entity vanished"
        );
        Ok(())
    }

    async fn revive(&self, resource: &Resource, ext_id: &str, report: &mut ReconcileReport) {
        let entry = ReconciledEntity {
            ext_id: ext_id.to_string(),
            name: resource.name.clone(),
            resource_id: Some(resource.id),
        };
        if !report.applied {
            report.revived.push(entry);
            return;
        }

        match modify_resource(self.store.as_ref(), resource.id, |r| {
            r.transition_to(ResourceStatus::Active)
        })
        .await
        {
            Ok(_) => {
                tracing::info!(resource_id = resource.id, "Remote entity is back");
                report.revived.push(entry);
            }
            Err(e) => report.fail(Some(ext_id), e),
        }
    }

    async fn update_changed(
        &self,
        descriptor: &dyn ResourceDescriptor,
        entities: Vec<DiscoveredEntity>,
        by_ext: &HashMap<String, Resource>,
        report: &mut ReconcileReport,
    ) {
        for entity in entities {
            let Some(resource) = by_ext.get(&entity.ext_id) else {
                continue;
            };
            if resource.state.is_in_flight() || resource.state == ResourceStatus::Pending {
                continue;
            }

            match self.diff(descriptor, &entity, resource).await {
                Ok(Some(draft)) => {
                    let entry = ReconciledEntity {
                        ext_id: entity.ext_id.clone(),
                        name: draft.name.clone(),
                        resource_id: Some(resource.id),
                    };
                    if report.applied
                        && let Err(e) = self.apply_draft(resource.id, draft).await
                    {
                        tracing::warn!(resource_id = resource.id, error = %e, "Update from remote failed");
                        report.fail(Some(&entity.ext_id), e);
                        continue;
                    }
                    report.changed.push(entry);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(ext_id = %entity.ext_id, error = %e, "Change detection failed");
                    report.fail(Some(&entity.ext_id), e);
                }
            }
        }
    }

    async fn diff(
        &self,
        descriptor: &dyn ResourceDescriptor,
        entity: &DiscoveredEntity,
        resource: &Resource,
    ) -> Result<Option<NewResourceDraft>> {
        let parent = match resource.parent_id {
            Some(id) => Some(self.store.get_resource(id).await?),
            None => None,
        };
        let draft = descriptor.synchronize(self.container, entity, parent.as_ref())?;
        Ok(draft.differs_from(resource).then_some(draft))
    }

    async fn apply_draft(&self, resource_id: u64, draft: NewResourceDraft) -> Result<()> {
        modify_resource(self.store.as_ref(), resource_id, |r| {
            if r.state.is_in_flight() {
                return Err(ResourceError::InvalidState {
                    id: r.id,
                    state: r.state,
                    operation: "reconcile".into(),
                });
            }
            r.name = draft.name;
            r.attribs = draft.attribs;
            if !draft.desc.is_empty() {
                r.desc = draft.desc;
            }
            Ok(())
        })
        .await?;
        tracing::info!(resource_id, "Updated resource from remote");
        Ok(())
    }
}
