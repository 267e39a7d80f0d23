//! Types exchanged between discovery probes and the reconciler

use resflow_core::{NewResource, ObjId, Resource, ResourceStatus, TypeTag};
use resflow_workflow::ContainerInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// How a discovered entity names its parent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ParentRef {
    #[default]
    None,
    /// Remote id of the parent entity
    ExtId(String),
    /// Local id of an already known parent resource
    Resource(u64),
}

/// One remote entity seen by a discovery probe; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEntity {
    pub resource_type: TypeTag,
    pub ext_id: String,
    pub parent: ParentRef,
    /// Full remote snapshot
    pub objdef: Value,
    pub name: String,
    pub attributes: Value,
    /// Extra key for platforms where name and parent are not enough
    pub discriminator: Option<String>,
    /// Nesting depth among entities of the same type; parents come first
    pub level: u32,
}

/// Minimal identity of a remote entity that is still alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub id: String,
    pub name: String,
}

/// Row computed by `synchronize` for a discovered entity
#[derive(Debug, Clone, PartialEq)]
pub struct NewResourceDraft {
    pub resource_type: TypeTag,
    pub objid: ObjId,
    pub name: String,
    pub desc: String,
    pub ext_id: String,
    pub attribs: Value,
    pub parent_id: Option<u64>,
    pub tags: BTreeSet<String>,
}

impl NewResourceDraft {
    /// Map an entity below `parent`, or directly below the container
    ///
    /// Top-level entities extend the container objid, nested ones extend the
    /// parent resource's objid.
    pub fn from_entity(
        container: &ContainerInfo,
        entity: &DiscoveredEntity,
        parent: Option<&Resource>,
    ) -> Self {
        let base = match parent {
            Some(parent) => parent.objid.clone(),
            None => ObjId::container(container.id),
        };
        let attribs = match &entity.attributes {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        Self {
            resource_type: entity.resource_type.clone(),
            objid: base.child_generated(),
            name: entity.name.clone(),
            desc: String::new(),
            ext_id: entity.ext_id.clone(),
            attribs,
            parent_id: parent.map(|p| p.id),
            tags: BTreeSet::new(),
        }
    }

    /// Adopted row: `ACTIVE`, no workflow
    pub fn into_adopted(self, container_id: u64) -> NewResource {
        let mut new = NewResource::pending(container_id, self.resource_type, self.objid, self.name);
        new.desc = self.desc;
        new.ext_id = Some(self.ext_id);
        new.attribs = self.attribs;
        new.parent_id = self.parent_id;
        new.tags = self.tags;
        new.state = ResourceStatus::Active;
        new.active = true;
        new
    }

    /// Whether the stored row diverges from what the remote reports
    pub fn differs_from(&self, resource: &Resource) -> bool {
        self.name != resource.name
            || self.attribs != resource.attribs
            || (!self.desc.is_empty() && self.desc != resource.desc)
    }
}

/// Order entities parent-before-child by walking remote parent ids
///
/// Parents outside the list (another type, or the container) count as
/// level 0. A parent cycle stops the walk at the list length.
pub fn assign_levels(entities: &mut [DiscoveredEntity]) {
    let parents: HashMap<String, Option<String>> = entities
        .iter()
        .map(|e| {
            let parent = match &e.parent {
                ParentRef::ExtId(id) => Some(id.clone()),
                _ => None,
            };
            (e.ext_id.clone(), parent)
        })
        .collect();

    let limit = entities.len() as u32;
    for entity in entities.iter_mut() {
        entity.level = level_of(&entity.ext_id, &parents, limit);
    }
    entities.sort_by_key(|e| e.level);
}

fn level_of(ext_id: &str, parents: &HashMap<String, Option<String>>, limit: u32) -> u32 {
    let mut level = 0;
    let mut current = ext_id;
    while let Some(Some(parent)) = parents.get(current) {
        if !parents.contains_key(parent) || level >= limit {
            break;
        }
        level += 1;
        current = parent;
    }
    level
}

/// Adopted, flagged or updated entity in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledEntity {
    pub ext_id: String,
    pub name: String,
    /// Unset in a dry run for entities that would be adopted
    pub resource_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileFailure {
    pub ext_id: Option<String>,
    pub error: String,
}

/// Outcome of one reconciliation pass over one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub resource_type: TypeTag,
    /// False for a dry run
    pub applied: bool,
    pub new: Vec<ReconciledEntity>,
    pub died: Vec<ReconciledEntity>,
    pub changed: Vec<ReconciledEntity>,
    /// `UNKNOWN` resources whose remote entity is back
    pub revived: Vec<ReconciledEntity>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn new(resource_type: TypeTag, applied: bool) -> Self {
        Self {
            resource_type,
            applied,
            new: Vec::new(),
            died: Vec::new(),
            changed: Vec::new(),
            revived: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// No delta and no failure
    pub fn is_clean(&self) -> bool {
        self.new.is_empty()
            && self.died.is_empty()
            && self.changed.is_empty()
            && self.revived.is_empty()
            && self.failures.is_empty()
    }

    pub fn fail(&mut self, ext_id: Option<&str>, error: impl ToString) {
        self.failures.push(ReconcileFailure {
            ext_id: ext_id.map(str::to_string),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(ext_id: &str, parent: Option<&str>) -> DiscoveredEntity {
        DiscoveredEntity {
            resource_type: TypeTag::new("Provider.Project"),
            ext_id: ext_id.into(),
            parent: parent
                .map(|p| ParentRef::ExtId(p.into()))
                .unwrap_or_default(),
            objdef: Value::Null,
            name: ext_id.into(),
            attributes: json!({}),
            discriminator: None,
            level: 0,
        }
    }

    #[test]
    fn test_levels_put_parents_first() {
        let mut entities = vec![
            entity("p-4", Some("p-2")),
            entity("p-1", Some("d-1")),
            entity("p-2", Some("d-1")),
            entity("p-3", Some("d-1")),
        ];
        assign_levels(&mut entities);

        let order: Vec<(&str, u32)> = entities
            .iter()
            .map(|e| (e.ext_id.as_str(), e.level))
            .collect();
        assert_eq!(
            order,
            vec![("p-1", 0), ("p-2", 0), ("p-3", 0), ("p-4", 1)]
        );
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let mut entities = vec![entity("a", Some("b")), entity("b", Some("a"))];
        assign_levels(&mut entities);
        assert!(entities.iter().all(|e| e.level <= 2));
    }

    #[test]
    fn test_draft_objid_follows_parent() {
        let container = ContainerInfo {
            id: 10,
            name: "memory".into(),
            kind: "memory".into(),
        };
        let top = NewResourceDraft::from_entity(&container, &entity("d-1", None), None);
        assert!(top.objid.as_str().starts_with("10//"));
        assert_eq!(top.objid.depth(), 1);

        let adopted = top.clone().into_adopted(10);
        assert_eq!(adopted.state, ResourceStatus::Active);
        assert!(adopted.active);
        assert_eq!(adopted.ext_id.as_deref(), Some("d-1"));
    }
}
