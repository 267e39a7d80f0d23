//! Logical resource rows and their projections

use crate::error::{ResourceError, Result};
use crate::objid::ObjId;
use crate::state::ResourceStatus;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Dotted hierarchical resource type, e.g. `Provider.ComputeZone.ComputeInstance`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment (`ComputeInstance`)
    pub fn leaf(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Enclosing type (`Provider.ComputeZone`)
    pub fn parent_tag(&self) -> Option<TypeTag> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| TypeTag::new(parent))
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for TypeTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// A logical resource mirrored onto a remote platform entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: u64,
    pub uuid: Uuid,
    pub objid: ObjId,
    pub resource_type: TypeTag,
    pub name: String,
    pub desc: String,

    /// Remote platform identifier, unset until provisioned or discovered
    pub ext_id: Option<String>,

    pub state: ResourceStatus,

    /// Per-type attributes; opaque JSON at the storage boundary
    pub attribs: serde_json::Value,

    pub parent_id: Option<u64>,
    pub tags: BTreeSet<String>,

    /// Eligible for normal operations
    pub active: bool,

    pub container_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn has_valid_ext_id(&self) -> bool {
        valid_ext_id(self.ext_id.as_deref()).is_some()
    }

    pub fn valid_ext_id(&self) -> Option<&str> {
        valid_ext_id(self.ext_id.as_deref())
    }

    /// Move to `next`, refusing transitions the state machine does not allow
    pub fn transition_to(&mut self, next: ResourceStatus) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ResourceError::InvalidState {
                id: self.id,
                state: self.state,
                operation: format!("move to {next}"),
            });
        }
        self.force_state(next);
        Ok(())
    }

    /// Set the state without consulting the transition table
    pub fn force_state(&mut self, next: ResourceStatus) {
        let previous = self.state;
        self.state = next;
        match next {
            ResourceStatus::Deleted | ResourceStatus::Expunged => self.active = false,
            ResourceStatus::Active if previous == ResourceStatus::Building => self.active = true,
            _ => {}
        }
        self.updated_at = Utc::now();
    }

    /// Decode the attribute blob into the type's config struct
    pub fn attribs_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.attribs.clone())?)
    }

    pub fn set_attribs<T: Serialize>(&mut self, attribs: &T) -> Result<()> {
        self.attribs = serde_json::to_value(attribs)?;
        Ok(())
    }

    pub fn attrib<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attribs
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_attrib(&mut self, key: impl Into<String>, value: serde_json::Value) {
        if !self.attribs.is_object() {
            self.attribs = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = self.attribs.as_object_mut() {
            map.insert(key.into(), value);
        }
    }

    /// Returns false when the tag was already present
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    /// Cheap, locally known projection
    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            uuid: self.uuid,
            objid: self.objid.to_string(),
            resource_type: self.resource_type.to_string(),
            name: self.name.clone(),
            desc: self.desc.clone(),
            ext_id: self.ext_id.clone(),
            state: self.state,
            active: self.active,
            attribs: self.attribs.clone(),
            parent_id: self.parent_id,
            tags: self.tags.iter().cloned().collect(),
            container_id: self.container_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ext_obj: None,
        }
    }
}

pub(crate) fn valid_ext_id(ext_id: Option<&str>) -> Option<&str> {
    ext_id.filter(|id| !id.trim().is_empty())
}

/// Row to insert; the store assigns `id`, `uuid` and timestamps
#[derive(Debug, Clone)]
pub struct NewResource {
    pub container_id: u64,
    pub resource_type: TypeTag,
    pub objid: ObjId,
    pub name: String,
    pub desc: String,
    pub ext_id: Option<String>,
    pub state: ResourceStatus,
    pub attribs: serde_json::Value,
    pub parent_id: Option<u64>,
    pub tags: BTreeSet<String>,
    pub active: bool,
}

impl NewResource {
    /// A fresh logical resource waiting for its create workflow
    pub fn pending(
        container_id: u64,
        resource_type: TypeTag,
        objid: ObjId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            container_id,
            resource_type,
            objid,
            name: name.into(),
            desc: String::new(),
            ext_id: None,
            state: ResourceStatus::Pending,
            attribs: serde_json::Value::Object(Default::default()),
            parent_id: None,
            tags: BTreeSet::new(),
            active: false,
        }
    }
}

/// Serializable projection returned by `info()` and `detail()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: u64,
    pub uuid: Uuid,
    pub objid: String,
    pub resource_type: String,
    pub name: String,
    pub desc: String,
    pub ext_id: Option<String>,
    pub state: ResourceStatus,
    pub active: bool,
    pub attribs: serde_json::Value,
    pub parent_id: Option<u64>,
    pub tags: Vec<String>,
    pub container_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Live remote snapshot attached by `detail()` or a remote-enriched listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_obj: Option<serde_json::Value>,
}

/// Filter for listing resources
#[derive(Debug, Clone, Default)]
pub struct ResourceQuery {
    pub container_id: Option<u64>,
    pub resource_type: Option<TypeTag>,
    /// `Some(None)` selects top-level resources
    pub parent_id: Option<Option<u64>>,
    pub name: Option<String>,
    pub tag: Option<String>,
    pub states: Option<Vec<ResourceStatus>>,
    pub below: Option<ObjId>,
    pub include_expunged: bool,
}

impl ResourceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_container(mut self, container_id: u64) -> Self {
        self.container_id = Some(container_id);
        self
    }

    pub fn of_type(mut self, resource_type: impl Into<TypeTag>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<u64>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn in_states(mut self, states: Vec<ResourceStatus>) -> Self {
        self.states = Some(states);
        self
    }

    pub fn below(mut self, objid: ObjId) -> Self {
        self.below = Some(objid);
        self
    }

    pub fn include_expunged(mut self) -> Self {
        self.include_expunged = true;
        self
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        if resource.state.is_terminal() && !self.include_expunged {
            return false;
        }
        if self.container_id.is_some_and(|id| id != resource.container_id) {
            return false;
        }
        if self
            .resource_type
            .as_ref()
            .is_some_and(|t| *t != resource.resource_type)
        {
            return false;
        }
        if self.parent_id.is_some_and(|p| p != resource.parent_id) {
            return false;
        }
        if self.name.as_ref().is_some_and(|n| *n != resource.name) {
            return false;
        }
        if self.tag.as_ref().is_some_and(|t| !resource.tags.contains(t)) {
            return false;
        }
        if self
            .states
            .as_ref()
            .is_some_and(|states| !states.contains(&resource.state))
        {
            return false;
        }
        if self
            .below
            .as_ref()
            .is_some_and(|root| !resource.objid.is_descendant_of(root))
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Resource {
        let now = Utc::now();
        Resource {
            id: 1,
            uuid: Uuid::new_v4(),
            objid: ObjId::new("10//abc"),
            resource_type: TypeTag::new("Provider.Domain"),
            name: "default".into(),
            desc: String::new(),
            ext_id: None,
            state: ResourceStatus::Pending,
            attribs: json!({}),
            parent_id: None,
            tags: BTreeSet::new(),
            active: false,
            container_id: 10,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_type_tag_segments() {
        let tag = TypeTag::new("Provider.ComputeZone.ComputeInstance");
        assert_eq!(tag.leaf(), "ComputeInstance");
        assert_eq!(tag.parent_tag(), Some(TypeTag::new("Provider.ComputeZone")));
        assert_eq!(TypeTag::new("Provider").parent_tag(), None);
    }

    #[test]
    fn test_ext_id_validity() {
        let mut resource = sample();
        assert!(!resource.has_valid_ext_id());
        resource.ext_id = Some("  ".into());
        assert!(!resource.has_valid_ext_id());
        resource.ext_id = Some("r-1".into());
        assert_eq!(resource.valid_ext_id(), Some("r-1"));
    }

    #[test]
    fn test_transition_updates_active_flag() {
        let mut resource = sample();
        resource.transition_to(ResourceStatus::Building).unwrap();
        assert!(!resource.active);
        resource.transition_to(ResourceStatus::Active).unwrap();
        assert!(resource.active);
        resource.transition_to(ResourceStatus::Deleting).unwrap();
        resource.transition_to(ResourceStatus::Deleted).unwrap();
        assert!(!resource.active);
    }

    #[test]
    fn test_illegal_transition_is_refused() {
        let mut resource = sample();
        let err = resource.transition_to(ResourceStatus::Active).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidState { .. }));
        assert_eq!(resource.state, ResourceStatus::Pending);
    }

    #[test]
    fn test_typed_attribs() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct ProjectAttribs {
            quota: u32,
        }

        let mut resource = sample();
        resource.set_attribs(&ProjectAttribs { quota: 5 }).unwrap();
        assert_eq!(
            resource.attribs_as::<ProjectAttribs>().unwrap(),
            ProjectAttribs { quota: 5 }
        );

        resource.set_attrib("role", json!("primary"));
        assert_eq!(resource.attrib::<String>("role").as_deref(), Some("primary"));
        assert_eq!(resource.attrib::<u32>("quota"), Some(5));
    }

    #[test]
    fn test_tags() {
        let mut resource = sample();
        assert!(resource.add_tag("prod"));
        assert!(!resource.add_tag("prod"));
        assert!(resource.remove_tag("prod"));
        assert!(resource.tags.is_empty());
    }

    #[test]
    fn test_query_hides_expunged() {
        let mut resource = sample();
        resource.force_state(ResourceStatus::Expunged);

        assert!(!ResourceQuery::new().matches(&resource));
        assert!(ResourceQuery::new().include_expunged().matches(&resource));
    }

    #[test]
    fn test_query_filters() {
        let mut resource = sample();
        resource.tags.insert("prod".into());

        assert!(ResourceQuery::new()
            .in_container(10)
            .of_type("Provider.Domain")
            .with_parent(None)
            .with_tag("prod")
            .matches(&resource));
        assert!(!ResourceQuery::new().with_parent(Some(4)).matches(&resource));
        assert!(!ResourceQuery::new().below(ObjId::new("10//zzz")).matches(&resource));
        assert!(ResourceQuery::new().below(ObjId::container(10)).matches(&resource));
    }
}
