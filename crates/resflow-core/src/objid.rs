//! Hierarchical object ids
//!
//! A container's objid is its numeric id (`10`). Resources directly under the
//! container get `<container>//<suffix>` (`10//abc`), nested resources extend
//! their parent's objid with `.<suffix>` (`10//abc.xyz`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CONTAINER_SEP: &str = "//";
const PATH_SEP: char = '.';
const SUFFIX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjId(String);

impl ObjId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Root objid of a container
    pub fn container(container_id: u64) -> Self {
        Self(container_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_container_root(&self) -> bool {
        !self.0.contains(CONTAINER_SEP)
    }

    /// Derive a child objid with the given suffix
    ///
    /// The suffix must not contain `.` or `//`.
    pub fn child(&self, suffix: &str) -> Self {
        debug_assert!(!suffix.contains(PATH_SEP) && !suffix.contains(CONTAINER_SEP));
        if self.is_container_root() {
            Self(format!("{}{}{}", self.0, CONTAINER_SEP, suffix))
        } else {
            Self(format!("{}{}{}", self.0, PATH_SEP, suffix))
        }
    }

    /// Derive a child objid with a fresh random suffix
    pub fn child_generated(&self) -> Self {
        self.child(&generate_suffix())
    }

    /// Strict descendant check on component boundaries
    pub fn is_descendant_of(&self, ancestor: &ObjId) -> bool {
        let Some(rest) = self.0.strip_prefix(ancestor.as_str()) else {
            return false;
        };
        if ancestor.is_container_root() {
            rest.starts_with(CONTAINER_SEP) && rest.len() > CONTAINER_SEP.len()
        } else {
            rest.starts_with(PATH_SEP) && rest.len() > 1
        }
    }

    /// Id of the owning container, when the objid is well formed
    pub fn container_id(&self) -> Option<u64> {
        self.0
            .split(CONTAINER_SEP)
            .next()
            .and_then(|part| part.parse().ok())
    }

    /// Number of resource levels below the container
    pub fn depth(&self) -> usize {
        match self.0.split_once(CONTAINER_SEP) {
            Some((_, path)) => path.split(PATH_SEP).count(),
            None => 0,
        }
    }
}

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn generate_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(SUFFIX_LEN);
    suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_and_nested_children() {
        let container = ObjId::container(10);
        let domain = container.child("abc");
        let project = domain.child("xyz");

        assert_eq!(domain.as_str(), "10//abc");
        assert_eq!(project.as_str(), "10//abc.xyz");
        assert_eq!(project.depth(), 2);
        assert_eq!(project.container_id(), Some(10));
    }

    #[test]
    fn test_descendant_respects_boundaries() {
        let domain = ObjId::new("10//abc");
        assert!(ObjId::new("10//abc.xyz").is_descendant_of(&domain));
        assert!(ObjId::new("10//abc.xyz.q").is_descendant_of(&domain));
        assert!(!ObjId::new("10//abcd").is_descendant_of(&domain));
        assert!(!domain.is_descendant_of(&domain));
        assert!(domain.is_descendant_of(&ObjId::container(10)));
        assert!(!domain.is_descendant_of(&ObjId::container(1)));
    }

    #[test]
    fn test_generated_suffix_is_single_component() {
        let parent = ObjId::new("10//abc");
        let child = parent.child_generated();
        assert!(child.is_descendant_of(&parent));
        assert_eq!(child.depth(), 2);
    }
}
