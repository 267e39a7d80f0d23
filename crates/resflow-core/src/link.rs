//! Typed directed edges between resources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conventional link type for dependency relations
pub const RELATION: &str = "relation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: u64,
    pub link_type: String,
    pub name: String,
    pub start_id: u64,
    pub end_id: u64,
    pub attributes: LinkAttributes,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// The end resource belongs to the start resource and goes away with it
    pub fn owns_end(&self) -> bool {
        !self.attributes.reuse
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAttributes {
    /// `true` when the end resource was adopted/shared rather than created
    /// for the start resource; such ends survive the owner's teardown.
    #[serde(default)]
    pub reuse: bool,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LinkAttributes {
    pub fn owned() -> Self {
        Self::default()
    }

    pub fn reused() -> Self {
        Self {
            reuse: true,
            extra: Default::default(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewLink {
    pub link_type: String,
    pub name: String,
    pub start_id: u64,
    pub end_id: u64,
    pub attributes: LinkAttributes,
}

impl NewLink {
    pub fn new(link_type: impl Into<String>, start_id: u64, end_id: u64) -> Self {
        let link_type = link_type.into();
        Self {
            name: format!("{link_type}-{start_id}-{end_id}"),
            link_type,
            start_id,
            end_id,
            attributes: LinkAttributes::owned(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attributes(mut self, attributes: LinkAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Link type pattern with `%` wildcards, as in `relation%`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTypeFilter(String);

impl LinkTypeFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn any() -> Self {
        Self("%".to_string())
    }

    pub fn matches(&self, link_type: &str) -> bool {
        let mut parts = self.0.split('%');
        let Some(first) = parts.next() else {
            return link_type.is_empty();
        };
        let Some(mut rest) = link_type.strip_prefix(first) else {
            return false;
        };

        let middle: Vec<&str> = parts.collect();
        let Some((last, inner)) = middle.split_last() else {
            // no wildcard at all
            return rest.is_empty();
        };

        for part in inner {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
        rest.ends_with(last)
    }
}

impl From<&str> for LinkTypeFilter {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_filter() {
        let filter = LinkTypeFilter::new("relation");
        assert!(filter.matches("relation"));
        assert!(!filter.matches("relation.3"));
    }

    #[test]
    fn test_prefix_wildcard() {
        let filter = LinkTypeFilter::new("relation%");
        assert!(filter.matches("relation"));
        assert!(filter.matches("relation.3"));
        assert!(!filter.matches("rel"));
        assert!(!filter.matches("owner.relation"));
    }

    #[test]
    fn test_inner_wildcard() {
        let filter = LinkTypeFilter::new("relation.%.site");
        assert!(filter.matches("relation.7.site"));
        assert!(!filter.matches("relation.7.zone"));
        assert!(LinkTypeFilter::any().matches("anything"));
    }

    #[test]
    fn test_reuse_defaults_to_owned() {
        let attributes: LinkAttributes = serde_json::from_str(r#"{"role": "member"}"#).unwrap();
        assert!(!attributes.reuse);
        assert_eq!(attributes.extra["role"], "member");
        assert!(LinkAttributes::reused().reuse);
    }
}
