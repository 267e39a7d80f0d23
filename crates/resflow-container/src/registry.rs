//! Descriptor registration table
//!
//! Built once at startup and shared by `Arc`. Registration order is the
//! order the reconciler visits types in, so a parent type must be
//! registered before its children.

use crate::descriptor::ResourceDescriptor;
use resflow_core::{Operation, Resource, ResourceError, Result, TypeTag};
use resflow_workflow::{CreateRequest, Planner, StepPlan, StepRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct DescriptorRegistry {
    descriptors: Vec<Arc<dyn ResourceDescriptor>>,
    index: HashMap<TypeTag, usize>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: Arc<dyn ResourceDescriptor>) -> Result<()> {
        let tag = descriptor.type_tag().clone();
        if self.index.contains_key(&tag) {
            return Err(ResourceError::Conflict(format!(
                "resource type {tag} is already registered"
            )));
        }
        for parent in descriptor.parent_types() {
            if *parent != tag && !self.index.contains_key(parent) {
                return Err(ResourceError::Validation(format!(
                    "parent type {parent} of {tag} must be registered first"
                )));
            }
        }

        tracing::debug!(resource_type = %tag, "Registered resource type");
        self.index.insert(tag, self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, descriptor: impl ResourceDescriptor + 'static) -> Result<Self> {
        self.register(Arc::new(descriptor))?;
        Ok(self)
    }

    pub fn get(&self, tag: &TypeTag) -> Result<&Arc<dyn ResourceDescriptor>> {
        self.index
            .get(tag)
            .map(|i| &self.descriptors[*i])
            .ok_or_else(|| ResourceError::not_found("resource type", tag))
    }

    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.index.contains_key(tag)
    }

    /// Descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResourceDescriptor>> {
        self.descriptors.iter()
    }

    pub fn type_tags(&self) -> Vec<TypeTag> {
        self.descriptors.iter().map(|d| d.type_tag().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Generic lifecycle steps plus the steps of every registered type
    pub fn step_registry(&self) -> Result<StepRegistry> {
        let mut registry = StepRegistry::with_lifecycle_steps();
        for descriptor in &self.descriptors {
            descriptor.register_steps(&mut registry)?;
        }
        Ok(registry)
    }

    fn check_parent(
        &self,
        descriptor: &dyn ResourceDescriptor,
        parent: Option<&Resource>,
    ) -> Result<()> {
        let tag = descriptor.type_tag();
        match parent {
            Some(parent) if !descriptor.parent_types().contains(&parent.resource_type) => {
                Err(ResourceError::InvalidParent(format!(
                    "{tag} cannot live under {}",
                    parent.resource_type
                )))
            }
            None if descriptor.requires_parent() => Err(ResourceError::InvalidParent(format!(
                "{tag} requires a parent"
            ))),
            _ => Ok(()),
        }
    }
}

impl Planner for DescriptorRegistry {
    fn plan_create(&self, request: &CreateRequest, parent: Option<&Resource>) -> Result<StepPlan> {
        let descriptor = self.get(&request.resource_type).map_err(|_| {
            ResourceError::Validation(format!("unknown resource type {}", request.resource_type))
        })?;
        self.check_parent(descriptor.as_ref(), parent)?;
        descriptor.pre_create(request, parent)
    }

    fn plan(&self, resource: &Resource, operation: &Operation, params: Value) -> Result<StepPlan> {
        let descriptor = self.get(&resource.resource_type)?;
        match operation {
            Operation::Create => Err(ResourceError::Validation(format!(
                "resource {} already exists; creation goes through the factory",
                resource.id
            ))),
            Operation::Update => descriptor.pre_update(resource, params),
            Operation::Patch => descriptor.pre_patch(resource, params),
            Operation::Delete => descriptor.pre_delete(resource, params),
            Operation::Expunge => descriptor.pre_expunge(resource, params),
            Operation::Action(name) => descriptor
                .action(name)
                .ok_or_else(|| {
                    ResourceError::Validation(format!(
                        "{} has no action '{name}'",
                        resource.resource_type
                    ))
                })?
                .plan(params),
        }
    }
}
