//! Link-aware cascade before teardown

use crate::context::StepContext;
use crate::step::{Step, StepRegistry};
use crate::task::TaskHandle;
use async_trait::async_trait;
use resflow_core::{Operation, Result};
use serde_json::{Value, json};
use std::sync::Arc;

pub const CASCADE_OWNED_LINKS_STEP: &str = "cascade_owned_links_step";

pub(crate) fn register(registry: &mut StepRegistry) {
    registry.insert(CASCADE_OWNED_LINKS_STEP, Arc::new(CascadeOwnedLinks));
}

/// Expunge every resource this one owns through a `reuse=false` link
///
/// Dependents go one by one as nested workflows, in the order the link
/// graph returns them. Ends of `reuse=true` links are left alone.
struct CascadeOwnedLinks;

#[async_trait]
impl Step for CascadeOwnedLinks {
    async fn run(&self, task: &TaskHandle, ctx: &mut StepContext) -> Result<Value> {
        let dependents = task.graph().owned_dependents(task.resource_id()).await?;
        let mut expunged = Vec::with_capacity(dependents.len());

        for dependent in dependents {
            tracing::info!(
                resource_id = task.resource_id(),
                dependent = dependent.id,
                resource_type = %dependent.resource_type,
                "Expunging owned dependent"
            );
            task.run_child(dependent.id, Operation::Expunge, Value::Null, true)
                .await?;
            expunged.push(dependent.id);
            ctx.insert("cascaded", json!(expunged));
        }

        Ok(json!({ "expunged": expunged }))
    }
}
