use crate::runtime::Runtime;
use anyhow::{Context, Result};
use colored::Colorize;

/// Create an entity on a memory platform behind the container's back
///
/// The next reconciliation pass adopts it.
pub async fn handle(
    runtime: Runtime,
    container: u64,
    kind: &str,
    name: &str,
    parent: Option<&str>,
    attribs: &str,
) -> Result<()> {
    let attributes: serde_json::Value =
        serde_json::from_str(attribs).context("attributes must be a JSON object")?;
    anyhow::ensure!(attributes.is_object(), "attributes must be a JSON object");

    let served = runtime.served(Some(container))?[0];
    if let Some(parent) = parent
        && served.platform.entity(parent).await.is_none()
    {
        anyhow::bail!("parent entity '{parent}' does not exist");
    }

    let ext_id = served
        .platform
        .insert_remote(kind, name, parent, attributes)
        .await;
    println!("{} {} {}", "Seeded".green(), kind, ext_id.cyan());

    runtime.close().await
}
