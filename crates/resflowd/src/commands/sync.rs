use crate::output;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use colored::Colorize;
use resflow_core::TypeTag;

/// One reconciliation pass, or a dry run that changes nothing
pub async fn handle(
    runtime: Runtime,
    container: Option<u64>,
    types: Vec<String>,
    dry_run: bool,
) -> Result<()> {
    let types: Vec<TypeTag> = types.into_iter().map(TypeTag::from).collect();
    let filter = (!types.is_empty()).then_some(types.as_slice());

    for served in runtime.served(container)? {
        let container = &served.container;
        let result = if dry_run {
            container.discover(filter).await
        } else {
            container.synchronize_resources(filter).await
        };
        let reports = result
            .with_context(|| format!("reconciliation of container {} failed", container.id()))?;

        output::print_reports(&container.container_info().name, &reports);
    }

    if dry_run {
        println!("{}", "Dry run: nothing was changed".dimmed());
        runtime.close().await
    } else {
        runtime.close().await?;
        println!("{}", "State saved".green());
        Ok(())
    }
}
