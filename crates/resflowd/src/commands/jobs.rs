use crate::output;
use crate::runtime::state_dir;
use anyhow::{Context, Result};
use resflow_config::Settings;
use resflow_core::{JobStatus, StateManager};

/// List job records from the saved snapshot without taking the lock
pub async fn handle(settings: &Settings, container: Option<u64>, failed: bool) -> Result<()> {
    let state = StateManager::new(state_dir(settings)?);
    let snapshot = state
        .load()
        .await
        .context("failed to load the state snapshot")?;

    let jobs: Vec<_> = snapshot
        .jobs
        .into_iter()
        .filter(|j| container.is_none_or(|id| j.container_id == id))
        .filter(|j| !failed || j.status == JobStatus::Failure)
        .collect();
    output::print_jobs(&jobs);
    Ok(())
}
