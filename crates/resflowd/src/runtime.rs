//! Process-wide state: the locked state directory, the store restored from
//! its snapshot, and one container per configured platform.

use anyhow::{Context, Result, bail};
use resflow_config::Settings;
use resflow_container::Container;
use resflow_core::{InMemoryStore, RemoteEntity, ResourceStore, StateLock, StateManager};
use resflow_platform_memory::{KIND, MemoryPlatform, memory_container};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Served {
    pub container: Arc<Container>,
    pub platform: Arc<MemoryPlatform>,
}

pub struct Runtime {
    state: StateManager,
    lock: StateLock,
    store: Arc<InMemoryStore>,
    pub served: Vec<Served>,
}

/// Memory platforms keep their entity table next to the store snapshot
fn platform_path(state_dir: &Path, container_id: u64) -> PathBuf {
    state_dir.join(format!("platform-{container_id}.json"))
}

async fn load_platform(path: &Path) -> Result<Vec<RemoteEntity>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// State directory of `settings`, relative paths taken from the working directory
pub fn state_dir(settings: &Settings) -> Result<PathBuf> {
    let base = std::env::current_dir().context("failed to read the working directory")?;
    Ok(settings.state_dir_in(&base))
}

impl Runtime {
    /// Lock the state directory, restore the store and build every container
    ///
    /// Jobs a previous process left running are failed before any work is
    /// accepted.
    pub async fn open(settings: &Settings) -> Result<Self> {
        let state = StateManager::new(state_dir(settings)?);
        let lock = state
            .acquire_lock(&settings.worker_name)
            .await
            .context("failed to lock the state directory")?;
        let snapshot = state
            .load()
            .await
            .context("failed to load the state snapshot")?;
        let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
        let shared: Arc<dyn ResourceStore> = store.clone();

        let mut served = Vec::with_capacity(settings.containers.len());
        for entry in &settings.containers {
            if entry.kind != KIND {
                bail!(
                    "container {} uses platform kind '{}'; only '{}' is built in",
                    entry.id,
                    entry.kind,
                    KIND
                );
            }

            let platform = Arc::new(MemoryPlatform::new(entry.name.clone()));
            platform
                .import(load_platform(&platform_path(state.state_dir(), entry.id)).await?)
                .await;

            let container = memory_container(entry, shared.clone(), platform.clone(), settings)
                .with_context(|| format!("failed to build container {}", entry.id))?;
            let recovered = container
                .recover_interrupted_jobs()
                .await
                .with_context(|| format!("failed to recover jobs of container {}", entry.id))?;
            if recovered > 0 {
                tracing::warn!(container = entry.id, recovered, "Failed interrupted jobs");
            }

            tracing::info!(container = entry.id, name = %entry.name, "Container ready");
            served.push(Served {
                container: Arc::new(container),
                platform,
            });
        }

        Ok(Self {
            state,
            lock,
            store,
            served,
        })
    }

    pub fn served(&self, container: Option<u64>) -> Result<Vec<&Served>> {
        match container {
            None => Ok(self.served.iter().collect()),
            Some(id) => match self.served.iter().find(|s| s.container.id() == id) {
                Some(served) => Ok(vec![served]),
                None => bail!("container {id} is not configured"),
            },
        }
    }

    /// Write the store snapshot and every platform table
    pub async fn save(&self) -> Result<()> {
        self.state
            .save(&self.store.snapshot().await)
            .await
            .context("failed to save the state snapshot")?;

        for served in &self.served {
            let path = platform_path(self.state.state_dir(), served.container.id());
            let content = serde_json::to_string_pretty(&served.platform.export().await)?;
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }

    /// Save and release the state directory
    pub async fn close(self) -> Result<()> {
        self.save().await?;
        self.lock
            .release()
            .await
            .context("failed to release the state lock")?;
        Ok(())
    }
}
