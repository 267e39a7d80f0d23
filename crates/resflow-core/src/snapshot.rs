//! Store snapshots on disk
//!
//! Manages `<state_dir>/state.json`, its `.backup`, and an advisory
//! `lock.json` so that only one worker serves a state directory.

use crate::error::{ResourceError, Result};
use crate::job::JobRecord;
use crate::link::Link;
use crate::resource::Resource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const SNAPSHOT_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";
const STALE_LOCK_HOURS: i64 = 1;

/// Every persisted row of a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub resources: Vec<Resource>,
    pub links: Vec<Link>,
    pub jobs: Vec<JobRecord>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }
}

impl StoreSnapshot {
    pub fn new(resources: Vec<Resource>, links: Vec<Link>, jobs: Vec<JobRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            resources,
            links,
            jobs,
        }
    }
}

/// Reads and writes snapshots in a state directory
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!(dir = %self.state_dir.display(), "Created state directory");
        }
        Ok(())
    }

    /// Load the last snapshot, or an empty one when none was saved yet
    pub async fn load(&self) -> Result<StoreSnapshot> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, starting empty");
            return Ok(StoreSnapshot::default());
        }

        let content = fs::read_to_string(&path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(ResourceError::StateError(format!(
                "state file version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        tracing::debug!(
            resources = snapshot.resources.len(),
            links = snapshot.links.len(),
            jobs = snapshot.jobs.len(),
            "Loaded state snapshot"
        );
        Ok(snapshot)
    }

    /// Write a snapshot, keeping the previous one as backup
    pub async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, content).await?;

        tracing::debug!(resources = snapshot.resources.len(), "Saved state snapshot");
        Ok(())
    }

    /// Take the directory lock for `holder`
    ///
    /// A lock older than one hour is considered abandoned and taken over.
    pub async fn acquire_lock(&self, holder: &str) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let current: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(current.acquired_at);
            if age.num_hours() < STALE_LOCK_HOURS {
                return Err(ResourceError::LockError(format!(
                    "state is locked by {} (pid {}) since {}",
                    current.holder, current.pid, current.acquired_at
                )));
            }

            tracing::warn!(holder = %current.holder, "Taking over stale state lock");
        }

        let info = LockInfo {
            holder: holder.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&info)?).await?;

        tracing::debug!(holder, "Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state directory lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::objid::ObjId;
    use crate::resource::{NewResource, ResourceQuery, TypeTag};
    use crate::store::ResourceStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_snapshot_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path().join(".resflow"));

        let store = InMemoryStore::new();
        store
            .insert_resource(NewResource::pending(
                10,
                TypeTag::new("Provider.Domain"),
                ObjId::new("10//abc"),
                "default",
            ))
            .await
            .unwrap();

        manager.save(&store.snapshot().await).await.unwrap();
        manager.save(&store.snapshot().await).await.unwrap();
        assert!(manager.backup_path().exists());

        let restored = InMemoryStore::from_snapshot(manager.load().await.unwrap());
        let rows = restored.list_resources(&ResourceQuery::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].objid.as_str(), "10//abc");
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let snapshot = manager.load().await.unwrap();
        assert!(snapshot.resources.is_empty());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        let mut snapshot = StoreSnapshot::default();
        snapshot.version = SNAPSHOT_VERSION + 1;
        manager.save(&snapshot).await.unwrap();

        assert!(matches!(
            manager.load().await,
            Err(ResourceError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock("worker-a").await.unwrap();
        assert!(matches!(
            manager.acquire_lock("worker-b").await,
            Err(ResourceError::LockError(_))
        ));

        lock.release().await.unwrap();
        assert!(manager.acquire_lock("worker-b").await.is_ok());
    }
}
