//! C5 — State Store: durable per-VM and per-batch state under
//! `{work_dir}/batch-state/`. Every write is crash-safe: write to a sibling
//! temp file, fsync, then atomic rename over the target. Concurrent
//! in-process writers are serialized by a mutex keyed on the batch file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub stage: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    pub migration_id: String,
    pub batch_id: String,
    pub vm_name: String,
    pub vm_uuid: String,
    pub status: MigrationStatus,
    pub current_stage: Option<String>,
    pub completed_stages: Vec<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub attempts: u32,
}

impl MigrationState {
    /// `migration_id` is a stable short hash of `batch_id + vm.uuid`, so
    /// resuming a batch always reuses the same state file for the same VM.
    pub fn derive_migration_id(batch_id: &str, vm_uuid: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(batch_id.as_bytes());
        hasher.update(b":");
        hasher.update(vm_uuid.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    pub fn new(batch_id: &str, vm_name: &str, vm_uuid: &str) -> Self {
        let now = Utc::now();
        Self {
            migration_id: Self::derive_migration_id(batch_id, vm_uuid),
            batch_id: batch_id.to_string(),
            vm_name: vm_name.to_string(),
            vm_uuid: vm_uuid.to_string(),
            status: MigrationStatus::Pending,
            current_stage: None,
            completed_stages: Vec::new(),
            artifacts: BTreeMap::new(),
            started_at: now,
            updated_at: now,
            finished_at: None,
            last_error: None,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub plan_digest: String,
    pub wave_status: BTreeMap<String, WaveStatus>,
    pub vm_states: BTreeMap<String, MigrationState>,
}

impl BatchState {
    pub fn new(batch_id: impl Into<String>, plan_digest: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            created_at: Utc::now(),
            plan_digest: plan_digest.into(),
            wave_status: BTreeMap::new(),
            vm_states: BTreeMap::new(),
        }
    }

    /// A fresh batch id for a batch the caller didn't name explicitly: a
    /// short random hex string, distinct from `migration_id`'s content hash
    /// since there's nothing stable yet to hash a new batch from.
    pub fn generate_batch_id() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// A patch applied under the store's mutex in `update_vm`'s
/// read-modify-write cycle.
pub type VmPatch = Box<dyn FnOnce(&mut MigrationState) + Send>;

/// Durable JSON-file-backed state store. One `StateStore` instance should be
/// shared (via `Arc`) across all tasks touching a given `work_dir`; the
/// per-batch-file mutex lives inside.
pub struct StateStore {
    work_dir: PathBuf,
    locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl StateStore {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    fn batch_state_dir(&self) -> PathBuf {
        self.work_dir.join("batch-state")
    }

    fn batch_path(&self, batch_id: &str) -> PathBuf {
        self.batch_state_dir().join(format!("batch-{batch_id}.json"))
    }

    async fn lock_for(&self, batch_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(batch_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write-temp + fsync + atomic rename. Readers tolerate a missing temp
    /// file left over from a crash between write and rename.
    async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(
            path.parent()
                .ok_or_else(|| EngineError::state_store("state path has no parent"))?,
        )
        .await?;
        let tmp_path = path.with_extension("json.tmp");
        {
            use tokio::io::AsyncWriteExt;
            let mut f = tokio::fs::File::create(&tmp_path).await?;
            f.write_all(contents).await?;
            f.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub async fn save(&self, batch: &BatchState) -> Result<()> {
        let guard = self.lock_for(&batch.batch_id).await;
        let _permit = guard.lock().await;
        let path = self.batch_path(&batch.batch_id);
        let json = serde_json::to_vec_pretty(batch)?;
        Self::atomic_write(&path, &json).await
    }

    pub async fn load(&self, batch_id: &str) -> Result<BatchState> {
        let path = self.batch_path(batch_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            EngineError::state_store(format!("no batch state for '{batch_id}': {e}"))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_batches(&self) -> Result<Vec<String>> {
        let dir = self.batch_state_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("batch-").and_then(|s| s.strip_suffix(".json")) {
                ids.push(rest.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn latest_batch(&self) -> Result<Option<BatchState>> {
        let mut ids = self.list_batches().await?;
        ids.sort();
        match ids.pop() {
            Some(id) => Ok(Some(self.load(&id).await?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a single VM's state under the batch mutex.
    pub async fn update_vm(&self, batch_id: &str, migration_id: &str, patch: VmPatch) -> Result<()> {
        let guard = self.lock_for(batch_id).await;
        let _permit = guard.lock().await;

        let path = self.batch_path(batch_id);
        let mut batch: BatchState = {
            let bytes = tokio::fs::read(&path).await?;
            serde_json::from_slice(&bytes)?
        };

        let state = batch.vm_states.get_mut(migration_id).ok_or_else(|| {
            EngineError::state_store(format!("no state for migration '{migration_id}'"))
        })?;
        patch(state);
        state.updated_at = Utc::now();

        let json = serde_json::to_vec_pretty(&batch)?;
        Self::atomic_write(&path, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut batch = BatchState::new("abc123", "digest1");
        let vm_state = MigrationState::new("abc123", "web-01", "uuid-1");
        batch
            .vm_states
            .insert(vm_state.migration_id.clone(), vm_state);

        store.save(&batch).await.unwrap();
        let loaded = store.load("abc123").await.unwrap();
        assert_eq!(loaded.batch_id, "abc123");
        assert_eq!(loaded.vm_states.len(), 1);
    }

    #[tokio::test]
    async fn update_vm_persists_completed_stages() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut batch = BatchState::new("abc123", "digest1");
        let vm_state = MigrationState::new("abc123", "web-01", "uuid-1");
        let mid = vm_state.migration_id.clone();
        batch.vm_states.insert(mid.clone(), vm_state);
        store.save(&batch).await.unwrap();

        store
            .update_vm(
                "abc123",
                &mid,
                Box::new(|s| s.completed_stages.push("validate".to_string())),
            )
            .await
            .unwrap();

        let loaded = store.load("abc123").await.unwrap();
        assert_eq!(loaded.vm_states[&mid].completed_stages, vec!["validate"]);
    }

    #[tokio::test]
    async fn list_batches_and_latest_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&BatchState::new("b1", "d")).await.unwrap();
        store.save(&BatchState::new("b2", "d")).await.unwrap();

        let ids = store.list_batches().await.unwrap();
        assert_eq!(ids, vec!["b1".to_string(), "b2".to_string()]);

        let latest = store.latest_batch().await.unwrap().unwrap();
        assert_eq!(latest.batch_id, "b2");
    }

    #[test]
    fn migration_id_is_stable_across_derivations() {
        let a = MigrationState::derive_migration_id("batch1", "uuid-1");
        let b = MigrationState::derive_migration_id("batch1", "uuid-1");
        let c = MigrationState::derive_migration_id("batch1", "uuid-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generated_batch_ids_are_short_hex_and_not_constant() {
        let a = BatchState::generate_batch_id();
        let b = BatchState::generate_batch_id();
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
