//! Local, filesystem-backed stand-ins for the three external collaborator
//! traits. These are what `cli` wires up for dry runs and demonstrations —
//! a real vSphere/Scaleway integration would live behind the same trait
//! objects without changing anything upstream of them. Grounded on
//! `migration_engine::external::FakeClients`, but durable: every call leaves
//! a file behind under `{work_dir}/fixtures/`, so a `batch resume` after a
//! process restart sees the same snapshots/uploads a real backend would
//! have left in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use migration_engine::catalogue::{Catalogue, InstanceType};
use migration_engine::error::StageError;
use migration_engine::external::{CloudProviderClient, ObjectStorageClient, VSphereClient};
use migration_engine::vm::VmDescriptor;

fn io_err(context: &str, e: std::io::Error) -> StageError {
    StageError::transient(format!("{context}: {e}"))
}

/// Load the VM inventory the CLI operates on. There's no live vCenter to
/// query, so inventory comes from a JSON fixture file the operator points
/// at — the same `VmDescriptor` shape the engine uses internally.
pub fn load_inventory(path: &Path) -> anyhow::Result<Vec<VmDescriptor>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading inventory file '{}': {e}", path.display()))?;
    let inventory: Vec<VmDescriptor> = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("parsing inventory file '{}': {e}", path.display()))?;
    Ok(inventory)
}

pub struct LocalClients {
    root: PathBuf,
}

impl LocalClients {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: work_dir.into().join("fixtures"),
        }
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    fn objects_dir(&self, bucket: &str) -> PathBuf {
        self.root.join("objects").join(bucket)
    }
}

#[async_trait]
impl VSphereClient for LocalClients {
    async fn list_vms(&self, _filter_hint: Option<&str>) -> Result<Vec<VmDescriptor>, StageError> {
        // The CLI resolves inventory itself (see `load_inventory`); a live
        // client would query vCenter here.
        Ok(vec![])
    }

    async fn find_snapshot(&self, vm_uuid: &str, name: &str) -> Result<Option<String>, StageError> {
        let id = format!("snap-{vm_uuid}-{name}");
        let marker = self.snapshots_dir().join(format!("{id}.marker"));
        Ok(tokio::fs::metadata(&marker).await.is_ok().then_some(id))
    }

    async fn create_snapshot(
        &self,
        vm_uuid: &str,
        name: &str,
        quiesce: bool,
    ) -> Result<String, StageError> {
        let dir = self.snapshots_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_err("create_snapshot", e))?;
        let id = format!("snap-{vm_uuid}-{name}");
        let marker = dir.join(format!("{id}.marker"));
        tokio::fs::write(&marker, format!("quiesce={quiesce}"))
            .await
            .map_err(|e| io_err("create_snapshot", e))?;
        Ok(id)
    }

    async fn delete_snapshot(&self, _vm_uuid: &str, snapshot_id: &str) -> Result<(), StageError> {
        let marker = self.snapshots_dir().join(format!("{snapshot_id}.marker"));
        match tokio::fs::remove_file(&marker).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn export_vmdks(
        &self,
        vm_uuid: &str,
        snapshot_id: &str,
        dest_dir: &str,
    ) -> Result<Vec<String>, StageError> {
        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| io_err("export_vmdks", e))?;
        let path = Path::new(dest_dir).join(format!("{vm_uuid}-disk0.vmdk"));
        tokio::fs::write(&path, format!("vmdk placeholder for {snapshot_id}"))
            .await
            .map_err(|e| io_err("export_vmdks", e))?;
        Ok(vec![path.to_string_lossy().to_string()])
    }

    async fn tag_vm(&self, vm_uuid: &str, tag: &str) -> Result<(), StageError> {
        let dir = self.root.join("tags");
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_err("tag_vm", e))?;
        tokio::fs::write(dir.join(format!("{vm_uuid}.tag")), tag)
            .await
            .map_err(|e| io_err("tag_vm", e))
    }

    async fn power_off(&self, vm_uuid: &str) -> Result<(), StageError> {
        let dir = self.root.join("power");
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_err("power_off", e))?;
        tokio::fs::write(dir.join(format!("{vm_uuid}.state")), "poweredOff")
            .await
            .map_err(|e| io_err("power_off", e))
    }
}

#[async_trait]
impl ObjectStorageClient for LocalClients {
    async fn upload(
        &self,
        local_path: &str,
        bucket: &str,
        key: &str,
        _resumable: bool,
    ) -> Result<String, StageError> {
        let dest_dir = self.objects_dir(bucket);
        tokio::fs::create_dir_all(&dest_dir).await.map_err(|e| io_err("upload", e))?;
        let dest = dest_dir.join(key);
        tokio::fs::copy(local_path, &dest).await.map_err(|e| io_err("upload", e))?;
        Ok(format!("file://{}", dest.display()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StageError> {
        let path = self.objects_dir(bucket).join(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StageError> {
        Ok(tokio::fs::metadata(self.objects_dir(bucket).join(key)).await.is_ok())
    }
}

#[async_trait]
impl CloudProviderClient for LocalClients {
    async fn create_snapshot_from_object(
        &self,
        _zone: &str,
        name: &str,
        _bucket: &str,
        _key: &str,
        _volume_type: &str,
    ) -> Result<String, StageError> {
        Ok(format!("scw-snap-{name}"))
    }

    async fn wait_snapshot(
        &self,
        _zone: &str,
        _snapshot_id: &str,
        _timeout: Duration,
    ) -> Result<String, StageError> {
        Ok("available".to_string())
    }

    async fn create_image(
        &self,
        _zone: &str,
        name: &str,
        _root_snapshot_id: &str,
        _arch: &str,
    ) -> Result<String, StageError> {
        Ok(format!("scw-image-{name}"))
    }

    async fn list_instance_types(&self, _zone: &str) -> Result<Vec<InstanceType>, StageError> {
        Ok(Catalogue::seed().all().to_vec())
    }
}
