//! External interfaces. These are the only points where the orchestrator
//! core talks to the outside world: the vSphere client, the object-storage
//! uploader, and the cloud-provider image-import API. All three are opaque
//! collaborators — the core only depends on these trait contracts, each a
//! `Send + Sync` async trait resolved through a small registry.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StageError;
use crate::state::MigrationState;
use crate::vm::VmDescriptor;

/// Consumed vSphere operations.
#[async_trait]
pub trait VSphereClient: Send + Sync {
    async fn list_vms(&self, filter_hint: Option<&str>) -> Result<Vec<VmDescriptor>, StageError>;
    /// Look up an existing snapshot by name, for stages that must not create
    /// a duplicate on resume. `Ok(None)` means no such snapshot exists yet.
    async fn find_snapshot(&self, vm_uuid: &str, name: &str) -> Result<Option<String>, StageError>;
    async fn create_snapshot(
        &self,
        vm_uuid: &str,
        name: &str,
        quiesce: bool,
    ) -> Result<String, StageError>;
    async fn delete_snapshot(&self, vm_uuid: &str, snapshot_id: &str) -> Result<(), StageError>;
    async fn export_vmdks(
        &self,
        vm_uuid: &str,
        snapshot_id: &str,
        dest_dir: &str,
    ) -> Result<Vec<String>, StageError>;
    async fn tag_vm(&self, vm_uuid: &str, tag: &str) -> Result<(), StageError>;
    async fn power_off(&self, vm_uuid: &str) -> Result<(), StageError>;
}

/// Consumed object-storage operations.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    async fn upload(
        &self,
        local_path: &str,
        bucket: &str,
        key: &str,
        resumable: bool,
    ) -> Result<String, StageError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StageError>;
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StageError>;
}

/// Consumed cloud-provider operations.
#[async_trait]
pub trait CloudProviderClient: Send + Sync {
    async fn create_snapshot_from_object(
        &self,
        zone: &str,
        name: &str,
        bucket: &str,
        key: &str,
        volume_type: &str,
    ) -> Result<String, StageError>;
    async fn wait_snapshot(
        &self,
        zone: &str,
        snapshot_id: &str,
        timeout: Duration,
    ) -> Result<String, StageError>;
    async fn create_image(
        &self,
        zone: &str,
        name: &str,
        root_snapshot_id: &str,
        arch: &str,
    ) -> Result<String, StageError>;
    async fn list_instance_types(
        &self,
        zone: &str,
    ) -> Result<Vec<crate::catalogue::InstanceType>, StageError>;
}

/// Everything a stage handler needs besides the migration state: resolved
/// plan-entry data and the three external clients. One `StageContext` is
/// built per VM pipeline and threaded through every stage invocation.
pub struct StageContext {
    pub plan_entry: crate::plan::ExpandedEntry,
    /// Snapshot of the source VM as it looked when the batch was built, used
    /// for firmware/host/disk facts stage handlers need that plan expansion
    /// doesn't carry. Never re-queried mid-run.
    pub source_vm: crate::vm::VmDescriptor,
    pub vsphere: std::sync::Arc<dyn VSphereClient>,
    pub storage: std::sync::Arc<dyn ObjectStorageClient>,
    pub cloud: std::sync::Arc<dyn CloudProviderClient>,
    pub app_config: crate::config::AppConfig,
    /// Dry-run mode: handlers fabricate their artifacts instead of calling
    /// out to vSphere/storage/cloud or spawning local tools, and the
    /// executor skips semaphore acquisition entirely.
    pub simulate: bool,
}

/// The stage handler contract: `(plan_entry, migration_state,
/// app_config) -> result`. A handler reads only its declared input
/// artifacts, and on success sets its declared output artifacts on
/// `migration_state` — but it must never touch `completed_stages` or
/// persist state; the executor owns both.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &StageContext,
        state: &mut MigrationState,
    ) -> Result<(), StageError>;
}

pub fn artifact_str(state: &MigrationState, key: &str) -> Option<String> {
    state
        .artifacts
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn set_artifact(state: &mut MigrationState, key: &str, value: impl Into<Value>) {
    state.artifacts.insert(key.to_string(), value.into());
}

/// Artifacts, typed per key, carried alongside the untyped `MigrationState`
/// bag for forward compatibility, replacing ad-hoc artifact storage with
/// named constants.
#[derive(Debug, Clone, Default)]
pub struct ArtifactKeys;

impl ArtifactKeys {
    pub const SNAPSHOT_ID: &'static str = "snapshot_id";
    pub const VMDK_PATHS: &'static str = "vmdk_paths";
    pub const QCOW2_PATH: &'static str = "qcow2_path";
    pub const BOOT_MODE: &'static str = "boot_mode";
    pub const S3_KEY: &'static str = "s3_key";
    pub const S3_URL: &'static str = "s3_url";
    pub const SCW_SNAPSHOT_ID: &'static str = "scw_snapshot_id";
    pub const SCW_IMAGE_ID: &'static str = "scw_image_id";
}

/// A fake in-memory vSphere/storage/cloud client set used by tests and by
/// `cli`'s dry-run/demo paths. Not a substitute for the real integrations.
pub struct FakeClients {
    pub vms: Vec<VmDescriptor>,
}

#[async_trait]
impl VSphereClient for FakeClients {
    async fn list_vms(&self, _filter_hint: Option<&str>) -> Result<Vec<VmDescriptor>, StageError> {
        Ok(self.vms.clone())
    }

    async fn find_snapshot(&self, vm_uuid: &str, name: &str) -> Result<Option<String>, StageError> {
        let exists = self
            .vms
            .iter()
            .any(|vm| vm.uuid == vm_uuid && vm.snapshot_names.iter().any(|n| n == name));
        Ok(exists.then(|| format!("existing-snap-{vm_uuid}-{name}")))
    }

    async fn create_snapshot(
        &self,
        vm_uuid: &str,
        name: &str,
        _quiesce: bool,
    ) -> Result<String, StageError> {
        Ok(format!("snap-{vm_uuid}-{name}"))
    }

    async fn delete_snapshot(&self, _vm_uuid: &str, _snapshot_id: &str) -> Result<(), StageError> {
        Ok(())
    }

    async fn export_vmdks(
        &self,
        vm_uuid: &str,
        _snapshot_id: &str,
        dest_dir: &str,
    ) -> Result<Vec<String>, StageError> {
        Ok(vec![format!("{dest_dir}/{vm_uuid}-disk0.vmdk")])
    }

    async fn tag_vm(&self, _vm_uuid: &str, _tag: &str) -> Result<(), StageError> {
        Ok(())
    }

    async fn power_off(&self, _vm_uuid: &str) -> Result<(), StageError> {
        Ok(())
    }
}

#[async_trait]
impl ObjectStorageClient for FakeClients {
    async fn upload(
        &self,
        _local_path: &str,
        _bucket: &str,
        key: &str,
        _resumable: bool,
    ) -> Result<String, StageError> {
        Ok(format!("https://fake-bucket.example/{key}"))
    }

    async fn delete(&self, _bucket: &str, _key: &str) -> Result<(), StageError> {
        Ok(())
    }

    async fn exists(&self, _bucket: &str, _key: &str) -> Result<bool, StageError> {
        Ok(true)
    }
}

#[async_trait]
impl CloudProviderClient for FakeClients {
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

    async fn list_instance_types(
        &self,
        _zone: &str,
    ) -> Result<Vec<crate::catalogue::InstanceType>, StageError> {
        Ok(crate::catalogue::Catalogue::seed().all().to_vec())
    }
}
