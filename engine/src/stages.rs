//! C6 — Stage Registry: the Linux and Windows migration graphs, each a
//! fixed ordered list of named stages. Stages are tagged handlers resolved
//! by `(OsFamily, stage name)` lookup rather than dynamic dispatch chosen
//! per VM. Each stage also carries the resource classes it needs
//! and whether a transient failure should be retried, so the executor never
//! has to special-case a stage by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StageError;
use crate::external::{artifact_str, set_artifact, ArtifactKeys, StageContext, StageHandler};
use crate::semaphore::ResourceClass;
use crate::state::MigrationState;
use crate::vm::{Firmware, OsFamily};

/// Everything the executor needs about a stage beyond "how to run it".
pub struct StageSpec {
    pub name: &'static str,
    pub handler: Arc<dyn StageHandler>,
    pub semaphores: fn(&StageContext) -> Vec<ResourceClass>,
    /// Whether a `StageErrorKind::TransientInfra` failure from this stage
    /// should be retried with backoff, rather than failing the VM outright.
    pub retryable: bool,
}

/// The two fixed stage graphs. `Other` guests have no graph: the batch
/// builder rejects them before a pipeline is ever started.
pub struct Registry {
    order: HashMap<OsFamily, Vec<&'static str>>,
    specs: HashMap<(OsFamily, &'static str), StageSpec>,
}

impl Registry {
    pub fn new() -> Self {
        let mut specs = HashMap::new();
        let mut order = HashMap::new();

        let linux_order = vec![
            "validate",
            "snapshot",
            "export",
            "convert",
            "adapt_guest",
            "ensure_uefi",
            "upload_s3",
            "import_scw",
            "verify",
            "cleanup",
        ];
        for name in &linux_order {
            specs.insert((OsFamily::Linux, *name), spec_for(name));
        }
        order.insert(OsFamily::Linux, linux_order);

        let windows_order = vec![
            "validate",
            "snapshot",
            "export",
            "convert",
            "clean_tools",
            "inject_virtio",
            "fix_bootloader",
            "ensure_uefi",
            "upload_s3",
            "import_scw",
            "verify",
            "cleanup",
        ];
        for name in &windows_order {
            specs.insert((OsFamily::Windows, *name), spec_for(name));
        }
        order.insert(OsFamily::Windows, windows_order);

        Self { order, specs }
    }

    pub fn stage_order(&self, os: OsFamily) -> Option<&[&'static str]> {
        self.order.get(&os).map(|v| v.as_slice())
    }

    pub fn spec(&self, os: OsFamily, stage: &str) -> Option<&StageSpec> {
        self.specs.get(&(os, stage))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn per_host_class(ctx: &StageContext) -> ResourceClass {
    ResourceClass::PerEsxiHost(ctx.source_vm.topology.host.clone())
}

fn per_host(ctx: &StageContext) -> Vec<ResourceClass> {
    vec![per_host_class(ctx)]
}

fn spec_for(name: &'static str) -> StageSpec {
    match name {
        "validate" => StageSpec {
            name,
            handler: Arc::new(ValidateStage),
            semaphores: |_ctx| vec![ResourceClass::ScwApi],
            retryable: false,
        },
        "snapshot" => StageSpec {
            name,
            handler: Arc::new(SnapshotStage),
            semaphores: per_host,
            retryable: true,
        },
        "export" => StageSpec {
            name,
            handler: Arc::new(ExportStage),
            semaphores: |ctx| vec![per_host_class(ctx), ResourceClass::DiskIo],
            retryable: true,
        },
        "convert" => StageSpec {
            name,
            handler: Arc::new(ConvertStage),
            semaphores: |_ctx| vec![ResourceClass::DiskIo],
            retryable: true,
        },
        "adapt_guest" => StageSpec {
            name,
            handler: Arc::new(AdaptGuestStage),
            semaphores: |_ctx| vec![ResourceClass::DiskIo],
            retryable: false,
        },
        "clean_tools" => StageSpec {
            name,
            handler: Arc::new(CleanToolsStage),
            semaphores: |_ctx| vec![ResourceClass::DiskIo],
            retryable: false,
        },
        "inject_virtio" => StageSpec {
            name,
            handler: Arc::new(InjectVirtioStage),
            semaphores: |_ctx| vec![ResourceClass::DiskIo],
            retryable: false,
        },
        "fix_bootloader" => StageSpec {
            name,
            handler: Arc::new(FixBootloaderStage),
            semaphores: |_ctx| vec![ResourceClass::DiskIo],
            retryable: false,
        },
        "ensure_uefi" => StageSpec {
            name,
            handler: Arc::new(EnsureUefiStage),
            semaphores: |_ctx| vec![ResourceClass::DiskIo],
            retryable: false,
        },
        "upload_s3" => StageSpec {
            name,
            handler: Arc::new(UploadS3Stage),
            semaphores: |_ctx| vec![ResourceClass::S3Upload],
            retryable: true,
        },
        "import_scw" => StageSpec {
            name,
            handler: Arc::new(ImportScwStage),
            semaphores: |_ctx| vec![ResourceClass::ScwApi],
            retryable: true,
        },
        "verify" => StageSpec {
            name,
            handler: Arc::new(VerifyStage),
            semaphores: |_ctx| vec![ResourceClass::ScwApi],
            retryable: true,
        },
        "cleanup" => StageSpec {
            name,
            handler: Arc::new(CleanupStage),
            semaphores: per_host,
            retryable: true,
        },
        other => unreachable!("no stage spec registered for '{other}'"),
    }
}

async fn run_tool(program: &str, args: &[&str]) -> Result<(), StageError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| StageError::transient(format!("failed to spawn {program}: {e}")))?;
    if !output.status.success() {
        return Err(StageError::fatal(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

struct ValidateStage;

#[async_trait]
impl StageHandler for ValidateStage {
    async fn run(&self, ctx: &StageContext, _state: &mut MigrationState) -> Result<(), StageError> {
        if ctx.source_vm.disks.is_empty() {
            return Err(StageError::preflight("VM has no disks to migrate"));
        }
        if ctx.source_vm.power_state == crate::vm::PowerState::Suspended {
            return Err(StageError::preflight(
                "VM is suspended; resume or power off before migrating",
            ));
        }
        Ok(())
    }
}

struct SnapshotStage;

#[async_trait]
impl StageHandler for SnapshotStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        if ctx.simulate {
            set_artifact(state, ArtifactKeys::SNAPSHOT_ID, format!("sim-snap-{}", state.migration_id));
            return Ok(());
        }
        let name = format!("migration-{}", state.migration_id);
        // A retry after a crash between snapshot and checkpoint must not
        // leave a second snapshot of the same VM behind.
        let snapshot_id = match ctx.vsphere.find_snapshot(&state.vm_uuid, &name).await? {
            Some(existing) => existing,
            None => ctx.vsphere.create_snapshot(&state.vm_uuid, &name, true).await?,
        };
        set_artifact(state, ArtifactKeys::SNAPSHOT_ID, snapshot_id);
        Ok(())
    }
}

struct ExportStage;

/// Matches an export already sitting at `dest_path` against the source
/// disk's reported size, within the slack thin-provisioned exports leave.
const EXPORT_SIZE_TOLERANCE: f64 = 0.05;

#[async_trait]
impl StageHandler for ExportStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let snapshot_id = artifact_str(state, ArtifactKeys::SNAPSHOT_ID)
            .ok_or_else(|| StageError::artifact("missing snapshot_id artifact"))?;
        let dest_dir = format!("{}/export/{}", ctx.app_config.work_dir, state.migration_id);
        let dest_path = format!("{dest_dir}/{}-disk0.vmdk", state.vm_uuid);
        if ctx.simulate {
            set_artifact(state, ArtifactKeys::VMDK_PATHS, vec![dest_path]);
            return Ok(());
        }
        if let Some(disk) = ctx.source_vm.disks.first() {
            let expected_bytes = disk.size_gb * 1e9;
            if let Ok(meta) = tokio::fs::metadata(&dest_path).await {
                let delta = (meta.len() as f64 - expected_bytes).abs() / expected_bytes;
                if delta < EXPORT_SIZE_TOLERANCE {
                    set_artifact(state, ArtifactKeys::VMDK_PATHS, vec![dest_path]);
                    return Ok(());
                }
            }
        }
        let paths = ctx
            .vsphere
            .export_vmdks(&state.vm_uuid, &snapshot_id, &dest_dir)
            .await?;
        set_artifact(state, ArtifactKeys::VMDK_PATHS, paths);
        Ok(())
    }
}

struct ConvertStage;

async fn qcow2_is_valid(path: &str) -> bool {
    tokio::process::Command::new("qemu-img")
        .args(["info", path])
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[async_trait]
impl StageHandler for ConvertStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let first = state
            .artifacts
            .get(ArtifactKeys::VMDK_PATHS)
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .ok_or_else(|| StageError::artifact("missing or empty vmdk_paths artifact"))?
            .to_string();
        let qcow2_path = format!("{}.qcow2", first.trim_end_matches(".vmdk"));
        if !ctx.simulate && !qcow2_is_valid(&qcow2_path).await {
            run_tool("qemu-img", &["convert", "-O", "qcow2", &first, &qcow2_path]).await?;
        }
        set_artifact(state, ArtifactKeys::QCOW2_PATH, qcow2_path);
        Ok(())
    }
}

fn require_qcow2(state: &MigrationState) -> Result<String, StageError> {
    artifact_str(state, ArtifactKeys::QCOW2_PATH)
        .ok_or_else(|| StageError::artifact("missing qcow2_path artifact"))
}

struct AdaptGuestStage;

#[async_trait]
impl StageHandler for AdaptGuestStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let qcow2_path = require_qcow2(state)?;
        if ctx.simulate {
            return Ok(());
        }
        run_tool(
            "virt-customize",
            &["-a", &qcow2_path, "--run-command", "update-grub || true"],
        )
        .await
    }
}

struct CleanToolsStage;

#[async_trait]
impl StageHandler for CleanToolsStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let qcow2_path = require_qcow2(state)?;
        if ctx.simulate {
            return Ok(());
        }
        run_tool(
            "virt-customize",
            &["-a", &qcow2_path, "--uninstall", "vmware-tools"],
        )
        .await
    }
}

struct InjectVirtioStage;

#[async_trait]
impl StageHandler for InjectVirtioStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let iso = ctx.app_config.virtio_win_iso.as_deref().ok_or_else(|| {
            StageError::fatal("virtio_win_iso is not configured; required for Windows guests")
        })?;
        let qcow2_path = require_qcow2(state)?;
        if ctx.simulate {
            return Ok(());
        }
        run_tool(
            "virt-customize",
            &["-a", &qcow2_path, "--inject-virtio-drivers", iso],
        )
        .await
    }
}

struct FixBootloaderStage;

#[async_trait]
impl StageHandler for FixBootloaderStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let qcow2_path = require_qcow2(state)?;
        if ctx.simulate {
            return Ok(());
        }
        run_tool(
            "virt-customize",
            &["-a", &qcow2_path, "--firstboot-command", "bcdboot C:\\Windows"],
        )
        .await
    }
}

struct EnsureUefiStage;

#[async_trait]
impl StageHandler for EnsureUefiStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let mode = match ctx.source_vm.firmware {
            Firmware::Bios => "bios",
            Firmware::Efi => {
                if !std::path::Path::new("/dev/kvm").exists() && !ctx.app_config.allow_missing_kvm {
                    return Err(StageError::fatal(
                        "UEFI boot probe requires a KVM-capable host and allow_missing_kvm is false",
                    ));
                }
                "uefi"
            }
        };
        set_artifact(state, ArtifactKeys::BOOT_MODE, mode);
        Ok(())
    }
}

struct UploadS3Stage;

#[async_trait]
impl StageHandler for UploadS3Stage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let qcow2_path = require_qcow2(state)?;
        let key = format!("{}/{}.qcow2", state.batch_id, state.migration_id);
        if ctx.simulate {
            set_artifact(state, ArtifactKeys::S3_KEY, key.clone());
            set_artifact(state, ArtifactKeys::S3_URL, format!("sim://{}/{key}", ctx.app_config.default_bucket));
            return Ok(());
        }
        let url = ctx
            .storage
            .upload(&qcow2_path, &ctx.app_config.default_bucket, &key, true)
            .await?;
        set_artifact(state, ArtifactKeys::S3_KEY, key);
        set_artifact(state, ArtifactKeys::S3_URL, url);
        Ok(())
    }
}

struct ImportScwStage;

#[async_trait]
impl StageHandler for ImportScwStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        let key = artifact_str(state, ArtifactKeys::S3_KEY)
            .ok_or_else(|| StageError::artifact("missing s3_key artifact"))?;
        let name = format!("migration-{}", state.migration_id);
        if ctx.simulate {
            set_artifact(state, ArtifactKeys::SCW_SNAPSHOT_ID, format!("sim-snap-{name}"));
            set_artifact(state, ArtifactKeys::SCW_IMAGE_ID, format!("sim-image-{name}"));
            return Ok(());
        }
        let snapshot_id = ctx
            .cloud
            .create_snapshot_from_object(
                &ctx.plan_entry.zone,
                &name,
                &ctx.app_config.default_bucket,
                &key,
                &ctx.app_config.default_volume_type,
            )
            .await?;
        ctx.cloud
            .wait_snapshot(&ctx.plan_entry.zone, &snapshot_id, ctx.app_config.snapshot_wait_timeout)
            .await?;
        let image_id = ctx
            .cloud
            .create_image(&ctx.plan_entry.zone, &name, &snapshot_id, "x86_64")
            .await?;
        set_artifact(state, ArtifactKeys::SCW_SNAPSHOT_ID, snapshot_id);
        set_artifact(state, ArtifactKeys::SCW_IMAGE_ID, image_id);
        Ok(())
    }
}

struct VerifyStage;

#[async_trait]
impl StageHandler for VerifyStage {
    async fn run(&self, _ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        if artifact_str(state, ArtifactKeys::SCW_IMAGE_ID).is_none() {
            return Err(StageError::artifact("no image produced to verify"));
        }
        Ok(())
    }
}

struct CleanupStage;

#[async_trait]
impl StageHandler for CleanupStage {
    async fn run(&self, ctx: &StageContext, state: &mut MigrationState) -> Result<(), StageError> {
        if ctx.simulate {
            return Ok(());
        }
        if let Some(snapshot_id) = artifact_str(state, ArtifactKeys::SNAPSHOT_ID) {
            ctx.vsphere.delete_snapshot(&state.vm_uuid, &snapshot_id).await?;
        }
        if let Some(key) = artifact_str(state, ArtifactKeys::S3_KEY) {
            ctx.storage.delete(&ctx.app_config.default_bucket, &key).await?;
        }
        ctx.vsphere.tag_vm(&state.vm_uuid, "migrated").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::external::{FakeClients, VSphereClient};
    use crate::plan::ExpandedEntry;
    use crate::sizing::SizingStrategy;
    use crate::vm::{DiskDescriptor, PowerState, Topology, VmDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_vm() -> VmDescriptor {
        VmDescriptor {
            name: "web-01".into(),
            uuid: "uuid-1".into(),
            cpu_count: 2,
            memory_mb: 4096,
            power_state: PowerState::PoweredOn,
            guest_os_family: OsFamily::Linux,
            guest_os_full: "rhel8_64Guest".into(),
            firmware: Firmware::Bios,
            disks: vec![DiskDescriptor {
                size_gb: 10.0,
                thin_provisioned: true,
                controller_class: "pvscsi".into(),
                datastore_path: "[ds1] web-01/web-01.vmdk".into(),
                is_rdm: false,
                is_shared: false,
            }],
            nics: vec![],
            tools_status: "toolsOk".into(),
            snapshot_names: vec![],
            topology: Topology {
                datacenter: "dc1".into(),
                cluster: "cl1".into(),
                host: "esxi-01".into(),
                folder_path: "prod".into(),
            },
        }
    }

    fn test_ctx(vm: VmDescriptor, vsphere: Arc<dyn VSphereClient>) -> StageContext {
        StageContext {
            plan_entry: ExpandedEntry {
                vm_name: vm.name.clone(),
                vm_uuid: vm.uuid.clone(),
                target: "GP1-S".into(),
                zone: "fr-par-1".into(),
                sizing_strategy: SizingStrategy::Exact,
                priority: 0,
                wave: "w1".into(),
                tags: HashMap::new(),
                overrides: HashMap::new(),
                plan_order: 0,
            },
            source_vm: vm,
            vsphere,
            storage: Arc::new(FakeClients { vms: vec![] }),
            cloud: Arc::new(FakeClients { vms: vec![] }),
            app_config: AppConfig::default(),
            simulate: false,
        }
    }

    /// Delegates everything to an inner `FakeClients` except `export_vmdks`,
    /// whose call count this test inspects directly.
    struct CountingVsphere {
        inner: FakeClients,
        export_calls: AtomicUsize,
    }

    #[async_trait]
    impl VSphereClient for CountingVsphere {
        async fn list_vms(&self, f: Option<&str>) -> Result<Vec<VmDescriptor>, StageError> {
            self.inner.list_vms(f).await
        }
        async fn find_snapshot(&self, vm_uuid: &str, name: &str) -> Result<Option<String>, StageError> {
            self.inner.find_snapshot(vm_uuid, name).await
        }
        async fn create_snapshot(&self, vm_uuid: &str, name: &str, q: bool) -> Result<String, StageError> {
            self.inner.create_snapshot(vm_uuid, name, q).await
        }
        async fn delete_snapshot(&self, vm_uuid: &str, snapshot_id: &str) -> Result<(), StageError> {
            self.inner.delete_snapshot(vm_uuid, snapshot_id).await
        }
        async fn export_vmdks(&self, vm_uuid: &str, snapshot_id: &str, dest_dir: &str) -> Result<Vec<String>, StageError> {
            self.export_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.export_vmdks(vm_uuid, snapshot_id, dest_dir).await
        }
        async fn tag_vm(&self, vm_uuid: &str, tag: &str) -> Result<(), StageError> {
            self.inner.tag_vm(vm_uuid, tag).await
        }
        async fn power_off(&self, vm_uuid: &str) -> Result<(), StageError> {
            self.inner.power_off(vm_uuid).await
        }
    }

    #[tokio::test]
    async fn snapshot_stage_reuses_an_existing_snapshot_instead_of_creating_one() {
        let mut vm = test_vm();
        let state = MigrationState::new("batch1", &vm.name, &vm.uuid);
        vm.snapshot_names = vec![format!("migration-{}", state.migration_id)];
        let ctx = test_ctx(vm.clone(), Arc::new(FakeClients { vms: vec![vm] }));

        let mut state = state;
        SnapshotStage.run(&ctx, &mut state).await.unwrap();

        let snapshot_id = artifact_str(&state, ArtifactKeys::SNAPSHOT_ID).unwrap();
        assert!(snapshot_id.starts_with("existing-snap-"));
    }

    #[tokio::test]
    async fn snapshot_stage_creates_a_new_snapshot_when_none_exists() {
        let vm = test_vm();
        let ctx = test_ctx(vm.clone(), Arc::new(FakeClients { vms: vec![vm] }));
        let mut state = MigrationState::new("batch1", &ctx.source_vm.name, &ctx.source_vm.uuid);

        SnapshotStage.run(&ctx, &mut state).await.unwrap();

        let snapshot_id = artifact_str(&state, ArtifactKeys::SNAPSHOT_ID).unwrap();
        assert!(snapshot_id.starts_with("snap-"));
    }

    #[tokio::test]
    async fn export_stage_skips_re_export_when_a_matching_file_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = test_vm();
        vm.disks[0].size_gb = 0.00001; // 10 KB, so the test doesn't write a real disk-sized file
        let vsphere = Arc::new(CountingVsphere {
            inner: FakeClients { vms: vec![vm.clone()] },
            export_calls: AtomicUsize::new(0),
        });
        let mut ctx = test_ctx(vm.clone(), vsphere.clone());
        ctx.app_config.work_dir = dir.path().to_string_lossy().to_string();

        let mut state = MigrationState::new("batch1", &vm.name, &vm.uuid);
        set_artifact(&mut state, ArtifactKeys::SNAPSHOT_ID, "snap-1");

        let dest_dir = format!("{}/export/{}", ctx.app_config.work_dir, state.migration_id);
        tokio::fs::create_dir_all(&dest_dir).await.unwrap();
        let dest_path = format!("{dest_dir}/{}-disk0.vmdk", vm.uuid);
        let expected_bytes = (vm.disks[0].size_gb * 1e9) as u64;
        tokio::fs::write(&dest_path, vec![0u8; expected_bytes as usize])
            .await
            .unwrap();

        ExportStage.run(&ctx, &mut state).await.unwrap();

        assert_eq!(vsphere.export_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn export_stage_re_exports_when_the_existing_file_size_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = test_vm();
        vm.disks[0].size_gb = 0.00001;
        let vsphere = Arc::new(CountingVsphere {
            inner: FakeClients { vms: vec![vm.clone()] },
            export_calls: AtomicUsize::new(0),
        });
        let mut ctx = test_ctx(vm.clone(), vsphere.clone());
        ctx.app_config.work_dir = dir.path().to_string_lossy().to_string();

        let mut state = MigrationState::new("batch1", &vm.name, &vm.uuid);
        set_artifact(&mut state, ArtifactKeys::SNAPSHOT_ID, "snap-1");

        let dest_dir = format!("{}/export/{}", ctx.app_config.work_dir, state.migration_id);
        tokio::fs::create_dir_all(&dest_dir).await.unwrap();
        let dest_path = format!("{dest_dir}/{}-disk0.vmdk", vm.uuid);
        tokio::fs::write(&dest_path, vec![0u8; 16]).await.unwrap();

        ExportStage.run(&ctx, &mut state).await.unwrap();

        assert_eq!(vsphere.export_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn linux_graph_has_ten_stages_in_order() {
        let registry = Registry::new();
        let order = registry.stage_order(OsFamily::Linux).unwrap();
        assert_eq!(order.len(), 10);
        assert_eq!(order[0], "validate");
        assert_eq!(order[order.len() - 1], "cleanup");
    }

    #[test]
    fn windows_graph_has_twelve_stages_and_extra_steps() {
        let registry = Registry::new();
        let order = registry.stage_order(OsFamily::Windows).unwrap();
        assert_eq!(order.len(), 12);
        assert!(order.contains(&"inject_virtio"));
        assert!(order.contains(&"fix_bootloader"));
        assert!(order.contains(&"clean_tools"));
    }

    #[test]
    fn other_os_family_has_no_graph() {
        let registry = Registry::new();
        assert!(registry.stage_order(OsFamily::Other).is_none());
    }

    #[test]
    fn every_stage_in_order_has_a_matching_spec() {
        let registry = Registry::new();
        for os in [OsFamily::Linux, OsFamily::Windows] {
            for stage in registry.stage_order(os).unwrap() {
                assert!(registry.spec(os, stage).is_some(), "missing spec for {stage}");
            }
        }
    }
}
