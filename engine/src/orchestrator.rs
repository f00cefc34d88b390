//! C9 — Batch Orchestrator: builds a batch's initial state from a plan and
//! inventory, then drives waves in order, honoring each wave's pause policy
//! and resuming a prior batch by reusing its stored progress.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::task::JoinSet;

use crate::catalogue::Catalogue;
use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::external::{CloudProviderClient, ObjectStorageClient, VSphereClient};
use crate::pipeline::Pipeline;
use crate::plan::{self, ExpandedEntry, PauseAfter, Plan};
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::semaphore::SemaphoreRegistry;
use crate::stages::Registry;
use crate::state::{BatchState, MigrationState, MigrationStatus, StateStore, WaveStatus};
use crate::vm::{OsFamily, VmDescriptor};

pub struct BatchOrchestrator {
    registry: Arc<Registry>,
    semaphores: Arc<SemaphoreRegistry>,
    state_store: Arc<StateStore>,
    vsphere: Arc<dyn VSphereClient>,
    storage: Arc<dyn ObjectStorageClient>,
    cloud: Arc<dyn CloudProviderClient>,
    app_config: AppConfig,
    catalogue: Catalogue,
    progress: ProgressSender,
}

/// Summary returned once every wave has finished, paused, or failed.
#[derive(Debug, Clone)]
pub struct BatchRunOutcome {
    pub batch_id: String,
    pub wave_status: BTreeMap<String, WaveStatus>,
    pub vm_results: BTreeMap<String, MigrationState>,
}

fn plan_digest(plan: &Plan) -> Result<String> {
    let yaml = plan.to_yaml()?;
    let mut hasher = Sha256::new();
    hasher.update(yaml.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

impl BatchOrchestrator {
    pub fn new(
        state_store: Arc<StateStore>,
        vsphere: Arc<dyn VSphereClient>,
        storage: Arc<dyn ObjectStorageClient>,
        cloud: Arc<dyn CloudProviderClient>,
        app_config: AppConfig,
        catalogue: Catalogue,
        concurrency: &crate::plan::ConcurrencyCaps,
        progress: ProgressSender,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            semaphores: Arc::new(SemaphoreRegistry::new(concurrency)),
            state_store,
            vsphere,
            storage,
            cloud,
            app_config,
            catalogue,
            progress,
        }
    }

    /// Validate the plan against `inventory`, write the batch's initial
    /// state (every selected VM starts `pending`), and return the batch id.
    /// Nothing runs yet — call `run_batch` to execute it.
    pub async fn prepare_batch(
        &self,
        batch_id: &str,
        plan: &Plan,
        inventory: &[VmDescriptor],
    ) -> Result<Vec<ExpandedEntry>> {
        plan.validate(&self.catalogue, inventory)?;

        let by_uuid: BTreeMap<&str, &VmDescriptor> =
            inventory.iter().map(|vm| (vm.uuid.as_str(), vm)).collect();

        let expanded = plan::expand(plan, inventory);
        for entry in &expanded {
            let vm = by_uuid.get(entry.vm_uuid.as_str()).ok_or_else(|| {
                EngineError::validation(format!("expanded entry references unknown vm '{}'", entry.vm_uuid))
            })?;
            if vm.guest_os_family == OsFamily::Other {
                return Err(EngineError::validation(format!(
                    "'{}' has an unsupported guest OS family",
                    vm.name
                )));
            }
            let instance_type = self.catalogue.get(&entry.target).ok_or_else(|| {
                EngineError::UnknownInstanceType(entry.target.clone())
            })?;
            if vm.is_windows() && !instance_type.windows_allowed {
                return Err(EngineError::validation(format!(
                    "'{}' is a Windows guest but target '{}' doesn't allow Windows",
                    vm.name, entry.target
                )));
            }
        }

        let digest = plan_digest(plan)?;
        let mut batch = BatchState::new(batch_id, digest);
        for wave in &plan.waves {
            batch.wave_status.insert(wave.name.clone(), WaveStatus::Pending);
        }
        for entry in &expanded {
            let state = MigrationState::new(batch_id, &entry.vm_name, &entry.vm_uuid);
            batch.vm_states.insert(state.migration_id.clone(), state);
        }
        self.state_store.save(&batch).await?;
        Ok(expanded)
    }

    /// Run (or resume) a previously-prepared batch. `simulate` disables all
    /// external side effects; VMs already `completed` are skipped entirely,
    /// and `failed` VMs are retried from their last completed stage.
    pub async fn run_batch(
        &self,
        batch_id: &str,
        plan: &Plan,
        inventory: &[VmDescriptor],
        expanded: &[ExpandedEntry],
        simulate: bool,
    ) -> Result<BatchRunOutcome> {
        let by_uuid: BTreeMap<&str, &VmDescriptor> =
            inventory.iter().map(|vm| (vm.uuid.as_str(), vm)).collect();

        let pipeline = Pipeline::new(
            self.registry.clone(),
            self.semaphores.clone(),
            self.state_store.clone(),
            self.app_config.retry.clone(),
            self.progress.clone(),
        );

        for wave in &plan.waves {
            let mut batch = self.state_store.load(batch_id).await?;
            if batch.wave_status.get(&wave.name) == Some(&WaveStatus::Completed) {
                continue;
            }
            batch.wave_status.insert(wave.name.clone(), WaveStatus::Running);
            self.state_store.save(&batch).await?;

            // A wave's membership is every entry tagged with its name,
            // further narrowed by the wave's own selector when non-empty.
            let is_wave_member = |e: &ExpandedEntry| {
                e.wave == wave.name
                    && by_uuid
                        .get(e.vm_uuid.as_str())
                        .map(|vm| wave.matches(vm))
                        .unwrap_or(false)
            };

            let wave_vm_count = expanded.iter().filter(|e| is_wave_member(e)).count();
            emit(&self.progress, ProgressEvent::WaveStarted {
                wave: wave.name.clone(),
                vm_count: wave_vm_count,
            });

            let cancel = Arc::new(AtomicBool::new(false));
            let mut joins = JoinSet::new();

            for entry in expanded.iter().filter(|e| is_wave_member(e)) {
                let vm = *by_uuid.get(entry.vm_uuid.as_str()).ok_or_else(|| {
                    EngineError::validation(format!("unknown vm '{}' in wave '{}'", entry.vm_uuid, wave.name))
                })?;
                let migration_id = MigrationState::derive_migration_id(batch_id, &vm.uuid);
                let existing = batch.vm_states.get(&migration_id).cloned().ok_or_else(|| {
                    EngineError::state_store(format!("batch has no prior state for '{}'", vm.name))
                })?;
                if existing.status == MigrationStatus::Completed {
                    continue;
                }

                let os = vm.guest_os_family;
                let ctx = crate::external::StageContext {
                    plan_entry: entry.clone(),
                    source_vm: vm.clone(),
                    vsphere: self.vsphere.clone(),
                    storage: self.storage.clone(),
                    cloud: self.cloud.clone(),
                    app_config: self.app_config.clone(),
                    simulate,
                };
                let mut retry_state = existing.clone();
                retry_state.status = MigrationStatus::Pending;
                retry_state.last_error = None;

                let pipeline = pipeline.clone();
                let batch_id = batch_id.to_string();
                let cancel = cancel.clone();
                joins.spawn(async move { pipeline.run_vm(&batch_id, os, retry_state, ctx, cancel).await });
            }

            let mut wave_failed = false;
            while let Some(joined) = joins.join_next().await {
                let result = joined.map_err(|e| EngineError::state_store(format!("pipeline task panicked: {e}")))??;
                if result.status == MigrationStatus::Failed {
                    wave_failed = true;
                    if wave.pause_after == PauseAfter::PauseOnFailure {
                        cancel.store(true, Ordering::SeqCst);
                    }
                }
            }

            let mut batch = self.state_store.load(batch_id).await?;
            let final_status = if wave_failed {
                WaveStatus::Failed
            } else {
                WaveStatus::Completed
            };
            batch.wave_status.insert(wave.name.clone(), final_status);
            self.state_store.save(&batch).await?;
            emit(&self.progress, ProgressEvent::WaveFinished {
                wave: wave.name.clone(),
                failed: wave_failed,
            });

            let should_pause = wave.pause_after == PauseAfter::Pause
                || (wave.pause_after == PauseAfter::PauseOnFailure && wave_failed);
            if should_pause {
                break;
            }
        }

        let batch = self.state_store.load(batch_id).await?;
        Ok(BatchRunOutcome {
            batch_id: batch.batch_id.clone(),
            wave_status: batch.wave_status.clone(),
            vm_results: batch.vm_states.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::FakeClients;
    use crate::plan::{ConcurrencyCaps, Defaults, MigrationEntry, Selector, Wave};
    use crate::vm::{DiskDescriptor, Firmware, PowerState, Topology};
    use std::collections::HashMap;

    fn vm(name: &str, uuid: &str) -> VmDescriptor {
        VmDescriptor {
            name: name.into(),
            uuid: uuid.into(),
            cpu_count: 2,
            memory_mb: 2048,
            power_state: PowerState::PoweredOn,
            guest_os_family: OsFamily::Linux,
            guest_os_full: "rhel8_64Guest".into(),
            firmware: Firmware::Bios,
            disks: vec![DiskDescriptor {
                size_gb: 20.0,
                thin_provisioned: true,
                controller_class: "pvscsi".into(),
                datastore_path: format!("[ds1] {name}/{name}.vmdk"),
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

    fn two_wave_plan() -> Plan {
        Plan {
            version: 1,
            metadata: HashMap::new(),
            defaults: Defaults::default(),
            concurrency: ConcurrencyCaps::default(),
            migrations: vec![
                MigrationEntry {
                    selector: Selector { vm_name: Some("web-01".into()), vm_pattern: None },
                    target: "GP1-S".into(),
                    zone: Some("fr-par-1".into()),
                    sizing_strategy: None,
                    priority: 0,
                    wave: "wave1".into(),
                    tags: HashMap::new(),
                    overrides: HashMap::new(),
                },
                MigrationEntry {
                    selector: Selector { vm_name: Some("db-01".into()), vm_pattern: None },
                    target: "GP1-M".into(),
                    zone: Some("fr-par-1".into()),
                    sizing_strategy: None,
                    priority: 0,
                    wave: "wave2".into(),
                    tags: HashMap::new(),
                    overrides: HashMap::new(),
                },
            ],
            exclude: vec![],
            waves: vec![
                Wave { name: "wave1".into(), selector: vec![], pause_after: PauseAfter::Continue },
                Wave { name: "wave2".into(), selector: vec![], pause_after: PauseAfter::Continue },
            ],
            post_migration: vec![],
        }
    }

    fn test_orchestrator(dir: &std::path::Path) -> BatchOrchestrator {
        let state_store = Arc::new(StateStore::new(dir));
        let catalogue = Catalogue::seed();
        let (progress_tx, _progress_rx) = tokio::sync::mpsc::unbounded_channel();
        BatchOrchestrator::new(
            state_store,
            Arc::new(FakeClients { vms: vec![] }),
            Arc::new(FakeClients { vms: vec![] }),
            Arc::new(FakeClients { vms: vec![] }),
            AppConfig::default(),
            catalogue,
            &ConcurrencyCaps::default(),
            progress_tx,
        )
    }

    #[tokio::test]
    async fn two_waves_run_in_order_and_both_complete() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = test_orchestrator(dir.path());
        let plan = two_wave_plan();
        let inventory = vec![vm("web-01", "u-web"), vm("db-01", "u-db")];

        let expanded = orchestrator.prepare_batch("batch1", &plan, &inventory).await.unwrap();
        let outcome = orchestrator
            .run_batch("batch1", &plan, &inventory, &expanded, true)
            .await
            .unwrap();

        assert_eq!(outcome.wave_status["wave1"], WaveStatus::Completed);
        assert_eq!(outcome.wave_status["wave2"], WaveStatus::Completed);
        assert!(outcome
            .vm_results
            .values()
            .all(|s| s.status == MigrationStatus::Completed));
    }

    #[tokio::test]
    async fn pause_wave_policy_stops_after_first_wave() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = test_orchestrator(dir.path());
        let mut plan = two_wave_plan();
        plan.waves[0].pause_after = PauseAfter::Pause;
        let inventory = vec![vm("web-01", "u-web"), vm("db-01", "u-db")];

        let expanded = orchestrator.prepare_batch("batch2", &plan, &inventory).await.unwrap();
        let outcome = orchestrator
            .run_batch("batch2", &plan, &inventory, &expanded, true)
            .await
            .unwrap();

        assert_eq!(outcome.wave_status["wave1"], WaveStatus::Completed);
        assert_eq!(outcome.wave_status["wave2"], WaveStatus::Pending);
    }

    #[tokio::test]
    async fn windows_guest_targeting_a_non_windows_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = test_orchestrator(dir.path());
        let mut plan = two_wave_plan();
        plan.migrations[0].target = "DEV1-S".into();
        let mut windows_vm = vm("web-01", "u-web");
        windows_vm.guest_os_family = OsFamily::Windows;
        windows_vm.guest_os_full = "windows9Server64Guest".into();
        let inventory = vec![windows_vm, vm("db-01", "u-db")];

        let result = orchestrator.prepare_batch("batch3", &plan, &inventory).await;
        assert!(result.is_err());
    }
}
