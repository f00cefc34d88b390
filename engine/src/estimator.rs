//! C10 — Estimator: a pure, read-only pass over a plan and its matching
//! inventory that projects disk workspace, wall-clock duration, and monthly
//! cost before anything runs, plus the warnings an operator should see
//! before committing to a batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::catalogue::Catalogue;
use crate::config::AppConfig;
use crate::external::{FakeClients, StageContext};
use crate::plan::{self, Plan};
use crate::semaphore::ResourceClass;
use crate::vm::{Firmware, VmDescriptor};

/// A compressed qcow2 typically lands around 0.7x the source disk size,
/// an uncompressed one closer to 1.0x; used as the midpoint since the
/// estimator doesn't know ahead of time which `convert` will produce.
const QCOW2_ESTIMATE_FACTOR: f64 = 0.85;

/// Extra local disk headroom `snapshot`/`export` need alongside the disk
/// they're already holding.
const DISK_HEADROOM_FACTOR: f64 = 1.2;

/// Rough mean wall-clock time per stage, used only to project a batch's
/// total duration. `export`/`convert`/`upload_s3` scale with the VM's disk
/// size; the rest are fixed per-VM overhead. These are not measured from
/// production runs — an operator with real data should treat the estimate
/// as a ballpark.
fn stage_duration_seconds(stage: &str, disk_gb: f64) -> u64 {
    match stage {
        "validate" => 5,
        "snapshot" => 120,
        // ~3 min per 10 GiB of source disk.
        "export" => ((disk_gb / 10.0) * 180.0).round() as u64,
        // ~1 min per 10 GiB of source disk.
        "convert" => ((disk_gb / 10.0) * 60.0).round() as u64,
        "adapt_guest" => 180,
        "clean_tools" => 180,
        "inject_virtio" => 240,
        "fix_bootloader" => 90,
        "ensure_uefi" => 5,
        // ~1 min per GiB of the uploaded (qcow2) artifact, not the source disk.
        "upload_s3" => ((disk_gb * QCOW2_ESTIMATE_FACTOR) * 60.0).round() as u64,
        "import_scw" => 480,
        "verify" => 30,
        "cleanup" => 60,
        _ => 60,
    }
}

fn concurrency_cap(caps: &crate::plan::ConcurrencyCaps, class: &ResourceClass) -> u64 {
    (match class {
        ResourceClass::Global => caps.global,
        ResourceClass::PerEsxiHost(_) => caps.per_esxi_host,
        ResourceClass::DiskIo => caps.disk_io,
        ResourceClass::S3Upload => caps.s3_upload,
        ResourceClass::ScwApi => caps.scw_api,
    })
    .max(1) as u64
}

#[derive(Debug, Clone)]
pub struct Estimate {
    pub vm_count: usize,
    pub total_source_disk_gb: f64,
    pub required_workspace_gb: f64,
    pub estimated_duration: Duration,
    pub estimated_monthly_cost: f64,
    pub warnings: Vec<String>,
    pub unmappable: Vec<String>,
}

pub fn estimate_batch(
    plan: &Plan,
    inventory: &[VmDescriptor],
    catalogue: &Catalogue,
    app_config: &AppConfig,
    available_disk_gb: Option<f64>,
) -> Estimate {
    let expanded = plan::expand(plan, inventory);
    let by_uuid: HashMap<&str, &VmDescriptor> =
        inventory.iter().map(|vm| (vm.uuid.as_str(), vm)).collect();

    let mut warnings = Vec::new();
    let mut unmappable = Vec::new();
    let mut total_source_disk_gb = 0.0;
    let mut required_workspace_gb = 0.0;
    let mut estimated_monthly_cost = 0.0;
    let mut windows_count = 0usize;
    let mut windows_efi_count = 0usize;

    // Seconds of stage work needed per (wave, resource class), the model's
    // basis for weighting duration by the plan's actual concurrency caps
    // rather than a single global figure.
    let mut per_wave_class_seconds: HashMap<(String, ResourceClass), u64> = HashMap::new();
    let mut per_wave_count: HashMap<String, usize> = HashMap::new();
    let registry = crate::stages::Registry::new();

    for entry in &expanded {
        let Some(vm) = by_uuid.get(entry.vm_uuid.as_str()) else {
            continue;
        };

        let disk_gb = vm.total_disk_gb();
        total_source_disk_gb += disk_gb;
        required_workspace_gb += disk_gb * DISK_HEADROOM_FACTOR + disk_gb * QCOW2_ESTIMATE_FACTOR;

        let Some(instance_type) = catalogue.get(&entry.target) else {
            unmappable.push(entry.vm_name.clone());
            continue;
        };
        estimated_monthly_cost += instance_type.monthly_price;

        if vm.is_windows() {
            windows_count += 1;
            if vm.firmware == Firmware::Efi {
                windows_efi_count += 1;
            }
        }

        // Membership follows the same rule run_batch uses: tagged by
        // `entry.wave`, further narrowed by that wave's own selector.
        let Some(wave) = plan
            .waves
            .iter()
            .find(|w| w.name == entry.wave && w.matches(vm))
        else {
            continue;
        };

        let os = vm.guest_os_family;
        let ctx = StageContext {
            plan_entry: entry.clone(),
            source_vm: (*vm).clone(),
            vsphere: Arc::new(FakeClients { vms: vec![] }),
            storage: Arc::new(FakeClients { vms: vec![] }),
            cloud: Arc::new(FakeClients { vms: vec![] }),
            app_config: app_config.clone(),
            simulate: true,
        };
        if let Some(stages) = registry.stage_order(os) {
            for stage_name in stages {
                let seconds = stage_duration_seconds(stage_name, disk_gb);
                let spec = registry
                    .spec(os, stage_name)
                    .expect("stage_order and specs stay in sync");
                for class in (spec.semaphores)(&ctx) {
                    *per_wave_class_seconds
                        .entry((wave.name.clone(), class))
                        .or_insert(0) += seconds;
                }
            }
        }

        *per_wave_count.entry(wave.name.clone()).or_insert(0) += 1;
    }

    let defined_waves: HashSet<&str> = plan.waves.iter().map(|w| w.name.as_str()).collect();
    let used_waves: HashSet<&str> = expanded.iter().map(|e| e.wave.as_str()).collect();
    for wave in &defined_waves - &used_waves {
        warnings.push(format!("wave '{wave}' has no migrations assigned to it"));
    }

    if windows_count > 0 && app_config.virtio_win_iso.is_none() {
        warnings.push(format!(
            "{windows_count} Windows VM(s) selected but no virtio_win_iso is configured; inject_virtio will fail"
        ));
    }
    if windows_efi_count > 0 && !app_config.allow_missing_kvm {
        warnings.push(format!(
            "{windows_efi_count} Windows VM(s) use UEFI firmware; ensure_uefi requires a KVM-capable host unless allow_missing_kvm is set"
        ));
    }
    if !unmappable.is_empty() {
        warnings.push(format!(
            "{} VM(s) target an instance type not present in the catalogue: {}",
            unmappable.len(),
            unmappable.join(", ")
        ));
    }

    if let Some(available) = available_disk_gb {
        if required_workspace_gb > available {
            warnings.push(format!(
                "estimated workspace need ({required_workspace_gb:.1} GB) exceeds available disk ({available:.1} GB)"
            ));
        }
    }

    // Each wave's duration is bounded by its most contended resource class:
    // the total stage-seconds that land on that class, divided by its cap.
    // Classes are independent, so the binding one (not a sum across all of
    // them) is what actually gates the wave's wall-clock time.
    let mut total_wave_duration = 0u64;
    for wave in &plan.waves {
        if !per_wave_count.contains_key(&wave.name) {
            continue;
        }
        let wave_seconds = per_wave_class_seconds
            .iter()
            .filter(|((w, _), _)| w == &wave.name)
            .map(|((_, class), &seconds)| {
                let cap = concurrency_cap(&plan.concurrency, class);
                (seconds + cap - 1) / cap
            })
            .max()
            .unwrap_or(0);
        total_wave_duration += wave_seconds;
    }

    Estimate {
        vm_count: expanded.len(),
        total_source_disk_gb,
        required_workspace_gb,
        estimated_duration: Duration::from_secs(total_wave_duration),
        estimated_monthly_cost,
        warnings,
        unmappable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ConcurrencyCaps, Defaults, MigrationEntry, PauseAfter, Selector, Wave};
    use crate::vm::{DiskDescriptor, Firmware, OsFamily, PowerState, Topology};

    fn vm(name: &str, uuid: &str, windows: bool) -> VmDescriptor {
        VmDescriptor {
            name: name.into(),
            uuid: uuid.into(),
            cpu_count: 2,
            memory_mb: 4096,
            power_state: PowerState::PoweredOn,
            guest_os_family: if windows { OsFamily::Windows } else { OsFamily::Linux },
            guest_os_full: if windows { "windows9Server64Guest".into() } else { "rhel8_64Guest".into() },
            firmware: if windows { Firmware::Efi } else { Firmware::Bios },
            disks: vec![DiskDescriptor {
                size_gb: 50.0,
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

    fn plan_with(target: &str, wave: &str) -> Plan {
        Plan {
            version: 1,
            metadata: HashMap::new(),
            defaults: Defaults::default(),
            concurrency: ConcurrencyCaps::default(),
            migrations: vec![MigrationEntry {
                selector: Selector { vm_name: Some("vm-1".into()), vm_pattern: None },
                target: target.into(),
                zone: Some("fr-par-1".into()),
                sizing_strategy: None,
                priority: 0,
                wave: wave.into(),
                tags: HashMap::new(),
                overrides: HashMap::new(),
            }],
            exclude: vec![],
            waves: vec![Wave { name: wave.into(), selector: vec![], pause_after: PauseAfter::Continue }],
            post_migration: vec![],
        }
    }

    #[test]
    fn windows_without_virtio_iso_warns() {
        let catalogue = Catalogue::seed();
        let plan = plan_with("ENT1-XL", "w1");
        let inventory = vec![vm("vm-1", "u-1", true)];
        let estimate = estimate_batch(&plan, &inventory, &catalogue, &AppConfig::default(), None);
        assert!(estimate.warnings.iter().any(|w| w.contains("virtio_win_iso")));
    }

    #[test]
    fn unmappable_target_is_flagged_and_excluded_from_cost() {
        let catalogue = Catalogue::seed();
        let plan = plan_with("does-not-exist", "w1");
        let inventory = vec![vm("vm-1", "u-1", false)];
        let estimate = estimate_batch(&plan, &inventory, &catalogue, &AppConfig::default(), None);
        assert_eq!(estimate.unmappable, vec!["vm-1".to_string()]);
        assert_eq!(estimate.estimated_monthly_cost, 0.0);
    }

    #[test]
    fn insufficient_available_disk_warns() {
        let catalogue = Catalogue::seed();
        let plan = plan_with("GP1-S", "w1");
        let inventory = vec![vm("vm-1", "u-1", false)];
        let estimate = estimate_batch(&plan, &inventory, &catalogue, &AppConfig::default(), Some(10.0));
        assert!(estimate.warnings.iter().any(|w| w.contains("exceeds available disk")));
    }

    #[test]
    fn duration_grows_with_disk_size() {
        let catalogue = Catalogue::seed();
        let plan = plan_with("GP1-S", "w1");
        let small = vec![vm("vm-1", "u-1", false)];
        let mut big = small.clone();
        big[0].disks[0].size_gb = 500.0;

        let small_estimate = estimate_batch(&plan, &small, &catalogue, &AppConfig::default(), None);
        let big_estimate = estimate_batch(&plan, &big, &catalogue, &AppConfig::default(), None);
        assert!(big_estimate.estimated_duration > small_estimate.estimated_duration);
    }

    #[test]
    fn duration_respects_the_disk_io_cap_not_just_global() {
        let catalogue = Catalogue::seed();
        let mut plan = plan_with("GP1-S", "w1");
        plan.concurrency.global = 100;
        let inventory: Vec<VmDescriptor> = (0..4)
            .map(|i| vm(&format!("vm-{i}"), &format!("u-{i}"), false))
            .collect();
        plan.migrations = inventory
            .iter()
            .map(|v| MigrationEntry {
                selector: Selector { vm_name: Some(v.name.clone()), vm_pattern: None },
                target: "GP1-S".into(),
                zone: Some("fr-par-1".into()),
                sizing_strategy: None,
                priority: 0,
                wave: "w1".into(),
                tags: HashMap::new(),
                overrides: HashMap::new(),
            })
            .collect();

        plan.concurrency.disk_io = 1;
        let tight = estimate_batch(&plan, &inventory, &catalogue, &AppConfig::default(), None);
        plan.concurrency.disk_io = 4;
        let loose = estimate_batch(&plan, &inventory, &catalogue, &AppConfig::default(), None);
        assert!(tight.estimated_duration > loose.estimated_duration);
    }

    #[test]
    fn empty_wave_is_flagged() {
        let catalogue = Catalogue::seed();
        let mut plan = plan_with("GP1-S", "w1");
        plan.waves.push(Wave { name: "w2".into(), selector: vec![], pause_after: PauseAfter::Continue });
        let inventory = vec![vm("vm-1", "u-1", false)];
        let estimate = estimate_batch(&plan, &inventory, &catalogue, &AppConfig::default(), None);
        assert!(estimate.warnings.iter().any(|w| w.contains("'w2' has no migrations")));
    }
}
