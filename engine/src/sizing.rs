//! C3 — Sizing Mapper: given a VM and a strategy, selects a target instance
//! type from the catalogue via a filter-sort-pick algorithm over the
//! catalogue's candidates.

use serde::{Deserialize, Serialize};

use crate::catalogue::{Architecture, Catalogue, InstanceType};
use crate::vm::VmDescriptor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizingStrategy {
    Exact,
    Optimize,
    Cost,
}

/// Headroom required by the `optimize` strategy, expressed as a multiplier
/// (default 1.2, i.e. 20% headroom).
#[derive(Debug, Clone, Copy)]
pub struct OptimizeHeadroom(pub f64);

impl Default for OptimizeHeadroom {
    fn default() -> Self {
        OptimizeHeadroom(1.2)
    }
}

#[derive(Debug, Clone)]
pub struct SizingOutcome {
    /// Best-first ordered candidates.
    pub candidates: Vec<String>,
    pub chosen: Option<String>,
    pub warnings: Vec<String>,
    pub unmappable: bool,
}

/// Filter the catalogue down to types that can physically host `vm`:
/// architecture-compatible, Windows-allowed iff the source is Windows,
/// vCPU/RAM sufficient, and either enough local storage or enough
/// attachable block volumes.
fn viable_candidates<'a>(vm: &VmDescriptor, catalogue: &'a Catalogue) -> Vec<&'a InstanceType> {
    let total_disk = vm.total_disk_gb();
    let arch = Architecture::infer_from_guest_os(&vm.guest_os_full);
    catalogue
        .all()
        .iter()
        .filter(|t| t.architecture == arch)
        .filter(|t| t.windows_allowed || !vm.is_windows())
        .filter(|t| t.vcpu as f64 >= vm.cpu_count as f64)
        .filter(|t| t.ram_gb >= vm.memory_gb())
        .filter(|t| {
            t.local_storage_gb >= total_disk
                || (t.supports_block_storage() && t.max_attached_volumes as usize >= vm.disks.len())
        })
        .collect()
}

fn price_sort_key(t: &InstanceType) -> (u64, u64, u64) {
    // price/vcpu/ram compared as fixed-point so f64 never drives an Ord.
    (
        (t.hourly_price * 1_000_000.0).round() as u64,
        t.vcpu as u64,
        (t.ram_gb * 1_000.0).round() as u64,
    )
}

fn capacity_sort_key(t: &InstanceType) -> (u64, u64, u64) {
    (
        t.vcpu as u64,
        (t.ram_gb * 1_000.0).round() as u64,
        (t.hourly_price * 1_000_000.0).round() as u64,
    )
}

/// Select a target instance type for `vm` under `strategy`. Never panics on
/// an unmappable VM: returns `unmappable = true` and the entry should be
/// quarantined by the caller (plan expansion), not dropped.
pub fn size_vm(
    vm: &VmDescriptor,
    strategy: SizingStrategy,
    catalogue: &Catalogue,
    headroom: OptimizeHeadroom,
) -> SizingOutcome {
    let mut warnings = Vec::new();
    let mut candidates = viable_candidates(vm, catalogue);

    if candidates.is_empty() {
        return SizingOutcome {
            candidates: vec![],
            chosen: None,
            warnings,
            unmappable: true,
        };
    }

    match strategy {
        SizingStrategy::Exact => {
            candidates.sort_by_key(|t| capacity_sort_key(t));
        }
        SizingStrategy::Cost => {
            candidates.sort_by_key(|t| price_sort_key(t));
        }
        SizingStrategy::Optimize => {
            let min_cpu = (vm.cpu_count as f64 * headroom.0).ceil();
            let min_ram = vm.memory_gb() * headroom.0;
            let mut headroomed: Vec<&InstanceType> = candidates
                .iter()
                .copied()
                .filter(|t| t.vcpu as f64 >= min_cpu && t.ram_gb >= min_ram)
                .collect();

            if headroomed.is_empty() {
                warnings.push(format!(
                    "no instance type satisfies {}% headroom for '{}'; falling back to exact sizing",
                    ((headroom.0 - 1.0) * 100.0).round(),
                    vm.name
                ));
                candidates.sort_by_key(|t| capacity_sort_key(t));
            } else {
                headroomed.sort_by_key(|t| price_sort_key(t));
                candidates = headroomed;
            }
        }
    }

    let chosen = candidates.first().map(|t| t.id.clone());
    let candidate_ids = candidates.iter().map(|t| t.id.clone()).collect();

    SizingOutcome {
        candidates: candidate_ids,
        chosen,
        warnings,
        unmappable: false,
    }
}

/// Sizing is monotone in (cpu, ram) of the chosen type for `exact` and
/// `optimize` when the source VM's (cpu, ram, disk) grow.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{DiskDescriptor, Firmware, OsFamily, PowerState, Topology};

    fn vm_with(cpu: u32, ram_mb: u64, disk_gb: f64, windows: bool) -> VmDescriptor {
        VmDescriptor {
            name: "vm".into(),
            uuid: "u".into(),
            cpu_count: cpu,
            memory_mb: ram_mb,
            power_state: PowerState::PoweredOn,
            guest_os_family: if windows { OsFamily::Windows } else { OsFamily::Linux },
            guest_os_full: if windows { "windows9_64Guest".into() } else { "rhel8_64Guest".into() },
            firmware: Firmware::Bios,
            disks: vec![DiskDescriptor {
                size_gb: disk_gb,
                thin_provisioned: true,
                controller_class: "pvscsi".into(),
                datastore_path: "[ds1] vm/vm.vmdk".into(),
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

    #[test]
    fn exact_picks_minimal_sufficient_type() {
        let cat = Catalogue::seed();
        let small = vm_with(2, 2048, 10.0, false);
        let out = size_vm(&small, SizingStrategy::Exact, &cat, OptimizeHeadroom::default());
        assert_eq!(out.chosen.as_deref(), Some("GP1-XS"));
    }

    #[test]
    fn sizing_is_monotone_in_cpu_and_ram() {
        let cat = Catalogue::seed();
        let a = vm_with(2, 2048, 10.0, false);
        let b = vm_with(8, 32768, 10.0, false);

        let out_a = size_vm(&a, SizingStrategy::Exact, &cat, OptimizeHeadroom::default());
        let out_b = size_vm(&b, SizingStrategy::Exact, &cat, OptimizeHeadroom::default());

        let ta = cat.get(out_a.chosen.as_deref().unwrap()).unwrap();
        let tb = cat.get(out_b.chosen.as_deref().unwrap()).unwrap();
        assert!(ta.vcpu <= tb.vcpu);
        assert!(ta.ram_gb <= tb.ram_gb);
    }

    #[test]
    fn windows_never_maps_to_non_windows_type() {
        let cat = Catalogue::seed();
        let win = vm_with(4, 8192, 20.0, true);
        let out = size_vm(&win, SizingStrategy::Cost, &cat, OptimizeHeadroom::default());
        let t = cat.get(out.chosen.as_deref().unwrap()).unwrap();
        assert!(t.windows_allowed);
    }

    #[test]
    fn optimize_falls_back_to_exact_with_warning_when_no_headroom_fits() {
        let cat = Catalogue::seed();
        // Largest type is ENT1-XL at 48 vcpu/256gb; ask for something that
        // needs 20% headroom above that.
        let huge = vm_with(48, 256 * 1024, 10.0, false);
        let out = size_vm(&huge, SizingStrategy::Optimize, &cat, OptimizeHeadroom::default());
        assert!(!out.warnings.is_empty());
        assert!(out.chosen.is_some());
    }

    #[test]
    fn cost_strategy_never_picks_an_arm64_type_for_an_x86_64_source() {
        let cat = Catalogue::seed();
        // COPARM1-S is cheaper than GP1-S at identical vcpu/ram/storage, so
        // an architecture-blind cost sort would pick it for this x86_64 VM.
        let vm = vm_with(8, 32 * 1024, 10.0, false);
        let out = size_vm(&vm, SizingStrategy::Cost, &cat, OptimizeHeadroom::default());
        let t = cat.get(out.chosen.as_deref().unwrap()).unwrap();
        assert_eq!(t.architecture, Architecture::X86_64);
    }

    #[test]
    fn unmappable_when_nothing_fits() {
        let cat = Catalogue::seed();
        let absurd = vm_with(1024, 1024 * 1024 * 1024, 1.0, false);
        let out = size_vm(&absurd, SizingStrategy::Exact, &cat, OptimizeHeadroom::default());
        assert!(out.unmappable);
        assert!(out.chosen.is_none());
    }
}
