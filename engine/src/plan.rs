//! C4 — Plan Model & Plan Expansion: a typed, validated representation of a
//! migration plan, deserialized from YAML.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalogue::Catalogue;
use crate::error::{EngineError, Result};
use crate::sizing::SizingStrategy;
use crate::vm::VmDescriptor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PauseAfter {
    Continue,
    Pause,
    PauseOnFailure,
}

/// Either an exact VM name or a glob pattern — `migration`/`exclude`
/// entries may only specify one; having both is a validation error rather
/// than an implicit precedence rule.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Selector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_pattern: Option<String>,
}

impl Selector {
    fn validate(&self, context: &str) -> Result<()> {
        match (&self.vm_name, &self.vm_pattern) {
            (Some(_), Some(_)) => Err(EngineError::validation(format!(
                "{context}: entry lists both vm_name and vm_pattern"
            ))),
            (None, None) => Err(EngineError::validation(format!(
                "{context}: entry lists neither vm_name nor vm_pattern"
            ))),
            _ => Ok(()),
        }
    }

    fn matches(&self, vm: &VmDescriptor) -> bool {
        match (&self.vm_name, &self.vm_pattern) {
            (Some(name), _) => vm.name == *name,
            (_, Some(pattern)) => crate::filter::glob_match(pattern, &vm.name),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    pub zone: Option<String>,
    pub sizing_strategy: Option<SizingStrategy>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyCaps {
    #[serde(default = "default_per_esxi_host")]
    pub per_esxi_host: u32,
    #[serde(default = "default_disk_io")]
    pub disk_io: u32,
    #[serde(default = "default_s3_upload")]
    pub s3_upload: u32,
    #[serde(default = "default_scw_api")]
    pub scw_api: u32,
    #[serde(default = "default_global")]
    pub global: u32,
}

impl Default for ConcurrencyCaps {
    fn default() -> Self {
        Self {
            per_esxi_host: default_per_esxi_host(),
            disk_io: default_disk_io(),
            s3_upload: default_s3_upload(),
            scw_api: default_scw_api(),
            global: default_global(),
        }
    }
}

fn default_per_esxi_host() -> u32 {
    4
}
fn default_disk_io() -> u32 {
    3
}
fn default_s3_upload() -> u32 {
    6
}
fn default_scw_api() -> u32 {
    5
}
fn default_global() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEntry {
    #[serde(flatten)]
    pub selector: Selector,
    pub target: String,
    pub zone: Option<String>,
    pub sizing_strategy: Option<SizingStrategy>,
    #[serde(default)]
    pub priority: i32,
    pub wave: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wave {
    pub name: String,
    #[serde(default)]
    pub selector: Vec<Selector>,
    pub pause_after: PauseAfter,
}

impl Wave {
    /// An empty selector list imposes no extra restriction beyond an
    /// entry's own `wave` name; a non-empty one narrows membership to VMs
    /// matched by at least one of the wave's own selectors.
    pub fn matches(&self, vm: &VmDescriptor) -> bool {
        self.selector.is_empty() || self.selector.iter().any(|s| s.matches(vm))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    pub version: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub concurrency: ConcurrencyCaps,
    #[serde(default)]
    pub migrations: Vec<MigrationEntry>,
    #[serde(default)]
    pub exclude: Vec<Selector>,
    #[serde(default)]
    pub waves: Vec<Wave>,
    #[serde(default)]
    pub post_migration: Vec<String>,
}

impl Plan {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let plan: Plan = serde_yaml::from_str(yaml)?;
        Ok(plan)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the plan's invariants: every referenced wave
    /// exists, non-empty wave selectors are disjoint after exclusions, no
    /// entry's `vm_name` is also excluded, target type ids exist in the
    /// catalogue, Windows VMs can only target Windows-allowed types (checked
    /// at expansion time, once inventory is known).
    pub fn validate(&self, catalogue: &Catalogue, inventory: &[VmDescriptor]) -> Result<()> {
        if self.version != 1 {
            return Err(EngineError::validation(format!(
                "unsupported plan version {}",
                self.version
            )));
        }

        let wave_names: HashSet<&str> = self.waves.iter().map(|w| w.name.as_str()).collect();

        for (i, entry) in self.migrations.iter().enumerate() {
            entry
                .selector
                .validate(&format!("migrations[{i}]"))?;
            if !wave_names.contains(entry.wave.as_str()) {
                return Err(EngineError::UnknownWave(entry.wave.clone()));
            }
            if !catalogue.contains(&entry.target) {
                return Err(EngineError::UnknownInstanceType(entry.target.clone()));
            }
        }

        for (i, sel) in self.exclude.iter().enumerate() {
            sel.validate(&format!("exclude[{i}]"))?;
        }

        if let Some(name) = self.migrations.iter().find_map(|e| {
            e.selector.vm_name.as_ref().filter(|name| {
                self.exclude
                    .iter()
                    .any(|ex| ex.vm_name.as_deref() == Some(name.as_str()))
            })
        }) {
            return Err(EngineError::validation(format!(
                "'{name}' is both a migration target and excluded"
            )));
        }

        let remaining: Vec<&VmDescriptor> = inventory
            .iter()
            .filter(|vm| !self.exclude.iter().any(|sel| sel.matches(vm)))
            .collect();
        let mut claimed: HashMap<&str, &str> = HashMap::new();
        for wave in &self.waves {
            if wave.selector.is_empty() {
                continue;
            }
            for vm in &remaining {
                if !wave.matches(vm) {
                    continue;
                }
                if let Some(other) = claimed.insert(vm.uuid.as_str(), wave.name.as_str()) {
                    if other != wave.name {
                        return Err(EngineError::validation(format!(
                            "wave selectors for '{other}' and '{}' both match vm '{}'",
                            wave.name, vm.name
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// A fully expanded, concrete migration entry after pattern expansion and
/// defaults merge: exactly one VM, one resolved target type, one resolved
/// sizing strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedEntry {
    pub vm_name: String,
    pub vm_uuid: String,
    pub target: String,
    pub zone: String,
    pub sizing_strategy: SizingStrategy,
    pub priority: i32,
    pub wave: String,
    pub tags: HashMap<String, String>,
    pub overrides: HashMap<String, String>,
    /// Position in `plan.migrations` the entry that produced this row came
    /// from, used as the final tie-break in dedup.
    pub plan_order: usize,
}

/// Expand `vm_pattern` entries against `inventory`, merge defaults
/// last-wins, and resolve duplicate VM selections (same `vm_uuid` hit by
/// multiple entries) by highest priority (lower integer wins), tie-broken
/// by plan order. Exclusions are applied last. Pattern expansion is frozen
/// into the result — nothing here re-queries the inventory at run time.
pub fn expand(plan: &Plan, inventory: &[VmDescriptor]) -> Vec<ExpandedEntry> {
    let excluded: HashSet<&str> = inventory
        .iter()
        .filter(|vm| plan.exclude.iter().any(|sel| sel.matches(vm)))
        .map(|vm| vm.uuid.as_str())
        .collect();

    let mut by_uuid: HashMap<String, ExpandedEntry> = HashMap::new();

    for (order, entry) in plan.migrations.iter().enumerate() {
        for vm in inventory.iter().filter(|vm| entry.selector.matches(vm)) {
            if excluded.contains(vm.uuid.as_str()) {
                continue;
            }

            let mut tags = plan.defaults.tags.clone();
            tags.extend(entry.tags.clone());

            let candidate = ExpandedEntry {
                vm_name: vm.name.clone(),
                vm_uuid: vm.uuid.clone(),
                target: entry.target.clone(),
                zone: entry
                    .zone
                    .clone()
                    .or_else(|| plan.defaults.zone.clone())
                    .unwrap_or_default(),
                sizing_strategy: entry
                    .sizing_strategy
                    .or(plan.defaults.sizing_strategy)
                    .unwrap_or(SizingStrategy::Exact),
                priority: entry.priority,
                wave: entry.wave.clone(),
                tags,
                overrides: entry.overrides.clone(),
                plan_order: order,
            };

            by_uuid
                .entry(vm.uuid.clone())
                .and_modify(|existing| {
                    if (candidate.priority, candidate.plan_order)
                        < (existing.priority, existing.plan_order)
                    {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }
    }

    let mut result: Vec<ExpandedEntry> = by_uuid.into_values().collect();
    result.sort_by_key(|e| (e.priority, e.plan_order));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Firmware, OsFamily, PowerState, Topology};

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
            disks: vec![],
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

    fn base_plan() -> Plan {
        Plan {
            version: 1,
            waves: vec![Wave {
                name: "w1".into(),
                selector: vec![],
                pause_after: PauseAfter::Continue,
            }],
            migrations: vec![MigrationEntry {
                selector: Selector {
                    vm_pattern: Some("prod-*".into()),
                    vm_name: None,
                },
                target: "GP1-S".into(),
                zone: None,
                sizing_strategy: None,
                priority: 10,
                wave: "w1".into(),
                tags: HashMap::new(),
                overrides: HashMap::new(),
            }],
            exclude: vec![Selector {
                vm_name: Some("prod-legacy".into()),
                vm_pattern: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn exclusion_overrides_pattern_match() {
        let plan = base_plan();
        let inventory = vec![
            vm("prod-a", "u-a"),
            vm("prod-b", "u-b"),
            vm("prod-legacy", "u-legacy"),
        ];
        let expanded = expand(&plan, &inventory);
        let names: HashSet<&str> = expanded.iter().map(|e| e.vm_name.as_str()).collect();
        assert_eq!(names, HashSet::from(["prod-a", "prod-b"]));
    }

    #[test]
    fn duplicate_selection_resolved_by_priority_then_order() {
        let mut plan = base_plan();
        plan.migrations.push(MigrationEntry {
            selector: Selector {
                vm_name: Some("prod-a".into()),
                vm_pattern: None,
            },
            target: "GP1-M".into(),
            zone: None,
            sizing_strategy: None,
            priority: 1,
            wave: "w1".into(),
            tags: HashMap::new(),
            overrides: HashMap::new(),
        });
        let inventory = vec![vm("prod-a", "u-a")];
        let expanded = expand(&plan, &inventory);
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].target, "GP1-M");
    }

    #[test]
    fn validate_rejects_unknown_wave() {
        let cat = Catalogue::seed();
        let mut plan = base_plan();
        plan.migrations[0].wave = "does-not-exist".into();
        assert!(plan.validate(&cat, &[]).is_err());
    }

    #[test]
    fn validate_rejects_both_name_and_pattern() {
        let cat = Catalogue::seed();
        let mut plan = base_plan();
        plan.migrations[0].selector.vm_name = Some("x".into());
        assert!(plan.validate(&cat, &[]).is_err());
    }

    #[test]
    fn validate_rejects_overlapping_non_empty_wave_selectors() {
        let cat = Catalogue::seed();
        let mut plan = base_plan();
        plan.waves.push(Wave {
            name: "w2".into(),
            selector: vec![],
            pause_after: PauseAfter::Continue,
        });
        plan.waves[0].selector = vec![Selector { vm_name: Some("prod-a".into()), vm_pattern: None }];
        plan.waves[1].selector = vec![Selector { vm_name: Some("prod-a".into()), vm_pattern: None }];
        let inventory = vec![vm("prod-a", "u-a")];
        assert!(plan.validate(&cat, &inventory).is_err());
    }

    #[test]
    fn validate_allows_disjoint_non_empty_wave_selectors() {
        let cat = Catalogue::seed();
        let mut plan = base_plan();
        plan.waves[0].selector = vec![Selector { vm_name: Some("prod-a".into()), vm_pattern: None }];
        let inventory = vec![vm("prod-a", "u-a")];
        assert!(plan.validate(&cat, &inventory).is_ok());
    }

    #[test]
    fn yaml_round_trip() {
        let plan = base_plan();
        let yaml = plan.to_yaml().unwrap();
        let back = Plan::from_yaml(&yaml).unwrap();
        assert_eq!(back.migrations.len(), plan.migrations.len());
        assert_eq!(back.waves[0].name, plan.waves[0].name);
    }
}
