//! C2 — Filter Engine: predicate-based filtering over the VM inventory.
//! Pure, no I/O. Predicates compose with implicit AND; for each rejected VM
//! the engine reports the first predicate that failed.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::vm::{Firmware, OsFamily, PowerState, VmDescriptor};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    NameGlob(String),
    NameRegex(String),
    FolderPrefix(String),
    OsFamily(OsFamily),
    HostGlob(String),
    ClusterGlob(String),
    Datacenter(String),
    PowerState(PowerState),
    Firmware(Firmware),
    MinCpu(u32),
    MaxCpu(u32),
    MinRamGb(f64),
    MaxDiskTotalGb(f64),
}

impl Predicate {
    fn label(&self) -> String {
        match self {
            Predicate::NameGlob(p) => format!("name_glob({p})"),
            Predicate::NameRegex(p) => format!("name_regex({p})"),
            Predicate::FolderPrefix(p) => format!("folder_prefix({p})"),
            Predicate::OsFamily(f) => format!("os_family({f:?})"),
            Predicate::HostGlob(p) => format!("host_glob({p})"),
            Predicate::ClusterGlob(p) => format!("cluster_glob({p})"),
            Predicate::Datacenter(d) => format!("datacenter({d})"),
            Predicate::PowerState(p) => format!("power_state({p:?})"),
            Predicate::Firmware(f) => format!("firmware({f:?})"),
            Predicate::MinCpu(n) => format!("min_cpu({n})"),
            Predicate::MaxCpu(n) => format!("max_cpu({n})"),
            Predicate::MinRamGb(n) => format!("min_ram_gb({n})"),
            Predicate::MaxDiskTotalGb(n) => format!("max_disk_total_gb({n})"),
        }
    }

    fn matches(&self, vm: &VmDescriptor) -> bool {
        match self {
            Predicate::NameGlob(pattern) => glob_match(pattern, &vm.name),
            Predicate::NameRegex(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(&vm.name))
                .unwrap_or(false),
            Predicate::FolderPrefix(prefix) => folder_is_prefixed(&vm.topology.folder_path, prefix),
            Predicate::OsFamily(family) => vm.guest_os_family == *family,
            Predicate::HostGlob(pattern) => glob_match(pattern, &vm.topology.host),
            Predicate::ClusterGlob(pattern) => glob_match(pattern, &vm.topology.cluster),
            Predicate::Datacenter(dc) => vm.topology.datacenter == *dc,
            Predicate::PowerState(state) => vm.power_state == *state,
            Predicate::Firmware(fw) => vm.firmware == *fw,
            Predicate::MinCpu(n) => vm.cpu_count >= *n,
            Predicate::MaxCpu(n) => vm.cpu_count <= *n,
            Predicate::MinRamGb(n) => vm.memory_gb() >= *n,
            Predicate::MaxDiskTotalGb(n) => vm.total_disk_gb() <= *n,
        }
    }
}

/// `path` matches `prefix` if it equals it, or is a slash-separated child
/// of it.
fn folder_is_prefixed(path: &str, prefix: &str) -> bool {
    let path = path.trim_end_matches('/');
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

/// Shell-style glob (`*`, `?`, `[set]`) anchored to the whole string.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_rec(&p, &t)
}

fn glob_match_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            glob_match_rec(&p[1..], t) || (!t.is_empty() && glob_match_rec(p, &t[1..]))
        }
        Some('?') => !t.is_empty() && glob_match_rec(&p[1..], &t[1..]),
        Some('[') => {
            let close = p.iter().position(|&c| c == ']').unwrap_or(p.len());
            if close == p.len() || t.is_empty() {
                return false;
            }
            let set = &p[1..close];
            let negate = set.first() == Some(&'!');
            let set = if negate { &set[1..] } else { set };
            let hit = char_in_set(set, t[0]);
            (hit != negate) && glob_match_rec(&p[close + 1..], &t[1..])
        }
        Some(c) => !t.is_empty() && t[0] == *c && glob_match_rec(&p[1..], &t[1..]),
    }
}

fn char_in_set(set: &[char], c: char) -> bool {
    let mut i = 0;
    while i < set.len() {
        if i + 2 < set.len() && set[i + 1] == '-' {
            if c >= set[i] && c <= set[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if set[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

/// A VM that failed at least one predicate, plus which one rejected it first
/// (for debuggability, per the design's filter-engine requirement).
#[derive(Debug, Clone)]
pub struct Rejection {
    pub vm_name: String,
    pub failed_predicate: String,
}

#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    pub matched: Vec<VmDescriptor>,
    pub rejected: Vec<Rejection>,
}

/// Evaluate `predicates` (implicit AND) against every VM in `inventory`.
/// Pure, deterministic: identical inputs always produce identical ordered
/// output.
pub fn filter(inventory: &[VmDescriptor], predicates: &[Predicate]) -> FilterReport {
    let mut report = FilterReport::default();
    for vm in inventory {
        match predicates.iter().find(|pred| !pred.matches(vm)) {
            Some(failed) => report.rejected.push(Rejection {
                vm_name: vm.name.clone(),
                failed_predicate: failed.label(),
            }),
            None => report.matched.push(vm.clone()),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Topology;

    fn vm(name: &str, cpu: u32, ram_mb: u64) -> VmDescriptor {
        VmDescriptor {
            name: name.to_string(),
            uuid: format!("uuid-{name}"),
            cpu_count: cpu,
            memory_mb: ram_mb,
            power_state: PowerState::PoweredOn,
            guest_os_family: OsFamily::Linux,
            guest_os_full: "rhel8_64Guest".to_string(),
            firmware: Firmware::Bios,
            disks: vec![],
            nics: vec![],
            tools_status: "toolsOk".to_string(),
            snapshot_names: vec![],
            topology: Topology {
                datacenter: "dc1".to_string(),
                cluster: "cl1".to_string(),
                host: "esxi-01".to_string(),
                folder_path: "prod/web".to_string(),
            },
        }
    }

    #[test]
    fn glob_is_anchored() {
        assert!(glob_match("web-*", "web-01"));
        assert!(!glob_match("web-*", "xweb-01"));
        assert!(glob_match("web-0?", "web-01"));
        assert!(glob_match("web-[0-9]1", "web-01"));
    }

    #[test]
    fn folder_prefix_matches_self_and_children() {
        assert!(folder_is_prefixed("prod/web", "prod"));
        assert!(folder_is_prefixed("prod", "prod"));
        assert!(!folder_is_prefixed("production", "prod"));
    }

    #[test]
    fn filter_is_deterministic_and_reports_first_failure() {
        let inv = vec![vm("web-01", 2, 2048), vm("db-01", 16, 65536)];
        let preds = vec![Predicate::NameGlob("web-*".into()), Predicate::MaxCpu(4)];
        let r1 = filter(&inv, &preds);
        let r2 = filter(&inv, &preds);
        assert_eq!(r1.matched.iter().map(|v| &v.name).collect::<Vec<_>>(),
                   r2.matched.iter().map(|v| &v.name).collect::<Vec<_>>());
        assert_eq!(r1.matched.len(), 1);
        assert_eq!(r1.matched[0].name, "web-01");
        assert_eq!(r1.rejected.len(), 1);
        assert_eq!(r1.rejected[0].failed_predicate, "name_glob(web-*)");
    }
}
