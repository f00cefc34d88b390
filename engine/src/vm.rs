//! The VM inventory model: an immutable snapshot of a source VM's
//! observable attributes, as handed to us by the vSphere client
//! (`external::VSphereClient`). Nothing in this module performs I/O.

use serde::{Deserialize, Serialize};

/// Power state of a source VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// Normalized guest OS family. `Other` is never auto-migratable — the
/// filter and sizing stages both treat it as a dead end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Linux,
    Windows,
    Other,
}

impl OsFamily {
    /// Collapse one of vSphere's many opaque guest-id strings
    /// (`rhel8_64Guest`, `windows9_64Guest`, `otherGuest64`, ...) into the
    /// three families the orchestrator actually branches on.
    pub fn normalize(guest_os_full: &str) -> Self {
        let lower = guest_os_full.to_ascii_lowercase();
        if lower.contains("windows") || lower.starts_with("win") {
            OsFamily::Windows
        } else if lower.contains("linux")
            || lower.contains("rhel")
            || lower.contains("centos")
            || lower.contains("ubuntu")
            || lower.contains("debian")
            || lower.contains("suse")
            || lower.contains("photon")
        {
            OsFamily::Linux
        } else {
            OsFamily::Other
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    Bios,
    Efi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskDescriptor {
    pub size_gb: f64,
    pub thin_provisioned: bool,
    pub controller_class: String,
    pub datastore_path: String,
    pub is_rdm: bool,
    pub is_shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicDescriptor {
    pub mac: String,
    pub network_name: String,
    pub adapter_type: String,
    pub connected: bool,
}

/// `(datacenter, cluster, host, folder_path)` — the topology quadruple used
/// by the folder/host/cluster/datacenter predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub datacenter: String,
    pub cluster: String,
    pub host: String,
    pub folder_path: String,
}

/// Immutable snapshot of a source VM's observable attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDescriptor {
    pub name: String,
    pub uuid: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub power_state: PowerState,
    pub guest_os_family: OsFamily,
    pub guest_os_full: String,
    pub firmware: Firmware,
    pub disks: Vec<DiskDescriptor>,
    pub nics: Vec<NicDescriptor>,
    pub tools_status: String,
    pub snapshot_names: Vec<String>,
    pub topology: Topology,
}

impl VmDescriptor {
    pub fn total_disk_gb(&self) -> f64 {
        self.disks.iter().map(|d| d.size_gb).sum()
    }

    pub fn memory_gb(&self) -> f64 {
        self.memory_mb as f64 / 1024.0
    }

    pub fn is_windows(&self) -> bool {
        self.guest_os_family == OsFamily::Windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_guest_ids() {
        assert_eq!(OsFamily::normalize("rhel8_64Guest"), OsFamily::Linux);
        assert_eq!(OsFamily::normalize("windows9Server64Guest"), OsFamily::Windows);
        assert_eq!(OsFamily::normalize("otherGuest64"), OsFamily::Other);
        assert_eq!(OsFamily::normalize("freebsd12_64Guest"), OsFamily::Other);
    }
}
