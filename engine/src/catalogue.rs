//! C1 — Instance Catalogue: a static table of target instance types. Can be
//! reconciled against `external::CloudProviderClient::list_instance_types`
//! but ships with a sane built-in seed so planning/estimation works offline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    /// vSphere doesn't carry a separate architecture field on a VM's
    /// properties; like `OsFamily::normalize`, this reads it out of the
    /// free-form guest-id string (`"ubuntu-arm64_64Guest"`, `"other_arm64Guest"`).
    pub fn infer_from_guest_os(guest_os_full: &str) -> Self {
        let lower = guest_os_full.to_ascii_lowercase();
        if lower.contains("arm64") || lower.contains("aarch64") {
            Architecture::Arm64
        } else {
            Architecture::X86_64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceType {
    pub id: String,
    pub family: String,
    pub vcpu: u32,
    pub ram_gb: f64,
    /// 0 means block-storage-only (no local disk).
    pub local_storage_gb: f64,
    pub max_attached_volumes: u32,
    pub hourly_price: f64,
    pub monthly_price: f64,
    pub windows_allowed: bool,
    pub architecture: Architecture,
}

impl InstanceType {
    /// Whether this type supports attaching block volumes instead of, or
    /// in addition to, local storage.
    pub fn supports_block_storage(&self) -> bool {
        self.max_attached_volumes > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    types: Vec<InstanceType>,
}

impl Catalogue {
    pub fn new(types: Vec<InstanceType>) -> Self {
        Self { types }
    }

    /// The built-in seed catalogue, used when no live reconciliation against
    /// the cloud provider has happened yet.
    pub fn seed() -> Self {
        Self::new(vec![
            InstanceType {
                id: "DEV1-S".into(),
                family: "DEV".into(),
                vcpu: 2,
                ram_gb: 2.0,
                local_storage_gb: 20.0,
                max_attached_volumes: 0,
                hourly_price: 0.01,
                monthly_price: 7.0,
                windows_allowed: false,
                architecture: Architecture::X86_64,
            },
            InstanceType {
                id: "GP1-XS".into(),
                family: "GP".into(),
                vcpu: 4,
                ram_gb: 16.0,
                local_storage_gb: 0.0,
                max_attached_volumes: 8,
                hourly_price: 0.08,
                monthly_price: 58.0,
                windows_allowed: true,
                architecture: Architecture::X86_64,
            },
            InstanceType {
                id: "GP1-S".into(),
                family: "GP".into(),
                vcpu: 8,
                ram_gb: 32.0,
                local_storage_gb: 0.0,
                max_attached_volumes: 8,
                hourly_price: 0.16,
                monthly_price: 116.0,
                windows_allowed: true,
                architecture: Architecture::X86_64,
            },
            InstanceType {
                id: "GP1-M".into(),
                family: "GP".into(),
                vcpu: 16,
                ram_gb: 64.0,
                local_storage_gb: 0.0,
                max_attached_volumes: 8,
                hourly_price: 0.32,
                monthly_price: 232.0,
                windows_allowed: true,
                architecture: Architecture::X86_64,
            },
            InstanceType {
                id: "GP1-L".into(),
                family: "GP".into(),
                vcpu: 32,
                ram_gb: 128.0,
                local_storage_gb: 0.0,
                max_attached_volumes: 8,
                hourly_price: 0.64,
                monthly_price: 464.0,
                windows_allowed: true,
                architecture: Architecture::X86_64,
            },
            InstanceType {
                id: "ENT1-XL".into(),
                family: "ENT".into(),
                vcpu: 48,
                ram_gb: 256.0,
                local_storage_gb: 0.0,
                max_attached_volumes: 16,
                hourly_price: 1.20,
                monthly_price: 876.0,
                windows_allowed: true,
                architecture: Architecture::X86_64,
            },
            InstanceType {
                id: "COPARM1-S".into(),
                family: "COPARM".into(),
                vcpu: 8,
                ram_gb: 32.0,
                local_storage_gb: 0.0,
                max_attached_volumes: 8,
                hourly_price: 0.12,
                monthly_price: 88.0,
                windows_allowed: false,
                architecture: Architecture::Arm64,
            },
        ])
    }

    pub fn all(&self) -> &[InstanceType] {
        &self.types
    }

    pub fn get(&self, id: &str) -> Option<&InstanceType> {
        self.types.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replace the catalogue wholesale, e.g. after reconciling against
    /// `list_instance_types` for a zone.
    pub fn reconcile(&mut self, types: Vec<InstanceType>) {
        self.types = types;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_catalogue_has_a_windows_allowed_type() {
        let cat = Catalogue::seed();
        assert!(cat.all().iter().any(|t| t.windows_allowed));
    }

    #[test]
    fn get_is_case_sensitive_lookup_by_id() {
        let cat = Catalogue::seed();
        assert!(cat.get("GP1-S").is_some());
        assert!(cat.get("gp1-s").is_none());
    }
}
