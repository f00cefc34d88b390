//! A2 — CLI-side configuration: a TOML file plus environment overrides,
//! producing the engine's [`AppConfig`] and the credential bundle the local
//! clients need. The engine never reads the environment itself — wiring
//! credentials in from outside is this crate's job.

use std::path::Path;
use std::time::Duration;

use migration_engine::config::{AppConfig, RetryPolicy};
use serde::Deserialize;

/// On-disk shape of the config file; every field has a sensible default so
/// an empty or missing file still produces a usable config.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub work_dir: String,
    pub virtio_win_iso: Option<String>,
    pub allow_missing_kvm: bool,
    pub snapshot_poll_interval_secs: Option<u64>,
    pub snapshot_wait_timeout_secs: Option<u64>,
    pub retry_base_secs: Option<u64>,
    pub retry_cap_secs: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub default_bucket: Option<String>,
    pub default_volume_type: Option<String>,
}

/// Secrets pulled from the environment, never from the config file.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub vcenter_password: Option<String>,
    pub scw_access_key: Option<String>,
    pub scw_secret_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            vcenter_password: std::env::var("VCENTER_PASSWORD").ok(),
            scw_access_key: std::env::var("SCW_ACCESS_KEY").ok(),
            scw_secret_key: std::env::var("SCW_SECRET_KEY").ok(),
        }
    }
}

/// Load a config file if `path` is given and exists, apply the
/// `VIRTIO_WIN_ISO` environment override, and produce an [`AppConfig`].
/// `virtio_win_iso` from the environment always wins over the file, matching
/// the rest of this crate's env-overrides-file convention.
pub fn load_app_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let file: FileConfig = match path {
        Some(p) if p.exists() => {
            let text = std::fs::read_to_string(p)?;
            toml::from_str(&text)?
        }
        _ => FileConfig::default(),
    };

    let mut config = AppConfig::default();
    if !file.work_dir.is_empty() {
        config.work_dir = file.work_dir;
    }
    config.virtio_win_iso = std::env::var("VIRTIO_WIN_ISO").ok().or(file.virtio_win_iso);
    config.allow_missing_kvm = file.allow_missing_kvm;
    if let Some(secs) = file.snapshot_poll_interval_secs {
        config.snapshot_poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = file.snapshot_wait_timeout_secs {
        config.snapshot_wait_timeout = Duration::from_secs(secs);
    }
    config.retry = RetryPolicy {
        base: Duration::from_secs(file.retry_base_secs.unwrap_or(config.retry.base.as_secs())),
        cap: Duration::from_secs(file.retry_cap_secs.unwrap_or(config.retry.cap.as_secs())),
        max_attempts: file.retry_max_attempts.unwrap_or(config.retry.max_attempts),
    };
    if let Some(bucket) = file.default_bucket {
        config.default_bucket = bucket;
    }
    if let Some(volume_type) = file.default_volume_type {
        config.default_volume_type = volume_type;
    }

    Ok(config)
}
