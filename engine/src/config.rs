//! A2 — ambient configuration. `AppConfig` is the handful of knobs the
//! stage handlers and estimator need that aren't part of the plan itself:
//! credentials (read by the CLI layer from environment variables and
//! handed in here, never read directly by the engine), retry/backoff
//! tuning, and the two timing knobs the design leaves as open questions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub work_dir: String,
    /// Path to a virtio-win ISO; required for Windows guests'
    /// `inject_virtio` stage. `None` triggers the estimator's
    /// `missing_virtio_iso` warning and a fatal failure at that stage.
    pub virtio_win_iso: Option<String>,
    /// Whether `ensure_uefi` on Windows may proceed without a KVM-capable
    /// boot probe host (`/dev/kvm` absent). Default false: treated as
    /// fatal, per the design's resolution of that open question.
    pub allow_missing_kvm: bool,
    pub snapshot_poll_interval: Duration,
    pub snapshot_wait_timeout: Duration,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub default_bucket: String,
    pub default_volume_type: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: "./migration-work".to_string(),
            virtio_win_iso: None,
            allow_missing_kvm: false,
            snapshot_poll_interval: Duration::from_secs(5),
            snapshot_wait_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            default_bucket: "vm-migration-staging".to_string(),
            default_volume_type: "b_ssd".to_string(),
        }
    }
}
