//! A3 — logging setup and the per-VM log file writer, following the
//! teacher's `tracing`/`tracing-subscriber` pairing.

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Redact anything that looks like a credential before it lands in a log
/// file. Conservative: only known secret values are replaced (the crate
/// never scrubs by pattern, so it can't accidentally hide a VM name that
/// happens to contain "password").
pub fn scrub(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(*secret, "***");
    }
    out
}

/// `{work_dir}/work/{migration_id}/stage-{n}-{name}.log`.
pub fn stage_log_path(work_dir: &Path, migration_id: &str, stage_index: usize, stage_name: &str) -> PathBuf {
    Path::new(work_dir)
        .join("work")
        .join(migration_id)
        .join(format!("stage-{stage_index}-{stage_name}.log"))
}

pub async fn write_stage_log(path: &Path, secrets: &[&str], contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, scrub(contents, secrets)).await
}
