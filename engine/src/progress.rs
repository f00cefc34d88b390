//! Progress events the pipeline and orchestrator emit as a batch runs. The
//! engine only produces these; rendering them (a progress bar, a log line,
//! a JSON stream) is an outer-layer concern, kept out of this crate so the
//! core stays free of any particular presentation stack.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    WaveStarted { wave: String, vm_count: usize },
    WaveFinished { wave: String, failed: bool },
    StageStarted { vm_name: String, stage: String },
    StageCompleted { vm_name: String, stage: String },
    StageRetried { vm_name: String, stage: String, attempt: u32, delay_ms: u64 },
    VmCompleted { vm_name: String },
    VmFailed { vm_name: String, stage: String, message: String },
}

pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<ProgressEvent>;

/// Send and forget: nobody is required to be listening. A dropped receiver
/// (no dashboard attached, or a `batch run --quiet`) just means events pile
/// up as no-op sends.
pub fn emit(sender: &ProgressSender, event: ProgressEvent) {
    let _ = sender.send(event);
}
