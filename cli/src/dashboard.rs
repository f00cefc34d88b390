//! C11 — Dashboard/Reporter: consumes the engine's progress event channel
//! and renders a live multi-bar view with `indicatif`/`console` (pulled from
//! `risingwave`'s `risedevtool`, which drives its own dev-orchestration
//! progress display with the same pair), plus a plain-text end-of-run
//! report. The engine knows nothing about either crate — it just emits
//! [`ProgressEvent`]s and this module decides how to show them.

use std::collections::HashMap;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use migration_engine::orchestrator::BatchRunOutcome;
use migration_engine::progress::ProgressEvent;
use migration_engine::state::MigrationStatus;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

/// Spawn a task that drains `rx` and renders it to the terminal until the
/// channel closes (i.e. the batch orchestrator and every pipeline it spawned
/// have dropped their sender). Returns the `JoinHandle` so the caller can
/// await it after the run finishes, guaranteeing the last events are drawn.
pub fn spawn(mut rx: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        let multi = MultiProgress::new();
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::WaveStarted { wave, vm_count } => {
                    multi.println(format!(
                        "{} wave '{}' starting ({} VM(s))",
                        style("▶").cyan(),
                        wave,
                        vm_count
                    )).ok();
                }
                ProgressEvent::WaveFinished { wave, failed } => {
                    let icon = if failed { style("✗").red() } else { style("✓").green() };
                    multi.println(format!("{icon} wave '{wave}' finished")).ok();
                }
                ProgressEvent::StageStarted { vm_name, stage } => {
                    let bar = bars.entry(vm_name.clone()).or_insert_with(|| {
                        let bar = multi.add(ProgressBar::new_spinner());
                        bar.set_style(bar_style());
                        bar.set_prefix(vm_name.clone());
                        bar.enable_steady_tick(std::time::Duration::from_millis(100));
                        bar
                    });
                    bar.set_message(format!("running {stage}"));
                }
                ProgressEvent::StageCompleted { vm_name, stage } => {
                    if let Some(bar) = bars.get(&vm_name) {
                        bar.set_message(format!("completed {stage}"));
                    }
                }
                ProgressEvent::StageRetried { vm_name, stage, attempt, delay_ms } => {
                    if let Some(bar) = bars.get(&vm_name) {
                        bar.set_message(format!(
                            "retrying {stage} (attempt {attempt}, backing off {delay_ms}ms)"
                        ));
                    }
                }
                ProgressEvent::VmCompleted { vm_name } => {
                    if let Some(bar) = bars.remove(&vm_name) {
                        bar.finish_with_message(format!("{}", style("migration complete").green()));
                    }
                }
                ProgressEvent::VmFailed { vm_name, stage, message } => {
                    if let Some(bar) = bars.remove(&vm_name) {
                        bar.abandon_with_message(format!(
                            "{} at {stage}: {message}",
                            style("failed").red()
                        ));
                    }
                }
            }
        }
    })
}

/// The plain-text summary printed after a batch finishes — `batch report`
/// re-derives the same text from the persisted state rather than from live
/// events, so it works after the process that ran the batch has exited.
pub fn render_report(outcome: &BatchRunOutcome) -> String {
    let mut lines = Vec::new();
    lines.push(format!("batch '{}' report", outcome.batch_id));
    lines.push(String::new());
    lines.push("waves:".to_string());
    for (wave, status) in &outcome.wave_status {
        lines.push(format!("  {wave}: {status:?}"));
    }
    lines.push(String::new());
    lines.push("VMs:".to_string());

    let mut failed = 0usize;
    let mut completed = 0usize;
    for (migration_id, state) in &outcome.vm_results {
        match state.status {
            MigrationStatus::Completed => completed += 1,
            MigrationStatus::Failed => failed += 1,
            _ => {}
        }
        let detail = match (&state.status, &state.last_error) {
            (MigrationStatus::Failed, Some(err)) => {
                format!(" — failed at {} ({}): {}", err.stage, migration_id, err.message)
            }
            _ => format!(" ({migration_id})"),
        };
        lines.push(format!("  {} [{:?}]{detail}", state.vm_name, state.status));
    }

    lines.push(String::new());
    lines.push(format!(
        "{completed} completed, {failed} failed, {} total",
        outcome.vm_results.len()
    ));
    lines.join("\n")
}
