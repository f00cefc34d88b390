//! C7 — Pipeline Executor: drives one VM through its stage graph.
//! Each stage acquires its declared semaphores, runs, and is checkpointed to
//! the state store before the next one starts — a stage is never invoked
//! twice for the same completed-stage entry, and a crash between two stages
//! loses at most the in-flight one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::config::RetryPolicy;
use crate::error::{EngineError, Result};
use crate::external::StageContext;
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::semaphore::{ResourceClass, SemaphoreRegistry};
use crate::stages::{Registry, StageSpec};
use crate::state::{LastError, MigrationState, MigrationStatus, StateStore};
use crate::vm::OsFamily;

#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<Registry>,
    semaphores: Arc<SemaphoreRegistry>,
    state_store: Arc<StateStore>,
    retry_policy: RetryPolicy,
    progress: ProgressSender,
}

impl Pipeline {
    pub fn new(
        registry: Arc<Registry>,
        semaphores: Arc<SemaphoreRegistry>,
        state_store: Arc<StateStore>,
        retry_policy: RetryPolicy,
        progress: ProgressSender,
    ) -> Self {
        Self {
            registry,
            semaphores,
            state_store,
            retry_policy,
            progress,
        }
    }

    /// Run every stage the VM hasn't already completed, in graph order.
    /// `cancel` is polled before each stage so a batch-wide abort (e.g. a
    /// `pause` wave policy) takes effect between stages rather than mid-run.
    pub async fn run_vm(
        &self,
        batch_id: &str,
        os: OsFamily,
        mut state: MigrationState,
        ctx: StageContext,
        cancel: Arc<AtomicBool>,
    ) -> Result<MigrationState> {
        let stage_order = self.registry.stage_order(os).ok_or_else(|| {
            EngineError::validation(format!(
                "no stage graph for guest OS family of '{}'",
                ctx.plan_entry.vm_name
            ))
        })?;

        // Held for the lifetime of this VM's pipeline, not per-stage: caps
        // how many VM pipelines run concurrently across the whole batch.
        let _global_permit = if ctx.simulate {
            None
        } else {
            Some(self.semaphores.acquire_many(&[ResourceClass::Global]).await)
        };

        for stage_name in stage_order {
            if state.completed_stages.iter().any(|s| s == stage_name) {
                continue;
            }
            if cancel.load(Ordering::SeqCst) {
                state.status = MigrationStatus::Failed;
                state.last_error = Some(LastError {
                    stage: (*stage_name).to_string(),
                    message: "cancelled before stage started".to_string(),
                    at: Utc::now(),
                });
                self.checkpoint(batch_id, &state).await?;
                return Ok(state);
            }

            let spec = self
                .registry
                .spec(os, stage_name)
                .expect("stage_order and specs stay in sync");

            state.status = MigrationStatus::Running;
            state.current_stage = Some((*stage_name).to_string());
            self.checkpoint(batch_id, &state).await?;
            emit(&self.progress, ProgressEvent::StageStarted {
                vm_name: ctx.plan_entry.vm_name.clone(),
                stage: (*stage_name).to_string(),
            });

            let _permits = if ctx.simulate {
                None
            } else {
                let classes = (spec.semaphores)(&ctx);
                Some(self.semaphores.acquire_many(&classes).await)
            };

            match self.invoke_with_retry(spec, &ctx, &mut state).await {
                Ok(()) => {
                    state.completed_stages.push((*stage_name).to_string());
                    state.current_stage = None;
                    state.last_error = None;
                    self.checkpoint(batch_id, &state).await?;
                    emit(&self.progress, ProgressEvent::StageCompleted {
                        vm_name: ctx.plan_entry.vm_name.clone(),
                        stage: (*stage_name).to_string(),
                    });
                }
                Err(stage_err) => {
                    state.status = MigrationStatus::Failed;
                    state.finished_at = Some(Utc::now());
                    state.last_error = Some(LastError {
                        stage: (*stage_name).to_string(),
                        message: stage_err.message.clone(),
                        at: Utc::now(),
                    });
                    self.checkpoint(batch_id, &state).await?;
                    emit(&self.progress, ProgressEvent::VmFailed {
                        vm_name: ctx.plan_entry.vm_name.clone(),
                        stage: (*stage_name).to_string(),
                        message: stage_err.message.clone(),
                    });
                    return Ok(state);
                }
            }
        }

        state.status = MigrationStatus::Completed;
        state.current_stage = None;
        state.finished_at = Some(Utc::now());
        self.checkpoint(batch_id, &state).await?;
        emit(&self.progress, ProgressEvent::VmCompleted {
            vm_name: ctx.plan_entry.vm_name.clone(),
        });
        Ok(state)
    }

    async fn invoke_with_retry(
        &self,
        spec: &StageSpec,
        ctx: &StageContext,
        state: &mut MigrationState,
    ) -> std::result::Result<(), crate::error::StageError> {
        if !spec.retryable || ctx.simulate {
            return spec.handler.run(ctx, state).await;
        }

        let mut backoff = ExponentialBackoff::from_millis(self.retry_policy.base.as_millis() as u64)
            .max_delay(self.retry_policy.cap)
            .map(jitter);

        let mut attempt: u32 = 1;
        loop {
            match spec.handler.run(ctx, state).await {
                Ok(()) => return Ok(()),
                Err(e) if e.retryable && attempt < self.retry_policy.max_attempts => {
                    let delay = backoff.next().unwrap_or(self.retry_policy.cap);
                    tracing::warn!(
                        stage = spec.name,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "stage failed, retrying after backoff"
                    );
                    emit(&self.progress, ProgressEvent::StageRetried {
                        vm_name: ctx.plan_entry.vm_name.clone(),
                        stage: spec.name.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    state.attempts += 1;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn checkpoint(&self, batch_id: &str, state: &MigrationState) -> Result<()> {
        let snapshot = state.clone();
        self.state_store
            .update_vm(batch_id, &state.migration_id, Box::new(move |s| *s = snapshot))
            .await
    }
}
