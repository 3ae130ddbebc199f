//! Worker execution
//!
//! A worker drains tasks from the queue and drives each file through
//! its state machine: claim PROCESSING, fetch the payload, invoke the
//! recognition engine, record the terminal outcome, propagate the job
//! aggregate to the mirror. Failures are classified explicitly:
//!
//! - **Permanent** (malformed identifiers, missing entities): reported
//!   without touching the stores, never retried.
//! - **Per-file** (object store miss, engine error): contained to the
//!   file — it becomes FAILED with a truncated message and the job
//!   keeps accumulating other files.
//! - **Transient** (authoritative store unreachable): surfaced to the
//!   queue so its redelivery policy applies; anything already committed
//!   stays committed.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use ocrq_common::time;

use crate::db::jobs::{self, ClaimResult, FileOutcome};
use crate::dispatch::OcrTask;
use crate::engine::{join_spans, SharedEngine};
use crate::mirror::{aggregate_update, failure_marker, propagate};
use crate::models::truncate_error;
use crate::objectstore::ObjectStore;
use crate::AppContext;

/// Why a task could not be carried to a terminal file state.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Malformed task payload; permanent, nothing was mutated
    #[error("Invalid task: {0}")]
    Validation(String),

    /// Referenced job/file no longer exists; permanent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Infrastructure failure; the queue should redeliver
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl TaskError {
    pub fn is_permanent(&self) -> bool {
        !matches!(self, TaskError::Transient(_))
    }
}

/// How a delivered task was resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// File reached DONE and was accounted
    Completed,
    /// File reached FAILED and was accounted
    Failed,
    /// File was already terminal; redelivery acknowledged without
    /// touching any counter
    AlreadyTerminal,
}

/// Execute one task to a terminal state.
pub async fn process_task(
    ctx: &AppContext,
    engine: &SharedEngine,
    task: &OcrTask,
) -> Result<TaskOutcome, TaskError> {
    // Malformed input is rejected before any store is touched
    let job_id = uuid::Uuid::parse_str(&task.job_id)
        .map_err(|_| TaskError::Validation(format!("Bad job id: {}", task.job_id)))?;
    let file_id = uuid::Uuid::parse_str(&task.file_id)
        .map_err(|_| TaskError::Validation(format!("Bad file id: {}", task.file_id)))?;

    let mirror_timeout = ctx.settings.mirror_timeout_ms;

    // Claim the file: PROCESSING + started_at stamps, one transaction
    let claim = jobs::claim_file_processing(&ctx.db, job_id, file_id, time::now())
        .await
        .map_err(|e| TaskError::Transient(e.to_string()))?;

    let aggregate = match claim {
        ClaimResult::Missing => {
            return Err(TaskError::NotFound(format!(
                "Job {} / file {} does not exist",
                job_id, file_id
            )));
        }
        ClaimResult::AlreadyTerminal => {
            tracing::debug!(
                job_id = %job_id,
                file_id = %file_id,
                attempt = task.attempt,
                "Redelivered task for terminal file, skipping"
            );
            return Ok(TaskOutcome::AlreadyTerminal);
        }
        ClaimResult::Claimed(aggregate) => aggregate,
    };

    propagate(
        ctx.mirror.as_ref(),
        &task.job_id,
        aggregate_update(&aggregate),
        mirror_timeout,
    )
    .await;

    // Payload fetch and recognition are per-file concerns: their
    // failures mark this file FAILED and leave the job running
    let payload = match ctx.objects.get(&task.object_key).await {
        Ok(payload) => payload,
        Err(e) => {
            return fail_file(ctx, job_id, file_id, &task.job_id, &e.to_string()).await;
        }
    };

    let spans = match engine.get().and_then(|eng| eng.recognize(&payload)) {
        Ok(spans) => spans,
        Err(e) => {
            return fail_file(ctx, job_id, file_id, &task.job_id, &e.to_string()).await;
        }
    };

    let ocr_text = join_spans(&spans);

    let outcome = FileOutcome::Done { ocr_text };
    match jobs::complete_file(&ctx.db, job_id, file_id, &outcome, time::now()).await {
        Ok(Some(aggregate)) => {
            propagate(
                ctx.mirror.as_ref(),
                &task.job_id,
                aggregate_update(&aggregate),
                mirror_timeout,
            )
            .await;
            tracing::info!(
                job_id = %job_id,
                file_id = %file_id,
                job_status = aggregate.status.as_str(),
                processed = aggregate.processed_files,
                total = aggregate.total_files,
                "File completed"
            );
            Ok(TaskOutcome::Completed)
        }
        Ok(None) => Ok(TaskOutcome::AlreadyTerminal),
        Err(e) => {
            // Success could not be committed; fall through to failure
            // bookkeeping so the attempt is at least accounted
            fail_file(ctx, job_id, file_id, &task.job_id, &e.to_string()).await
        }
    }
}

/// Failure bookkeeping: in a fresh transaction mark the file FAILED,
/// fold it into the job counters, and mirror the aggregate. When even
/// that transaction fails, leave a minimal FAILED marker in the mirror
/// alone and surface a transient error so the queue redelivers.
async fn fail_file(
    ctx: &AppContext,
    job_id: uuid::Uuid,
    file_id: uuid::Uuid,
    mirror_key: &str,
    reason: &str,
) -> Result<TaskOutcome, TaskError> {
    let error_message = truncate_error(reason);
    tracing::warn!(
        job_id = %job_id,
        file_id = %file_id,
        error = %error_message,
        "Marking file failed"
    );

    let outcome = FileOutcome::Failed {
        error_message: error_message.clone(),
    };

    match jobs::complete_file(&ctx.db, job_id, file_id, &outcome, time::now()).await {
        Ok(Some(aggregate)) => {
            propagate(
                ctx.mirror.as_ref(),
                mirror_key,
                aggregate_update(&aggregate),
                ctx.settings.mirror_timeout_ms,
            )
            .await;
            Ok(TaskOutcome::Failed)
        }
        Ok(None) => Ok(TaskOutcome::AlreadyTerminal),
        Err(e) => {
            propagate(
                ctx.mirror.as_ref(),
                mirror_key,
                failure_marker(&error_message),
                ctx.settings.mirror_timeout_ms,
            )
            .await;
            Err(TaskError::Transient(format!(
                "Failure bookkeeping did not commit: {}",
                e
            )))
        }
    }
}

/// Spawn the worker pool. Workers share one queue receiver and run
/// until the channel closes.
pub fn spawn_workers(
    ctx: AppContext,
    engine: SharedEngine,
    rx: mpsc::UnboundedReceiver<OcrTask>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..count)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let engine = engine.clone();
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                run_worker(worker_id, ctx, engine, rx).await;
            })
        })
        .collect()
}

async fn run_worker(
    worker_id: usize,
    ctx: AppContext,
    engine: SharedEngine,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<OcrTask>>>,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            tracing::debug!(worker_id, "Task queue closed, worker stopping");
            break;
        };

        match process_task(&ctx, &engine, &task).await {
            Ok(outcome) => {
                tracing::debug!(
                    worker_id,
                    file_id = %task.file_id,
                    outcome = ?outcome,
                    "Task resolved"
                );
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(
                    worker_id,
                    file_id = %task.file_id,
                    error = %e,
                    "Dropping task permanently"
                );
            }
            Err(e) => {
                if task.attempt < ctx.settings.max_task_attempts {
                    tracing::warn!(
                        worker_id,
                        file_id = %task.file_id,
                        attempt = task.attempt,
                        error = %e,
                        "Transient task failure, scheduling redelivery"
                    );
                    let dispatcher = Arc::clone(&ctx.dispatcher);
                    let redelivery = task.redelivery();
                    let delay = std::time::Duration::from_millis(ctx.settings.retry_delay_ms);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        dispatcher.enqueue(redelivery);
                    });
                } else {
                    tracing::error!(
                        worker_id,
                        file_id = %task.file_id,
                        attempt = task.attempt,
                        error = %e,
                        "Dropping task after max delivery attempts"
                    );
                }
            }
        }
    }
}
