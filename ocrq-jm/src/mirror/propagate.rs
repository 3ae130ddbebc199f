//! Mirror propagation
//!
//! Translates a committed job aggregate into a conditional mirror
//! update and applies it best-effort under a bounded timeout. Snapshot
//! fields (status, counters, finished_at) overwrite unconditionally —
//! they are always derived fresh from committed authoritative state and
//! never incremented in the mirror, which makes reapplying the same
//! update a no-op. First-occurrence timestamps (queued_at, started_at)
//! use set-if-absent, matching the authoritative store's own set-once
//! rule.

use std::time::Duration;

use ocrq_common::time;

use crate::mirror::{FieldValue, MirrorStore, MirrorUpdate};
use crate::models::{JobAggregate, JobStatus};

/// Build the mirror update for a committed job aggregate.
pub fn aggregate_update(aggregate: &JobAggregate) -> MirrorUpdate {
    let mut update = MirrorUpdate::new()
        .set("status", FieldValue::s(aggregate.status.as_str()))
        .set("total_files", FieldValue::n(aggregate.total_files))
        .set("processed_files", FieldValue::n(aggregate.processed_files))
        .set("failed_files", FieldValue::n(aggregate.failed_files))
        .set("updated_at", FieldValue::s(time::to_rfc3339(time::now())));

    // Absent values are omitted, never written as explicit nulls
    if let Some(finished_at) = aggregate.finished_at {
        update = update.set("finished_at", FieldValue::s(time::to_rfc3339(finished_at)));
    }
    if let Some(queued_at) = aggregate.queued_at {
        update = update.set_if_absent("queued_at", FieldValue::s(time::to_rfc3339(queued_at)));
    }
    if let Some(started_at) = aggregate.started_at {
        update = update.set_if_absent("started_at", FieldValue::s(time::to_rfc3339(started_at)));
    }

    update
}

/// Minimal job-level failure marker, written to the mirror alone when
/// even the failure-bookkeeping transaction cannot reach the
/// authoritative store.
pub fn failure_marker(error_message: &str) -> MirrorUpdate {
    MirrorUpdate::new()
        .set("status", FieldValue::s(JobStatus::Failed.as_str()))
        .set("error", FieldValue::s(error_message))
        .set("updated_at", FieldValue::s(time::to_rfc3339(time::now())))
}

/// Apply a mirror update best-effort.
///
/// The authoritative write is already durable by the time this runs, so
/// a mirror failure (or timeout) is logged and swallowed; readers see a
/// lagging summary until a later propagation catches the record up.
/// Returns whether the update was applied.
pub async fn propagate(
    mirror: &dyn MirrorStore,
    job_id: &str,
    update: MirrorUpdate,
    timeout_ms: u64,
) -> bool {
    if update.is_empty() {
        return true;
    }

    let result = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        mirror.update(job_id, update),
    )
    .await;

    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(
                job_id = %job_id,
                error = %e,
                "Mirror update failed (non-fatal, summary reads will lag)"
            );
            false
        }
        Err(_) => {
            tracing::warn!(
                job_id = %job_id,
                timeout_ms,
                "Mirror update timed out (non-fatal, summary reads will lag)"
            );
            false
        }
    }
}
