//! Job and job-file transactions
//!
//! Every logical operation (job creation, file attachment, file
//! completion) is one transaction. Counter updates are evaluated
//! server-side (`processed_files = processed_files + 1 ... RETURNING`)
//! so concurrent completions of different files serialize correctly
//! without an application-level lock, and job status is recomputed from
//! the post-increment values observed through RETURNING.
//!
//! Terminal file transitions carry a `status NOT IN ('DONE','FAILED')`
//! guard. A redelivered task for an already-terminal file affects zero
//! rows, in which case counters and mirror are left untouched — task
//! execution is at-least-once, counter accounting is exactly-once.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ocrq_common::{time, Error, Result};

use crate::db::retry::retry_on_lock;
use crate::models::{derive_job_status, FileStatus, Job, JobAggregate, JobFile, JobStatus};

/// Outcome of attempting to claim a file for processing
#[derive(Debug)]
pub enum ClaimResult {
    /// Job or file row does not exist (deleted or never created)
    Missing,
    /// File already reached DONE or FAILED; nothing to do
    AlreadyTerminal,
    /// File moved to PROCESSING; job aggregate after the commit
    Claimed(JobAggregate),
}

/// Terminal outcome to record for a file
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Done { ocr_text: String },
    Failed { error_message: String },
}

/// Insert a freshly created job.
pub async fn insert_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    retry_on_lock("insert_job", || insert_job_once(pool, job)).await
}

async fn insert_job_once(pool: &SqlitePool, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            job_id, name, status, created_at, queued_at, started_at, finished_at,
            total_files, processed_files, failed_files
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(&job.name)
    .bind(job.status.as_str())
    .bind(time::to_rfc3339(job.created_at))
    .bind(job.queued_at.map(time::to_rfc3339))
    .bind(job.started_at.map(time::to_rfc3339))
    .bind(job.finished_at.map(time::to_rfc3339))
    .bind(job.total_files)
    .bind(job.processed_files)
    .bind(job.failed_files)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a job by id.
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

/// Load a single file by id.
pub async fn get_file(pool: &SqlitePool, file_id: Uuid) -> Result<Option<JobFile>> {
    let row = sqlx::query("SELECT * FROM job_files WHERE file_id = ?")
        .bind(file_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| file_from_row(&r)).transpose()
}

/// Load all files of a job, oldest first.
pub async fn list_files(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<JobFile>> {
    let rows = sqlx::query("SELECT * FROM job_files WHERE job_id = ? ORDER BY queued_at, file_id")
        .bind(job_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(file_from_row).collect()
}

/// Attach one uploaded file to its job: insert the QUEUED file row and
/// advance the job (`total_files + 1`, CREATED → QUEUED, `queued_at`
/// first-write) in a single transaction.
pub async fn attach_file(pool: &SqlitePool, file: &JobFile) -> Result<JobAggregate> {
    retry_on_lock("attach_file", || attach_file_once(pool, file)).await
}

async fn attach_file_once(pool: &SqlitePool, file: &JobFile) -> Result<JobAggregate> {
    let queued_at = file.queued_at.unwrap_or_else(Utc::now);
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO job_files (
            file_id, job_id, filename, object_key, status,
            queued_at, started_at, finished_at, ocr_text, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL)
        "#,
    )
    .bind(file.file_id.to_string())
    .bind(file.job_id.to_string())
    .bind(&file.filename)
    .bind(&file.object_key)
    .bind(file.status.as_str())
    .bind(time::to_rfc3339(queued_at))
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(
        r#"
        UPDATE jobs SET
            total_files = total_files + 1,
            status = CASE WHEN status = 'CREATED' THEN 'QUEUED' ELSE status END,
            queued_at = COALESCE(queued_at, ?)
        WHERE job_id = ?
        RETURNING status, total_files, processed_files, failed_files,
                  queued_at, started_at, finished_at
        "#,
    )
    .bind(time::to_rfc3339(queued_at))
    .bind(file.job_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Job not found: {}", file.job_id)))?;

    let aggregate = aggregate_from_row(file.job_id, &row)?;
    tx.commit().await?;

    Ok(aggregate)
}

/// Move a file to PROCESSING and stamp `started_at` on file and job
/// (first-write-wins). Returns `AlreadyTerminal` without mutating
/// anything when the file has already completed.
pub async fn claim_file_processing(
    pool: &SqlitePool,
    job_id: Uuid,
    file_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ClaimResult> {
    retry_on_lock("claim_file_processing", || {
        claim_file_processing_once(pool, job_id, file_id, now)
    })
    .await
}

async fn claim_file_processing_once(
    pool: &SqlitePool,
    job_id: Uuid,
    file_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ClaimResult> {
    let mut tx = pool.begin().await?;

    // Write first so the transaction never upgrades from a read lock
    let claimed = sqlx::query(
        r#"
        UPDATE job_files SET
            status = 'PROCESSING',
            started_at = COALESCE(started_at, ?)
        WHERE file_id = ? AND job_id = ? AND status NOT IN ('DONE', 'FAILED')
        "#,
    )
    .bind(time::to_rfc3339(now))
    .bind(file_id.to_string())
    .bind(job_id.to_string())
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM job_files WHERE file_id = ? AND job_id = ?")
                .bind(file_id.to_string())
                .bind(job_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        return Ok(match status {
            None => ClaimResult::Missing,
            Some(_) => ClaimResult::AlreadyTerminal,
        });
    }

    let row = sqlx::query(
        r#"
        UPDATE jobs SET
            status = 'PROCESSING',
            started_at = COALESCE(started_at, ?)
        WHERE job_id = ?
        RETURNING status, total_files, processed_files, failed_files,
                  queued_at, started_at, finished_at
        "#,
    )
    .bind(time::to_rfc3339(now))
    .bind(job_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

    let aggregate = aggregate_from_row(job_id, &row)?;
    tx.commit().await?;

    Ok(ClaimResult::Claimed(aggregate))
}

/// Record a file's terminal outcome and fold it into the job aggregate.
///
/// Returns `None` when the file was already terminal (redelivered task);
/// in that case nothing was written. Otherwise the file row, the atomic
/// counter increments, and the recomputed job status commit together and
/// the post-commit aggregate is returned for mirror propagation.
pub async fn complete_file(
    pool: &SqlitePool,
    job_id: Uuid,
    file_id: Uuid,
    outcome: &FileOutcome,
    now: DateTime<Utc>,
) -> Result<Option<JobAggregate>> {
    retry_on_lock("complete_file", || {
        complete_file_once(pool, job_id, file_id, outcome, now)
    })
    .await
}

async fn complete_file_once(
    pool: &SqlitePool,
    job_id: Uuid,
    file_id: Uuid,
    outcome: &FileOutcome,
    now: DateTime<Utc>,
) -> Result<Option<JobAggregate>> {
    let (file_status, ocr_text, error_message) = match outcome {
        FileOutcome::Done { ocr_text } => (FileStatus::Done, Some(ocr_text.as_str()), None),
        FileOutcome::Failed { error_message } => {
            (FileStatus::Failed, None, Some(error_message.as_str()))
        }
    };

    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE job_files SET
            status = ?,
            ocr_text = ?,
            error_message = ?,
            finished_at = COALESCE(finished_at, ?)
        WHERE file_id = ? AND job_id = ? AND status NOT IN ('DONE', 'FAILED')
        "#,
    )
    .bind(file_status.as_str())
    .bind(ocr_text)
    .bind(error_message)
    .bind(time::to_rfc3339(now))
    .bind(file_id.to_string())
    .bind(job_id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        // Already accounted by an earlier delivery
        return Ok(None);
    }

    let failed_increment = match outcome {
        FileOutcome::Done { .. } => 0i64,
        FileOutcome::Failed { .. } => 1i64,
    };

    let counters = sqlx::query(
        r#"
        UPDATE jobs SET
            processed_files = processed_files + 1,
            failed_files = failed_files + ?
        WHERE job_id = ?
        RETURNING total_files, processed_files, failed_files, queued_at, started_at
        "#,
    )
    .bind(failed_increment)
    .bind(job_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

    let total: i64 = counters.get("total_files");
    let processed: i64 = counters.get("processed_files");
    let failed: i64 = counters.get("failed_files");
    let started = counters.get::<Option<String>, _>("started_at").is_some();

    let status = derive_job_status(total, processed, failed, started);
    let finished_at = if status.is_terminal() {
        Some(time::to_rfc3339(now))
    } else {
        None
    };

    let row = sqlx::query(
        r#"
        UPDATE jobs SET
            status = ?,
            finished_at = COALESCE(finished_at, ?)
        WHERE job_id = ?
        RETURNING status, total_files, processed_files, failed_files,
                  queued_at, started_at, finished_at
        "#,
    )
    .bind(status.as_str())
    .bind(finished_at)
    .bind(job_id.to_string())
    .fetch_one(&mut *tx)
    .await?;

    let aggregate = aggregate_from_row(job_id, &row)?;
    tx.commit().await?;

    Ok(Some(aggregate))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(time::parse_rfc3339).transpose()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Corrupt UUID in database '{}': {}", value, e)))
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let job_id: String = row.get("job_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(Job {
        job_id: parse_uuid(&job_id)?,
        name: row.get("name"),
        status: JobStatus::parse(&status),
        created_at: time::parse_rfc3339(&created_at)?,
        queued_at: parse_opt_ts(row.get("queued_at"))?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
        total_files: row.get("total_files"),
        processed_files: row.get("processed_files"),
        failed_files: row.get("failed_files"),
    })
}

fn file_from_row(row: &SqliteRow) -> Result<JobFile> {
    let file_id: String = row.get("file_id");
    let job_id: String = row.get("job_id");
    let status: String = row.get("status");

    Ok(JobFile {
        file_id: parse_uuid(&file_id)?,
        job_id: parse_uuid(&job_id)?,
        filename: row.get("filename"),
        object_key: row.get("object_key"),
        status: FileStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Corrupt file status '{}'", status)))?,
        queued_at: parse_opt_ts(row.get("queued_at"))?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
        ocr_text: row.get("ocr_text"),
        error_message: row.get("error_message"),
    })
}

fn aggregate_from_row(job_id: Uuid, row: &SqliteRow) -> Result<JobAggregate> {
    let status: String = row.get("status");

    Ok(JobAggregate {
        job_id,
        status: JobStatus::parse(&status),
        total_files: row.get("total_files"),
        processed_files: row.get("processed_files"),
        failed_files: row.get("failed_files"),
        queued_at: parse_opt_ts(row.get("queued_at"))?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
    })
}
