//! Service operations
//!
//! The read/write surface consumed by an external HTTP layer: job
//! creation, file attachment, job listing, and job detail. Validation
//! failures and unknown identifiers are rejected synchronously without
//! mutating persisted state; everything else follows the
//! authoritative-write-then-mirror protocol.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ocrq_common::{time, Error, Result};

use crate::db::jobs;
use crate::dispatch::{OcrTask, TaskDispatcher};
use crate::mirror::{aggregate_update, propagate, FieldValue, MirrorJobRecord, MirrorStore};
use crate::models::{Job, JobFile, JobStatus};
use crate::objectstore::{object_key, ObjectStore};
use crate::AppContext;

/// Default display label for jobs created without a name
const DEFAULT_JOB_NAME: &str = "Untitled";

/// POST /jobs request
#[derive(Debug, Default, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /jobs response
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// One uploaded payload handed to attach_files
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// One attached file in the attach_files response
#[derive(Debug, Serialize)]
pub struct AttachedFile {
    pub file_id: Uuid,
    pub filename: String,
    pub object_key: String,
}

/// POST /jobs/{id}/files response
#[derive(Debug, Serialize)]
pub struct AttachFilesResponse {
    pub job_id: Uuid,
    pub files_created: Vec<AttachedFile>,
    pub count: usize,
}

/// Job aggregate view shared by listing and detail responses
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub processed_files: i64,
    pub failed_files: i64,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            name: job.name.clone(),
            status: job.status,
            created_at: Some(job.created_at),
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            total_files: job.total_files,
            processed_files: job.processed_files,
            failed_files: job.failed_files,
        }
    }
}

impl From<MirrorJobRecord> for JobSummary {
    fn from(record: MirrorJobRecord) -> Self {
        Self {
            job_id: record.job_id,
            name: record.name,
            status: record.status,
            created_at: record.created_at,
            queued_at: record.queued_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            total_files: record.total_files,
            processed_files: record.processed_files,
            failed_files: record.failed_files,
        }
    }
}

/// One file row in the job detail response
#[derive(Debug, Serialize)]
pub struct JobFileDetail {
    pub file_id: Uuid,
    pub filename: String,
    pub object_key: String,
    pub status: crate::models::FileStatus,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ocr_text: Option<String>,
    pub error_message: Option<String>,
    /// Freshly generated read-access URL for the stored payload
    pub url: String,
}

/// GET /jobs/{id} response
#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    pub job: JobSummary,
    pub files: Vec<JobFileDetail>,
}

/// Create a new job in CREATED state.
pub async fn create_job(ctx: &AppContext, request: CreateJobRequest) -> Result<CreateJobResponse> {
    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string());

    let job = Job::new(name);
    jobs::insert_job(&ctx.db, &job).await?;

    // Seed the mirror with the full CREATED projection; best-effort
    let seed = vec![
        ("job_id".to_string(), FieldValue::s(job.job_id.to_string())),
        ("name".to_string(), FieldValue::s(job.name.as_str())),
        ("status".to_string(), FieldValue::s(job.status.as_str())),
        ("created_at".to_string(), FieldValue::s(time::to_rfc3339(job.created_at))),
        ("total_files".to_string(), FieldValue::n(0)),
        ("processed_files".to_string(), FieldValue::n(0)),
        ("failed_files".to_string(), FieldValue::n(0)),
    ];
    let seeded = tokio::time::timeout(
        Duration::from_millis(ctx.settings.mirror_timeout_ms),
        ctx.mirror.put(&job.job_id.to_string(), seed),
    )
    .await;
    if !matches!(seeded, Ok(Ok(()))) {
        tracing::warn!(job_id = %job.job_id, "Mirror seed failed (non-fatal)");
    }

    tracing::info!(job_id = %job.job_id, name = %job.name, "Job created");

    Ok(CreateJobResponse {
        job_id: job.job_id,
        name: job.name,
        status: job.status,
        created_at: job.created_at,
    })
}

/// Attach uploaded files to a job and dispatch one task per file.
///
/// Empty payloads are skipped; an empty or all-empty upload set is
/// rejected without mutating anything. Each file commits its own
/// attachment transaction before its task is enqueued, so a dispatched
/// task always references durable rows.
pub async fn attach_files(
    ctx: &AppContext,
    job_id: &str,
    files: Vec<UploadFile>,
) -> Result<AttachFilesResponse> {
    if files.is_empty() {
        return Err(Error::InvalidInput("No files uploaded".to_string()));
    }

    let job_id = parse_job_id(job_id)?;

    jobs::get_job(&ctx.db, job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

    let mut created = Vec::new();

    for upload in files {
        if upload.content.is_empty() {
            tracing::warn!(
                job_id = %job_id,
                filename = %upload.filename,
                "Skipping empty upload"
            );
            continue;
        }

        let mut file = JobFile::new(job_id, upload.filename.clone(), String::new());
        file.object_key = object_key(job_id, file.file_id, &upload.filename);
        let key = file.object_key.clone();

        ctx.objects.put(&key, &upload.content).await?;

        let aggregate = jobs::attach_file(&ctx.db, &file).await?;
        propagate(
            ctx.mirror.as_ref(),
            &job_id.to_string(),
            aggregate_update(&aggregate),
            ctx.settings.mirror_timeout_ms,
        )
        .await;

        // Only after the attachment transaction is durable
        ctx.dispatcher.enqueue(OcrTask::new(
            job_id.to_string(),
            file.file_id.to_string(),
            key.clone(),
        ));

        created.push(AttachedFile {
            file_id: file.file_id,
            filename: file.filename,
            object_key: key,
        });
    }

    if created.is_empty() {
        return Err(Error::InvalidInput(
            "All uploaded files were empty".to_string(),
        ));
    }

    tracing::info!(job_id = %job_id, count = created.len(), "Files attached and dispatched");

    Ok(AttachFilesResponse {
        job_id,
        count: created.len(),
        files_created: created,
    })
}

/// List all jobs from the mirror, newest first.
pub async fn list_jobs(ctx: &AppContext) -> Result<Vec<JobSummary>> {
    let records = tokio::time::timeout(
        Duration::from_millis(ctx.settings.mirror_timeout_ms),
        ctx.mirror.scan(),
    )
    .await
    .map_err(|_| Error::Unavailable("Mirror store timed out".to_string()))??;

    let mut summaries: Vec<JobSummary> = records
        .iter()
        .map(MirrorJobRecord::from_fields)
        .map(JobSummary::from)
        .collect();

    // Newest first; records with no creation timestamp sort last
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(summaries)
}

/// Job detail with per-file rows, read from the authoritative store.
pub async fn job_detail(ctx: &AppContext, job_id: &str) -> Result<JobDetailResponse> {
    let job_id = parse_job_id(job_id)?;

    let job = jobs::get_job(&ctx.db, job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

    let files = jobs::list_files(&ctx.db, job_id)
        .await?
        .into_iter()
        .map(|f| {
            let url = ctx.objects.read_url(&f.object_key);
            JobFileDetail {
                file_id: f.file_id,
                filename: f.filename,
                object_key: f.object_key,
                status: f.status,
                queued_at: f.queued_at,
                started_at: f.started_at,
                finished_at: f.finished_at,
                ocr_text: f.ocr_text,
                error_message: f.error_message,
                url,
            }
        })
        .collect();

    Ok(JobDetailResponse {
        job: JobSummary::from(&job),
        files,
    })
}

fn parse_job_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidInput(format!("Invalid job id: {}", raw)))
}
