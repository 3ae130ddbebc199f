//! Job/file state machine
//!
//! A job progresses CREATED → QUEUED → PROCESSING → {DONE, PARTIAL, FAILED};
//! each of its files progresses QUEUED → PROCESSING → {DONE, FAILED}.
//! Job status is never stored ahead of its counters: it is recomputed from
//! `(total_files, processed_files, failed_files)` after every file
//! completion, so recomputing twice from the same counters yields the same
//! status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on persisted error text; the mirror store rejects
/// larger string attributes.
pub const MAX_ERROR_MESSAGE_LEN: usize = 900;

/// Job-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// No files attached yet
    Created,
    /// At least one file attached, none started
    Queued,
    /// At least one file started, not all terminal
    Processing,
    /// All files terminal, none failed
    Done,
    /// All files terminal, at least one failed and at least one done
    Partial,
    /// Job-level catastrophic failure (distinct from per-file failures)
    Failed,
    /// Read-side default for a mirror record with no status field
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Partial => "PARTIAL",
            JobStatus::Failed => "FAILED",
            JobStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse a stored status; anything unrecognized reads as Unknown.
    pub fn parse(s: &str) -> Self {
        match s {
            "CREATED" => JobStatus::Created,
            "QUEUED" => JobStatus::Queued,
            "PROCESSING" => JobStatus::Processing,
            "DONE" => JobStatus::Done,
            "PARTIAL" => JobStatus::Partial,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Partial | JobStatus::Failed)
    }
}

/// Per-file status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Queued => "QUEUED",
            FileStatus::Processing => "PROCESSING",
            FileStatus::Done => "DONE",
            FileStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(FileStatus::Queued),
            "PROCESSING" => Some(FileStatus::Processing),
            "DONE" => Some(FileStatus::Done),
            "FAILED" => Some(FileStatus::Failed),
            _ => None,
        }
    }

    /// No transition leaves DONE or FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Done | FileStatus::Failed)
    }
}

/// A batch job owning one or more files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub processed_files: i64,
    pub failed_files: i64,
}

impl Job {
    pub fn new(name: String) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            name,
            status: JobStatus::Created,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            finished_at: None,
            total_files: 0,
            processed_files: 0,
            failed_files: 0,
        }
    }
}

/// One uploaded payload within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub file_id: Uuid,
    pub job_id: Uuid,
    pub filename: String,
    pub object_key: String,
    pub status: FileStatus,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ocr_text: Option<String>,
    pub error_message: Option<String>,
}

impl JobFile {
    pub fn new(job_id: Uuid, filename: String, object_key: String) -> Self {
        Self {
            file_id: Uuid::new_v4(),
            job_id,
            filename,
            object_key,
            status: FileStatus::Queued,
            queued_at: Some(Utc::now()),
            started_at: None,
            finished_at: None,
            ocr_text: None,
            error_message: None,
        }
    }
}

/// Committed job-level snapshot handed to mirror propagation after a
/// transaction. Carries everything the mirror projection needs so the
/// mirror is only ever written from durable authoritative state.
#[derive(Debug, Clone)]
pub struct JobAggregate {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_files: i64,
    pub processed_files: i64,
    pub failed_files: i64,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Recompute job status from its counters.
///
/// The job is terminal precisely when `processed == total` with files
/// attached; terminal status is DONE without failures, PARTIAL otherwise.
/// Below that threshold the job is PROCESSING once any file has started,
/// QUEUED once files exist, CREATED before any file is attached.
pub fn derive_job_status(total: i64, processed: i64, failed: i64, started: bool) -> JobStatus {
    debug_assert!(0 <= failed && failed <= processed && processed <= total);

    if total == 0 {
        return JobStatus::Created;
    }
    if processed == total {
        if failed == 0 {
            JobStatus::Done
        } else {
            JobStatus::Partial
        }
    } else if started {
        JobStatus::Processing
    } else {
        JobStatus::Queued
    }
}

/// Truncate failure text to the persisted bound, respecting char boundaries.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_empty_job() {
        assert_eq!(derive_job_status(0, 0, 0, false), JobStatus::Created);
    }

    #[test]
    fn test_derive_status_queued_before_any_start() {
        assert_eq!(derive_job_status(3, 0, 0, false), JobStatus::Queued);
    }

    #[test]
    fn test_derive_status_processing_once_started() {
        assert_eq!(derive_job_status(3, 1, 0, true), JobStatus::Processing);
        assert_eq!(derive_job_status(3, 2, 1, true), JobStatus::Processing);
    }

    #[test]
    fn test_derive_status_done_iff_no_failures() {
        assert_eq!(derive_job_status(3, 3, 0, true), JobStatus::Done);
        assert_eq!(derive_job_status(3, 3, 1, true), JobStatus::Partial);
        assert_eq!(derive_job_status(3, 3, 3, true), JobStatus::Partial);
    }

    #[test]
    fn test_derive_status_is_idempotent() {
        let first = derive_job_status(5, 5, 2, true);
        let second = derive_job_status(5, 5, 2, true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_terminal_states() {
        assert!(FileStatus::Done.is_terminal());
        assert!(FileStatus::Failed.is_terminal());
        assert!(!FileStatus::Queued.is_terminal());
        assert!(!FileStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [
            JobStatus::Created,
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Done,
            JobStatus::Partial,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
        assert_eq!(JobStatus::parse("whatever"), JobStatus::Unknown);
    }

    #[test]
    fn test_truncate_error_short_message_untouched() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn test_truncate_error_caps_length() {
        let long = "x".repeat(2_000);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.len(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        // 3-byte chars; 900 is divisible by 3 so force a misaligned cut
        let long = format!("{}é{}", "x".repeat(MAX_ERROR_MESSAGE_LEN - 1), "y".repeat(50));
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
