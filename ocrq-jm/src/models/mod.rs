//! Data model for OCRQ jobs and files

mod job;

pub use job::{
    derive_job_status, truncate_error, FileStatus, Job, JobAggregate, JobFile, JobStatus,
    MAX_ERROR_MESSAGE_LEN,
};
