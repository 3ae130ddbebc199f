//! Typed projection of mirror records
//!
//! The mirror may lag the authoritative store or hold partially written
//! records, so every read goes through [`MirrorJobRecord::from_fields`],
//! which fills safe defaults: empty strings for identifiers and names,
//! zero for counters, UNKNOWN for status. Timestamps that fail to parse
//! read as absent rather than erroring a whole listing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ocrq_common::time;

use crate::mirror::FieldValue;
use crate::models::JobStatus;

/// Normalized job summary as read from the mirror store.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorJobRecord {
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

impl MirrorJobRecord {
    /// Normalize a raw field map into a fully populated record.
    pub fn from_fields(fields: &HashMap<String, FieldValue>) -> Self {
        Self {
            job_id: string_field(fields, "job_id"),
            name: string_field(fields, "name"),
            status: fields
                .get("status")
                .and_then(FieldValue::as_str)
                .map(JobStatus::parse)
                .unwrap_or(JobStatus::Unknown),
            created_at: timestamp_field(fields, "created_at"),
            queued_at: timestamp_field(fields, "queued_at"),
            started_at: timestamp_field(fields, "started_at"),
            finished_at: timestamp_field(fields, "finished_at"),
            total_files: counter_field(fields, "total_files"),
            processed_files: counter_field(fields, "processed_files"),
            failed_files: counter_field(fields, "failed_files"),
        }
    }
}

fn string_field(fields: &HashMap<String, FieldValue>, name: &str) -> String {
    fields
        .get(name)
        .and_then(FieldValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn counter_field(fields: &HashMap<String, FieldValue>, name: &str) -> i64 {
    fields.get(name).and_then(FieldValue::as_i64).unwrap_or(0)
}

fn timestamp_field(fields: &HashMap<String, FieldValue>, name: &str) -> Option<DateTime<Utc>> {
    fields
        .get(name)
        .and_then(FieldValue::as_str)
        .and_then(|s| time::parse_rfc3339(s).ok())
}
