//! Denormalized mirror store
//!
//! One record per job, holding a flattened aggregate projection for
//! list/summary reads. The mirror is eventually consistent with the
//! authoritative database: it is only ever written after an
//! authoritative transaction has committed, and a failed mirror write
//! never rolls anything back.
//!
//! The store exposes exactly three update primitives — unconditional
//! field set, set-if-absent, and numeric set (never increment) — which
//! is all the propagation protocol needs: snapshot fields are absolute
//! overwrites of committed values, "first occurrence" timestamps are
//! conditional, and absent fields are simply omitted.

pub mod propagate;
pub mod record;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use ocrq_common::Result;

pub use propagate::{aggregate_update, failure_marker, propagate};
pub use record::MirrorJobRecord;

/// A store-native field value.
///
/// Numbers are carried as decimal strings — the way key-value stores
/// commonly represent them on the wire — and normalized back to native
/// integers or floats only at the read boundary (see [`record`]).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// String attribute
    S(String),
    /// Numeric attribute in decimal form
    N(String),
}

impl FieldValue {
    pub fn s(value: impl Into<String>) -> Self {
        FieldValue::S(value.into())
    }

    pub fn n(value: impl fmt::Display) -> Self {
        FieldValue::N(value.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::S(v) => Some(v),
            FieldValue::N(_) => None,
        }
    }

    /// Normalize a numeric attribute: integral decimal forms parse to
    /// i64, fractional forms round-trip through f64 and truncate.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::N(v) => v
                .parse::<i64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|f| f as i64)),
            FieldValue::S(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::N(v) => v.parse::<f64>().ok(),
            FieldValue::S(_) => None,
        }
    }
}

/// A conditional partial update of one mirror record.
///
/// Fields with no value are never part of an update; an absent field in
/// the mirror stays absent rather than being written as an explicit
/// null.
#[derive(Debug, Clone, Default)]
pub struct MirrorUpdate {
    set: Vec<(String, FieldValue)>,
    set_if_absent: Vec<(String, FieldValue)>,
}

impl MirrorUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally overwrite a field (last-write-wins).
    pub fn set(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.set.push((field.into(), value));
        self
    }

    /// Write a field only when the record does not already carry it
    /// (first-write-wins).
    pub fn set_if_absent(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.set_if_absent.push((field.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.set_if_absent.is_empty()
    }

    /// Apply this update to a record's field map.
    fn apply(&self, fields: &mut HashMap<String, FieldValue>) {
        for (name, value) in &self.set {
            fields.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.set_if_absent {
            fields.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Key-value mirror store interface.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Replace the whole record for a job (used at job creation).
    async fn put(&self, job_id: &str, fields: Vec<(String, FieldValue)>) -> Result<()>;

    /// Apply a conditional partial update; creates the record when
    /// missing. Safe to apply more than once.
    async fn update(&self, job_id: &str, update: MirrorUpdate) -> Result<()>;

    /// Fetch one record's fields.
    async fn get(&self, job_id: &str) -> Result<Option<HashMap<String, FieldValue>>>;

    /// Fetch every record (summary listing).
    async fn scan(&self) -> Result<Vec<HashMap<String, FieldValue>>>;
}

/// In-process mirror store.
#[derive(Default)]
pub struct MemoryMirrorStore {
    records: RwLock<HashMap<String, HashMap<String, FieldValue>>>,
}

impl MemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn put(&self, job_id: &str, fields: Vec<(String, FieldValue)>) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(job_id.to_string(), fields.into_iter().collect());
        Ok(())
    }

    async fn update(&self, job_id: &str, update: MirrorUpdate) -> Result<()> {
        let mut records = self.records.write().await;
        let fields = records.entry(job_id.to_string()).or_default();
        update.apply(fields);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<HashMap<String, FieldValue>>> {
        let records = self.records.read().await;
        Ok(records.get(job_id).cloned())
    }

    async fn scan(&self) -> Result<Vec<HashMap<String, FieldValue>>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}
