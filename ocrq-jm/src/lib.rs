//! ocrq-jm library interface
//!
//! Exposes the job manager's building blocks for the service binary and
//! for integration testing: data model, authoritative store access,
//! mirror store, object store, task dispatch, worker execution, and the
//! service operation surface consumed by an external HTTP layer.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod mirror;
pub mod models;
pub mod objectstore;
pub mod service;
pub mod worker;

use std::sync::Arc;

use sqlx::SqlitePool;

use ocrq_common::config::TomlConfig;

use crate::dispatch::TaskDispatcher;
use crate::mirror::MirrorStore;
use crate::objectstore::ObjectStore;

/// Application state shared across service operations and workers
#[derive(Clone)]
pub struct AppContext {
    /// Authoritative database connection pool
    pub db: SqlitePool,
    /// Denormalized mirror store (best-effort propagation target)
    pub mirror: Arc<dyn MirrorStore>,
    /// Payload blob store
    pub objects: Arc<dyn ObjectStore>,
    /// Task queue producer
    pub dispatcher: Arc<dyn TaskDispatcher>,
    /// Service configuration
    pub settings: Arc<TomlConfig>,
}

impl AppContext {
    pub fn new(
        db: SqlitePool,
        mirror: Arc<dyn MirrorStore>,
        objects: Arc<dyn ObjectStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        settings: TomlConfig,
    ) -> Self {
        Self {
            db,
            mirror,
            objects,
            dispatcher,
            settings: Arc::new(settings),
        }
    }
}
