//! ocrq-jm - OCR Job Manager service
//!
//! Tracks multi-file batch jobs whose per-file text recognition runs on
//! a pool of workers. The authoritative job state lives in SQLite; a
//! denormalized mirror serves summary reads; one task per uploaded file
//! drives the work queue.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ocrq_common::config::{self, TomlConfig};
use ocrq_jm::dispatch::QueueDispatcher;
use ocrq_jm::engine::{RecognitionEngine, SharedEngine};
use ocrq_jm::mirror::MemoryMirrorStore;
use ocrq_jm::objectstore::FsObjectStore;
use ocrq_jm::worker::spawn_workers;
use ocrq_jm::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting ocrq-jm (OCR Job Manager) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let root_folder = config::resolve_root_folder(std::env::args().nth(1).as_deref());
    info!("Root folder: {}", root_folder.display());

    // Step 2: Create root folder structure if missing
    config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Load configuration
    let settings = TomlConfig::load(&root_folder)?;
    info!(
        worker_count = settings.worker_count,
        max_task_attempts = settings.max_task_attempts,
        "Configuration loaded"
    );

    // Step 4: Open or create the authoritative database
    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = ocrq_jm::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 5: Stores and queue
    let mirror = Arc::new(MemoryMirrorStore::new());
    let objects = Arc::new(FsObjectStore::new(
        config::objects_path(&root_folder),
        settings.url_signing_secret.clone(),
        settings.url_ttl_seconds,
    ));
    let (dispatcher, task_rx) = QueueDispatcher::new();

    // Step 6: Recognition engine handle, initialized lazily exactly once
    let engine = build_engine(&settings);

    let worker_count = settings.worker_count;
    let ctx = AppContext::new(db_pool, mirror, objects, Arc::new(dispatcher), settings);

    // Step 7: Worker pool
    let workers = spawn_workers(ctx, engine, task_rx, worker_count);
    info!(worker_count, "Worker pool started");

    // Run until interrupted; workers drain the queue in the background
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for worker in workers {
        worker.abort();
    }

    Ok(())
}

#[cfg(feature = "tesseract")]
fn build_engine(settings: &TomlConfig) -> SharedEngine {
    let languages = settings.engine_languages.clone();
    SharedEngine::new(move || {
        Ok(Box::new(ocrq_jm::engine::tesseract::TesseractEngine::new(&languages))
            as Box<dyn RecognitionEngine>)
    })
}

#[cfg(not(feature = "tesseract"))]
fn build_engine(_settings: &TomlConfig) -> SharedEngine {
    SharedEngine::new(|| {
        Ok(Box::new(ocrq_jm::engine::PlainTextEngine) as Box<dyn RecognitionEngine>)
    })
}
