//! Shared test harness: a full application context over a temp-dir
//! database, in-process stores, and a scripted recognition engine.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use ocrq_common::config::TomlConfig;
use ocrq_common::{Error, Result};
use ocrq_jm::dispatch::{OcrTask, QueueDispatcher};
use ocrq_jm::engine::{PlainTextEngine, RecognitionEngine, SharedEngine, TextSpan};
use ocrq_jm::mirror::{MemoryMirrorStore, MirrorStore};
use ocrq_jm::models::{Job, JobStatus};
use ocrq_jm::objectstore::MemoryObjectStore;
use ocrq_jm::AppContext;

/// Engine scripted through payload markers so each file's behavior is
/// chosen by the bytes the test uploads.
pub struct ScriptedEngine;

pub const PAYLOAD_INVOICE: &[u8] = b"__invoice__";
pub const PAYLOAD_BLANK: &[u8] = b"__blank__";
pub const PAYLOAD_POISON: &[u8] = b"__poison__";

impl RecognitionEngine for ScriptedEngine {
    fn recognize(&self, image: &[u8]) -> Result<Vec<TextSpan>> {
        if image == PAYLOAD_POISON {
            return Err(Error::Internal(
                "recognition backend crashed while decoding page".to_string(),
            ));
        }
        if image == PAYLOAD_INVOICE {
            return Ok(vec![TextSpan::new("", "Total: 100", 0.9)]);
        }
        if image == PAYLOAD_BLANK {
            return Ok(vec![]);
        }
        PlainTextEngine.recognize(image)
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    /// Queue receiver; taken by `start_workers`, inspectable otherwise
    pub task_rx: Option<mpsc::UnboundedReceiver<OcrTask>>,
    _root: TempDir,
}

impl TestHarness {
    /// Spawn the worker pool against the scripted engine.
    pub fn start_workers(&mut self, count: usize) {
        let rx = self.task_rx.take().expect("workers already started");
        let engine = SharedEngine::from_engine(Box::new(ScriptedEngine));
        ocrq_jm::worker::spawn_workers(self.ctx.clone(), engine, rx, count);
    }
}

/// Build a harness over a file-backed database so concurrent
/// connections see the same data.
pub async fn harness() -> TestHarness {
    let root = TempDir::new().unwrap();
    let db_path = root.path().join("ocrq.db");
    let pool = ocrq_jm::db::init_database_pool(&db_path).await.unwrap();

    let (dispatcher, task_rx) = QueueDispatcher::new();
    let settings = TomlConfig {
        retry_delay_ms: 10,
        ..TomlConfig::default()
    };

    let ctx = AppContext::new(
        pool,
        Arc::new(MemoryMirrorStore::new()),
        Arc::new(MemoryObjectStore::new()),
        Arc::new(dispatcher),
        settings,
    );

    TestHarness {
        ctx,
        task_rx: Some(task_rx),
        _root: root,
    }
}

/// Poll the authoritative store until the job reaches a terminal
/// status.
pub async fn wait_for_terminal(ctx: &AppContext, job_id: Uuid) -> Job {
    for _ in 0..200 {
        let job = ocrq_jm::db::jobs::get_job(&ctx.db, job_id)
            .await
            .unwrap()
            .expect("job must exist");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("Job {} did not reach a terminal status", job_id);
}

/// Poll until the mirror record reports the given status.
pub async fn wait_for_mirror_status(ctx: &AppContext, job_id: Uuid, status: JobStatus) {
    for _ in 0..200 {
        if let Some(fields) = ctx.mirror.get(&job_id.to_string()).await.unwrap() {
            let record = ocrq_jm::mirror::MirrorJobRecord::from_fields(&fields);
            if record.status == status {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("Mirror for {} never reached {:?}", job_id, status);
}
