//! End-to-end job lifecycle tests
//!
//! Drive jobs through the full stack — service operations, task queue,
//! worker pool, both stores — and assert on the terminal states.

mod common;

use common::{harness, wait_for_mirror_status, wait_for_terminal};
use ocrq_common::Error;
use ocrq_jm::dispatch::{OcrTask, TaskDispatcher};
use ocrq_jm::models::{FileStatus, JobStatus, MAX_ERROR_MESSAGE_LEN};
use ocrq_jm::service::{self, CreateJobRequest, UploadFile};

fn upload(filename: &str, content: &[u8]) -> UploadFile {
    UploadFile {
        filename: filename.to_string(),
        content: content.to_vec(),
    }
}

#[tokio::test]
async fn test_two_successful_files_end_done() {
    let mut h = harness().await;
    h.start_workers(2);

    let created = service::create_job(
        &h.ctx,
        CreateJobRequest {
            name: Some("Invoices".to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(created.status, JobStatus::Created);

    let attached = service::attach_files(
        &h.ctx,
        &created.job_id.to_string(),
        vec![
            upload("invoice.png", common::PAYLOAD_INVOICE),
            upload("blank.png", common::PAYLOAD_BLANK),
        ],
    )
    .await
    .unwrap();
    assert_eq!(attached.count, 2);

    let job = wait_for_terminal(&h.ctx, created.job_id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.total_files, 2);
    assert_eq!(job.processed_files, 2);
    assert_eq!(job.failed_files, 0);
    assert!(job.finished_at.is_some());

    // Per-file results: concatenated spans and empty-but-successful
    let detail = service::job_detail(&h.ctx, &created.job_id.to_string())
        .await
        .unwrap();
    assert_eq!(detail.files.len(), 2);

    let by_name = |name: &str| {
        detail
            .files
            .iter()
            .find(|f| f.filename == name)
            .expect("file present")
    };
    let invoice = by_name("invoice.png");
    assert_eq!(invoice.status, FileStatus::Done);
    assert_eq!(invoice.ocr_text.as_deref(), Some("Total: 100"));

    let blank = by_name("blank.png");
    assert_eq!(blank.status, FileStatus::Done);
    assert_eq!(blank.ocr_text.as_deref(), Some(""));
    assert!(blank.error_message.is_none());

    // Every file row carries a fresh read URL
    assert!(detail.files.iter().all(|f| !f.url.is_empty()));

    wait_for_mirror_status(&h.ctx, created.job_id, JobStatus::Done).await;
}

#[tokio::test]
async fn test_one_engine_failure_ends_partial() {
    let mut h = harness().await;
    h.start_workers(3);

    let created = service::create_job(&h.ctx, CreateJobRequest::default())
        .await
        .unwrap();

    service::attach_files(
        &h.ctx,
        &created.job_id.to_string(),
        vec![
            upload("a.png", common::PAYLOAD_INVOICE),
            upload("b.png", common::PAYLOAD_POISON),
            upload("c.png", common::PAYLOAD_BLANK),
        ],
    )
    .await
    .unwrap();

    let job = wait_for_terminal(&h.ctx, created.job_id).await;
    assert_eq!(job.status, JobStatus::Partial);
    assert_eq!(job.processed_files, 3);
    assert_eq!(job.failed_files, 1);

    let detail = service::job_detail(&h.ctx, &created.job_id.to_string())
        .await
        .unwrap();
    let failed = detail
        .files
        .iter()
        .find(|f| f.status == FileStatus::Failed)
        .expect("one failed file");
    let message = failed.error_message.as_deref().unwrap();
    assert!(!message.is_empty());
    assert!(message.len() <= MAX_ERROR_MESSAGE_LEN);
    assert!(failed.ocr_text.is_none());

    wait_for_mirror_status(&h.ctx, created.job_id, JobStatus::Partial).await;
}

#[tokio::test]
async fn test_empty_upload_set_rejected_without_mutation() {
    let h = harness().await;

    let created = service::create_job(&h.ctx, CreateJobRequest::default())
        .await
        .unwrap();

    let err = service::attach_files(&h.ctx, &created.job_id.to_string(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // Job untouched, nothing dispatched
    let job = ocrq_jm::db::jobs::get_job(&h.ctx.db, created.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.total_files, 0);

    let mut rx = h.task_rx.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_all_empty_payloads_rejected() {
    let h = harness().await;

    let created = service::create_job(&h.ctx, CreateJobRequest::default())
        .await
        .unwrap();

    let err = service::attach_files(
        &h.ctx,
        &created.job_id.to_string(),
        vec![upload("empty-1.png", b""), upload("empty-2.png", b"")],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut rx = h.task_rx.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_attach_to_unknown_job_is_not_found() {
    let h = harness().await;

    let err = service::attach_files(
        &h.ctx,
        &uuid::Uuid::new_v4().to_string(),
        vec![upload("a.png", b"content")],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_attach_rejects_malformed_job_id() {
    let h = harness().await;
    let err = service::attach_files(&h.ctx, "not-a-uuid", vec![upload("a.png", b"x")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_redelivered_completion_task_does_not_recount() {
    let mut h = harness().await;
    h.start_workers(1);

    let created = service::create_job(&h.ctx, CreateJobRequest::default())
        .await
        .unwrap();
    let attached = service::attach_files(
        &h.ctx,
        &created.job_id.to_string(),
        vec![upload("a.png", common::PAYLOAD_INVOICE)],
    )
    .await
    .unwrap();

    let job = wait_for_terminal(&h.ctx, created.job_id).await;
    assert_eq!(job.processed_files, 1);

    // Simulate the queue redelivering the completed file's task
    let file = &attached.files_created[0];
    h.ctx.dispatcher.enqueue(OcrTask::new(
        created.job_id.to_string(),
        file.file_id.to_string(),
        file.object_key.clone(),
    ));
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let job = ocrq_jm::db::jobs::get_job(&h.ctx.db, created.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.processed_files, 1);
    assert_eq!(job.failed_files, 0);
    assert_eq!(job.status, JobStatus::Done);
}

#[tokio::test]
async fn test_listing_sorted_newest_first() {
    let h = harness().await;

    let first = service::create_job(
        &h.ctx,
        CreateJobRequest {
            name: Some("older".to_string()),
        },
    )
    .await
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = service::create_job(
        &h.ctx,
        CreateJobRequest {
            name: Some("newer".to_string()),
        },
    )
    .await
    .unwrap();

    let listing = service::list_jobs(&h.ctx).await.unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].job_id, second.job_id.to_string());
    assert_eq!(listing[1].job_id, first.job_id.to_string());
    assert_eq!(listing[0].name, "newer");
}

#[tokio::test]
async fn test_unnamed_job_gets_default_label() {
    let h = harness().await;
    let created = service::create_job(&h.ctx, CreateJobRequest { name: None })
        .await
        .unwrap();
    assert!(!created.name.is_empty());

    let listing = service::list_jobs(&h.ctx).await.unwrap();
    assert_eq!(listing[0].name, created.name);
}
