//! End-to-end pipeline scenarios over a temp dir with fake collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{
    dragon_object, open_context, wait_for_stage, zip_bytes, Canned, FakeApi, FakeFetcher,
};
use ovd_core::job::Job;
use ovd_core::ops;
use ovd_core::state::Stage;

#[tokio::test]
async fn enqueued_job_traverses_the_whole_pipeline() {
    let tmp = TempDir::new().unwrap();
    let object = dragon_object("12345", "Dragon");
    let api = FakeApi::new().with_object(object);
    let fetcher = FakeFetcher::new()
        .with_response("https://cdn.example/12345/front.jpg", Canned::Bytes(b"\xff\xd8front".to_vec()))
        .with_response("https://cdn.example/12345/side.jpg", Canned::Bytes(b"\xff\xd8side".to_vec()))
        .with_response("https://cdn.example/12345/archive.zip", Canned::Bytes(zip_bytes()));
    let (ctx, sched) = open_context(tmp.path(), Arc::new(api), Arc::new(fetcher)).await;

    ops::enqueue(&sched, "12345").await.unwrap();
    wait_for_stage(&ctx, "12345", Stage::Completed, Duration::from_secs(10)).await;

    let dir = ctx.download_dir().join("mx_print").join("Dragon");
    let notes = std::fs::read_to_string(dir.join("notes.md")).unwrap();
    assert!(notes.contains("Object ID: 12345"));
    assert!(dir.join("object.json").is_file());
    assert!(dir.join("images/001.jpg").is_file());
    assert!(dir.join("images/002.jpg").is_file());
    assert!(dir.join("files/Dragon.zip").is_file());
    // The archive worker extracted the model next to the zip.
    assert_eq!(
        std::fs::read(dir.join("files/model.stl")).unwrap(),
        b"solid dragon\nendsolid dragon\n"
    );

    let job = ctx.registry.get_job("12345").unwrap();
    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn retrying_a_valid_download_short_circuits_without_refetching() {
    let tmp = TempDir::new().unwrap();
    let object = dragon_object("12345", "Dragon");
    let api = FakeApi::new().with_object(object);
    let fetcher = Arc::new(
        FakeFetcher::new()
            .with_response("https://cdn.example/12345/front.jpg", Canned::Bytes(b"\xff\xd8front".to_vec()))
            .with_response("https://cdn.example/12345/side.jpg", Canned::Bytes(b"\xff\xd8side".to_vec()))
            .with_response("https://cdn.example/12345/archive.zip", Canned::Bytes(zip_bytes())),
    );
    let (ctx, sched) = open_context(tmp.path(), Arc::new(api), Arc::clone(&fetcher)).await;

    ops::enqueue(&sched, "12345").await.unwrap();
    wait_for_stage(&ctx, "12345", Stage::Completed, Duration::from_secs(10)).await;
    let calls_after_first_run = fetcher.fetch_calls.load(Ordering::SeqCst);

    // Pretend the job failed so the operator can hit retry.
    ctx.store.move_id(Stage::Completed, Stage::Failed, "12345").await.unwrap();
    assert!(ops::retry(&sched, "12345").await.unwrap());

    // Validation recognizes the intact folder and short-circuits.
    wait_for_stage(&ctx, "12345", Stage::Completed, Duration::from_secs(10)).await;
    let calls_after_retry = fetcher.fetch_calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first_run, calls_after_retry, "retry must not refetch");
}

#[tokio::test]
async fn forbidden_file_fails_the_job_and_pauses_the_heavy_pool() {
    let tmp = TempDir::new().unwrap();
    let api = FakeApi::new()
        .with_object(dragon_object("111", "Alpha"))
        .with_object(dragon_object("222", "Beta"));
    let fetcher = FakeFetcher::new()
        .with_response("https://cdn.example/111/front.jpg", Canned::Bytes(b"\xff\xd8a".to_vec()))
        .with_response("https://cdn.example/111/side.jpg", Canned::Bytes(b"\xff\xd8b".to_vec()))
        .with_response("https://cdn.example/111/archive.zip", Canned::Status(403))
        .with_response("https://cdn.example/222/front.jpg", Canned::Bytes(b"\xff\xd8c".to_vec()))
        .with_response("https://cdn.example/222/side.jpg", Canned::Bytes(b"\xff\xd8d".to_vec()))
        .with_response("https://cdn.example/222/archive.zip", Canned::Bytes(zip_bytes()));
    let (ctx, sched) = open_context(tmp.path(), Arc::new(api), Arc::new(fetcher)).await;

    ops::enqueue(&sched, "111").await.unwrap();
    wait_for_stage(&ctx, "111", Stage::FailedForbidden, Duration::from_secs(10)).await;
    assert!(sched.file_downloads_paused(), "403 must pause the heavy pool");
    assert!(!sched.is_paused(), "light-pool dispatch stays available");
    let failed = ctx.registry.get_job("111").unwrap();
    assert_eq!(failed.stage, Stage::FailedForbidden);
    assert!(failed.error.as_deref().unwrap_or_default().contains("403"));

    // A second job still moves through the light stages while heavy
    // dispatch stays suppressed.
    ops::enqueue(&sched, "222").await.unwrap();
    wait_for_stage(&ctx, "222", Stage::ImagesDownloaded, Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ctx.store.contains(Stage::ImagesDownloaded, "222").await.unwrap());
    assert!(!ctx.store.contains(Stage::DownloadingFiles, "222").await.unwrap());
    assert!(!ctx.store.contains(Stage::Completed, "222").await.unwrap());

    // Resuming file downloads lets the waiting job finish.
    sched.resume_file_downloads().await;
    wait_for_stage(&ctx, "222", Stage::Completed, Duration::from_secs(10)).await;
}

#[tokio::test]
async fn cancelling_mid_images_removes_the_job_for_good() {
    let tmp = TempDir::new().unwrap();
    let api = FakeApi::new().with_object(dragon_object("333", "Gamma"));
    let fetcher = FakeFetcher::new()
        .with_response("https://cdn.example/333/front.jpg", Canned::Hang)
        .with_response("https://cdn.example/333/side.jpg", Canned::Hang);
    let (ctx, sched) = open_context(tmp.path(), Arc::new(api), Arc::new(fetcher)).await;

    ops::enqueue(&sched, "333").await.unwrap();
    wait_for_stage(&ctx, "333", Stage::DownloadingImages, Duration::from_secs(10)).await;

    assert!(ops::cancel(&sched, "333").await.unwrap());
    assert!(!ctx.store.contains(Stage::DownloadingImages, "333").await.unwrap());
    assert!(ctx.store.contains(Stage::Cancelled, "333").await.unwrap());
    assert!(ctx.registry.get_job("333").is_none());

    // A later scheduler pass must not resurrect it.
    sched.schedule().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ctx.store.contains(Stage::Cancelled, "333").await.unwrap());
    for stage in Stage::ACTIVE {
        assert!(!ctx.store.contains(stage, "333").await.unwrap());
    }
}

#[tokio::test]
async fn clearing_five_hundred_completed_jobs_empties_set_and_storage() {
    let tmp = TempDir::new().unwrap();
    let (ctx, _sched) = open_context(tmp.path(), Arc::new(FakeApi::new()), Arc::new(FakeFetcher::new())).await;

    for n in 0..500 {
        let id = format!("done-{n:03}");
        ctx.registry.add_job(&id).await.unwrap();
        ctx.store.add(Stage::Completed, &id).await.unwrap();
    }
    assert_eq!(ctx.store.count(Stage::Completed).await.unwrap(), 500);

    let cleared = ctx.registry.clear_completed().await.unwrap();
    assert_eq!(cleared, 500);
    assert_eq!(ctx.store.count(Stage::Completed).await.unwrap(), 0);
    assert!(ctx.store.persisted_job_ids().await.unwrap().is_empty());
    assert!(ctx.registry.jobs().is_empty());
}

#[tokio::test]
async fn bulk_import_classifies_each_id() {
    let tmp = TempDir::new().unwrap();
    let (ctx, sched) = open_context(tmp.path(), Arc::new(FakeApi::new()), Arc::new(FakeFetcher::new())).await;
    sched.pause_all();

    ctx.registry.add_job("c1").await.unwrap();
    ctx.store.add(Stage::Completed, "c1").await.unwrap();
    ctx.registry.add_job("f1").await.unwrap();
    ctx.store.add(Stage::Failed, "f1").await.unwrap();
    ctx.registry.add_job("p1").await.unwrap();
    ctx.store.add(Stage::DownloadingImages, "p1").await.unwrap();

    let input = tmp.path().join("bulk.txt");
    std::fs::write(&input, "c1, f1,p1 ,n1,\n").unwrap();

    let summary = ops::import_bulk(&sched, &input).await.unwrap();
    assert_eq!(summary.skipped_completed, 1);
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.left_in_flight, 1);
    assert_eq!(summary.queued, 1);

    // Paused scheduler: memberships are exactly what import left behind.
    assert!(ctx.store.contains(Stage::Completed, "c1").await.unwrap());
    assert!(ctx.store.contains(Stage::Queued, "f1").await.unwrap());
    assert!(ctx.store.contains(Stage::DownloadingImages, "p1").await.unwrap());
    assert!(ctx.store.contains(Stage::Queued, "n1").await.unwrap());
}

#[tokio::test]
async fn startup_recovery_returns_interrupted_jobs_to_rest_stages() {
    let tmp = TempDir::new().unwrap();
    let (ctx, sched) = open_context(tmp.path(), Arc::new(FakeApi::new()), Arc::new(FakeFetcher::new())).await;
    sched.pause_all();

    // Jobs stranded mid-flight by a simulated crash.
    ctx.store.add(Stage::Validating, "a1").await.unwrap();
    ctx.store.add(Stage::DownloadingFiles, "a2").await.unwrap();
    // Orphan: persisted record with no stage membership.
    ctx.store.save_job(&Job::new("o1")).await.unwrap();

    let recovered = ops::recover(&sched).await.unwrap();
    assert_eq!(recovered, 3);
    assert!(ctx.store.contains(Stage::Queued, "a1").await.unwrap());
    assert!(ctx.store.contains(Stage::ImagesDownloaded, "a2").await.unwrap());
    assert!(ctx.store.contains(Stage::Queued, "o1").await.unwrap());
}
