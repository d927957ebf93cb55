//! Shared fixtures: fake vendor API and fetch worker, plus wait helpers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ovd_core::api::{ApiError, FileRef, ImageRef, ObjectApi, ObjectDetails};
use ovd_core::config::OvdConfig;
use ovd_core::context::Context;
use ovd_core::fetch::{archive, ArchiveEntry, FetchError, FetchJob, FetchOutcome, FetchWorker};
use ovd_core::scheduler::Scheduler;
use ovd_core::state::Stage;

/// Config tuned for tests: small pools, fast locks.
pub fn test_config() -> OvdConfig {
    OvdConfig {
        max_file_downloads: 1,
        max_light_jobs: 4,
        lock_timeout_secs: 5,
        lock_retry_ms: 5,
        ..OvdConfig::default()
    }
}

pub fn dragon_object(id: &str, name: &str) -> ObjectDetails {
    ObjectDetails {
        id: id.to_string(),
        name: name.to_string(),
        designer: "mx_print".to_string(),
        description: "An articulated dragon.".to_string(),
        source_url: Some(format!("https://vault.example/objects/{id}")),
        images: vec![
            ImageRef {
                name: "front".into(),
                full_size_url: Some(format!("https://cdn.example/{id}/front.jpg")),
                ..Default::default()
            },
            ImageRef {
                name: "side".into(),
                url: Some(format!("https://cdn.example/{id}/side.jpg")),
                ..Default::default()
            },
        ],
        files: vec![FileRef {
            name: format!("{name}.zip"),
            download_url: Some(format!("https://cdn.example/{id}/archive.zip")),
            size_bytes: None,
        }],
    }
}

/// A zip archive holding one model file, for exercising extraction.
pub fn zip_bytes() -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    writer
        .start_file("model.stl", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"solid dragon\nendsolid dragon\n").unwrap();
    writer.finish().unwrap();
    cursor.into_inner()
}

pub struct FakeApi {
    objects: Mutex<HashMap<String, ObjectDetails>>,
}

impl FakeApi {
    pub fn new() -> FakeApi {
        FakeApi {
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_object(self, object: ObjectDetails) -> FakeApi {
        self.objects.lock().unwrap().insert(object.id.clone(), object);
        self
    }
}

#[async_trait]
impl ObjectApi for FakeApi {
    async fn object_by_id(&self, id: &str) -> Result<ObjectDetails, ApiError> {
        self.objects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ApiError::Status(404))
    }

    async fn search(&self, _query: &str) -> Result<Vec<ObjectDetails>, ApiError> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn bearer_token(&self) -> Result<String, ApiError> {
        Ok("test-token".to_string())
    }
}

/// Canned response for one URL (matched with the query string stripped,
/// since the engine appends the access token).
pub enum Canned {
    Bytes(Vec<u8>),
    Status(u16),
    /// Never resolves; the stage's cancellation race wins.
    Hang,
}

pub struct FakeFetcher {
    responses: Mutex<HashMap<String, Canned>>,
    pub fetch_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> FakeFetcher {
        FakeFetcher {
            responses: Mutex::new(HashMap::new()),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, url: &str, canned: Canned) -> FakeFetcher {
        self.responses.lock().unwrap().insert(url.to_string(), canned);
        self
    }

    async fn respond(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let bare = url.split('?').next().unwrap_or(url).to_string();
        // Decide under the lock, then hang outside it.
        enum Action {
            Give(Result<Vec<u8>, FetchError>),
            Hang,
        }
        let action = {
            let responses = self.responses.lock().unwrap();
            match responses.get(&bare) {
                Some(Canned::Bytes(bytes)) => Action::Give(Ok(bytes.clone())),
                Some(Canned::Status(code)) => Action::Give(Err(FetchError::Status(*code))),
                Some(Canned::Hang) => Action::Hang,
                None => Action::Give(Err(FetchError::Network(format!(
                    "no canned response for {bare}"
                )))),
            }
        };
        match action {
            Action::Give(result) => result,
            Action::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl FetchWorker for FakeFetcher {
    async fn fetch_batch(
        &self,
        jobs: Vec<FetchJob>,
        _headers: &HashMap<String, String>,
    ) -> anyhow::Result<Vec<FetchOutcome>> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = self.respond(&job.url).await.map_err(|e| e.to_string());
            outcomes.push(FetchOutcome {
                filename: job.filename,
                result,
            });
        }
        Ok(outcomes)
    }

    async fn fetch_single(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<u8>, FetchError> {
        self.respond(url).await
    }

    async fn extract_archive(&self, bytes: Vec<u8>) -> anyhow::Result<Vec<ArchiveEntry>> {
        archive::extract_zip(&bytes)
    }
}

/// Build a context + scheduler over `data_dir`. The fakes are passed as
/// `Arc`s so tests can keep a handle for assertions (e.g. fetch counts).
pub async fn open_context(
    data_dir: &Path,
    api: Arc<FakeApi>,
    fetcher: Arc<FakeFetcher>,
) -> (Arc<Context>, Scheduler) {
    let ctx = Context::open(test_config(), data_dir.to_path_buf(), api, fetcher)
        .await
        .unwrap();
    let sched = Scheduler::new(Arc::clone(&ctx));
    (ctx, sched)
}

/// Poll until `id` is a member of `stage`, or panic after `timeout`.
pub async fn wait_for_stage(ctx: &Context, id: &str, stage: Stage, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if ctx.store.contains(stage, id).await.unwrap() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            let mut found = Vec::new();
            for s in Stage::ALL {
                if ctx.store.contains(s, id).await.unwrap() {
                    found.push(s.as_str());
                }
            }
            panic!(
                "job {id} never reached {}; currently in {:?}",
                stage.as_str(),
                found
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
