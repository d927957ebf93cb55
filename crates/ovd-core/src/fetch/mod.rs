//! Isolated fetch/extract workers.
//!
//! The pipeline hands network transfers to a [`FetchWorker`] capability with
//! two interchangeable implementations: [`SpawnedFetcher`] runs a batch on
//! spawned tasks (the isolated-worker path), [`InlineFetcher`] runs the
//! identical per-item function sequentially on the caller's context. Both
//! funnel through [`fetch_one`], so behavior cannot diverge between them.
//!
//! Errors never cross the worker boundary as panics: per-item failures come
//! back as strings in the outcome; only a broken batch mechanism itself
//! yields a whole-batch error, which callers answer with a one-by-one
//! fallback.

pub mod archive;
pub mod sniff;

pub use archive::ArchiveEntry;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// One (url, filename) fetch request inside a batch.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub url: String,
    pub filename: String,
}

/// Per-item batch result. The error side is a plain string: errors are data
/// across the worker boundary.
#[derive(Debug)]
pub struct FetchOutcome {
    pub filename: String,
    pub result: std::result::Result<Vec<u8>, String>,
}

/// Classified single-fetch failure. Status codes stay numeric so the file
/// stage can route 403 specially.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("response of {size} bytes exceeds the {cap} byte ceiling")]
    TooLarge { size: u64, cap: u64 },
    #[error("network error: {0}")]
    Network(String),
}

/// Fetch one URL into memory, honoring the hard size ceiling. Oversized
/// responses are rejected before allocation when the server declares a
/// length, and after the cap is crossed otherwise.
pub async fn fetch_one(
    client: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, FetchError> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let response = request
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    if let Some(declared) = response.content_length() {
        if declared > max_bytes {
            return Err(FetchError::TooLarge {
                size: declared,
                cap: max_bytes,
            });
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;
    if bytes.len() as u64 > max_bytes {
        return Err(FetchError::TooLarge {
            size: bytes.len() as u64,
            cap: max_bytes,
        });
    }
    Ok(bytes.to_vec())
}

/// The fetch/extract capability as the pipeline sees it.
#[async_trait]
pub trait FetchWorker: Send + Sync {
    /// Fetch a batch. `Err` means the batch mechanism itself failed and the
    /// caller should fall back to single fetches; per-item failures are
    /// reported inside the outcomes.
    async fn fetch_batch(
        &self,
        jobs: Vec<FetchJob>,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<FetchOutcome>>;

    /// Fetch one URL on the calling context.
    async fn fetch_single(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<Vec<u8>, FetchError>;

    /// Extract a zip archive into (path, bytes) entries.
    async fn extract_archive(&self, bytes: Vec<u8>) -> Result<Vec<ArchiveEntry>>;
}

/// Worker-offload implementation: batches fan out over spawned tasks and
/// archives decompress on the blocking pool.
pub struct SpawnedFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl SpawnedFetcher {
    pub fn new(max_bytes: u64) -> SpawnedFetcher {
        SpawnedFetcher {
            client: reqwest::Client::new(),
            max_bytes,
        }
    }
}

#[async_trait]
impl FetchWorker for SpawnedFetcher {
    async fn fetch_batch(
        &self,
        jobs: Vec<FetchJob>,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<FetchOutcome>> {
        let mut join_set = tokio::task::JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let client = self.client.clone();
            let headers = headers.clone();
            let max_bytes = self.max_bytes;
            join_set.spawn(async move {
                let result = fetch_one(&client, &job.url, &headers, max_bytes)
                    .await
                    .map_err(|e| e.to_string());
                (
                    index,
                    FetchOutcome {
                        filename: job.filename,
                        result,
                    },
                )
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            outcomes.push(joined.context("batch fetch task died")?);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    async fn fetch_single(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        fetch_one(&self.client, url, headers, self.max_bytes).await
    }

    async fn extract_archive(&self, bytes: Vec<u8>) -> Result<Vec<ArchiveEntry>> {
        tokio::task::spawn_blocking(move || archive::extract_zip(&bytes))
            .await
            .context("extract task died")?
    }
}

/// Inline implementation: same per-item function, run sequentially on the
/// calling context. Selected when worker offload is unavailable; also the
/// deterministic choice for tests.
pub struct InlineFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl InlineFetcher {
    pub fn new(max_bytes: u64) -> InlineFetcher {
        InlineFetcher {
            client: reqwest::Client::new(),
            max_bytes,
        }
    }
}

#[async_trait]
impl FetchWorker for InlineFetcher {
    async fn fetch_batch(
        &self,
        jobs: Vec<FetchJob>,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<FetchOutcome>> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = fetch_one(&self.client, &job.url, headers, self.max_bytes)
                .await
                .map_err(|e| e.to_string());
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
        headers: &HashMap<String, String>,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        fetch_one(&self.client, url, headers, self.max_bytes).await
    }

    async fn extract_archive(&self, bytes: Vec<u8>) -> Result<Vec<ArchiveEntry>> {
        archive::extract_zip(&bytes)
    }
}
