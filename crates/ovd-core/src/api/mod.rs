//! Vendor API boundary: typed object metadata in, classified errors out.
//!
//! The rest of the engine only sees this trait; the HTTP implementation
//! lives in [`http`] and tests substitute an in-memory fake.

mod http;

pub use http::HttpObjectApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Classified vendor API failure. The pipeline routes on these kinds:
/// auth pauses all dispatch, status codes map to typed failure stages,
/// everything else is an unknown failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Bearer token missing, expired, or rejected; reauthentication needed.
    #[error("authentication required")]
    Auth,
    /// Non-success HTTP status from the vendor.
    #[error("vendor API returned HTTP {0}")]
    Status(u16),
    /// Transport-level or otherwise unclassifiable failure.
    #[error("network error: {0}")]
    Network(String),
}

/// One image reference with its declared resolutions. URLs degrade from
/// `full_size_url` down to the generic `url` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_size_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ImageRef {
    /// Best available URL: largest declared resolution first, then the
    /// fixed fallback order, then the generic field.
    pub fn best_url(&self) -> Option<&str> {
        self.full_size_url
            .as_deref()
            .or(self.large_url.as_deref())
            .or(self.medium_url.as_deref())
            .or(self.small_url.as_deref())
            .or(self.url.as_deref())
    }
}

/// One downloadable file attached to an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Best-known metadata snapshot for one object, as returned by the vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetails {
    pub id: String,
    pub name: String,
    pub designer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub files: Vec<FileRef>,
}

impl ObjectDetails {
    /// Files the pipeline is expected to download (those with a direct URL).
    pub fn downloadable_files(&self) -> impl Iterator<Item = &FileRef> {
        self.files.iter().filter(|f| f.download_url.is_some())
    }
}

/// The vendor API as the engine sees it.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Authoritative metadata for one object id.
    async fn object_by_id(&self, id: &str) -> Result<ObjectDetails, ApiError>;

    /// Free-text object search.
    async fn search(&self, query: &str) -> Result<Vec<ObjectDetails>, ApiError>;

    /// A usable bearer token, or `ApiError::Auth` when expired/missing.
    async fn bearer_token(&self) -> Result<String, ApiError>;
}
