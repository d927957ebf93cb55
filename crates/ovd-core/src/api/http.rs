//! reqwest-backed vendor API client.

use async_trait::async_trait;
use std::sync::RwLock;

use super::{ApiError, ObjectApi, ObjectDetails};

/// HTTP implementation of [`ObjectApi`]. The bearer token is held behind a
/// lock so a reauthentication flow can refresh it without rebuilding the
/// client.
pub struct HttpObjectApi {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpObjectApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> HttpObjectApi {
        HttpObjectApi {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token),
        }
    }

    /// Install a fresh bearer token after reauthentication.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().expect("token lock poisoned") = token;
    }

    fn current_token(&self) -> Result<String, ApiError> {
        self.token
            .read()
            .expect("token lock poisoned")
            .clone()
            .ok_or(ApiError::Auth)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        let token = self.current_token()?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(ApiError::Auth);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Network(format!("decode {url}: {e}")))
    }
}

#[async_trait]
impl ObjectApi for HttpObjectApi {
    async fn object_by_id(&self, id: &str) -> Result<ObjectDetails, ApiError> {
        self.get_json(format!("{}/objects/{}", self.base_url, id)).await
    }

    async fn search(&self, query: &str) -> Result<Vec<ObjectDetails>, ApiError> {
        let mut url = url::Url::parse(&format!("{}/objects", self.base_url))
            .map_err(|e| ApiError::Network(e.to_string()))?;
        url.query_pairs_mut().append_pair("search", query);
        self.get_json(url.into()).await
    }

    async fn bearer_token(&self) -> Result<String, ApiError> {
        self.current_token()
    }
}
