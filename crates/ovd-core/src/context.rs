//! Dependency-injected service bundle.
//!
//! One `Context` per process, constructed at startup and passed down the
//! call graph. Tests build one over a temp dir with fake API and fetcher
//! implementations; nothing in the engine reaches for ambient globals.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::ObjectApi;
use crate::config::OvdConfig;
use crate::fetch::FetchWorker;
use crate::registry::JobRegistry;
use crate::state::StateStore;

pub struct Context {
    pub config: OvdConfig,
    pub store: StateStore,
    pub registry: JobRegistry,
    pub api: Arc<dyn ObjectApi>,
    pub fetcher: Arc<dyn FetchWorker>,
    download_dir: PathBuf,
}

impl Context {
    /// Open the store under `data_dir`, hydrate the registry, and bundle
    /// the injected collaborators.
    pub async fn open(
        config: OvdConfig,
        data_dir: PathBuf,
        api: Arc<dyn ObjectApi>,
        fetcher: Arc<dyn FetchWorker>,
    ) -> Result<Arc<Context>> {
        let store = StateStore::open(&data_dir, config.lock_options()).await?;
        let registry = JobRegistry::hydrate(store.clone()).await?;
        let download_dir = config
            .download_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("downloads"));
        tokio::fs::create_dir_all(&download_dir).await?;
        Ok(Arc::new(Context {
            config,
            store,
            registry,
            api,
            fetcher,
            download_dir,
        }))
    }

    /// Base directory object folders are created under.
    pub fn download_dir(&self) -> &PathBuf {
        &self.download_dir
    }
}
