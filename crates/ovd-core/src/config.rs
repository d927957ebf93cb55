use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::state::LockOptions;

/// Hard ceiling on a single fetched file: 1.5 GiB. Anything larger is
/// rejected instead of allocated.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1_610_612_736;

/// Global configuration loaded from `~/.config/ovd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvdConfig {
    /// Base directory for downloaded objects. Defaults to `downloads/`
    /// under the data dir when unset.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Heavy pool: maximum concurrent file-archive downloads.
    pub max_file_downloads: usize,
    /// Light pool: maximum concurrent validate/prepare/image jobs combined.
    pub max_light_jobs: usize,
    /// Vendor API base URL.
    pub api_base_url: String,
    /// Bearer token for the vendor API, if already obtained.
    #[serde(default)]
    pub api_token: Option<String>,
    /// State-set lock acquisition timeout in seconds.
    pub lock_timeout_secs: u64,
    /// Poll interval between lock acquisition attempts, milliseconds.
    pub lock_retry_ms: u64,
    /// A held lock older than this is assumed crashed and reclaimed, seconds.
    pub lock_stale_after_secs: u64,
    /// Per-file download size ceiling in bytes.
    pub max_file_bytes: u64,
}

impl Default for OvdConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_file_downloads: 2,
            max_light_jobs: 4,
            api_base_url: "https://api.objectvault.example/v1".to_string(),
            api_token: None,
            lock_timeout_secs: 10,
            lock_retry_ms: 50,
            lock_stale_after_secs: 60,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl OvdConfig {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_secs(self.lock_timeout_secs),
            retry_interval: Duration::from_millis(self.lock_retry_ms),
            stale_after: Duration::from_secs(self.lock_stale_after_secs),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ovd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Private data directory holding `states/`, `jobs/`, `locks/`, and the
/// default download location.
pub fn data_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ovd")?;
    Ok(xdg_dirs.get_data_home())
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<OvdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = OvdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: OvdConfig = toml::from_str(&data)?;
    Ok(cfg)
}
