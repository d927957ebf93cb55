//! Pipeline stages as an explicit enum with a total order.
//!
//! Stage membership is authoritative: a job id lives in exactly one stage
//! set at a time, and every transition is a locked move in the state store.

use serde::{Deserialize, Serialize};

/// One stage of the download pipeline, including terminal states.
///
/// The derived `Ord` follows pipeline order; failure states sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Validating,
    Validated,
    Preparing,
    Prepared,
    DownloadingImages,
    ImagesDownloaded,
    DownloadingFiles,
    Completed,
    Cancelled,
    Failed,
    FailedForbidden,
    FailedNotFound,
    FailedAuth,
}

impl Stage {
    /// Every stage, in pipeline order. Also the full universe of state-set
    /// names for orphan recovery and defensive removals.
    pub const ALL: [Stage; 14] = [
        Stage::Queued,
        Stage::Validating,
        Stage::Validated,
        Stage::Preparing,
        Stage::Prepared,
        Stage::DownloadingImages,
        Stage::ImagesDownloaded,
        Stage::DownloadingFiles,
        Stage::Completed,
        Stage::Cancelled,
        Stage::Failed,
        Stage::FailedForbidden,
        Stage::FailedNotFound,
        Stage::FailedAuth,
    ];

    /// Stages where a worker is (or should be) actively running.
    pub const ACTIVE: [Stage; 4] = [
        Stage::Validating,
        Stage::Preparing,
        Stage::DownloadingImages,
        Stage::DownloadingFiles,
    ];

    /// Terminal failure stages, kept separate so operators can retry selectively.
    pub const FAILURES: [Stage; 4] = [
        Stage::Failed,
        Stage::FailedForbidden,
        Stage::FailedNotFound,
        Stage::FailedAuth,
    ];

    /// Stable name used for the state-set file and lock.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Validating => "validating",
            Stage::Validated => "validated",
            Stage::Preparing => "preparing",
            Stage::Prepared => "prepared",
            Stage::DownloadingImages => "downloading_images",
            Stage::ImagesDownloaded => "images_downloaded",
            Stage::DownloadingFiles => "downloading_files",
            Stage::Completed => "completed",
            Stage::Cancelled => "cancelled",
            Stage::Failed => "failed",
            Stage::FailedForbidden => "failed_forbidden",
            Stage::FailedNotFound => "failed_not_found",
            Stage::FailedAuth => "failed_auth",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// True while a worker owns the job (in-flight stage).
    pub fn is_active(self) -> bool {
        Stage::ACTIVE.contains(&self)
    }

    /// True for stages a job never leaves without operator action.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled) || self.is_failure()
    }

    pub fn is_failure(self) -> bool {
        Stage::FAILURES.contains(&self)
    }

    /// Failure stage for an HTTP status code from the vendor or file endpoints.
    pub fn failure_for_status(code: u16) -> Stage {
        match code {
            401 => Stage::FailedAuth,
            403 => Stage::FailedForbidden,
            404 => Stage::FailedNotFound,
            _ => Stage::Failed,
        }
    }

    /// Rest stage an interrupted in-flight job is returned to on startup.
    /// `None` for stages that are already at rest.
    pub fn recovery_rest_stage(self) -> Option<Stage> {
        match self {
            Stage::Validating => Some(Stage::Queued),
            Stage::Preparing => Some(Stage::Validated),
            Stage::DownloadingImages => Some(Stage::Prepared),
            Stage::DownloadingFiles => Some(Stage::ImagesDownloaded),
            _ => None,
        }
    }
}
