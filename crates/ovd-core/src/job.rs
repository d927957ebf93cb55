//! The unit of work: one external object id moving through the pipeline.

use serde::{Deserialize, Serialize};

use crate::api::ObjectDetails;
use crate::state::Stage;

/// One job record. Owned by the [`crate::registry::JobRegistry`] and
/// mirrored 1:1 into a persisted file; mutated only through registry
/// accessors, never directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque external object id.
    pub id: String,
    /// Best-known metadata snapshot; `None` until prepare fetches it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectDetails>,
    /// Current pipeline stage (mirrors stage-set membership).
    pub stage: Stage,
    /// 0–100.
    pub progress: u8,
    /// Human-readable progress line for the UI.
    #[serde(default)]
    pub message: String,
    /// Last error text, if the job has failed at least once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Job {
        Job {
            id: id.into(),
            object: None,
            stage: Stage::Queued,
            progress: 0,
            message: "Queued".to_string(),
            error: None,
        }
    }

    /// Sort key for stable UI listings: metadata name when known, id otherwise.
    pub fn display_name(&self) -> &str {
        match &self.object {
            Some(object) if !object.name.is_empty() => &object.name,
            _ => &self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_queued_at_zero() {
        let job = Job::new("12345");
        assert_eq!(job.stage, Stage::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.object.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn display_name_prefers_metadata() {
        let mut job = Job::new("12345");
        assert_eq!(job.display_name(), "12345");
        job.object = Some(ObjectDetails {
            id: "12345".into(),
            name: "Articulated Dragon".into(),
            designer: "mx_print".into(),
            ..Default::default()
        });
        assert_eq!(job.display_name(), "Articulated Dragon");
    }
}
