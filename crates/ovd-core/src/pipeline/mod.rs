//! Stage workers: one async procedure per active pipeline stage.
//!
//! Every worker follows the same shape: register an abort token, mark the
//! job as in-stage, do the work, move the id forward on success, classify
//! and route on error. The harness here guarantees the token is released
//! and the scheduler re-invoked in all cases, so nothing can escape to
//! crash the dispatch loop and no completion is ever missed.

mod fetch_files;
mod fetch_images;
mod prepare;
mod validate;

use crate::api::ApiError;
use crate::scheduler::Scheduler;
use crate::state::Stage;

/// Classified stage-worker failure, translated into a stage transition by
/// [`route_failure`].
#[derive(Debug)]
pub(crate) enum StageError {
    /// Deliberate cancellation; not an error. The canceller already moved
    /// the id and dropped the record, so routing does nothing.
    Cancelled,
    /// Classified vendor API failure.
    Api(ApiError),
    /// Status-coded failure from a file/image endpoint.
    Http(u16),
    /// Anything else; logged to the unknown-failure set.
    Other(anyhow::Error),
}

impl From<anyhow::Error> for StageError {
    fn from(e: anyhow::Error) -> StageError {
        StageError::Other(e)
    }
}

impl From<ApiError> for StageError {
    fn from(e: ApiError) -> StageError {
        StageError::Api(e)
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Cancelled => write!(f, "cancelled"),
            StageError::Api(e) => write!(f, "{}", e),
            StageError::Http(code) => write!(f, "HTTP {}", code),
            StageError::Other(e) => write!(f, "{:#}", e),
        }
    }
}

/// Run one stage worker to completion. Spawned fire-and-forget by the
/// scheduler; must never panic or return early without re-scheduling.
pub(crate) async fn run_stage(sched: Scheduler, stage: Stage, id: String) {
    let token = sched.register_cancel(&id);

    let result = match stage {
        Stage::Validating => validate::run(&sched, &id, &token).await,
        Stage::Preparing => prepare::run(&sched, &id, &token).await,
        Stage::DownloadingImages => fetch_images::run(&sched, &id, &token).await,
        Stage::DownloadingFiles => fetch_files::run(&sched, &id, &token).await,
        other => {
            tracing::error!("stage worker spawned for non-active stage {}", other.as_str());
            Ok(())
        }
    };

    if let Err(err) = result {
        if let Err(routing_err) = route_failure(&sched, stage, &id, err).await {
            tracing::error!("failure routing for job {} failed: {:#}", id, routing_err);
        }
    }

    sched.release_cancel(&id);
    sched.schedule().await;
}

/// Translate a stage failure into a transition plus registry update,
/// applying the taxonomy's side effects (auth pauses everything, forbidden
/// pauses the heavy pool) in the same breath as the move.
async fn route_failure(
    sched: &Scheduler,
    from: Stage,
    id: &str,
    err: StageError,
) -> anyhow::Result<()> {
    let ctx = sched.context();
    let message = err.to_string();

    let target = match err {
        StageError::Cancelled => {
            tracing::debug!("job {} cancelled during {}", id, from.as_str());
            return Ok(());
        }
        StageError::Api(ApiError::Auth) => {
            sched.pause_all();
            Stage::FailedAuth
        }
        StageError::Api(ApiError::Status(code)) | StageError::Http(code) => {
            match Stage::failure_for_status(code) {
                Stage::FailedAuth => {
                    sched.pause_all();
                    Stage::FailedAuth
                }
                Stage::FailedForbidden => {
                    // Fail this job and stop siblings retrying the same
                    // closed door, together.
                    sched.pause_file_downloads();
                    Stage::FailedForbidden
                }
                other => other,
            }
        }
        StageError::Api(ApiError::Network(_)) => Stage::Failed,
        StageError::Other(ref e) => {
            // Unknown failures keep their raw message in the diagnostic log
            // so the job never silently vanishes from every set.
            ctx.store.add_unknown_failure(id, &format!("{:#}", e)).await?;
            Stage::Failed
        }
    };

    tracing::warn!(
        "job {} failed in {}: {} -> {}",
        id,
        from.as_str(),
        message,
        target.as_str()
    );
    ctx.store.move_id(from, target, id).await?;
    let progress = ctx.registry.get_job(id).map(|j| j.progress).unwrap_or(0);
    ctx.registry
        .update_job(id, target, progress, &format!("Failed: {}", message), Some(message.clone()))
        .await?;
    Ok(())
}

/// Registry progress baseline for each rest stage, shared by the workers
/// and startup recovery.
pub(crate) fn rest_progress(stage: Stage) -> u8 {
    match stage {
        Stage::Queued => 0,
        Stage::Validated => 10,
        Stage::Prepared => 25,
        Stage::ImagesDownloaded => 60,
        Stage::Completed => 100,
        _ => 0,
    }
}
