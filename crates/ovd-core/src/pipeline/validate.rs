//! Validate stage: decide whether the download already exists and is good.
//!
//! A previously-completed folder that passes validation short-circuits the
//! whole pipeline; one that fails is deleted so the rebuild starts clean.

use tokio_util::sync::CancellationToken;

use crate::layout;
use crate::scheduler::Scheduler;
use crate::state::Stage;
use crate::validate::validate_folder_offloaded;

use super::{rest_progress, StageError};

pub(super) async fn run(
    sched: &Scheduler,
    id: &str,
    token: &CancellationToken,
) -> Result<(), StageError> {
    let ctx = sched.context();
    ctx.registry
        .update_job(id, Stage::Validating, 5, "Checking existing download", None)
        .await?;

    if let Some(object) = ctx.registry.get_job(id).and_then(|job| job.object) {
        let dir = layout::object_dir(ctx.download_dir(), &object);
        if dir.is_dir() {
            let report = validate_folder_offloaded(&object, &dir).await;
            if token.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            if report.is_valid {
                ctx.store.move_id(Stage::Validating, Stage::Completed, id).await?;
                ctx.registry
                    .update_job(id, Stage::Completed, 100, "Already downloaded and valid", None)
                    .await?;
                return Ok(());
            }
            tracing::info!(
                "job {}: existing folder fails validation ({} issue(s)); re-downloading",
                id,
                report.errors.len()
            );
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| StageError::Other(e.into()))?;
        }
    }

    if token.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    ctx.store.move_id(Stage::Validating, Stage::Validated, id).await?;
    ctx.registry
        .update_job(
            id,
            Stage::Validated,
            rest_progress(Stage::Validated),
            "Awaiting preparation",
            None,
        )
        .await?;
    Ok(())
}
