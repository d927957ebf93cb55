//! Prepare stage: fetch authoritative metadata and create the folder
//! hierarchy. The snapshot is persisted as soon as it arrives so a crash
//! later in the pipeline still leaves a recoverable folder/name mapping.

use tokio_util::sync::CancellationToken;

use crate::layout;
use crate::scheduler::Scheduler;
use crate::state::Stage;

use super::{rest_progress, StageError};

pub(super) async fn run(
    sched: &Scheduler,
    id: &str,
    token: &CancellationToken,
) -> Result<(), StageError> {
    let ctx = sched.context();
    ctx.registry
        .update_job(id, Stage::Preparing, 15, "Fetching object metadata", None)
        .await?;

    let object = tokio::select! {
        _ = token.cancelled() => return Err(StageError::Cancelled),
        result = ctx.api.object_by_id(id) => result.map_err(StageError::Api)?,
    };

    ctx.registry.update_job_object(id, object.clone()).await?;

    let dir = layout::object_dir(ctx.download_dir(), &object);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| StageError::Other(e.into()))?;

    if token.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    ctx.store.move_id(Stage::Preparing, Stage::Prepared, id).await?;
    ctx.registry
        .update_job(
            id,
            Stage::Prepared,
            rest_progress(Stage::Prepared),
            &format!("Prepared '{}'", object.name),
            None,
        )
        .await?;
    Ok(())
}
