//! Image stage: fetch every image reference through the batch worker.
//!
//! Image failures are never fatal to the job: partial results advance, and
//! a batch-mechanism failure degrades to one-by-one fetches on the calling
//! context so forward progress survives a broken worker.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::fetch::FetchJob;
use crate::layout::{self, IMAGES_DIR, NO_IMAGES_NOTE};
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
        .update_job(id, Stage::DownloadingImages, 30, "Downloading images", None)
        .await?;

    let object = ctx
        .registry
        .get_job(id)
        .and_then(|job| job.object)
        .ok_or_else(|| StageError::Other(anyhow::anyhow!("job {} has no metadata snapshot", id)))?;

    let dir = layout::object_dir(ctx.download_dir(), &object);
    let images_dir = dir.join(IMAGES_DIR);
    tokio::fs::create_dir_all(&images_dir)
        .await
        .map_err(|e| StageError::Other(e.into()))?;

    let mut already_present = 0usize;
    let mut batch = Vec::new();
    for (index, image) in object.images.iter().enumerate() {
        let Some(url) = image.best_url() else {
            tracing::debug!("job {}: image '{}' has no usable URL", id, image.name);
            continue;
        };
        let filename = layout::image_filename(index, url);
        if images_dir.join(&filename).is_file() {
            already_present += 1;
            continue;
        }
        batch.push(FetchJob {
            url: url.to_string(),
            filename,
        });
    }

    let headers = HashMap::new();
    let mut downloaded = already_present;
    if !batch.is_empty() {
        let batch_result = tokio::select! {
            _ = token.cancelled() => return Err(StageError::Cancelled),
            result = ctx.fetcher.fetch_batch(batch.clone(), &headers) => result,
        };

        match batch_result {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome.result {
                        Ok(bytes) => {
                            tokio::fs::write(images_dir.join(&outcome.filename), &bytes)
                                .await
                                .map_err(|e| StageError::Other(e.into()))?;
                            downloaded += 1;
                        }
                        Err(reason) => {
                            tracing::warn!("job {}: image {} failed: {}", id, outcome.filename, reason);
                        }
                    }
                }
            }
            Err(batch_err) => {
                // The batch mechanism itself broke; fall back to fetching
                // each image on this context.
                tracing::warn!(
                    "job {}: batch image fetch failed ({:#}); falling back to single fetches",
                    id,
                    batch_err
                );
                for fetch_job in batch {
                    if token.is_cancelled() {
                        return Err(StageError::Cancelled);
                    }
                    match ctx.fetcher.fetch_single(&fetch_job.url, &headers).await {
                        Ok(bytes) => {
                            tokio::fs::write(images_dir.join(&fetch_job.filename), &bytes)
                                .await
                                .map_err(|e| StageError::Other(e.into()))?;
                            downloaded += 1;
                        }
                        Err(reason) => {
                            tracing::warn!(
                                "job {}: image {} failed: {}",
                                id,
                                fetch_job.filename,
                                reason
                            );
                        }
                    }
                }
            }
        }
    }

    if downloaded == 0 && !object.images.is_empty() {
        tokio::fs::write(
            images_dir.join(NO_IMAGES_NOTE),
            "No images could be downloaded for this object; none of the declared URLs were available.\n",
        )
        .await
        .map_err(|e| StageError::Other(e.into()))?;
    }

    if token.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    ctx.store
        .move_id(Stage::DownloadingImages, Stage::ImagesDownloaded, id)
        .await?;
    ctx.registry
        .update_job(
            id,
            Stage::ImagesDownloaded,
            rest_progress(Stage::ImagesDownloaded),
            &format!("Images ready ({}/{})", downloaded, object.images.len()),
            None,
        )
        .await?;
    Ok(())
}
