//! File stage: download every declared file, extract archives, and write
//! the final metadata files.
//!
//! Files already on disk are skipped so a retried job resumes instead of
//! re-downloading. A 403 fails the job into the forbidden set and pauses
//! the heavy pool in the same routing step; an HTML body where a binary
//! was expected is a hard error, not a silent save.

use std::collections::HashMap;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use crate::fetch::{archive, sniff, ArchiveEntry, FetchError};
use crate::layout::{self, sanitize_segment, FILES_DIR};
use crate::scheduler::Scheduler;
use crate::state::Stage;

use super::StageError;

pub(super) async fn run(
    sched: &Scheduler,
    id: &str,
    token: &CancellationToken,
) -> Result<(), StageError> {
    let ctx = sched.context();
    ctx.registry
        .update_job(id, Stage::DownloadingFiles, 65, "Downloading files", None)
        .await?;

    let object = ctx
        .registry
        .get_job(id)
        .and_then(|job| job.object)
        .ok_or_else(|| StageError::Other(anyhow!("job {} has no metadata snapshot", id)))?;

    let dir = layout::object_dir(ctx.download_dir(), &object);
    let files_dir = dir.join(FILES_DIR);
    tokio::fs::create_dir_all(&files_dir)
        .await
        .map_err(|e| StageError::Other(e.into()))?;

    // The file endpoints take the token as a query parameter; a missing
    // token is fine for vendors with public downloads.
    let access_token = ctx.api.bearer_token().await.ok();
    let headers = HashMap::new();

    let expected: Vec<_> = object.downloadable_files().cloned().collect();
    let total = expected.len().max(1);
    for (index, file) in expected.iter().enumerate() {
        if token.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let dest = files_dir.join(sanitize_segment(&file.name));
        if dest.is_file() {
            tracing::debug!("job {}: {} already present, skipping", id, file.name);
            continue;
        }

        let Some(raw_url) = file.download_url.as_deref() else {
            continue;
        };
        let url = layout::with_access_token(raw_url, access_token.as_deref());

        let bytes = tokio::select! {
            _ = token.cancelled() => return Err(StageError::Cancelled),
            result = ctx.fetcher.fetch_single(&url, &headers) => result,
        }
        .map_err(|e| match e {
            FetchError::Status(code) => StageError::Http(code),
            FetchError::TooLarge { .. } => StageError::Other(anyhow!("{}: {}", file.name, e)),
            FetchError::Network(reason) => {
                StageError::Other(anyhow!("fetch {}: {}", file.name, reason))
            }
        })?;

        if sniff::looks_like_html(&bytes) {
            return Err(StageError::Other(anyhow!(
                "HTML response where binary was expected: {}",
                file.name
            )));
        }

        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|e| StageError::Other(e.into()))?;

        if file.name.to_lowercase().ends_with(".zip") {
            let entries = extract_with_fallback(sched, id, &bytes).await?;
            for entry in entries {
                let target = files_dir.join(&entry.path);
                if target.is_file() {
                    continue;
                }
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StageError::Other(e.into()))?;
                }
                tokio::fs::write(&target, &entry.bytes)
                    .await
                    .map_err(|e| StageError::Other(e.into()))?;
            }
        }

        let progress = 65 + (30 * (index + 1) / total) as u8;
        ctx.registry
            .update_job(
                id,
                Stage::DownloadingFiles,
                progress,
                &format!("Downloaded {}", file.name),
                None,
            )
            .await?;
    }

    layout::write_notes(&dir, &object).await?;
    layout::write_snapshot(&dir, &object).await?;

    if token.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    ctx.store
        .move_id(Stage::DownloadingFiles, Stage::Completed, id)
        .await?;
    ctx.registry
        .update_job(id, Stage::Completed, 100, "Completed", None)
        .await?;
    Ok(())
}

/// Extraction goes through the worker; if the worker mechanism itself dies
/// the identical extraction runs inline so a good download is never lost
/// to a broken offload.
async fn extract_with_fallback(
    sched: &Scheduler,
    id: &str,
    bytes: &[u8],
) -> Result<Vec<ArchiveEntry>, StageError> {
    match sched.context().fetcher.extract_archive(bytes.to_vec()).await {
        Ok(entries) => Ok(entries),
        Err(worker_err) => {
            tracing::warn!(
                "job {}: archive worker failed ({:#}); extracting inline",
                id,
                worker_err
            );
            archive::extract_zip(bytes).map_err(StageError::Other)
        }
    }
}
