//! Operator surface: enqueue, bulk import, cancel, retry, audit, and
//! startup recovery.

use anyhow::{Context as _, Result};
use std::path::Path;

use crate::job::Job;
use crate::layout;
use crate::pipeline::rest_progress;
use crate::scheduler::Scheduler;
use crate::state::Stage;
use crate::validate::{validate_folder_offloaded, ValidationReport};

/// Stages a cancellation may pull a job out of: everything non-terminal.
const CANCELLABLE: [Stage; 8] = [
    Stage::Queued,
    Stage::Validating,
    Stage::Validated,
    Stage::Preparing,
    Stage::Prepared,
    Stage::DownloadingImages,
    Stage::ImagesDownloaded,
    Stage::DownloadingFiles,
];

/// What a bulk import did with each id in the file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub queued: usize,
    pub retried: usize,
    pub skipped_completed: usize,
    pub left_in_flight: usize,
}

/// Enqueue one object id. Ids the store already knows are not re-queued;
/// the existing (or fresh) registry record is returned either way.
pub async fn enqueue(sched: &Scheduler, id: &str) -> Result<Job> {
    let ctx = sched.context();
    let id = id.trim();
    anyhow::ensure!(!id.is_empty(), "empty object id");

    let known = ctx.store.all_known_ids().await?.contains(id);
    let job = ctx.registry.add_job(id).await?;
    if !known {
        ctx.store.add(Stage::Queued, id).await?;
        tracing::info!("enqueued object {}", id);
    }
    sched.schedule().await;
    Ok(job)
}

/// Import a flat comma-separated id list. Completed ids are skipped,
/// failed ids reset and retried, anything else in flight is left alone.
pub async fn import_bulk(sched: &Scheduler, path: &Path) -> Result<ImportSummary> {
    let ctx = sched.context();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read bulk input {}", path.display()))?;

    let mut summary = ImportSummary::default();
    for raw in text.split(',') {
        let id = raw.trim();
        if id.is_empty() {
            continue;
        }
        if ctx.store.contains(Stage::Completed, id).await? {
            summary.skipped_completed += 1;
            continue;
        }
        let mut failed = false;
        for stage in Stage::FAILURES {
            if ctx.store.contains(stage, id).await? {
                failed = true;
                break;
            }
        }
        if failed {
            reset_failed(sched, id).await?;
            summary.retried += 1;
        } else if ctx.store.all_known_ids().await?.contains(id) {
            summary.left_in_flight += 1;
        } else {
            ctx.registry.add_job(id).await?;
            ctx.store.add(Stage::Queued, id).await?;
            summary.queued += 1;
        }
    }

    tracing::info!(
        "bulk import: {} queued, {} retried, {} already completed, {} in flight",
        summary.queued,
        summary.retried,
        summary.skipped_completed,
        summary.left_in_flight
    );
    sched.schedule().await;
    Ok(summary)
}

/// Cancel a job wherever it currently is: abort in-flight work, move the
/// id into the cancelled set, and drop its registry record. Cancellation
/// bypasses error classification entirely.
pub async fn cancel(sched: &Scheduler, id: &str) -> Result<bool> {
    let ctx = sched.context();
    if let Some(token) = sched.cancel_token(id) {
        token.cancel();
    }
    let moved = ctx.store.move_across(&CANCELLABLE, Stage::Cancelled, id).await?;
    ctx.registry.forget_job(id).await?;
    if moved {
        tracing::info!("cancelled job {}", id);
    }
    sched.schedule().await;
    Ok(moved)
}

/// Retry a failed job: clear its failure membership and re-queue from the
/// earliest stage. Idempotent skip-if-exists checks downstream reuse any
/// partially-completed folder contents.
pub async fn retry(sched: &Scheduler, id: &str) -> Result<bool> {
    let moved = reset_failed(sched, id).await?;
    sched.schedule().await;
    Ok(moved)
}

async fn reset_failed(sched: &Scheduler, id: &str) -> Result<bool> {
    let ctx = sched.context();
    let moved = ctx.store.move_across(&Stage::FAILURES, Stage::Queued, id).await?;
    if moved {
        ctx.registry
            .update_job(id, Stage::Queued, 0, "Re-queued for retry", None)
            .await?;
    }
    Ok(moved)
}

/// Operator-triggered audit of a (supposedly) completed download.
pub async fn audit(sched: &Scheduler, id: &str) -> Result<ValidationReport> {
    let ctx = sched.context();
    let job = ctx
        .registry
        .get_job(id)
        .with_context(|| format!("unknown job {}", id))?;
    let object = job
        .object
        .with_context(|| format!("job {} has no metadata snapshot to audit against", id))?;
    let dir = layout::object_dir(ctx.download_dir(), &object);
    Ok(validate_folder_offloaded(&object, &dir).await)
}

/// Startup recovery: jobs stranded in an active stage by a crash are moved
/// back to the preceding rest stage, and persisted job files with no
/// stage-set membership (orphans from a crash mid-transition) are
/// re-queued. Returns how many jobs were touched.
pub async fn recover(sched: &Scheduler) -> Result<usize> {
    let ctx = sched.context();
    let mut recovered = 0;

    for stage in Stage::ACTIVE {
        let rest = stage
            .recovery_rest_stage()
            .expect("every active stage has a rest mapping");
        for id in ctx.store.get_all(stage).await? {
            tracing::warn!(
                "job {} was in-flight ({}) at shutdown; returning to {}",
                id,
                stage.as_str(),
                rest.as_str()
            );
            ctx.store.move_id(stage, rest, &id).await?;
            ctx.registry
                .update_job(&id, rest, rest_progress(rest), "Recovered after restart", None)
                .await?;
            recovered += 1;
        }
    }

    let known = ctx.store.all_known_ids().await?;
    for id in ctx.store.persisted_job_ids().await? {
        if !known.contains(&id) {
            tracing::warn!("job {} has a record but no stage membership; re-queueing", id);
            ctx.store.add(Stage::Queued, &id).await?;
            ctx.registry
                .update_job(&id, Stage::Queued, 0, "Recovered orphan; re-queued", None)
                .await?;
            recovered += 1;
        }
    }

    sched.schedule().await;
    Ok(recovered)
}
