//! One dispatch pass: fill both pools from the rest stages.

use anyhow::Result;

use crate::state::Stage;

use super::Scheduler;

/// Light-pool drain order: furthest-along rest stage first, so jobs close
/// to completion are never starved by fresh arrivals.
const LIGHT_PRIORITY: [(Stage, Stage); 3] = [
    (Stage::Prepared, Stage::DownloadingImages),
    (Stage::Validated, Stage::Preparing),
    (Stage::Queued, Stage::Validating),
];

pub(super) async fn dispatch(sched: &Scheduler) -> Result<()> {
    if sched.is_paused() {
        return Ok(());
    }

    let ctx = sched.context();
    let store = &ctx.store;
    let cfg = &ctx.config;

    let light_occupied = store.count(Stage::Validating).await?
        + store.count(Stage::Preparing).await?
        + store.count(Stage::DownloadingImages).await?;
    let mut light_slots = cfg.max_light_jobs.saturating_sub(light_occupied);

    for (rest, active) in LIGHT_PRIORITY {
        while light_slots > 0 {
            let Some(id) = store.pop(rest).await? else {
                break;
            };
            store.add(active, &id).await?;
            spawn_stage(sched, active, id);
            light_slots -= 1;
            // Yield between dispatches so a burst of ready jobs does not
            // monopolize the runtime.
            tokio::task::yield_now().await;
        }
    }

    if !sched.file_downloads_paused() {
        let heavy_occupied = store.count(Stage::DownloadingFiles).await?;
        let mut heavy_slots = cfg.max_file_downloads.saturating_sub(heavy_occupied);
        while heavy_slots > 0 {
            let Some(id) = store.pop(Stage::ImagesDownloaded).await? else {
                break;
            };
            store.add(Stage::DownloadingFiles, &id).await?;
            spawn_stage(sched, Stage::DownloadingFiles, id);
            heavy_slots -= 1;
            tokio::task::yield_now().await;
        }
    }

    Ok(())
}

/// Fire-and-forget: the scheduler never awaits a worker; the worker's
/// completion path re-invokes the scheduler.
fn spawn_stage(sched: &Scheduler, stage: Stage, id: String) {
    tracing::debug!("dispatching job {} into {}", id, stage.as_str());
    let sched = sched.clone();
    tokio::spawn(async move {
        crate::pipeline::run_stage(sched, stage, id).await;
    });
}
