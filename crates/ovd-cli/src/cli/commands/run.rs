//! `ovd run` – recover interrupted work and drive the pipeline to empty.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use ovd_core::context::Context;
use ovd_core::ops;
use ovd_core::scheduler::Scheduler;
use ovd_core::state::Stage;

/// Stages that mean there is still work to drive.
const PENDING: [Stage; 8] = [
    Stage::Queued,
    Stage::Validating,
    Stage::Validated,
    Stage::Preparing,
    Stage::Prepared,
    Stage::DownloadingImages,
    Stage::ImagesDownloaded,
    Stage::DownloadingFiles,
];

pub async fn run_pipeline(ctx: &Arc<Context>, sched: &Scheduler) -> Result<()> {
    let recovered = ops::recover(sched).await?;
    if recovered > 0 {
        println!("Recovered {recovered} interrupted job(s)");
    }
    sched.schedule().await;

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut pending = 0usize;
        let mut heavy_only = 0usize;
        for stage in PENDING {
            let count = ctx.store.count(stage).await?;
            pending += count;
            if matches!(stage, Stage::ImagesDownloaded | Stage::DownloadingFiles) {
                heavy_only += count;
            }
        }

        if pending == 0 {
            break;
        }
        if sched.is_paused() {
            println!("Dispatch is paused (reauthentication required); stopping.");
            break;
        }
        if sched.file_downloads_paused() && pending == heavy_only {
            println!("File downloads are paused and only file work remains; stopping.");
            break;
        }

        // Workers re-trigger the scheduler themselves; this nudge only
        // covers externally mutated state (another process enqueueing).
        sched.schedule().await;
    }

    let completed = ctx.store.count(Stage::Completed).await?;
    let failed: usize = {
        let mut n = 0;
        for stage in Stage::FAILURES {
            n += ctx.store.count(stage).await?;
        }
        n
    };
    println!("Done: {completed} completed, {failed} failed");
    Ok(())
}
