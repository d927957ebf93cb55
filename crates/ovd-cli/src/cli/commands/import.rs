//! `ovd import <path>` – bulk-import a comma-separated id list.

use anyhow::Result;
use std::path::Path;

use ovd_core::ops;
use ovd_core::scheduler::Scheduler;

pub async fn run_import(sched: &Scheduler, path: &Path) -> Result<()> {
    let summary = ops::import_bulk(sched, path).await?;
    println!(
        "Imported: {} queued, {} retried, {} already completed, {} left in flight",
        summary.queued, summary.retried, summary.skipped_completed, summary.left_in_flight
    );
    Ok(())
}
