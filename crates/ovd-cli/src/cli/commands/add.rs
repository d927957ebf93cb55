//! `ovd add <id>` – queue one object for download.

use anyhow::Result;

use ovd_core::ops;
use ovd_core::scheduler::Scheduler;

pub async fn run_add(sched: &Scheduler, id: &str) -> Result<()> {
    let job = ops::enqueue(sched, id).await?;
    println!("Queued object {} ({})", job.id, job.stage.as_str());
    Ok(())
}
