//! `ovd retry <id>` – re-queue a failed job from the earliest stage.

use anyhow::Result;

use ovd_core::ops;
use ovd_core::scheduler::Scheduler;

pub async fn run_retry(sched: &Scheduler, id: &str) -> Result<()> {
    if ops::retry(sched, id).await? {
        println!("Re-queued job {id}");
    } else {
        println!("Job {id} is not in a failed stage");
    }
    Ok(())
}
