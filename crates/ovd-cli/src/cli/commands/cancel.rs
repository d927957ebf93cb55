//! `ovd cancel <id>` – cancel a job wherever it currently is.

use anyhow::Result;

use ovd_core::ops;
use ovd_core::scheduler::Scheduler;

pub async fn run_cancel(sched: &Scheduler, id: &str) -> Result<()> {
    if ops::cancel(sched, id).await? {
        println!("Cancelled job {id}");
    } else {
        println!("Job {id} was not in any cancellable stage");
    }
    Ok(())
}
