//! `ovd audit <id>` – validate a downloaded folder against its snapshot.

use anyhow::Result;

use ovd_core::ops;
use ovd_core::scheduler::Scheduler;

pub async fn run_audit(sched: &Scheduler, id: &str) -> Result<()> {
    let report = ops::audit(sched, id).await?;
    if report.is_valid {
        println!("Job {id}: folder is valid");
    } else {
        println!("Job {id}: {} issue(s) found", report.errors.len());
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    Ok(())
}
