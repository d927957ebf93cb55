//! `ovd status` – show all jobs and their stages.

use anyhow::Result;
use std::sync::Arc;

use ovd_core::context::Context;

pub async fn run_status(ctx: &Arc<Context>) -> Result<()> {
    let jobs = ctx.registry.jobs();
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!("{:<12} {:<20} {:>4}  {}", "ID", "STAGE", "PROG", "STATUS");
    for job in jobs {
        println!(
            "{:<12} {:<20} {:>3}%  {}",
            job.id,
            job.stage.as_str(),
            job.progress,
            job.message
        );
        if let Some(error) = &job.error {
            println!("{:<12} {:<20}       last error: {}", "", "", error);
        }
    }

    let failures = ctx.store.unknown_failures().await?;
    if !failures.is_empty() {
        println!("\nUnknown failures logged: {}", failures.len());
    }
    Ok(())
}
