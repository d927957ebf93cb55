//! `ovd clear-completed` / `ovd clear-failed` – bulk-remove terminal jobs.

use anyhow::Result;
use std::sync::Arc;

use ovd_core::context::Context;

pub async fn run_clear_completed(ctx: &Arc<Context>) -> Result<()> {
    let cleared = ctx.registry.clear_completed().await?;
    println!("Cleared {cleared} completed job(s)");
    Ok(())
}

pub async fn run_clear_failed(ctx: &Arc<Context>) -> Result<()> {
    let cleared = ctx.registry.clear_failed().await?;
    println!("Cleared {cleared} failed job(s)");
    Ok(())
}
