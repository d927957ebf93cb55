//! `ovd search <query>` – free-text object search against the vendor API.

use anyhow::Result;
use std::sync::Arc;

use ovd_core::context::Context;

pub async fn run_search(ctx: &Arc<Context>, query: &str) -> Result<()> {
    let results = ctx.api.search(query).await?;
    if results.is_empty() {
        println!("No objects matched '{query}'");
        return Ok(());
    }
    println!("{:<12} {:<30} {}", "ID", "NAME", "DESIGNER");
    for object in results {
        println!("{:<12} {:<30} {}", object.id, object.name, object.designer);
    }
    Ok(())
}
