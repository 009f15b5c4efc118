// Recalculate Paths - rebuild sibling order and fix stored page paths

use page_manager::{app_state::AppState, config::Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(config).await?;

    let groups = state.pages.rebuild_tree().await?;
    tracing::info!(groups, "sibling order rebuilt");

    let repairs = state.pages.recalculate_paths().await?;
    if repairs.is_empty() {
        println!("Everything looks OK!");
    } else {
        for repair in &repairs {
            println!(
                "{} (id {}): /{} -> /{}",
                repair.title, repair.page_id, repair.old_path, repair.new_path
            );
        }
        println!("Fixed {} page path(s).", repairs.len());
    }

    Ok(())
}
