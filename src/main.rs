// Page Manager Server

use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use page_manager::{app_state::AppState, config::Config, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;
    tracing::info!(layouts = app_state.pages.layouts().len(), "page manager ready");

    let app = create_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.server_address();
    tracing::info!(%addr, "Page Manager starting");
    println!("📋 Routes:");
    println!("  GET       /                              - Homepage");
    println!("  GET       /{{path}}/                       - Page by path");
    println!("  GET       /admin/                        - Page tree");
    println!("  GET|POST  /admin/pages/add               - Add page");
    println!("  GET|POST  /admin/layouts/{{id}}            - Edit page and layout");
    println!("  GET|POST  /admin/pages/{{id}}/copy         - Draft copy");
    println!("  GET|POST  /admin/pages/{{id}}/merge        - Merge draft");
    println!("  GET|POST  /admin/pages/{{id}}/delete       - Delete page");
    println!("  POST      /admin/pages/parentsorders     - Reorder tree");

    let listener = TcpListener::bind(addr.as_str()).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
