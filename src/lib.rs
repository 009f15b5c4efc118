// Page Manager - hierarchical pages with pluggable layouts, draft copies and
// an admin for editing them

pub mod admin_interface;
pub mod app_state;
pub mod config;
pub mod error;
pub mod forms;
pub mod infrastructure;
pub mod layouts;
pub mod models;
pub mod permissions;
pub mod public_interface;
pub mod services;
pub mod templates;

use axum::Router;

use crate::app_state::AppState;
use crate::infrastructure::middleware::viewer_context_middleware;

// Re-exports for convenience
pub use error::{AppError, AppResult};

/// Admin and public routes behind the viewer-context middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(admin_interface::create_admin_router())
        .merge(public_interface::create_public_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            viewer_context_middleware::<AppState>,
        ))
        .with_state(state)
}
