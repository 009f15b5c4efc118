// Public Interface - serve pages by materialized path

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::Value;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    infrastructure::middleware::Vc,
    models::Page,
    permissions::{PageAction, PrivacyContext, PrivacyResult},
    services::path_resolver::{resolve_homepage, resolve_path},
    templates::{page_context, template_for},
};

pub async fn homepage_handler(State(state): State<AppState>, vc: Vc) -> AppResult<Response> {
    let page = resolve_homepage(state.pages.database()).await?;
    render_page(&state, &vc, page).await
}

pub async fn page_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(path): AxumPath<String>,
) -> AppResult<Response> {
    let page = resolve_path(state.pages.database(), &path).await?;
    if page.is_homepage {
        // The homepage lives at "/" only.
        return Ok(found("/"));
    }
    render_page(&state, &vc, page).await
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

async fn render_page(state: &AppState, vc: &Vc, page: Page) -> AppResult<Response> {
    let ctx = PrivacyContext {
        user: vc.user.as_ref(),
        page: Some(&page),
        action: PageAction::View,
    };
    match state.privacy.evaluate(&ctx).await? {
        PrivacyResult::Allow => {}
        PrivacyResult::Deny(reason) => {
            tracing::debug!(page_id = page.id, user_id = vc.user_id(), %reason, "page hidden from viewer");
            return Err(AppError::Forbidden(reason));
        }
        PrivacyResult::Skip => return Err(AppError::Forbidden("Access denied.".to_string())),
    }

    let meta = state.pages.layout_meta(&page);
    if let Some(field) = meta.as_ref().and_then(|m| m.redirect_field.clone()) {
        let layout = state.pages.get_layout(&page).await?;
        let target = layout
            .as_ref()
            .and_then(|l| l.object.field(&field))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        return match target {
            Some(url) => Ok(found(&url)),
            None => Err(AppError::NotFound(format!("Redirect page \"{}\" has no target", page))),
        };
    }

    let template = template_for(meta.as_deref(), &state.config.pages.default_template);
    let context = page_context(&state.pages, &page).await?;
    let html = state.renderer.render(&template, context)?;
    Ok(Html(html).into_response())
}

pub fn create_public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(homepage_handler))
        .route("/{*path}", get(page_handler))
}
