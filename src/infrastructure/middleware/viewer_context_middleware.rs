// ViewerContext Middleware - builds a ViewerContext from request headers
// and injects it into request extensions

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::infrastructure::{database::PageDatabase, viewer::ViewerContext};

/// Header carrying the authenticated user's id. Authentication itself happens
/// upstream; this layer only loads the user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Trait for application state that can load users
pub trait HasPageDatabase {
    fn database(&self) -> &Arc<PageDatabase>;
}

pub async fn viewer_context_middleware<T>(
    State(app_state): State<T>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError>
where
    T: HasPageDatabase + Clone + Send + Sync + 'static,
{
    let user_id = extract_user_id(request.headers())?;
    let viewer_context = create_viewer_context(user_id, app_state.database()).await?;

    request.extensions_mut().insert(viewer_context);
    Ok(next.run(request).await)
}

fn extract_user_id(headers: &HeaderMap) -> AppResult<Option<i64>> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("Malformed {} header", USER_ID_HEADER)))?;
    raw.trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("Malformed {} header", USER_ID_HEADER)))
}

async fn create_viewer_context(
    user_id: Option<i64>,
    database: &PageDatabase,
) -> AppResult<Arc<ViewerContext>> {
    let viewer_context = match user_id {
        Some(id) => match database.get_user(id).await? {
            Some(user) => ViewerContext::authenticated(user),
            None => {
                tracing::warn!(user_id = id, "Request for unknown user");
                return Err(AppError::Unauthorized(format!("Unknown user {}", id)));
            }
        },
        None => ViewerContext::anonymous(),
    };
    Ok(Arc::new(viewer_context))
}
