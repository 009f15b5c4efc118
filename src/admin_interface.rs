// Admin Interface - page tree, combined page/layout forms, draft copy and
// merge screens, deletion and bulk reordering

use async_trait::async_trait;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    forms::{check_draft_copy_status, check_restricted_fields, PageForm},
    infrastructure::middleware::Vc,
    layouts::{LayoutMeta, LayoutRegistry},
    models::{Page, PageFilter, PageStatus, User, Visibility},
    permissions::{get_permissions, lookup_function, NodePermissions, PageAction, PrivacyContext, PrivacyResult},
    services::{CopyRejection, PageMove},
};

pub const ADMIN_INDEX: &str = "/admin/";
pub const PAGE_ADD_URL: &str = "/admin/pages/add";

/// Site-specific admin behavior.
#[async_trait]
pub trait PageAdmin: Send + Sync {
    /// Layouts offered on the add screen.
    fn layout_choices(&self, layouts: &LayoutRegistry) -> Vec<Arc<LayoutMeta>> {
        layouts.iter().cloned().collect()
    }

    /// Pages shown in the admin tree.
    fn tree_filter(&self) -> PageFilter {
        PageFilter::All
    }

    /// Runs after a page is saved from the admin.
    async fn after_save(&self, _user: &User, _page: &Page, _created: bool) -> AppResult<()> {
        Ok(())
    }
}

pub struct DefaultPageAdmin;

impl PageAdmin for DefaultPageAdmin {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Success,
    Info,
    Error,
}

/// 303 to `location` carrying the message for the next screen.
pub fn redirect_with_message(location: &str, message: impl Into<String>, level: MessageLevel) -> Response {
    let body = Json(json!({
        "redirect": location,
        "message": message.into(),
        "level": level,
    }));
    (StatusCode::SEE_OTHER, [(header::LOCATION, location.to_string())], body).into_response()
}

pub fn layout_change_url(layout_id: i64) -> String {
    format!("/admin/layouts/{}", layout_id)
}

fn page_change_url(page: &Page) -> String {
    match page.layout_id {
        Some(layout_id) => layout_change_url(layout_id),
        None => format!("/admin/pages/{}", page.id),
    }
}

fn require_staff(vc: &Vc) -> AppResult<&User> {
    match &vc.user {
        None => Err(AppError::Unauthorized("Log in to use the page admin".to_string())),
        Some(user) if user.is_staff || user.is_superuser => Ok(user),
        Some(_) => Err(AppError::Forbidden("Staff access required".to_string())),
    }
}

async fn authorize(state: &AppState, user: &User, page: Option<&Page>, action: PageAction) -> AppResult<()> {
    let ctx = PrivacyContext {
        user: Some(user),
        page,
        action,
    };
    match state.privacy.evaluate(&ctx).await? {
        PrivacyResult::Allow => Ok(()),
        PrivacyResult::Deny(reason) => {
            tracing::info!(user_id = user.id, page_id = page.map(|p| p.id), ?action, %reason, "admin access denied");
            Err(AppError::Forbidden(reason))
        }
        PrivacyResult::Skip => Err(AppError::Forbidden("Access denied.".to_string())),
    }
}

// Index

#[derive(Debug, Serialize)]
struct TreeNode {
    #[serde(flatten)]
    page: Page,
    url: String,
    change_url: String,
    permissions: NodePermissions,
    children: Vec<TreeNode>,
}

fn build_tree(user: &User, parent_id: Option<i64>, by_parent: &mut BTreeMap<Option<i64>, Vec<Page>>) -> Vec<TreeNode> {
    let mut siblings = by_parent.remove(&parent_id).unwrap_or_default();
    siblings.sort_by_key(|p| (p.sort_order, p.id));
    siblings
        .into_iter()
        .map(|page| {
            let children = build_tree(user, Some(page.id), by_parent);
            TreeNode {
                url: page.absolute_url(),
                change_url: page_change_url(&page),
                permissions: NodePermissions::for_page(Some(user), &page),
                children,
                page,
            }
        })
        .collect()
}

pub async fn index_handler(State(state): State<AppState>, vc: Vc) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    let pages = state.pages.list_pages(state.admin.tree_filter()).await?;
    let mut by_parent: BTreeMap<Option<i64>, Vec<Page>> = BTreeMap::new();
    for page in pages {
        by_parent.entry(page.parent_id).or_default().push(page);
    }
    let tree = build_tree(user, None, &mut by_parent);
    let lookup = lookup_function(Some(user), &get_permissions());
    Ok(Json(json!({
        "pages": tree,
        "can_add": lookup("add_page"),
    })))
}

pub async fn pages_changelist_handler() -> Redirect {
    Redirect::to(ADMIN_INDEX)
}

pub async fn layouts_add_handler() -> Redirect {
    Redirect::to(PAGE_ADD_URL)
}

// Add

#[derive(Debug, Deserialize)]
pub struct AddQuery {
    pub parent: Option<i64>,
}

pub async fn add_form_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(query): Query<AddQuery>,
) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    authorize(&state, user, None, PageAction::Add).await?;
    let lookup = lookup_function(Some(user), &get_permissions());
    let layouts = state.admin.layout_choices(state.pages.layouts());
    let layouts: Vec<&LayoutMeta> = layouts.iter().map(|meta| meta.as_ref()).collect();
    Ok(Json(json!({
        "page_layouts": layouts,
        "parent": query.parent,
        "defaults": {
            "status": PageStatus::default(),
            "visibility": Visibility::default(),
        },
        "can_change_status": lookup("change_status"),
        "can_change_visibility": lookup("change_visibility"),
    })))
}

pub async fn add_handler(State(state): State<AppState>, vc: Vc, Json(form): Json<PageForm>) -> AppResult<Response> {
    let user = require_staff(&vc)?;
    authorize(&state, user, None, PageAction::Add).await?;

    let lookup = lookup_function(Some(user), &get_permissions());
    let defaults = (PageStatus::default(), Visibility::default());
    if let Err(message) = check_restricted_fields(&lookup, defaults, form.submitted(defaults)) {
        return Ok(redirect_with_message(PAGE_ADD_URL, message, MessageLevel::Error));
    }

    let continue_editing = form.continue_editing;
    let add_another = form.add_another;
    let page = state.pages.create_page(form.into_new_page()?).await?;
    state.admin.after_save(user, &page, true).await?;

    let msg = format!("The page \"{}\" was added successfully.", page);
    Ok(if continue_editing {
        redirect_with_message(&page_change_url(&page), format!("{} You may edit it again below.", msg), MessageLevel::Success)
    } else if add_another {
        redirect_with_message(PAGE_ADD_URL, format!("{} You may add another page below.", msg), MessageLevel::Success)
    } else {
        redirect_with_message(ADMIN_INDEX, msg, MessageLevel::Success)
    })
}

// Change

pub async fn page_change_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Redirect> {
    require_staff(&vc)?;
    let page = state.pages.get_page(id).await?;
    let layout_id = page
        .layout_id
        .ok_or_else(|| AppError::NotFound(format!("Page {} has no layout", page.id)))?;
    Ok(Redirect::to(&layout_change_url(layout_id)))
}

pub async fn layout_form_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(layout_id): AxumPath<i64>,
) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    let page = state.pages.get_page_by_layout(layout_id).await?;
    authorize(&state, user, Some(&page), PageAction::Open).await?;

    let meta = state.pages.layout_meta(&page);
    let layout = state.pages.get_layout(&page).await?;
    let draft = state.pages.get_draft_copy(page.id).await?;
    let lookup = lookup_function(Some(user), &get_permissions());
    Ok(Json(json!({
        "page": page,
        "layout": meta.as_deref(),
        "fields": layout.as_ref().map(|l| &l.object.data),
        "relations": layout.as_ref().map(|l| &l.relations),
        "draft_copy": draft.map(|d| json!({"id": d.id, "change_url": page_change_url(&d)})),
        "copy_of": page.copy_of,
        "can_change_status": lookup("change_status"),
        "can_change_visibility": lookup("change_visibility"),
    })))
}

pub async fn layout_change_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(layout_id): AxumPath<i64>,
    Json(form): Json<PageForm>,
) -> AppResult<Response> {
    let user = require_staff(&vc)?;
    let page = state.pages.get_page_by_layout(layout_id).await?;
    authorize(&state, user, Some(&page), PageAction::Change).await?;

    let here = layout_change_url(layout_id);
    let lookup = lookup_function(Some(user), &get_permissions());
    let persisted = (page.status, page.visibility);
    let submitted = form.submitted(persisted);
    if let Err(message) = check_restricted_fields(&lookup, persisted, submitted) {
        return Ok(redirect_with_message(&here, message, MessageLevel::Error));
    }
    if let Err(err) = check_draft_copy_status(page.copy_of, submitted.0) {
        let message = match err {
            AppError::Validation(message) => message,
            other => other.to_string(),
        };
        return Ok(redirect_with_message(&here, message, MessageLevel::Error));
    }

    let continue_editing = form.continue_editing;
    let add_another = form.add_another;
    let page = state.pages.update_page(page.id, form.into_changes()?).await?;
    state.admin.after_save(user, &page, false).await?;

    let msg = format!("The page \"{}\" was changed successfully.", page);
    Ok(if continue_editing {
        redirect_with_message(&here, format!("{} You may edit it again below.", msg), MessageLevel::Success)
    } else if add_another {
        redirect_with_message(PAGE_ADD_URL, format!("{} You may add another page below.", msg), MessageLevel::Success)
    } else {
        redirect_with_message(ADMIN_INDEX, msg, MessageLevel::Success)
    })
}

// Draft copy

pub async fn copy_form_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    let page = state.pages.get_page(id).await?;
    authorize(&state, user, None, PageAction::Add).await?;

    let draft = state.pages.get_draft_copy(page.id).await?;
    let rejection = state.pages.copy_rejection(&page).await?;
    Ok(Json(json!({
        "title": if draft.is_some() { "Draft Copy Exists" } else { "Are you sure?" },
        "object": page,
        "draft_already_exists": draft.is_some(),
        "edit_copy_url": draft.as_ref().map(page_change_url),
        "rejection": rejection.map(|r| r.to_string()),
    })))
}

pub async fn copy_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Response> {
    let user = require_staff(&vc)?;
    let page = state.pages.get_page(id).await?;
    authorize(&state, user, None, PageAction::Add).await?;

    let here = format!("/admin/pages/{}/copy", page.id);
    match state.pages.copy_page(page.id).await {
        Ok(draft) => {
            tracing::info!(user_id = user.id, page_id = page.id, draft_id = draft.id, "page copied from admin");
            Ok(redirect_with_message(
                &page_change_url(&draft),
                format!("The page \"{}\" was copied successfully.", page),
                MessageLevel::Success,
            ))
        }
        Err(AppError::CopyRejected(rejection)) => Ok(copy_rejected(&here, rejection)),
        Err(other) => Err(other),
    }
}

fn copy_rejected(location: &str, rejection: CopyRejection) -> Response {
    redirect_with_message(location, rejection.to_string(), MessageLevel::Error)
}

// Merge

pub async fn merge_form_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    let draft = state.pages.get_page(id).await?;
    authorize(&state, user, Some(&draft), PageAction::Open).await?;
    let preview = state.pages.merge_preview(draft.id).await?;
    Ok(Json(json!({
        "title": "Are you sure?",
        "object": draft,
        "preview": preview,
    })))
}

pub async fn merge_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Response> {
    let user = require_staff(&vc)?;
    let draft = state.pages.get_page(id).await?;
    let original_id = draft
        .copy_of
        .ok_or_else(|| AppError::BadRequest(format!("Page \"{}\" is not a draft copy", draft)))?;
    let original = state.pages.get_page(original_id).await?;
    authorize(&state, user, Some(&original), PageAction::Change).await?;
    authorize(&state, user, Some(&draft), PageAction::Delete).await?;

    let merged = state.pages.merge_draft(draft.id).await?;
    state.admin.after_save(user, &merged, false).await?;
    Ok(redirect_with_message(
        &page_change_url(&merged),
        format!("The draft copy \"{}\" was merged into \"{}\".", draft, merged),
        MessageLevel::Success,
    ))
}

// Delete

pub async fn delete_form_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    let page = state.pages.get_page(id).await?;
    authorize(&state, user, Some(&page), PageAction::Delete).await?;
    let preview = state.pages.delete_preview(page.id).await?;
    Ok(Json(json!({
        "title": "Are you sure?",
        "object": page,
        "deleted_pages": preview.pages,
        "deleted_objects": preview.objects,
    })))
}

pub async fn delete_handler(State(state): State<AppState>, vc: Vc, AxumPath(id): AxumPath<i64>) -> AppResult<Response> {
    let user = require_staff(&vc)?;
    let page = state.pages.get_page(id).await?;
    authorize(&state, user, Some(&page), PageAction::Delete).await?;
    let deleted = state.pages.delete_page(page.id).await?;
    Ok(redirect_with_message(
        ADMIN_INDEX,
        format!("The page \"{}\" and {} page(s) below it were deleted successfully.", page, deleted.len().saturating_sub(1)),
        MessageLevel::Success,
    ))
}

// Bulk reordering

/// Parse `page_id=parent_id,order` pairs. A parent that is not a number
/// means the root.
pub fn parse_parents_orders(pairs: &[(String, String)]) -> AppResult<Vec<PageMove>> {
    pairs
        .iter()
        .map(|(page_id, value)| {
            let page_id = page_id
                .trim()
                .parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid page id '{}'", page_id)))?;
            let (parent, order) = value
                .split_once(',')
                .ok_or_else(|| AppError::BadRequest(format!("Expected 'parent,order' for page {}", page_id)))?;
            let sort_order = order
                .trim()
                .parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid order '{}' for page {}", order, page_id)))?;
            Ok(PageMove {
                page_id,
                parent_id: parent.trim().parse::<i64>().ok(),
                sort_order,
            })
        })
        .collect()
}

pub async fn parents_orders_handler(
    State(state): State<AppState>,
    vc: Vc,
    Form(pairs): Form<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let user = require_staff(&vc)?;
    let moves = parse_parents_orders(&pairs)?;
    for mv in &moves {
        let page = state.pages.get_page(mv.page_id).await?;
        authorize(&state, user, Some(&page), PageAction::Open).await?;
    }
    state.pages.move_pages(&moves).await?;
    Ok(Json(json!({"moved": moves.len()})))
}

pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/", get(index_handler))
        .route("/admin/pages/", get(pages_changelist_handler))
        .route("/admin/pages/add", get(add_form_handler).post(add_handler))
        .route("/admin/pages/parentsorders", post(parents_orders_handler))
        .route("/admin/pages/{id}", get(page_change_handler))
        .route("/admin/pages/{id}/copy", get(copy_form_handler).post(copy_handler))
        .route("/admin/pages/{id}/merge", get(merge_form_handler).post(merge_handler))
        .route("/admin/pages/{id}/delete", get(delete_form_handler).post(delete_handler))
        .route("/admin/layouts/", get(pages_changelist_handler))
        .route("/admin/layouts/add", get(layouts_add_handler))
        .route("/admin/layouts/{id}", get(layout_form_handler).post(layout_change_handler))
}
