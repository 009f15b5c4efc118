#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};

use page_manager::{
    app_state::AppState,
    config::Config,
    layouts::{FieldKind, FieldSpec, LayoutMeta, LayoutRegistry, RelationSpec},
    models::{NewPage, Page, PageStatus, StoredObject, User},
};

pub const ARTICLE: &str = "Article";

static NEXT_RECORD_ID: AtomicI64 = AtomicI64::new(1);

pub fn article_layout() -> LayoutMeta {
    LayoutMeta::new(ARTICLE)
        .field(FieldSpec::new("body", FieldKind::Text))
        .field(FieldSpec::new("subtitle", FieldKind::Text).optional())
        .relation(RelationSpec::foreign_key("hero", "image"))
        .relation(RelationSpec::many_to_many("tags", "tag"))
        .relation(RelationSpec::inline("sidebar", "widget"))
        .inline("sidebar")
        .context("section", json!("news"))
}

pub async fn test_state() -> AppState {
    let mut layouts = LayoutRegistry::with_builtins();
    layouts.register(article_layout()).unwrap();
    AppState::with_layouts(Config::in_memory(), layouts).await.unwrap()
}

pub async fn record(state: &AppState, object_type: &str, label: &str) -> StoredObject {
    let id = NEXT_RECORD_ID.fetch_add(1, Ordering::SeqCst);
    let mut data = Map::new();
    data.insert("name".to_string(), Value::String(label.to_string()));
    state
        .pages
        .database()
        .create_object(id, object_type, data)
        .await
        .unwrap()
}

pub async fn article(state: &AppState, title: &str, parent: Option<i64>, status: PageStatus) -> Page {
    let mut new_page = NewPage::new(ARTICLE, title)
        .status(status)
        .field("body", json!(format!("{} body", title)));
    if let Some(parent_id) = parent {
        new_page = new_page.parent(parent_id);
    }
    state.pages.create_page(new_page).await.unwrap()
}

pub async fn published(state: &AppState, title: &str, parent: Option<i64>) -> Page {
    article(state, title, parent, PageStatus::Published).await
}

/// A staff user holding exactly `perms`.
pub async fn staff_user(state: &AppState, username: &str, perms: &[&str]) -> User {
    let db = state.pages.database();
    let user = db.create_user(username, true, false).await.unwrap();
    for perm in perms {
        db.grant_permission(user.id, perm).await.unwrap();
    }
    db.get_user(user.id).await.unwrap().unwrap()
}
