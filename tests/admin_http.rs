mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{article, published, staff_user, test_state};
use page_manager::{
    app_state::AppState,
    create_router,
    infrastructure::middleware::USER_ID_HEADER,
    models::{Page, PageStatus, Visibility},
};

struct Reply {
    status: StatusCode,
    location: Option<String>,
    body: Value,
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<i64>, body: Option<Value>) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = user {
        builder = builder.header(USER_ID_HEADER, id.to_string());
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    reply(app, request).await
}

async fn send_form(app: &Router, uri: &str, user: i64, form: &str) -> Reply {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_ID_HEADER, user.to_string())
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    reply(app, request).await
}

async fn reply(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Reply { status, location, body }
}

fn change_url(page: &Page) -> String {
    format!("/admin/layouts/{}", page.layout_id.unwrap())
}

fn change_form(page: &Page, extra: Value) -> Value {
    let mut form = json!({
        "title": page.title,
        "slug": page.slug,
        "fields": {"body": "Edited"},
    });
    if let (Value::Object(form), Value::Object(extra)) = (&mut form, extra) {
        form.extend(extra);
    }
    form
}

async fn setup() -> (AppState, Router) {
    let state = test_state().await;
    let app = create_router(state.clone());
    (state, app)
}

#[tokio::test]
async fn test_admin_requires_staff() {
    let (state, app) = setup().await;
    let reply = send(&app, "GET", "/admin/", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["status"], 401);

    let visitor = state.pages.database().create_user("visitor", false, false).await.unwrap();
    let reply = send(&app, "GET", "/admin/", Some(visitor.id), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = send(&app, "GET", "/admin/", Some(9999), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_index_lists_nested_tree() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;
    let team = published(&state, "Team", Some(about.id)).await;
    let editor = staff_user(&state, "editor", &["change_page"]).await;

    let reply = send(&app, "GET", "/admin/", Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let roots = reply.body["pages"].as_array().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["id"], about.id);
    assert_eq!(roots[0]["children"][0]["id"], team.id);
    assert_eq!(roots[0]["permissions"]["can_edit"], true);
    assert_eq!(roots[0]["permissions"]["can_delete"], false);
    assert_eq!(reply.body["can_add"], false);

    let reply = send(&app, "GET", "/admin/pages/", Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location.as_deref(), Some("/admin/"));
}

#[tokio::test]
async fn test_page_change_redirects_to_layout_form() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;
    let editor = staff_user(&state, "editor", &["change_page"]).await;

    let reply = send(&app, "GET", &format!("/admin/pages/{}", about.id), Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(change_url(&about)));

    let reply = send(&app, "GET", &change_url(&about), Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["page"]["id"], about.id);
    assert_eq!(reply.body["fields"]["body"], "About body");
    assert_eq!(reply.body["can_change_status"], false);
}

#[tokio::test]
async fn test_draft_and_private_pages_need_view_permissions() {
    let (state, app) = setup().await;
    let draft = article(&state, "Unpublished", None, PageStatus::Draft).await;
    let private = state
        .pages
        .create_page(
            page_manager::models::NewPage::new(common::ARTICLE, "Secret")
                .status(PageStatus::Published)
                .visibility(Visibility::Private)
                .field("body", json!("hidden")),
        )
        .await
        .unwrap();

    let editor = staff_user(&state, "editor", &["change_page"]).await;
    let reply = send(&app, "GET", &change_url(&draft), Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    let reply = send(&app, "GET", &change_url(&private), Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let viewer = staff_user(
        &state,
        "viewer",
        &["change_page", "view_draft_pages", "view_private_pages"],
    )
    .await;
    let reply = send(&app, "GET", &change_url(&draft), Some(viewer.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = send(&app, "GET", &change_url(&private), Some(viewer.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_publishing_requires_change_status() {
    let (state, app) = setup().await;
    let draft = article(&state, "Unpublished", None, PageStatus::Draft).await;
    let editor = staff_user(&state, "editor", &["change_page", "view_draft_pages"]).await;

    let form = change_form(&draft, json!({"status": "published"}));
    let reply = send(&app, "POST", &change_url(&draft), Some(editor.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(change_url(&draft)));
    assert_eq!(reply.body["level"], "error");
    assert_eq!(
        reply.body["message"],
        "You do not have permission to change the status of this page."
    );
    let unchanged = state.pages.get_page(draft.id).await.unwrap();
    assert_eq!(unchanged.status, PageStatus::Draft);

    let publisher = staff_user(
        &state,
        "publisher",
        &["change_page", "view_draft_pages", "change_status"],
    )
    .await;
    let form = change_form(&draft, json!({"status": "published"}));
    let reply = send(&app, "POST", &change_url(&draft), Some(publisher.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location.as_deref(), Some("/admin/"));
    assert_eq!(state.pages.get_page(draft.id).await.unwrap().status, PageStatus::Published);
}

#[tokio::test]
async fn test_modifying_published_pages_needs_permission() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;

    let editor = staff_user(&state, "editor", &["change_page"]).await;
    let reply = send(&app, "POST", &change_url(&about), Some(editor.id), Some(change_form(&about, json!({})))).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let modifier = staff_user(&state, "modifier", &["change_page", "modify_published_pages"]).await;
    let form = change_form(&about, json!({"visibility": "private"}));
    let reply = send(&app, "POST", &change_url(&about), Some(modifier.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(change_url(&about)));
    assert_eq!(
        reply.body["message"],
        "You do not have permission to change the visibility of this page."
    );
    assert_eq!(state.pages.get_page(about.id).await.unwrap().visibility, Visibility::Public);

    let form = change_form(&about, json!({"title": "About Us", "_continue": true}));
    let reply = send(&app, "POST", &change_url(&about), Some(modifier.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(change_url(&about)));
    assert_eq!(
        reply.body["message"],
        "The page \"About Us\" was changed successfully. You may edit it again below."
    );
    let saved = state.pages.get_page(about.id).await.unwrap();
    assert_eq!(saved.title, "About Us");
    assert_eq!(saved.slug, "about");
    let layout = state.pages.get_layout(&saved).await.unwrap().unwrap();
    assert_eq!(layout.field("body"), Some(&json!("Edited")));
}

#[tokio::test]
async fn test_add_page() {
    let (state, app) = setup().await;
    let editor = staff_user(&state, "editor", &["change_page"]).await;
    let form = json!({"layout": "Article", "title": "Contact", "fields": {"body": "Write to us"}});
    let reply = send(&app, "POST", "/admin/pages/add", Some(editor.id), Some(form.clone())).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let author = staff_user(&state, "author", &["add_page", "change_page"]).await;
    let reply = send(&app, "GET", "/admin/pages/add", Some(author.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["page_layouts"].as_array().unwrap().len(), 3);

    let mut published_form = form.clone();
    published_form["status"] = json!("published");
    let reply = send(&app, "POST", "/admin/pages/add", Some(author.id), Some(published_form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location.as_deref(), Some("/admin/pages/add"));
    assert!(state.pages.children(None).await.unwrap().is_empty());

    let reply = send(&app, "POST", "/admin/pages/add", Some(author.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location.as_deref(), Some("/admin/"));
    assert_eq!(reply.body["message"], "The page \"Contact\" was added successfully.");

    let pages = state.pages.children(None).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].slug, "contact");
    assert_eq!(pages[0].status, PageStatus::Draft);

    let form = json!({"layout": "Article", "title": "Jobs", "fields": {"body": "x"}, "_continue": true});
    let reply = send(&app, "POST", "/admin/pages/add", Some(author.id), Some(form)).await;
    let jobs = state.pages.list_pages(Default::default()).await.unwrap().into_iter().find(|p| p.slug == "jobs").unwrap();
    assert_eq!(reply.location, Some(change_url(&jobs)));
}

#[tokio::test]
async fn test_copy_and_merge_through_admin() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;
    let admin = state.pages.database().create_user("admin", true, true).await.unwrap();
    let copy_url = format!("/admin/pages/{}/copy", about.id);

    let reply = send(&app, "GET", &copy_url, Some(admin.id), None).await;
    assert_eq!(reply.body["title"], "Are you sure?");
    assert_eq!(reply.body["draft_already_exists"], false);

    let reply = send(&app, "POST", &copy_url, Some(admin.id), None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    let draft = state.pages.get_draft_copy(about.id).await.unwrap().unwrap();
    assert_eq!(reply.location, Some(change_url(&draft)));

    let reply = send(&app, "GET", &copy_url, Some(admin.id), None).await;
    assert_eq!(reply.body["title"], "Draft Copy Exists");
    assert_eq!(reply.body["edit_copy_url"], change_url(&draft));

    let reply = send(&app, "POST", &copy_url, Some(admin.id), None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(copy_url.clone()));
    assert_eq!(reply.body["message"], "A draft copy already exists.");

    let form = change_form(&draft, json!({"title": "About Us (draft copy)"}));
    let reply = send(&app, "POST", &change_url(&draft), Some(admin.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);

    let merge_url = format!("/admin/pages/{}/merge", draft.id);
    let reply = send(&app, "GET", &merge_url, Some(admin.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["preview"]["original_id"], about.id);

    let reply = send(&app, "POST", &merge_url, Some(admin.id), None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(change_url(&about)));
    assert_eq!(state.pages.get_page(about.id).await.unwrap().title, "About Us");
    assert!(state.pages.database().get_page(draft.id).await.unwrap().is_none());

    let reply = send(&app, "POST", &format!("/admin/pages/{}/merge", about.id), Some(admin.id), None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_draft_copy_cannot_be_published_from_admin() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;
    let draft = state.pages.copy_page(about.id).await.unwrap();
    let admin = state.pages.database().create_user("admin", true, true).await.unwrap();

    let form = change_form(&draft, json!({"status": "published"}));
    let reply = send(&app, "POST", &change_url(&draft), Some(admin.id), Some(form)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location, Some(change_url(&draft)));
    assert_eq!(reply.body["level"], "error");
    assert_eq!(state.pages.get_page(draft.id).await.unwrap().status, PageStatus::Draft);
}

#[tokio::test]
async fn test_delete_page_through_admin() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;
    published(&state, "Team", Some(about.id)).await;
    let editor = staff_user(&state, "editor", &["change_page"]).await;
    let remover = staff_user(&state, "remover", &["delete_page"]).await;
    let delete_url = format!("/admin/pages/{}/delete", about.id);

    let reply = send(&app, "POST", &delete_url, Some(editor.id), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = send(&app, "GET", &delete_url, Some(remover.id), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["deleted_pages"].as_array().unwrap().len(), 2);

    let reply = send(&app, "POST", &delete_url, Some(remover.id), None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location.as_deref(), Some("/admin/"));
    assert!(state.pages.children(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_parents_orders() {
    let (state, app) = setup().await;
    let about = published(&state, "About", None).await;
    let news = published(&state, "News", None).await;
    let team = published(&state, "Team", Some(about.id)).await;
    let editor = staff_user(&state, "editor", &["change_page"]).await;

    let form = format!("{}=%2C2&{}=%2C1&{}={}%2C1", about.id, news.id, team.id, news.id);
    let reply = send_form(&app, "/admin/pages/parentsorders", editor.id, &form).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["moved"], 3);

    let roots: Vec<i64> = state.pages.children(None).await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(roots, vec![news.id, about.id]);
    let team = state.pages.get_page(team.id).await.unwrap();
    assert_eq!(team.parent_id, Some(news.id));
    assert_eq!(team.materialized_path, "news/team");

    let form = format!("{}={}%2C1", news.id, team.id);
    let reply = send_form(&app, "/admin/pages/parentsorders", editor.id, &form).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let form = format!("{}=%2Cfirst", news.id);
    let reply = send_form(&app, "/admin/pages/parentsorders", editor.id, &form).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}
