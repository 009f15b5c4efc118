mod common;

use serde_json::json;
use std::collections::BTreeMap;

use common::{article, published, record, test_state, ARTICLE};
use page_manager::{
    error::AppError,
    forms::{PageForm, SLUG_MAX_LENGTH},
    models::{NewPage, PageChanges, PageStatus, Visibility},
    services::{CopyRejection, PageEvent, PageMove},
};

fn relations(name: &str, ids: &[i64]) -> BTreeMap<String, Vec<i64>> {
    let mut map = BTreeMap::new();
    map.insert(name.to_string(), ids.to_vec());
    map
}

#[tokio::test]
async fn test_create_page_builds_layout_and_path() {
    let state = test_state().await;
    let about = published(&state, "About Us", None).await;
    assert_eq!(about.slug, "about-us");
    assert_eq!(about.materialized_path, "about-us");
    assert_eq!(about.layout_type.as_deref(), Some("article"));

    let team = published(&state, "Team", Some(about.id)).await;
    assert_eq!(team.materialized_path, "about-us/team");
    assert_eq!(team.absolute_url(), "/about-us/team/");

    let layout = state.pages.get_layout(&team).await.unwrap().unwrap();
    assert_eq!(layout.field("body"), Some(&json!("Team body")));
    assert_eq!(layout.relations["tags"], Vec::<i64>::new());
}

#[tokio::test]
async fn test_create_page_rejects_unknown_layout_and_missing_field() {
    let state = test_state().await;
    let err = state.pages.create_page(NewPage::new("Gallery", "Photos")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = state.pages.create_page(NewPage::new(ARTICLE, "No body")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(state.pages.children(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sibling_slugs_are_unique() {
    let state = test_state().await;
    published(&state, "News", None).await;
    let err = state
        .pages
        .create_page(NewPage::new(ARTICLE, "News").field("body", json!("again")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_copy_page_creates_draft_after_original() {
    let state = test_state().await;
    let first = published(&state, "First", None).await;
    let about = published(&state, "About", None).await;
    let last = published(&state, "Last", None).await;
    let mut events = state.pages.events().subscribe();

    let draft = state.pages.copy_page(about.id).await.unwrap();
    assert_eq!(draft.copy_of, Some(about.id));
    assert_eq!(draft.status, PageStatus::Draft);
    assert_eq!(draft.title, "About (draft copy)");
    assert_eq!(draft.slug, "about-draft-copy");
    assert_ne!(draft.layout_id, about.layout_id);
    assert!(!draft.is_homepage);

    let order: Vec<i64> = state.pages.children(None).await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(order, vec![first.id, about.id, draft.id, last.id]);

    let event = events.recv().await.unwrap();
    assert_eq!(
        event,
        PageEvent::Copied {
            original_id: about.id,
            draft_id: draft.id
        }
    );
}

#[tokio::test]
async fn test_copy_page_rejections() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let unpublished = article(&state, "Soon", None, PageStatus::Draft).await;

    let err = state.pages.copy_page(unpublished.id).await.unwrap_err();
    assert!(matches!(err, AppError::CopyRejected(CopyRejection::NotPublished)));

    let draft = state.pages.copy_page(about.id).await.unwrap();
    let err = state.pages.copy_page(about.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::CopyRejected(CopyRejection::DraftExists { draft_id }) if draft_id == draft.id
    ));

    let err = state.pages.copy_page(draft.id).await.unwrap_err();
    assert!(matches!(err, AppError::CopyRejected(CopyRejection::DraftCopy)));

    assert_eq!(state.pages.get_draft_copy(about.id).await.unwrap().unwrap().id, draft.id);
}

#[tokio::test]
async fn test_draft_copy_cannot_be_published_directly() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let draft = state.pages.copy_page(about.id).await.unwrap();

    let err = state.pages.publish(draft.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let err = state.pages.set_homepage(draft.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_copy_deep_copies_inline_records_only() {
    let state = test_state().await;
    let hero = record(&state, "image", "hero.png").await;
    let news = record(&state, "tag", "news").await;
    let widget = record(&state, "widget", "Contact box").await;

    let mut new_page = NewPage::new(ARTICLE, "About")
        .status(PageStatus::Published)
        .field("body", json!("Original"))
        .field("hero", json!(hero.id))
        .relation("tags", vec![news.id]);
    new_page.relations.insert("sidebar".to_string(), vec![widget.id]);
    let about = state.pages.create_page(new_page).await.unwrap();

    let draft = state.pages.copy_page(about.id).await.unwrap();
    let original_layout = state.pages.get_layout(&about).await.unwrap().unwrap();
    let draft_layout = state.pages.get_layout(&draft).await.unwrap().unwrap();

    assert_eq!(draft_layout.field("body"), Some(&json!("Original")));
    assert_eq!(draft_layout.field("hero"), Some(&json!(hero.id)));
    assert_eq!(draft_layout.relations["tags"], vec![news.id]);

    let copied_widget = draft_layout.relations["sidebar"][0];
    assert_ne!(copied_widget, widget.id);
    assert_eq!(original_layout.relations["sidebar"], vec![widget.id]);
    let copied = state.pages.database().get_object(copied_widget).await.unwrap().unwrap();
    assert_eq!(copied.field("name"), Some(&json!("Contact box")));
}

#[tokio::test]
async fn test_merge_draft_keeps_original_identity() {
    let state = test_state().await;
    let parent = published(&state, "Company", None).await;
    let about = published(&state, "About", Some(parent.id)).await;
    state.pages.set_homepage(about.id).await.unwrap();
    let about = state.pages.get_page(about.id).await.unwrap();

    let draft = state.pages.copy_page(about.id).await.unwrap();
    state
        .pages
        .update_page(
            draft.id,
            PageChanges {
                title: Some("About Us (draft copy)".to_string()),
                description: Some(Some("Who we are".to_string())),
                visibility: Some(Visibility::Private),
                fields: Some(serde_json::from_value(json!({"body": "Revised"})).unwrap()),
                ..PageChanges::default()
            },
        )
        .await
        .unwrap();

    let merged = state.pages.merge_draft(draft.id).await.unwrap();
    assert_eq!(merged.id, about.id);
    assert_eq!(merged.title, "About Us");
    assert_eq!(merged.description.as_deref(), Some("Who we are"));
    assert_eq!(merged.visibility, Visibility::Private);
    assert_eq!(merged.slug, about.slug);
    assert_eq!(merged.status, PageStatus::Published);
    assert_eq!(merged.parent_id, Some(parent.id));
    assert_eq!(merged.layout_id, about.layout_id);
    assert_eq!(merged.date_created, about.date_created);
    assert!(merged.is_homepage);

    let layout = state.pages.get_layout(&merged).await.unwrap().unwrap();
    assert_eq!(layout.field("body"), Some(&json!("Revised")));

    assert!(matches!(state.pages.get_page(draft.id).await, Err(AppError::NotFound(_))));
    let draft_layout = state.pages.database().get_object(draft.layout_id.unwrap()).await.unwrap();
    assert!(draft_layout.is_none());
    assert!(state.pages.get_draft_copy(about.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_merge_replaces_relations_and_reparents_children() {
    let state = test_state().await;
    let a = record(&state, "tag", "a").await;
    let b = record(&state, "tag", "b").await;
    let c = record(&state, "tag", "c").await;
    let old_widget = record(&state, "widget", "Old").await;
    let new_widget = record(&state, "widget", "New").await;

    let mut new_page = NewPage::new(ARTICLE, "About")
        .status(PageStatus::Published)
        .field("body", json!("Original"))
        .relation("tags", vec![a.id]);
    new_page.relations.insert("sidebar".to_string(), vec![old_widget.id]);
    let about = state.pages.create_page(new_page).await.unwrap();
    let kept_child = published(&state, "History", Some(about.id)).await;

    let draft = state.pages.copy_page(about.id).await.unwrap();
    let draft_child = published(&state, "Careers", Some(draft.id)).await;
    let mut changes = PageChanges {
        relations: relations("tags", &[c.id, a.id, b.id]),
        ..PageChanges::default()
    };
    changes.relations.insert("sidebar".to_string(), vec![new_widget.id]);
    state.pages.update_page(draft.id, changes).await.unwrap();

    let preview = state.pages.merge_preview(draft.id).await.unwrap();
    assert_eq!(preview.original_id, about.id);
    assert!(preview.deleted.iter().any(|item| item.kind == "layout"));
    assert!(preview.deleted.iter().any(|item| item.id == new_widget.id));
    assert_eq!(preview.replaced.len(), 1);
    assert_eq!(preview.replaced[0].id, old_widget.id);
    assert_eq!(preview.reparented.len(), 1);
    assert_eq!(preview.reparented[0].id, draft_child.id);
    assert!(preview.deleted.iter().all(|item| item.id != draft.id));

    let merged = state.pages.merge_draft(draft.id).await.unwrap();
    let layout = state.pages.get_layout(&merged).await.unwrap().unwrap();
    assert_eq!(layout.relations["tags"], vec![c.id, a.id, b.id]);

    let sidebar = &layout.relations["sidebar"];
    assert_eq!(sidebar.len(), 1);
    assert_ne!(sidebar[0], new_widget.id);
    let db = state.pages.database();
    assert!(db.get_object(old_widget.id).await.unwrap().is_none());
    assert!(db.get_object(new_widget.id).await.unwrap().is_none());
    let widget = db.get_object(sidebar[0]).await.unwrap().unwrap();
    assert_eq!(widget.field("name"), Some(&json!("New")));

    let children: Vec<i64> = state.pages.children(Some(about.id)).await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(children, vec![kept_child.id, draft_child.id]);
    let moved = state.pages.get_page(draft_child.id).await.unwrap();
    assert_eq!(moved.materialized_path, "about/careers");
    assert_eq!(moved.sort_order, 2);
}

#[tokio::test]
async fn test_merge_requires_draft_copy() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let err = state.pages.merge_draft(about.id).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert!(state.pages.merge_preview(about.id).await.is_err());
}

#[tokio::test]
async fn test_single_homepage() {
    let state = test_state().await;
    let home = published(&state, "Home", None).await;
    let other = published(&state, "Other", None).await;

    state.pages.set_homepage(home.id).await.unwrap();
    state.pages.set_homepage(other.id).await.unwrap();

    let homepages = state.pages.database().get_homepages().await.unwrap();
    assert_eq!(homepages.len(), 1);
    assert_eq!(homepages[0].id, other.id);
    assert_eq!(state.pages.get_page(other.id).await.unwrap().absolute_url(), "/");
}

#[tokio::test]
async fn test_delete_page_removes_subtree_and_drafts() {
    let state = test_state().await;
    let widget = record(&state, "widget", "Box").await;
    let mut new_page = NewPage::new(ARTICLE, "Company")
        .status(PageStatus::Published)
        .field("body", json!("text"));
    new_page.relations.insert("sidebar".to_string(), vec![widget.id]);
    let company = state.pages.create_page(new_page).await.unwrap();
    let team = published(&state, "Team", Some(company.id)).await;
    let alice = published(&state, "Alice", Some(team.id)).await;
    let draft = state.pages.copy_page(team.id).await.unwrap();
    let survivor = published(&state, "Contact", None).await;

    let preview = state.pages.delete_preview(company.id).await.unwrap();
    assert_eq!(preview.pages.len(), 4);
    assert!(preview.objects.contains(&widget.id));

    let deleted = state.pages.delete_page(company.id).await.unwrap();
    assert_eq!(deleted.len(), 4);
    for id in [company.id, team.id, alice.id, draft.id] {
        assert!(deleted.contains(&id));
        assert!(state.pages.database().get_page(id).await.unwrap().is_none());
    }
    assert!(state.pages.database().get_object(widget.id).await.unwrap().is_none());
    assert!(state.pages.database().get_page(survivor.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_move_pages_updates_paths_and_rejects_cycles() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let team = published(&state, "Team", Some(about.id)).await;
    let alice = published(&state, "Alice", Some(team.id)).await;
    let news = published(&state, "News", None).await;

    state
        .pages
        .move_pages(&[PageMove {
            page_id: team.id,
            parent_id: Some(news.id),
            sort_order: 1,
        }])
        .await
        .unwrap();
    let alice = state.pages.get_page(alice.id).await.unwrap();
    assert_eq!(alice.materialized_path, "news/team/alice");

    let err = state
        .pages
        .move_pages(&[PageMove {
            page_id: news.id,
            parent_id: Some(alice.id),
            sort_order: 1,
        }])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(state.pages.get_page(news.id).await.unwrap().parent_id, None);

    let err = state
        .pages
        .update_page(
            about.id,
            PageChanges {
                parent_id: Some(Some(about.id)),
                ..PageChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_slug_change_refreshes_descendant_paths() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let team = published(&state, "Team", Some(about.id)).await;

    state
        .pages
        .update_page(
            about.id,
            PageChanges {
                slug: Some("company".to_string()),
                ..PageChanges::default()
            },
        )
        .await
        .unwrap();
    let team = state.pages.get_page(team.id).await.unwrap();
    assert_eq!(team.materialized_path, "company/team");
}

#[tokio::test]
async fn test_recalculate_paths_repairs_stale_paths() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let team = published(&state, "Team", Some(about.id)).await;

    let db = state.pages.database();
    let mut tx = db.begin().await.unwrap();
    tx.set_materialized_path(team.id, "stale/team").await.unwrap();
    db.commit(tx).await.unwrap();

    let repairs = state.pages.recalculate_paths().await.unwrap();
    assert_eq!(repairs.len(), 1);
    assert_eq!(repairs[0].page_id, team.id);
    assert_eq!(repairs[0].old_path, "stale/team");
    assert_eq!(repairs[0].new_path, "about/team");
    assert!(state.pages.recalculate_paths().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rebuild_tree_renumbers_siblings() {
    let state = test_state().await;
    let a = published(&state, "A", None).await;
    let b = published(&state, "B", None).await;
    assert_eq!(a.sort_order, b.sort_order);

    state.pages.rebuild_tree().await.unwrap();
    let roots = state.pages.children(None).await.unwrap();
    let orders: Vec<(i64, i64)> = roots.iter().map(|p| (p.id, p.sort_order)).collect();
    assert_eq!(orders, vec![(a.id, 1), (b.id, 2)]);
}

#[tokio::test]
async fn test_draft_of_long_slug_can_be_edited_and_merged() {
    let state = test_state().await;
    let slug = "annual-report-2024-summary-pages";
    assert_eq!(slug.len(), SLUG_MAX_LENGTH);
    let report = state
        .pages
        .create_page(
            NewPage::new(ARTICLE, "Annual Report")
                .slug(slug)
                .status(PageStatus::Published)
                .field("body", json!("Figures")),
        )
        .await
        .unwrap();

    let draft = state.pages.copy_page(report.id).await.unwrap();
    assert!(draft.slug.len() <= SLUG_MAX_LENGTH);
    assert!(draft.slug.ends_with("-draft-copy"));

    let form: PageForm = serde_json::from_value(json!({
        "title": draft.title,
        "slug": draft.slug,
        "fields": {"body": "Revised figures"}
    }))
    .unwrap();
    state.pages.update_page(draft.id, form.into_changes().unwrap()).await.unwrap();

    let merged = state.pages.merge_draft(draft.id).await.unwrap();
    assert_eq!(merged.slug, slug);
    assert_eq!(merged.title, "Annual Report");
    let layout = state.pages.get_layout(&merged).await.unwrap().unwrap();
    assert_eq!(layout.field("body"), Some(&json!("Revised figures")));
}

#[tokio::test]
async fn test_change_without_slug_keeps_stored_slug() {
    let state = test_state().await;
    let about = state
        .pages
        .create_page(
            NewPage::new(ARTICLE, "About Us")
                .slug("company")
                .status(PageStatus::Published)
                .field("body", json!("Hello")),
        )
        .await
        .unwrap();

    let form: PageForm = serde_json::from_value(json!({
        "title": "About Us",
        "fields": {"body": "Hello again"}
    }))
    .unwrap();
    let updated = state.pages.update_page(about.id, form.into_changes().unwrap()).await.unwrap();
    assert_eq!(updated.slug, "company");
    assert_eq!(updated.materialized_path, "company");

    let form: PageForm = serde_json::from_value(json!({
        "title": "About Us",
        "slug": "bad slug",
        "fields": {"body": "Hello again"}
    }))
    .unwrap();
    let err = state
        .pages
        .update_page(about.id, form.into_changes().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_merge_renames_child_with_taken_slug() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let team = published(&state, "Team", Some(about.id)).await;
    let draft = state.pages.copy_page(about.id).await.unwrap();
    let draft_team = published(&state, "Team", Some(draft.id)).await;
    assert_eq!(draft_team.slug, team.slug);

    let preview = state.pages.merge_preview(draft.id).await.unwrap();
    assert_eq!(preview.reparented.len(), 1);
    assert_eq!(preview.renamed.len(), 1);
    assert_eq!(preview.renamed[0].id, draft_team.id);
    assert_eq!(preview.renamed[0].from, "team");
    assert_eq!(preview.renamed[0].to, "team-2");

    state.pages.merge_draft(draft.id).await.unwrap();
    let children = state.pages.children(Some(about.id)).await.unwrap();
    let slugs: Vec<(i64, &str)> = children.iter().map(|p| (p.id, p.slug.as_str())).collect();
    assert_eq!(slugs, vec![(team.id, "team"), (draft_team.id, "team-2")]);
    assert_eq!(children[1].materialized_path, "about/team-2");
}

#[tokio::test]
async fn test_page_associations_follow_copy_and_merge() {
    let state = test_state().await;
    let about = published(&state, "About", None).await;
    let first = record(&state, "link", "first").await;
    let second = record(&state, "link", "second").await;
    let third = record(&state, "link", "third").await;

    let db = state.pages.database();
    let mut tx = db.begin().await.unwrap();
    tx.add_association(about.id, "page.related", first.id).await.unwrap();
    db.commit(tx).await.unwrap();

    let draft = state.pages.copy_page(about.id).await.unwrap();
    let copied = db.get_association_targets(draft.id, "page.related").await.unwrap();
    assert_eq!(copied, vec![first.id]);

    let mut tx = db.begin().await.unwrap();
    tx.replace_associations(draft.id, "page.related", &[third.id, second.id])
        .await
        .unwrap();
    db.commit(tx).await.unwrap();
    assert_eq!(db.get_association_targets(about.id, "page.related").await.unwrap(), vec![first.id]);

    state.pages.merge_draft(draft.id).await.unwrap();
    assert_eq!(
        db.get_association_targets(about.id, "page.related").await.unwrap(),
        vec![third.id, second.id]
    );
    assert!(db.get_associations(draft.id, None).await.unwrap().is_empty());
}
