// PageService - page CRUD, homepage, publication and tree maintenance.
// Every write runs in one transaction; dropping it on an early return rolls
// everything back.

use serde::Serialize;
use serde_json::Map;
use std::sync::Arc;

use crate::config::PageManagerConfig;
use crate::error::{AppError, AppResult};
use crate::forms::{check_draft_copy_status, clean_slug, clean_title, validate_slug};
use crate::infrastructure::{current_time_millis, DatabaseTransaction, IdGenerator, PageDatabase};
use crate::layouts::{LayoutMeta, LayoutRegistry};
use crate::models::{NewPage, Page, PageChanges, PageFilter, PageStatus, DEFAULT_SORT_ORDER};
use crate::services::events::{PageEvent, PageEvents};
use crate::services::layout_store::{self, LayoutData};
use crate::services::tree;

/// One entry of a bulk parent/order update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMove {
    pub page_id: i64,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
}

/// A page whose stored path was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathRepair {
    pub page_id: i64,
    pub title: String,
    pub old_path: String,
    pub new_path: String,
}

/// What deleting a page takes with it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletePreview {
    /// The page, its descendants and their draft copies.
    pub pages: Vec<Page>,
    /// Layout objects and the inline records they own.
    pub objects: Vec<i64>,
}

#[derive(Clone)]
pub struct PageService {
    db: Arc<PageDatabase>,
    layouts: Arc<LayoutRegistry>,
    ids: Arc<IdGenerator>,
    events: PageEvents,
    settings: PageManagerConfig,
}

impl PageService {
    pub fn new(
        db: Arc<PageDatabase>,
        layouts: Arc<LayoutRegistry>,
        ids: Arc<IdGenerator>,
        events: PageEvents,
        settings: PageManagerConfig,
    ) -> Self {
        Self {
            db,
            layouts,
            ids,
            events,
            settings,
        }
    }

    pub fn database(&self) -> &Arc<PageDatabase> {
        &self.db
    }

    pub fn layouts(&self) -> &Arc<LayoutRegistry> {
        &self.layouts
    }

    pub fn events(&self) -> &PageEvents {
        &self.events
    }

    pub fn settings(&self) -> &PageManagerConfig {
        &self.settings
    }

    pub(crate) fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub(crate) fn layout_meta(&self, page: &Page) -> Option<Arc<LayoutMeta>> {
        page.layout_type.as_deref().and_then(|key| self.layouts.get(key))
    }

    // Reads

    pub async fn get_page(&self, id: i64) -> AppResult<Page> {
        self.db
            .get_page(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Page {} not found", id)))
    }

    pub async fn get_page_by_layout(&self, layout_id: i64) -> AppResult<Page> {
        self.db
            .get_page_by_layout(layout_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No page uses layout {}", layout_id)))
    }

    pub async fn list_pages(&self, filter: PageFilter) -> AppResult<Vec<Page>> {
        self.db.list_pages(filter).await
    }

    pub async fn children(&self, parent_id: Option<i64>) -> AppResult<Vec<Page>> {
        self.db.get_children(parent_id).await
    }

    pub async fn get_draft_copy(&self, page_id: i64) -> AppResult<Option<Page>> {
        self.db.get_draft_copy(page_id).await
    }

    /// The page's layout object and relation lists.
    pub async fn get_layout(&self, page: &Page) -> AppResult<Option<LayoutData>> {
        let (Some(meta), Some(layout_id)) = (self.layout_meta(page), page.layout_id) else {
            return Ok(None);
        };
        let mut tx = self.db.begin().await?;
        let data = layout_store::load_layout(&mut tx, &meta, layout_id).await?;
        self.db.rollback(tx).await?;
        Ok(Some(data))
    }

    // Writes

    /// Create a page and a fresh layout of the named type.
    pub async fn create_page(&self, new_page: NewPage) -> AppResult<Page> {
        let meta = self
            .layouts
            .get_by_name(&new_page.layout)
            .ok_or_else(|| AppError::Validation(format!("Unknown page layout '{}'", new_page.layout)))?;
        let title = clean_title(&new_page.title)?;
        let slug = clean_slug(new_page.slug.as_deref(), &title)?;
        let data = meta.clean_data(&new_page.fields, &Map::new())?;

        let mut tx = self.db.begin().await?;
        if let Some(parent_id) = new_page.parent_id {
            tx.require_page(parent_id).await?;
        }
        layout_store::check_related_records(&mut tx, &meta, &data, &new_page.relations).await?;
        let layout = layout_store::create_layout(&mut tx, &self.ids, &meta, data, &new_page.relations).await?;

        let now = current_time_millis();
        let mut page = Page {
            id: self.ids.next_id(),
            parent_id: new_page.parent_id,
            sort_order: new_page.sort_order.unwrap_or(DEFAULT_SORT_ORDER),
            title,
            slug,
            description: new_page.description,
            status: new_page.status,
            visibility: new_page.visibility,
            copy_of: None,
            is_homepage: false,
            layout_type: Some(meta.key.clone()),
            layout_id: Some(layout.id),
            materialized_path: String::new(),
            extra: new_page.extra,
            date_created: now,
            date_modified: now,
        };
        page.materialized_path = tree::expected_path(&mut tx, &page).await?;
        tx.insert_page(&page).await?;
        self.db.commit(tx).await?;

        tracing::info!(page_id = page.id, layout = %meta.key, "created page");
        self.events.publish(PageEvent::Edited {
            page_id: page.id,
            created: true,
        });
        Ok(page)
    }

    /// Apply `changes` to the page and its layout.
    pub async fn update_page(&self, page_id: i64, changes: PageChanges) -> AppResult<Page> {
        let mut tx = self.db.begin().await?;
        let mut page = tx.require_page(page_id).await?;
        let old_slug = page.slug.clone();
        let old_parent = page.parent_id;

        if let Some(title) = &changes.title {
            page.title = clean_title(title)?;
        }
        if let Some(slug) = changes.slug.as_ref().filter(|slug| **slug != page.slug) {
            validate_slug(slug)?;
            page.slug = slug.clone();
        }
        if let Some(description) = changes.description {
            page.description = description;
        }
        if let Some(status) = changes.status {
            check_draft_copy_status(page.copy_of, status)?;
            page.status = status;
        }
        if let Some(visibility) = changes.visibility {
            page.visibility = visibility;
        }
        if let Some(extra) = changes.extra {
            page.extra = extra;
        }
        if let Some(parent_id) = changes.parent_id {
            if let Some(parent_id) = parent_id {
                if tree::is_ancestor_or_self(&mut tx, page.id, parent_id).await? {
                    return Err(AppError::Validation(format!(
                        "Page {} cannot be moved under its own descendant {}",
                        page.id, parent_id
                    )));
                }
            }
            page.parent_id = parent_id;
        }

        if let (Some(meta), Some(layout_id)) = (self.layout_meta(&page), page.layout_id) {
            let existing = tx.require_object(layout_id).await?;
            let data = match &changes.fields {
                Some(fields) => meta.clean_data(fields, &existing.data)?,
                None => existing.data.clone(),
            };
            layout_store::check_related_records(&mut tx, &meta, &data, &changes.relations).await?;
            if data != existing.data {
                tx.update_object_data(layout_id, &data).await?;
            }
            layout_store::set_relations(&mut tx, &meta, layout_id, &changes.relations).await?;
        } else if changes.fields.is_some() || !changes.relations.is_empty() {
            return Err(AppError::Validation(format!("Page {} has no editable layout", page.id)));
        }

        page.date_modified = current_time_millis();
        tx.update_page(&page).await?;
        if page.slug != old_slug || page.parent_id != old_parent {
            tree::refresh_subtree_paths(&mut tx, page.id).await?;
        }
        let page = tx.require_page(page.id).await?;
        self.db.commit(tx).await?;

        tracing::info!(page_id = page.id, "updated page");
        self.events.publish(PageEvent::Edited {
            page_id: page.id,
            created: false,
        });
        Ok(page)
    }

    pub async fn publish(&self, page_id: i64) -> AppResult<Page> {
        self.update_page(
            page_id,
            PageChanges {
                status: Some(PageStatus::Published),
                ..PageChanges::default()
            },
        )
        .await
    }

    /// Flag `page_id` as the homepage, clearing the flag everywhere else.
    pub async fn set_homepage(&self, page_id: i64) -> AppResult<Page> {
        let mut tx = self.db.begin().await?;
        let mut page = tx.require_page(page_id).await?;
        if page.is_draft_copy() {
            return Err(AppError::Validation("A draft copy cannot be the homepage.".to_string()));
        }
        tx.clear_homepage().await?;
        page.is_homepage = true;
        page.date_modified = current_time_millis();
        tx.update_page(&page).await?;
        self.db.commit(tx).await?;

        tracing::info!(page_id, "homepage changed");
        self.events.publish(PageEvent::Edited {
            page_id,
            created: false,
        });
        Ok(page)
    }

    async fn collect_deletion(&self, tx: &mut DatabaseTransaction, page_id: i64) -> AppResult<DeletePreview> {
        let root = tx.require_page(page_id).await?;
        let mut pending = vec![root];
        let mut preview = DeletePreview::default();

        while let Some(page) = pending.pop() {
            if preview.pages.iter().any(|p| p.id == page.id) {
                continue;
            }
            pending.extend(tree::descendants(tx, page.id).await?);
            if let Some(draft) = tx.draft_copy_of(page.id).await? {
                pending.push(draft);
            }
            if let Some(layout_id) = page.layout_id {
                preview.objects.push(layout_id);
                if let Some(meta) = self.layout_meta(&page) {
                    for record in layout_store::inline_records(tx, &meta, layout_id).await? {
                        preview.objects.push(record.id);
                    }
                }
            }
            preview.pages.push(page);
        }
        Ok(preview)
    }

    pub async fn delete_preview(&self, page_id: i64) -> AppResult<DeletePreview> {
        let mut tx = self.db.begin().await?;
        let preview = self.collect_deletion(&mut tx, page_id).await?;
        self.db.rollback(tx).await?;
        Ok(preview)
    }

    /// Delete the page, its whole subtree, their draft copies and layouts.
    pub async fn delete_page(&self, page_id: i64) -> AppResult<Vec<i64>> {
        let mut tx = self.db.begin().await?;
        let preview = self.collect_deletion(&mut tx, page_id).await?;
        for page in &preview.pages {
            if let Some(layout_id) = page.layout_id {
                let meta = self.layout_meta(page);
                layout_store::delete_layout(&mut tx, meta.as_deref(), layout_id).await?;
            }
            tx.delete_page_row(page.id).await?;
        }
        self.db.commit(tx).await?;

        let page_ids: Vec<i64> = preview.pages.iter().map(|p| p.id).collect();
        tracing::info!(page_id, deleted = page_ids.len(), "deleted page subtree");
        self.events.publish(PageEvent::Deleted {
            page_ids: page_ids.clone(),
        });
        Ok(page_ids)
    }

    /// Apply parent/order pairs in order. A move under the page itself or
    /// one of its descendants rejects the whole batch.
    pub async fn move_pages(&self, moves: &[PageMove]) -> AppResult<()> {
        if moves.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.begin().await?;
        for mv in moves {
            let mut page = tx.require_page(mv.page_id).await?;
            if let Some(parent_id) = mv.parent_id {
                tx.require_page(parent_id).await?;
                if tree::is_ancestor_or_self(&mut tx, page.id, parent_id).await? {
                    return Err(AppError::Validation(format!(
                        "Page {} cannot be moved under itself or its descendant {}",
                        page.id, parent_id
                    )));
                }
            }
            page.parent_id = mv.parent_id;
            page.sort_order = mv.sort_order;
            page.date_modified = current_time_millis();
            tx.update_page(&page).await?;
        }
        for mv in moves {
            tree::refresh_subtree_paths(&mut tx, mv.page_id).await?;
        }
        self.db.commit(tx).await?;

        let branch_ids: Vec<i64> = moves.iter().map(|mv| mv.page_id).collect();
        tracing::info!(?branch_ids, "moved pages");
        self.events.publish(PageEvent::Moved { branch_ids });
        Ok(())
    }

    /// Renumber every sibling group densely, keeping its current order.
    pub async fn rebuild_tree(&self) -> AppResult<usize> {
        let mut tx = self.db.begin().await?;
        let mut parents = vec![None];
        let mut groups = 0;
        while let Some(parent_id) = parents.pop() {
            let children = tx.children(parent_id).await?;
            if children.is_empty() {
                continue;
            }
            let ids: Vec<i64> = children.iter().map(|p| p.id).collect();
            tree::renumber_siblings(&mut tx, parent_id, &ids).await?;
            parents.extend(ids.into_iter().map(Some));
            groups += 1;
        }
        self.db.commit(tx).await?;
        Ok(groups)
    }

    /// Compare every stored path with the one the tree implies and fix the
    /// ones that differ.
    pub async fn recalculate_paths(&self) -> AppResult<Vec<PathRepair>> {
        let mut tx = self.db.begin().await?;
        let mut repairs = Vec::new();
        let mut queue = tx.children(None).await?;
        // Parents come before their children, so expected paths build on fixed ones.
        let mut index = 0;
        while index < queue.len() {
            let page = queue[index].clone();
            index += 1;
            let expected = tree::expected_path(&mut tx, &page).await?;
            if expected != page.materialized_path {
                tracing::warn!(page_id = page.id, old = %page.materialized_path, new = %expected, "fixing page path");
                tx.set_materialized_path(page.id, &expected).await?;
                repairs.push(PathRepair {
                    page_id: page.id,
                    title: page.title.clone(),
                    old_path: page.materialized_path.clone(),
                    new_path: expected,
                });
            }
            queue.extend(tx.children(Some(page.id)).await?);
        }
        self.db.commit(tx).await?;
        Ok(repairs)
    }
}
