// Draft copies - an unpublished shadow of a published page that editors can
// revise before merging it back

use serde::Serialize;
use std::fmt;

use crate::error::{AppError, AppResult};
use crate::forms::suffixed_slug;
use crate::infrastructure::current_time_millis;
use crate::models::{Page, PageStatus};
use crate::services::events::PageEvent;
use crate::services::layout_store;
use crate::services::page_service::PageService;
use crate::services::tree;

/// Why a page could not be copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CopyRejection {
    DraftCopy,
    DraftExists { draft_id: i64 },
    NotPublished,
}

impl fmt::Display for CopyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyRejection::DraftCopy => f.write_str("You cannot copy a draft copy."),
            CopyRejection::DraftExists { .. } => f.write_str("A draft copy already exists."),
            CopyRejection::NotPublished => f.write_str("Only published pages can be copied."),
        }
    }
}

impl PageService {
    /// Why `page` cannot be copied right now, if anything.
    pub async fn copy_rejection(&self, page: &Page) -> AppResult<Option<CopyRejection>> {
        if page.is_draft_copy() {
            return Ok(Some(CopyRejection::DraftCopy));
        }
        if let Some(draft) = self.database().get_draft_copy(page.id).await? {
            return Ok(Some(CopyRejection::DraftExists { draft_id: draft.id }));
        }
        if !page.is_published() {
            return Ok(Some(CopyRejection::NotPublished));
        }
        Ok(None)
    }

    /// Create the draft copy of a published page: a new unpublished sibling
    /// placed right after it, with a deep copy of its layout.
    pub async fn copy_page(&self, page_id: i64) -> AppResult<Page> {
        let db = self.database();
        let mut tx = db.begin().await?;
        let original = tx.require_page(page_id).await?;

        if original.is_draft_copy() {
            return Err(AppError::CopyRejected(CopyRejection::DraftCopy));
        }
        if let Some(draft) = tx.draft_copy_of(original.id).await? {
            return Err(AppError::CopyRejected(CopyRejection::DraftExists { draft_id: draft.id }));
        }
        if !original.is_published() {
            return Err(AppError::CopyRejected(CopyRejection::NotPublished));
        }

        let layout_id = match original.layout_id {
            Some(layout_id) => {
                let meta = self.layout_meta(&original);
                Some(layout_store::duplicate_layout(&mut tx, self.ids(), meta.as_deref(), layout_id).await?.id)
            }
            None => None,
        };

        let settings = self.settings();
        let now = current_time_millis();
        let mut draft = Page {
            id: self.ids().next_id(),
            status: PageStatus::Draft,
            title: format!("{}{}", original.title, settings.draft_title_suffix),
            slug: suffixed_slug(&original.slug, &settings.draft_slug_suffix),
            copy_of: Some(original.id),
            is_homepage: false,
            layout_id,
            date_created: now,
            date_modified: now,
            ..original.clone()
        };
        draft.materialized_path = tree::expected_path(&mut tx, &draft).await?;
        tx.insert_page(&draft).await?;

        for assoc in tx.associations(original.id, None).await? {
            tx.add_association(draft.id, &assoc.association_type, assoc.target_id)
                .await?;
        }
        tree::place_after(&mut tx, original.parent_id, original.id, draft.id).await?;
        let draft = tx.require_page(draft.id).await?;
        db.commit(tx).await?;

        tracing::info!(original_id = original.id, draft_id = draft.id, "created draft copy");
        self.events().publish(PageEvent::Copied {
            original_id: original.id,
            draft_id: draft.id,
        });
        Ok(draft)
    }
}
