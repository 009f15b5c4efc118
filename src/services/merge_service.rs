// Draft merges - fold a revised draft copy back onto its original

use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::forms::SLUG_MAX_LENGTH;
use crate::infrastructure::{current_time_millis, DatabaseTransaction};
use crate::layouts::{LayoutMeta, RelationKind};
use crate::models::Page;
use crate::services::events::PageEvent;
use crate::services::layout_store;
use crate::services::page_service::PageService;
use crate::services::tree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewItem {
    pub kind: String,
    pub id: i64,
    pub label: String,
}

/// What a merge will remove, replace and move. The draft page row and its
/// child pages never appear in `deleted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergePreview {
    pub original_id: i64,
    pub draft_id: i64,
    /// The draft's layout, its inline records and its many-to-many links.
    pub deleted: Vec<PreviewItem>,
    /// The original's inline records, replaced by copies of the draft's.
    pub replaced: Vec<PreviewItem>,
    /// Children of the draft that move under the original.
    pub reparented: Vec<PreviewItem>,
    /// Moved children whose slug is already taken under the original.
    pub renamed: Vec<SlugChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlugChange {
    pub id: i64,
    pub from: String,
    pub to: String,
}

/// `slug` if no sibling uses it, otherwise the first free `slug-2`, `slug-3`, ...
pub fn free_slug(slug: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == slug) {
        return slug.to_string();
    }
    (2..)
        .map(|n| {
            let suffix = format!("-{}", n);
            let room = SLUG_MAX_LENGTH.saturating_sub(suffix.len());
            let base: String = slug.chars().take(room).collect();
            format!("{}{}", base.trim_end_matches('-'), suffix)
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| slug.to_string())
}

fn record_label(record: &crate::models::StoredObject) -> String {
    ["title", "name", "label"]
        .iter()
        .find_map(|key| record.field(key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} {}", record.object_type, record.id))
}

/// The draft title without the draft marker, when present.
pub fn strip_draft_suffix<'a>(title: &'a str, suffix: &str) -> &'a str {
    title.strip_suffix(suffix).unwrap_or(title)
}

impl PageService {
    async fn merge_pair(&self, tx: &mut DatabaseTransaction, draft_id: i64) -> AppResult<(Page, Page)> {
        let draft = tx.require_page(draft_id).await?;
        let original_id = draft
            .copy_of
            .ok_or_else(|| AppError::BadRequest(format!("Page \"{}\" is not a draft copy", draft)))?;
        let original = tx.require_page(original_id).await?;
        if draft.layout_type != original.layout_type {
            return Err(AppError::Validation(format!(
                "Draft copy \"{}\" uses a different layout than its original",
                draft
            )));
        }
        Ok((original, draft))
    }

    pub async fn merge_preview(&self, draft_id: i64) -> AppResult<MergePreview> {
        let db = self.database();
        let mut tx = db.begin().await?;
        let (original, draft) = self.merge_pair(&mut tx, draft_id).await?;
        let meta = self.layout_meta(&draft);
        let mut preview = MergePreview {
            original_id: original.id,
            draft_id: draft.id,
            ..MergePreview::default()
        };

        if let Some(layout_id) = draft.layout_id {
            let layout = tx.require_object(layout_id).await?;
            preview.deleted.push(PreviewItem {
                kind: "layout".to_string(),
                id: layout.id,
                label: meta
                    .as_ref()
                    .map(|m| format!("{} layout", m.name))
                    .unwrap_or_else(|| layout.object_type.clone()),
            });
            let inline_types: Vec<String> = meta
                .as_ref()
                .map(|m| m.relations_of(RelationKind::Inline).map(|r| r.association_type(&m.key)).collect())
                .unwrap_or_default();
            for assoc in tx.associations(layout_id, None).await? {
                if inline_types.contains(&assoc.association_type) {
                    if let Some(record) = tx.object(assoc.target_id).await? {
                        preview.deleted.push(PreviewItem {
                            kind: record.object_type.clone(),
                            id: record.id,
                            label: record_label(&record),
                        });
                    }
                } else {
                    preview.deleted.push(PreviewItem {
                        kind: "link".to_string(),
                        id: assoc.target_id,
                        label: format!("{} -> {}", assoc.association_type, assoc.target_id),
                    });
                }
            }
        }

        if let (Some(meta), Some(layout_id)) = (meta.as_deref(), original.layout_id) {
            for record in layout_store::inline_records(&mut tx, meta, layout_id).await? {
                preview.replaced.push(PreviewItem {
                    kind: record.object_type.clone(),
                    id: record.id,
                    label: record_label(&record),
                });
            }
        }

        for (child, old_slug) in self.reparented_children(&mut tx, &original, &draft).await? {
            if child.slug != old_slug {
                preview.renamed.push(SlugChange {
                    id: child.id,
                    from: old_slug,
                    to: child.slug.clone(),
                });
            }
            preview.reparented.push(PreviewItem {
                kind: "page".to_string(),
                id: child.id,
                label: child.title.clone(),
            });
        }
        db.rollback(tx).await?;
        Ok(preview)
    }

    /// The draft's children as they will sit under the original, paired with
    /// their current slug. A slug already used under the original is
    /// replaced with the next free numbered one.
    async fn reparented_children(
        &self,
        tx: &mut DatabaseTransaction,
        original: &Page,
        draft: &Page,
    ) -> AppResult<Vec<(Page, String)>> {
        let mut taken: Vec<String> = tx
            .children(Some(original.id))
            .await?
            .into_iter()
            .map(|p| p.slug)
            .collect();
        let mut moved = Vec::new();
        for mut child in tx.children(Some(draft.id)).await? {
            let old_slug = child.slug.clone();
            child.slug = free_slug(&old_slug, &taken);
            child.parent_id = Some(original.id);
            taken.push(child.slug.clone());
            moved.push((child, old_slug));
        }
        Ok(moved)
    }

    /// Copy the draft's content onto its original, move the draft's children
    /// under the original, then delete the draft and its layout. The
    /// original keeps its identity: id, slug, status, tree position,
    /// homepage flag, creation date and layout pointer.
    pub async fn merge_draft(&self, draft_id: i64) -> AppResult<Page> {
        let db = self.database();
        let mut tx = db.begin().await?;
        let (mut original, draft) = self.merge_pair(&mut tx, draft_id).await?;
        let meta = self.layout_meta(&draft);

        original.title = strip_draft_suffix(&draft.title, &self.settings().draft_title_suffix).to_string();
        original.description = draft.description.clone();
        original.visibility = draft.visibility;
        original.extra = draft.extra.clone();
        original.date_modified = current_time_millis();

        match (original.layout_id, draft.layout_id) {
            (Some(target_id), Some(source_id)) => {
                self.merge_layout(&mut tx, meta.as_deref(), target_id, source_id).await?;
            }
            (None, Some(source_id)) => {
                // Nothing to merge into; the original adopts a copy.
                let copy = layout_store::duplicate_layout(&mut tx, self.ids(), meta.as_deref(), source_id).await?;
                original.layout_id = Some(copy.id);
                original.layout_type = draft.layout_type.clone();
            }
            _ => {}
        }

        // Page-level associations follow the draft.
        tx.delete_associations_from(original.id).await?;
        for assoc in tx.associations(draft.id, None).await? {
            tx.add_association(original.id, &assoc.association_type, assoc.target_id)
                .await?;
        }

        // Children of both end up under the original, draft's after the original's.
        let mut order: Vec<i64> = tx.children(Some(original.id)).await?.into_iter().map(|p| p.id).collect();
        for (moved, old_slug) in self.reparented_children(&mut tx, &original, &draft).await? {
            if moved.slug != old_slug {
                tracing::info!(page_id = moved.id, from = %old_slug, to = %moved.slug, "renamed child on merge");
            }
            tx.update_page(&moved).await?;
            order.push(moved.id);
        }

        if let Some(layout_id) = draft.layout_id {
            layout_store::delete_layout(&mut tx, meta.as_deref(), layout_id).await?;
        }
        tx.delete_page_row(draft.id).await?;

        tx.update_page(&original).await?;
        tree::renumber_siblings(&mut tx, Some(original.id), &order).await?;
        tree::renumber_siblings(&mut tx, original.parent_id, &[]).await?;
        tree::refresh_subtree_paths(&mut tx, original.id).await?;
        let merged = tx.require_page(original.id).await?;
        db.commit(tx).await?;

        tracing::info!(original_id = merged.id, draft_id, "merged draft copy");
        self.events().publish(PageEvent::Merged {
            original_id: merged.id,
            draft_id,
        });
        Ok(merged)
    }

    /// Field values and many-to-many lists are copied over; inline records
    /// of the target are replaced by duplicates of the source's.
    async fn merge_layout(
        &self,
        tx: &mut DatabaseTransaction,
        meta: Option<&LayoutMeta>,
        target_id: i64,
        source_id: i64,
    ) -> AppResult<()> {
        let source = tx.require_object(source_id).await?;
        tx.update_object_data(target_id, &source.data).await?;

        let inline_types: Vec<String> = meta
            .map(|m| m.relations_of(RelationKind::Inline).map(|r| r.association_type(&m.key)).collect())
            .unwrap_or_default();

        for inline_type in &inline_types {
            for old in tx.association_targets(target_id, inline_type).await? {
                tx.delete_object(old).await?;
            }
        }
        tx.delete_associations_from(target_id).await?;

        for assoc in tx.associations(source_id, None).await? {
            let target = if inline_types.contains(&assoc.association_type) {
                let record = tx.require_object(assoc.target_id).await?;
                layout_store::duplicate_record(tx, self.ids(), &record).await?.id
            } else {
                assoc.target_id
            };
            tx.add_association(target_id, &assoc.association_type, target).await?;
        }
        Ok(())
    }
}
