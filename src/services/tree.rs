// Page tree helpers - sibling ordering, ancestry and materialized paths.
// All of these run inside the caller's transaction.

use std::collections::VecDeque;

use crate::error::{AppError, AppResult};
use crate::infrastructure::DatabaseTransaction;
use crate::models::Page;

/// Materialized path `page` should have given its parent's stored path.
pub async fn expected_path(tx: &mut DatabaseTransaction, page: &Page) -> AppResult<String> {
    match page.parent_id {
        Some(parent_id) => {
            let parent = tx.require_page(parent_id).await?;
            Ok(join_path(&parent.materialized_path, &page.slug))
        }
        None => Ok(page.slug.clone()),
    }
}

pub fn join_path(parent_path: &str, slug: &str) -> String {
    if parent_path.is_empty() {
        slug.to_string()
    } else {
        format!("{}/{}", parent_path, slug)
    }
}

/// Every page below `root_id`, breadth first. `root_id` itself is excluded.
pub async fn descendants(tx: &mut DatabaseTransaction, root_id: i64) -> AppResult<Vec<Page>> {
    let mut found = Vec::new();
    let mut queue = VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        for child in tx.children(Some(id)).await? {
            queue.push_back(child.id);
            found.push(child);
        }
    }
    Ok(found)
}

/// True when `ancestor_id` is `page_id` or one of its ancestors.
pub async fn is_ancestor_or_self(tx: &mut DatabaseTransaction, ancestor_id: i64, page_id: i64) -> AppResult<bool> {
    let mut current = Some(page_id);
    let mut steps = 0usize;
    while let Some(id) = current {
        if id == ancestor_id {
            return Ok(true);
        }
        steps += 1;
        if steps > 10_000 {
            return Err(AppError::Internal(format!("Page tree above {} does not terminate", page_id)));
        }
        current = tx.require_page(id).await?.parent_id;
    }
    Ok(false)
}

/// Rewrite the stored paths of `root_id` and everything under it. Returns
/// the number of rows whose path changed.
pub async fn refresh_subtree_paths(tx: &mut DatabaseTransaction, root_id: i64) -> AppResult<usize> {
    let root = tx.require_page(root_id).await?;
    let mut changed = 0;
    let mut queue = VecDeque::from([root]);
    while let Some(page) = queue.pop_front() {
        let path = expected_path(tx, &page).await?;
        if path != page.materialized_path {
            tx.set_materialized_path(page.id, &path).await?;
            changed += 1;
        }
        queue.extend(tx.children(Some(page.id)).await?);
    }
    Ok(changed)
}

/// Give the siblings under `parent_id` dense orders 1..n in `ordered_ids`
/// order; siblings not listed keep their relative order after them.
pub async fn renumber_siblings(
    tx: &mut DatabaseTransaction,
    parent_id: Option<i64>,
    ordered_ids: &[i64],
) -> AppResult<()> {
    let siblings = tx.children(parent_id).await?;
    let rest = siblings
        .iter()
        .map(|p| p.id)
        .filter(|id| !ordered_ids.contains(id));
    let order: Vec<i64> = ordered_ids.iter().copied().chain(rest).collect();
    for (index, id) in order.into_iter().enumerate() {
        tx.set_sort_order(id, index as i64 + 1).await?;
    }
    Ok(())
}

/// Reorder siblings so `new_id` sits immediately after `anchor_id`.
pub async fn place_after(
    tx: &mut DatabaseTransaction,
    parent_id: Option<i64>,
    anchor_id: i64,
    new_id: i64,
) -> AppResult<()> {
    let mut order: Vec<i64> = tx
        .children(parent_id)
        .await?
        .into_iter()
        .map(|p| p.id)
        .filter(|id| *id != new_id)
        .collect();
    let position = order
        .iter()
        .position(|id| *id == anchor_id)
        .map(|idx| idx + 1)
        .unwrap_or(order.len());
    order.insert(position, new_id);
    renumber_siblings(tx, parent_id, &order).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "about"), "about");
        assert_eq!(join_path("about", "team"), "about/team");
    }
}
