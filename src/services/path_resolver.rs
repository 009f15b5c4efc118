// Path resolution - map "/a/b/c/" onto the page tree one slug at a time

use crate::error::{AppError, AppResult};
use crate::infrastructure::PageDatabase;
use crate::models::Page;

/// Walk from the roots, matching one slug per level. A level with no match
/// or with more than one match is not found.
pub async fn resolve_path(db: &PageDatabase, path: &str) -> AppResult<Page> {
    let slugs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if slugs.is_empty() {
        return Err(AppError::NotFound("Empty page path".to_string()));
    }

    let mut parent_id = None;
    let mut current = None;
    for slug in slugs {
        let mut matches = db.get_children_by_slug(parent_id, slug).await?;
        if matches.len() != 1 {
            return Err(AppError::NotFound(format!("No page at /{}", path.trim_matches('/'))));
        }
        let page = matches.remove(0);
        parent_id = Some(page.id);
        current = Some(page);
    }
    current.ok_or_else(|| AppError::NotFound(format!("No page at /{}", path.trim_matches('/'))))
}

/// The single page flagged as homepage.
pub async fn resolve_homepage(db: &PageDatabase) -> AppResult<Page> {
    let mut homepages = db.get_homepages().await?;
    match homepages.len() {
        1 => Ok(homepages.remove(0)),
        0 => Err(AppError::NotFound("No homepage has been set".to_string())),
        n => {
            tracing::error!(count = n, "more than one page is flagged as homepage");
            Err(AppError::NotFound("No unique homepage".to_string()))
        }
    }
}
