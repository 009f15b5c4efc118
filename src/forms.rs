// Page forms - input cleaning for the admin add/change views

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::models::{NewPage, PageChanges, PageStatus, Visibility};
use crate::permissions::PagePermission;

pub const SLUG_MAX_LENGTH: usize = 32;
pub const TITLE_MAX_LENGTH: usize = 256;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").unwrap());
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());

pub const DRAFT_COPY_PUBLISHED_MESSAGE: &str = "This page is an unpublished draft copy of a page that is \
     already published. If you want to publish this over top of the existing item, you can do so by merging it.";

/// Lowercase, drop punctuation, collapse whitespace and hyphens into one hyphen.
pub fn slugify(value: &str) -> String {
    let ascii: String = value.chars().filter(|c| c.is_ascii()).collect();
    let cleaned = NON_WORD_RE.replace_all(&ascii, "");
    let lowered = cleaned.trim().to_lowercase();
    SEPARATOR_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

pub fn clean_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required.".to_string()));
    }
    if title.chars().count() > TITLE_MAX_LENGTH {
        return Err(AppError::Validation(format!(
            "Title must be at most {} characters.",
            TITLE_MAX_LENGTH
        )));
    }
    Ok(title.to_string())
}

/// A blank slug is prepopulated from the title.
pub fn clean_slug(slug: Option<&str>, title: &str) -> AppResult<String> {
    let slug = match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_string(),
        None => {
            let mut generated = slugify(title);
            generated.truncate(SLUG_MAX_LENGTH);
            generated.trim_end_matches('-').to_string()
        }
    };
    validate_slug(&slug)?;
    Ok(slug)
}

/// `slug` followed by `suffix`, cutting the slug so the result still fits.
pub fn suffixed_slug(slug: &str, suffix: &str) -> String {
    let room = SLUG_MAX_LENGTH.saturating_sub(suffix.chars().count());
    let base: String = slug.chars().take(room).collect();
    format!("{}{}", base.trim_end_matches('-'), suffix)
}

pub fn validate_slug(slug: &str) -> AppResult<()> {
    if slug.is_empty() || !SLUG_RE.is_match(slug) {
        return Err(AppError::Validation(format!(
            "Enter a valid slug consisting of letters, numbers, underscores or hyphens (got {:?}).",
            slug
        )));
    }
    if slug.len() > SLUG_MAX_LENGTH {
        return Err(AppError::Validation(format!(
            "Slug must be at most {} characters.",
            SLUG_MAX_LENGTH
        )));
    }
    Ok(())
}

/// A draft copy can only reach the published state through a merge.
pub fn check_draft_copy_status(copy_of: Option<i64>, status: PageStatus) -> AppResult<()> {
    if copy_of.is_some() && status == PageStatus::Published {
        return Err(AppError::Validation(DRAFT_COPY_PUBLISHED_MESSAGE.to_string()));
    }
    Ok(())
}

/// Status/visibility edits need their own permissions. `baseline` is the
/// persisted pair on change and the defaults on add. Returns the message
/// shown to the editor.
pub fn check_restricted_fields<F>(
    lookup_perm: F,
    baseline: (PageStatus, Visibility),
    submitted: (PageStatus, Visibility),
) -> Result<(), String>
where
    F: Fn(&str) -> bool,
{
    if submitted.0 != baseline.0 && !lookup_perm(PagePermission::ChangeStatus.codename()) {
        return Err("You do not have permission to change the status of this page.".to_string());
    }
    if submitted.1 != baseline.1 && !lookup_perm(PagePermission::ChangeVisibility.codename()) {
        return Err("You do not have permission to change the visibility of this page.".to_string());
    }
    Ok(())
}

/// Combined page + layout form as posted to the admin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageForm {
    /// Layout name; only read on add.
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<PageStatus>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<i64>>,
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,
    #[serde(rename = "_continue", default)]
    pub continue_editing: bool,
    #[serde(rename = "_addanother", default)]
    pub add_another: bool,
}

impl PageForm {
    /// Status and visibility as they would be saved, filling gaps from `baseline`.
    pub fn submitted(&self, baseline: (PageStatus, Visibility)) -> (PageStatus, Visibility) {
        (
            self.status.unwrap_or(baseline.0),
            self.visibility.unwrap_or(baseline.1),
        )
    }

    pub fn into_new_page(self) -> AppResult<NewPage> {
        let layout = self
            .layout
            .clone()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Choose a layout for the new page.".to_string()))?;
        let title = clean_title(&self.title)?;
        let slug = clean_slug(self.slug.as_deref(), &title)?;
        Ok(NewPage {
            layout,
            title,
            slug: Some(slug),
            parent_id: self.parent_id,
            sort_order: self.sort_order,
            status: self.status.unwrap_or_default(),
            visibility: self.visibility.unwrap_or_default(),
            description: self.description.filter(|d| !d.trim().is_empty()),
            fields: self.fields,
            relations: self.relations,
            extra: self.extra.unwrap_or_default(),
        })
    }

    /// A blank slug keeps the stored one; the service validates a slug that changed.
    pub fn into_changes(self) -> AppResult<PageChanges> {
        let title = clean_title(&self.title)?;
        let slug = self
            .slug
            .map(|slug| slug.trim().to_string())
            .filter(|slug| !slug.is_empty());
        Ok(PageChanges {
            title: Some(title),
            slug,
            description: Some(self.description.filter(|d| !d.trim().is_empty())),
            status: self.status,
            visibility: self.visibility,
            parent_id: None,
            extra: self.extra,
            fields: Some(self.fields),
            relations: self.relations,
        })
    }
}
