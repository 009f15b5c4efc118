// Page model - the tree node every layout hangs off

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Sibling order given to pages that do not ask for one.
pub const DEFAULT_SORT_ORDER: i64 = 99999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    #[default]
    Draft,
    Review,
    Published,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Draft => "draft",
            PageStatus::Review => "review",
            PageStatus::Published => "published",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PageStatus::Draft => "Draft",
            PageStatus::Review => "Pending Review",
            PageStatus::Published => "Published",
        }
    }
}

impl FromStr for PageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PageStatus::Draft),
            "review" => Ok(PageStatus::Review),
            "published" => Ok(PageStatus::Published),
            other => Err(AppError::Validation(format!("Unknown page status: {}", other))),
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(AppError::Validation(format!("Unknown visibility: {}", other))),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page row. `layout_type`/`layout_id` form the polymorphic pointer to the
/// layout object holding the page's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub status: PageStatus,
    pub visibility: Visibility,
    pub copy_of: Option<i64>,
    pub is_homepage: bool,
    pub layout_type: Option<String>,
    pub layout_id: Option<i64>,
    pub materialized_path: String,
    pub extra: Map<String, Value>,
    pub date_created: i64,
    pub date_modified: i64,
}

impl Page {
    pub fn is_published(&self) -> bool {
        self.status == PageStatus::Published
    }

    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Published and public: anyone may see it.
    pub fn is_unrestricted(&self) -> bool {
        self.is_published() && self.is_visible()
    }

    pub fn is_draft_copy(&self) -> bool {
        self.copy_of.is_some()
    }

    pub fn publish(&mut self) {
        self.status = PageStatus::Published;
    }

    /// Slugs of the ancestors joined by "/".
    pub fn path_prefix(&self) -> &str {
        match self.materialized_path.rfind('/') {
            Some(idx) => &self.materialized_path[..idx],
            None => "",
        }
    }

    pub fn absolute_url(&self) -> String {
        if self.is_homepage {
            "/".to_string()
        } else {
            format!("/{}/", self.materialized_path)
        }
    }

    pub fn node_id(&self) -> String {
        format!("node-{}", self.id)
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Input for creating a page together with its layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPage {
    /// Registered layout name (or key).
    pub layout: String,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub status: PageStatus,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<i64>>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl NewPage {
    pub fn new(layout: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            layout: layout.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn status(mut self, status: PageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn relation(mut self, name: impl Into<String>, targets: Vec<i64>) -> Self {
        self.relations.insert(name.into(), targets);
        self
    }
}

/// Partial update of a page and its layout. `None` leaves a value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<PageStatus>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    /// `Some(None)` moves the page to the root.
    #[serde(default)]
    pub parent_id: Option<Option<i64>>,
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,
    /// Layout field values; merged over the stored ones.
    #[serde(default)]
    pub fields: Option<Map<String, Value>>,
    /// Replacement target lists for many-to-many relations.
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<i64>>,
}

impl PageChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.slug.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.visibility.is_none()
            && self.parent_id.is_none()
            && self.extra.is_none()
            && self.fields.is_none()
            && self.relations.is_empty()
    }
}

/// Canned page queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageFilter {
    #[default]
    All,
    Published,
    Unpublished,
    Public,
    Private,
    DraftCopies,
}

impl PageFilter {
    pub(crate) fn where_clause(&self) -> &'static str {
        match self {
            PageFilter::All => "1 = 1",
            PageFilter::Published => "status = 'published'",
            PageFilter::Unpublished => "status != 'published'",
            PageFilter::Public => "visibility = 'public'",
            PageFilter::Private => "visibility != 'public'",
            PageFilter::DraftCopies => "copy_of IS NOT NULL",
        }
    }
}
