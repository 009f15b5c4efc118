// Page permissions - permission names, lookup predicates and the privacy
// rules that gate page access in the admin and public views

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::error::AppResult;
use crate::models::{Page, User};

/// Permissions recognized by the page manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePermission {
    ViewDraftPages,
    ViewPrivatePages,
    ChangeStatus,
    ChangeVisibility,
    ModifyPublishedPages,
    AddPage,
    ChangePage,
    DeletePage,
}

impl PagePermission {
    pub const ALL: [PagePermission; 8] = [
        PagePermission::ViewDraftPages,
        PagePermission::ViewPrivatePages,
        PagePermission::ChangeStatus,
        PagePermission::ChangeVisibility,
        PagePermission::ModifyPublishedPages,
        PagePermission::AddPage,
        PagePermission::ChangePage,
        PagePermission::DeletePage,
    ];

    pub fn codename(&self) -> &'static str {
        match self {
            PagePermission::ViewDraftPages => "view_draft_pages",
            PagePermission::ViewPrivatePages => "view_private_pages",
            PagePermission::ChangeStatus => "change_status",
            PagePermission::ChangeVisibility => "change_visibility",
            PagePermission::ModifyPublishedPages => "modify_published_pages",
            PagePermission::AddPage => "add_page",
            PagePermission::ChangePage => "change_page",
            PagePermission::DeletePage => "delete_page",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PagePermission::ViewDraftPages => "Can view draft pages",
            PagePermission::ViewPrivatePages => "Can view private pages",
            PagePermission::ChangeStatus => "Can change the status of pages",
            PagePermission::ChangeVisibility => "Can change the visibility of pages",
            PagePermission::ModifyPublishedPages => "Can modify published pages",
            PagePermission::AddPage => "Can add page",
            PagePermission::ChangePage => "Can change page",
            PagePermission::DeletePage => "Can delete page",
        }
    }

    pub fn from_codename(codename: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|perm| perm.codename() == codename)
    }
}

impl fmt::Display for PagePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codename())
    }
}

pub fn get_permissions() -> Vec<PagePermission> {
    PagePermission::ALL.to_vec()
}

/// Predicate answering "does `user` hold this permission?" for the
/// `recognized` names. Superusers hold everything; anonymous users nothing.
pub fn lookup_function(user: Option<&User>, recognized: &[PagePermission]) -> impl Fn(&str) -> bool {
    let is_superuser = user.is_some_and(|u| u.is_superuser);
    let granted: Vec<&'static str> = match user {
        Some(user) => recognized
            .iter()
            .map(PagePermission::codename)
            .filter(|codename| user.has_perm(codename))
            .collect(),
        None => Vec::new(),
    };
    move |name: &str| is_superuser || granted.iter().any(|codename| *codename == name)
}

/// What the viewer is trying to do with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    /// Render it on the public site.
    View,
    /// Open its admin form.
    Open,
    /// Create a page (or a draft copy).
    Add,
    /// Save changes over the persisted page.
    Change,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PrivacyContext<'a> {
    pub user: Option<&'a User>,
    /// Persisted state of the page; `None` when adding.
    pub page: Option<&'a Page>,
    pub action: PageAction,
}

impl PrivacyContext<'_> {
    fn has_perm(&self, perm: PagePermission) -> bool {
        self.user.is_some_and(|user| user.has_perm(perm.codename()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivacyResult {
    Allow,
    Deny(String),
    Skip,
}

#[async_trait]
pub trait PrivacyRule: Send + Sync {
    async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult>;

    fn name(&self) -> &str;

    fn actions(&self) -> &[PageAction];

    /// Higher runs first.
    fn priority(&self) -> i32;
}

/// Superusers may do anything.
pub struct SuperuserRule;

#[async_trait]
impl PrivacyRule for SuperuserRule {
    async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        if ctx.user.is_some_and(|u| u.is_superuser) {
            Ok(PrivacyResult::Allow)
        } else {
            Ok(PrivacyResult::Skip)
        }
    }

    fn name(&self) -> &str {
        "superuser"
    }

    fn actions(&self) -> &[PageAction] {
        &[
            PageAction::View,
            PageAction::Open,
            PageAction::Add,
            PageAction::Change,
            PageAction::Delete,
        ]
    }

    fn priority(&self) -> i32 {
        1000
    }
}

/// Unpublished pages are only visible with `view_draft_pages`.
pub struct DraftVisibilityRule;

#[async_trait]
impl PrivacyRule for DraftVisibilityRule {
    async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        match ctx.page {
            Some(page) if !page.is_published() && !ctx.has_perm(PagePermission::ViewDraftPages) => Ok(
                PrivacyResult::Deny(format!("You do not have permission to view the unpublished page \"{}\".", page)),
            ),
            _ => Ok(PrivacyResult::Skip),
        }
    }

    fn name(&self) -> &str {
        "draft_visibility"
    }

    fn actions(&self) -> &[PageAction] {
        &[PageAction::View, PageAction::Open, PageAction::Change, PageAction::Delete]
    }

    fn priority(&self) -> i32 {
        500
    }
}

/// Private pages are only visible with `view_private_pages`.
pub struct PrivateVisibilityRule;

#[async_trait]
impl PrivacyRule for PrivateVisibilityRule {
    async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        match ctx.page {
            Some(page) if !page.is_visible() && !ctx.has_perm(PagePermission::ViewPrivatePages) => Ok(
                PrivacyResult::Deny(format!("You do not have permission to view the private page \"{}\".", page)),
            ),
            _ => Ok(PrivacyResult::Skip),
        }
    }

    fn name(&self) -> &str {
        "private_visibility"
    }

    fn actions(&self) -> &[PageAction] {
        &[PageAction::View, PageAction::Open, PageAction::Change, PageAction::Delete]
    }

    fn priority(&self) -> i32 {
        490
    }
}

/// Admin actions need the matching model permission.
pub struct ModelPermissionRule;

#[async_trait]
impl PrivacyRule for ModelPermissionRule {
    async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        let required = match ctx.action {
            PageAction::Add => PagePermission::AddPage,
            PageAction::Open | PageAction::Change => PagePermission::ChangePage,
            PageAction::Delete => PagePermission::DeletePage,
            PageAction::View => return Ok(PrivacyResult::Skip),
        };
        if ctx.has_perm(required) {
            Ok(PrivacyResult::Skip)
        } else {
            Ok(PrivacyResult::Deny(format!("Permission {} required.", required)))
        }
    }

    fn name(&self) -> &str {
        "model_permission"
    }

    fn actions(&self) -> &[PageAction] {
        &[PageAction::Open, PageAction::Add, PageAction::Change, PageAction::Delete]
    }

    fn priority(&self) -> i32 {
        400
    }
}

/// Saving over a published page needs `modify_published_pages`.
pub struct PublishedModificationRule;

#[async_trait]
impl PrivacyRule for PublishedModificationRule {
    async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        match ctx.page {
            Some(page) if page.is_published() && !ctx.has_perm(PagePermission::ModifyPublishedPages) => {
                Ok(PrivacyResult::Deny(format!(
                    "You do not have permission to modify the published page \"{}\".",
                    page
                )))
            }
            _ => Ok(PrivacyResult::Skip),
        }
    }

    fn name(&self) -> &str {
        "published_modification"
    }

    fn actions(&self) -> &[PageAction] {
        &[PageAction::Change]
    }

    fn priority(&self) -> i32 {
        300
    }
}

/// Anything not denied above is allowed.
pub struct BaselineAllowRule;

#[async_trait]
impl PrivacyRule for BaselineAllowRule {
    async fn evaluate(&self, _ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        Ok(PrivacyResult::Allow)
    }

    fn name(&self) -> &str {
        "baseline_allow"
    }

    fn actions(&self) -> &[PageAction] {
        &[
            PageAction::View,
            PageAction::Open,
            PageAction::Add,
            PageAction::Change,
            PageAction::Delete,
        ]
    }

    fn priority(&self) -> i32 {
        0
    }
}

/// Priority-ordered rule list; the first Allow or Deny wins, and an empty
/// verdict is a Deny.
#[derive(Default)]
pub struct PrivacyRegistry {
    rules: Vec<Box<dyn PrivacyRule>>,
}

impl PrivacyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_rules() -> Self {
        let mut registry = Self::new();
        registry.register_rule(Box::new(SuperuserRule));
        registry.register_rule(Box::new(DraftVisibilityRule));
        registry.register_rule(Box::new(PrivateVisibilityRule));
        registry.register_rule(Box::new(ModelPermissionRule));
        registry.register_rule(Box::new(PublishedModificationRule));
        registry.register_rule(Box::new(BaselineAllowRule));
        registry
    }

    pub fn register_rule(&mut self, rule: Box<dyn PrivacyRule>) {
        self.rules.push(rule);
        self.rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority()));
    }

    pub async fn evaluate(&self, ctx: &PrivacyContext<'_>) -> AppResult<PrivacyResult> {
        for rule in &self.rules {
            if !rule.actions().contains(&ctx.action) {
                continue;
            }
            match rule.evaluate(ctx).await? {
                PrivacyResult::Skip => continue,
                verdict => {
                    tracing::debug!(rule = rule.name(), action = ?ctx.action, ?verdict, "privacy verdict");
                    return Ok(verdict);
                }
            }
        }
        Ok(PrivacyResult::Deny("Access denied.".to_string()))
    }
}

/// Per-node summary shown in the admin page tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodePermissions {
    pub can_view: bool,
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}

impl NodePermissions {
    pub fn for_page(user: Option<&User>, page: &Page) -> Self {
        let lookup = lookup_function(user, &PagePermission::ALL);
        let can_view = (page.is_visible() || lookup(PagePermission::ViewPrivatePages.codename()))
            && (page.is_published() || lookup(PagePermission::ViewDraftPages.codename()));
        Self {
            can_view,
            can_add: lookup(PagePermission::AddPage.codename()),
            can_edit: lookup(PagePermission::ChangePage.codename()),
            can_delete: lookup(PagePermission::DeletePage.codename()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageStatus, Visibility, DEFAULT_SORT_ORDER};
    use serde_json::Map;
    use std::collections::BTreeSet;

    fn user(perms: &[PagePermission], is_superuser: bool) -> User {
        User {
            id: 1,
            username: "editor".to_string(),
            is_staff: true,
            is_superuser,
            permissions: perms.iter().map(|p| p.codename().to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn page(status: PageStatus, visibility: Visibility) -> Page {
        Page {
            id: 1,
            parent_id: None,
            sort_order: DEFAULT_SORT_ORDER,
            title: "Root".to_string(),
            slug: "root".to_string(),
            description: None,
            status,
            visibility,
            copy_of: None,
            is_homepage: false,
            layout_type: None,
            layout_id: None,
            materialized_path: "root".to_string(),
            extra: Map::new(),
            date_created: 0,
            date_modified: 0,
        }
    }

    async fn verdict(user: Option<&User>, page: Option<&Page>, action: PageAction) -> PrivacyResult {
        PrivacyRegistry::with_default_rules()
            .evaluate(&PrivacyContext { user, page, action })
            .await
            .unwrap()
    }

    #[test]
    fn test_lookup_function() {
        let editor = user(&[PagePermission::ChangeStatus], false);
        let lookup = lookup_function(Some(&editor), &get_permissions());
        assert!(lookup("change_status"));
        assert!(!lookup("change_visibility"));

        let narrowed = lookup_function(Some(&editor), &[PagePermission::ChangeVisibility]);
        assert!(!narrowed("change_status"));

        let root = user(&[], true);
        let lookup = lookup_function(Some(&root), &[]);
        assert!(lookup("change_visibility"));
        assert!(lookup("anything_at_all"));

        let anonymous = lookup_function(None, &get_permissions());
        assert!(!anonymous("view_draft_pages"));
    }

    #[test]
    fn test_codename_round_trip() {
        for perm in PagePermission::ALL {
            assert_eq!(PagePermission::from_codename(perm.codename()), Some(perm));
        }
        assert_eq!(PagePermission::from_codename("fly"), None);
    }

    #[tokio::test]
    async fn test_public_view_rules() {
        let published = page(PageStatus::Published, Visibility::Public);
        assert_eq!(verdict(None, Some(&published), PageAction::View).await, PrivacyResult::Allow);

        let draft = page(PageStatus::Draft, Visibility::Public);
        assert!(matches!(verdict(None, Some(&draft), PageAction::View).await, PrivacyResult::Deny(_)));
        let drafter = user(&[PagePermission::ViewDraftPages], false);
        assert_eq!(verdict(Some(&drafter), Some(&draft), PageAction::View).await, PrivacyResult::Allow);

        let private_draft = page(PageStatus::Draft, Visibility::Private);
        assert!(matches!(
            verdict(Some(&drafter), Some(&private_draft), PageAction::View).await,
            PrivacyResult::Deny(_)
        ));
    }

    #[tokio::test]
    async fn test_change_requires_modify_published() {
        let published = page(PageStatus::Published, Visibility::Public);
        let editor = user(&[PagePermission::ChangePage], false);
        assert_eq!(verdict(Some(&editor), Some(&published), PageAction::Open).await, PrivacyResult::Allow);
        assert!(matches!(
            verdict(Some(&editor), Some(&published), PageAction::Change).await,
            PrivacyResult::Deny(_)
        ));

        let senior = user(&[PagePermission::ChangePage, PagePermission::ModifyPublishedPages], false);
        assert_eq!(verdict(Some(&senior), Some(&published), PageAction::Change).await, PrivacyResult::Allow);
        assert!(matches!(verdict(Some(&senior), None, PageAction::Add).await, PrivacyResult::Deny(_)));

        let root = user(&[], true);
        assert_eq!(verdict(Some(&root), Some(&published), PageAction::Delete).await, PrivacyResult::Allow);
    }

    #[tokio::test]
    async fn test_empty_registry_denies() {
        let registry = PrivacyRegistry::new();
        let ctx = PrivacyContext {
            user: None,
            page: None,
            action: PageAction::View,
        };
        assert!(matches!(registry.evaluate(&ctx).await.unwrap(), PrivacyResult::Deny(_)));
    }

    #[test]
    fn test_node_permissions() {
        let editor = user(&[PagePermission::ChangePage, PagePermission::ViewDraftPages], false);
        let draft = page(PageStatus::Draft, Visibility::Public);
        let perms = NodePermissions::for_page(Some(&editor), &draft);
        assert!(perms.can_view);
        assert!(perms.can_edit);
        assert!(!perms.can_add);
        assert!(!perms.can_delete);

        let private = page(PageStatus::Published, Visibility::Private);
        assert!(!NodePermissions::for_page(Some(&editor), &private).can_view);
    }

    #[tokio::test]
    async fn test_node_permissions_private_draft_needs_both() {
        let private_draft = page(PageStatus::Draft, Visibility::Private);
        let private_only = user(&[PagePermission::ViewPrivatePages], false);
        let drafts_only = user(&[PagePermission::ViewDraftPages], false);
        let both = user(&[PagePermission::ViewPrivatePages, PagePermission::ViewDraftPages], false);

        assert!(!NodePermissions::for_page(Some(&private_only), &private_draft).can_view);
        assert!(!NodePermissions::for_page(Some(&drafts_only), &private_draft).can_view);
        assert!(NodePermissions::for_page(Some(&both), &private_draft).can_view);
        assert!(matches!(
            verdict(Some(&private_only), Some(&private_draft), PageAction::View).await,
            PrivacyResult::Deny(_)
        ));
    }
}
