// Layout registry - the set of layouts pages may be built from

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::layouts::{FieldKind, FieldSpec, LayoutMeta};

pub const PLACEHOLDER_LAYOUT: &str = "Placeholder";
pub const REDIRECT_LAYOUT: &str = "Redirect";

/// Layout descriptors keyed by layout key. Built at startup, then shared
/// read-only through the application state.
#[derive(Debug, Default, Clone)]
pub struct LayoutRegistry {
    layouts: BTreeMap<String, Arc<LayoutMeta>>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in Placeholder and Redirect layouts.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for layout in [placeholder_layout(), redirect_layout()] {
            let registered = registry.register(layout);
            debug_assert!(matches!(registered, Ok(true)));
        }
        registry
    }

    /// Returns `Ok(false)` when a layout with the same key is already present.
    pub fn register(&mut self, layout: LayoutMeta) -> AppResult<bool> {
        layout.validate()?;
        if self.layouts.contains_key(&layout.key) {
            tracing::debug!(layout = %layout.name, "layout already registered");
            return Ok(false);
        }
        tracing::info!(layout = %layout.name, key = %layout.key, "registered page layout");
        self.layouts.insert(layout.key.clone(), Arc::new(layout));
        Ok(true)
    }

    pub fn unregister(&mut self, name_or_key: &str) -> AppResult<Arc<LayoutMeta>> {
        let key = self
            .resolve_key(name_or_key)
            .ok_or_else(|| not_registered(name_or_key))?;
        self.layouts.remove(&key).ok_or_else(|| not_registered(name_or_key))
    }

    pub fn get(&self, key: &str) -> Option<Arc<LayoutMeta>> {
        self.layouts.get(key).cloned()
    }

    /// Look up by display name, falling back to the key.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<LayoutMeta>> {
        self.resolve_key(name).and_then(|key| self.get(&key))
    }

    pub fn require(&self, key: &str) -> AppResult<Arc<LayoutMeta>> {
        self.get(key).ok_or_else(|| not_registered(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LayoutMeta>> {
        self.layouts.values()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    fn resolve_key(&self, name_or_key: &str) -> Option<String> {
        self.layouts
            .values()
            .find(|layout| layout.name == name_or_key)
            .map(|layout| layout.key.clone())
            .or_else(|| self.layouts.contains_key(name_or_key).then(|| name_or_key.to_string()))
    }
}

fn not_registered(name: &str) -> AppError {
    AppError::ConfigurationError(format!(
        "The page layout {} cannot be unregistered as it has not been registered",
        name
    ))
}

pub fn placeholder_layout() -> LayoutMeta {
    LayoutMeta::new(PLACEHOLDER_LAYOUT)
        .template("pagemanager/placeholder.html")
        .context("placeholder", serde_json::Value::Bool(true))
}

pub fn redirect_layout() -> LayoutMeta {
    LayoutMeta::new(REDIRECT_LAYOUT)
        .field(FieldSpec::new("url", FieldKind::Url))
        .redirect_field("url")
}
