// Page templates - minijinja environment and the context pages render with

use minijinja::{default_auto_escape_callback, Environment};
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};

use crate::error::AppResult;
use crate::layouts::{LayoutMeta, RelationKind};
use crate::models::Page;
use crate::services::{LayoutData, PageService};

pub trait TemplateEngine: Send + Sync {
    fn render(&self, template_name: &str, context: Value) -> AppResult<String>;
}

pub struct PageRenderer {
    env: Environment<'static>,
}

impl PageRenderer {
    /// Templates are looked up in `template_dir` first, then among the
    /// embedded defaults.
    pub fn new(template_dir: Option<PathBuf>) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(default_auto_escape_callback);
        env.set_loader(move |name: &str| load_template(template_dir.as_deref(), name));
        Self { env }
    }
}

impl TemplateEngine for PageRenderer {
    fn render(&self, template_name: &str, context: Value) -> AppResult<String> {
        let tmpl = self.env.get_template(template_name)?;
        Ok(tmpl.render(minijinja::Value::from_serialize(&context))?)
    }
}

fn load_template(dir: Option<&Path>, name: &str) -> Result<Option<String>, minijinja::Error> {
    if let Some(dir) = dir {
        let relative = Path::new(name);
        let safe = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if safe {
            let path = dir.join(relative);
            if path.is_file() {
                return std::fs::read_to_string(&path).map(Some).map_err(|e| {
                    minijinja::Error::new(
                        minijinja::ErrorKind::InvalidOperation,
                        format!("could not read template {}: {}", path.display(), e),
                    )
                });
            }
        } else {
            tracing::warn!(template = name, "rejected template name outside the template directory");
            return Ok(None);
        }
    }
    Ok(embedded_template(name).map(str::to_string))
}

fn embedded_template(name: &str) -> Option<&'static str> {
    match name {
        "pagemanager/base.html" => Some(include_str!("../templates/pagemanager/base.html")),
        "pagemanager/placeholder.html" => Some(include_str!("../templates/pagemanager/placeholder.html")),
        _ => None,
    }
}

/// Template name for a layout, falling back to the configured default.
pub fn template_for(meta: Option<&LayoutMeta>, default_template: &str) -> String {
    meta.and_then(|m| m.template.clone())
        .unwrap_or_else(|| default_template.to_string())
}

pub fn page_value(page: &Page) -> AppResult<Value> {
    let mut value = serde_json::to_value(page)?;
    if let Value::Object(map) = &mut value {
        map.insert("url".to_string(), Value::String(page.absolute_url()));
        map.insert("node_id".to_string(), Value::String(page.node_id()));
        map.insert("path_prefix".to_string(), Value::String(page.path_prefix().to_string()));
    }
    Ok(value)
}

/// `{page, fields, ..static context}` for rendering `page`. Related records
/// are resolved to their data; missing ones render as null.
pub async fn page_context(service: &PageService, page: &Page) -> AppResult<Value> {
    let meta = service.layout_meta(page);
    let layout = service.get_layout(page).await?;

    let mut context = Map::new();
    if let Some(meta) = &meta {
        for (key, value) in &meta.context {
            context.insert(key.clone(), value.clone());
        }
    }
    context.insert("page".to_string(), page_value(page)?);
    let fields = match (&meta, layout) {
        (Some(meta), Some(layout)) => resolve_fields(service, meta, layout).await?,
        _ => Map::new(),
    };
    context.insert("fields".to_string(), Value::Object(fields));
    Ok(Value::Object(context))
}

async fn resolve_fields(service: &PageService, meta: &LayoutMeta, layout: LayoutData) -> AppResult<Map<String, Value>> {
    let db = service.database();
    let mut fields = layout.object.data.clone();
    fields.insert("id".to_string(), Value::from(layout.object.id));

    for relation in meta.relations_of(RelationKind::ForeignKey) {
        let resolved = match fields.get(&relation.name).and_then(Value::as_i64) {
            Some(id) => db.get_object(id).await?.map(|o| o.to_json()).unwrap_or(Value::Null),
            None => Value::Null,
        };
        fields.insert(relation.name.clone(), resolved);
    }
    for (name, targets) in &layout.relations {
        let mut records = Vec::with_capacity(targets.len());
        for id in targets {
            if let Some(record) = db.get_object(*id).await? {
                records.push(record.to_json());
            }
        }
        fields.insert(name.clone(), Value::Array(records));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_templates_render() {
        let renderer = PageRenderer::new(None);
        let html = renderer
            .render(
                "pagemanager/placeholder.html",
                json!({"page": {"title": "Soon <b>", "node_id": "node-1"}, "fields": {}}),
            )
            .unwrap();
        assert!(html.contains("Soon &lt;b&gt;"));
        assert!(html.contains("under construction"));
    }

    #[test]
    fn test_template_dir_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pagemanager")).unwrap();
        std::fs::write(dir.path().join("pagemanager/base.html"), "custom {{ page.title }}").unwrap();
        std::fs::write(dir.path().join("article.html"), "{{ fields.body }}|{{ tagline }}").unwrap();

        let renderer = PageRenderer::new(Some(dir.path().to_path_buf()));
        let html = renderer
            .render("pagemanager/base.html", json!({"page": {"title": "About"}}))
            .unwrap();
        assert_eq!(html, "custom About");
        let html = renderer
            .render("article.html", json!({"fields": {"body": "Hi"}, "tagline": "x"}))
            .unwrap();
        assert_eq!(html, "Hi|x");
        assert!(renderer.render("../secret.html", json!({})).is_err());
    }

    #[test]
    fn test_template_for() {
        let meta = LayoutMeta::new("Article").template("article.html");
        assert_eq!(template_for(Some(&meta), "pagemanager/base.html"), "article.html");
        assert_eq!(template_for(None, "pagemanager/base.html"), "pagemanager/base.html");
    }
}
