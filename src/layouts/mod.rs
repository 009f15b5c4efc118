// Page layouts - descriptors for the content types a page can carry

pub mod registry;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AppError, AppResult};
use crate::forms::slugify;

pub use registry::LayoutRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    Url,
}

/// A scalar field stored in the layout's data map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Coerce a submitted value to this field's kind. Form posts send
    /// everything as strings, so numeric and boolean strings are accepted.
    pub fn clean(&self, value: &Value) -> AppResult<Value> {
        let invalid = || AppError::Validation(format!("Invalid value for field '{}': {}", self.name, value));
        match (self.kind, value) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldKind::Text, Value::String(_)) => Ok(value.clone()),
            (FieldKind::Integer, Value::Number(n)) if n.is_i64() => Ok(value.clone()),
            (FieldKind::Integer, Value::String(s)) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
            (FieldKind::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (FieldKind::Boolean, Value::String(s)) => match s.as_str() {
                "true" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "off" | "0" | "" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            (FieldKind::Url, Value::String(s)) => {
                let s = s.trim();
                if s.starts_with('/') || s.starts_with("http://") || s.starts_with("https://") {
                    Ok(Value::String(s.to_string()))
                } else {
                    Err(invalid())
                }
            }
            _ => Err(invalid()),
        }
    }

    fn is_blank(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Id stored in the data map; copied by reference.
    ForeignKey,
    /// Ordered association to shared records.
    ManyToMany,
    /// Ordered association to records owned by the layout.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationSpec {
    pub name: String,
    pub kind: RelationKind,
    /// Object type of the related records.
    pub target_type: String,
}

impl RelationSpec {
    pub fn foreign_key(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ForeignKey, target_type)
    }

    pub fn many_to_many(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ManyToMany, target_type)
    }

    pub fn inline(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::new(name, RelationKind::Inline, target_type)
    }

    fn new(name: impl Into<String>, kind: RelationKind, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target_type: target_type.into(),
        }
    }

    /// Association type used for this relation in the object store.
    pub fn association_type(&self, layout_key: &str) -> String {
        format!("{}.{}", layout_key, self.name)
    }
}

/// Describes one layout type: its fields, relations, template and admin hints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutMeta {
    pub name: String,
    pub key: String,
    pub thumbnail: Option<String>,
    /// `None` falls back to the configured default template.
    pub template: Option<String>,
    /// Static context merged into the template context.
    pub context: Map<String, Value>,
    pub fields: Vec<FieldSpec>,
    pub relations: Vec<RelationSpec>,
    /// Admin widget overrides, field name to widget name.
    pub formfield_overrides: BTreeMap<String, String>,
    /// Inline relations edited on the admin form.
    pub inlines: Vec<String>,
    /// Fields hidden from the admin form.
    pub exclude: Vec<String>,
    /// Field holding the target URL for layouts that answer with a redirect.
    pub redirect_field: Option<String>,
}

impl LayoutMeta {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: slugify(&name),
            name,
            thumbnail: None,
            template: None,
            context: Map::new(),
            fields: Vec::new(),
            relations: Vec::new(),
            formfield_overrides: BTreeMap::new(),
            inlines: Vec::new(),
            exclude: Vec::new(),
            redirect_field: None,
        }
    }

    pub fn thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationSpec) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn formfield_override(mut self, field: impl Into<String>, widget: impl Into<String>) -> Self {
        self.formfield_overrides.insert(field.into(), widget.into());
        self
    }

    pub fn inline(mut self, relation: impl Into<String>) -> Self {
        self.inlines.push(relation.into());
        self
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.exclude.push(field.into());
        self
    }

    pub fn redirect_field(mut self, field: impl Into<String>) -> Self {
        self.redirect_field = Some(field.into());
        self
    }

    /// HTML id for the layout chooser.
    pub fn html_id(&self) -> &str {
        &self.key
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation_spec(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn relations_of(&self, kind: RelationKind) -> impl Iterator<Item = &RelationSpec> {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    /// Check the descriptor itself before it is registered.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() || self.key.is_empty() {
            return Err(AppError::ConfigurationError(
                "A page layout needs a name that slugifies to a non-empty key".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let names = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.relations.iter().map(|r| r.name.as_str()));
        for name in names {
            if name.is_empty() || name == "id" {
                return Err(AppError::ConfigurationError(format!(
                    "Layout '{}' has an invalid field name '{}'",
                    self.name, name
                )));
            }
            if !seen.insert(name) {
                return Err(AppError::ConfigurationError(format!(
                    "Layout '{}' declares '{}' more than once",
                    self.name, name
                )));
            }
        }

        for field in &self.fields {
            if let Some(default) = &field.default {
                field.clean(default).map_err(|_| {
                    AppError::ConfigurationError(format!(
                        "Default for '{}.{}' does not match its kind",
                        self.name, field.name
                    ))
                })?;
            }
        }

        for inline in &self.inlines {
            match self.relation_spec(inline) {
                Some(rel) if rel.kind == RelationKind::Inline => {}
                _ => {
                    return Err(AppError::ConfigurationError(format!(
                        "Layout '{}' lists '{}' as an inline but it is not an inline relation",
                        self.name, inline
                    )))
                }
            }
        }

        if let Some(field) = &self.redirect_field {
            match self.field_spec(field) {
                Some(spec) if matches!(spec.kind, FieldKind::Url | FieldKind::Text) => {}
                _ => {
                    return Err(AppError::ConfigurationError(format!(
                        "Redirect field '{}' of layout '{}' must be a text or url field",
                        field, self.name
                    )))
                }
            }
        }
        Ok(())
    }

    /// Validate submitted field values against the descriptor, merging them
    /// over `existing` (the stored data on update, empty on create) and
    /// filling defaults. Foreign keys travel in the same map as ids.
    pub fn clean_data(
        &self,
        submitted: &Map<String, Value>,
        existing: &Map<String, Value>,
    ) -> AppResult<Map<String, Value>> {
        for key in submitted.keys() {
            let known = self.field_spec(key).is_some()
                || self
                    .relation_spec(key)
                    .is_some_and(|r| r.kind == RelationKind::ForeignKey);
            if !known {
                return Err(AppError::Validation(format!(
                    "Layout '{}' has no field '{}'",
                    self.name, key
                )));
            }
        }

        let mut data = Map::new();
        for field in &self.fields {
            let raw = submitted
                .get(&field.name)
                .or_else(|| existing.get(&field.name))
                .filter(|v| !FieldSpec::is_blank(v))
                .or(field.default.as_ref());
            match raw {
                Some(value) => {
                    data.insert(field.name.clone(), field.clean(value)?);
                }
                None if field.required => {
                    return Err(AppError::Validation(format!("Field '{}' is required.", field.name)));
                }
                None => {
                    data.insert(field.name.clone(), Value::Null);
                }
            }
        }

        for relation in self.relations_of(RelationKind::ForeignKey) {
            let value = submitted
                .get(&relation.name)
                .or_else(|| existing.get(&relation.name))
                .cloned()
                .unwrap_or(Value::Null);
            let value = match value {
                Value::Null => Value::Null,
                Value::Number(n) if n.is_i64() => Value::Number(n),
                Value::String(s) if s.trim().is_empty() => Value::Null,
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| {
                    AppError::Validation(format!("Invalid id for relation '{}': {}", relation.name, s))
                })?,
                other => {
                    return Err(AppError::Validation(format!(
                        "Invalid id for relation '{}': {}",
                        relation.name, other
                    )))
                }
            };
            data.insert(relation.name.clone(), value);
        }
        Ok(data)
    }
}
