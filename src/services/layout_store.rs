// Layout storage - layouts live in the object store as typed objects, their
// many-to-many and inline relations as ordered associations.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::infrastructure::{current_time_millis, DatabaseTransaction, IdGenerator};
use crate::layouts::{LayoutMeta, RelationKind};
use crate::models::StoredObject;

/// A layout object together with its relation lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutData {
    pub object: StoredObject,
    /// Relation name to ordered target ids (many-to-many and inline).
    pub relations: BTreeMap<String, Vec<i64>>,
}

impl LayoutData {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.object.field(name)
    }
}

pub async fn load_layout(tx: &mut DatabaseTransaction, meta: &LayoutMeta, layout_id: i64) -> AppResult<LayoutData> {
    let object = tx.require_object(layout_id).await?;
    let mut relations = BTreeMap::new();
    for relation in meta.relations.iter().filter(|r| r.kind != RelationKind::ForeignKey) {
        let targets = tx
            .association_targets(layout_id, &relation.association_type(&meta.key))
            .await?;
        relations.insert(relation.name.clone(), targets);
    }
    Ok(LayoutData { object, relations })
}

/// Check that every FK value and relation target exists with the declared type.
pub async fn check_related_records(
    tx: &mut DatabaseTransaction,
    meta: &LayoutMeta,
    data: &Map<String, Value>,
    relations: &BTreeMap<String, Vec<i64>>,
) -> AppResult<()> {
    for relation in meta.relations_of(RelationKind::ForeignKey) {
        if let Some(id) = data.get(&relation.name).and_then(Value::as_i64) {
            check_target(tx, &relation.name, &relation.target_type, id).await?;
        }
    }
    for (name, targets) in relations {
        let relation = meta
            .relation_spec(name)
            .filter(|r| r.kind != RelationKind::ForeignKey)
            .ok_or_else(|| {
                AppError::Validation(format!("Layout '{}' has no many-to-many or inline relation '{}'", meta.name, name))
            })?;
        for id in targets {
            check_target(tx, name, &relation.target_type, *id).await?;
        }
    }
    Ok(())
}

async fn check_target(tx: &mut DatabaseTransaction, relation: &str, target_type: &str, id: i64) -> AppResult<()> {
    match tx.object(id).await? {
        Some(obj) if obj.object_type == target_type => Ok(()),
        Some(obj) => Err(AppError::Validation(format!(
            "Relation '{}' expects a {} but {} is a {}",
            relation, target_type, id, obj.object_type
        ))),
        None => Err(AppError::Validation(format!(
            "Relation '{}' refers to missing record {}",
            relation, id
        ))),
    }
}

/// Insert a new layout object with cleaned data and its relation lists.
pub async fn create_layout(
    tx: &mut DatabaseTransaction,
    ids: &IdGenerator,
    meta: &LayoutMeta,
    data: Map<String, Value>,
    relations: &BTreeMap<String, Vec<i64>>,
) -> AppResult<StoredObject> {
    let now = current_time_millis();
    let object = StoredObject {
        id: ids.next_id(),
        object_type: meta.key.clone(),
        data,
        created: now,
        updated: now,
    };
    tx.insert_object(&object).await?;
    for (name, targets) in relations {
        if let Some(relation) = meta.relation_spec(name) {
            tx.replace_associations(object.id, &relation.association_type(&meta.key), targets)
                .await?;
        }
    }
    Ok(object)
}

/// Replace relation lists. Inline records dropped from a list are deleted,
/// since the layout owns them.
pub async fn set_relations(
    tx: &mut DatabaseTransaction,
    meta: &LayoutMeta,
    layout_id: i64,
    relations: &BTreeMap<String, Vec<i64>>,
) -> AppResult<()> {
    for (name, targets) in relations {
        let Some(relation) = meta.relation_spec(name) else {
            continue;
        };
        let assoc_type = relation.association_type(&meta.key);
        if relation.kind == RelationKind::Inline {
            for old in tx.association_targets(layout_id, &assoc_type).await? {
                if !targets.contains(&old) {
                    tx.delete_object(old).await?;
                }
            }
        }
        tx.replace_associations(layout_id, &assoc_type, targets).await?;
    }
    Ok(())
}

/// Insert a copy of `record` under a fresh id.
pub async fn duplicate_record(
    tx: &mut DatabaseTransaction,
    ids: &IdGenerator,
    record: &StoredObject,
) -> AppResult<StoredObject> {
    let now = current_time_millis();
    let copy = StoredObject {
        id: ids.next_id(),
        object_type: record.object_type.clone(),
        data: record.data.clone(),
        created: now,
        updated: now,
    };
    tx.insert_object(&copy).await?;
    Ok(copy)
}

/// Deep-copy a layout: FK fields by reference, many-to-many links with the
/// same targets in the same order, inline records duplicated. Associations
/// of unknown types are carried over by reference.
pub async fn duplicate_layout(
    tx: &mut DatabaseTransaction,
    ids: &IdGenerator,
    meta: Option<&LayoutMeta>,
    layout_id: i64,
) -> AppResult<StoredObject> {
    let source = tx.require_object(layout_id).await?;
    let copy = duplicate_record(tx, ids, &source).await?;
    let inline_types: Vec<String> = meta
        .map(|m| m.relations_of(RelationKind::Inline).map(|r| r.association_type(&m.key)).collect())
        .unwrap_or_default();

    for assoc in tx.associations(layout_id, None).await? {
        let target_id = if inline_types.contains(&assoc.association_type) {
            let record = tx.require_object(assoc.target_id).await?;
            duplicate_record(tx, ids, &record).await?.id
        } else {
            assoc.target_id
        };
        tx.add_association(copy.id, &assoc.association_type, target_id).await?;
    }
    Ok(copy)
}

/// Inline records owned by a layout, in relation then position order.
pub async fn inline_records(
    tx: &mut DatabaseTransaction,
    meta: &LayoutMeta,
    layout_id: i64,
) -> AppResult<Vec<StoredObject>> {
    let mut records = Vec::new();
    for relation in meta.relations_of(RelationKind::Inline) {
        for id in tx.association_targets(layout_id, &relation.association_type(&meta.key)).await? {
            if let Some(record) = tx.object(id).await? {
                records.push(record);
            }
        }
    }
    Ok(records)
}

/// Delete a layout with its inline records and every link touching it.
pub async fn delete_layout(tx: &mut DatabaseTransaction, meta: Option<&LayoutMeta>, layout_id: i64) -> AppResult<()> {
    if let Some(meta) = meta {
        for record in inline_records(tx, meta, layout_id).await? {
            tx.delete_object(record.id).await?;
        }
    }
    tx.delete_object(layout_id).await?;
    Ok(())
}
