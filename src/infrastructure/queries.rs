// SQL queries - connection-level statements shared by pooled reads and
// transactional writes. Every function takes a plain connection so the same
// statement runs inside or outside a transaction.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::collections::BTreeSet;

use crate::error::{AppError, AppResult};
use crate::models::{Association, Page, PageFilter, StoredObject, User};

pub(crate) const PAGE_COLUMNS: &str = "id, parent_id, sort_order, title, slug, description, status, visibility, \
     copy_of, is_homepage, layout_type, layout_id, materialized_path, extra, date_created, date_modified";

/// Current time in milliseconds since Unix epoch
pub fn current_time_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn page_from_row(row: &SqliteRow) -> AppResult<Page> {
    let status: String = row.try_get("status")?;
    let visibility: String = row.try_get("visibility")?;
    let extra: String = row.try_get("extra")?;
    Ok(Page {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        sort_order: row.try_get("sort_order")?,
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        status: status.parse()?,
        visibility: visibility.parse()?,
        copy_of: row.try_get("copy_of")?,
        is_homepage: row.try_get("is_homepage")?,
        layout_type: row.try_get("layout_type")?,
        layout_id: row.try_get("layout_id")?,
        materialized_path: row.try_get("materialized_path")?,
        extra: parse_map(&extra)?,
        date_created: row.try_get("date_created")?,
        date_modified: row.try_get("date_modified")?,
    })
}

fn object_from_row(row: &SqliteRow) -> AppResult<StoredObject> {
    let data: String = row.try_get("data")?;
    Ok(StoredObject {
        id: row.try_get("id")?,
        object_type: row.try_get("object_type")?,
        data: parse_map(&data)?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
    })
}

fn association_from_row(row: &SqliteRow) -> AppResult<Association> {
    Ok(Association {
        source_id: row.try_get("source_id")?,
        association_type: row.try_get("association_type")?,
        target_id: row.try_get("target_id")?,
        position: row.try_get("position")?,
        created: row.try_get("created")?,
    })
}

fn parse_map(raw: &str) -> AppResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::SerializationError(format!(
            "Expected a JSON object, found {}",
            other
        ))),
    }
}

fn pages_from_rows(rows: Vec<SqliteRow>) -> AppResult<Vec<Page>> {
    rows.iter().map(page_from_row).collect()
}

// ---- pages ----

pub async fn page(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<Page>> {
    let sql = format!("SELECT {} FROM pages WHERE id = ?", PAGE_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(page_from_row).transpose()
}

pub async fn page_by_layout(conn: &mut SqliteConnection, layout_id: i64) -> AppResult<Option<Page>> {
    let sql = format!("SELECT {} FROM pages WHERE layout_id = ?", PAGE_COLUMNS);
    let row = sqlx::query(&sql).bind(layout_id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(page_from_row).transpose()
}

/// Children of `parent_id` (roots when `None`) in sibling order.
pub async fn children(conn: &mut SqliteConnection, parent_id: Option<i64>) -> AppResult<Vec<Page>> {
    let sql = format!(
        "SELECT {} FROM pages WHERE parent_id IS ? ORDER BY sort_order, id",
        PAGE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(parent_id).fetch_all(&mut *conn).await?;
    pages_from_rows(rows)
}

pub async fn children_by_slug(
    conn: &mut SqliteConnection,
    parent_id: Option<i64>,
    slug: &str,
) -> AppResult<Vec<Page>> {
    let sql = format!(
        "SELECT {} FROM pages WHERE parent_id IS ? AND slug = ? ORDER BY sort_order, id",
        PAGE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(parent_id)
        .bind(slug)
        .fetch_all(&mut *conn)
        .await?;
    pages_from_rows(rows)
}

pub async fn draft_copy_of(conn: &mut SqliteConnection, original_id: i64) -> AppResult<Option<Page>> {
    let sql = format!("SELECT {} FROM pages WHERE copy_of = ? ORDER BY id LIMIT 1", PAGE_COLUMNS);
    let row = sqlx::query(&sql).bind(original_id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(page_from_row).transpose()
}

pub async fn homepages(conn: &mut SqliteConnection) -> AppResult<Vec<Page>> {
    let sql = format!("SELECT {} FROM pages WHERE is_homepage = 1", PAGE_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    pages_from_rows(rows)
}

pub async fn pages(conn: &mut SqliteConnection, filter: PageFilter) -> AppResult<Vec<Page>> {
    let sql = format!(
        "SELECT {} FROM pages WHERE {} ORDER BY materialized_path, sort_order, id",
        PAGE_COLUMNS,
        filter.where_clause()
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    pages_from_rows(rows)
}

pub async fn insert_page(conn: &mut SqliteConnection, page: &Page) -> AppResult<()> {
    let sql = format!(
        "INSERT INTO pages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        PAGE_COLUMNS
    );
    sqlx::query(&sql)
        .bind(page.id)
        .bind(page.parent_id)
        .bind(page.sort_order)
        .bind(&page.title)
        .bind(&page.slug)
        .bind(&page.description)
        .bind(page.status.as_str())
        .bind(page.visibility.as_str())
        .bind(page.copy_of)
        .bind(page.is_homepage)
        .bind(&page.layout_type)
        .bind(page.layout_id)
        .bind(&page.materialized_path)
        .bind(serde_json::to_string(&page.extra)?)
        .bind(page.date_created)
        .bind(page.date_modified)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Write every mutable column of `page` back to its row.
pub async fn update_page(conn: &mut SqliteConnection, page: &Page) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE pages SET parent_id = ?, sort_order = ?, title = ?, slug = ?, description = ?, \
         status = ?, visibility = ?, copy_of = ?, is_homepage = ?, layout_type = ?, layout_id = ?, \
         materialized_path = ?, extra = ?, date_modified = ? WHERE id = ?",
    )
    .bind(page.parent_id)
    .bind(page.sort_order)
    .bind(&page.title)
    .bind(&page.slug)
    .bind(&page.description)
    .bind(page.status.as_str())
    .bind(page.visibility.as_str())
    .bind(page.copy_of)
    .bind(page.is_homepage)
    .bind(&page.layout_type)
    .bind(page.layout_id)
    .bind(&page.materialized_path)
    .bind(serde_json::to_string(&page.extra)?)
    .bind(page.date_modified)
    .bind(page.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Page {} not found", page.id)));
    }
    Ok(())
}

pub async fn set_sort_order(conn: &mut SqliteConnection, id: i64, sort_order: i64) -> AppResult<()> {
    sqlx::query("UPDATE pages SET sort_order = ? WHERE id = ?")
        .bind(sort_order)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_materialized_path(conn: &mut SqliteConnection, id: i64, path: &str) -> AppResult<()> {
    sqlx::query("UPDATE pages SET materialized_path = ? WHERE id = ?")
        .bind(path)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn clear_homepage(conn: &mut SqliteConnection) -> AppResult<()> {
    sqlx::query("UPDATE pages SET is_homepage = 0 WHERE is_homepage = 1")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_page(conn: &mut SqliteConnection, id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM pages WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ---- objects ----

pub async fn object(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<StoredObject>> {
    let row = sqlx::query("SELECT id, object_type, data, created, updated FROM objects WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(object_from_row).transpose()
}

pub async fn objects_by_type(conn: &mut SqliteConnection, object_type: &str) -> AppResult<Vec<StoredObject>> {
    let rows = sqlx::query(
        "SELECT id, object_type, data, created, updated FROM objects WHERE object_type = ? ORDER BY id",
    )
    .bind(object_type)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(object_from_row).collect()
}

pub async fn insert_object(conn: &mut SqliteConnection, object: &StoredObject) -> AppResult<()> {
    sqlx::query("INSERT INTO objects (id, object_type, data, created, updated) VALUES (?, ?, ?, ?, ?)")
        .bind(object.id)
        .bind(&object.object_type)
        .bind(serde_json::to_string(&object.data)?)
        .bind(object.created)
        .bind(object.updated)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn update_object_data(
    conn: &mut SqliteConnection,
    id: i64,
    data: &Map<String, Value>,
) -> AppResult<()> {
    let result = sqlx::query("UPDATE objects SET data = ?, updated = ? WHERE id = ?")
        .bind(serde_json::to_string(data)?)
        .bind(current_time_millis())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Object {} not found", id)));
    }
    Ok(())
}

/// Delete an object and every association touching it.
pub async fn delete_object(conn: &mut SqliteConnection, id: i64) -> AppResult<bool> {
    delete_associations_of(conn, id).await?;
    let result = sqlx::query("DELETE FROM objects WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ---- associations ----

/// Outgoing associations of `source_id`, optionally of one type, in
/// (type, position) order.
pub async fn associations(
    conn: &mut SqliteConnection,
    source_id: i64,
    association_type: Option<&str>,
) -> AppResult<Vec<Association>> {
    let rows = sqlx::query(
        "SELECT source_id, association_type, target_id, position, created FROM associations \
         WHERE source_id = ? AND (? IS NULL OR association_type = ?) \
         ORDER BY association_type, position",
    )
    .bind(source_id)
    .bind(association_type)
    .bind(association_type)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(association_from_row).collect()
}

pub async fn association_targets(
    conn: &mut SqliteConnection,
    source_id: i64,
    association_type: &str,
) -> AppResult<Vec<i64>> {
    Ok(associations(conn, source_id, Some(association_type))
        .await?
        .into_iter()
        .map(|assoc| assoc.target_id)
        .collect())
}

/// Append `target_id` to the end of the association list. Adding an existing
/// member is a no-op.
pub async fn add_association(
    conn: &mut SqliteConnection,
    source_id: i64,
    association_type: &str,
    target_id: i64,
) -> AppResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO associations (source_id, association_type, target_id, position, created) \
         VALUES (?, ?, ?, COALESCE((SELECT MAX(position) + 1 FROM associations \
         WHERE source_id = ? AND association_type = ?), 0), ?)",
    )
    .bind(source_id)
    .bind(association_type)
    .bind(target_id)
    .bind(source_id)
    .bind(association_type)
    .bind(current_time_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Replace the whole association list with `targets`, keeping their order.
pub async fn replace_associations(
    conn: &mut SqliteConnection,
    source_id: i64,
    association_type: &str,
    targets: &[i64],
) -> AppResult<()> {
    sqlx::query("DELETE FROM associations WHERE source_id = ? AND association_type = ?")
        .bind(source_id)
        .bind(association_type)
        .execute(&mut *conn)
        .await?;
    for target_id in targets {
        add_association(conn, source_id, association_type, *target_id).await?;
    }
    Ok(())
}

/// Drop every association in which `id` takes part, in either direction.
pub async fn delete_associations_of(conn: &mut SqliteConnection, id: i64) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM associations WHERE source_id = ? OR target_id = ?")
        .bind(id)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_associations_from(conn: &mut SqliteConnection, source_id: i64) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM associations WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// ---- users ----

async fn user_permissions(conn: &mut SqliteConnection, user_id: i64) -> AppResult<BTreeSet<String>> {
    let rows = sqlx::query("SELECT codename FROM user_permissions WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("codename").map_err(AppError::from))
        .collect()
}

pub async fn user(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<User>> {
    let row = sqlx::query("SELECT id, username, is_staff, is_superuser FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(Some(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            is_staff: row.try_get("is_staff")?,
            is_superuser: row.try_get("is_superuser")?,
            permissions: user_permissions(conn, id).await?,
        })),
        None => Ok(None),
    }
}

pub async fn user_id_by_username(conn: &mut SqliteConnection, username: &str) -> AppResult<Option<i64>> {
    let row = sqlx::query("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| row.try_get::<i64, _>("id").map_err(AppError::from))
        .transpose()
}

pub async fn insert_user(
    conn: &mut SqliteConnection,
    username: &str,
    is_staff: bool,
    is_superuser: bool,
) -> AppResult<i64> {
    let result = sqlx::query("INSERT INTO users (username, is_staff, is_superuser) VALUES (?, ?, ?)")
        .bind(username)
        .bind(is_staff)
        .bind(is_superuser)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn grant_permission(conn: &mut SqliteConnection, user_id: i64, codename: &str) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO user_permissions (user_id, codename) VALUES (?, ?)")
        .bind(user_id)
        .bind(codename)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
