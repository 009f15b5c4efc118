// Database Interface - SQLite storage for pages, stored objects and users
// Pooled reads go through `PageDatabase`; every multi-step write goes through a
// `DatabaseTransaction` so a failure part way leaves nothing behind.

use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::infrastructure::cache::Cache;
use crate::infrastructure::queries::{self, current_time_millis};
use crate::models::{Association, Page, PageFilter, StoredObject, User};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pages (
        id INTEGER PRIMARY KEY,
        parent_id INTEGER,
        sort_order INTEGER NOT NULL DEFAULT 99999,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'review', 'published')),
        visibility TEXT NOT NULL DEFAULT 'public' CHECK (visibility IN ('public', 'private')),
        copy_of INTEGER,
        is_homepage INTEGER NOT NULL DEFAULT 0,
        layout_type TEXT,
        layout_id INTEGER,
        materialized_path TEXT NOT NULL DEFAULT '',
        extra TEXT NOT NULL DEFAULT '{}',
        date_created INTEGER NOT NULL,
        date_modified INTEGER NOT NULL,
        CHECK (copy_of IS NULL OR status != 'published')
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_parent_slug ON pages(COALESCE(parent_id, 0), slug)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_homepage ON pages(is_homepage) WHERE is_homepage = 1",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_copy_of ON pages(copy_of) WHERE copy_of IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_pages_parent_order ON pages(parent_id, sort_order)",
    "CREATE INDEX IF NOT EXISTS idx_pages_layout ON pages(layout_id)",
    "CREATE TABLE IF NOT EXISTS objects (
        id INTEGER PRIMARY KEY,
        object_type TEXT NOT NULL,
        data TEXT NOT NULL,
        created INTEGER NOT NULL,
        updated INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_objects_type ON objects(object_type)",
    "CREATE TABLE IF NOT EXISTS associations (
        source_id INTEGER NOT NULL,
        association_type TEXT NOT NULL,
        target_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        created INTEGER NOT NULL,
        PRIMARY KEY (source_id, association_type, target_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_assoc_source_type ON associations(source_id, association_type, position)",
    "CREATE INDEX IF NOT EXISTS idx_assoc_target ON associations(target_id)",
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        is_staff INTEGER NOT NULL DEFAULT 0,
        is_superuser INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS user_permissions (
        user_id INTEGER NOT NULL,
        codename TEXT NOT NULL,
        PRIMARY KEY (user_id, codename)
    )",
];

/// Transaction wrapper that remembers which cached objects it wrote so the
/// cache can be invalidated once the writes are visible.
pub struct DatabaseTransaction {
    tx: Transaction<'static, Sqlite>,
    touched: Vec<i64>,
}

impl DatabaseTransaction {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    fn touch(&mut self, id: i64) {
        self.touched.push(id);
    }

    // Pages

    pub async fn page(&mut self, id: i64) -> AppResult<Option<Page>> {
        queries::page(self.conn(), id).await
    }

    /// Like `page` but a missing row is an error.
    pub async fn require_page(&mut self, id: i64) -> AppResult<Page> {
        self.page(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Page {} not found", id)))
    }

    pub async fn children(&mut self, parent_id: Option<i64>) -> AppResult<Vec<Page>> {
        queries::children(self.conn(), parent_id).await
    }

    pub async fn draft_copy_of(&mut self, original_id: i64) -> AppResult<Option<Page>> {
        queries::draft_copy_of(self.conn(), original_id).await
    }

    pub async fn pages(&mut self, filter: PageFilter) -> AppResult<Vec<Page>> {
        queries::pages(self.conn(), filter).await
    }

    pub async fn insert_page(&mut self, page: &Page) -> AppResult<()> {
        queries::insert_page(self.conn(), page).await
    }

    pub async fn update_page(&mut self, page: &Page) -> AppResult<()> {
        queries::update_page(self.conn(), page).await
    }

    pub async fn set_sort_order(&mut self, id: i64, sort_order: i64) -> AppResult<()> {
        queries::set_sort_order(self.conn(), id, sort_order).await
    }

    pub async fn set_materialized_path(&mut self, id: i64, path: &str) -> AppResult<()> {
        queries::set_materialized_path(self.conn(), id, path).await
    }

    pub async fn clear_homepage(&mut self) -> AppResult<()> {
        queries::clear_homepage(self.conn()).await
    }

    pub async fn delete_page_row(&mut self, id: i64) -> AppResult<bool> {
        queries::delete_associations_of(self.conn(), id).await?;
        queries::delete_page(self.conn(), id).await
    }

    // Objects

    pub async fn object(&mut self, id: i64) -> AppResult<Option<StoredObject>> {
        queries::object(self.conn(), id).await
    }

    pub async fn require_object(&mut self, id: i64) -> AppResult<StoredObject> {
        self.object(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Object {} not found", id)))
    }

    pub async fn insert_object(&mut self, object: &StoredObject) -> AppResult<()> {
        self.touch(object.id);
        queries::insert_object(self.conn(), object).await
    }

    pub async fn update_object_data(&mut self, id: i64, data: &Map<String, Value>) -> AppResult<()> {
        self.touch(id);
        queries::update_object_data(self.conn(), id, data).await
    }

    pub async fn delete_object(&mut self, id: i64) -> AppResult<bool> {
        self.touch(id);
        queries::delete_object(self.conn(), id).await
    }

    // Associations

    pub async fn associations(
        &mut self,
        source_id: i64,
        association_type: Option<&str>,
    ) -> AppResult<Vec<Association>> {
        queries::associations(self.conn(), source_id, association_type).await
    }

    pub async fn association_targets(&mut self, source_id: i64, association_type: &str) -> AppResult<Vec<i64>> {
        queries::association_targets(self.conn(), source_id, association_type).await
    }

    pub async fn add_association(&mut self, source_id: i64, association_type: &str, target_id: i64) -> AppResult<()> {
        queries::add_association(self.conn(), source_id, association_type, target_id).await
    }

    pub async fn replace_associations(
        &mut self,
        source_id: i64,
        association_type: &str,
        targets: &[i64],
    ) -> AppResult<()> {
        queries::replace_associations(self.conn(), source_id, association_type, targets).await
    }

    pub async fn delete_associations_from(&mut self, source_id: i64) -> AppResult<u64> {
        queries::delete_associations_from(self.conn(), source_id).await
    }
}

// SQLx-backed store with an object cache in front of `objects`
pub struct PageDatabase {
    pub pool: SqlitePool,
    object_cache: Arc<Mutex<Cache<i64, StoredObject>>>,
}

impl PageDatabase {
    pub async fn new(database_url: &str, cache_capacity: usize) -> AppResult<Self> {
        if database_url.contains(":memory:") {
            return Self::new_in_memory(cache_capacity).await;
        }
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self::with_pool(pool, cache_capacity))
    }

    /// Single-connection in-memory database. Every connection to
    /// `sqlite::memory:` is its own database, so the pool is pinned to one.
    pub async fn new_in_memory(cache_capacity: usize) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to in-memory SQLite: {}", e)))?;
        Ok(Self::with_pool(pool, cache_capacity))
    }

    fn with_pool(pool: SqlitePool, cache_capacity: usize) -> Self {
        PageDatabase {
            pool,
            object_cache: Arc::new(Mutex::new(Cache::new(cache_capacity))),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn init(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to initialize schema: {}", e)))?;
        }
        Ok(())
    }

    pub async fn begin(&self) -> AppResult<DatabaseTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;
        Ok(DatabaseTransaction {
            tx,
            touched: Vec::new(),
        })
    }

    /// Commit, then drop cached copies of every object the transaction wrote.
    pub async fn commit(&self, tx: DatabaseTransaction) -> AppResult<()> {
        let DatabaseTransaction { tx, touched } = tx;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        let mut cache = self.object_cache.lock().await;
        for id in touched {
            cache.remove(&id);
        }
        Ok(())
    }

    pub async fn rollback(&self, tx: DatabaseTransaction) -> AppResult<()> {
        tx.tx
            .rollback()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to roll back transaction: {}", e)))
    }

    // Pooled reads

    pub async fn get_page(&self, id: i64) -> AppResult<Option<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::page(&mut conn, id).await
    }

    pub async fn get_page_by_layout(&self, layout_id: i64) -> AppResult<Option<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::page_by_layout(&mut conn, layout_id).await
    }

    pub async fn get_children(&self, parent_id: Option<i64>) -> AppResult<Vec<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::children(&mut conn, parent_id).await
    }

    pub async fn get_children_by_slug(&self, parent_id: Option<i64>, slug: &str) -> AppResult<Vec<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::children_by_slug(&mut conn, parent_id, slug).await
    }

    pub async fn get_draft_copy(&self, original_id: i64) -> AppResult<Option<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::draft_copy_of(&mut conn, original_id).await
    }

    pub async fn get_homepages(&self) -> AppResult<Vec<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::homepages(&mut conn).await
    }

    pub async fn list_pages(&self, filter: PageFilter) -> AppResult<Vec<Page>> {
        let mut conn = self.pool.acquire().await?;
        queries::pages(&mut conn, filter).await
    }

    /// Read-through object lookup.
    pub async fn get_object(&self, id: i64) -> AppResult<Option<StoredObject>> {
        {
            let mut cache = self.object_cache.lock().await;
            if let Some(obj) = cache.get(&id).cloned() {
                return Ok(Some(obj));
            }
        }

        let mut conn = self.pool.acquire().await?;
        let object = queries::object(&mut conn, id).await?;
        if let Some(obj) = &object {
            self.object_cache.lock().await.insert(id, obj.clone());
        }
        Ok(object)
    }

    pub async fn get_objects_by_type(&self, object_type: &str) -> AppResult<Vec<StoredObject>> {
        let mut conn = self.pool.acquire().await?;
        queries::objects_by_type(&mut conn, object_type).await
    }

    pub async fn get_associations(
        &self,
        source_id: i64,
        association_type: Option<&str>,
    ) -> AppResult<Vec<Association>> {
        let mut conn = self.pool.acquire().await?;
        queries::associations(&mut conn, source_id, association_type).await
    }

    pub async fn get_association_targets(&self, source_id: i64, association_type: &str) -> AppResult<Vec<i64>> {
        let mut conn = self.pool.acquire().await?;
        queries::association_targets(&mut conn, source_id, association_type).await
    }

    /// Standalone object insert (related records created outside a page edit).
    pub async fn create_object(&self, id: i64, object_type: &str, data: Map<String, Value>) -> AppResult<StoredObject> {
        let now = current_time_millis();
        let object = StoredObject {
            id,
            object_type: object_type.to_string(),
            data,
            created: now,
            updated: now,
        };
        let mut tx = self.begin().await?;
        tx.insert_object(&object).await?;
        self.commit(tx).await?;
        Ok(object)
    }

    // Users

    pub async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        queries::user(&mut conn, id).await
    }

    pub async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        match queries::user_id_by_username(&mut conn, username).await? {
            Some(id) => queries::user(&mut conn, id).await,
            None => Ok(None),
        }
    }

    pub async fn create_user(&self, username: &str, is_staff: bool, is_superuser: bool) -> AppResult<User> {
        let mut conn = self.pool.acquire().await?;
        let id = queries::insert_user(&mut conn, username, is_staff, is_superuser).await?;
        queries::user(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("User {} vanished after insert", id)))
    }

    pub async fn grant_permission(&self, user_id: i64, codename: &str) -> AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        queries::grant_permission(&mut conn, user_id, codename).await
    }
}
