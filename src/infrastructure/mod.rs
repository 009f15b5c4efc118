// Core infrastructure modules
pub mod cache;                 // LRU cache for stored objects
pub mod database;              // SQLite pool, schema and transactions
pub mod id_generator;          // ID generation system
pub mod middleware;            // Viewer context middleware and extractor
pub mod queries;               // Connection-level SQL
pub mod viewer;                // Viewer context

pub use cache::Cache;
pub use database::{DatabaseTransaction, PageDatabase};
pub use id_generator::IdGenerator;
pub use queries::current_time_millis;
pub use viewer::ViewerContext;
