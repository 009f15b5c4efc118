use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_TEMPLATE: &str = "pagemanager/base.html";
pub const DRAFT_TITLE_SUFFIX: &str = " (draft copy)";
pub const DRAFT_SLUG_SUFFIX: &str = "-draft-copy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub pages: PageManagerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

/// Settings the embedding application may override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageManagerConfig {
    /// Template used by layouts that do not name their own.
    pub default_template: String,
    /// Directory searched for layout templates before the embedded defaults.
    pub template_dir: Option<String>,
    pub draft_title_suffix: String,
    pub draft_slug_suffix: String,
    /// Username of a superuser ensured at startup.
    pub admin_user: Option<String>,
}

impl Default for PageManagerConfig {
    fn default() -> Self {
        Self {
            default_template: DEFAULT_TEMPLATE.to_string(),
            template_dir: None,
            draft_title_suffix: DRAFT_TITLE_SUFFIX.to_string(),
            draft_slug_suffix: DRAFT_SLUG_SUFFIX.to_string(),
            admin_user: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(
        Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/page_manager.db".to_string()),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            cache: CacheConfig {
                capacity: env::var("CACHE_CAPACITY")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
            },
            pages: PageManagerConfig {
                default_template: env::var("PAGEMANAGER_DEFAULT_TEMPLATE")
                    .unwrap_or_else(|_| DEFAULT_TEMPLATE.to_string()),
                template_dir: env::var("TEMPLATE_DIR").ok(),
                admin_user: env::var("PAGEMANAGER_ADMIN_USER").ok(),
                ..PageManagerConfig::default()
            },
        })
    }

    /// In-memory configuration used by tests and tools.
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            cache: CacheConfig { capacity: 128 },
            pages: PageManagerConfig::default(),
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
