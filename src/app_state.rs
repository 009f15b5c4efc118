// Application State - shared handles passed to every handler

use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    admin_interface::{DefaultPageAdmin, PageAdmin},
    config::Config,
    infrastructure::{middleware::HasPageDatabase, IdGenerator, PageDatabase},
    layouts::LayoutRegistry,
    permissions::PrivacyRegistry,
    services::{PageEvents, PageService},
    templates::{PageRenderer, TemplateEngine},
};

#[derive(Clone)]
pub struct AppState {
    pub pages: PageService,
    pub renderer: Arc<dyn TemplateEngine>,
    pub privacy: Arc<PrivacyRegistry>,
    pub admin: Arc<dyn PageAdmin>,
    pub config: Config,
}

impl AppState {
    /// State with the built-in layouts only.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_layouts(config, LayoutRegistry::with_builtins()).await
    }

    pub async fn with_layouts(config: Config, layouts: LayoutRegistry) -> anyhow::Result<Self> {
        // Initialize database
        let database = PageDatabase::new(&config.database.url, config.cache.capacity).await?;
        database.init().await?;
        let database = Arc::new(database);

        if let Some(username) = &config.pages.admin_user {
            ensure_superuser(&database, username).await?;
        }

        let pages = PageService::new(
            database,
            Arc::new(layouts),
            Arc::new(IdGenerator::default()),
            PageEvents::default(),
            config.pages.clone(),
        );
        let renderer = PageRenderer::new(config.pages.template_dir.as_ref().map(PathBuf::from));

        Ok(Self {
            pages,
            renderer: Arc::new(renderer),
            privacy: Arc::new(PrivacyRegistry::with_default_rules()),
            admin: Arc::new(DefaultPageAdmin),
            config,
        })
    }

    /// Swap in a site-specific admin policy.
    pub fn with_admin(mut self, admin: Arc<dyn PageAdmin>) -> Self {
        self.admin = admin;
        self
    }
}

impl HasPageDatabase for AppState {
    fn database(&self) -> &Arc<PageDatabase> {
        self.pages.database()
    }
}

async fn ensure_superuser(database: &PageDatabase, username: &str) -> anyhow::Result<()> {
    if database.get_user_by_username(username).await?.is_none() {
        let user = database.create_user(username, true, true).await?;
        tracing::info!(user_id = user.id, %username, "created admin user");
    }
    Ok(())
}
