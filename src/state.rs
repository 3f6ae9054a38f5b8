use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::auth::{
    jwt::JwtKeys,
    repo::{InMemoryUserRepository, PgUserRepository, UserRepository},
};
use crate::config::AppConfig;
use crate::notify::{FileMailer, Notifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub users: Arc<dyn UserRepository>,
    pub notifier: Notifier,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let users: Arc<dyn UserRepository> = match config.database_url.as_deref() {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                info!("using postgres user store");
                Arc::new(PgUserRepository::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory only");
                Arc::new(InMemoryUserRepository::new())
            }
        };

        let mailer = Arc::new(FileMailer::new(config.notifications.log_path.clone()));
        let notifier = Notifier::spawn(mailer, config.notifications.queue_capacity);

        Ok(Self::from_parts(config, users, notifier))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepository>,
        notifier: Notifier,
    ) -> Self {
        Self {
            jwt: JwtKeys::new(&config.jwt),
            config,
            users,
            notifier,
        }
    }

    /// In-memory state for tests; must be called inside a tokio runtime.
    #[cfg(test)]
    pub fn fake() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<crate::notify::Notification>,
    ) {
        let (notifier, rx) = crate::notify::testing::channel_notifier();
        let state = Self::from_parts(
            Arc::new(AppConfig::test_default()),
            Arc::new(InMemoryUserRepository::new()),
            notifier,
        );
        (state, rx)
    }
}
