use std::sync::Arc;

use tracing::warn;

use crate::auth::password::PasswordService;
use crate::config::AppConfig;
use crate::db;
use crate::storage::{Storage, StorageClient};
use crate::users::repo::{InMemoryUserStore, PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub storage: Arc<dyn StorageClient>,
    pub passwords: PasswordService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserStore> = if config.database_url.starts_with("memory:") {
            warn!("DATABASE_URL is memory:, users will not survive a restart");
            Arc::new(InMemoryUserStore::new())
        } else {
            let pool = db::connect(&config.database_url).await?;
            db::migrate(&pool).await;
            Arc::new(PgUserStore::new(pool))
        };

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;
        let passwords = PasswordService::new(config.password_hash_cost)?;

        Ok(Self {
            config,
            users,
            storage,
            passwords,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_storage(Arc::new(crate::storage::memory::MemoryStorage::default()))
    }

    #[cfg(test)]
    pub fn fake_with_storage(storage: Arc<dyn StorageClient>) -> Self {
        use std::time::Duration;

        let config = Arc::new(AppConfig {
            database_url: "memory:".into(),
            jwt: crate::config::JwtConfig {
                access_secret: "test-access".into(),
                access_ttl: Duration::from_secs(15 * 60),
                refresh_secret: "test-refresh".into(),
                refresh_ttl: Duration::from_secs(10 * 24 * 60 * 60),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
            },
            password_hash_cost: 1,
            storage: crate::config::StorageConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
                public_url: "https://media.local".into(),
            },
            cookie_secure: true,
            cors_origin: None,
            host: "127.0.0.1".into(),
            port: 0,
        });

        Self {
            config,
            users: Arc::new(InMemoryUserStore::new()),
            storage,
            passwords: PasswordService::new(1).expect("test hash params"),
        }
    }
}
