use crate::access::AccessPolicy;
use crate::config::{AppConfig, StoreConfig};
use crate::store::{MemoryStore, PgStore, Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub policy: AccessPolicy,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match &config.store {
            StoreConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let pg = PgStore::connect(database_url, *max_connections).await?;
                pg.migrate().await?;
                Arc::new(pg) as Arc<dyn Store>
            }
            StoreConfig::Memory => {
                tracing::warn!("using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        Ok(Self::from_parts(config, store))
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn Store>) -> Self {
        let policy = AccessPolicy::new(config.plan_read_policy);
        Self {
            config,
            store,
            policy,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with(Arc::new(MemoryStore::new()), crate::access::ReadPolicy::Open)
    }

    #[cfg(test)]
    /// Test state over a caller-held store, so tests can inspect row counts.
    pub fn fake_with(store: Arc<MemoryStore>, reads: crate::access::ReadPolicy) -> Self {
        let config = Arc::new(AppConfig {
            store: StoreConfig::Memory,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            plan_read_policy: reads,
        });

        Self::from_parts(config, store)
    }
}
