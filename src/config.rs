use anyhow::{bail, Context};
use serde::Deserialize;

use crate::access::ReadPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Which persistence backend the service talks to.
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    Postgres {
        database_url: String,
        max_connections: u32,
    },
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub jwt: JwtConfig,
    pub plan_read_policy: ReadPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".into());
        let store = match backend.as_str() {
            "postgres" => StoreConfig::Postgres {
                database_url: std::env::var("DATABASE_URL").context("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(10),
            },
            "memory" => StoreConfig::Memory,
            other => bail!("unknown STORE_BACKEND {other:?}, expected postgres or memory"),
        };

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "coachdesk".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "coachdesk-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };

        let plan_read_policy = match std::env::var("PLAN_READ_POLICY") {
            Ok(v) => v.parse::<ReadPolicy>()?,
            Err(_) => ReadPolicy::Open,
        };

        Ok(Self {
            store,
            jwt,
            plan_read_policy,
        })
    }
}
