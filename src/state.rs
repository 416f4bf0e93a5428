use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    auth::{
        jwt::JwtKeys,
        proof::IdentityProofProvider,
        repo::{MemoryUserRepo, PgUserRepo, UserRepo},
        services::AuthService,
        session::{MemorySessionStore, PgSessionStore, SessionProvider, SessionStore},
    },
    config::{AppConfig, AuthMode},
    db,
    tasks::{
        repo::{MemoryTaskRepo, PgTaskRepo, TaskRepo},
        services::TaskService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub tasks: TaskService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let Some(url) = config.database_url.clone() else {
            warn!("DATABASE_URL not set; using in-memory stores, data is lost on restart");
            return Ok(Self::in_memory(config));
        };

        let pool = db::connect(&url).await?;
        db::migrate(&pool).await?;
        info!("database ready");

        Ok(Self::from_parts(
            config,
            Arc::new(PgUserRepo::new(pool.clone())),
            Arc::new(PgTaskRepo::new(pool.clone())),
            Arc::new(PgSessionStore::new(pool)),
        ))
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self::from_parts(
            config,
            Arc::new(MemoryUserRepo::default()),
            Arc::new(MemoryTaskRepo::default()),
            Arc::new(MemorySessionStore::default()),
        )
    }

    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserRepo>,
        tasks: Arc<dyn TaskRepo>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let proofs: Arc<dyn IdentityProofProvider> = match config.auth_mode {
            AuthMode::Token => Arc::new(JwtKeys::from_config(&config.jwt)),
            AuthMode::Session => Arc::new(SessionProvider::new(sessions, &config.session)),
        };
        info!(auth_mode = ?config.auth_mode, "identity proofs configured");

        Self {
            auth: AuthService::new(users, proofs),
            tasks: TaskService::new(tasks),
            config: Arc::new(config),
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::in_memory(AppConfig::for_tests(AuthMode::Token))
    }
}
