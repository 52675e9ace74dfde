use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::crypto::codec::CookieCodec;
use crate::error::{AppError, Result};
use crate::models::session::SessionOptions;
use crate::repositories::{
    backend::SessionBackend, memory::MemorySessionStore, session::{PgSessionStore, SessionRepository},
};
use crate::services::password::{Argon2Hasher, PasswordHasher};
use crate::services::session::SessionManager;
use crate::services::sweeper::Sweeper;

/// Username to password digest.
pub type UserDirectory = HashMap<String, String>;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Session lookup and persistence.
    pub sessions: Arc<SessionManager<SessionBackend>>,
    /// Expired session cleanup.
    pub sweeper: Arc<Sweeper<SessionBackend>>,
    /// Password digests checked by the login route.
    pub hasher: Arc<dyn PasswordHasher>,
    pub users: Arc<UserDirectory>,
}

impl AppState {
    /// Connects to PostgreSQL, bootstraps the session table and builds the state.
    pub async fn new(config: &Config) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| AppError::Connection("DATABASE_URL is not set".to_string()))?;
        let pool = crate::db::create_pool(url).await?;
        let backend = SessionBackend::Postgres(PgSessionStore::new(pool));
        Self::with_backend(config, backend).await
    }

    /// Builds the state around an in-process store.
    pub async fn in_memory(config: &Config) -> Result<Self> {
        Self::with_backend(config, SessionBackend::Memory(MemorySessionStore::new())).await
    }

    pub async fn with_backend(config: &Config, backend: SessionBackend) -> Result<Self> {
        backend.bootstrap().await?;
        let store = Arc::new(backend);

        let codec = CookieCodec::new(
            config
                .session_keys
                .iter()
                .map(|material| material.to_key_pair())
                .collect(),
        )?;
        codec.set_max_length(config.session_max_length);
        tracing::info!(key_pairs = codec.key_pair_count(), "✅ Cookie codec initialized");

        let defaults = SessionOptions {
            max_age: config.session_max_age_secs,
            secure: config.cookie_secure,
            ..SessionOptions::default()
        };
        let sessions = Arc::new(SessionManager::new(Arc::clone(&store), Arc::new(codec), defaults));
        let sweeper = Arc::new(Sweeper::new(store));

        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::new()?);
        let mut users = UserDirectory::new();
        if let (Some(username), Some(password)) = (&config.demo_username, &config.demo_password) {
            users.insert(username.clone(), hasher.hash(password)?);
            tracing::info!(username = %username, "Demo account registered");
        }

        Ok(AppState {
            config: config.clone(),
            sessions,
            sweeper,
            hasher,
            users: Arc::new(users),
        })
    }

    /// Name of the session cookie.
    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Looks up a user and checks the password.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let digest = self
            .users
            .get(username)
            .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

        if !self.hasher.verify(digest, password)? {
            return Err(AppError::Authentication(
                "Invalid username or password".to_string(),
            ));
        }
        Ok(())
    }
}
