pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod repository;
pub mod services;
pub mod store;
pub mod utils;

use sqlx::PgPool;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::AccountConfig;
use crate::models::{
    Account, EmailChangeTicket, Entity, Provider, ResetPasswordTicket, Session, VerificationTicket,
};
use crate::repository::{Repository, RepositoryResult};
use crate::services::{CredentialService, JwtService, SessionService};
use crate::store::{MemoryStore, PgStore, RecordStore, SessionStore};
use crate::utils::Password;
use service_core::error::AppError;

/// Backing store for every entity.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn RecordStore<Account>>,
    pub sessions: Arc<dyn RecordStore<Session>>,
    pub session_sweeper: Arc<dyn SessionStore>,
    pub verifications: Arc<dyn RecordStore<VerificationTicket>>,
    pub resets: Arc<dyn RecordStore<ResetPasswordTicket>>,
    pub email_changes: Arc<dyn RecordStore<EmailChangeTicket>>,
    pub providers: Arc<dyn RecordStore<Provider>>,
}

impl Stores {
    /// PostgreSQL tables named `<prefix>_<entity>`.
    pub fn postgres(pool: &PgPool, prefix: &str) -> Self {
        let sessions = Arc::new(PgStore::<Session>::new(pool.clone(), prefix));
        Self {
            accounts: Arc::new(PgStore::<Account>::new(pool.clone(), prefix)),
            sessions: sessions.clone(),
            session_sweeper: sessions,
            verifications: Arc::new(PgStore::<VerificationTicket>::new(pool.clone(), prefix)),
            resets: Arc::new(PgStore::<ResetPasswordTicket>::new(pool.clone(), prefix)),
            email_changes: Arc::new(PgStore::<EmailChangeTicket>::new(pool.clone(), prefix)),
            providers: Arc::new(PgStore::<Provider>::new(pool.clone(), prefix)),
        }
    }

    /// Process-local stores, for tests and local runs.
    pub fn memory() -> Self {
        let sessions = Arc::new(MemoryStore::<Session>::new());
        Self {
            accounts: Arc::new(MemoryStore::<Account>::new()),
            sessions: sessions.clone(),
            session_sweeper: sessions,
            verifications: Arc::new(MemoryStore::<VerificationTicket>::new()),
            resets: Arc::new(MemoryStore::<ResetPasswordTicket>::new()),
            email_changes: Arc::new(MemoryStore::<EmailChangeTicket>::new()),
            providers: Arc::new(MemoryStore::<Provider>::new()),
        }
    }
}

/// Repositories and services wired over one cache and one set of stores.
#[derive(Clone)]
pub struct AppState {
    pub config: AccountConfig,
    pub accounts: Repository<Account>,
    pub sessions: Repository<Session>,
    pub verifications: Repository<VerificationTicket>,
    pub resets: Repository<ResetPasswordTicket>,
    pub email_changes: Repository<EmailChangeTicket>,
    pub providers: Repository<Provider>,
    pub session_service: SessionService,
    pub credential_service: CredentialService,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: AccountConfig,
        stores: Stores,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prefix = config.storage.entity_prefix.as_str();
        let options = config.storage.repository_options();

        let accounts = Repository::new(prefix, stores.accounts, cache.clone(), clock.clone(), options);
        let sessions = Repository::new(prefix, stores.sessions, cache.clone(), clock.clone(), options);
        let verifications =
            Repository::new(prefix, stores.verifications, cache.clone(), clock.clone(), options);
        let resets = Repository::new(prefix, stores.resets, cache.clone(), clock.clone(), options);
        let email_changes =
            Repository::new(prefix, stores.email_changes, cache.clone(), clock.clone(), options);
        let providers = Repository::new(prefix, stores.providers, cache, clock.clone(), options);

        let session_service = SessionService::new(
            sessions.clone(),
            stores.session_sweeper,
            accounts.clone(),
            JwtService::new(&config.jwt),
            clock.clone(),
            config.session.lifespan(),
        );
        let credential_service = CredentialService::new(
            accounts.clone(),
            verifications.clone(),
            resets.clone(),
            email_changes.clone(),
            providers.clone(),
            clock.clone(),
            config.tickets.clone(),
        );

        Self {
            config,
            accounts,
            sessions,
            verifications,
            resets,
            email_changes,
            providers,
            session_service,
            credential_service,
            clock,
        }
    }

    /// Warm every primary cache and global listing from the store.
    pub async fn seed_all(&self) -> RepositoryResult<usize> {
        let mut total = self.accounts.seed_all().await?;
        total += self.sessions.seed_all().await?;
        total += self.verifications.seed_all().await?;
        total += self.resets.seed_all().await?;
        total += self.email_changes.seed_all().await?;
        total += self.providers.seed_all().await?;
        Ok(total)
    }

    /// Reset a password with a ticket token and sign the account out everywhere.
    pub async fn reset_password(
        &self,
        account: &Account,
        token: &str,
        password: &Password,
    ) -> Result<Account, AppError> {
        let account = self
            .credential_service
            .reset_password(account, token, password)
            .await?;
        let revoked = self
            .session_service
            .revoke_all(account.public_id())
            .await?;
        tracing::info!(account_id = %account.public_id(), revoked, "Signed out after password reset");
        Ok(account)
    }

    /// Both backends answer for every entity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        self.accounts.health_check().await?;
        self.sessions.health_check().await?;
        self.verifications.health_check().await?;
        self.resets.health_check().await?;
        self.email_changes.health_check().await?;
        self.providers.health_check().await?;
        Ok(())
    }
}
