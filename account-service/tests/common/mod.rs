//! Shared setup for account-service integration tests.
//!
//! Everything runs against the in-memory cache and stores, so these tests
//! need neither PostgreSQL nor Redis.

#![allow(dead_code)]

use account_service::{
    cache::MemoryCache,
    clock::ManualClock,
    config::{
        AccountConfig, DatabaseConfig, Environment, JwtConfig, RedisConfig, SessionConfig,
        StorageConfig, TicketConfig,
    },
    models::{Account, EmailChangeTicket, Provider, ResetPasswordTicket, Session, VerificationTicket},
    store::MemoryStore,
    AppState, Stores,
};
use chrono::Utc;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route test logs through the test harness; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

pub fn test_config() -> AccountConfig {
    AccountConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "account-service".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        database: DatabaseConfig {
            url: "postgres://localhost/accounts_test".to_string(),
            max_connections: 5,
            min_connections: 1,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        },
        redis: RedisConfig {
            url: "redis://localhost".to_string(),
        },
        storage: StorageConfig {
            seed_batch_size: 2,
            ..StorageConfig::default()
        },
        session: SessionConfig { lifespan_hours: 1 },
        tickets: TicketConfig::default(),
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            issuer: "account-service".to_string(),
            access_token_expiry_minutes: 15,
        },
    }
}

/// App state plus typed handles on the in-memory backends behind it.
pub struct TestApp {
    pub state: AppState,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<ManualClock>,
    pub accounts: Arc<MemoryStore<Account>>,
    pub sessions: Arc<MemoryStore<Session>>,
    pub verifications: Arc<MemoryStore<VerificationTicket>>,
    pub resets: Arc<MemoryStore<ResetPasswordTicket>>,
    pub email_changes: Arc<MemoryStore<EmailChangeTicket>>,
    pub providers: Arc<MemoryStore<Provider>>,
}

impl TestApp {
    pub fn new() -> Self {
        init_tracing();

        let cache = Arc::new(MemoryCache::new());
        // Starts at wall-clock time so signed access tokens still validate.
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let accounts = Arc::new(MemoryStore::<Account>::new());
        let sessions = Arc::new(MemoryStore::<Session>::new());
        let verifications = Arc::new(MemoryStore::<VerificationTicket>::new());
        let resets = Arc::new(MemoryStore::<ResetPasswordTicket>::new());
        let email_changes = Arc::new(MemoryStore::<EmailChangeTicket>::new());
        let providers = Arc::new(MemoryStore::<Provider>::new());

        let stores = Stores {
            accounts: accounts.clone(),
            sessions: sessions.clone(),
            session_sweeper: sessions.clone(),
            verifications: verifications.clone(),
            resets: resets.clone(),
            email_changes: email_changes.clone(),
            providers: providers.clone(),
        };
        let state = AppState::new(test_config(), stores, cache.clone(), clock.clone());

        Self {
            state,
            cache,
            clock,
            accounts,
            sessions,
            verifications,
            resets,
            email_changes,
            providers,
        }
    }

    /// Step the clock so consecutive rows get distinct listing scores.
    pub fn tick(&self) {
        self.clock.advance(chrono::Duration::milliseconds(1));
    }
}

pub fn account(clock: &ManualClock, username: &str) -> Account {
    use account_service::clock::Clock;
    Account::new(
        clock.now(),
        username.to_string(),
        Some(username.to_string()),
        Some(format!("{}@example.com", username)),
    )
}
