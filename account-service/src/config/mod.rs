use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheTtl;
use crate::repository::RepositoryOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub tickets: TicketConfig,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Naming and cache behaviour shared by every entity.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Table name prefix and cache key prefix.
    pub entity_prefix: String,
    pub entry_ttl_secs: u64,
    pub blank_ttl_secs: u64,
    pub listing_ttl_secs: u64,
    pub operation_timeout_ms: u64,
    pub seed_batch_size: i64,
}

impl StorageConfig {
    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            ttl: CacheTtl {
                entry_secs: self.entry_ttl_secs,
                blank_secs: self.blank_ttl_secs,
                listing_secs: self.listing_ttl_secs,
            },
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            seed_batch_size: self.seed_batch_size,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            entity_prefix: "account".to_string(),
            entry_ttl_secs: 3600,
            blank_ttl_secs: 300,
            listing_ttl_secs: 3600,
            operation_timeout_ms: 5000,
            seed_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub lifespan_hours: i64,
}

impl SessionConfig {
    pub fn lifespan(&self) -> ChronoDuration {
        ChronoDuration::hours(self.lifespan_hours)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketConfig {
    pub verification_minutes: i64,
    pub reset_password_minutes: i64,
    pub email_change_minutes: i64,
}

impl TicketConfig {
    pub fn verification_lifespan(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.verification_minutes)
    }

    pub fn reset_password_lifespan(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.reset_password_minutes)
    }

    pub fn email_change_lifespan(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.email_change_minutes)
    }
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            verification_minutes: 15,
            reset_password_minutes: 60,
            email_change_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
}

impl AccountConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AccountConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("account-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
                idle_timeout_secs: get_parsed("DATABASE_IDLE_TIMEOUT_SECS", Some("600"), is_prod)?,
                max_lifetime_secs: get_parsed("DATABASE_MAX_LIFETIME_SECS", Some("1800"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            storage: StorageConfig {
                entity_prefix: get_env("ENTITY_PREFIX", Some("account"), is_prod)?,
                entry_ttl_secs: get_parsed("CACHE_ENTRY_TTL_SECS", Some("3600"), is_prod)?,
                blank_ttl_secs: get_parsed("CACHE_BLANK_TTL_SECS", Some("300"), is_prod)?,
                listing_ttl_secs: get_parsed("CACHE_LISTING_TTL_SECS", Some("3600"), is_prod)?,
                operation_timeout_ms: get_parsed("OPERATION_TIMEOUT_MS", Some("5000"), is_prod)?,
                seed_batch_size: get_parsed("SEED_BATCH_SIZE", Some("500"), is_prod)?,
            },
            session: SessionConfig {
                lifespan_hours: get_parsed("SESSION_LIFESPAN_HOURS", Some("720"), is_prod)?,
            },
            tickets: TicketConfig {
                verification_minutes: get_parsed(
                    "VERIFICATION_TICKET_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                reset_password_minutes: get_parsed(
                    "RESET_PASSWORD_TICKET_MINUTES",
                    Some("60"),
                    is_prod,
                )?,
                email_change_minutes: get_parsed(
                    "EMAIL_CHANGE_TICKET_MINUTES",
                    Some("60"),
                    is_prod,
                )?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("account-service"), is_prod)?,
                access_token_expiry_minutes: get_parsed(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !is_identifier(&self.storage.entity_prefix) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ENTITY_PREFIX must be lowercase letters, digits and underscores, got '{}'",
                self.storage.entity_prefix
            )));
        }

        if self.storage.entry_ttl_secs == 0 || self.storage.listing_ttl_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Cache TTLs must be positive"
            )));
        }

        if self.storage.blank_ttl_secs == 0
            || self.storage.blank_ttl_secs >= self.storage.entry_ttl_secs
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CACHE_BLANK_TTL_SECS must be positive and shorter than CACHE_ENTRY_TTL_SECS"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.storage.operation_timeout_ms == 0 || self.storage.seed_batch_size <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OPERATION_TIMEOUT_MS and SEED_BATCH_SIZE must be positive"
            )));
        }

        if self.session.lifespan_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_LIFESPAN_HOURS must be positive"
            )));
        }

        if self.tickets.verification_minutes <= 0
            || self.tickets.reset_password_minutes <= 0
            || self.tickets.email_change_minutes <= 0
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Ticket lifespans must be positive"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.secret.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod && self.jwt.secret.len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 bytes in production"
            )));
        }

        Ok(())
    }
}

/// Table names are built from the prefix, so it must be a plain identifier.
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
