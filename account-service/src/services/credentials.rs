//! Passwords, one-time tickets and external provider links.
//!
//! Passwords are stored as Argon2id hashes. Tickets store only a SHA-256 of
//! the token sent to the user, so the raw token is returned exactly once,
//! when the ticket is created.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::config::TicketConfig;
use crate::models::{
    Account, EmailChangeTicket, Entity, Provider, ResetPasswordTicket, Ticket, VerificationTicket,
};
use crate::repository::{ListQuery, Page, Repository, RepositoryError};
use crate::store::Lookup;
use crate::utils::{
    generate_code, generate_token, hash_password, hash_token, tokens_match, verify_password,
    Password, PasswordError, PasswordHashString,
};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Request expired")]
    RequestExpired,

    #[error("Password hashing failed: {0}")]
    Hashing(#[from] PasswordError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A ticket and, when it was just created, the raw token to deliver.
#[derive(Debug, Clone)]
pub struct TicketIssue<T> {
    pub ticket: T,
    pub token: Option<String>,
}

impl<T> TicketIssue<T> {
    /// Whether this request created the ticket.
    pub fn is_new(&self) -> bool {
        self.token.is_some()
    }
}

/// Fields for a new account.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<Password>,
}

#[derive(Clone)]
pub struct CredentialService {
    accounts: Repository<Account>,
    verifications: Repository<VerificationTicket>,
    resets: Repository<ResetPasswordTicket>,
    email_changes: Repository<EmailChangeTicket>,
    providers: Repository<Provider>,
    clock: Arc<dyn Clock>,
    tickets: TicketConfig,
}

impl CredentialService {
    pub fn new(
        accounts: Repository<Account>,
        verifications: Repository<VerificationTicket>,
        resets: Repository<ResetPasswordTicket>,
        email_changes: Repository<EmailChangeTicket>,
        providers: Repository<Provider>,
        clock: Arc<dyn Clock>,
        tickets: TicketConfig,
    ) -> Self {
        Self {
            accounts,
            verifications,
            resets,
            email_changes,
            providers,
            clock,
            tickets,
        }
    }

    // ==================== Passwords ====================

    /// Create an account; a username or email already taken is a conflict.
    #[instrument(skip(self, registration), fields(username = ?registration.username))]
    pub async fn register(&self, registration: Registration) -> Result<Account, CredentialError> {
        let mut account = Account::new(
            self.clock.now(),
            registration.name,
            registration.username,
            registration.email,
        );
        if let Some(password) = &registration.password {
            account.password_hash = Some(hash_password(password)?.into_string());
        }

        let account = self.accounts.create(&account).await?;
        info!(account_id = %account.public_id(), "Account registered");
        Ok(account)
    }

    /// Hash and store a new password.
    pub async fn set_password(
        &self,
        account: &Account,
        password: &Password,
    ) -> Result<Account, CredentialError> {
        let hash = hash_password(password)?.into_string();
        Ok(self
            .accounts
            .update(account, |a| a.password_hash = Some(hash))
            .await?)
    }

    /// `Ok(false)` for a wrong password or an account without one.
    pub fn verify_password(
        &self,
        account: &Account,
        password: &Password,
    ) -> Result<bool, CredentialError> {
        match &account.password_hash {
            Some(hash) => Ok(verify_password(
                password,
                &PasswordHashString::new(hash.clone()),
            )?),
            None => Ok(false),
        }
    }

    /// Look an account up by username and check its password.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<Account, CredentialError> {
        let account = self
            .known(&self.accounts, &Lookup::Reference(Account::username_reference(username)))
            .await?;
        if !account.is_active() || !self.verify_password(&account, password)? {
            return Err(CredentialError::Unauthorized);
        }
        Ok(account)
    }

    // ==================== Email verification ====================

    pub async fn request_verification(
        &self,
        account: &Account,
    ) -> Result<TicketIssue<VerificationTicket>, CredentialError> {
        let lifespan = self.tickets.verification_lifespan();
        let account_id = account.public_id().to_string();
        self.issue_ticket(&self.verifications, account.public_id(), generate_code, |now, hash| {
            VerificationTicket::new(now, account_id, hash, lifespan)
        })
        .await
    }

    /// Check the emailed code, consume the ticket and mark the email verified.
    #[instrument(skip(self, account, code), fields(account_id = %account.public_id()))]
    pub async fn confirm_verification(
        &self,
        account: &Account,
        code: &str,
    ) -> Result<Account, CredentialError> {
        let ticket = self.ticket(&self.verifications, account.public_id()).await?;
        self.check(&ticket, code)?;

        let account = self
            .accounts
            .update(account, |a| a.email_verified = true)
            .await?;
        self.verifications.delete(&ticket).await?;
        info!("Email verified");
        Ok(account)
    }

    // ==================== Password reset ====================

    pub async fn request_password_reset(
        &self,
        account: &Account,
    ) -> Result<TicketIssue<ResetPasswordTicket>, CredentialError> {
        let lifespan = self.tickets.reset_password_lifespan();
        let account_id = account.public_id().to_string();
        self.issue_ticket(&self.resets, account.public_id(), generate_token, |now, hash| {
            ResetPasswordTicket::new(now, account_id, hash, lifespan)
        })
        .await
    }

    /// Check the reset token, store the new password and consume the ticket.
    #[instrument(skip(self, account, token, password), fields(account_id = %account.public_id()))]
    pub async fn reset_password(
        &self,
        account: &Account,
        token: &str,
        password: &Password,
    ) -> Result<Account, CredentialError> {
        let ticket = self.ticket(&self.resets, account.public_id()).await?;
        self.check(&ticket, token)?;

        let account = self.set_password(account, password).await?;
        self.resets.delete(&ticket).await?;
        info!("Password reset");
        Ok(account)
    }

    // ==================== Email change ====================

    pub async fn request_email_change(
        &self,
        account: &Account,
        new_email: &str,
    ) -> Result<TicketIssue<EmailChangeTicket>, CredentialError> {
        let lifespan = self.tickets.email_change_lifespan();
        let account_id = account.public_id().to_string();
        let new_email = new_email.to_string();
        self.issue_ticket(&self.email_changes, account.public_id(), generate_token, |now, hash| {
            EmailChangeTicket::new(now, account_id, new_email, hash, lifespan)
        })
        .await
    }

    /// Apply the requested email. The ticket stays on record, marked processed.
    #[instrument(skip(self, account, token), fields(account_id = %account.public_id()))]
    pub async fn confirm_email_change(
        &self,
        account: &Account,
        token: &str,
    ) -> Result<Account, CredentialError> {
        let ticket = self.ticket(&self.email_changes, account.public_id()).await?;
        self.check(&ticket, token)?;

        let new_email = ticket.new_email.clone();
        let account = self
            .accounts
            .update(account, |a| {
                a.email = Some(new_email);
                a.email_verified = true;
            })
            .await?;
        self.email_changes
            .update(&ticket, |t| t.processed = true)
            .await?;
        info!("Email changed");
        Ok(account)
    }

    // ==================== Providers ====================

    /// Link an external identity; a (sub, issuer) pair links to one account only.
    pub async fn link_provider(
        &self,
        account: &Account,
        sub: &str,
        issuer: &str,
    ) -> Result<Provider, CredentialError> {
        let provider = Provider::new(
            self.clock.now(),
            account.public_id().to_string(),
            sub.to_string(),
            issuer.to_string(),
        );
        Ok(self.providers.create(&provider).await?)
    }

    pub async fn unlink_provider(&self, provider: &Provider) -> Result<(), CredentialError> {
        Ok(self.providers.delete(provider).await?)
    }

    /// Resolve an external identity to its active account.
    #[instrument(skip(self))]
    pub async fn authenticate_provider(
        &self,
        sub: &str,
        issuer: &str,
    ) -> Result<Account, CredentialError> {
        let provider = self
            .known(
                &self.providers,
                &Lookup::Reference(Provider::subject_reference(sub, issuer)),
            )
            .await?;
        let account = self
            .known(&self.accounts, &Lookup::public_id(provider.account_id))
            .await?;
        if !account.is_active() {
            return Err(CredentialError::Unauthorized);
        }
        Ok(account)
    }

    pub async fn providers_for_account(
        &self,
        account_id: &str,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Page<Provider>, CredentialError> {
        let query = ListQuery::partition(Provider::account_partition(account_id), limit).after(cursor);
        Ok(self.providers.list_or_seed(&query).await?)
    }

    // ==================== Tickets ====================

    /// Hand back the live ticket if there is one; otherwise replace any
    /// stale ticket with a fresh one.
    async fn issue_ticket<T, B>(
        &self,
        repo: &Repository<T>,
        account_id: &str,
        secret: fn() -> String,
        build: B,
    ) -> Result<TicketIssue<T>, CredentialError>
    where
        T: Ticket,
        B: FnOnce(DateTime<Utc>, String) -> T,
    {
        let now = self.clock.now();
        let lookup = Lookup::Reference(T::account_reference(account_id));
        match repo.fetch_or_seed(&lookup).await {
            Ok(existing) if existing.is_live(now) => {
                return Ok(TicketIssue {
                    ticket: existing,
                    token: None,
                });
            }
            Ok(stale) => repo.delete(&stale).await?,
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let token = secret();
        let ticket = repo.create(&build(now, hash_token(&token))).await?;
        info!(kind = T::KIND.as_str(), ticket_id = %ticket.public_id(), "Ticket issued");
        Ok(TicketIssue {
            ticket,
            token: Some(token),
        })
    }

    async fn ticket<T: Ticket>(
        &self,
        repo: &Repository<T>,
        account_id: &str,
    ) -> Result<T, CredentialError> {
        match repo
            .fetch_or_seed(&Lookup::Reference(T::account_reference(account_id)))
            .await
        {
            Ok(ticket) => Ok(ticket),
            Err(RepositoryError::NotFound) => Err(CredentialError::InvalidToken),
            Err(e) => Err(e.into()),
        }
    }

    /// Expiry is checked before the token is compared.
    fn check<T: Ticket>(&self, ticket: &T, token: &str) -> Result<(), CredentialError> {
        if ticket.is_expired(self.clock.now()) {
            return Err(CredentialError::RequestExpired);
        }
        if ticket.is_processed() || !tokens_match(token, ticket.token_hash()) {
            return Err(CredentialError::InvalidToken);
        }
        Ok(())
    }

    async fn known<E: Entity>(
        &self,
        repo: &Repository<E>,
        lookup: &Lookup,
    ) -> Result<E, CredentialError> {
        match repo.fetch_or_seed(lookup).await {
            Ok(found) => Ok(found),
            Err(RepositoryError::NotFound) => Err(CredentialError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }
}
