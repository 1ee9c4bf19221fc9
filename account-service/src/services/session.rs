//! Session lifecycle: issue, refresh rotation, revocation and the purge sweep.
//!
//! A session is Active until it is revoked or its expiry passes. Expiry is
//! never stored as a state; it is read off `expires_at` against the clock.

use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use super::jwt::{AccessTokenClaims, JwtService};
use crate::clock::Clock;
use crate::models::{Account, DeviceInfo, Entity, Session};
use crate::repository::{ListQuery, Page, Repository, RepositoryError};
use crate::store::{Lookup, SessionStore};
use crate::utils::{generate_token, hash_token};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session expired")]
    Expired,

    #[error("Session revoked")]
    Revoked,

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Tokens handed to the client. The raw refresh token exists only here.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Session,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct SessionService {
    sessions: Repository<Session>,
    store: Arc<dyn SessionStore>,
    accounts: Repository<Account>,
    jwt: JwtService,
    clock: Arc<dyn Clock>,
    lifespan: Duration,
}

impl SessionService {
    pub fn new(
        sessions: Repository<Session>,
        store: Arc<dyn SessionStore>,
        accounts: Repository<Account>,
        jwt: JwtService,
        clock: Arc<dyn Clock>,
        lifespan: Duration,
    ) -> Self {
        Self {
            sessions,
            store,
            accounts,
            jwt,
            clock,
            lifespan,
        }
    }

    /// Start a session for `account` on the given device.
    #[instrument(skip(self, account, device), fields(account_id = %account.public_id()))]
    pub async fn issue(
        &self,
        account: &Account,
        device: DeviceInfo,
    ) -> Result<IssuedSession, SessionError> {
        if !account.is_active() {
            return Err(SessionError::Unauthorized);
        }

        let now = self.clock.now();
        let refresh_token = generate_token();
        let session = Session::new(
            now,
            account.public_id().to_string(),
            device,
            hash_token(&refresh_token),
            self.lifespan,
        );
        let session = self.sessions.create(&session).await?;
        let access_token = self.jwt.generate_access_token(account, &session, now)?;

        info!(session_id = %session.public_id(), "Session issued");
        Ok(IssuedSession {
            session,
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Rotate the refresh token and sign a new access token for the same
    /// session. The previous refresh token stops working; expiry is unchanged.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, SessionError> {
        let session = self.find_by_refresh_token(refresh_token).await?;
        let now = self.clock.now();
        if session.revoked {
            return Err(SessionError::Revoked);
        }
        if session.is_expired(now) {
            return Err(SessionError::Expired);
        }

        let account = self.account(&session.account_id).await?;
        if !account.is_active() {
            return Err(SessionError::Unauthorized);
        }

        let rotated = generate_token();
        let rotated_hash = hash_token(&rotated);
        let session = self
            .sessions
            .update(&session, |s| {
                s.refresh_token_hash = rotated_hash;
                s.last_active_at = now;
            })
            .await?;
        let access_token = self.jwt.generate_access_token(&account, &session, now)?;

        info!(session_id = %session.public_id(), "Session refreshed");
        Ok(IssuedSession {
            session,
            access_token,
            refresh_token: rotated,
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Mark a session revoked. Revoking twice is a no-op.
    #[instrument(skip(self))]
    pub async fn revoke(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .fetch_or_seed(&Lookup::public_id(session_id))
            .await?;
        if session.revoked {
            return Ok(session);
        }

        let session = self.sessions.update(&session, |s| s.revoked = true).await?;
        info!(session_id = %session.public_id(), "Session revoked");
        Ok(session)
    }

    /// Revoke every unrevoked session of an account; returns how many changed.
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, account_id: &str) -> Result<usize, SessionError> {
        let mut revoked = 0;
        let mut cursor = None;
        loop {
            let page = self.list_for_account(account_id, cursor, 100).await?;
            for session in page.items.iter().filter(|s| !s.revoked) {
                self.sessions.update(session, |s| s.revoked = true).await?;
                revoked += 1;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(revoked, "Revoked account sessions");
        Ok(revoked)
    }

    /// Delete sessions that are both expired and revoked, then evict them
    /// from the caches. Expired but unrevoked sessions are kept.
    #[instrument(skip(self))]
    pub async fn purge_invalid(&self) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let purged = self
            .sessions
            .store_call(self.store.purge_invalid(now))
            .await
            .map_err(RepositoryError::from)?;

        self.sessions.evict(&purged).await;
        info!(purged = purged.len(), "Purged invalid sessions");
        Ok(purged.len())
    }

    /// Session holding `refresh_token`, whatever its state.
    pub async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let lookup = Lookup::Reference(Session::token_reference(hash_token(refresh_token)));
        match self.sessions.fetch_or_seed(&lookup).await {
            Ok(session) => Ok(session),
            Err(RepositoryError::NotFound) => Err(SessionError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }

    /// Check signature, issuer and expiry of an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, SessionError> {
        Ok(self.jwt.validate_access_token(token)?)
    }

    /// Sessions of one account, oldest first.
    pub async fn list_for_account(
        &self,
        account_id: &str,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Page<Session>, SessionError> {
        let query = ListQuery::partition(Session::account_partition(account_id), limit).after(cursor);
        Ok(self.sessions.list_or_seed(&query).await?)
    }

    async fn account(&self, account_id: &str) -> Result<Account, SessionError> {
        match self
            .accounts
            .fetch_or_seed(&Lookup::public_id(account_id))
            .await
        {
            Ok(account) => Ok(account),
            Err(RepositoryError::NotFound) => Err(SessionError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }
}
