use service_core::error::AppError;

use super::credentials::CredentialError;
use super::session::SessionError;
use crate::cache::CacheError;
use crate::repository::RepositoryError;
use crate::store::StoreError;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound(anyhow::anyhow!("Record not found")),
            StoreError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            StoreError::Timeout => AppError::ServiceUnavailable,
            StoreError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::CacheError(anyhow::Error::new(err))
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => AppError::NotFound(anyhow::anyhow!("Record not found")),
            RepositoryError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            RepositoryError::SeedRequired => {
                AppError::InternalError(anyhow::anyhow!("Record not cached"))
            }
            RepositoryError::Store(e) => e.into(),
            RepositoryError::Cache(e) => e.into(),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthorized => AppError::Unauthorized(anyhow::anyhow!("Unauthorized")),
            SessionError::Expired => AppError::InvalidToken("Session expired".to_string()),
            SessionError::Revoked => AppError::InvalidToken("Session revoked".to_string()),
            SessionError::Token(e) => AppError::InvalidToken(e.to_string()),
            SessionError::Repository(e) => e.into(),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Unauthorized => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            CredentialError::InvalidToken => AppError::InvalidToken("Invalid token".to_string()),
            CredentialError::RequestExpired => {
                AppError::BadRequest(anyhow::anyhow!("Request expired"))
            }
            CredentialError::Hashing(e) => AppError::InternalError(anyhow::Error::new(e)),
            CredentialError::Repository(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_errors_map_to_app_errors() {
        let err: AppError = RepositoryError::Conflict("username taken".to_string()).into();
        assert_eq!(err.kind(), "conflict");

        let err: AppError = RepositoryError::Cache(CacheError::Unavailable("down".into())).into();
        assert_eq!(err.kind(), "cache");

        let err: AppError = RepositoryError::Store(StoreError::Timeout).into();
        assert_eq!(err.kind(), "unavailable");

        let err: AppError = RepositoryError::Cache(CacheError::Timeout).into();
        assert_eq!(err.kind(), "cache");
    }

    #[test]
    fn test_credential_errors_map_to_app_errors() {
        let err: AppError = CredentialError::RequestExpired.into();
        assert_eq!(err.kind(), "bad_request");

        let err: AppError = CredentialError::InvalidToken.into();
        assert_eq!(err.kind(), "invalid_token");
    }
}
