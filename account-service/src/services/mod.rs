//! Account, session and credential workflows built on the repositories.

pub mod credentials;
mod error;
mod jwt;
pub mod metrics;
pub mod session;

pub use credentials::{CredentialError, CredentialService, Registration, TicketIssue};
pub use jwt::{AccessTokenClaims, JwtService};
pub use session::{IssuedSession, SessionError, SessionService};
