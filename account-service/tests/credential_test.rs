mod common;

use account_service::{
    models::{Account, Entity},
    repository::RepositoryError,
    services::{CredentialError, Registration},
    store::Lookup,
    utils::Password,
};
use chrono::Duration;
use common::{account, TestApp};

fn registration(username: &str, password: Option<&str>) -> Registration {
    Registration {
        name: username.to_string(),
        username: Some(username.to_string()),
        email: Some(format!("{}@example.com", username)),
        password: password.map(Password::new),
    }
}

#[tokio::test]
async fn test_register_hashes_password() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;

    let alice = credentials
        .register(registration("alice", Some("p@ss")))
        .await
        .unwrap();

    let hash = alice.password_hash.clone().unwrap();
    assert_ne!(hash, "p@ss");
    assert!(hash.starts_with("$argon2"));
    assert!(credentials.verify_password(&alice, &Password::new("p@ss")).unwrap());
    assert!(!credentials.verify_password(&alice, &Password::new("wrong")).unwrap());

    let signed_in = credentials
        .authenticate("alice", &Password::new("p@ss"))
        .await
        .unwrap();
    assert_eq!(signed_in.public_id(), alice.public_id());

    let rejected = credentials.authenticate("alice", &Password::new("wrong")).await;
    assert!(matches!(rejected, Err(CredentialError::Unauthorized)));
}

#[tokio::test]
async fn test_account_without_password_never_verifies() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;

    let bob = credentials.register(registration("bob", None)).await.unwrap();
    assert!(bob.password_hash.is_none());
    assert!(!credentials.verify_password(&bob, &Password::new("")).unwrap());

    let result = credentials.authenticate("nobody", &Password::new("x")).await;
    assert!(matches!(result, Err(CredentialError::Unauthorized)));
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;

    credentials.register(registration("carol", None)).await.unwrap();
    let result = credentials.register(registration("carol", None)).await;
    assert!(matches!(
        result,
        Err(CredentialError::Repository(RepositoryError::Conflict(_)))
    ));
}

#[tokio::test]
async fn test_reset_ticket_reused_until_expiry() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;
    let alice = credentials
        .register(registration("alice", Some("old-password")))
        .await
        .unwrap();

    let first = credentials.request_password_reset(&alice).await.unwrap();
    let first_token = first.token.clone().unwrap();
    assert_ne!(first.ticket.token_hash, first_token);

    let again = credentials.request_password_reset(&alice).await.unwrap();
    assert!(!again.is_new());
    assert_eq!(again.ticket.public_id(), first.ticket.public_id());

    app.clock.advance(Duration::minutes(61));
    let fresh = credentials.request_password_reset(&alice).await.unwrap();
    let fresh_token = fresh.token.clone().unwrap();
    assert_ne!(fresh.ticket.public_id(), first.ticket.public_id());
    assert_eq!(app.resets.len(), 1);

    let stale = credentials
        .reset_password(&alice, &first_token, &Password::new("new-password"))
        .await;
    assert!(matches!(stale, Err(CredentialError::InvalidToken)));

    let alice = credentials
        .reset_password(&alice, &fresh_token, &Password::new("new-password"))
        .await
        .unwrap();
    assert!(credentials
        .verify_password(&alice, &Password::new("new-password"))
        .unwrap());
    assert!(app.resets.is_empty());

    let replay = credentials
        .reset_password(&alice, &fresh_token, &Password::new("again"))
        .await;
    assert!(matches!(replay, Err(CredentialError::InvalidToken)));
}

#[tokio::test]
async fn test_expired_reset_is_reported_before_token_check() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;
    let alice = credentials
        .register(registration("alice", Some("old-password")))
        .await
        .unwrap();

    let issued = credentials.request_password_reset(&alice).await.unwrap();
    app.clock.advance(Duration::hours(2));

    let result = credentials
        .reset_password(&alice, "not-the-token", &Password::new("new-password"))
        .await;
    assert!(matches!(result, Err(CredentialError::RequestExpired)));

    let result = credentials
        .reset_password(&alice, &issued.token.unwrap(), &Password::new("new-password"))
        .await;
    assert!(matches!(result, Err(CredentialError::RequestExpired)));
}

#[tokio::test]
async fn test_email_verification() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;
    let alice = credentials.register(registration("alice", None)).await.unwrap();
    assert!(!alice.email_verified);

    let issued = credentials.request_verification(&alice).await.unwrap();
    let code = issued.token.unwrap();
    assert_eq!(code.len(), 6);

    let wrong = if code == "000000" { "111111" } else { "000000" };
    let result = credentials.confirm_verification(&alice, wrong).await;
    assert!(matches!(result, Err(CredentialError::InvalidToken)));

    let alice = credentials.confirm_verification(&alice, &code).await.unwrap();
    assert!(alice.email_verified);
    assert!(app.verifications.is_empty());
}

#[tokio::test]
async fn test_email_change_moves_email_reference() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;
    let alice = credentials.register(registration("alice", None)).await.unwrap();

    let issued = credentials
        .request_email_change(&alice, "alice@new.example.com")
        .await
        .unwrap();
    let token = issued.token.unwrap();
    assert_eq!(issued.ticket.new_email, "alice@new.example.com");

    let alice = credentials.confirm_email_change(&alice, &token).await.unwrap();
    assert_eq!(alice.email.as_deref(), Some("alice@new.example.com"));
    assert!(alice.email_verified);

    let accounts = &app.state.accounts;
    let by_new = accounts
        .fetch(&Lookup::Reference(Account::email_reference("alice@new.example.com")))
        .await
        .unwrap();
    assert_eq!(by_new.public_id(), alice.public_id());
    let by_old = accounts
        .fetch(&Lookup::Reference(Account::email_reference("alice@example.com")))
        .await;
    assert!(matches!(by_old, Err(RepositoryError::NotFound)));

    // The ticket is kept but can't be replayed.
    assert_eq!(app.email_changes.len(), 1);
    let replay = credentials.confirm_email_change(&alice, &token).await;
    assert!(matches!(replay, Err(CredentialError::InvalidToken)));

    let next = credentials
        .request_email_change(&alice, "alice@third.example.com")
        .await
        .unwrap();
    assert!(next.is_new());
    assert_eq!(app.email_changes.len(), 1);
}

#[tokio::test]
async fn test_provider_links() {
    let app = TestApp::new();
    let credentials = &app.state.credential_service;
    let alice = app
        .state
        .accounts
        .create(&account(&app.clock, "alice"))
        .await
        .unwrap();
    let bob = app
        .state
        .accounts
        .create(&account(&app.clock, "bob"))
        .await
        .unwrap();

    let link = credentials
        .link_provider(&alice, "1234", "https://accounts.google.com")
        .await
        .unwrap();

    let found = credentials
        .authenticate_provider("1234", "https://accounts.google.com")
        .await
        .unwrap();
    assert_eq!(found.public_id(), alice.public_id());

    let taken = credentials
        .link_provider(&bob, "1234", "https://accounts.google.com")
        .await;
    assert!(matches!(
        taken,
        Err(CredentialError::Repository(RepositoryError::Conflict(_)))
    ));

    let page = credentials
        .providers_for_account(alice.public_id(), None, 10)
        .await
        .unwrap();
    assert_eq!(page.items, vec![link.clone()]);

    credentials.unlink_provider(&link).await.unwrap();
    let result = credentials
        .authenticate_provider("1234", "https://accounts.google.com")
        .await;
    assert!(matches!(result, Err(CredentialError::Unauthorized)));
}

#[tokio::test]
async fn test_password_reset_signs_out_every_session() {
    let app = TestApp::new();
    let alice = app
        .state
        .credential_service
        .register(registration("alice", Some("old-password")))
        .await
        .unwrap();
    let session = app
        .state
        .session_service
        .issue(&alice, Default::default())
        .await
        .unwrap();

    let ticket = app
        .state
        .credential_service
        .request_password_reset(&alice)
        .await
        .unwrap();
    app.state
        .reset_password(&alice, &ticket.token.unwrap(), &Password::new("new-password"))
        .await
        .unwrap();

    let refreshed = app.state.session_service.refresh(&session.refresh_token).await;
    assert!(matches!(
        refreshed,
        Err(account_service::services::SessionError::Revoked)
    ));
}
