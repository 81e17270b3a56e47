mod common;

use common::{login_body, mock_logout, session, signed_in, user};
use mockito::Matcher;
use warden::credentials::{CredentialStore, Credentials, MemoryCredentialStore};
use warden::error::AuthError;
use warden::policy::Role;
use warden::session::{Session, SessionStatus};
use std::sync::Arc;
use std::time::Duration;

fn stored(access_token: &str, refresh_token: &str) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with(Credentials {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
    }))
}

#[tokio::test]
async fn test_session_starts_loading() {
    let server = mockito::Server::new_async().await;
    let (session, _) = session(&server);

    assert!(session.is_loading());
    assert!(!session.is_authenticated());
    assert!(session.current_identity().is_none());
}

#[tokio::test]
async fn test_sign_in_with_wrong_password() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/api/auth/login")
        .with_status(401)
        .with_body(r#"{"detail": "Incorrect email or password"}"#)
        .create_async()
        .await;

    let (session, store) = session(&server);
    let err = session.sign_in("ivan@portal.test", "wrong", None).await.unwrap_err();

    assert_eq!(err, AuthError::InvalidCredentials);
    assert!(store.load().unwrap().is_none());
    assert!(!session.is_authenticated());
    assert_eq!(session.status(), SessionStatus::SignedOut);
    login.assert_async().await;
}

#[tokio::test]
async fn test_sign_in_stores_credentials_and_identity() {
    let mut server = mockito::Server::new_async().await;
    let (session, store) =
        signed_in(&mut server, user("u1", "Ivan Petrov", "leader_fsb", Some("fsb"), None)).await;

    let identity = session.current_identity().unwrap();
    assert_eq!(identity.id, "u1");
    assert_eq!(identity.role, Role::Leader(warden::policy::FactionCode::Fsb));
    assert!(session.is_authenticated());

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access_token, "a0");
    assert_eq!(saved.refresh_token, "r0");
    assert_eq!(session.access_token().await.as_deref(), Some("a0"));
}

#[tokio::test]
async fn test_sign_in_two_factor_flow() {
    let mut server = mockito::Server::new_async().await;
    let required = server
        .mock("POST", "/api/auth/login")
        .match_body(Matcher::PartialJson(serde_json::json!({ "otp_code": null })))
        .with_status(403)
        .with_body(r#"{"detail": "2FA code required"}"#)
        .create_async()
        .await;
    let invalid = server
        .mock("POST", "/api/auth/login")
        .match_body(Matcher::PartialJson(serde_json::json!({ "otp_code": "000000" })))
        .with_status(401)
        .with_body(r#"{"detail": "Invalid 2FA code"}"#)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/api/auth/login")
        .match_body(Matcher::PartialJson(serde_json::json!({ "otp_code": "123456" })))
        .with_status(200)
        .with_body(login_body("a0", "r0", user("u1", "Dev", "developer", None, None)))
        .create_async()
        .await;

    let (session, store) = session(&server);

    let err = session.sign_in("dev@portal.test", "pw", None).await.unwrap_err();
    assert_eq!(err, AuthError::OtpRequired);

    let err = session.sign_in("dev@portal.test", "pw", Some("000000")).await.unwrap_err();
    assert_eq!(err, AuthError::OtpInvalid);
    assert!(store.load().unwrap().is_none());

    let identity = session.sign_in("dev@portal.test", "pw", Some("123456")).await.unwrap();
    assert_eq!(identity.role, Role::Developer);
    assert!(session.is_authenticated());

    required.assert_async().await;
    invalid.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_sign_in_disabled_account() {
    let mut server = mockito::Server::new_async().await;
    let _login = server
        .mock("POST", "/api/auth/login")
        .with_status(403)
        .with_body(r#"{"detail": "Account is disabled"}"#)
        .create_async()
        .await;

    let (session, _) = session(&server);
    let err = session.sign_in("old@portal.test", "pw", None).await.unwrap_err();
    assert_eq!(err, AuthError::AccountDisabled);
}

#[tokio::test]
async fn test_restore_without_stored_credentials() {
    let mut server = mockito::Server::new_async().await;
    let me = server
        .mock("GET", "/api/auth/me")
        .expect(0)
        .create_async()
        .await;

    let (session, _) = session(&server);
    assert!(session.restore().await.unwrap().is_none());
    assert_eq!(session.status(), SessionStatus::SignedOut);
    me.assert_async().await;
}

#[tokio::test]
async fn test_restore_with_valid_credentials() {
    let mut server = mockito::Server::new_async().await;
    let me = server
        .mock("GET", "/api/auth/me")
        .match_header("authorization", "Bearer a0")
        .with_status(200)
        .with_body(user("u7", "Olga Smirnova", "gs", None, None).to_string())
        .create_async()
        .await;

    let session = Session::new(server.url(), Duration::from_secs(5), stored("a0", "r0")).unwrap();
    let identity = session.restore().await.unwrap().unwrap();

    assert_eq!(identity.full_name, "Olga Smirnova");
    assert!(session.is_authenticated());
    me.assert_async().await;
}

#[tokio::test]
async fn test_restore_refreshes_once_on_401() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("GET", "/api/auth/me")
        .match_header("authorization", "Bearer a0")
        .with_status(401)
        .with_body(r#"{"detail": "Token expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .match_query(Matcher::UrlEncoded("refresh_token".into(), "r0".into()))
        .with_status(200)
        .with_body(r#"{"access_token": "a1", "token_type": "bearer"}"#)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/api/auth/me")
        .match_header("authorization", "Bearer a1")
        .with_status(200)
        .with_body(user("u1", "Ivan Petrov", "leader_fsb", Some("fsb"), None).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = stored("a0", "r0");
    let session = Session::new(server.url(), Duration::from_secs(5), store.clone()).unwrap();
    let identity = session.restore().await.unwrap().unwrap();

    assert_eq!(identity.id, "u1");
    assert_eq!(store.load().unwrap().unwrap().access_token, "a1");
    rejected.assert_async().await;
    refresh.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_restore_ends_session_when_retry_fails() {
    let mut server = mockito::Server::new_async().await;
    let me = server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .with_body(r#"{"detail": "Token expired"}"#)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"access_token": "a1"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = stored("a0", "r0");
    let session = Session::new(server.url(), Duration::from_secs(5), store.clone()).unwrap();

    assert!(session.restore().await.unwrap().is_none());
    assert!(!session.is_authenticated());
    assert!(store.load().unwrap().is_none());
    me.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_restore_ends_session_when_refresh_rejected() {
    let mut server = mockito::Server::new_async().await;
    let me = server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"detail": "Invalid refresh token"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = stored("a0", "r0");
    let session = Session::new(server.url(), Duration::from_secs(5), store.clone()).unwrap();

    assert!(session.restore().await.unwrap().is_none());
    assert_eq!(session.status(), SessionStatus::SignedOut);
    assert!(store.load().unwrap().is_none());
    me.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_restore_keeps_credentials_on_server_error() {
    let mut server = mockito::Server::new_async().await;
    let _me = server
        .mock("GET", "/api/auth/me")
        .with_status(500)
        .with_body(r#"{"detail": "database unavailable"}"#)
        .create_async()
        .await;

    let store = stored("a0", "r0");
    let session = Session::new(server.url(), Duration::from_secs(5), store.clone()).unwrap();

    let err = session.restore().await.unwrap_err();
    assert!(matches!(err, AuthError::Transport(_)));
    assert_eq!(session.status(), SessionStatus::SignedOut);
    assert!(store.load().unwrap().is_some());
}

#[tokio::test]
async fn test_sign_out_clears_even_when_remote_fails() {
    let mut server = mockito::Server::new_async().await;
    let (session, store) =
        signed_in(&mut server, user("u1", "Ivan Petrov", "gs", None, None)).await;

    let logout = server
        .mock("POST", "/api/auth/logout")
        .match_query(Matcher::UrlEncoded("refresh_token".into(), "r0".into()))
        .match_header("authorization", "Bearer a0")
        .with_status(500)
        .create_async()
        .await;

    session.sign_out().await;

    assert!(!session.is_authenticated());
    assert!(session.access_token().await.is_none());
    assert!(store.load().unwrap().is_none());
    logout.assert_async().await;
}

#[tokio::test]
async fn test_sign_out_publishes_signed_out() {
    let mut server = mockito::Server::new_async().await;
    let (session, _) = signed_in(&mut server, user("u1", "Ivan Petrov", "gs", None, None)).await;
    let _logout = mock_logout(&mut server).await;

    let mut status = session.watch();
    assert!(status.borrow_and_update().identity().is_some());

    session.sign_out().await;

    status.changed().await.unwrap();
    assert_eq!(*status.borrow(), SessionStatus::SignedOut);
}
