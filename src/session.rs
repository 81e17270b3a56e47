//! Session and identity holder.
//!
//! One `Session` exists per signed-in process. It owns the credential slot,
//! publishes the current [`SessionStatus`] on a watch channel and is the only
//! place that talks to `/api/auth/*`. Every authenticated REST call goes
//! through [`Session::send`], which performs the refresh-or-sign-out dance on
//! a 401.

use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::Config;
use crate::credentials::{CredentialStore, Credentials, FileCredentialStore};
use crate::error::{ApiError, AuthError};
use crate::identity::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Identity resolution in flight. Treated as "denied" by every consumer.
    Loading,
    Authenticated(Identity),
    SignedOut,
}

impl SessionStatus {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionStatus::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    otp_code: Option<&'a str>,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    user: Identity,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

pub struct Session {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn CredentialStore>,
    tokens: RwLock<Option<Credentials>>,
    refresh_lock: Mutex<()>,
    status: watch::Sender<SessionStatus>,
}

impl Session {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let (status, _) = watch::channel(SessionStatus::Loading);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            tokens: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            status,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let store = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
        Self::new(config.api_base(), config.request_timeout(), store)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.status.borrow().identity().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.status.borrow(), SessionStatus::Authenticated(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.status.borrow(), SessionStatus::Loading)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|tokens| tokens.access_token.clone())
    }

    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        otp_code: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let result = self.try_sign_in(email, password, otp_code).await;

        if let Err(ref e) = result {
            tracing::info!("sign-in rejected: {}", e);
            self.clear_local().await;
        }

        result
    }

    async fn try_sign_in(
        &self,
        email: &str,
        password: &str,
        otp_code: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&LoginRequest {
                email,
                password,
                otp_code,
            })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            return Err(classify_login_failure(status, &detail));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let credentials = Credentials {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
        };
        self.store.save(&credentials)?;
        *self.tokens.write().await = Some(credentials);

        tracing::info!(user = %body.user.email, role = %body.user.role, "signed in");
        self.status
            .send_replace(SessionStatus::Authenticated(body.user.clone()));

        Ok(body.user)
    }

    /// Best-effort remote logout followed by an unconditional local logout.
    pub async fn sign_out(&self) {
        let tokens = self.tokens.read().await.clone();

        if let Some(tokens) = tokens {
            let result = self
                .http
                .post(self.url("/api/auth/logout"))
                .query(&[("refresh_token", tokens.refresh_token.as_str())])
                .bearer_auth(&tokens.access_token)
                .send()
                .await;

            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!("remote logout returned {}", response.status());
                }
                Err(e) => tracing::warn!("remote logout failed: {}", e),
                Ok(_) => {}
            }
        }

        self.clear_local().await;
        tracing::info!("signed out");
    }

    /// Resolves a previously stored credential into an identity.
    ///
    /// A 401 from `/api/auth/me` triggers exactly one refresh and one retry;
    /// if that fails the stored credential is discarded. Transport failures
    /// leave the stored credential in place for a later attempt but still
    /// report the session as signed out.
    pub async fn restore(&self) -> Result<Option<Identity>, AuthError> {
        self.status.send_replace(SessionStatus::Loading);

        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("discarding unreadable credentials: {}", e);
                self.clear_local().await;
                return Ok(None);
            }
        };

        let Some(credentials) = stored else {
            self.status.send_replace(SessionStatus::SignedOut);
            return Ok(None);
        };

        *self.tokens.write().await = Some(credentials);

        match self.fetch_identity().await {
            Ok(identity) => {
                tracing::info!(user = %identity.email, "session restored");
                self.status
                    .send_replace(SessionStatus::Authenticated(identity.clone()));
                Ok(Some(identity))
            }
            Err(ApiError::Unauthorized) => Ok(None),
            Err(e) => {
                tracing::warn!("could not verify stored session: {}", e);
                *self.tokens.write().await = None;
                self.status.send_replace(SessionStatus::SignedOut);
                Err(AuthError::Transport(e.to_string()))
            }
        }
    }

    async fn fetch_identity(&self) -> Result<Identity, ApiError> {
        let response = self.send(Method::GET, "/api/auth/me", &[], None).await?;
        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            return Err(ApiError::Status { status, detail });
        }
        Ok(response.json().await?)
    }

    /// Sends an authenticated request. On 401 the credential is refreshed
    /// once and the request retried once; a second failure ends the session
    /// and yields [`ApiError::Unauthorized`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let token = self.access_token().await.ok_or(ApiError::NotSignedIn)?;

        let response = self.dispatch(method.clone(), path, query, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!(path, "401 received, refreshing credential");
        if let Err(e) = self.refresh_after(&token).await {
            tracing::warn!("credential refresh failed: {}", e);
            self.expire().await;
            return Err(ApiError::Unauthorized);
        }

        let token = self.access_token().await.ok_or(ApiError::NotSignedIn)?;
        let response = self.dispatch(method, path, query, body, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(path, "still unauthorized after refresh");
            self.expire().await;
            return Err(ApiError::Unauthorized);
        }

        Ok(response)
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
        token: &str,
    ) -> Result<Response, ApiError> {
        let mut request = self.http.request(method, self.url(path)).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Refreshes the access token unless another caller already replaced the
    /// one that was rejected.
    async fn refresh_after(&self, rejected: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.tokens.read().await.clone();
        let Some(current) = current else {
            return Err(AuthError::SessionExpired);
        };
        if current.access_token != rejected {
            return Ok(());
        }

        let response = self
            .http
            .post(self.url("/api/auth/refresh"))
            .query(&[("refresh_token", current.refresh_token.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::SessionExpired);
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let refreshed = Credentials {
            access_token: body.access_token,
            refresh_token: current.refresh_token,
        };
        self.store.save(&refreshed)?;
        *self.tokens.write().await = Some(refreshed);

        tracing::debug!("access token refreshed");
        Ok(())
    }

    // The single fatal path: the refresh attempt is spent.
    async fn expire(&self) {
        tracing::warn!("session expired");
        self.clear_local().await;
    }

    async fn clear_local(&self) {
        *self.tokens.write().await = None;
        if let Err(e) = self.store.clear() {
            tracing::warn!("failed to clear stored credentials: {}", e);
        }
        self.status.send_replace(SessionStatus::SignedOut);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub(crate) async fn error_detail(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody { detail: Some(detail) }) => detail,
        _ => format!("Request failed with status {}", status.as_u16()),
    }
}

fn classify_login_failure(status: StatusCode, detail: &str) -> AuthError {
    let detail = detail.to_lowercase();

    match status {
        StatusCode::FORBIDDEN if detail.contains("code required") => AuthError::OtpRequired,
        StatusCode::FORBIDDEN if detail.contains("disabled") => AuthError::AccountDisabled,
        StatusCode::UNAUTHORIZED if detail.contains("2fa") => AuthError::OtpInvalid,
        StatusCode::UNAUTHORIZED => AuthError::InvalidCredentials,
        other => AuthError::Transport(format!("login returned {}: {}", other, detail)),
    }
}
