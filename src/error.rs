use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the sign-in flow. Every variant leaves the session signed out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("two-factor code required")]
    OtpRequired,

    #[error("invalid two-factor code")]
    OtpInvalid,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("session expired, sign in again")]
    SessionExpired,

    #[error("auth request failed: {0}")]
    Transport(String),

    #[error("credential storage failed: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("session ended: unauthorized")]
    Unauthorized,

    #[error("access denied")]
    AccessDenied,

    #[error("not found")]
    NotFound,

    #[error("request failed ({status}): {detail}")]
    Status { status: StatusCode, detail: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential file is corrupt: {0}")]
    Corrupt(String),

    #[error("credential encryption failed")]
    Crypto,

    #[error("credential encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        AuthError::Storage(err.to_string())
    }
}
