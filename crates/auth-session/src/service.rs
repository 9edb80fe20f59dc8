//! Transport contract for the auth backend.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use session_storage::User;
use std::fmt;

/// Email and password for a login attempt.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Fields for creating an account.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl fmt::Debug for RegisterData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterData")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("full_name", &self.full_name)
            .finish()
    }
}

/// Token bundle issued by login, registration and refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    /// Only present when the server does not use an HTTP-only cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AuthTokens {
    /// Bearer tokens expiring in `expires_in` seconds.
    pub fn bearer(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in,
            token_type: default_token_type(),
        }
    }
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: User,
    pub tokens: AuthTokens,
}

/// Registration may withhold tokens until the email is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: User,
    #[serde(default)]
    pub tokens: Option<AuthTokens>,
}

/// Backend auth operations.
///
/// Every failure is reported as an [`ApiError`]; classification into
/// [`crate::AuthError`] happens in the session layer.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange credentials for a session.
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError>;

    /// Start a session on the shared demo account.
    async fn demo_login(&self) -> Result<LoginResponse, ApiError>;

    /// Create an account.
    async fn register(&self, data: &RegisterData) -> Result<RegisterResponse, ApiError>;

    /// Obtain a fresh access token.
    ///
    /// With `None` the server reads the refresh token from its HTTP-only cookie.
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<AuthTokens, ApiError>;

    /// Profile of the user owning the current access token.
    async fn current_user(&self) -> Result<User, ApiError>;

    /// Revoke the server-side session.
    async fn logout(&self) -> Result<(), ApiError>;

    /// Send a password reset email.
    async fn request_password_reset(&self, email: &str) -> Result<(), ApiError>;

    /// Complete a password reset with the emailed token.
    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ApiError>;
}
