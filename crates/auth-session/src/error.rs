//! Authentication error types and classification.
//!
//! Transport failures arrive as one uniform [`ApiError`] shape. [`classify`]
//! turns that shape into the [`AuthError`] taxonomy callers match on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server error codes the classifier understands.
pub mod codes {
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const ACCOUNT_DEACTIVATED: &str = "ACCOUNT_DEACTIVATED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const EMAIL_EXISTS: &str = "EMAIL_EXISTS";
    pub const RATE_LIMIT: &str = "RATE_LIMIT";
    pub const ACCOUNT_LOCKED: &str = "ACCOUNT_LOCKED";
    pub const AUTH_ERROR: &str = "AUTH_ERROR";
}

/// Server-reported lockout information attached to a failed login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLockout {
    pub is_locked: bool,
    #[serde(default)]
    pub attempts_remaining: Option<u32>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub lockout_expires_at: Option<i64>,
}

/// Uniform error shape returned by the transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// HTTP status, absent when the request never got a response.
    pub status: Option<u16>,
    /// Machine-readable server code.
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub lockout: Option<ServerLockout>,
}

impl ApiError {
    /// Error carrying an HTTP status.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
            lockout: None,
        }
    }

    /// Failure before any response was received.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            lockout: None,
        }
    }

    /// Attach a server error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach server lockout details.
    pub fn with_lockout(mut self, lockout: ServerLockout) -> Self {
        self.lockout = Some(lockout);
        self
    }

    /// True for HTTP 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    /// Lockout signal carried by this error, if any.
    ///
    /// A bare `ACCOUNT_LOCKED` code without details still counts as a lock.
    pub fn server_lockout(&self) -> Option<ServerLockout> {
        match (&self.lockout, self.code.as_deref()) {
            (Some(lockout), _) => Some(lockout.clone()),
            (None, Some(codes::ACCOUNT_LOCKED)) => Some(ServerLockout {
                is_locked: true,
                attempts_remaining: Some(0),
                lockout_expires_at: None,
            }),
            _ => None,
        }
    }
}

/// Which auth operation produced an error; status codes mean different things per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOperation {
    Login,
    Register,
    Refresh,
    CurrentUser,
    Logout,
    PasswordReset,
}

/// Authentication error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Account disabled server-side; the user must contact support
    #[error("Account deactivated: {0}")]
    AccountDeactivated(String),

    /// Other 403, message passed through from the server
    #[error("{0}")]
    Forbidden(String),

    /// Registration with an email that already has an account
    #[error("Email already registered: {0}")]
    EmailExists(String),

    /// Too many requests
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Locked by the server or by the client-side counter
    #[error("Account locked: {message}")]
    AccountLocked {
        message: String,
        lockout_expires_at: Option<i64>,
    },

    /// Anything the classifier does not recognise
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Refresh failed and the session was ended
    #[error("Session expired")]
    SessionExpired,

    /// The session was cleared or replaced while a refresh was in flight
    #[error("Session was cleared while a refresh was in flight")]
    SessionCleared,

    /// No usable access token
    #[error("Not logged in")]
    NotLoggedIn,

    /// A protected request failed for a reason other than authentication
    #[error("Request failed: {0}")]
    Request(ApiError),

    /// Durable storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable code for UI layers.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials(_) => codes::INVALID_CREDENTIALS,
            AuthError::AccountDeactivated(_) => codes::ACCOUNT_DEACTIVATED,
            AuthError::Forbidden(_) => codes::FORBIDDEN,
            AuthError::EmailExists(_) => codes::EMAIL_EXISTS,
            AuthError::RateLimited(_) => codes::RATE_LIMIT,
            AuthError::AccountLocked { .. } => codes::ACCOUNT_LOCKED,
            AuthError::Auth(_) => codes::AUTH_ERROR,
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::SessionCleared => "SESSION_CLEARED",
            AuthError::NotLoggedIn => "NOT_LOGGED_IN",
            AuthError::Request(_) => "REQUEST_FAILED",
            AuthError::Storage(_) => "STORAGE_ERROR",
            AuthError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if the user can resolve this by retrying or changing input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials(_)
                | AuthError::EmailExists(_)
                | AuthError::RateLimited(_)
                | AuthError::AccountLocked { .. }
        )
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Request(e) => e.status.map_or(true, |s| s >= 500),
            AuthError::RateLimited(_) => true,
            _ => false,
        }
    }
}

impl From<session_storage::StorageError> for AuthError {
    fn from(err: session_storage::StorageError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<docfill_config::CoreError> for AuthError {
    fn from(err: docfill_config::CoreError) -> Self {
        AuthError::Config(err.to_string())
    }
}

/// Classify a transport error for the operation that produced it.
pub fn classify(operation: AuthOperation, error: &ApiError) -> AuthError {
    let message = error.message.clone();

    if let Some(lockout) = error.server_lockout().filter(|l| l.is_locked) {
        return AuthError::AccountLocked {
            message,
            lockout_expires_at: lockout.lockout_expires_at,
        };
    }

    match (error.status, operation) {
        (Some(401), AuthOperation::Login) => AuthError::InvalidCredentials(message),
        (Some(403), _) if error.code.as_deref() == Some(codes::ACCOUNT_DEACTIVATED) => {
            AuthError::AccountDeactivated(message)
        }
        (Some(403), _) => AuthError::Forbidden(message),
        (Some(409), AuthOperation::Register) => AuthError::EmailExists(message),
        (Some(429), _) => AuthError::RateLimited(message),
        _ => AuthError::Auth(message),
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
