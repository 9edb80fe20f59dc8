//! Schema of the durable session record.
//!
//! The record is a partial snapshot: it carries enough to know that a session
//! may exist and who it belonged to, never the credentials themselves.

use serde::{Deserialize, Serialize};

/// Identity record returned by the auth API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable user identifier.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Account role (e.g. "user", "admin").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Whether the email address has been verified.
    #[serde(default)]
    pub email_verified: bool,
}

/// Token metadata that is safe to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    /// Lifetime of the access token at issuance, in seconds.
    pub expires_in: i64,
    /// Token scheme, normally "Bearer".
    pub token_type: String,
}

/// Current-version durable session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSession {
    pub user: Option<User>,
    pub tokens: Option<TokenMetadata>,
    /// Expiry of the token issued by the process that wrote the record.
    pub token_expires_at: Option<i64>,
    /// A session was authenticated at some point and may still be valid.
    pub session_indicator: bool,
    pub remember_me: bool,
    pub is_initialized: bool,
    pub last_activity: Option<i64>,
    pub login_attempts: u32,
    pub is_locked: bool,
    pub lock_expiry: Option<i64>,
}

/// Versioned wrapper stored under the record key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub version: u32,
    pub state: PersistedSession,
}
