//! Process-memory holder for the access token.
//!
//! The raw token lives here and nowhere else: it is never serialized and never
//! written to durable storage. A process restart loses it by construction.

use crate::now_ms;
use parking_lot::RwLock;
use std::fmt;
use std::time::Duration;

struct HeldToken {
    token: String,
    expires_at: i64,
}

/// Shared access-token cell.
///
/// Read by transports for bearer auth; written only by the session and the
/// refresh coordinator.
#[derive(Default)]
pub struct TokenHolder {
    inner: RwLock<Option<HeldToken>>,
}

impl TokenHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token`, expiring `expires_in_secs` from now. Returns the expiry in ms.
    pub(crate) fn set_token(&self, token: impl Into<String>, expires_in_secs: i64) -> i64 {
        let expires_at = now_ms().saturating_add(expires_in_secs.saturating_mul(1000));
        *self.inner.write() = Some(HeldToken {
            token: token.into(),
            expires_at,
        });
        expires_at
    }

    pub(crate) fn clear_token(&self) {
        *self.inner.write() = None;
    }

    /// A token is present and has not expired.
    pub fn has_token(&self) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|held| now_ms() < held.expires_at)
    }

    /// The token expires within `buffer`, or there is no token at all.
    pub fn is_expiring_soon(&self, buffer: Duration) -> bool {
        let buffer_ms = i64::try_from(buffer.as_millis()).unwrap_or(i64::MAX);
        match self.inner.read().as_ref() {
            Some(held) => now_ms() >= held.expires_at.saturating_sub(buffer_ms),
            None => true,
        }
    }

    /// The token, if present and unexpired.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .filter(|held| now_ms() < held.expires_at)
            .map(|held| held.token.clone())
    }

    /// Expiry of the held token in ms, expired or not.
    pub fn expires_at(&self) -> Option<i64> {
        self.inner.read().as_ref().map(|held| held.expires_at)
    }
}

impl fmt::Debug for TokenHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenHolder")
            .field("token", &self.inner.read().as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_holder() {
        let holder = TokenHolder::new();
        assert!(!holder.has_token());
        assert!(holder.is_expiring_soon(Duration::ZERO));
        assert_eq!(holder.access_token(), None);
        assert_eq!(holder.expires_at(), None);
    }

    #[test]
    fn test_set_token() {
        let holder = TokenHolder::new();
        let before = now_ms();
        let expires_at = holder.set_token("at-1", 900);
        let after = now_ms();

        assert!(expires_at >= before + 900_000 && expires_at <= after + 900_000);
        assert!(holder.has_token());
        assert_eq!(holder.access_token().as_deref(), Some("at-1"));
        assert!(!holder.is_expiring_soon(Duration::from_secs(300)));
        assert!(holder.is_expiring_soon(Duration::from_secs(901)));
    }

    #[test]
    fn test_expired_token_is_not_usable() {
        let holder = TokenHolder::new();
        holder.set_token("at-1", -1);
        assert!(!holder.has_token());
        assert_eq!(holder.access_token(), None);
        assert!(holder.expires_at().is_some());
        assert!(holder.is_expiring_soon(Duration::ZERO));
    }

    #[test]
    fn test_clear_token() {
        let holder = TokenHolder::new();
        holder.set_token("at-1", 900);
        holder.clear_token();
        assert!(!holder.has_token());
        assert_eq!(holder.expires_at(), None);
    }

    #[test]
    fn test_debug_is_redacted() {
        let holder = TokenHolder::new();
        holder.set_token("super-secret", 900);
        assert!(!format!("{holder:?}").contains("super-secret"));
    }
}
