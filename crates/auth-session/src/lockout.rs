//! Failed-login bookkeeping.
//!
//! The client counts failures and locks itself after too many. A lock reported
//! by the server always takes precedence over the local computation.

use crate::error::ServerLockout;
use docfill_config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lockout counters carried in session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutState {
    pub login_attempts: u32,
    pub is_locked: bool,
    /// Milliseconds since the Unix epoch.
    pub lock_expiry: Option<i64>,
    /// Last lockout details reported by the server.
    pub server_lockout: Option<ServerLockout>,
}

impl LockoutState {
    /// Time left on an active lock.
    pub fn remaining(&self, now: i64) -> Option<Duration> {
        if !self.is_locked {
            return None;
        }
        let expiry = self.lock_expiry?;
        (expiry > now).then(|| Duration::from_millis((expiry - now) as u64))
    }
}

/// Lockout thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            max_attempts,
            lockout_duration,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_login_attempts, config.lockout_duration)
    }

    fn duration_ms(&self) -> i64 {
        i64::try_from(self.lockout_duration.as_millis()).unwrap_or(i64::MAX)
    }

    /// State after one more failed login.
    pub fn record_failure(
        &self,
        state: &LockoutState,
        server: Option<&ServerLockout>,
        now: i64,
    ) -> LockoutState {
        let login_attempts = state.login_attempts.saturating_add(1);

        match server {
            Some(server) if server.is_locked => LockoutState {
                login_attempts,
                is_locked: true,
                // Server expiry is stored verbatim; without one, fall back to the local cool-down.
                lock_expiry: Some(
                    server
                        .lockout_expires_at
                        .unwrap_or_else(|| now.saturating_add(self.duration_ms())),
                ),
                server_lockout: Some(server.clone()),
            },
            // Server counts but has not locked: display only.
            Some(server) => LockoutState {
                login_attempts,
                is_locked: false,
                lock_expiry: None,
                server_lockout: Some(server.clone()),
            },
            None => {
                let is_locked = login_attempts >= self.max_attempts;
                LockoutState {
                    login_attempts,
                    is_locked,
                    lock_expiry: is_locked.then(|| now.saturating_add(self.duration_ms())),
                    server_lockout: None,
                }
            }
        }
    }

    /// Whether a login may be attempted at `now`.
    pub fn can_retry(state: &LockoutState, now: i64) -> bool {
        !state.is_locked || state.lock_expiry.is_some_and(|expiry| now > expiry)
    }

    /// Counters after a successful login or a manual reset.
    pub fn reset() -> LockoutState {
        LockoutState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::new(5, Duration::from_secs(15 * 60))
    }

    #[test]
    fn test_locks_after_max_attempts() {
        let policy = policy();
        let mut state = LockoutState::default();

        for attempt in 1..5 {
            state = policy.record_failure(&state, None, NOW);
            assert_eq!(state.login_attempts, attempt);
            assert!(!state.is_locked);
            assert!(LockoutPolicy::can_retry(&state, NOW));
        }

        state = policy.record_failure(&state, None, NOW);
        assert_eq!(state.login_attempts, 5);
        assert!(state.is_locked);
        assert_eq!(state.lock_expiry, Some(NOW + 15 * 60 * 1000));
        assert!(!LockoutPolicy::can_retry(&state, NOW));
    }

    #[test]
    fn test_can_retry_after_expiry() {
        let state = LockoutState {
            login_attempts: 5,
            is_locked: true,
            lock_expiry: Some(NOW),
            server_lockout: None,
        };
        assert!(!LockoutPolicy::can_retry(&state, NOW));
        assert!(LockoutPolicy::can_retry(&state, NOW + 1));
    }

    #[test]
    fn test_server_lock_wins_verbatim() {
        let server = ServerLockout {
            is_locked: true,
            attempts_remaining: Some(0),
            lockout_expires_at: Some(NOW + 42),
        };
        let state = policy().record_failure(&LockoutState::default(), Some(&server), NOW);

        assert!(state.is_locked);
        assert_eq!(state.login_attempts, 1);
        assert_eq!(state.lock_expiry, Some(NOW + 42));
        assert_eq!(state.server_lockout, Some(server));
    }

    #[test]
    fn test_server_lock_without_expiry_uses_local_duration() {
        let server = ServerLockout {
            is_locked: true,
            attempts_remaining: None,
            lockout_expires_at: None,
        };
        let state = policy().record_failure(&LockoutState::default(), Some(&server), NOW);
        assert_eq!(state.lock_expiry, Some(NOW + 15 * 60 * 1000));
    }

    #[test]
    fn test_attempts_remaining_recorded_without_locking() {
        let server = ServerLockout {
            is_locked: false,
            attempts_remaining: Some(2),
            lockout_expires_at: None,
        };
        let state = policy().record_failure(&LockoutState::default(), Some(&server), NOW);

        assert!(!state.is_locked);
        assert_eq!(state.server_lockout.unwrap().attempts_remaining, Some(2));
    }

    #[test]
    fn test_server_counting_suppresses_local_lock() {
        let policy = policy();
        let server = ServerLockout {
            is_locked: false,
            attempts_remaining: Some(3),
            lockout_expires_at: None,
        };
        let mut state = LockoutState::default();
        for _ in 0..7 {
            state = policy.record_failure(&state, Some(&server), NOW);
        }

        assert_eq!(state.login_attempts, 7);
        assert!(!state.is_locked);
        assert_eq!(state.lock_expiry, None);
        assert!(LockoutPolicy::can_retry(&state, NOW));
    }

    #[test]
    fn test_reset_and_remaining() {
        let locked = policy().record_failure(
            &LockoutState {
                login_attempts: 4,
                ..Default::default()
            },
            None,
            NOW,
        );
        assert_eq!(locked.remaining(NOW), Some(Duration::from_secs(15 * 60)));
        assert_eq!(locked.remaining(NOW + 15 * 60 * 1000), None);
        assert_eq!(LockoutPolicy::reset(), LockoutState::default());
    }
}
