//! In-memory session state and its mapping to the durable record.

use crate::error::AuthError;
use crate::events::AuthStateChangedPayload;
use crate::lockout::LockoutState;
use crate::session_fsm::LoadingStage;
use session_storage::{PersistedSession, TokenMetadata, User};

/// Live session state owned by [`crate::AuthSession`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<User>,
    pub token_meta: Option<TokenMetadata>,
    pub token_expires_at: Option<i64>,
    /// Set on login or successful refresh; the token holder still has the last word.
    pub is_authenticated: bool,
    pub session_indicator: bool,
    pub is_initialized: bool,
    pub remember_me: bool,
    pub last_activity: Option<i64>,
    pub lockout: LockoutState,
    pub error: Option<AuthError>,
}

impl SessionState {
    /// The persisted subset. Raw tokens are not part of it.
    pub fn to_record(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            tokens: self.token_meta.clone(),
            token_expires_at: self.token_expires_at,
            session_indicator: self.session_indicator,
            remember_me: self.remember_me,
            is_initialized: self.is_initialized,
            last_activity: self.last_activity,
            login_attempts: self.lockout.login_attempts,
            is_locked: self.lockout.is_locked,
            lock_expiry: self.lockout.lock_expiry,
        }
    }
}

/// State and stage to start from after a record load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialState {
    pub state: SessionState,
    pub stage: LoadingStage,
}

/// Merge a loaded record into fresh in-memory state.
///
/// `is_authenticated` always starts false: only the token holder can make it
/// true. When the record says a session may exist but no token is held, the
/// session is forced back to uninitialized so nothing can decide "logged out"
/// before rehydration runs.
pub fn load_persisted(record: &PersistedSession, has_token: bool) -> InitialState {
    let needs_rehydration = record.session_indicator && !has_token;
    let is_initialized = record.is_initialized && !needs_rehydration;

    let state = SessionState {
        user: record.user.clone(),
        token_meta: record.tokens.clone(),
        // The expiry described a token this process does not hold.
        token_expires_at: None,
        is_authenticated: false,
        session_indicator: record.session_indicator,
        is_initialized,
        remember_me: record.remember_me,
        last_activity: record.last_activity,
        lockout: LockoutState {
            login_attempts: record.login_attempts,
            is_locked: record.is_locked,
            lock_expiry: record.lock_expiry,
            server_lockout: None,
        },
        error: None,
    };

    let stage = if needs_rehydration {
        LoadingStage::Rehydrating
    } else if is_initialized {
        LoadingStage::Ready
    } else {
        LoadingStage::Idle
    };

    InitialState { state, stage }
}

/// Point-in-time view for consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    /// Verified against the token holder at read time.
    pub is_authenticated: bool,
    pub is_initialized: bool,
    pub loading_stage: LoadingStage,
    pub session_indicator: bool,
    pub token_expires_at: Option<i64>,
    pub remember_me: bool,
    pub last_activity: Option<i64>,
    pub lockout: LockoutState,
    pub error: Option<AuthError>,
}

impl SessionSnapshot {
    pub(crate) fn new(state: &SessionState, stage: LoadingStage, has_token: bool) -> Self {
        Self {
            user: state.user.clone(),
            is_authenticated: state.is_authenticated && has_token,
            is_initialized: state.is_initialized,
            loading_stage: stage,
            session_indicator: state.session_indicator,
            token_expires_at: state.token_expires_at,
            remember_me: state.remember_me,
            last_activity: state.last_activity,
            lockout: state.lockout.clone(),
            error: state.error.clone(),
        }
    }
}

pub(crate) fn change_payload(state: &SessionState, stage: LoadingStage) -> AuthStateChangedPayload {
    AuthStateChangedPayload {
        stage,
        authenticated: state.is_authenticated,
        user_id: state.user.as_ref().map(|u| u.id.clone()),
        email: state.user.as_ref().map(|u| u.email.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "user-1".to_string(),
            email: "jane@example.com".to_string(),
            full_name: None,
            role: None,
            email_verified: true,
        }
    }

    #[test]
    fn test_indicator_without_token_forces_rehydration() {
        let record = PersistedSession {
            user: Some(user()),
            session_indicator: true,
            is_initialized: true,
            token_expires_at: Some(1_700_000_000_000),
            ..Default::default()
        };

        let initial = load_persisted(&record, false);
        assert!(!initial.state.is_initialized);
        assert!(!initial.state.is_authenticated);
        assert_eq!(initial.state.token_expires_at, None);
        assert_eq!(initial.stage, LoadingStage::Rehydrating);
        assert_eq!(initial.state.user, Some(user()));
    }

    #[test]
    fn test_indicator_with_token_keeps_initialized() {
        let record = PersistedSession {
            session_indicator: true,
            is_initialized: true,
            ..Default::default()
        };

        let initial = load_persisted(&record, true);
        assert!(initial.state.is_initialized);
        assert!(!initial.state.is_authenticated);
        assert_eq!(initial.stage, LoadingStage::Ready);
    }

    #[test]
    fn test_empty_record_starts_idle() {
        let initial = load_persisted(&PersistedSession::default(), false);
        assert_eq!(initial.stage, LoadingStage::Idle);
        assert!(!initial.state.is_initialized);
        assert!(!initial.state.session_indicator);
    }

    #[test]
    fn test_lockout_survives_load() {
        let record = PersistedSession {
            login_attempts: 5,
            is_locked: true,
            lock_expiry: Some(42),
            ..Default::default()
        };
        let initial = load_persisted(&record, false);
        assert_eq!(initial.state.lockout.login_attempts, 5);
        assert!(initial.state.lockout.is_locked);
        assert_eq!(initial.state.lockout.lock_expiry, Some(42));
    }

    #[test]
    fn test_to_record_round_trips_persisted_fields() {
        let state = SessionState {
            user: Some(user()),
            token_meta: Some(TokenMetadata {
                expires_in: 900,
                token_type: "Bearer".to_string(),
            }),
            token_expires_at: Some(99),
            is_authenticated: true,
            session_indicator: true,
            is_initialized: true,
            error: Some(AuthError::NotLoggedIn),
            ..Default::default()
        };

        let record = state.to_record();
        assert_eq!(record.token_expires_at, Some(99));
        assert!(record.session_indicator);
        assert_eq!(record.tokens.unwrap().expires_in, 900);
    }

    #[test]
    fn test_snapshot_requires_held_token() {
        let state = SessionState {
            is_authenticated: true,
            ..Default::default()
        };
        assert!(!SessionSnapshot::new(&state, LoadingStage::Ready, false).is_authenticated);
        assert!(SessionSnapshot::new(&state, LoadingStage::Ready, true).is_authenticated);
    }
}
