//! Client session management.
//!
//! [`AuthSession`] owns the live session state, drives the loading-stage FSM,
//! persists the durable record after every mutation and broadcasts changes.
//!
//! Startup has to cope with a persisted record that claims a session while the
//! access token (memory only) is gone. Loading such a record forces the
//! session back to uninitialized, and [`AuthSession::initialize`] settles it:
//!
//! - no session indicator: Rehydrating -> Ready, unauthenticated
//! - indicator, no token: Rehydrating -> Validating -> silent refresh -> Ready
//! - indicator and token: Rehydrating -> Validating -> profile check -> Ready

use crate::error::{classify, ApiError, AuthError, AuthOperation, AuthResult};
use crate::events::{AuthStateChangedPayload, SessionEvent};
use crate::http_client::HttpAuthService;
use crate::lockout::{LockoutPolicy, LockoutState};
use crate::now_ms;
use crate::refresh::RefreshCoordinator;
use crate::service::{AuthService, AuthTokens, Credentials, LoginResponse, RegisterData};
use crate::session_fsm::{machine_at, LoadingStage, SessionMachine, SessionMachineInput};
use crate::state::{change_payload, load_persisted, SessionSnapshot, SessionState};
use crate::token_holder::TokenHolder;

use docfill_config::{Config, Paths, SessionConfig};
use parking_lot::Mutex;
use session_storage::{
    FileStorage, KeyValueStorage, PersistedSession, SessionRecordStore, TokenMetadata, User,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long logout waits for the backend before clearing locally.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Re-check interval of the proactive refresh task while there is nothing to do.
const IDLE_RECHECK: Duration = Duration::from_secs(60);

/// Lower bound between two proactive refreshes.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 32;

/// Result of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Tokens were issued and the session is live.
    Authenticated(User),
    /// The account exists but must be verified before login.
    VerificationRequired(User),
}

enum Persist {
    Save,
    Remove,
}

struct Inner {
    state: SessionState,
    machine: SessionMachine,
}

impl Inner {
    fn stage(&self) -> LoadingStage {
        LoadingStage::from(self.machine.state())
    }

    fn advance(&mut self, input: SessionMachineInput) {
        if self.machine.consume(&input).is_err() {
            debug!(
                input = ?input,
                state = ?self.machine.state(),
                "Ignoring loading-stage transition"
            );
        }
    }

    fn payload(&self) -> AuthStateChangedPayload {
        change_payload(&self.state, self.stage())
    }
}

/// Authentication session shared by the UI and the transport layer.
pub struct AuthSession {
    config: SessionConfig,
    service: Arc<dyn AuthService>,
    tokens: Arc<TokenHolder>,
    coordinator: RefreshCoordinator,
    records: SessionRecordStore,
    lockout: LockoutPolicy,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl AuthSession {
    /// Create a session, loading the durable record from `storage`.
    pub fn new(
        config: SessionConfig,
        service: Arc<dyn AuthService>,
        storage: Arc<dyn KeyValueStorage>,
        tokens: Arc<TokenHolder>,
    ) -> Self {
        let records = SessionRecordStore::new(storage, config.storage_key.clone());
        let record = records.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read session record, starting empty");
            PersistedSession::default()
        });

        let initial = load_persisted(&record, tokens.has_token());
        info!(
            stage = ?initial.stage,
            session_indicator = initial.state.session_indicator,
            "Loaded session record"
        );

        let coordinator =
            RefreshCoordinator::new(Arc::clone(&service), Arc::clone(&tokens), config.refresh_buffer);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            lockout: LockoutPolicy::from_config(&config),
            config,
            service,
            tokens,
            coordinator,
            records,
            inner: Mutex::new(Inner {
                state: initial.state,
                machine: machine_at(initial.stage),
            }),
            events,
        }
    }

    /// Wire a session to the HTTP backend described by `config`.
    pub fn connect(config: &Config, storage: Arc<dyn KeyValueStorage>) -> AuthResult<Self> {
        let tokens = Arc::new(TokenHolder::new());
        let service = HttpAuthService::from_config(config, Arc::clone(&tokens))?;
        Ok(Self::new(config.session(), Arc::new(service), storage, tokens))
    }

    /// Open the session stored under `paths`, configured from its config file.
    pub fn open(paths: &Paths) -> AuthResult<Self> {
        let config = Config::load(paths)?;
        paths.ensure_dirs()?;
        let storage = FileStorage::new(paths.storage_dir())?;
        Self::connect(&config, Arc::new(storage))
    }

    /// Receive state change and session-expired notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot::new(&inner.state, inner.stage(), self.tokens.has_token())
    }

    /// Authenticated and holding a usable token, checked on every read.
    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().state.is_authenticated && self.tokens.has_token()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().state.is_initialized
    }

    pub fn loading_stage(&self) -> LoadingStage {
        self.inner.lock().stage()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.lock().state.user.clone()
    }

    pub fn token_expires_at(&self) -> Option<i64> {
        self.inner.lock().state.token_expires_at
    }

    pub fn error(&self) -> Option<AuthError> {
        self.inner.lock().state.error.clone()
    }

    pub fn lockout(&self) -> LockoutState {
        self.inner.lock().state.lockout.clone()
    }

    /// Whether a login attempt would be sent to the server right now.
    pub fn can_retry_login(&self) -> bool {
        LockoutPolicy::can_retry(&self.inner.lock().state.lockout, now_ms())
    }

    /// Current access token for bearer auth.
    pub fn access_token(&self) -> Option<String> {
        self.tokens.access_token()
    }

    pub fn token_holder(&self) -> &Arc<TokenHolder> {
        &self.tokens
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Authenticated and within the refresh buffer of expiry.
    ///
    /// Uses the state flag rather than the holder so an already-expired token
    /// still counts as expiring.
    pub fn is_token_expiring_soon(&self) -> bool {
        let inner = self.inner.lock();
        if !inner.state.is_authenticated {
            return false;
        }
        match inner.state.token_expires_at {
            Some(expires_at) => now_ms() >= expires_at.saturating_sub(self.buffer_ms()),
            None => false,
        }
    }

    fn buffer_ms(&self) -> i64 {
        i64::try_from(self.config.refresh_buffer.as_millis()).unwrap_or(i64::MAX)
    }

    // ------------------------------------------------------------------
    // Login / registration
    // ------------------------------------------------------------------

    /// Log in with email and password.
    ///
    /// Refused locally, without a network call, while a lock is active.
    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> AuthResult<User> {
        if let Some(err) = self.active_lock_error() {
            warn!(email = %email, "Login refused while account is locked");
            self.set_error(err.clone());
            return Err(err);
        }

        info!(email = %email, "Attempting login");
        let credentials = Credentials::new(email, password);
        match self.service.login(&credentials).await {
            Ok(response) => Ok(self.establish(response, remember_me)),
            Err(e) => Err(self.record_login_failure(&e)),
        }
    }

    /// Log in to the shared demo account.
    pub async fn demo_login(&self) -> AuthResult<User> {
        info!("Attempting demo login");
        match self.service.demo_login().await {
            Ok(response) => Ok(self.establish(response, false)),
            Err(e) => {
                let err = classify(AuthOperation::Login, &e);
                warn!(code = err.code(), "Demo login failed");
                self.set_error(err.clone());
                Err(err)
            }
        }
    }

    /// Create an account, logging in if the server issues tokens right away.
    pub async fn register(&self, data: RegisterData) -> AuthResult<RegistrationOutcome> {
        info!(email = %data.email, "Registering account");
        match self.service.register(&data).await {
            Ok(response) => match response.tokens {
                Some(tokens) => {
                    let user = self.establish(
                        LoginResponse {
                            user: response.user,
                            tokens,
                        },
                        false,
                    );
                    Ok(RegistrationOutcome::Authenticated(user))
                }
                None => {
                    info!(user_id = %response.user.id, "Registration requires email verification");
                    self.apply(Persist::Save, |inner| {
                        inner.state.is_initialized = true;
                        inner.state.error = None;
                        inner.advance(SessionMachineInput::Complete);
                    });
                    Ok(RegistrationOutcome::VerificationRequired(response.user))
                }
            },
            Err(e) => {
                let err = classify(AuthOperation::Register, &e);
                warn!(code = err.code(), "Registration failed");
                self.set_error(err.clone());
                Err(err)
            }
        }
    }

    fn active_lock_error(&self) -> Option<AuthError> {
        let inner = self.inner.lock();
        let lockout = &inner.state.lockout;
        if LockoutPolicy::can_retry(lockout, now_ms()) {
            return None;
        }
        Some(AuthError::AccountLocked {
            message: "Too many failed login attempts".to_string(),
            lockout_expires_at: lockout.lock_expiry,
        })
    }

    /// Install a freshly issued session.
    fn establish(&self, response: LoginResponse, remember_me: bool) -> User {
        let LoginResponse { user, tokens } = response;

        // Anything still refreshing belongs to the previous session.
        self.coordinator.invalidate();
        let expires_at = self
            .tokens
            .set_token(tokens.access_token.clone(), tokens.expires_in);
        let now = now_ms();

        self.apply(Persist::Save, |inner| {
            let state = &mut inner.state;
            state.user = Some(user.clone());
            state.token_meta = Some(token_meta(&tokens));
            state.token_expires_at = Some(expires_at);
            state.is_authenticated = true;
            state.session_indicator = true;
            state.is_initialized = true;
            state.remember_me = remember_me;
            state.last_activity = Some(now);
            state.lockout = LockoutPolicy::reset();
            state.error = None;
            inner.advance(SessionMachineInput::Complete);
        });

        info!(user_id = %user.id, expires_in = tokens.expires_in, "Login successful");
        let _ = self.events.send(SessionEvent::LoggedIn(user.clone()));
        user
    }

    fn record_login_failure(&self, error: &ApiError) -> AuthError {
        let err = classify(AuthOperation::Login, error);
        let server = error.server_lockout();
        let now = now_ms();

        let lockout = self.apply(Persist::Save, |inner| {
            inner.state.lockout =
                self.lockout
                    .record_failure(&inner.state.lockout, server.as_ref(), now);
            inner.state.error = Some(err.clone());
            inner.state.lockout.clone()
        });

        warn!(
            code = err.code(),
            attempts = lockout.login_attempts,
            locked = lockout.is_locked,
            "Login failed"
        );
        err
    }

    // ------------------------------------------------------------------
    // Logout
    // ------------------------------------------------------------------

    /// End the session. Local state is cleared even if the backend call fails.
    pub async fn logout(&self) {
        self.end_session(None).await;
    }

    async fn end_session(&self, reason: Option<AuthError>) {
        match tokio::time::timeout(LOGOUT_TIMEOUT, self.service.logout()).await {
            Ok(Ok(())) => debug!("Backend session revoked"),
            Ok(Err(e)) => warn!(error = %e, "Backend logout failed, clearing local session anyway"),
            Err(_) => warn!("Backend logout timed out, clearing local session anyway"),
        }
        self.clear_session(reason);
        info!("Logged out");
    }

    fn clear_session(&self, reason: Option<AuthError>) {
        self.coordinator.invalidate();
        self.tokens.clear_token();
        self.apply(Persist::Remove, |inner| {
            inner.state = SessionState {
                is_initialized: true,
                error: reason,
                ..SessionState::default()
            };
            inner.advance(SessionMachineInput::Complete);
        });
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Refresh the access token now.
    ///
    /// Concurrent callers share one network call. On failure the session is
    /// ended and a single [`SessionEvent::SessionExpired`] is emitted, however
    /// many callers observed the failure.
    pub async fn refresh_token(&self) -> AuthResult<()> {
        let (flight_epoch, result) = self.coordinator.refresh_in_flight().await;
        match result {
            Ok(tokens) => self.apply_refreshed(flight_epoch, &tokens),
            Err(AuthError::SessionCleared) => Err(AuthError::SessionCleared),
            Err(err) => {
                if self.coordinator.invalidate_if(flight_epoch) {
                    if self.loading_stage() == LoadingStage::Validating {
                        // Startup rehydration: nothing was live to expire.
                        info!(code = err.code(), "Token refresh failed during startup validation, clearing session");
                        self.clear_session(None);
                    } else {
                        warn!(code = err.code(), "Token refresh failed, ending session");
                        let _ = self.events.send(SessionEvent::SessionExpired);
                        self.end_session(Some(AuthError::SessionExpired)).await;
                    }
                }
                Err(err)
            }
        }
    }

    /// Refresh only when the token is inside the refresh buffer.
    ///
    /// Returns whether a refresh ran.
    pub async fn refresh_token_if_needed(&self) -> AuthResult<bool> {
        if !self.is_token_expiring_soon() {
            return Ok(false);
        }
        debug!("Access token expiring soon, refreshing");
        self.refresh_token().await.map(|()| true)
    }

    fn apply_refreshed(&self, flight_epoch: u64, tokens: &AuthTokens) -> AuthResult<()> {
        let expires_at = self.tokens.expires_at();
        let now = now_ms();
        self.apply(Persist::Save, |inner| {
            // A clear after the flight settled wins over its result.
            if self.coordinator.epoch() != flight_epoch {
                return Err(AuthError::SessionCleared);
            }
            let state = &mut inner.state;
            state.token_meta = Some(token_meta(tokens));
            state.token_expires_at = expires_at;
            state.is_authenticated = true;
            state.session_indicator = true;
            state.last_activity = Some(now);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Settle authentication state after startup.
    ///
    /// Never fails: anything unexpected leaves the session unauthenticated.
    /// Returns whether the session ended up authenticated.
    pub async fn initialize(&self) -> bool {
        let indicator = self.apply(Persist::Save, |inner| {
            inner.advance(SessionMachineInput::Rehydrate);
            inner.state.session_indicator
        });

        let authenticated = if !indicator {
            debug!("No session indicator, nothing to rehydrate");
            false
        } else if !self.tokens.has_token() {
            self.silent_refresh().await
        } else {
            self.verify_current_session().await
        };

        self.apply(Persist::Save, |inner| {
            inner.state.is_initialized = true;
            inner.advance(SessionMachineInput::Complete);
        });
        info!(authenticated, "Session initialized");
        authenticated
    }

    fn enter_validating(&self) {
        self.apply(Persist::Save, |inner| {
            inner.advance(SessionMachineInput::Validate);
        });
    }

    async fn silent_refresh(&self) -> bool {
        info!("Session indicator present without a token, attempting silent refresh");
        self.enter_validating();

        let (flight_epoch, result) = self.coordinator.refresh_in_flight().await;
        let refreshed = match result {
            Ok(tokens) => self.apply_refreshed(flight_epoch, &tokens),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok(()) => {
                match self.service.current_user().await {
                    Ok(user) => self.store_user(user),
                    Err(e) => warn!(error = %e, "Profile fetch after silent refresh failed, keeping session"),
                }
                info!("Session restored by silent refresh");
                true
            }
            Err(AuthError::SessionCleared) => false,
            Err(e) => {
                info!(code = e.code(), "Silent refresh failed, clearing session");
                self.clear_session(None);
                false
            }
        }
    }

    async fn verify_current_session(&self) -> bool {
        self.enter_validating();
        let epoch = self.coordinator.epoch();

        match self.service.current_user().await {
            Ok(user) => {
                let expires_at = self.tokens.expires_at();
                let verified = self.apply(Persist::Save, |inner| {
                    if self.coordinator.epoch() != epoch {
                        return false;
                    }
                    inner.state.user = Some(user);
                    inner.state.is_authenticated = true;
                    inner.state.token_expires_at = expires_at;
                    true
                });
                debug!(verified, "Held token verified with server");
                verified
            }
            Err(e) => {
                warn!(error = %e, "Held token rejected by server, clearing session");
                self.clear_session(None);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Protected requests
    // ------------------------------------------------------------------

    /// Run a protected request with the current bearer token.
    ///
    /// Refreshes first when the token is about to expire. A 401 answer triggers
    /// one forced refresh and one retry; a second 401 is returned as is.
    pub async fn authorized<T, F, Fut>(&self, request: F) -> AuthResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.refresh_token_if_needed().await?;
        let token = self.tokens.access_token().ok_or(AuthError::NotLoggedIn)?;

        let result = match request(token).await {
            Err(e) if e.is_unauthorized() => {
                debug!("Protected request unauthorized, refreshing once");
                self.refresh_token().await?;
                let token = self.tokens.access_token().ok_or(AuthError::NotLoggedIn)?;
                request(token).await
            }
            other => other,
        };

        let value = result.map_err(AuthError::Request)?;
        self.touch();
        Ok(value)
    }

    /// Start the proactive refresh task.
    ///
    /// The task sleeps until the refresh buffer is reached, refreshes, and
    /// re-plans. While unauthenticated it re-checks periodically.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            info!("Starting proactive token refresh");
            let mut wait = session.time_until_refresh().unwrap_or(IDLE_RECHECK);
            loop {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                wait = match session.refresh_token_if_needed().await {
                    Ok(true) => {
                        // A token issued inside the buffer is due again at once.
                        debug!("Proactive refresh completed");
                        session
                            .time_until_refresh()
                            .unwrap_or(IDLE_RECHECK)
                            .max(session.refresh_floor())
                    }
                    Ok(false) => session.time_until_refresh().unwrap_or(IDLE_RECHECK),
                    Err(e) => {
                        warn!(error = %e, "Proactive refresh failed");
                        IDLE_RECHECK
                    }
                };
            }
        })
    }

    /// Shortest wait after a successful refresh: half the remaining lifetime,
    /// capped at the idle re-check and never below one second.
    fn refresh_floor(&self) -> Duration {
        let remaining_ms = self
            .tokens
            .expires_at()
            .map_or(0, |expires_at| expires_at.saturating_sub(now_ms()).max(0));
        Duration::from_millis(remaining_ms as u64 / 2).clamp(MIN_REFRESH_INTERVAL, IDLE_RECHECK)
    }

    fn time_until_refresh(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if !inner.state.is_authenticated {
            return None;
        }
        let refresh_at = inner.state.token_expires_at?.saturating_sub(self.buffer_ms());
        let wait_ms = refresh_at.saturating_sub(now_ms()).max(0);
        Some(Duration::from_millis(wait_ms as u64))
    }

    // ------------------------------------------------------------------
    // Account and manual actions
    // ------------------------------------------------------------------

    /// Re-fetch the profile of the logged-in user.
    pub async fn refresh_user(&self) -> AuthResult<User> {
        match self.service.current_user().await {
            Ok(user) => {
                self.store_user(user.clone());
                Ok(user)
            }
            Err(e) => Err(classify(AuthOperation::CurrentUser, &e)),
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        self.service
            .request_password_reset(email)
            .await
            .map_err(|e| classify(AuthOperation::PasswordReset, &e))?;
        info!(email = %email, "Password reset requested");
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        self.service
            .reset_password(token, new_password)
            .await
            .map_err(|e| classify(AuthOperation::PasswordReset, &e))?;
        info!("Password reset completed");
        Ok(())
    }

    /// Replace the stored profile, e.g. after an account edit.
    pub fn update_user(&self, user: User) {
        self.store_user(user);
    }

    pub fn clear_error(&self) {
        self.apply(Persist::Save, |inner| inner.state.error = None);
    }

    /// Manually clear the failed-login counters and any lock.
    pub fn reset_login_attempts(&self) {
        self.apply(Persist::Save, |inner| inner.state.lockout = LockoutPolicy::reset());
    }

    fn store_user(&self, user: User) {
        self.apply(Persist::Save, |inner| inner.state.user = Some(user));
    }

    fn set_error(&self, error: AuthError) {
        self.apply(Persist::Save, |inner| inner.state.error = Some(error));
    }

    fn touch(&self) {
        let now = now_ms();
        self.apply(Persist::Save, |inner| inner.state.last_activity = Some(now));
    }

    /// Mutate state, persist, and broadcast if the visible state changed.
    ///
    /// The record is written under the state lock so writes land in mutation order.
    fn apply<R>(&self, persist: Persist, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, changed) = {
            let mut inner = self.inner.lock();
            let before = inner.payload();
            let result = f(&mut inner);

            let written = match persist {
                Persist::Save => self.records.save(&inner.state.to_record()),
                Persist::Remove => self.records.clear(),
            };
            if let Err(e) = written {
                warn!(error = %e, "Failed to persist session record");
            }

            let after = inner.payload();
            (result, (before != after).then_some(after))
        };

        if let Some(payload) = changed {
            debug!(
                stage = ?payload.stage,
                authenticated = payload.authenticated,
                "Session state changed"
            );
            let _ = self.events.send(SessionEvent::StateChanged(payload));
        }
        result
    }
}

fn token_meta(tokens: &AuthTokens) -> TokenMetadata {
    TokenMetadata {
        expires_in: tokens.expires_in,
        token_type: tokens.token_type.clone(),
    }
}
