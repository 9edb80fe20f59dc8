#![allow(dead_code)]

use async_trait::async_trait;
use auth_session::{
    ApiError, AuthService, AuthSession, AuthTokens, Credentials, LoginResponse, RegisterData,
    RegisterResponse, SessionConfig, SessionEvent, TokenHolder, User,
};
use parking_lot::Mutex;
use session_storage::{KeyValueStorage, MemoryStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const STORAGE_KEY: &str = "auth-storage";

/// Scriptable backend that counts every call.
pub struct MockAuthService {
    pub login_calls: AtomicUsize,
    pub demo_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    login: Mutex<Result<LoginResponse, ApiError>>,
    register: Mutex<Result<RegisterResponse, ApiError>>,
    refresh_error: Mutex<Option<ApiError>>,
    refresh_expires_in: Mutex<i64>,
    refresh_delay: Mutex<Duration>,
    me: Mutex<Result<User, ApiError>>,
    logout: Mutex<Result<(), ApiError>>,
}

impl MockAuthService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login_calls: AtomicUsize::new(0),
            demo_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            login: Mutex::new(Ok(login_response("at-login", 900))),
            register: Mutex::new(Ok(RegisterResponse {
                user: test_user(),
                tokens: None,
            })),
            refresh_error: Mutex::new(None),
            refresh_expires_in: Mutex::new(900),
            refresh_delay: Mutex::new(Duration::ZERO),
            me: Mutex::new(Ok(test_user())),
            logout: Mutex::new(Ok(())),
        })
    }

    pub fn set_login(&self, result: Result<LoginResponse, ApiError>) {
        *self.login.lock() = result;
    }

    pub fn set_register(&self, result: Result<RegisterResponse, ApiError>) {
        *self.register.lock() = result;
    }

    pub fn fail_refresh(&self, error: ApiError) {
        *self.refresh_error.lock() = Some(error);
    }

    pub fn set_refresh_expires_in(&self, secs: i64) {
        *self.refresh_expires_in.lock() = secs;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn set_me(&self, result: Result<User, ApiError>) {
        *self.me.lock() = result;
    }

    pub fn set_logout(&self, result: Result<(), ApiError>) {
        *self.logout.lock() = result;
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for MockAuthService {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().clone()
    }

    async fn demo_login(&self) -> Result<LoginResponse, ApiError> {
        self.demo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(login_response("at-demo", 900))
    }

    async fn register(&self, _data: &RegisterData) -> Result<RegisterResponse, ApiError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.register.lock().clone()
    }

    async fn refresh(&self, _refresh_token: Option<&str>) -> Result<AuthTokens, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.refresh_error.lock().clone() {
            return Err(error);
        }
        Ok(AuthTokens::bearer(
            format!("at-refreshed-{n}"),
            *self.refresh_expires_in.lock(),
        ))
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        self.me.lock().clone()
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout.lock().clone()
    }

    async fn request_password_reset(&self, _email: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn reset_password(&self, _token: &str, _new_password: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

pub fn test_user() -> User {
    User {
        id: "user-1".to_string(),
        email: "jane@example.com".to_string(),
        full_name: Some("Jane Doe".to_string()),
        role: Some("user".to_string()),
        email_verified: true,
    }
}

pub fn login_response(access_token: &str, expires_in: i64) -> LoginResponse {
    LoginResponse {
        user: test_user(),
        tokens: AuthTokens::bearer(access_token, expires_in),
    }
}

/// A session over `storage`, as if the process had just started.
pub fn start_session(
    service: &Arc<MockAuthService>,
    storage: &Arc<MemoryStorage>,
) -> Arc<AuthSession> {
    Arc::new(AuthSession::new(
        SessionConfig::default(),
        Arc::clone(service) as Arc<dyn AuthService>,
        Arc::clone(storage) as Arc<dyn KeyValueStorage>,
        Arc::new(TokenHolder::new()),
    ))
}

/// Fresh backend, storage and session.
pub fn fresh() -> (Arc<MockAuthService>, Arc<MemoryStorage>, Arc<AuthSession>) {
    let service = MockAuthService::new();
    let storage = Arc::new(MemoryStorage::new());
    let session = start_session(&service, &storage);
    (service, storage, session)
}

/// Raw persisted record text.
pub fn raw_record(storage: &MemoryStorage) -> Option<String> {
    storage.get(STORAGE_KEY).expect("memory storage never fails")
}

/// Everything currently queued on a subscription.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
