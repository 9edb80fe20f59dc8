//! Client authentication session core.
//!
//! This crate provides:
//! - An in-memory-only access token holder (never persisted)
//! - Single-flight token refresh shared by every concurrent caller
//! - Startup rehydration through a silent, cookie-based refresh
//! - Client and server lockout bookkeeping for failed logins
//! - An explicit FSM for the startup loading stages
//! - A reqwest client for the REST auth endpoints

mod error;
mod events;
mod http_client;
mod lockout;
mod refresh;
mod service;
mod session;
mod session_fsm;
mod state;
mod token_holder;

pub use error::{classify, codes, ApiError, AuthError, AuthOperation, AuthResult, ServerLockout};
pub use events::{AuthStateChangedPayload, SessionEvent};
pub use http_client::HttpAuthService;
pub use lockout::{LockoutPolicy, LockoutState};
pub use refresh::RefreshCoordinator;
pub use service::{AuthService, AuthTokens, Credentials, LoginResponse, RegisterData, RegisterResponse};
pub use session::{AuthSession, RegistrationOutcome};
pub use session_fsm::{LoadingStage, SessionMachine, SessionMachineInput, SessionMachineState};
pub use state::{load_persisted, InitialState, SessionSnapshot, SessionState};
pub use token_holder::TokenHolder;

pub use docfill_config::SessionConfig;
pub use session_storage::User;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
