//! Session notifications broadcast to subscribers.

use crate::session_fsm::LoadingStage;
use serde::{Deserialize, Serialize};
use session_storage::User;

/// Payload for session state change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStateChangedPayload {
    /// Current loading stage.
    pub stage: LoadingStage,
    pub authenticated: bool,
    /// User ID if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User email if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Stage, authentication or user changed.
    StateChanged(AuthStateChangedPayload),
    /// Login, demo login or registration produced a session.
    LoggedIn(User),
    /// A refresh failed and the session is being torn down; emitted once per failure.
    SessionExpired,
}
