//! REST implementation of [`AuthService`].
//!
//! Every endpoint answers with the envelope `{ success, data?, error? }`. The
//! refresh token travels in an HTTP-only cookie kept by the client's cookie
//! store, so it never reaches this process as a value.

use crate::error::{codes, ApiError, AuthError, AuthResult, ServerLockout};
use crate::service::{
    AuthService, AuthTokens, Credentials, LoginResponse, RegisterData, RegisterResponse,
};
use crate::token_holder::TokenHolder;
use async_trait::async_trait;
use docfill_config::Config;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use session_storage::User;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    code: Option<String>,
    message: Option<String>,
    attempts_remaining: Option<u32>,
    lockout_expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct RefreshData {
    tokens: AuthTokens,
}

#[derive(Deserialize)]
struct UserData {
    user: User,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

/// Auth backend over HTTP.
pub struct HttpAuthService {
    client: Client,
    base_url: Url,
    tokens: Arc<TokenHolder>,
}

impl HttpAuthService {
    /// Create a client rooted at `base_url` with a persistent cookie jar.
    pub fn new(base_url: Url, tokens: Arc<TokenHolder>, timeout: Duration) -> AuthResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;

        // Relative joins drop the last path segment unless it ends in '/'.
        let base_url = if base_url.path().ends_with('/') {
            base_url
        } else {
            let mut url = base_url;
            let path = format!("{}/", url.path());
            url.set_path(&path);
            url
        };

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    /// Create a client from the loaded configuration.
    pub fn from_config(config: &Config, tokens: Arc<TokenHolder>) -> AuthResult<Self> {
        Self::new(config.api_base_url()?, tokens, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::network(format!("invalid endpoint {path}: {e}")))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.post(self.endpoint(path)?))
    }

    fn with_bearer(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send and unwrap the envelope. `Ok(None)` means success without data.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::network(e.to_string()))?;
        let status = response.status();
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(e.to_string()))?;

        let envelope: Option<Envelope<T>> = match serde_json::from_str(&body) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                debug!(url = %url, error = %e, "Response body is not an API envelope");
                None
            }
        };

        match envelope {
            Some(envelope) if status.is_success() && envelope.success => Ok(envelope.data),
            envelope => {
                let wire = envelope.and_then(|e| e.error);
                let error = to_api_error(status.as_u16(), status.canonical_reason(), wire);
                warn!(url = %url, status = %status, code = ?error.code, "Auth request failed");
                Err(error)
            }
        }
    }

    async fn send_data<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.send(request)
            .await?
            .ok_or_else(|| ApiError::network("response envelope is missing data"))
    }
}

fn to_api_error(status: u16, reason: Option<&str>, wire: Option<WireError>) -> ApiError {
    let wire = wire.unwrap_or(WireError {
        code: None,
        message: None,
        attempts_remaining: None,
        lockout_expires_at: None,
    });
    let message = wire
        .message
        .unwrap_or_else(|| reason.unwrap_or("Request failed").to_string());
    let is_locked = wire.code.as_deref() == Some(codes::ACCOUNT_LOCKED);

    let mut error = ApiError::new(status, message);
    if is_locked || wire.attempts_remaining.is_some() || wire.lockout_expires_at.is_some() {
        error = error.with_lockout(ServerLockout {
            is_locked,
            attempts_remaining: wire.attempts_remaining,
            lockout_expires_at: wire.lockout_expires_at,
        });
    }
    if let Some(code) = wire.code {
        error = error.with_code(code);
    }
    error
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        debug!(email = %credentials.email, "Attempting email/password login");
        self.send_data(self.post("auth/login")?.json(credentials)).await
    }

    async fn demo_login(&self) -> Result<LoginResponse, ApiError> {
        self.send_data(self.post("auth/demo")?.json(&json!({}))).await
    }

    async fn register(&self, data: &RegisterData) -> Result<RegisterResponse, ApiError> {
        debug!(email = %data.email, "Registering account");
        self.send_data(self.post("auth/register")?.json(data)).await
    }

    async fn refresh(&self, refresh_token: Option<&str>) -> Result<AuthTokens, ApiError> {
        let body = RefreshBody { refresh_token };
        let data: RefreshData = self.send_data(self.post("auth/refresh")?.json(&body)).await?;
        Ok(data.tokens)
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        let request = self.with_bearer(self.client.get(self.endpoint("auth/me")?));
        let data: UserData = self.send_data(request).await?;
        Ok(data.user)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let request = self.with_bearer(self.post("auth/logout")?);
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ApiError> {
        let request = self.post("auth/forgot-password")?.json(&json!({ "email": email }));
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ApiError> {
        let request = self
            .post("auth/reset-password")?
            .json(&json!({ "token": token, "password": new_password }));
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }
}
