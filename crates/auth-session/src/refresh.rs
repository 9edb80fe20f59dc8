//! Single-flight token refresh.
//!
//! At most one refresh call is on the wire at any time. Every caller that
//! arrives while it is pending awaits the same shared future and observes the
//! same outcome. The slot is released before the outcome becomes visible, so
//! the next caller after settlement starts a fresh refresh.
//!
//! Each flight is stamped with the session epoch at start. Clearing or
//! replacing the session bumps the epoch; a flight that settles in a later
//! epoch does not touch the token holder.

use crate::error::{classify, AuthError, AuthOperation, AuthResult};
use crate::service::{AuthService, AuthTokens};
use crate::token_holder::TokenHolder;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

type RefreshFuture = Shared<BoxFuture<'static, AuthResult<AuthTokens>>>;

struct InFlight {
    id: u64,
    epoch: u64,
    future: RefreshFuture,
}

type Slot = Mutex<Option<InFlight>>;

/// Serializes refresh calls against one backend and one token holder.
pub struct RefreshCoordinator {
    service: Arc<dyn AuthService>,
    tokens: Arc<TokenHolder>,
    refresh_buffer: Duration,
    slot: Arc<Slot>,
    next_id: AtomicU64,
    epoch: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(
        service: Arc<dyn AuthService>,
        tokens: Arc<TokenHolder>,
        refresh_buffer: Duration,
    ) -> Self {
        Self {
            service,
            tokens,
            refresh_buffer,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Refresh only when the held token is missing or inside the buffer.
    ///
    /// Returns whether a refresh ran.
    pub async fn refresh_if_needed(&self) -> AuthResult<bool> {
        if !self.tokens.is_expiring_soon(self.refresh_buffer) {
            return Ok(false);
        }
        self.force_refresh().await.map(|_| true)
    }

    /// Refresh now, joining the in-flight refresh if there is one.
    pub async fn force_refresh(&self) -> AuthResult<AuthTokens> {
        self.refresh_in_flight().await.1
    }

    /// Like [`force_refresh`](Self::force_refresh), also returning the epoch
    /// the flight started in.
    pub(crate) async fn refresh_in_flight(&self) -> (u64, AuthResult<AuthTokens>) {
        let (epoch, future) = self.join_or_start();
        (epoch, future.await)
    }

    /// True while a refresh call is pending.
    pub fn is_refreshing(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Current session epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new epoch. Pending flights will not write their result.
    pub(crate) fn invalidate(&self) -> u64 {
        let _slot = self.slot.lock();
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a new epoch only if the current one is `expected`.
    ///
    /// Exactly one caller wins per epoch.
    pub(crate) fn invalidate_if(&self, expected: u64) -> bool {
        let _slot = self.slot.lock();
        self.epoch
            .compare_exchange(expected, expected + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn join_or_start(&self) -> (u64, RefreshFuture) {
        let mut slot = self.slot.lock();
        if let Some(in_flight) = slot.as_ref() {
            debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
            return (in_flight.epoch, in_flight.future.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let epoch = self.epoch();
        let future = run_refresh(
            id,
            epoch,
            Arc::clone(&self.service),
            Arc::clone(&self.tokens),
            Arc::clone(&self.epoch),
            Arc::downgrade(&self.slot),
        )
        .boxed()
        .shared();

        debug!(refresh_id = id, epoch, "Starting token refresh");
        *slot = Some(InFlight {
            id,
            epoch,
            future: future.clone(),
        });
        (epoch, future)
    }
}

async fn run_refresh(
    id: u64,
    started_epoch: u64,
    service: Arc<dyn AuthService>,
    tokens: Arc<TokenHolder>,
    epoch: Arc<AtomicU64>,
    slot: Weak<Slot>,
) -> AuthResult<AuthTokens> {
    let result = service.refresh(None).await;

    // Epoch changes take the slot lock, so holding it makes the check and the
    // holder write atomic with respect to a concurrent clear.
    let slot = slot.upgrade();
    let mut guard = slot.as_ref().map(|slot| slot.lock());
    if let Some(current) = guard.as_deref_mut() {
        if current.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *current = None;
        }
    }

    match result {
        Ok(new_tokens) => {
            if epoch.load(Ordering::SeqCst) != started_epoch {
                warn!(refresh_id = id, "Session changed during refresh, discarding new token");
                return Err(AuthError::SessionCleared);
            }
            tokens.set_token(new_tokens.access_token.clone(), new_tokens.expires_in);
            info!(
                refresh_id = id,
                expires_in = new_tokens.expires_in,
                "Access token refreshed"
            );
            Ok(new_tokens)
        }
        Err(e) => {
            warn!(refresh_id = id, status = ?e.status, error = %e, "Token refresh failed");
            Err(classify(AuthOperation::Refresh, &e))
        }
    }
}
