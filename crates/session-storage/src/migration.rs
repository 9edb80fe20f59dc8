//! Forward migrations for the session record.
//!
//! Each step rewrites the raw JSON state of version `n` into version `n + 1`.
//! Version history:
//! - v0: lockout counters nested under `lockout`, raw tokens persisted
//! - v1: lockout counters flattened, raw tokens still persisted, `isAuthenticated`
//! - v2: token metadata only, `sessionIndicator` replaces `isAuthenticated`

use crate::{StorageError, StorageResult};
use serde_json::{Map, Value};
use tracing::debug;

/// Schema version written by this crate.
pub const CURRENT_VERSION: u32 = 2;

type MigrationStep = fn(Map<String, Value>) -> Map<String, Value>;

const MIGRATIONS: [MigrationStep; CURRENT_VERSION as usize] = [migrate_v0_to_v1, migrate_v1_to_v2];

/// Bring a raw state object from `version` up to [`CURRENT_VERSION`].
pub fn migrate(version: u32, state: Value) -> StorageResult<Value> {
    if version > CURRENT_VERSION {
        return Err(StorageError::Migration(format!(
            "record version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    let mut state = match state {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(StorageError::Migration(format!(
                "record state must be an object, got {other}"
            )))
        }
    };

    for (from, step) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        debug!(from, to = from + 1, "Migrating session record");
        state = step(state);
    }

    strip_raw_tokens(&mut state);
    Ok(Value::Object(state))
}

fn migrate_v0_to_v1(mut state: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Object(lockout)) = state.remove("lockout") {
        if let Some(attempts) = lockout.get("attempts") {
            state.insert("loginAttempts".to_string(), attempts.clone());
        }
        if let Some(locked) = lockout.get("locked") {
            state.insert("isLocked".to_string(), locked.clone());
        }
        if let Some(expiry) = lockout.get("expiry") {
            state.insert("lockExpiry".to_string(), expiry.clone());
        }
    }
    state
}

fn migrate_v1_to_v2(mut state: Map<String, Value>) -> Map<String, Value> {
    let was_authenticated = state
        .remove("isAuthenticated")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    state
        .entry("sessionIndicator")
        .or_insert(Value::Bool(was_authenticated));
    state
}

/// Raw credentials never survive a load, whatever the version claims.
fn strip_raw_tokens(state: &mut Map<String, Value>) {
    for key in ["accessToken", "refreshToken", "token"] {
        state.remove(key);
    }
    if let Some(Value::Object(tokens)) = state.get_mut("tokens") {
        tokens.remove("accessToken");
        tokens.remove("refreshToken");
    }
}
