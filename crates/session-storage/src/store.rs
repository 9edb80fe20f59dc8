//! Reads and writes the session record under a single storage key.

use crate::migration::{migrate, CURRENT_VERSION};
use crate::{KeyValueStorage, PersistedSession, RecordEnvelope, StorageResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// High-level API over the durable session record.
#[derive(Clone)]
pub struct SessionRecordStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl SessionRecordStore {
    /// Create a store writing under `key`.
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Storage key of the record.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load and migrate the record.
    ///
    /// A missing, corrupt, or unsupported record loads as the empty record:
    /// startup must always be able to proceed. Only backend failures error.
    pub fn load(&self) -> StorageResult<PersistedSession> {
        let Some(raw) = self.storage.get(&self.key)? else {
            debug!(key = %self.key, "No persisted session record");
            return Ok(PersistedSession::default());
        };

        match Self::decode(&raw) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding unreadable session record");
                Ok(PersistedSession::default())
            }
        }
    }

    fn decode(raw: &str) -> StorageResult<PersistedSession> {
        let value: Value = serde_json::from_str(raw)?;
        let (version, state) = match value {
            Value::Object(mut map) if map.contains_key("state") => {
                let version = map
                    .get("version")
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0);
                let state = map.remove("state").unwrap_or(Value::Null);
                (version, state)
            }
            // Records written before the envelope existed.
            other => (0, other),
        };

        let state = migrate(version, state)?;
        Ok(serde_json::from_value(state)?)
    }

    /// Write the record at the current schema version.
    pub fn save(&self, record: &PersistedSession) -> StorageResult<()> {
        let envelope = RecordEnvelope {
            version: CURRENT_VERSION,
            state: record.clone(),
        };
        let raw = serde_json::to_string(&envelope)?;
        self.storage.set(&self.key, &raw)
    }

    /// Remove the record entirely.
    pub fn clear(&self) -> StorageResult<()> {
        self.storage.remove(&self.key)?;
        Ok(())
    }

    /// Raw stored text, for inspection.
    pub fn raw(&self) -> StorageResult<Option<String>> {
        self.storage.get(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStorage, TokenMetadata, User};

    fn store() -> (Arc<MemoryStorage>, SessionRecordStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionRecordStore::new(storage.clone(), "auth-storage");
        (storage, store)
    }

    #[test]
    fn test_missing_record_loads_default() {
        let (_, store) = store();
        assert_eq!(store.load().unwrap(), PersistedSession::default());
    }

    #[test]
    fn test_save_then_load() {
        let (_, store) = store();
        let record = PersistedSession {
            user: Some(User {
                id: "user-1".to_string(),
                email: "jane@example.com".to_string(),
                full_name: Some("Jane".to_string()),
                role: None,
                email_verified: true,
            }),
            tokens: Some(TokenMetadata {
                expires_in: 900,
                token_type: "Bearer".to_string(),
            }),
            session_indicator: true,
            remember_me: true,
            ..Default::default()
        };

        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), record);

        let raw = store.raw().unwrap().unwrap();
        assert!(raw.contains(r#""version":2"#));
    }

    #[test]
    fn test_corrupt_record_loads_default() {
        let (storage, store) = store();
        storage.set("auth-storage", "{not json").unwrap();
        assert_eq!(store.load().unwrap(), PersistedSession::default());
    }

    #[test]
    fn test_future_version_loads_default() {
        let (storage, store) = store();
        storage
            .set(
                "auth-storage",
                r#"{"version":99,"state":{"sessionIndicator":true}}"#,
            )
            .unwrap();
        assert!(!store.load().unwrap().session_indicator);
    }

    #[test]
    fn test_unversioned_legacy_record_is_migrated() {
        let (storage, store) = store();
        storage
            .set(
                "auth-storage",
                r#"{"isAuthenticated":true,"accessToken":"legacy","lockout":{"attempts":2}}"#,
            )
            .unwrap();

        let record = store.load().unwrap();
        assert!(record.session_indicator);
        assert_eq!(record.login_attempts, 2);
    }

    #[test]
    fn test_clear_removes_record() {
        let (storage, store) = store();
        store.save(&PersistedSession::default()).unwrap();
        store.clear().unwrap();
        assert!(!storage.has("auth-storage").unwrap());
    }
}
