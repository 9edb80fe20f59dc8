//! Session record persisted through the file backend.

use std::sync::Arc;

use session_storage::{
    FileStorage, KeyValueStorage, PersistedSession, SessionRecordStore, TokenMetadata,
};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> SessionRecordStore {
    let storage = FileStorage::new(dir).expect("failed to open storage");
    SessionRecordStore::new(Arc::new(storage), "auth-storage")
}

#[test]
fn record_survives_process_restart() {
    let dir = tempdir().unwrap();

    let record = PersistedSession {
        tokens: Some(TokenMetadata {
            expires_in: 900,
            token_type: "Bearer".to_string(),
        }),
        token_expires_at: Some(1_700_000_900_000),
        session_indicator: true,
        is_initialized: true,
        last_activity: Some(1_700_000_000_000),
        ..Default::default()
    };
    open(dir.path()).save(&record).unwrap();

    let reloaded = open(dir.path()).load().unwrap();
    assert_eq!(reloaded, record);
}

#[test]
fn legacy_file_with_raw_tokens_is_scrubbed_on_rewrite() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();
    storage
        .set(
            "auth-storage",
            r#"{"version":1,"state":{
                "tokens":{"accessToken":"at-raw","refreshToken":"rt-raw","expiresIn":60,"tokenType":"Bearer"},
                "isAuthenticated":true
            }}"#,
        )
        .unwrap();

    let store = open(dir.path());
    let record = store.load().unwrap();
    assert!(record.session_indicator);
    store.save(&record).unwrap();

    let raw = std::fs::read_to_string(dir.path().join("auth-storage.json")).unwrap();
    assert!(!raw.contains("at-raw"));
    assert!(!raw.contains("rt-raw"));
}
