//! Integration tests for the PostgreSQL history sink and credential store.
//!
//! Run with: `cargo test -p xavyo-directory-query-db --features integration`

#![cfg(feature = "integration")]

mod common;

use chrono::{Duration, Utc};
use serde_json::{json, Map};
use xavyo_directory_query::{
    BackendType, CredentialEncryption, CredentialId, CredentialStore, HistoryEntry, HistorySink,
    HistoryStatus, UserId,
};
use xavyo_directory_query_db::{NewCredential, PgCredentialStore, PgHistorySink};


fn entry(user_id: UserId, status: HistoryStatus) -> HistoryEntry {
    let mut parameters = Map::new();
    parameters.insert("days".to_string(), json!(90));
    HistoryEntry {
        user_id: Some(user_id),
        query_id: "ad_inactive_users".to_string(),
        executed_at: Utc::now(),
        parameters,
        status,
        row_count: if status == HistoryStatus::Completed { 2 } else { 0 },
        execution_time_ms: 120,
        error_message: (status == HistoryStatus::Failed).then(|| "connection failed".to_string()),
        results_payload: (status == HistoryStatus::Completed)
            .then(|| json!([{"sAMAccountName": "jdoe"}, {"sAMAccountName": "asmith"}])),
    }
}

#[tokio::test]
async fn test_history_record_and_read_back() {
    let pool = common::test_pool().await;
    let sink = PgHistorySink::new(pool);
    let user_id = UserId::new(common::unique_user_id());

    let id = sink.record(entry(user_id, HistoryStatus::Completed)).await.unwrap();
    let record = sink.get(id).await.unwrap().expect("history row");
    let (read_id, read) = record.into_entry().unwrap();

    assert_eq!(read_id, id);
    assert_eq!(read.status, HistoryStatus::Completed);
    assert_eq!(read.row_count, 2);
    assert_eq!(read.parameters["days"], json!(90));
    assert_eq!(read.results_payload.unwrap()[1]["sAMAccountName"], json!("asmith"));
}

#[tokio::test]
async fn test_history_list_and_purge() {
    let pool = common::test_pool().await;
    let sink = PgHistorySink::new(pool);
    let user_id = UserId::new(common::unique_user_id());

    let mut old = entry(user_id, HistoryStatus::Failed);
    old.executed_at = Utc::now() - Duration::days(400);
    sink.record(old).await.unwrap();
    sink.record(entry(user_id, HistoryStatus::Completed)).await.unwrap();

    let records = sink.list_for_user(user_id, 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, "completed");
    assert_eq!(records[1].error_message.as_deref(), Some("connection failed"));

    let purged = sink.purge_before(Utc::now() - Duration::days(365)).await.unwrap();
    assert!(purged >= 1);
    assert_eq!(sink.list_for_user(user_id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_credential_store_default_and_ownership() {
    let pool = common::test_pool().await;
    let store = PgCredentialStore::new(pool);
    let encryption = CredentialEncryption::new([7u8; 32]);
    let user_id = UserId::new(common::unique_user_id());
    let other_user = UserId::new(user_id.as_i64() + 1);

    let first = store
        .insert(NewCredential {
            user_id,
            backend: BackendType::Ldap,
            username: Some("CORP\\jdoe".to_string()),
            tenant_id: None,
            client_id: None,
            encrypted_secret: encryption.encrypt_string(user_id, "old-password").unwrap(),
            is_default: true,
        })
        .await
        .unwrap();
    let second = store
        .insert(NewCredential {
            user_id,
            backend: BackendType::Ldap,
            username: Some("CORP\\jdoe-admin".to_string()),
            tenant_id: None,
            client_id: None,
            encrypted_secret: encryption.encrypt_string(user_id, "new-password").unwrap(),
            is_default: true,
        })
        .await
        .unwrap();

    let default = store
        .find_default(user_id, BackendType::Ldap)
        .await
        .unwrap()
        .expect("default credential");
    assert_eq!(default.id, second);
    assert_eq!(
        encryption.decrypt_string(user_id, &default.encrypted_secret).unwrap(),
        "new-password"
    );

    assert!(store.find_by_id(user_id, first).await.unwrap().is_some());
    assert!(store.find_by_id(other_user, first).await.unwrap().is_none());
    assert!(store
        .find_default(user_id, BackendType::Graph)
        .await
        .unwrap()
        .is_none());

    assert!(store.delete(user_id, first).await.unwrap());
    assert!(!store.delete(user_id, CredentialId::new(-1)).await.unwrap());
}
