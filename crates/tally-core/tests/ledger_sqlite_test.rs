//! Integration tests for the credit ledger on SQLite

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tally_core::db::Database;
use tally_core::services::credits::{
    open_ledger, CreditLedger, CreditSettings, FixedClock, LedgerError, LedgerStore,
    SettingsStore, SqliteLedgerStore, UsageTier,
};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::open(db_path).await.expect("Failed to create test database");
    (db, temp_dir)
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn ledger(db: &Database, clock: Arc<FixedClock>, allotment: i64) -> CreditLedger {
    let store = Arc::new(SqliteLedgerStore::new(db.pool.clone()));
    CreditLedger::new("acme", store, CreditSettings::with_allotment(allotment)).with_clock(clock)
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("tally.db");
    let clock = Arc::new(FixedClock::new(at(2024, 1, 10)));

    {
        let db = Database::open(db_path.clone()).await.unwrap();
        let ledger = ledger(&db, clock.clone(), 10_000);
        ledger.apply_consumption(7000, Some("e1")).await.unwrap();
        ledger.apply_consumption(500, Some("e2")).await.unwrap();
        db.pool.close().await;
    }

    let db = Database::open(db_path).await.unwrap();
    let ledger = ledger(&db, clock, 10_000);

    // redelivery after restart is still suppressed
    let snapshot = ledger.apply_consumption(500, Some("e2")).await.unwrap();
    assert_eq!(snapshot.consumed_total, 7500);

    let snapshot = ledger.current_snapshot(10_000).await.unwrap();
    assert_eq!(snapshot.remaining, 2500);
    assert_eq!(snapshot.percentage_remaining, 25.0);
    assert_eq!(snapshot.tier, UsageTier::Warning);
}

#[tokio::test]
async fn test_rollover_on_sqlite() {
    let (db, _temp_dir) = create_test_db().await;
    let clock = Arc::new(FixedClock::new(at(2024, 1, 20)));
    let ledger = ledger(&db, clock.clone(), 10_000);

    ledger.apply_consumption(9000, None).await.unwrap();

    clock.set(at(2024, 2, 2));
    // the read does not persist the rollover
    assert_eq!(ledger.current_snapshot(10_000).await.unwrap().consumed_total, 0);
    let store = SqliteLedgerStore::new(db.pool.clone());
    assert_eq!(store.load("acme").await.unwrap().unwrap().period.as_str(), "2024-01");

    let snapshot = ledger.apply_consumption(500, None).await.unwrap();
    assert_eq!(snapshot.period.as_str(), "2024-02");
    assert_eq!(snapshot.consumed_total, 500);

    let stored = store.load("acme").await.unwrap().unwrap();
    assert_eq!(stored.period.as_str(), "2024-02");
    assert_eq!(stored.consumed_total, 500);

    let jan = ledger.history(Some(&"2024-01".into())).await.unwrap();
    assert_eq!(jan.len(), 1);
    assert_eq!(jan[0].delta, 9000);
}

#[tokio::test]
async fn test_concurrent_accumulation_on_sqlite() {
    let (db, _temp_dir) = create_test_db().await;
    let clock = Arc::new(FixedClock::new(at(2024, 3, 5)));
    let n: u64 = 40;

    // Half the writers share one ledger, the rest each get their own
    let shared = Arc::new(ledger(&db, clock.clone(), 1000));
    let mut handles = Vec::new();
    for i in 0..n {
        if i % 2 == 0 {
            let ledger = shared.clone();
            handles.push(tokio::spawn(async move {
                ledger.apply_consumption(1, Some(&format!("e{}", i))).await
            }));
        } else {
            let own = ledger(&db, clock.clone(), 1000);
            handles.push(tokio::spawn(async move {
                own.apply_consumption(1, Some(&format!("e{}", i))).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().expect("apply should succeed");
    }

    let snapshot = shared.current_snapshot(1000).await.unwrap();
    assert_eq!(snapshot.consumed_total, n);
    assert_eq!(shared.history(None).await.unwrap().len() as u64, n);
}

#[tokio::test]
async fn test_open_ledger_uses_saved_settings() {
    let (db, _temp_dir) = create_test_db().await;
    let settings = SettingsStore::new(db.pool.clone());
    settings.set("acme", "allotment", "200").await.unwrap();
    settings.set("acme", "critical_threshold", "30").await.unwrap();

    let ledger = open_ledger(&db, "acme").await.unwrap();
    assert_eq!(ledger.settings().allotment, 200);

    let snapshot = ledger.apply_consumption(150, Some("e1")).await.unwrap();
    assert_eq!(snapshot.allotment, 200);
    assert_eq!(snapshot.remaining, 50);
    assert_eq!(snapshot.percentage_remaining, 25.0);
    assert_eq!(snapshot.tier, UsageTier::Critical);
}

#[tokio::test]
async fn test_blocked_write_leaves_state_untouched() {
    let (db, _temp_dir) = create_test_db().await;
    let settings = CreditSettings {
        persistence_timeout_ms: 200,
        ..CreditSettings::with_allotment(1000)
    };
    let store = Arc::new(
        SqliteLedgerStore::new(db.pool.clone()).with_write_timeout(settings.persistence_timeout()),
    );
    let ledger = CreditLedger::new("acme", store.clone(), settings)
        .with_clock(Arc::new(FixedClock::new(at(2024, 1, 10))));
    ledger.apply_consumption(10, None).await.unwrap();

    // An open read transaction keeps the writer from committing
    let mut reader = db.pool.acquire().await.unwrap();
    sqlx::query("BEGIN").execute(&mut *reader).await.unwrap();
    let (total,): (i64,) =
        sqlx::query_as("SELECT consumed_total FROM credit_ledgers WHERE scope = 'acme'")
            .fetch_one(&mut *reader)
            .await
            .unwrap();
    assert_eq!(total, 10);

    let err = ledger.apply_consumption(5, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(_)));
    assert!(err.is_retryable());

    sqlx::query("COMMIT").execute(&mut *reader).await.unwrap();
    drop(reader);

    // The failed delta was not recorded
    let stored = store.load("acme").await.unwrap().unwrap();
    assert_eq!(stored.consumed_total, 10);
    assert_eq!(stored.version, 1);
    assert_eq!(ledger.history(None).await.unwrap().len(), 1);

    // so retrying it counts it once
    let snapshot = ledger.apply_consumption(5, None).await.unwrap();
    assert_eq!(snapshot.consumed_total, 15);
    assert_eq!(ledger.history(None).await.unwrap().len(), 2);
}
