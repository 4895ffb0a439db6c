//! Ledger storage interface
//!
//! The ledger only needs keyed load/save with a revision check, so any
//! durable key-value backend can host it. [`MemoryLedgerStore`] keeps
//! everything in process and is what the tests run against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::error::LedgerError;
use super::period::PeriodId;
use super::types::{ConsumptionRecord, LedgerState};

// ============================================================================
// Store Trait
// ============================================================================

/// Result of a conditional save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// State and record were written
    Saved,
    /// Stored revision moved on since the state was loaded; nothing written
    Conflict,
}

/// Durable storage for ledger state, one record per scope
///
/// Implementations must make [`LedgerStore::save`] atomic: either the new
/// state and its consumption record are both written, or neither is. The
/// ledger never cancels a save, so a store bounds its own write time and
/// returns an error only once nothing was written.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short backend name, used in log lines
    fn backend(&self) -> &'static str;

    /// Load the stored state for `scope`, `None` if it was never written
    async fn load(&self, scope: &str) -> Result<Option<LedgerState>, LedgerError>;

    /// Write `state` and `record` iff the stored revision equals `expected_version`
    ///
    /// `expected_version` is 0 when no record is expected to exist yet.
    /// `state.version` carries the new revision.
    async fn save(
        &self,
        scope: &str,
        expected_version: u64,
        state: &LedgerState,
        record: &ConsumptionRecord,
    ) -> Result<SaveOutcome, LedgerError>;

    /// Consumption records for `scope`, oldest first, optionally limited to one period
    async fn records(
        &self,
        scope: &str,
        period: Option<&PeriodId>,
    ) -> Result<Vec<ConsumptionRecord>, LedgerError>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryEntry {
    state: Option<LedgerState>,
    records: Vec<ConsumptionRecord>,
}

/// Process-local ledger store
///
/// Supports fault injection (failing loads/saves, artificial latency) so the
/// ledger's error paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    latency_ms: AtomicU64,
    saves: AtomicU64,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored state directly, bypassing the ledger
    pub fn insert_state(&self, scope: &str, state: LedgerState) {
        let mut entries = self.lock();
        entries.entry(scope.to_string()).or_default().state = Some(state);
    }

    /// Make every subsequent load fail
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent save fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, scope: &str) -> Result<Option<LedgerState>, LedgerError> {
        self.simulate_latency().await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(LedgerError::persistence("memory store: load failure injected"));
        }

        Ok(self.lock().get(scope).and_then(|entry| entry.state.clone()))
    }

    async fn save(
        &self,
        scope: &str,
        expected_version: u64,
        state: &LedgerState,
        record: &ConsumptionRecord,
    ) -> Result<SaveOutcome, LedgerError> {
        self.simulate_latency().await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(LedgerError::persistence("memory store: save failure injected"));
        }

        let mut entries = self.lock();
        let entry = entries.entry(scope.to_string()).or_default();
        let current = entry.state.as_ref().map_or(0, |s| s.version);
        if current != expected_version {
            return Ok(SaveOutcome::Conflict);
        }

        entry.state = Some(state.clone());
        entry.records.push(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);

        Ok(SaveOutcome::Saved)
    }

    async fn records(
        &self,
        scope: &str,
        period: Option<&PeriodId>,
    ) -> Result<Vec<ConsumptionRecord>, LedgerError> {
        self.simulate_latency().await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(LedgerError::persistence("memory store: load failure injected"));
        }

        let entries = self.lock();
        Ok(entries
            .get(scope)
            .map(|entry| {
                entry
                    .records
                    .iter()
                    .filter(|r| period.map_or(true, |p| &r.period == p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn state(period: &str, total: u64, version: u64) -> LedgerState {
        LedgerState {
            period: PeriodId::new(period),
            consumed_total: total,
            last_event_cursor: None,
            version,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_load_missing_scope() {
        let store = MemoryLedgerStore::new();
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryLedgerStore::new();
        let s = state("2024-01", 5, 1);
        let record = ConsumptionRecord::new("acme", &s, 5, Some("e1"));

        let outcome = store.save("acme", 0, &s, &record).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(store.load("acme").await.unwrap(), Some(s));
        assert_eq!(store.records("acme", None).await.unwrap().len(), 1);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryLedgerStore::new();
        store.insert_state("acme", state("2024-01", 10, 3));

        let next = state("2024-01", 11, 3);
        let record = ConsumptionRecord::new("acme", &next, 1, None);
        let outcome = store.save("acme", 2, &next, &record).await.unwrap();

        assert_eq!(outcome, SaveOutcome::Conflict);
        assert_eq!(store.load("acme").await.unwrap().unwrap().consumed_total, 10);
        assert!(store.records("acme", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_filter_by_period() {
        let store = MemoryLedgerStore::new();
        let jan = state("2024-01", 4, 1);
        store
            .save("acme", 0, &jan, &ConsumptionRecord::new("acme", &jan, 4, None))
            .await
            .unwrap();
        let feb = state("2024-02", 2, 2);
        store
            .save("acme", 1, &feb, &ConsumptionRecord::new("acme", &feb, 2, None))
            .await
            .unwrap();

        let only_feb = store
            .records("acme", Some(&PeriodId::new("2024-02")))
            .await
            .unwrap();
        assert_eq!(only_feb.len(), 1);
        assert_eq!(only_feb[0].delta, 2);
        assert_eq!(store.records("acme", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryLedgerStore::new();
        store.set_fail_loads(true);
        assert!(matches!(
            store.load("acme").await,
            Err(LedgerError::Persistence(_))
        ));

        store.set_fail_loads(false);
        store.set_fail_saves(true);
        let s = state("2024-01", 1, 1);
        let record = ConsumptionRecord::new("acme", &s, 1, None);
        assert!(store.save("acme", 0, &s, &record).await.is_err());
        assert!(store.load("acme").await.unwrap().is_none());
    }
}
