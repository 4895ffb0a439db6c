//! Credit ledger types
//!
//! Persisted ledger state, consumption records and per-scope settings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::period::{PeriodGranularity, PeriodId, PeriodResolver};
use super::snapshot::{TierThresholds, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD};

// ============================================================================
// Ledger State
// ============================================================================

/// Durable accumulator for one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Period `consumed_total` applies to
    pub period: PeriodId,
    /// Credits consumed so far within `period`
    pub consumed_total: u64,
    /// Cursor of the last consumption event applied
    pub last_event_cursor: Option<String>,
    /// Revision of the stored record, bumped on every save
    ///
    /// Zero means the state has never been written.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl LedgerState {
    /// Initial state for a scope with no stored record
    pub fn fresh(period: PeriodId, now: DateTime<Utc>) -> Self {
        Self {
            period,
            consumed_total: 0,
            last_event_cursor: None,
            version: 0,
            updated_at: now,
        }
    }

    /// Replace this state with an empty one for `period`, keeping the revision
    pub fn rolled_over(&self, period: PeriodId, now: DateTime<Utc>) -> Self {
        Self {
            period,
            consumed_total: 0,
            last_event_cursor: None,
            version: self.version,
            updated_at: now,
        }
    }

    /// True when `cursor` was the last event applied to this state
    pub fn is_duplicate(&self, cursor: Option<&str>) -> bool {
        match (cursor, self.last_event_cursor.as_deref()) {
            (Some(incoming), Some(last)) => incoming == last,
            _ => false,
        }
    }
}

// ============================================================================
// Consumption Records
// ============================================================================

/// One applied consumption delta
///
/// Written in the same atomic save as the ledger state it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub id: String,
    pub scope: String,
    pub period: PeriodId,
    pub delta: u64,
    pub event_cursor: Option<String>,
    /// Ledger total right after this delta was applied
    pub consumed_total_after: u64,
    pub applied_at: DateTime<Utc>,
}

impl ConsumptionRecord {
    /// Record for `delta` having produced `state`
    pub fn new(scope: &str, state: &LedgerState, delta: u64, event_cursor: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            period: state.period.clone(),
            delta,
            event_cursor: event_cursor.map(str::to_string),
            consumed_total_after: state.consumed_total,
            applied_at: state.updated_at,
        }
    }
}

/// Credits consumed on one calendar day (UTC)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// `YYYY-MM-DD`
    pub date: String,
    pub credits: u64,
    pub events: u64,
}

/// Group records by the UTC day they were applied on, oldest day first
pub fn group_by_day(records: &[ConsumptionRecord]) -> Vec<DailyUsage> {
    let mut days: std::collections::BTreeMap<String, DailyUsage> = std::collections::BTreeMap::new();

    for record in records {
        let date = record.applied_at.format("%Y-%m-%d").to_string();
        let entry = days.entry(date.clone()).or_insert_with(|| DailyUsage {
            date,
            credits: 0,
            events: 0,
        });
        entry.credits += record.delta;
        entry.events += 1;
    }

    days.into_values().collect()
}

// ============================================================================
// Settings
// ============================================================================

/// Default credits per period
pub const DEFAULT_ALLOTMENT: i64 = 1000;

/// Default price of one credit in USD
pub const DEFAULT_COST_PER_CREDIT_USD: f64 = 0.10;

/// Default bound on each storage call
pub const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 5_000;

/// Lower bound on the storage timeout
pub const MIN_PERSISTENCE_TIMEOUT_MS: u64 = 50;

/// Per-scope credit tracking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditSettings {
    /// Credits available per period
    pub allotment: i64,
    /// Remaining percentage at or below which usage is a warning (0-100)
    pub warning_threshold: f64,
    /// Remaining percentage below which usage is critical (0-100)
    pub critical_threshold: f64,
    /// How often the allotment resets
    pub granularity: PeriodGranularity,
    /// Fixed offset from UTC used to place period boundaries
    pub utc_offset_minutes: i32,
    /// Price of one credit, for cost estimates
    pub cost_per_credit_usd: f64,
    /// Upper bound on a single storage call
    pub persistence_timeout_ms: u64,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            allotment: DEFAULT_ALLOTMENT,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
            granularity: PeriodGranularity::Monthly,
            utc_offset_minutes: 0,
            cost_per_credit_usd: DEFAULT_COST_PER_CREDIT_USD,
            persistence_timeout_ms: DEFAULT_PERSISTENCE_TIMEOUT_MS,
        }
    }
}

impl CreditSettings {
    /// Create settings with the specified allotment
    pub fn with_allotment(allotment: i64) -> Self {
        Self {
            allotment,
            ..Default::default()
        }
    }

    /// Validate and normalize the settings
    pub fn validate(&self) -> Self {
        let thresholds = self.thresholds();
        Self {
            allotment: self.allotment.max(0),
            warning_threshold: thresholds.warning,
            critical_threshold: thresholds.critical,
            granularity: self.granularity,
            utc_offset_minutes: self.utc_offset_minutes.clamp(-1439, 1439),
            cost_per_credit_usd: self.cost_per_credit_usd.max(0.0),
            persistence_timeout_ms: self.persistence_timeout_ms.max(MIN_PERSISTENCE_TIMEOUT_MS),
        }
    }

    pub fn thresholds(&self) -> TierThresholds {
        TierThresholds {
            warning: self.warning_threshold,
            critical: self.critical_threshold,
        }
        .validate()
    }

    pub fn resolver(&self) -> PeriodResolver {
        PeriodResolver::with_offset_minutes(self.granularity, self.utc_offset_minutes)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms.max(MIN_PERSISTENCE_TIMEOUT_MS))
    }
}

// ============================================================================
// Tests
// ============================================================================
