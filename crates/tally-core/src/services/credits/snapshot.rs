//! Usage snapshot computation
//!
//! Derives the read-side view of a ledger: remaining credits, percentages and
//! the severity tier. Clamping happens here, never on the write path.

use serde::{Deserialize, Serialize};

use super::period::PeriodId;

/// Default boundary above which usage is healthy (percent remaining)
pub const DEFAULT_WARNING_THRESHOLD: f64 = 50.0;

/// Default boundary below which usage is critical (percent remaining)
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 20.0;

// ============================================================================
// Tier
// ============================================================================

/// Usage severity bucket derived from the remaining percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageTier {
    /// Plenty of the allotment left
    Healthy,
    /// Allotment is running low
    Warning,
    /// Allotment is nearly or fully spent
    Critical,
}

impl UsageTier {
    /// Determine the tier for a remaining percentage
    ///
    /// `> warning` is healthy, `critical..=warning` is a warning and anything
    /// below `critical` is critical.
    pub fn from_remaining(percentage_remaining: f64, thresholds: &TierThresholds) -> Self {
        if percentage_remaining > thresholds.warning {
            UsageTier::Healthy
        } else if percentage_remaining >= thresholds.critical {
            UsageTier::Warning
        } else {
            UsageTier::Critical
        }
    }
}

impl std::fmt::Display for UsageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageTier::Healthy => write!(f, "healthy"),
            UsageTier::Warning => write!(f, "warning"),
            UsageTier::Critical => write!(f, "critical"),
        }
    }
}

/// Remaining-percentage boundaries between tiers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            warning: DEFAULT_WARNING_THRESHOLD,
            critical: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

impl TierThresholds {
    /// Clamp both bounds into 0..=100 and keep `critical <= warning`
    pub fn validate(&self) -> Self {
        let warning = self.warning.clamp(0.0, 100.0);
        let critical = self.critical.clamp(0.0, 100.0);
        Self {
            warning: warning.max(critical),
            critical: critical.min(warning),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time usage view for one scope
///
/// Recomputed on every read, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Tenant/client the ledger belongs to
    pub scope: String,
    /// Period the totals apply to
    pub period: PeriodId,
    /// Credits consumed within `period`
    pub consumed_total: u64,
    /// Configured period ceiling
    pub allotment: i64,
    /// `max(0, allotment - consumed_total)`
    pub remaining: u64,
    /// `100 * remaining / allotment`, 0 when there is no allotment
    pub percentage_remaining: f64,
    /// Complement of `percentage_remaining`, 0 when there is no allotment
    pub percentage_used: f64,
    pub tier: UsageTier,
    /// `consumed_total * cost_per_credit`
    pub estimated_cost_usd: f64,
}

impl UsageSnapshot {
    /// Compute a snapshot from a consumed total and an allotment
    pub fn new(
        scope: impl Into<String>,
        period: PeriodId,
        consumed_total: u64,
        allotment: i64,
        thresholds: &TierThresholds,
    ) -> Self {
        let (remaining, percentage_remaining, percentage_used) = if allotment <= 0 {
            (0, 0.0, 0.0)
        } else {
            let consumed = i128::from(consumed_total);
            let remaining = (i128::from(allotment) - consumed).max(0) as u64;
            let pct = 100.0 * remaining as f64 / allotment as f64;
            (remaining, pct, 100.0 - pct)
        };

        Self {
            scope: scope.into(),
            period,
            consumed_total,
            allotment,
            remaining,
            percentage_remaining,
            percentage_used,
            tier: UsageTier::from_remaining(percentage_remaining, thresholds),
            estimated_cost_usd: 0.0,
        }
    }

    /// Price the consumed credits
    pub fn with_cost_per_credit(mut self, cost_per_credit_usd: f64) -> Self {
        self.estimated_cost_usd = self.consumed_total as f64 * cost_per_credit_usd.max(0.0);
        self
    }

    /// True once nothing of the allotment is left
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
