//! Period window resolution
//!
//! Maps a point in time onto the calendar period it belongs to. Two
//! timestamps resolve to the same [`PeriodId`] iff they fall inside the same
//! period under the configured granularity and UTC offset.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Granularity
// ============================================================================

/// Reset cadence of a credit allotment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGranularity {
    /// Counter resets at the start of each calendar month
    #[default]
    Monthly,
    /// Counter resets at midnight each day
    Daily,
}

impl PeriodGranularity {
    fn format_str(&self) -> &'static str {
        match self {
            PeriodGranularity::Monthly => "%Y-%m",
            PeriodGranularity::Daily => "%Y-%m-%d",
        }
    }
}

impl std::fmt::Display for PeriodGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodGranularity::Monthly => write!(f, "monthly"),
            PeriodGranularity::Daily => write!(f, "daily"),
        }
    }
}

impl std::str::FromStr for PeriodGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Ok(PeriodGranularity::Monthly),
            "daily" | "day" => Ok(PeriodGranularity::Daily),
            _ => Err(format!("Unknown period granularity: {}", s)),
        }
    }
}

// ============================================================================
// Period Identifier
// ============================================================================

/// Canonical identifier of an accounting period
///
/// `"2024-01"` for monthly periods, `"2024-01-31"` for daily ones. Ids of
/// the same granularity order chronologically as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(String);

impl PeriodId {
    /// Wrap an already-canonical identifier (e.g. one read back from storage)
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `self` is a later period of the same granularity than `other`
    ///
    /// Ids of different granularities are never ordered.
    pub fn is_after(&self, other: &PeriodId) -> bool {
        self.0.len() == other.0.len() && self.0 > other.0
    }
}

impl From<&str> for PeriodId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeriodId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeriodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the period containing `timestamp`, in UTC
pub fn resolve(timestamp: DateTime<Utc>, granularity: PeriodGranularity) -> PeriodId {
    PeriodId(timestamp.format(granularity.format_str()).to_string())
}

// ============================================================================
// Resolver
// ============================================================================

/// Period resolver bound to a granularity and a single fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodResolver {
    granularity: PeriodGranularity,
    offset: FixedOffset,
}

impl Default for PeriodResolver {
    fn default() -> Self {
        Self::utc(PeriodGranularity::Monthly)
    }
}

impl PeriodResolver {
    /// Resolver operating in UTC
    pub fn utc(granularity: PeriodGranularity) -> Self {
        Self {
            granularity,
            offset: utc_offset(),
        }
    }

    /// Resolver operating in a fixed offset from UTC
    ///
    /// Out-of-range offsets (beyond +/- 24h) fall back to UTC.
    pub fn with_offset_minutes(granularity: PeriodGranularity, offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes.saturating_mul(60)).unwrap_or_else(|| {
            log::warn!(
                "[credits:period] Ignoring out-of-range UTC offset {} minutes",
                offset_minutes
            );
            utc_offset()
        });
        Self { granularity, offset }
    }

    pub fn granularity(&self) -> PeriodGranularity {
        self.granularity
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Resolve the period containing `timestamp`
    pub fn resolve(&self, timestamp: DateTime<Utc>) -> PeriodId {
        let local = timestamp.with_timezone(&self.offset);
        PeriodId(local.format(self.granularity.format_str()).to_string())
    }

    /// True when `now` falls outside the period `last`
    pub fn has_rolled_over(&self, last: &PeriodId, now: DateTime<Utc>) -> bool {
        &self.resolve(now) != last
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "present time" for period resolution
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock, for tests and replay
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::RwLock::new(now),
        }
    }

    /// Move the clock to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.write() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
