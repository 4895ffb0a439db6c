//! Credit accounting module
//!
//! Tracks consumption of a periodically replenished credit allotment per
//! scope (tenant/client) and derives a usage snapshot for display.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ CreditLedger                                            │
//! │   - apply_consumption(delta, cursor)                    │
//! │   - reconcile_total(total, cursor)                      │
//! │   - current_snapshot(allotment)                         │
//! └─────────────────────────────────────────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌──────────────────┐          ┌──────────────────────────┐
//! │ PeriodResolver   │          │ trait LedgerStore        │
//! │  - resolve(ts)   │          │   - load / save (CAS)    │
//! └──────────────────┘          │   - records              │
//!                               └──────────────────────────┘
//!                                    │               │
//!                               ┌────────┐      ┌────────┐
//!                               │ Memory │      │ SQLite │
//!                               └────────┘      └────────┘
//! ```
//!
//! Rollover is lazy: every write compares the stored period with the one
//! resolved from the clock and resets the counter in the same save that
//! applies the delta. Reads treat a stale total as zero without writing.
//!
//! # Usage
//!
//! ```ignore
//! use tally_core::services::credits::open_ledger;
//!
//! let ledger = open_ledger(&db, "acme").await?;
//! ledger.apply_consumption(25, Some("search-1842")).await?;
//! let snapshot = ledger.current_snapshot(ledger.settings().allotment).await?;
//! println!("{} credits left ({:.1}%)", snapshot.remaining, snapshot.percentage_remaining);
//! ```

pub mod error;
pub mod ledger;
pub mod period;
pub mod settings;
pub mod snapshot;
pub mod source;
pub mod sqlite_store;
pub mod store;
pub mod types;

use std::sync::Arc;

pub use error::LedgerError;
pub use ledger::CreditLedger;
pub use period::{resolve, Clock, FixedClock, PeriodGranularity, PeriodId, PeriodResolver, SystemClock};
pub use settings::{apply_setting, SettingsStore, SETTING_KEYS};
pub use snapshot::{TierThresholds, UsageSnapshot, UsageTier};
pub use source::{ConsumptionSource, ProviderReading};
pub use sqlite_store::SqliteLedgerStore;
pub use store::{LedgerStore, MemoryLedgerStore, SaveOutcome};
pub use types::{group_by_day, ConsumptionRecord, CreditSettings, DailyUsage, LedgerState};

use crate::db::Database;

/// Open the ledger for `scope` on the database, with the scope's saved settings
pub async fn open_ledger(db: &Database, scope: &str) -> crate::Result<CreditLedger> {
    let settings = SettingsStore::new(db.pool.clone()).get(scope).await?;
    let store = Arc::new(
        SqliteLedgerStore::new(db.pool.clone()).with_write_timeout(settings.persistence_timeout()),
    );
    Ok(CreditLedger::new(scope, store, settings))
}
