//! # tally-core
//!
//! Core credit accounting for Tally - shared by the CLI and any embedding
//! service.
//!
//! This crate provides:
//! - Database operations (`db` module)
//! - The period-scoped credit ledger (`services::credits`)
//! - Unified error handling (`error` module)

pub mod db;
pub mod error;
pub mod services;

// Re-exports for convenience
pub use db::Database;
pub use error::{Error, Result};

// Re-export commonly used types from services
pub use services::credits::{
    open_ledger, ConsumptionRecord, ConsumptionSource, CreditLedger, CreditSettings, DailyUsage,
    LedgerError, LedgerState, LedgerStore, MemoryLedgerStore, PeriodGranularity, PeriodId,
    PeriodResolver, ProviderReading, SettingsStore, SqliteLedgerStore, UsageSnapshot, UsageTier,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
