//! Services module

pub mod credits;

pub use credits::{open_ledger, CreditLedger, CreditSettings, SettingsStore, UsageSnapshot};
