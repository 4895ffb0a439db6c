//! Consumption source trait
//!
//! A consumption source is whatever observes the third-party provider: a
//! client that reports credits used by a call, or a poller that reads the
//! provider's running total. The ledger only needs one reading at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// One observation of credit consumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderReading {
    /// Credits newly consumed since the previous observation
    Delta {
        credits: u64,
        cursor: Option<String>,
    },
    /// Credits consumed so far in the current period
    RunningTotal {
        credits: u64,
        cursor: Option<String>,
    },
}

impl ProviderReading {
    pub fn cursor(&self) -> Option<&str> {
        match self {
            ProviderReading::Delta { cursor, .. } | ProviderReading::RunningTotal { cursor, .. } => {
                cursor.as_deref()
            }
        }
    }
}

/// Trait for credit consumption sources
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use tally_core::services::credits::{ConsumptionSource, LedgerError, ProviderReading};
///
/// struct SearchClient;
///
/// #[async_trait]
/// impl ConsumptionSource for SearchClient {
///     fn source_id(&self) -> &'static str {
///         "search"
///     }
///
///     async fn fetch_reading(&self) -> Result<ProviderReading, LedgerError> {
///         Ok(ProviderReading::Delta { credits: 10, cursor: Some("req-42".into()) })
///     }
/// }
/// ```
#[async_trait]
pub trait ConsumptionSource: Send + Sync {
    /// Unique identifier for this source, used in log lines
    fn source_id(&self) -> &'static str;

    /// Take one reading from the provider
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Source` when the provider cannot be reached or
    /// its answer cannot be interpreted.
    async fn fetch_reading(&self) -> Result<ProviderReading, LedgerError>;
}
