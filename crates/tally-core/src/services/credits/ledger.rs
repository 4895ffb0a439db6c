//! Credit ledger
//!
//! Owns the per-scope accumulator: applies consumption deltas exactly once,
//! rolls the counter over lazily when a later period begins, and answers reads
//! with a snapshot computed from the latest committed state.
//!
//! Writes are serialized twice over: an async mutex orders callers sharing
//! this ledger, and the store's revision check rejects any save based on a
//! state another writer has since replaced. A rejected save reloads and tries
//! again, so concurrent deltas are summed, never overwritten.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::error::LedgerError;
use super::period::{Clock, PeriodId, PeriodResolver, SystemClock};
use super::snapshot::UsageSnapshot;
use super::source::{ConsumptionSource, ProviderReading};
use super::store::{LedgerStore, SaveOutcome};
use super::types::{group_by_day, ConsumptionRecord, CreditSettings, DailyUsage, LedgerState};

/// Credit ledger for one scope
pub struct CreditLedger {
    scope: String,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    settings: CreditSettings,
    resolver: PeriodResolver,
    write_lock: Mutex<()>,
}

impl CreditLedger {
    /// Create a ledger for `scope` on top of `store`, using the wall clock
    pub fn new(scope: impl Into<String>, store: Arc<dyn LedgerStore>, settings: CreditSettings) -> Self {
        let settings = settings.validate();
        Self {
            scope: scope.into(),
            store,
            clock: Arc::new(SystemClock),
            resolver: settings.resolver(),
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn settings(&self) -> &CreditSettings {
        &self.settings
    }

    /// Period the ledger would attribute a delta to right now
    pub fn current_period(&self) -> PeriodId {
        self.resolver.resolve(self.clock.now())
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Record `delta` newly consumed credits
    ///
    /// A zero delta, or an `event_cursor` equal to the last one applied, is a
    /// no-op that returns the current snapshot. On success the stored total
    /// reflects the delta exactly once.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `delta` is negative; nothing is touched.
    /// - `Persistence` / `Timeout` if storage fails; the delta was not
    ///   recorded and the call may be retried with the same cursor.
    pub async fn apply_consumption(
        &self,
        delta: i64,
        event_cursor: Option<&str>,
    ) -> Result<UsageSnapshot, LedgerError> {
        if delta < 0 {
            log::warn!(
                "[credits:ledger] Rejecting negative delta {} for scope {}",
                delta,
                self.scope
            );
            return Err(LedgerError::invalid_input(format!(
                "delta must be non-negative, got {}",
                delta
            )));
        }
        if delta == 0 {
            return self.current_snapshot(self.settings.allotment).await;
        }

        let delta = delta as u64;
        self.commit(event_cursor, |_| delta).await
    }

    /// Bring the ledger up to a running total reported by the provider
    ///
    /// Applies `reported_total - consumed_total` when the provider is ahead.
    /// A report at or below the stored total changes nothing.
    pub async fn reconcile_total(
        &self,
        reported_total: u64,
        event_cursor: Option<&str>,
    ) -> Result<UsageSnapshot, LedgerError> {
        self.commit(event_cursor, |state| {
            reported_total.saturating_sub(state.consumed_total)
        })
        .await
    }

    /// Pull one reading from `source` and apply it
    pub async fn sync_from(&self, source: &dyn ConsumptionSource) -> Result<UsageSnapshot, LedgerError> {
        let reading = self.bounded(source.fetch_reading()).await?;
        log::debug!(
            "[credits:ledger] Reading from {} for scope {}: {:?}",
            source.source_id(),
            self.scope,
            reading
        );

        let cursor = reading.cursor();
        match &reading {
            ProviderReading::Delta { credits, .. } => {
                let delta = i64::try_from(*credits).map_err(|_| {
                    LedgerError::invalid_input(format!("delta {} out of range", credits))
                })?;
                self.apply_consumption(delta, cursor).await
            }
            ProviderReading::RunningTotal { credits, .. } => {
                self.reconcile_total(*credits, cursor).await
            }
        }
    }

    /// Load, roll over if stale, add the computed delta and save
    ///
    /// `delta_for` sees the state after any rollover.
    async fn commit<F>(&self, event_cursor: Option<&str>, delta_for: F) -> Result<UsageSnapshot, LedgerError>
    where
        F: Fn(&LedgerState) -> u64,
    {
        let limit = self.settings.persistence_timeout();
        let _guard = tokio::time::timeout(limit, self.write_lock.lock())
            .await
            .map_err(|_| LedgerError::Timeout(limit))?;

        // Conflict retries share one deadline
        let deadline = tokio::time::Instant::now() + limit;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let now = self.clock.now();
            let period = self.resolver.resolve(now);

            let loaded = self.bounded(self.store.load(&self.scope)).await?;
            let expected_version = loaded.as_ref().map_or(0, |s| s.version);

            let mut state = match loaded {
                Some(state) if state.period == period => state,
                Some(state) if state.period.is_after(&period) => {
                    log::warn!(
                        "[credits:ledger] Clock for scope {} resolves to {}, behind stored period {}; applying to {}",
                        self.scope,
                        period,
                        state.period,
                        state.period
                    );
                    state
                }
                Some(state) => {
                    log::info!(
                        "[credits:ledger] Rolling over scope {} from {} to {} ({} credits closed out)",
                        self.scope,
                        state.period,
                        period,
                        state.consumed_total
                    );
                    state.rolled_over(period, now)
                }
                None => {
                    log::debug!("[credits:ledger] Initializing ledger for scope {}", self.scope);
                    LedgerState::fresh(period, now)
                }
            };

            if state.is_duplicate(event_cursor) {
                log::debug!(
                    "[credits:ledger] Ignoring duplicate event {:?} for scope {}",
                    event_cursor,
                    self.scope
                );
                return Ok(self.snapshot_of(&state, self.settings.allotment));
            }

            let delta = delta_for(&state);
            if delta == 0 {
                return Ok(self.snapshot_of(&state, self.settings.allotment));
            }

            state.consumed_total = state.consumed_total.checked_add(delta).ok_or_else(|| {
                LedgerError::invalid_input(format!(
                    "delta {} overflows consumed total {}",
                    delta, state.consumed_total
                ))
            })?;
            if let Some(cursor) = event_cursor {
                state.last_event_cursor = Some(cursor.to_string());
            }
            state.version = expected_version + 1;
            state.updated_at = now;

            let record = ConsumptionRecord::new(&self.scope, &state, delta, event_cursor);

            // Stores bound their own saves
            match self
                .store
                .save(&self.scope, expected_version, &state, &record)
                .await?
            {
                SaveOutcome::Saved => {
                    log::debug!(
                        "[credits:ledger] Applied {} credits to scope {} ({} total in {}, {} store)",
                        delta,
                        self.scope,
                        state.consumed_total,
                        state.period,
                        self.store.backend()
                    );
                    return Ok(self.snapshot_of(&state, self.settings.allotment));
                }
                SaveOutcome::Conflict => {
                    if tokio::time::Instant::now() >= deadline {
                        log::warn!(
                            "[credits:ledger] Giving up on scope {} after {} conflicting writes",
                            self.scope,
                            attempt
                        );
                        return Err(LedgerError::Timeout(limit));
                    }
                    log::debug!(
                        "[credits:ledger] Revision conflict for scope {} (attempt {}), reloading",
                        self.scope,
                        attempt
                    );
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Usage snapshot against `allotment`
    ///
    /// A stored total from an earlier period reads as zero; nothing is
    /// written.
    pub async fn current_snapshot(&self, allotment: i64) -> Result<UsageSnapshot, LedgerError> {
        let now = self.clock.now();
        let period = self.resolver.resolve(now);
        let loaded = self.bounded(self.store.load(&self.scope)).await?;

        let (period, consumed_total) = match loaded {
            Some(state) if state.period == period || state.period.is_after(&period) => {
                (state.period, state.consumed_total)
            }
            _ => (period, 0),
        };

        Ok(UsageSnapshot::new(
            self.scope.clone(),
            period,
            consumed_total,
            allotment,
            &self.settings.thresholds(),
        )
        .with_cost_per_credit(self.settings.cost_per_credit_usd))
    }

    /// Applied consumption records, oldest first
    pub async fn history(&self, period: Option<&PeriodId>) -> Result<Vec<ConsumptionRecord>, LedgerError> {
        self.bounded(self.store.records(&self.scope, period)).await
    }

    /// Consumption grouped by UTC day
    pub async fn daily_usage(&self, period: Option<&PeriodId>) -> Result<Vec<DailyUsage>, LedgerError> {
        let records = self.history(period).await?;
        Ok(group_by_day(&records))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn snapshot_of(&self, state: &LedgerState, allotment: i64) -> UsageSnapshot {
        UsageSnapshot::new(
            self.scope.clone(),
            state.period.clone(),
            state.consumed_total,
            allotment,
            &self.settings.thresholds(),
        )
        .with_cost_per_credit(self.settings.cost_per_credit_usd)
    }

    async fn bounded<T, Fut>(&self, fut: Fut) -> Result<T, LedgerError>
    where
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        with_timeout(self.settings.persistence_timeout(), fut).await
    }
}

async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, LedgerError>
where
    Fut: Future<Output = Result<T, LedgerError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("[credits:ledger] Storage call exceeded {}ms", limit.as_millis());
            Err(LedgerError::Timeout(limit))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
