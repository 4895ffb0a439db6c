//! Credit settings storage
//!
//! Per-scope allotment and display settings, kept in `credit_settings`.
//! Scopes without a row use [`CreditSettings::default`].

use sqlx::{FromRow, SqlitePool};

use super::period::PeriodGranularity;
use super::types::CreditSettings;
use crate::error::{Error, Result};

/// Keys accepted by [`apply_setting`]
pub const SETTING_KEYS: &[&str] = &[
    "allotment",
    "warning_threshold",
    "critical_threshold",
    "granularity",
    "utc_offset_minutes",
    "cost_per_credit_usd",
    "persistence_timeout_ms",
];

/// Row of the `credit_settings` table
#[derive(Debug, Clone, FromRow)]
struct StoredSettings {
    scope: String,
    allotment: i64,
    warning_threshold: f64,
    critical_threshold: f64,
    granularity: String,
    utc_offset_minutes: i64,
    cost_per_credit_usd: f64,
    persistence_timeout_ms: i64,
}

impl StoredSettings {
    fn to_settings(&self) -> CreditSettings {
        let defaults = CreditSettings::default();
        CreditSettings {
            allotment: self.allotment,
            warning_threshold: self.warning_threshold,
            critical_threshold: self.critical_threshold,
            granularity: self.granularity.parse().unwrap_or_else(|e| {
                log::warn!("[credits:settings] {} for scope {}, using default", e, self.scope);
                defaults.granularity
            }),
            utc_offset_minutes: i32::try_from(self.utc_offset_minutes)
                .unwrap_or(defaults.utc_offset_minutes),
            cost_per_credit_usd: self.cost_per_credit_usd,
            persistence_timeout_ms: u64::try_from(self.persistence_timeout_ms)
                .unwrap_or(defaults.persistence_timeout_ms),
        }
        .validate()
    }
}

/// Apply one `key = value` change to `settings`
pub fn apply_setting(settings: &CreditSettings, key: &str, value: &str) -> Result<CreditSettings> {
    let mut next = settings.clone();
    let value = value.trim();

    match key.to_lowercase().as_str() {
        "allotment" => next.allotment = parse(key, value)?,
        "warning_threshold" => next.warning_threshold = parse(key, value)?,
        "critical_threshold" => next.critical_threshold = parse(key, value)?,
        "granularity" => {
            next.granularity = value
                .parse::<PeriodGranularity>()
                .map_err(Error::validation)?
        }
        "utc_offset_minutes" => next.utc_offset_minutes = parse(key, value)?,
        "cost_per_credit_usd" => next.cost_per_credit_usd = parse(key, value)?,
        "persistence_timeout_ms" => next.persistence_timeout_ms = parse(key, value)?,
        _ => {
            return Err(Error::validation(format!(
                "Unknown setting: {}. Available keys: {}",
                key,
                SETTING_KEYS.join(", ")
            )))
        }
    }

    Ok(next.validate())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::validation(format!("Invalid value for {}: {}", key, value)))
}

/// Storage for per-scope credit settings
#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Settings for `scope`, defaults if none were saved
    pub async fn get(&self, scope: &str) -> Result<CreditSettings> {
        let row = sqlx::query_as::<_, StoredSettings>(
            r#"
            SELECT scope, allotment, warning_threshold, critical_threshold, granularity,
                   utc_offset_minutes, cost_per_credit_usd, persistence_timeout_ms
            FROM credit_settings
            WHERE scope = ?
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.to_settings()).unwrap_or_default())
    }

    /// Whether `scope` has saved settings
    pub async fn exists(&self, scope: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT scope FROM credit_settings WHERE scope = ?")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Save settings for `scope`, replacing any previous row
    pub async fn save(&self, scope: &str, settings: &CreditSettings) -> Result<()> {
        let settings = settings.validate();
        let timeout_ms = i64::try_from(settings.persistence_timeout_ms)
            .map_err(|_| Error::validation("persistence_timeout_ms is too large"))?;

        sqlx::query(
            r#"
            INSERT INTO credit_settings
            (scope, allotment, warning_threshold, critical_threshold, granularity,
             utc_offset_minutes, cost_per_credit_usd, persistence_timeout_ms, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scope) DO UPDATE SET
                allotment = excluded.allotment,
                warning_threshold = excluded.warning_threshold,
                critical_threshold = excluded.critical_threshold,
                granularity = excluded.granularity,
                utc_offset_minutes = excluded.utc_offset_minutes,
                cost_per_credit_usd = excluded.cost_per_credit_usd,
                persistence_timeout_ms = excluded.persistence_timeout_ms,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope)
        .bind(settings.allotment)
        .bind(settings.warning_threshold)
        .bind(settings.critical_threshold)
        .bind(settings.granularity.to_string())
        .bind(settings.utc_offset_minutes)
        .bind(settings.cost_per_credit_usd)
        .bind(timeout_ms)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        log::info!("[credits:settings] Saved settings for scope {}", scope);
        Ok(())
    }

    /// Change a single setting for `scope` and return the result
    pub async fn set(&self, scope: &str, key: &str, value: &str) -> Result<CreditSettings> {
        let current = self.get(scope).await?;
        let next = apply_setting(&current, key, value)?;
        self.save(scope, &next).await?;
        Ok(next)
    }

    /// Every scope with saved settings, sorted by scope
    pub async fn list(&self) -> Result<Vec<(String, CreditSettings)>> {
        let rows = sqlx::query_as::<_, StoredSettings>(
            r#"
            SELECT scope, allotment, warning_threshold, critical_threshold, granularity,
                   utc_offset_minutes, cost_per_credit_usd, persistence_timeout_ms
            FROM credit_settings
            ORDER BY scope ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| (r.scope.clone(), r.to_settings())).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    async fn create_test_store() -> (SettingsStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open(temp_dir.path().join("test.db"))
            .await
            .expect("Failed to create test database");
        (SettingsStore::new(db.pool), temp_dir)
    }

    #[test]
    fn test_apply_setting() {
        let settings = CreditSettings::default();

        let next = apply_setting(&settings, "allotment", "10000").unwrap();
        assert_eq!(next.allotment, 10_000);

        let next = apply_setting(&next, "GRANULARITY", "daily").unwrap();
        assert_eq!(next.granularity, PeriodGranularity::Daily);

        assert!(apply_setting(&settings, "allotment", "lots").is_err());
        assert!(apply_setting(&settings, "colour", "blue").is_err());
    }

    #[tokio::test]
    async fn test_missing_scope_uses_defaults() {
        let (store, _temp_dir) = create_test_store().await;
        assert_eq!(store.get("acme").await.unwrap(), CreditSettings::default());
        assert!(!store.exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_and_list() {
        let (store, _temp_dir) = create_test_store().await;

        store.set("acme", "allotment", "10000").await.unwrap();
        store.set("acme", "warning_threshold", "40").await.unwrap();
        store.set("beta", "granularity", "daily").await.unwrap();

        let acme = store.get("acme").await.unwrap();
        assert_eq!(acme.allotment, 10_000);
        assert_eq!(acme.warning_threshold, 40.0);
        assert_eq!(acme.critical_threshold, 20.0);

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "acme");
        assert_eq!(all[1].1.granularity, PeriodGranularity::Daily);
    }
}
