//! Config commands
//!
//! Commands for managing per-scope credit settings.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use tally_core::services::credits::{CreditSettings, SettingsStore, SETTING_KEYS};

use super::Context;
use crate::output::{print_info, print_output, print_success};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show settings for the current scope
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List every scope with saved settings
    List,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

/// Scope summary row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ScopeRow {
    #[tabled(rename = "Scope")]
    pub scope: String,
    #[tabled(rename = "Allotment")]
    pub allotment: i64,
    #[tabled(rename = "Granularity")]
    pub granularity: String,
    #[tabled(rename = "Warning %")]
    pub warning_threshold: f64,
    #[tabled(rename = "Critical %")]
    pub critical_threshold: f64,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx).await,
        ConfigAction::Set { key, value } => set_config(ctx, key, value).await,
        ConfigAction::Get { key } => get_config(ctx, key).await,
        ConfigAction::List => list_config(ctx).await,
    }
}

async fn show_config(ctx: &Context) -> Result<()> {
    let rows = get_all_config(ctx).await?;
    print_output(&rows, ctx.format)?;
    Ok(())
}

async fn list_config(ctx: &Context) -> Result<()> {
    let store = SettingsStore::new(ctx.db.pool.clone());
    let rows: Vec<ScopeRow> = store
        .list()
        .await?
        .into_iter()
        .map(|(scope, settings)| ScopeRow {
            scope,
            allotment: settings.allotment,
            granularity: settings.granularity.to_string(),
            warning_threshold: settings.warning_threshold,
            critical_threshold: settings.critical_threshold,
        })
        .collect();
    print_output(&rows, ctx.format)?;
    Ok(())
}

async fn get_config(ctx: &Context, key: String) -> Result<()> {
    let rows = get_all_config(ctx).await?;

    match rows.iter().find(|r| r.key.eq_ignore_ascii_case(&key)) {
        Some(row) => {
            print_info(&format!("{} = {}", row.key, row.value), ctx.quiet);
            Ok(())
        }
        None => Err(anyhow::anyhow!(
            "Config key not found: {}. Available keys: {}",
            key,
            SETTING_KEYS.join(", ")
        )),
    }
}

async fn set_config(ctx: &Context, key: String, value: String) -> Result<()> {
    let store = SettingsStore::new(ctx.db.pool.clone());
    let settings = store.set(&ctx.scope, &key, &value).await?;

    let key = key.to_lowercase();
    let stored = settings_rows(&settings)
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .unwrap_or(value);
    print_success(&format!("Set {} = {} for {}", key, stored, ctx.scope), ctx.quiet);
    Ok(())
}

async fn get_all_config(ctx: &Context) -> Result<Vec<ConfigRow>> {
    let mut rows = Vec::new();

    // Database path
    let db_path = tally_core::db::get_db_path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());

    rows.push(ConfigRow {
        key: "TALLY_DB_PATH".to_string(),
        value: db_path,
        source: if std::env::var("TALLY_DB_PATH").is_ok() { "env" } else { "default" }.to_string(),
    });

    rows.push(ConfigRow {
        key: "scope".to_string(),
        value: ctx.scope.clone(),
        source: "cli".to_string(),
    });

    let store = SettingsStore::new(ctx.db.pool.clone());
    let source = if store.exists(&ctx.scope).await? { "db" } else { "default" };
    let settings = store.get(&ctx.scope).await?;

    for (key, value) in settings_rows(&settings) {
        rows.push(ConfigRow {
            key: key.to_string(),
            value,
            source: source.to_string(),
        });
    }

    Ok(rows)
}

fn settings_rows(settings: &CreditSettings) -> Vec<(&'static str, String)> {
    vec![
        ("allotment", settings.allotment.to_string()),
        ("warning_threshold", settings.warning_threshold.to_string()),
        ("critical_threshold", settings.critical_threshold.to_string()),
        ("granularity", settings.granularity.to_string()),
        ("utc_offset_minutes", settings.utc_offset_minutes.to_string()),
        ("cost_per_credit_usd", settings.cost_per_credit_usd.to_string()),
        ("persistence_timeout_ms", settings.persistence_timeout_ms.to_string()),
    ]
}
