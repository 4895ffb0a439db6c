//! Credits commands
//!
//! Commands for recording consumption and reading the credit balance.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use tally_core::services::credits::{
    open_ledger, ConsumptionRecord, DailyUsage, PeriodId, UsageSnapshot, UsageTier,
};

use super::Context;
use crate::output::{print_info, print_json, print_output, print_single, print_warning, OutputFormat};

#[derive(Subcommand)]
pub enum CreditsAction {
    /// Record newly consumed credits
    Consume {
        /// Credits consumed since the last report
        #[arg(allow_negative_numbers = true)]
        delta: i64,

        /// Provider event id; a repeat of the last one is ignored
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Show the balance for the current period
    Status {
        /// Override the configured allotment for this read
        #[arg(long)]
        allotment: Option<i64>,
    },

    /// Reconcile against a running total reported by the provider
    SyncTotal {
        /// Provider's total for the current period
        total: u64,

        /// Provider event id
        #[arg(long)]
        cursor: Option<String>,
    },

    /// List applied consumption
    History {
        /// Period id (e.g. 2024-03); defaults to all periods
        #[arg(long)]
        period: Option<String>,
    },

    /// Show consumption grouped by day
    Daily {
        /// Period id (e.g. 2024-03); defaults to all periods
        #[arg(long)]
        period: Option<String>,
    },
}

/// Balance row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct StatusRow {
    #[tabled(rename = "Scope")]
    pub scope: String,
    #[tabled(rename = "Period")]
    pub period: String,
    #[tabled(rename = "Consumed")]
    pub consumed: u64,
    #[tabled(rename = "Allotment")]
    pub allotment: i64,
    #[tabled(rename = "Remaining")]
    pub remaining: u64,
    #[tabled(rename = "Remaining %")]
    pub percentage_remaining: String,
    #[tabled(rename = "Tier")]
    pub tier: String,
    #[tabled(rename = "Est. Cost")]
    pub estimated_cost: String,
}

impl From<&UsageSnapshot> for StatusRow {
    fn from(snapshot: &UsageSnapshot) -> Self {
        Self {
            scope: snapshot.scope.clone(),
            period: snapshot.period.to_string(),
            consumed: snapshot.consumed_total,
            allotment: snapshot.allotment,
            remaining: snapshot.remaining,
            percentage_remaining: format!("{:.1}%", snapshot.percentage_remaining),
            tier: colorize_tier(snapshot.tier),
            estimated_cost: format!("${:.2}", snapshot.estimated_cost_usd),
        }
    }
}

/// History row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct HistoryRow {
    #[tabled(rename = "Applied At")]
    pub applied_at: String,
    #[tabled(rename = "Period")]
    pub period: String,
    #[tabled(rename = "Delta")]
    pub delta: u64,
    #[tabled(rename = "Total After")]
    pub total_after: u64,
    #[tabled(rename = "Cursor")]
    pub cursor: String,
}

impl From<&ConsumptionRecord> for HistoryRow {
    fn from(record: &ConsumptionRecord) -> Self {
        Self {
            applied_at: record.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            period: record.period.to_string(),
            delta: record.delta,
            total_after: record.consumed_total_after,
            cursor: record.event_cursor.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Daily usage row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct DailyRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Credits")]
    pub credits: u64,
    #[tabled(rename = "Events")]
    pub events: u64,
}

impl From<&DailyUsage> for DailyRow {
    fn from(day: &DailyUsage) -> Self {
        Self {
            date: day.date.clone(),
            credits: day.credits,
            events: day.events,
        }
    }
}

pub async fn execute(ctx: &Context, action: CreditsAction) -> Result<()> {
    match action {
        CreditsAction::Consume { delta, cursor } => consume(ctx, delta, cursor).await,
        CreditsAction::Status { allotment } => status(ctx, allotment).await,
        CreditsAction::SyncTotal { total, cursor } => sync_total(ctx, total, cursor).await,
        CreditsAction::History { period } => history(ctx, period).await,
        CreditsAction::Daily { period } => daily(ctx, period).await,
    }
}

async fn consume(ctx: &Context, delta: i64, cursor: Option<String>) -> Result<()> {
    let ledger = open_ledger(&ctx.db, &ctx.scope).await?;
    let before = ledger.current_snapshot(ledger.settings().allotment).await?;
    let snapshot = ledger.apply_consumption(delta, cursor.as_deref()).await?;

    if ctx.format == OutputFormat::Table {
        if snapshot.period == before.period && snapshot.consumed_total == before.consumed_total {
            print_info("No change recorded (zero delta or repeated cursor)", ctx.quiet);
        } else {
            print_info(&format!("Recorded {} credits for {}", delta, ctx.scope), ctx.quiet);
        }
    }
    show_snapshot(ctx, &snapshot)
}

async fn status(ctx: &Context, allotment: Option<i64>) -> Result<()> {
    let ledger = open_ledger(&ctx.db, &ctx.scope).await?;
    let allotment = allotment.unwrap_or(ledger.settings().allotment);
    let snapshot = ledger.current_snapshot(allotment).await?;
    show_snapshot(ctx, &snapshot)
}

async fn sync_total(ctx: &Context, total: u64, cursor: Option<String>) -> Result<()> {
    let ledger = open_ledger(&ctx.db, &ctx.scope).await?;
    let snapshot = ledger.reconcile_total(total, cursor.as_deref()).await?;

    if ctx.format == OutputFormat::Table && total < snapshot.consumed_total {
        print_info(
            &format!(
                "Reported total {} is behind the ledger ({}), nothing applied",
                total, snapshot.consumed_total
            ),
            ctx.quiet,
        );
    }
    show_snapshot(ctx, &snapshot)
}

async fn history(ctx: &Context, period: Option<String>) -> Result<()> {
    let ledger = open_ledger(&ctx.db, &ctx.scope).await?;
    let period = period.map(PeriodId::new);
    let records = ledger.history(period.as_ref()).await?;

    match ctx.format {
        OutputFormat::Json => print_json(&records),
        OutputFormat::Table => {
            let rows: Vec<HistoryRow> = records.iter().map(HistoryRow::from).collect();
            print_output(&rows, ctx.format)
        }
    }
}

async fn daily(ctx: &Context, period: Option<String>) -> Result<()> {
    let ledger = open_ledger(&ctx.db, &ctx.scope).await?;
    let period = period.map(PeriodId::new);
    let days = ledger.daily_usage(period.as_ref()).await?;

    let rows: Vec<DailyRow> = days.iter().map(DailyRow::from).collect();
    print_output(&rows, ctx.format)
}

fn show_snapshot(ctx: &Context, snapshot: &UsageSnapshot) -> Result<()> {
    match ctx.format {
        OutputFormat::Json => print_json(snapshot)?,
        OutputFormat::Table => print_single(&StatusRow::from(snapshot), ctx.format)?,
    }

    if snapshot.is_exhausted() && snapshot.allotment > 0 && !ctx.quiet {
        print_warning(&format!("Allotment exhausted for {}", snapshot.scope));
    }
    Ok(())
}

fn colorize_tier(tier: UsageTier) -> String {
    let label = tier.to_string();
    match tier {
        UsageTier::Healthy => label.green().to_string(),
        UsageTier::Warning => label.yellow().to_string(),
        UsageTier::Critical => label.red().bold().to_string(),
    }
}
