//! Rendering for `tally` commands
//!
//! Every command prints either a table or pretty JSON, picked by the global
//! `--format` flag. Status lines go through the helpers at the bottom so
//! `--quiet` silences them uniformly.

use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

/// How command results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Pretty-printed JSON for scripts
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("Unsupported output format '{}' (expected table or json)", other)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        })
    }
}

/// Render a list of rows
///
/// An empty list prints a placeholder line in table mode and `[]` in JSON.
pub fn print_output<T>(rows: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table if rows.is_empty() => println!("No items found."),
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Json => print_json(rows)?,
    }
    Ok(())
}

/// Render one row as a single-line table, or as a JSON object
pub fn print_single<T>(row: &T, format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => println!("{}", Table::new([row])),
        OutputFormat::Json => print_json(row)?,
    }
    Ok(())
}

/// Pretty JSON for any serializable value
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", colored::Colorize::green(message));
    }
}

pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

/// Written to stderr
pub fn print_warning(message: &str) {
    eprintln!("{}", colored::Colorize::yellow(message));
}
