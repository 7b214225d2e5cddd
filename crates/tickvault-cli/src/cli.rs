//! CLI argument definitions for tickvault.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `series` | Daily bars for a symbol, filling gaps from upstream |
//! | `coverage` | Persisted extent of a symbol |
//! | `calendar` | Trading calendar status and sessions |
//! | `symbols` | Exchange-wide symbol listing |
//! | `cache` | Blob cache maintenance |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--home` | `$TICKVAULT_HOME` or `~/.tickvault` | Data directory |
//! | `--mock` | `false` | Serve synthetic data, never touch the network |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--timeout-ms` | `30000` | Overall upstream budget per fetch |
//!
//! # Examples
//!
//! ```bash
//! tickvault series 000001 --start 2023-01-01 --end 2023-01-31 --pretty
//! tickvault series 000001 --start 20230101 --end 20230131 --index
//! tickvault cache invalidate symbols:all
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tickvault_core::{parse_date, FreshnessRequirement};
use time::Date;

/// Incremental cache for daily A-share market data.
#[derive(Debug, Parser)]
#[command(name = "tickvault", author, version, about)]
pub struct Cli {
    /// Data directory holding the warehouse and calendar snapshot.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Use the deterministic synthetic provider instead of the network.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Overall upstream time budget per fetch, in milliseconds.
    #[arg(long, global = true, default_value_t = 30_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Daily bars for one symbol over an inclusive date range.
    ///
    /// Rows already in the warehouse are served locally; only the missing
    /// span is fetched.
    ///
    ///   tickvault series 600519 --start 2023-01-01 --end 2023-03-31
    Series(SeriesArgs),

    /// Persisted date range and row count for one symbol.
    Coverage(CoverageArgs),

    /// Trading calendar status, optionally listing sessions in a range.
    Calendar(CalendarArgs),

    /// Exchange-wide symbol listing, cached and freshness-gated.
    Symbols(SymbolsArgs),

    /// Blob cache maintenance.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
pub struct SeriesArgs {
    /// Stock or index code (`000001`, `sz000001`, `000001.SZ`).
    pub symbol: String,

    /// First date, `YYYY-MM-DD` or `YYYYMMDD`.
    #[arg(long, value_parser = date_arg)]
    pub start: Date,

    /// Last date, inclusive.
    #[arg(long, value_parser = date_arg)]
    pub end: Date,

    /// Treat the code as an index rather than a stock.
    #[arg(long, default_value_t = false)]
    pub index: bool,

    /// Price adjustment.
    #[arg(long, value_enum, default_value_t = AdjustArg::None)]
    pub adjust: AdjustArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AdjustArg {
    None,
    /// Forward adjusted (qfq).
    Forward,
    /// Backward adjusted (hfq).
    Backward,
}

#[derive(Debug, Args)]
pub struct CoverageArgs {
    pub symbol: String,
}

#[derive(Debug, Args)]
pub struct CalendarArgs {
    /// List sessions from this date.
    #[arg(long, value_parser = date_arg, requires = "end")]
    pub start: Option<Date>,

    /// List sessions up to this date.
    #[arg(long, value_parser = date_arg, requires = "start")]
    pub end: Option<Date>,
}

#[derive(Debug, Args)]
pub struct SymbolsArgs {
    /// How fresh the cached listing must be: strict, normal or relaxed.
    #[arg(long, value_parser = requirement_arg, default_value = "normal")]
    pub requirement: FreshnessRequirement,

    /// Only print the number of symbols.
    #[arg(long, default_value_t = false)]
    pub count: bool,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Entry counts, hit rate and hot keys.
    Stats,

    /// Mark one key invalid and expired.
    Invalidate(InvalidateArgs),

    /// Drop every blob cache entry. Persisted bars are kept.
    Clear,
}

#[derive(Debug, Args)]
pub struct InvalidateArgs {
    pub key: String,
}

fn date_arg(value: &str) -> Result<Date, String> {
    parse_date(value).map_err(|error| error.to_string())
}

fn requirement_arg(value: &str) -> Result<FreshnessRequirement, String> {
    value.parse().map_err(|error: tickvault_core::ValidationError| error.to_string())
}
