use tickvault_core::{Adjust, FetchOptions, InstrumentKind, StockDataService};

use crate::cli::{AdjustArg, SeriesArgs};
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &SeriesArgs, service: &StockDataService) -> Result<CommandResult, CliError> {
    let options = FetchOptions {
        kind: if args.index {
            InstrumentKind::Index
        } else {
            InstrumentKind::Stock
        },
        adjust: match args.adjust {
            AdjustArg::None => Adjust::None,
            AdjustArg::Forward => Adjust::Forward,
            AdjustArg::Backward => Adjust::Backward,
        },
    };

    let response = service
        .get_series(&args.symbol, args.start, args.end, options)
        .await?;

    let mut result = CommandResult::ok(serde_json::to_value(&response)?);
    let report = &response.report;
    if report.calendar_degraded {
        result = result.with_warning("trading calendar unavailable; weekdays assumed");
    }
    if report.persist_failed {
        result = result.with_warning("fetched rows could not be persisted");
    }
    if let Some(error) = &report.upstream_error {
        result = result.with_warning(format!("served persisted rows only: {error}"));
    }
    Ok(result)
}
