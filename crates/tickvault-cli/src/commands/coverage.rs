use tickvault_core::StockDataService;

use crate::cli::CoverageArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(
    args: &CoverageArgs,
    service: &StockDataService,
) -> Result<CommandResult, CliError> {
    let summary = service.coverage(&args.symbol).await?;
    let mut result = CommandResult::ok(serde_json::to_value(&summary)?);
    if summary.range.is_none() {
        result = result.with_warning(format!("no persisted rows for {}", summary.symbol));
    }
    Ok(result)
}
