use serde_json::json;
use tickvault_core::StockDataService;

use crate::cli::SymbolsArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &SymbolsArgs, service: &StockDataService) -> Result<CommandResult, CliError> {
    let listing = service.list_symbols(args.requirement).await?;

    let data = if args.count {
        json!({
            "count": listing.symbols.len(),
            "freshness": listing.freshness,
            "refreshed": listing.refreshed,
        })
    } else {
        serde_json::to_value(&listing)?
    };

    let mut result = CommandResult::ok(data);
    if listing.served_stale {
        result = result.with_warning("symbol listing is stale; refresh scheduled");
    }
    Ok(result)
}
