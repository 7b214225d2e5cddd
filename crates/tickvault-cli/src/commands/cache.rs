use serde_json::json;
use tickvault_core::Warehouse;

use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

use super::CommandResult;

/// Blob cache maintenance runs against the warehouse directly; no upstream needed.
pub fn run(args: &CacheArgs, warehouse: &Warehouse) -> Result<CommandResult, CliError> {
    let cache = warehouse.blob_cache();
    match &args.command {
        CacheCommand::Stats => {
            let stats = cache.stats()?;
            Ok(CommandResult::ok(serde_json::to_value(stats)?))
        }
        CacheCommand::Invalidate(invalidate) => {
            let found = cache.invalidate(&invalidate.key)?;
            let result = CommandResult::ok(json!({ "key": invalidate.key, "invalidated": found }));
            if found {
                Ok(result)
            } else {
                Ok(result.with_warning(format!("no cache entry named '{}'", invalidate.key)))
            }
        }
        CacheCommand::Clear => {
            let removed = cache.clear()?;
            Ok(CommandResult::ok(json!({ "removed": removed })))
        }
    }
}
