use serde_json::json;
use tickvault_core::{format_date, StockDataService};

use crate::cli::CalendarArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(args: &CalendarArgs, service: &StockDataService) -> Result<CommandResult, CliError> {
    let calendar = service.calendar();
    let (first, last) = calendar
        .bounds()
        .map(|(first, last)| (Some(format_date(first)), Some(format_date(last))))
        .unwrap_or_default();

    let mut data = json!({
        "degraded": calendar.is_degraded(),
        "session_count": calendar.session_count(),
        "first_session": first,
        "last_session": last,
    });

    if let (Some(start), Some(end)) = (args.start, args.end) {
        let sessions = calendar
            .trading_days_between(start, end)
            .into_iter()
            .map(format_date)
            .collect::<Vec<_>>();
        data["sessions"] = json!(sessions);
    }

    let mut result = CommandResult::ok(data);
    if calendar.is_degraded() {
        result = result.with_warning("trading calendar unavailable; weekdays assumed");
    }
    Ok(result)
}
