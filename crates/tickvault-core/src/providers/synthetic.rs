use serde_json::{json, Value};
use time::{Date, Weekday};

use crate::domain::format_date;
use crate::provider::{
    DailyRequest, FetchOptions, ProviderError, ProviderFuture, ProviderId, RawTable,
    SeriesProvider,
};
use crate::{Listing, Symbol};

const COLUMNS: [&str; 7] = ["date", "open", "high", "low", "close", "volume", "amount"];
const CATALOG: [(&str, &str); 5] = [
    ("000001", "Synthetic Bank"),
    ("000002", "Synthetic Property"),
    ("300750", "Synthetic Battery"),
    ("600000", "Synthetic Pudong"),
    ("600519", "Synthetic Spirits"),
];

/// Deterministic offline series: one row per weekday, values seeded by the
/// symbol and date so overlapping requests agree.
#[derive(Debug, Default, Clone)]
pub struct SyntheticProvider;

impl SyntheticProvider {
    fn table(request: &DailyRequest) -> RawTable {
        let mut table = RawTable::new(&COLUMNS);
        let seed = symbol_seed(&request.symbol);

        let mut current = Some(request.start);
        while let Some(date) = current.filter(|date| *date <= request.end) {
            if !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday) {
                table.rows.push(synthetic_row(seed, date));
            }
            current = date.next_day();
        }
        table
    }
}

impl SeriesProvider for SyntheticProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Synthetic
    }

    fn daily<'a>(&'a self, request: &'a DailyRequest) -> ProviderFuture<'a, RawTable> {
        Box::pin(async move { Ok(Self::table(request)) })
    }

    fn profile<'a>(
        &'a self,
        symbol: &'a Symbol,
        _options: FetchOptions,
    ) -> ProviderFuture<'a, Option<String>> {
        let name = CATALOG
            .iter()
            .find(|(code, _)| *code == symbol.as_str())
            .map_or_else(|| format!("Synthetic {symbol}"), |(_, name)| (*name).to_string());
        Box::pin(async move { Ok(Some(name)) })
    }

    fn listing<'a>(&'a self) -> ProviderFuture<'a, Vec<Listing>> {
        Box::pin(async {
            CATALOG
                .iter()
                .map(|(code, name)| {
                    Ok(Listing {
                        symbol: Symbol::parse(code)
                            .map_err(|error| ProviderError::invalid_response(error.to_string()))?,
                        name: (*name).to_string(),
                    })
                })
                .collect::<Result<Vec<_>, ProviderError>>()
        })
    }
}

fn synthetic_row(seed: u64, date: Date) -> Vec<Value> {
    let day = u64::try_from(date.to_julian_day()).unwrap_or_default();
    let mix = seed ^ day.wrapping_mul(2_654_435_761);

    let base = 5.0 + (seed % 4_000) as f64 / 100.0;
    let close = base * (0.9 + (mix % 1_000) as f64 / 5_000.0);
    let open = close * (0.98 + ((mix >> 10) % 400) as f64 / 10_000.0);
    let high = open.max(close) * 1.01;
    let low = open.min(close) * 0.99;
    let volume = 100_000 + (mix >> 20) % 900_000;

    vec![
        json!(format_date(date)),
        json!(round2(open)),
        json!(round2(high)),
        json!(round2(low)),
        json!(round2(close)),
        json!(volume),
        json!(round2(close * volume as f64)),
    ]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn symbol_seed(symbol: &Symbol) -> u64 {
    symbol.as_str().bytes().fold(0_u64, |acc, byte| {
        acc.wrapping_mul(33).wrapping_add(u64::from(byte))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn request(start: Date, end: Date) -> DailyRequest {
        DailyRequest {
            symbol: Symbol::parse("000001").expect("symbol"),
            start,
            end,
            options: FetchOptions::default(),
        }
    }

    #[tokio::test]
    async fn emits_one_row_per_weekday() {
        let table = SyntheticProvider
            .daily(&request(date!(2023 - 01 - 02), date!(2023 - 01 - 08)))
            .await
            .expect("daily");
        assert_eq!(table.len(), 5);
    }

    #[tokio::test]
    async fn overlapping_requests_agree() {
        let wide = SyntheticProvider
            .daily(&request(date!(2023 - 01 - 02), date!(2023 - 01 - 31)))
            .await
            .expect("wide");
        let narrow = SyntheticProvider
            .daily(&request(date!(2023 - 01 - 10), date!(2023 - 01 - 10)))
            .await
            .expect("narrow");

        let matching = wide
            .rows
            .iter()
            .find(|row| row[0] == json!("2023-01-10"))
            .expect("row in wide request");
        assert_eq!(matching, &narrow.rows[0]);
    }

    #[tokio::test]
    async fn listing_is_parseable() {
        let listing = SyntheticProvider.listing().await.expect("listing");
        assert_eq!(listing.len(), CATALOG.len());
    }
}
