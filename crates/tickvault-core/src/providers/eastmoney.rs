use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::fetch_body;
use crate::domain::date::compact_date;
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::provider::{
    Adjust, DailyRequest, FetchOptions, ProviderError, ProviderFuture, ProviderId, RawTable,
    SeriesProvider,
};
use crate::{Listing, Symbol};

const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const QUOTE_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";
const LIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";
const REFERER: &str = "https://quote.eastmoney.com/";
const LIST_FILTER: &str = "m:0 t:6,m:0 t:80,m:1 t:2,m:1 t:23,m:0 t:81 s:2048";

/// Column order of one `klines` entry for fields2 `f51..f61`.
const KLINE_COLUMNS: [&str; 11] = [
    "日期", "开盘", "收盘", "最高", "最低", "成交量", "成交额", "振幅", "涨跌幅", "涨跌额", "换手率",
];

/// Primary provider backed by the eastmoney quote API.
#[derive(Clone)]
pub struct EastmoneyProvider {
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl Default for EastmoneyProvider {
    fn default() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }
}

impl EastmoneyProvider {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            timeout_ms: 10_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn secid(symbol: &Symbol, options: FetchOptions) -> String {
        format!("{}.{}", options.market(symbol).eastmoney_id(), symbol)
    }

    fn request(&self, url: &str) -> HttpRequest {
        HttpRequest::get(url)
            .with_header("referer", REFERER)
            .with_timeout_ms(self.timeout_ms)
    }

    async fn fetch_daily(&self, request: &DailyRequest) -> Result<RawTable, ProviderError> {
        let secid = Self::secid(&request.symbol, request.options);
        let fqt = match request.options.adjust {
            Adjust::None => "0",
            Adjust::Forward => "1",
            Adjust::Backward => "2",
        };
        let beg = compact_date(request.start);
        let end = compact_date(request.end);

        let http_request = self.request(KLINE_URL).with_query(&[
            ("secid", secid.as_str()),
            ("fields1", "f1,f2,f3,f4,f5,f6"),
            ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"),
            ("klt", "101"),
            ("fqt", fqt),
            ("beg", beg.as_str()),
            ("end", end.as_str()),
        ]);

        let body = fetch_body(self.http_client.as_ref(), ProviderId::Eastmoney, http_request).await?;
        parse_klines(&body)
    }

    async fn fetch_profile(
        &self,
        symbol: &Symbol,
        options: FetchOptions,
    ) -> Result<Option<String>, ProviderError> {
        let secid = Self::secid(symbol, options);
        let http_request = self
            .request(QUOTE_URL)
            .with_query(&[("secid", secid.as_str()), ("fields", "f57,f58")]);

        let body = fetch_body(self.http_client.as_ref(), ProviderId::Eastmoney, http_request).await?;
        let response: QuoteResponse = serde_json::from_str(&body).map_err(|error| {
            ProviderError::invalid_response(format!("failed to parse eastmoney quote: {error}"))
        })?;

        Ok(response
            .data
            .and_then(|data| data.f58)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty() && name != "-"))
    }

    async fn fetch_listing(&self) -> Result<Vec<Listing>, ProviderError> {
        let http_request = self.request(LIST_URL).with_query(&[
            ("pn", "1"),
            ("pz", "10000"),
            ("po", "1"),
            ("np", "1"),
            ("fltt", "2"),
            ("invt", "2"),
            ("fid", "f12"),
            ("fs", LIST_FILTER),
            ("fields", "f12,f14"),
        ]);

        let body = fetch_body(self.http_client.as_ref(), ProviderId::Eastmoney, http_request).await?;
        let response: ListResponse = serde_json::from_str(&body).map_err(|error| {
            ProviderError::invalid_response(format!("failed to parse eastmoney listing: {error}"))
        })?;

        let items = response.data.map(|data| data.diff).unwrap_or_default();
        let listings = items
            .into_iter()
            .filter_map(|item| {
                let symbol = Symbol::parse(&item.f12).ok()?;
                Some(Listing {
                    symbol,
                    name: item.f14.trim().to_string(),
                })
            })
            .collect::<Vec<_>>();

        if listings.is_empty() {
            return Err(ProviderError::empty("eastmoney listing contained no symbols"));
        }
        Ok(listings)
    }
}

impl SeriesProvider for EastmoneyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Eastmoney
    }

    fn daily<'a>(&'a self, request: &'a DailyRequest) -> ProviderFuture<'a, RawTable> {
        Box::pin(self.fetch_daily(request))
    }

    fn profile<'a>(
        &'a self,
        symbol: &'a Symbol,
        options: FetchOptions,
    ) -> ProviderFuture<'a, Option<String>> {
        Box::pin(self.fetch_profile(symbol, options))
    }

    fn listing<'a>(&'a self) -> ProviderFuture<'a, Vec<Listing>> {
        Box::pin(self.fetch_listing())
    }
}

fn parse_klines(body: &str) -> Result<RawTable, ProviderError> {
    let response: KlineResponse = serde_json::from_str(body).map_err(|error| {
        ProviderError::invalid_response(format!("failed to parse eastmoney klines: {error}"))
    })?;

    let mut table = RawTable::new(&KLINE_COLUMNS);
    let Some(data) = response.data else {
        return Ok(table);
    };

    for line in data.klines {
        let cells = line
            .split(',')
            .map(|cell| Value::String(cell.trim().to_string()))
            .collect::<Vec<_>>();
        table.rows.push(cells);
    }
    Ok(table)
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    data: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    f58: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Option<ListData>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    diff: Vec<ListItem>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    f12: String,
    f14: String,
}
