use std::sync::Arc;

use serde_json::Value;

use super::fetch_body;
use crate::domain::format_date;
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::provider::{
    Adjust, DailyRequest, ProviderError, ProviderFuture, ProviderId, RawTable, SeriesProvider,
};

const KLINE_URL: &str = "https://web.ifzq.gtimg.cn/appstock/app/fqkline/get";
const MAX_ROWS: i64 = 2_000;
const COLUMNS: [&str; 6] = ["date", "open", "close", "high", "low", "volume"];

/// Fallback provider backed by the Tencent kline API.
///
/// Symbols carry a market prefix (`sz000001`); rows have no derived fields.
#[derive(Clone)]
pub struct TencentProvider {
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl Default for TencentProvider {
    fn default() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }
}

impl TencentProvider {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            timeout_ms: 10_000,
        }
    }

    async fn fetch_daily(&self, request: &DailyRequest) -> Result<RawTable, ProviderError> {
        let code = format!(
            "{}{}",
            request.options.market(&request.symbol).prefix(),
            request.symbol
        );
        let adjust = match request.options.adjust {
            Adjust::None => "",
            Adjust::Forward => "qfq",
            Adjust::Backward => "hfq",
        };
        let span_days = (request.end - request.start).whole_days() + 1;
        let count = span_days.clamp(1, MAX_ROWS);
        let param = format!(
            "{code},day,{},{},{count},{adjust}",
            format_date(request.start),
            format_date(request.end)
        );

        let http_request = HttpRequest::get(KLINE_URL)
            .with_query(&[("param", param.as_str())])
            .with_timeout_ms(self.timeout_ms);
        let body = fetch_body(self.http_client.as_ref(), ProviderId::Tencent, http_request).await?;

        parse_kline_body(&body, &code, adjust)
    }
}

impl SeriesProvider for TencentProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Tencent
    }

    fn daily<'a>(&'a self, request: &'a DailyRequest) -> ProviderFuture<'a, RawTable> {
        Box::pin(self.fetch_daily(request))
    }
}

fn parse_kline_body(body: &str, code: &str, adjust: &str) -> Result<RawTable, ProviderError> {
    let payload: Value = serde_json::from_str(body).map_err(|error| {
        ProviderError::invalid_response(format!("failed to parse tencent kline: {error}"))
    })?;

    let status = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
    if status != 0 {
        let message = payload.get("msg").and_then(Value::as_str).unwrap_or("unknown");
        return Err(ProviderError::invalid_response(format!(
            "tencent returned code {status}: {message}"
        )));
    }

    let mut table = RawTable::new(&COLUMNS);
    let Some(series) = payload.get("data").and_then(|data| data.get(code)) else {
        return Ok(table);
    };

    // Indices only publish the unadjusted `day` series.
    let adjusted_key = format!("{adjust}day");
    let rows = series
        .get(adjusted_key.as_str())
        .or_else(|| series.get("day"))
        .and_then(Value::as_array);

    for row in rows.into_iter().flatten() {
        let Some(cells) = row.as_array() else {
            continue;
        };
        table
            .rows
            .push(cells.iter().take(COLUMNS.len()).cloned().collect());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpResponse};
    use crate::provider::FetchOptions;
    use crate::Symbol;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use time::macros::date;

    #[derive(Default)]
    struct StaticHttpClient {
        body: String,
        urls: Mutex<Vec<String>>,
    }

    impl HttpClient for StaticHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.urls
                .lock()
                .expect("url store should not be poisoned")
                .push(request.url);
            let response = HttpResponse::ok_json(self.body.clone());
            Box::pin(async move { Ok(response) })
        }
    }

    fn request(options: FetchOptions) -> DailyRequest {
        DailyRequest {
            symbol: Symbol::parse("000001").expect("symbol"),
            start: date!(2023 - 01 - 03),
            end: date!(2023 - 01 - 10),
            options,
        }
    }

    #[tokio::test]
    async fn reads_adjusted_series_and_drops_trailing_cells() {
        let client = Arc::new(StaticHttpClient {
            body: String::from(
                r#"{"code":0,"msg":"","data":{"sz000001":{"qfqday":[
                    ["2023-01-03","13.20","13.77","13.85","13.05","2194128.00"],
                    ["2023-01-04","13.71","14.32","14.42","13.63","2189683.00",{"nd":"2022"}]
                ]}}}"#,
            ),
            ..StaticHttpClient::default()
        });
        let provider = TencentProvider::with_http_client(client.clone());
        let options = FetchOptions {
            adjust: Adjust::Forward,
            ..FetchOptions::default()
        };

        let table = provider.daily(&request(options)).await.expect("daily");

        assert_eq!(table.columns, COLUMNS.map(String::from).to_vec());
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1].len(), COLUMNS.len());

        let urls = client.urls.lock().expect("urls").clone();
        assert!(urls[0].contains("sz000001%2Cday%2C2023-01-03%2C2023-01-10%2C8%2Cqfq"));
    }

    #[tokio::test]
    async fn index_series_falls_back_to_plain_day_key() {
        let client = Arc::new(StaticHttpClient {
            body: String::from(
                r#"{"code":0,"data":{"sh000001":{"day":[["2023-01-03","3087.51","3116.51","3119.86","3073.05","31853.00"]]}}}"#,
            ),
            ..StaticHttpClient::default()
        });
        let provider = TencentProvider::with_http_client(client);

        let table = provider
            .daily(&request(FetchOptions::index()))
            .await
            .expect("daily");
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn non_zero_code_is_an_invalid_response() {
        let client = Arc::new(StaticHttpClient {
            body: String::from(r#"{"code":-1,"msg":"param error","data":[]}"#),
            ..StaticHttpClient::default()
        });
        let provider = TencentProvider::with_http_client(client);

        let error = provider
            .daily(&request(FetchOptions::default()))
            .await
            .expect_err("should fail");
        assert!(!error.retryable());
        assert!(error.message().contains("param error"));
    }
}
