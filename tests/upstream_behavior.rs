//! Behavior tests for the upstream adapter against the real provider parsers.
//!
//! The HTTP layer is replaced by a routing double so retries, fallback,
//! circuit breaking and span validation run end to end without a network.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickvault_core::{
    CircuitBreakerConfig, CircuitState, EastmoneyProvider, FetchOptions, HttpClient, HttpError,
    HttpRequest, HttpResponse, ProviderId, RetryConfig, Symbol, TencentProvider, UpstreamAdapter,
    UpstreamError,
};
use time::macros::date;

// =============================================================================
// Test doubles
// =============================================================================

/// Answers by the first route whose marker appears in the URL.
///
/// A scripted marker answers from its queue first and falls back to the
/// routes once the queue is drained.
struct RoutingHttpClient {
    routes: Vec<(&'static str, Result<HttpResponse, HttpError>)>,
    script: Mutex<Vec<(&'static str, VecDeque<Result<HttpResponse, HttpError>>)>>,
    delay: Duration,
    urls: Mutex<Vec<String>>,
}

impl RoutingHttpClient {
    fn new(routes: Vec<(&'static str, Result<HttpResponse, HttpError>)>) -> Arc<Self> {
        Self::scripted(Vec::new(), routes)
    }

    fn scripted(
        script: Vec<(&'static str, Vec<Result<HttpResponse, HttpError>>)>,
        routes: Vec<(&'static str, Result<HttpResponse, HttpError>)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            routes,
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(marker, responses)| (marker, VecDeque::from(responses)))
                    .collect(),
            ),
            delay: Duration::ZERO,
            urls: Mutex::new(Vec::new()),
        })
    }

    fn slow(delay: Duration, routes: Vec<(&'static str, Result<HttpResponse, HttpError>)>) -> Arc<Self> {
        Arc::new(Self {
            routes,
            script: Mutex::new(Vec::new()),
            delay,
            urls: Mutex::new(Vec::new()),
        })
    }

    fn next_scripted(&self, url: &str) -> Option<Result<HttpResponse, HttpError>> {
        self.script
            .lock()
            .expect("script should not be poisoned")
            .iter_mut()
            .find(|(marker, _)| url.contains(marker))
            .and_then(|(_, responses)| responses.pop_front())
    }

    fn hits(&self, marker: &str) -> usize {
        self.urls
            .lock()
            .expect("url log should not be poisoned")
            .iter()
            .filter(|url| url.contains(marker))
            .count()
    }
}

impl HttpClient for RoutingHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.urls
            .lock()
            .expect("url log should not be poisoned")
            .push(request.url.clone());
        let response = self.next_scripted(&request.url).unwrap_or_else(|| {
            self.routes
                .iter()
                .find(|(marker, _)| request.url.contains(marker))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| Err(HttpError::new(format!("no route for {}", request.url))))
        });
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }
}

fn status(code: u16) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse {
        status: code,
        body: String::new(),
    })
}

fn json(body: &str) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse::ok_json(body))
}

const TENCENT_WEEK: &str = r#"{"code":0,"msg":"","data":{"sz000001":{"day":[
    ["2023-01-03","13.20","13.77","13.85","13.05","2194128.00"],
    ["2023-01-04","13.71","14.32","14.42","13.63","2189683.00"],
    ["2023-01-05","14.40","14.48","14.74","14.37","1665425.00"],
    ["2023-01-06","14.50","14.62","14.72","14.32","1195745.00"]
]}}}"#;

fn adapter(client: Arc<RoutingHttpClient>, retry: RetryConfig) -> UpstreamAdapter {
    UpstreamAdapter::builder()
        .with_provider(Arc::new(EastmoneyProvider::with_http_client(client.clone())))
        .with_provider(Arc::new(TencentProvider::with_http_client(client)))
        .with_retry(retry)
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(60),
        })
        .build()
        .expect("adapter should build")
}

fn symbol(code: &str) -> Symbol {
    Symbol::parse(code).expect("valid symbol")
}

// =============================================================================
// Retry and fallback
// =============================================================================

#[tokio::test]
async fn primary_server_errors_retry_then_fall_back() {
    // Given: Eastmoney keeps answering 502 and Tencent has the week
    let client = RoutingHttpClient::new(vec![
        ("eastmoney", status(502)),
        ("gtimg", json(TENCENT_WEEK)),
    ]);
    let adapter = adapter(client.clone(), RetryConfig::fixed(Duration::from_millis(1), 2));

    // When: The week is fetched
    let fetched = adapter
        .fetch(
            &symbol("000001"),
            date!(2023 - 01 - 03),
            date!(2023 - 01 - 06),
            FetchOptions::default(),
        )
        .await
        .expect("fallback should succeed");

    // Then: Eastmoney got every allowed attempt and Tencent served the rows
    assert_eq!(client.hits("eastmoney"), 3);
    assert_eq!(client.hits("gtimg"), 1);
    assert_eq!(fetched.provider, ProviderId::Tencent);
    assert_eq!(fetched.points.len(), 4);
    assert_eq!(fetched.points[1].close, 14.32);

    // And: Three consecutive transport failures opened the primary's breaker
    assert_eq!(adapter.circuit_state(ProviderId::Eastmoney), Some(CircuitState::Open));
    assert_eq!(adapter.circuit_state(ProviderId::Tencent), Some(CircuitState::Closed));
}

#[tokio::test]
async fn open_breaker_skips_primary_on_next_call() {
    let client = RoutingHttpClient::new(vec![
        ("eastmoney", status(503)),
        ("gtimg", json(TENCENT_WEEK)),
    ]);
    let adapter = adapter(client.clone(), RetryConfig::fixed(Duration::from_millis(1), 2));
    let code = symbol("000001");

    adapter
        .fetch(&code, date!(2023 - 01 - 03), date!(2023 - 01 - 06), FetchOptions::default())
        .await
        .expect("first call falls back");
    let fetched = adapter
        .fetch(&code, date!(2023 - 01 - 03), date!(2023 - 01 - 06), FetchOptions::default())
        .await
        .expect("second call falls back");

    assert_eq!(client.hits("eastmoney"), 3);
    assert_eq!(client.hits("gtimg"), 2);
    assert_eq!(fetched.provider, ProviderId::Tencent);
}

#[tokio::test]
async fn short_span_is_rejected_and_next_provider_used() {
    // Given: Eastmoney answers with a single day for a two-month request
    let client = RoutingHttpClient::new(vec![
        (
            "eastmoney",
            json(
                r#"{"rc":0,"data":{"code":"000001","klines":[
                    "2023-01-03,13.20,13.77,13.85,13.05,2194128,2971110927.00,6.08,4.85,0.64,1.13"
                ]}}"#,
            ),
        ),
        (
            "gtimg",
            json(
                r#"{"code":0,"data":{"sz000001":{"day":[
                    ["2023-01-03","13.20","13.77","13.85","13.05","2194128.00"],
                    ["2023-02-27","14.10","14.05","14.20","13.90","1000000.00"]
                ]}}}"#,
            ),
        ),
    ]);
    let adapter = adapter(client.clone(), RetryConfig::fixed(Duration::from_millis(1), 2));

    // When: The range 01-03..02-28 is fetched
    let fetched = adapter
        .fetch(
            &symbol("000001"),
            date!(2023 - 01 - 03),
            date!(2023 - 02 - 28),
            FetchOptions::default(),
        )
        .await
        .expect("fallback should succeed");

    // Then: The truncated answer was not retried and Tencent's span was accepted
    assert_eq!(client.hits("eastmoney"), 1);
    assert_eq!(fetched.provider, ProviderId::Tencent);
    assert_eq!(fetched.points.len(), 2);

    // And: An invalid payload does not count against the breaker
    assert_eq!(adapter.circuit_state(ProviderId::Eastmoney), Some(CircuitState::Closed));
}

#[tokio::test]
async fn empty_answer_from_half_open_primary_leaves_circuit_half_open() {
    // Given: Eastmoney fails three times, then answers with no rows
    let client = RoutingHttpClient::scripted(
        vec![("eastmoney", vec![status(502), status(502), status(502)])],
        vec![
            ("eastmoney", json(r#"{"rc":0,"data":null}"#)),
            ("gtimg", json(TENCENT_WEEK)),
        ],
    );
    let adapter = UpstreamAdapter::builder()
        .with_provider(Arc::new(EastmoneyProvider::with_http_client(client.clone())))
        .with_provider(Arc::new(TencentProvider::with_http_client(client.clone())))
        .with_retry(RetryConfig::fixed(Duration::from_millis(1), 2))
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_millis(20),
        })
        .build()
        .expect("adapter should build");
    let code = symbol("000001");

    adapter
        .fetch(&code, date!(2023 - 01 - 03), date!(2023 - 01 - 06), FetchOptions::default())
        .await
        .expect("first call falls back");
    assert_eq!(adapter.circuit_state(ProviderId::Eastmoney), Some(CircuitState::Open));

    // When: The open window passes and the probe comes back empty
    tokio::time::sleep(Duration::from_millis(40)).await;
    let fetched = adapter
        .fetch(&code, date!(2023 - 01 - 03), date!(2023 - 01 - 06), FetchOptions::default())
        .await
        .expect("second call falls back");

    // Then: The probe was made once, Tencent served the rows and the circuit is not closed
    assert_eq!(client.hits("eastmoney"), 4);
    assert_eq!(fetched.provider, ProviderId::Tencent);
    assert_eq!(adapter.circuit_state(ProviderId::Eastmoney), Some(CircuitState::HalfOpen));
}

#[tokio::test]
async fn all_providers_failing_reports_each_attempt_in_order() {
    let client = RoutingHttpClient::new(vec![
        ("eastmoney", status(500)),
        ("gtimg", json(r#"{"code":-1,"msg":"param error","data":[]}"#)),
    ]);
    let adapter = adapter(client, RetryConfig::fixed(Duration::from_millis(1), 1));

    let error = adapter
        .fetch(
            &symbol("000001"),
            date!(2023 - 01 - 03),
            date!(2023 - 01 - 06),
            FetchOptions::default(),
        )
        .await
        .expect_err("every provider fails");

    match &error {
        UpstreamError::Unavailable { attempts, start, .. } => {
            assert_eq!(*start, date!(2023 - 01 - 03));
            let providers = attempts.iter().map(|attempt| attempt.provider).collect::<Vec<_>>();
            assert_eq!(providers, vec![ProviderId::Eastmoney, ProviderId::Tencent]);
            assert_eq!(attempts[0].attempts, 2);
            assert_eq!(attempts[1].attempts, 1);
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert!(error.retryable());
    assert!(error.to_string().contains("eastmoney x2"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let client = RoutingHttpClient::new(vec![
        ("eastmoney", status(404)),
        ("gtimg", json(TENCENT_WEEK)),
    ]);
    let adapter = adapter(client.clone(), RetryConfig::fixed(Duration::from_millis(1), 2));

    let fetched = adapter
        .fetch(
            &symbol("000001"),
            date!(2023 - 01 - 03),
            date!(2023 - 01 - 06),
            FetchOptions::default(),
        )
        .await
        .expect("fallback should succeed");

    assert_eq!(client.hits("eastmoney"), 1);
    assert_eq!(fetched.provider, ProviderId::Tencent);
}

// =============================================================================
// Deadlines
// =============================================================================

#[tokio::test]
async fn overall_timeout_bounds_the_whole_call() {
    // Given: Every response takes far longer than the overall budget
    let client = RoutingHttpClient::slow(
        Duration::from_secs(5),
        vec![("eastmoney", json(TENCENT_WEEK)), ("gtimg", json(TENCENT_WEEK))],
    );
    let adapter = adapter(
        client,
        RetryConfig::fixed(Duration::from_millis(1), 2).with_overall_timeout(Duration::from_millis(100)),
    );

    // When: A fetch is attempted
    let started = std::time::Instant::now();
    let result = adapter
        .fetch(
            &symbol("000001"),
            date!(2023 - 01 - 03),
            date!(2023 - 01 - 06),
            FetchOptions::default(),
        )
        .await;

    // Then: It fails well before any single response could arrive
    assert!(matches!(result, Err(UpstreamError::Unavailable { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

// =============================================================================
// Mock mode, profile and listing
// =============================================================================

#[tokio::test]
async fn mock_mode_serves_synthetic_weekdays() {
    let adapter = UpstreamAdapter::builder()
        .with_mock_mode()
        .build()
        .expect("mock adapter");

    let fetched = adapter
        .fetch(
            &symbol("600000"),
            date!(2023 - 01 - 02),
            date!(2023 - 01 - 08),
            FetchOptions::default(),
        )
        .await
        .expect("synthetic data");

    assert!(adapter.is_mock());
    assert_eq!(adapter.providers(), vec![ProviderId::Synthetic]);
    assert_eq!(fetched.provider, ProviderId::Synthetic);
    assert_eq!(fetched.points.len(), 5);
    assert!(fetched
        .points
        .iter()
        .all(|point| point.low <= point.close && point.close <= point.high));
}

#[tokio::test]
async fn duplicate_providers_are_rejected() {
    let client = RoutingHttpClient::new(Vec::new());
    let result = UpstreamAdapter::builder()
        .with_provider(Arc::new(EastmoneyProvider::with_http_client(client.clone())))
        .with_provider(Arc::new(EastmoneyProvider::with_http_client(client)))
        .build();

    assert!(matches!(result, Err(UpstreamError::Misconfigured(_))));
}

#[tokio::test]
async fn profile_and_listing_come_from_primary() {
    let client = RoutingHttpClient::new(vec![
        ("stock/get", json(r#"{"data":{"f57":"600000","f58":"浦发银行"}}"#)),
        (
            "clist/get",
            json(r#"{"data":{"diff":[{"f12":"000001","f14":"平安银行"},{"f12":"600000","f14":"浦发银行"}]}}"#),
        ),
    ]);
    let adapter = adapter(client, RetryConfig::no_retry());

    let name = adapter.profile(&symbol("600000"), FetchOptions::default()).await;
    let listing = adapter.listing().await.expect("listing");

    assert_eq!(name.as_deref(), Some("浦发银行"));
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].symbol.as_str(), "000001");
}

#[tokio::test]
async fn listing_failure_names_every_provider() {
    let client = RoutingHttpClient::new(vec![("clist/get", status(500))]);
    let adapter = adapter(client, RetryConfig::no_retry());

    let error = adapter.listing().await.expect_err("listing fails");

    match error {
        UpstreamError::ListingUnavailable { attempts } => {
            let providers = attempts.iter().map(|attempt| attempt.provider).collect::<Vec<_>>();
            assert_eq!(providers, vec![ProviderId::Eastmoney, ProviderId::Tencent]);
        }
        other => panic!("expected ListingUnavailable, got {other:?}"),
    }
}
