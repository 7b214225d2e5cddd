//! Retry-and-fallback fetcher over an ordered provider list.
//!
//! Each provider gets up to `max_retries + 1` attempts, gated by its circuit
//! breaker and rate budget. A result is accepted only after normalization and
//! span validation; empty or invalid results fall through to the next
//! provider without retrying. The whole call is bounded by
//! `RetryConfig::overall_timeout`. Callers only ever see
//! [`UpstreamError::Unavailable`]; individual provider errors stay inside.

use std::collections::HashMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use thiserror::Error;
use time::Date;
use tokio::time::Instant;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::normalize::{normalize_table, validate_span};
use crate::provider::{
    DailyRequest, FetchOptions, ProviderError, ProviderErrorKind, ProviderId, SeriesProvider,
};
use crate::provider_policy::ProviderPolicy;
use crate::providers::{EastmoneyProvider, SyntheticProvider, TencentProvider};
use crate::retry::RetryConfig;
use crate::throttling::ThrottlingQueue;
use crate::{Listing, Symbol, TimeSeriesPoint};

/// Default tolerance, in calendar days, between requested and returned span edges.
pub const DEFAULT_SPAN_SLACK_DAYS: u32 = 10;

/// What happened with one provider during a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSummary {
    pub provider: ProviderId,
    pub attempts: u32,
    pub error: String,
}

impl Display for AttemptSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x{}: {}", self.provider, self.attempts, self.error)
    }
}

fn summarize(attempts: &[AttemptSummary]) -> String {
    if attempts.is_empty() {
        return String::from("no providers configured");
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Every provider failed, was skipped, or returned unusable data.
    #[error("upstream unavailable for {symbol} {start}..{end}: {}", summarize(.attempts))]
    Unavailable {
        symbol: Symbol,
        start: Date,
        end: Date,
        attempts: Vec<AttemptSummary>,
    },

    #[error("symbol listing unavailable: {}", summarize(.attempts))]
    ListingUnavailable { attempts: Vec<AttemptSummary> },

    #[error("upstream misconfigured: {0}")]
    Misconfigured(String),
}

impl UpstreamError {
    pub const fn retryable(&self) -> bool {
        !matches!(self, Self::Misconfigured(_))
    }
}

/// Accepted upstream result.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    pub provider: ProviderId,
    pub points: Vec<TimeSeriesPoint>,
    pub latency_ms: u64,
}

struct ProviderSlot {
    provider: Arc<dyn SeriesProvider>,
    breaker: CircuitBreaker,
    throttle: ThrottlingQueue,
}

impl ProviderSlot {
    fn id(&self) -> ProviderId {
        self.provider.id()
    }
}

/// Upstream adapter: a pure fetch-and-normalize component with no cache awareness.
pub struct UpstreamAdapter {
    slots: Vec<ProviderSlot>,
    retry: RetryConfig,
    span_slack_days: u32,
    mock_mode: bool,
}

impl UpstreamAdapter {
    pub fn builder() -> UpstreamAdapterBuilder {
        UpstreamAdapterBuilder::new()
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.slots.iter().map(ProviderSlot::id).collect()
    }

    pub fn is_mock(&self) -> bool {
        self.mock_mode
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn circuit_state(&self, provider: ProviderId) -> Option<CircuitState> {
        self.slots
            .iter()
            .find(|slot| slot.id() == provider)
            .map(|slot| slot.breaker.state())
    }

    /// Fetch daily points for `[start, end]`, trying providers in order.
    pub async fn fetch(
        &self,
        symbol: &Symbol,
        start: Date,
        end: Date,
        options: FetchOptions,
    ) -> Result<FetchedSeries, UpstreamError> {
        let started = Instant::now();
        let deadline = started + self.retry.overall_timeout;
        let request = DailyRequest {
            symbol: symbol.clone(),
            start,
            end,
            options,
        };

        let mut attempts = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let provider = slot.id();
            match self.try_provider(slot, &request, deadline).await {
                Ok(points) => {
                    let latency_ms = elapsed_ms(started);
                    if !attempts.is_empty() {
                        tracing::info!(
                            %provider,
                            failed = attempts.len(),
                            "upstream fallback succeeded"
                        );
                    }
                    tracing::info!(
                        %provider,
                        %symbol,
                        %start,
                        %end,
                        rows = points.len(),
                        latency_ms,
                        "upstream fetch succeeded"
                    );
                    return Ok(FetchedSeries {
                        provider,
                        points,
                        latency_ms,
                    });
                }
                Err((count, error)) => {
                    tracing::warn!(
                        %provider,
                        %symbol,
                        attempts = count,
                        error = %error,
                        "provider failed, trying next"
                    );
                    attempts.push(AttemptSummary {
                        provider,
                        attempts: count,
                        error: error.to_string(),
                    });
                }
            }
        }

        Err(UpstreamError::Unavailable {
            symbol: symbol.clone(),
            start,
            end,
            attempts,
        })
    }

    async fn try_provider(
        &self,
        slot: &ProviderSlot,
        request: &DailyRequest,
        deadline: Instant,
    ) -> Result<Vec<TimeSeriesPoint>, (u32, ProviderError)> {
        let provider = slot.id();
        let max_attempts = self.retry.attempts_per_provider();
        let mut made = 0_u32;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_error = Some(ProviderError::timeout("overall upstream deadline reached"));
                break;
            }
            if !slot.breaker.allow_request() {
                last_error = Some(ProviderError::circuit_open(provider));
                break;
            }
            if !slot.throttle.acquire(remaining).await {
                last_error = Some(ProviderError::rate_limited(format!(
                    "{provider} rate budget exhausted"
                )));
                break;
            }

            made += 1;
            tracing::debug!(%provider, symbol = %request.symbol, attempt, "upstream attempt");
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match tokio::time::timeout(remaining, slot.provider.daily(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(format!(
                    "{provider} attempt cut off by overall deadline"
                ))),
            };

            let error = match outcome.and_then(|table| self.accept(request, &table)) {
                Ok(points) => {
                    slot.breaker.record_success();
                    return Ok(points);
                }
                Err(error) => error,
            };

            // Only transport-level failures count against the breaker. Empty and
            // malformed answers neither trip nor close it.
            if error.retryable() {
                slot.breaker.record_failure();
            }

            let retry = error.retryable()
                && (self.retry.retry_on_timeout || error.kind() != ProviderErrorKind::Timeout);
            tracing::debug!(%provider, attempt, error = %error, retry, "upstream attempt failed");
            last_error = Some(error);
            if !retry || attempt + 1 >= max_attempts {
                break;
            }

            let delay = self
                .retry
                .delay_for_attempt(attempt)
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::time::sleep(delay).await;
        }

        let error = last_error
            .unwrap_or_else(|| ProviderError::unavailable(format!("{provider} was not attempted")));
        Err((made, error))
    }

    fn accept(
        &self,
        request: &DailyRequest,
        table: &crate::provider::RawTable,
    ) -> Result<Vec<TimeSeriesPoint>, ProviderError> {
        let points = normalize_table(&request.symbol, table, request.start, request.end)?;
        validate_span(&points, request.start, request.end, self.span_slack_days)?;
        Ok(points)
    }

    /// Display name from the first provider that knows one. Best effort.
    pub async fn profile(&self, symbol: &Symbol, options: FetchOptions) -> Option<String> {
        let deadline = Instant::now() + self.retry.overall_timeout;
        for slot in &self.slots {
            if !slot.breaker.allow_request() {
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, slot.provider.profile(symbol, options)).await {
                Ok(Ok(Some(name))) => return Some(name),
                Ok(Ok(None)) => {}
                Ok(Err(error)) => {
                    tracing::debug!(provider = %slot.id(), %symbol, error = %error, "profile lookup failed");
                }
                Err(_) => {
                    tracing::debug!(provider = %slot.id(), %symbol, "profile lookup timed out");
                    break;
                }
            }
        }
        None
    }

    /// Exchange-wide symbol listing from the first provider that has one.
    pub async fn listing(&self) -> Result<Vec<Listing>, UpstreamError> {
        let deadline = Instant::now() + self.retry.overall_timeout;
        let mut attempts = Vec::new();

        for slot in &self.slots {
            let provider = slot.id();
            if !slot.breaker.allow_request() {
                attempts.push(AttemptSummary {
                    provider,
                    attempts: 0,
                    error: ProviderError::circuit_open(provider).to_string(),
                });
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match tokio::time::timeout(remaining, slot.provider.listing()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(format!("{provider} listing timed out"))),
            };
            match outcome {
                Ok(listing) if !listing.is_empty() => {
                    tracing::info!(%provider, symbols = listing.len(), "symbol listing fetched");
                    return Ok(listing);
                }
                Ok(_) => attempts.push(AttemptSummary {
                    provider,
                    attempts: 1,
                    error: ProviderError::empty("empty listing").to_string(),
                }),
                Err(error) => attempts.push(AttemptSummary {
                    provider,
                    attempts: 1,
                    error: error.to_string(),
                }),
            }
        }

        Err(UpstreamError::ListingUnavailable { attempts })
    }
}

/// Builder for [`UpstreamAdapter`].
///
/// # Environment Variables
///
/// | Variable | Effect |
/// |----------|--------|
/// | `TICKVAULT_MOCK` | `1`/`true` switches to the synthetic provider |
pub struct UpstreamAdapterBuilder {
    providers: Vec<Arc<dyn SeriesProvider>>,
    policies: HashMap<ProviderId, ProviderPolicy>,
    retry: RetryConfig,
    breaker: CircuitBreakerConfig,
    span_slack_days: u32,
    mock_mode: bool,
}

impl Default for UpstreamAdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamAdapterBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            policies: HashMap::new(),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            span_slack_days: DEFAULT_SPAN_SLACK_DAYS,
            mock_mode: false,
        }
    }

    /// Builder seeded from the environment.
    pub fn from_env() -> Self {
        let mock = env::var("TICKVAULT_MOCK")
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let builder = Self::new();
        if mock {
            builder.with_mock_mode()
        } else {
            builder
        }
    }

    /// Serve synthetic data only. Never enable outside tests and demos.
    pub fn with_mock_mode(mut self) -> Self {
        self.mock_mode = true;
        self
    }

    pub fn is_mock(&self) -> bool {
        self.mock_mode
    }

    /// Register the real providers in `order`, sharing one reqwest client.
    pub fn with_real_providers(mut self, order: &[ProviderId]) -> Self {
        let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        for provider in order {
            match provider {
                ProviderId::Eastmoney => self.providers.push(Arc::new(
                    EastmoneyProvider::with_http_client(Arc::clone(&http_client)),
                )),
                ProviderId::Tencent => self.providers.push(Arc::new(
                    TencentProvider::with_http_client(Arc::clone(&http_client)),
                )),
                ProviderId::Synthetic => self.providers.push(Arc::new(SyntheticProvider)),
            }
        }
        self
    }

    /// Eastmoney first, Tencent as fallback.
    pub fn with_real_clients(self) -> Self {
        self.with_real_providers(&[ProviderId::Eastmoney, ProviderId::Tencent])
    }

    /// Append a provider to the fallback order.
    pub fn with_provider(mut self, provider: Arc<dyn SeriesProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policies.insert(policy.provider_id, policy);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn with_span_slack_days(mut self, days: u32) -> Self {
        self.span_slack_days = days;
        self
    }

    pub fn build(self) -> Result<UpstreamAdapter, UpstreamError> {
        let mut providers = self.providers;
        if self.mock_mode {
            if providers.is_empty() {
                providers.push(Arc::new(SyntheticProvider));
            }
        } else {
            if providers
                .iter()
                .any(|provider| provider.id() == ProviderId::Synthetic)
            {
                return Err(UpstreamError::Misconfigured(String::from(
                    "synthetic provider requires mock mode",
                )));
            }
            if providers.is_empty() {
                return Self::new()
                    .with_real_clients()
                    .with_retry(self.retry)
                    .with_circuit_breaker(self.breaker)
                    .with_span_slack_days(self.span_slack_days)
                    .with_policies(self.policies)
                    .build();
            }
        }

        let mut seen = Vec::with_capacity(providers.len());
        for provider in &providers {
            if seen.contains(&provider.id()) {
                return Err(UpstreamError::Misconfigured(format!(
                    "provider '{}' registered twice",
                    provider.id()
                )));
            }
            seen.push(provider.id());
        }

        let slots = providers
            .into_iter()
            .map(|provider| {
                let id = provider.id();
                let policy = self
                    .policies
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| ProviderPolicy::default_for(id));
                ProviderSlot {
                    breaker: CircuitBreaker::new(id.as_str(), self.breaker),
                    throttle: ThrottlingQueue::from_policy(&policy),
                    provider,
                }
            })
            .collect();

        Ok(UpstreamAdapter {
            slots,
            retry: self.retry,
            span_slack_days: self.span_slack_days,
            mock_mode: self.mock_mode,
        })
    }

    fn with_policies(mut self, policies: HashMap<ProviderId, ProviderPolicy>) -> Self {
        self.policies = policies;
        self
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
