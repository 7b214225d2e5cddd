//! Concrete upstream providers.
//!
//! | Provider | Role | Series |
//! |----------|------|--------|
//! | [`EastmoneyProvider`] | primary | stocks and indices, every derived field, profile, listing |
//! | [`TencentProvider`] | fallback | market-prefixed codes, OHLCV only |
//! | [`SyntheticProvider`] | mock mode only | deterministic weekday series |

mod eastmoney;
mod synthetic;
mod tencent;

pub use eastmoney::EastmoneyProvider;
pub use synthetic::SyntheticProvider;
pub use tencent::TencentProvider;

use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{ProviderError, ProviderId};

/// Execute `request` and return the body of a successful response.
async fn fetch_body(
    http_client: &dyn HttpClient,
    provider: ProviderId,
    request: HttpRequest,
) -> Result<String, ProviderError> {
    let response = http_client.execute(request).await.map_err(|error| {
        if error.is_timeout() {
            ProviderError::timeout(format!("{provider} request timed out: {}", error.message()))
        } else {
            ProviderError::unavailable(format!("{provider} transport error: {}", error.message()))
        }
    })?;

    if !response.is_success() {
        return Err(ProviderError::from_status(provider, response.status));
    }
    Ok(response.body)
}
