use std::time::Duration;

use crate::ProviderId;

/// Rate budget for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
    /// Longest the adapter waits for budget before giving up on the provider.
    pub max_wait: Duration,
}

impl ProviderPolicy {
    pub fn eastmoney_default() -> Self {
        Self {
            provider_id: ProviderId::Eastmoney,
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
            max_wait: Duration::from_secs(5),
        }
    }

    pub fn tencent_default() -> Self {
        Self {
            provider_id: ProviderId::Tencent,
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            max_wait: Duration::from_secs(5),
        }
    }

    pub fn synthetic_default() -> Self {
        Self {
            provider_id: ProviderId::Synthetic,
            quota_window: Duration::from_secs(1),
            quota_limit: 10_000,
            max_wait: Duration::from_millis(100),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Eastmoney => Self::eastmoney_default(),
            ProviderId::Tencent => Self::tencent_default(),
            ProviderId::Synthetic => Self::synthetic_default(),
        }
    }
}
