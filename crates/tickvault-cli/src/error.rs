use thiserror::Error;
use tickvault_core::{ServiceError, UpstreamError, ValidationError, WarehouseError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Service(ServiceError::Validation(_)) => 2,
            Self::Upstream(_) | Self::Service(ServiceError::Upstream(_)) => 3,
            Self::Warehouse(_) | Self::Service(ServiceError::Store(_)) => 4,
            Self::Serialization(_) => 5,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_category() {
        let invalid = ValidationError::EmptySymbol;
        assert_eq!(CliError::from(invalid).exit_code(), 2);

        let wrapped = ServiceError::Validation(ValidationError::EmptySymbol);
        assert_eq!(CliError::from(wrapped).exit_code(), 2);

        let upstream = UpstreamError::Misconfigured(String::from("no providers"));
        assert_eq!(CliError::from(upstream).exit_code(), 3);
    }
}
