mod cache;
mod calendar;
mod coverage;
mod series;
mod symbols;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tickvault_core::{
    RetryConfig, ServiceConfig, StockDataService, UpstreamAdapterBuilder, Warehouse,
    WarehouseConfig,
};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::Envelope;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let started = Instant::now();
    let upstream = upstream_builder(cli);
    let warehouse = Warehouse::open(warehouse_config(cli.home.as_deref(), upstream.is_mock()))?;

    let result = match &cli.command {
        Command::Cache(args) => cache::run(args, &warehouse)?,
        Command::Series(args) => series::run(args, &service(upstream, warehouse).await?).await?,
        Command::Coverage(args) => {
            coverage::run(args, &service(upstream, warehouse).await?).await?
        }
        Command::Calendar(args) => calendar::run(args, &service(upstream, warehouse).await?)?,
        Command::Symbols(args) => symbols::run(args, &service(upstream, warehouse).await?).await?,
    };

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    for warning in &result.warnings {
        tracing::warn!("{warning}");
    }
    Ok(Envelope::new(result.data, result.warnings, latency_ms))
}

/// Mock runs keep their rows and calendar snapshot under `<home>/mock` so
/// synthetic data never reaches the real store.
fn warehouse_config(home: Option<&Path>, mock: bool) -> WarehouseConfig {
    let home = home
        .map(Path::to_path_buf)
        .unwrap_or_else(|| WarehouseConfig::default().home);
    if mock {
        WarehouseConfig::at_home(home.join("mock"))
    } else {
        WarehouseConfig::at_home(home)
    }
}

fn upstream_builder(cli: &Cli) -> UpstreamAdapterBuilder {
    let builder = UpstreamAdapterBuilder::from_env()
        .with_retry(RetryConfig::default().with_overall_timeout(Duration::from_millis(cli.timeout_ms)));
    if cli.mock {
        builder.with_mock_mode()
    } else {
        builder
    }
}

async fn service(
    builder: UpstreamAdapterBuilder,
    warehouse: Warehouse,
) -> Result<StockDataService, CliError> {
    let upstream = Arc::new(builder.build()?);
    tracing::debug!(providers = ?upstream.providers(), mock = upstream.is_mock(), "upstream ready");

    Ok(StockDataService::bootstrap(warehouse, upstream, ServiceConfig::default()).await)
}
