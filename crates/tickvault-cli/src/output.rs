use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CliError;

/// Response metadata shared by every command.
#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub request_id: String,
    pub generated_at: String,
    pub latency_ms: u64,
    pub warnings: Vec<String>,
}

/// JSON document printed to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
}

impl Envelope {
    pub fn new(data: Value, warnings: Vec<String>, latency_ms: u64) -> Self {
        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            meta: Meta {
                request_id: Uuid::new_v4().to_string(),
                generated_at,
                latency_ms,
                warnings,
            },
            data,
        }
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    println!("{payload}");
    Ok(())
}
