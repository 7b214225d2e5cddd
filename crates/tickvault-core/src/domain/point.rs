use serde::{Deserialize, Serialize};
use time::Date;
use tickvault_warehouse::PointRecord;

use super::date::{format_date, iso_date, parse_date};
use crate::{Symbol, ValidationError};

/// One daily OHLCV row for a symbol.
///
/// At most one point exists per (symbol, date); re-fetching replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub symbol: Symbol,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub turnover: Option<f64>,
    pub amplitude: Option<f64>,
    pub pct_change: Option<f64>,
    pub change: Option<f64>,
    pub turnover_rate: Option<f64>,
}

impl TimeSeriesPoint {
    /// Build a point with only the OHLCV core; derived fields start empty.
    pub fn new(
        symbol: Symbol,
        date: Date,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        let point = Self {
            symbol,
            date,
            open,
            high,
            low,
            close,
            volume,
            turnover: None,
            amplitude: None,
            pct_change: None,
            change: None,
            turnover_rate: None,
        };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeValue { field });
            }
        }
        if self.high < self.low {
            return Err(ValidationError::InvalidPointRange);
        }
        for (field, value) in [
            ("turnover", self.turnover),
            ("amplitude", self.amplitude),
            ("pct_change", self.pct_change),
            ("change", self.change),
            ("turnover_rate", self.turnover_rate),
        ] {
            if value.is_some_and(|value| !value.is_finite()) {
                return Err(ValidationError::NonFiniteValue { field });
            }
        }
        Ok(())
    }

    pub fn to_record(&self) -> PointRecord {
        PointRecord {
            symbol: self.symbol.to_string(),
            trade_date: format_date(self.date),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: i64::try_from(self.volume).unwrap_or(i64::MAX),
            turnover: self.turnover,
            amplitude: self.amplitude,
            pct_change: self.pct_change,
            change: self.change,
            turnover_rate: self.turnover_rate,
        }
    }
}

impl TryFrom<PointRecord> for TimeSeriesPoint {
    type Error = ValidationError;

    fn try_from(record: PointRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            symbol: Symbol::parse(&record.symbol)?,
            date: parse_date(&record.trade_date)?,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: u64::try_from(record.volume)
                .map_err(|_| ValidationError::NegativeValue { field: "volume" })?,
            turnover: record.turnover,
            amplitude: record.amplitude,
            pct_change: record.pct_change,
            change: record.change,
            turnover_rate: record.turnover_rate,
        })
    }
}

/// Sort ascending by date and keep the last point seen for each date.
pub fn sort_and_dedupe(points: Vec<TimeSeriesPoint>) -> Vec<TimeSeriesPoint> {
    let mut by_date = std::collections::BTreeMap::new();
    for point in points {
        by_date.insert(point.date, point);
    }
    by_date.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn symbol() -> Symbol {
        Symbol::parse("000001").expect("symbol")
    }

    #[test]
    fn rejects_inverted_range() {
        let error = TimeSeriesPoint::new(symbol(), date!(2023 - 01 - 03), 10.0, 9.0, 11.0, 10.0, 1)
            .expect_err("high < low must fail");
        assert_eq!(error, ValidationError::InvalidPointRange);
    }

    #[test]
    fn rejects_non_finite_prices() {
        let error =
            TimeSeriesPoint::new(symbol(), date!(2023 - 01 - 03), f64::NAN, 11.0, 9.0, 10.0, 1)
                .expect_err("nan must fail");
        assert_eq!(error, ValidationError::NonFiniteValue { field: "open" });
    }

    #[test]
    fn record_conversion_keeps_every_field() {
        let mut point =
            TimeSeriesPoint::new(symbol(), date!(2023 - 01 - 03), 13.2, 13.85, 13.05, 13.77, 2_194_128)
                .expect("valid");
        point.turnover = Some(2.97e9);
        point.pct_change = Some(4.85);

        let record = point.to_record();
        assert_eq!(record.trade_date, "2023-01-03");
        assert_eq!(TimeSeriesPoint::try_from(record).expect("back"), point);
    }

    #[test]
    fn dedupe_keeps_latest_per_date() {
        let first = TimeSeriesPoint::new(symbol(), date!(2023 - 01 - 04), 1.0, 1.0, 1.0, 1.0, 1)
            .expect("valid");
        let mut replacement = first.clone();
        replacement.volume = 99;
        let earlier = TimeSeriesPoint::new(symbol(), date!(2023 - 01 - 03), 1.0, 1.0, 1.0, 1.0, 1)
            .expect("valid");

        let points = sort_and_dedupe(vec![first, earlier.clone(), replacement.clone()]);
        assert_eq!(points, vec![earlier, replacement]);
    }
}
