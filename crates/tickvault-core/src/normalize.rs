//! Provider tables to canonical points.
//!
//! Column names are mapped through an alias table covering the Chinese
//! vocabulary used by the quote sites and the English spellings used
//! elsewhere. Cells are coerced from numbers or strings; dates go through
//! [`parse_date`]. Missing change / pct_change / amplitude are derived from
//! the previous close in the same batch.

use serde_json::Value;
use time::Date;

use crate::domain::{parse_date, sort_and_dedupe};
use crate::provider::{ProviderError, RawTable};
use crate::{Symbol, TimeSeriesPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
    Turnover,
    Amplitude,
    PctChange,
    Change,
    TurnoverRate,
}

const REQUIRED: [Field; 6] = [
    Field::Date,
    Field::Open,
    Field::High,
    Field::Low,
    Field::Close,
    Field::Volume,
];

const ALIASES: &[(&str, Field)] = &[
    ("日期", Field::Date),
    ("date", Field::Date),
    ("trade_date", Field::Date),
    ("day", Field::Date),
    ("开盘", Field::Open),
    ("open", Field::Open),
    ("最高", Field::High),
    ("high", Field::High),
    ("最低", Field::Low),
    ("low", Field::Low),
    ("收盘", Field::Close),
    ("close", Field::Close),
    ("成交量", Field::Volume),
    ("volume", Field::Volume),
    ("vol", Field::Volume),
    ("成交额", Field::Turnover),
    ("turnover", Field::Turnover),
    ("amount", Field::Turnover),
    ("振幅", Field::Amplitude),
    ("amplitude", Field::Amplitude),
    ("涨跌幅", Field::PctChange),
    ("pct_change", Field::PctChange),
    ("pct_chg", Field::PctChange),
    ("change_percent", Field::PctChange),
    ("涨跌额", Field::Change),
    ("change", Field::Change),
    ("change_amount", Field::Change),
    ("换手率", Field::TurnoverRate),
    ("turnover_rate", Field::TurnoverRate),
];

fn field_for(column: &str) -> Option<Field> {
    let column = column.trim();
    ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(column))
        .map(|(_, field)| *field)
}

/// Column index per canonical field.
#[derive(Debug, Default)]
struct ColumnMap {
    indices: Vec<(Field, usize)>,
}

impl ColumnMap {
    fn resolve(columns: &[String]) -> Result<Self, ProviderError> {
        let mut indices = Vec::new();
        for (index, column) in columns.iter().enumerate() {
            if let Some(field) = field_for(column) {
                if !indices.iter().any(|(known, _)| *known == field) {
                    indices.push((field, index));
                }
            }
        }

        let missing = REQUIRED
            .iter()
            .filter(|field| !indices.iter().any(|(known, _)| known == *field))
            .map(|field| format!("{field:?}").to_ascii_lowercase())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ProviderError::invalid_response(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }

        Ok(Self { indices })
    }

    fn cell<'r>(&self, row: &'r [Value], field: Field) -> Option<&'r Value> {
        let index = self
            .indices
            .iter()
            .find(|(known, _)| *known == field)
            .map(|(_, index)| *index)?;
        row.get(index)
    }

    fn number(&self, row: &[Value], field: Field) -> Option<f64> {
        self.cell(row, field).and_then(coerce_f64)
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let cleaned = text.trim().trim_end_matches('%').replace(',', "");
            if cleaned.is_empty() || cleaned == "-" || cleaned == "--" {
                None
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn coerce_volume(value: &Value) -> Option<u64> {
    let volume = coerce_f64(value)?;
    (volume >= 0.0).then(|| volume.round() as u64)
}

fn coerce_date(value: &Value) -> Option<Date> {
    match value {
        Value::String(text) => parse_date(text).ok(),
        Value::Number(number) => parse_date(&number.to_string()).ok(),
        _ => None,
    }
}

/// Map `table` onto canonical points for `symbol`, keeping rows in `[start, end]`.
///
/// Rows with an unusable date or core price are dropped. Output is sorted by
/// date with one point per date.
pub fn normalize_table(
    symbol: &Symbol,
    table: &RawTable,
    start: Date,
    end: Date,
) -> Result<Vec<TimeSeriesPoint>, ProviderError> {
    let columns = ColumnMap::resolve(&table.columns)?;

    let mut points = Vec::with_capacity(table.rows.len());
    let mut dropped = 0_usize;
    for row in &table.rows {
        match normalize_row(symbol, &columns, row) {
            Some(point) => points.push(point),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(%symbol, dropped, "dropped malformed upstream rows");
    }

    let mut points = sort_and_dedupe(points);
    derive_missing_fields(&mut points);
    points.retain(|point| point.date >= start && point.date <= end);
    Ok(points)
}

fn normalize_row(symbol: &Symbol, columns: &ColumnMap, row: &[Value]) -> Option<TimeSeriesPoint> {
    let date = columns.cell(row, Field::Date).and_then(coerce_date)?;
    let volume = columns.cell(row, Field::Volume).and_then(coerce_volume)?;

    let mut point = TimeSeriesPoint::new(
        symbol.clone(),
        date,
        columns.number(row, Field::Open)?,
        columns.number(row, Field::High)?,
        columns.number(row, Field::Low)?,
        columns.number(row, Field::Close)?,
        volume,
    )
    .ok()?;

    point.turnover = columns.number(row, Field::Turnover);
    point.amplitude = columns.number(row, Field::Amplitude);
    point.pct_change = columns.number(row, Field::PctChange);
    point.change = columns.number(row, Field::Change);
    point.turnover_rate = columns.number(row, Field::TurnoverRate);
    Some(point)
}

/// Fill change, pct_change and amplitude from the previous close.
fn derive_missing_fields(points: &mut [TimeSeriesPoint]) {
    let mut previous_close: Option<f64> = None;
    for point in points.iter_mut() {
        if let Some(previous) = previous_close.filter(|close| *close > 0.0) {
            if point.change.is_none() {
                point.change = Some(round4(point.close - previous));
            }
            if point.pct_change.is_none() {
                point.pct_change = Some(round4((point.close - previous) / previous * 100.0));
            }
            if point.amplitude.is_none() {
                point.amplitude = Some(round4((point.high - point.low) / previous * 100.0));
            }
        }
        previous_close = Some(point.close);
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Reject empty results and results whose span misses the request by more than `slack_days`.
pub fn validate_span(
    points: &[TimeSeriesPoint],
    start: Date,
    end: Date,
    slack_days: u32,
) -> Result<(), ProviderError> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Err(ProviderError::empty("provider returned no rows for the requested span"));
    };

    let slack = i64::from(slack_days);
    let head_gap = (first.date - start).whole_days();
    let tail_gap = (end - last.date).whole_days();
    if head_gap > slack || tail_gap > slack {
        return Err(ProviderError::invalid_response(format!(
            "returned span {}..{} does not cover requested {}..{} within {} days",
            first.date, last.date, start, end, slack_days
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderErrorKind;
    use serde_json::json;
    use time::macros::date;

    fn symbol() -> Symbol {
        Symbol::parse("000001").expect("symbol")
    }

    #[test]
    fn chinese_columns_map_onto_every_field() {
        let mut table = RawTable::new(&[
            "日期", "开盘", "收盘", "最高", "最低", "成交量", "成交额", "振幅", "涨跌幅", "涨跌额", "换手率",
        ]);
        table.rows.push(
            "2023-01-03,13.20,13.77,13.85,13.05,2194128,2971110927.00,6.08,4.85,0.64,1.13"
                .split(',')
                .map(|cell| json!(cell))
                .collect(),
        );

        let points =
            normalize_table(&symbol(), &table, date!(2023 - 01 - 01), date!(2023 - 01 - 31))
                .expect("normalize");

        let point = &points[0];
        assert_eq!(point.date, date!(2023 - 01 - 03));
        assert_eq!(point.open, 13.20);
        assert_eq!(point.close, 13.77);
        assert_eq!(point.high, 13.85);
        assert_eq!(point.volume, 2_194_128);
        assert_eq!(point.pct_change, Some(4.85));
        assert_eq!(point.turnover_rate, Some(1.13));
    }

    #[test]
    fn derives_fields_from_previous_close_and_filters_span() {
        let mut table = RawTable::new(&["date", "open", "close", "high", "low", "volume"]);
        table.rows.push(vec![json!("20230103"), json!(10.0), json!(10.0), json!(10.5), json!(9.5), json!("100.00")]);
        table.rows.push(vec![json!("2023/01/04"), json!(10.0), json!(11.0), json!(11.5), json!(9.5), json!(200)]);
        table.rows.push(vec![json!("2023-01-05"), json!(11.0), json!(11.0), json!(11.0), json!(11.0), json!(300)]);

        let points =
            normalize_table(&symbol(), &table, date!(2023 - 01 - 04), date!(2023 - 01 - 04))
                .expect("normalize");

        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.change, Some(1.0));
        assert_eq!(point.pct_change, Some(10.0));
        assert_eq!(point.amplitude, Some(20.0));
        assert_eq!(point.turnover, None);
    }

    #[test]
    fn malformed_rows_are_dropped_not_fatal() {
        let mut table = RawTable::new(&["date", "open", "high", "low", "close", "volume"]);
        table.rows.push(vec![json!("not a date"), json!(1), json!(1), json!(1), json!(1), json!(1)]);
        table.rows.push(vec![json!("2023-01-03"), json!("-"), json!(1), json!(1), json!(1), json!(1)]);
        table.rows.push(vec![json!("2023-01-04"), json!(1), json!(1), json!(1), json!(1)]);
        table.rows.push(vec![json!("2023-01-05"), json!(1), json!(2), json!(1), json!(1.5), json!(1)]);

        let points =
            normalize_table(&symbol(), &table, date!(2023 - 01 - 01), date!(2023 - 01 - 31))
                .expect("normalize");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].date, date!(2023 - 01 - 05));
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let table = RawTable::new(&["date", "open", "close", "high", "low"]);
        let error = normalize_table(&symbol(), &table, date!(2023 - 01 - 01), date!(2023 - 01 - 31))
            .expect_err("volume is required");
        assert_eq!(error.kind(), ProviderErrorKind::InvalidResponse);
        assert!(error.message().contains("volume"));
    }

    #[test]
    fn span_validation_allows_boundary_slack() {
        let point = |date| {
            TimeSeriesPoint::new(symbol(), date, 1.0, 1.0, 1.0, 1.0, 1).expect("point")
        };
        let points = vec![point(date!(2023 - 01 - 03)), point(date!(2023 - 01 - 31))];

        assert!(validate_span(&points, date!(2023 - 01 - 01), date!(2023 - 02 - 05), 10).is_ok());
        assert!(validate_span(&points, date!(2022 - 12 - 01), date!(2023 - 01 - 31), 10).is_err());

        let empty = validate_span(&[], date!(2023 - 01 - 01), date!(2023 - 01 - 31), 10)
            .expect_err("empty must fail");
        assert_eq!(empty.kind(), ProviderErrorKind::Empty);
    }
}
