//! Calendar-date parsing and formatting.
//!
//! Providers disagree on date spelling; everything collapses to
//! `YYYY-MM-DD` once inside the crate.

use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::ValidationError;

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const COMPACT_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year][month][day]");

const DATE_FORMATS: [&[BorrowedFormatItem<'static>]; 4] = [
    ISO_DATE,
    COMPACT_DATE,
    format_description!("[year]/[month padding:none]/[day padding:none]"),
    format_description!("[year]-[month padding:none]-[day padding:none]"),
];

const LOCAL_TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Parse `YYYY-MM-DD`, `YYYYMMDD`, `YYYY/MM/DD`, or a timestamp
/// (RFC 3339 or `YYYY-MM-DD hh:mm:ss`; the date part is kept).
pub fn parse_date(input: &str) -> Result<Date, ValidationError> {
    let trimmed = input.trim();

    DATE_FORMATS
        .iter()
        .find_map(|format| Date::parse(trimmed, *format).ok())
        .or_else(|| {
            OffsetDateTime::parse(trimmed, &Rfc3339)
                .ok()
                .map(OffsetDateTime::date)
        })
        .or_else(|| {
            PrimitiveDateTime::parse(trimmed, LOCAL_TIMESTAMP)
                .ok()
                .map(PrimitiveDateTime::date)
        })
        .ok_or_else(|| ValidationError::InvalidDate {
            value: input.to_string(),
        })
}

/// Canonical `YYYY-MM-DD` rendering.
pub fn format_date(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
}

/// Compact `YYYYMMDD` rendering used in provider query strings.
pub fn compact_date(date: Date) -> String {
    date.format(COMPACT_DATE)
        .unwrap_or_else(|_| date.to_string().replace('-', ""))
}

/// Serde adapter storing `Date` as `YYYY-MM-DD`.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn accepted_formats_collapse_to_one_date() {
        let expected = date!(2023 - 01 - 03);
        for input in [
            "2023-01-03",
            "20230103",
            "2023/01/03",
            "2023/1/3",
            "2023-01-03T00:00:00Z",
            "2023-01-03T09:30:00+08:00",
            "2023-01-03 15:00:00",
            " 2023-01-03 ",
        ] {
            assert_eq!(parse_date(input).expect("date should parse"), expected, "{input}");
        }
        assert_eq!(format_date(expected), "2023-01-03");
        assert_eq!(compact_date(expected), "20230103");
    }

    #[test]
    fn rejects_impossible_dates() {
        for input in ["", "2023-02-30", "2023-13-01", "yesterday", "2023-01", "2023-01-03x"] {
            assert!(parse_date(input).is_err(), "{input}");
        }
    }

    #[test]
    fn serde_adapter_uses_canonical_spelling() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Row {
            #[serde(with = "iso_date")]
            day: Date,
        }

        let row: Row = serde_json::from_str(r#"{"day":"20230103"}"#).expect("compact date");
        assert_eq!(row.day, date!(2023 - 01 - 03));
        assert_eq!(
            serde_json::to_string(&row).expect("serialize"),
            r#"{"day":"2023-01-03"}"#
        );
    }
}
