//! The value model carried across the HTTP boundary.

use crate::error::CodecError;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A value that can cross the wire, a superset of JSON.
///
/// Everything plain JSON can express maps onto `Null`, `Bool`, `Number`,
/// `String`, `Array` and `Object`. The remaining variants survive a round
/// trip through [`crate::codec::encode`] and [`crate::codec::decode`] thanks to
/// the type annotations in the envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WireValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Date(DateTime<Utc>),
    RegExp { source: String, flags: String },
    Array(Vec<WireValue>),
    Set(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
    Object(BTreeMap<String, WireValue>),
}

impl WireValue {
    /// Build an object from key/value pairs. Later duplicates win.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, WireValue)>,
        K: Into<String>,
    {
        WireValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Empty object, the argument value of a call without parameters.
    pub fn empty_object() -> Self {
        WireValue::Object(BTreeMap::new())
    }

    /// Look up a property of an object. `None` for any other variant.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        match self {
            WireValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            WireValue::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, WireValue>> {
        match self {
            WireValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, WireValue::Undefined)
    }

    /// Lossy conversion to plain JSON.
    ///
    /// Dates become RFC 3339 strings, sets become arrays, maps become arrays
    /// of `[key, value]` pairs, big integers become decimal strings, regular
    /// expressions become `/source/flags` and undefined or non-finite numbers
    /// become `null`. Use the codec instead when the type must survive.
    pub fn to_json(&self) -> JsonValue {
        match self {
            WireValue::Undefined | WireValue::Null => JsonValue::Null,
            WireValue::Bool(b) => JsonValue::Bool(*b),
            WireValue::Number(n) => number_to_json(*n),
            WireValue::BigInt(n) => JsonValue::String(n.to_string()),
            WireValue::String(s) => JsonValue::String(s.clone()),
            WireValue::Date(d) => JsonValue::String(format_date(d)),
            WireValue::RegExp { source, flags } => {
                JsonValue::String(format_regexp(source, flags))
            }
            WireValue::Array(items) | WireValue::Set(items) => {
                JsonValue::Array(items.iter().map(WireValue::to_json).collect())
            }
            WireValue::Map(entries) => JsonValue::Array(
                entries
                    .iter()
                    .map(|(k, v)| JsonValue::Array(vec![k.to_json(), v.to_json()]))
                    .collect(),
            ),
            WireValue::Object(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert any serializable Rust value.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        Ok(WireValue::from(serde_json::to_value(value)?))
    }

    /// Deserialize into a Rust type through the lossy JSON view.
    ///
    /// Dates arrive as RFC 3339 strings, which `chrono`'s serde support reads
    /// back into `DateTime<Utc>` fields.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

/// Finite whole numbers are written as JSON integers, like JavaScript does.
pub(crate) fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

/// Text for the numbers JSON cannot carry: NaN, the infinities and `-0`.
pub(crate) fn special_number_text(n: f64) -> Option<&'static str> {
    if n.is_nan() {
        Some("NaN")
    } else if n == f64::INFINITY {
        Some("Infinity")
    } else if n == f64::NEG_INFINITY {
        Some("-Infinity")
    } else if n == 0.0 && n.is_sign_negative() {
        Some("-0")
    } else {
        None
    }
}

/// RFC 3339, with the signed six-digit year of ISO 8601 (as JavaScript's
/// `toISOString` writes it) outside years 0 to 9999.
pub(crate) fn format_date(date: &DateTime<Utc>) -> String {
    let year = date.year();
    if (0..=9999).contains(&year) {
        return date.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    }
    // 2000 is a leap year, so every month and day fit.
    match date.with_year(2000) {
        Some(shifted) => {
            let text = shifted.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            let sign = if year < 0 { '-' } else { '+' };
            format!("{}{:06}{}", sign, year.unsigned_abs(), &text[4..])
        }
        None => date.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    }
}

/// Inverse of [`format_date`]. Accepts any RFC 3339 offset.
pub(crate) fn parse_date(text: &str) -> Result<DateTime<Utc>, String> {
    let Some((year, rest)) = split_extended_year(text) else {
        return DateTime::parse_from_rfc3339(text)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| e.to_string());
    };
    DateTime::parse_from_rfc3339(&format!("2000{}", rest))
        .map_err(|e| e.to_string())?
        .with_year(year)
        .map(|d| d.with_timezone(&Utc))
        .ok_or_else(|| format!("year {} is out of range", year))
}

fn split_extended_year(text: &str) -> Option<(i32, &str)> {
    let sign = match text.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = text.get(1..7)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((sign * digits.parse::<i32>().ok()?, &text[7..]))
}

pub(crate) fn format_regexp(source: &str, flags: &str) -> String {
    format!("/{}/{}", source, flags)
}

impl From<JsonValue> for WireValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => WireValue::Null,
            JsonValue::Bool(b) => WireValue::Bool(b),
            JsonValue::Number(n) => WireValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => WireValue::String(s),
            JsonValue::Array(items) => {
                WireValue::Array(items.into_iter().map(WireValue::from).collect())
            }
            JsonValue::Object(map) => WireValue::Object(
                map.into_iter().map(|(k, v)| (k, WireValue::from(v))).collect(),
            ),
        }
    }
}

impl From<bool> for WireValue {
    fn from(value: bool) -> Self {
        WireValue::Bool(value)
    }
}

impl From<f64> for WireValue {
    fn from(value: f64) -> Self {
        WireValue::Number(value)
    }
}

impl From<i32> for WireValue {
    fn from(value: i32) -> Self {
        WireValue::Number(f64::from(value))
    }
}

impl From<u32> for WireValue {
    fn from(value: u32) -> Self {
        WireValue::Number(f64::from(value))
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::String(value.to_string())
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::String(value)
    }
}

impl From<DateTime<Utc>> for WireValue {
    fn from(value: DateTime<Utc>) -> Self {
        WireValue::Date(value)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(value: Vec<WireValue>) -> Self {
        WireValue::Array(value)
    }
}

impl<T: Into<WireValue>> From<Option<T>> for WireValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(WireValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_from_json() {
        let value = WireValue::from(json!({"a": 1, "b": ["x", null, true]}));
        assert_eq!(value.get("a"), Some(&WireValue::Number(1.0)));
        assert_eq!(
            value.get("b"),
            Some(&WireValue::Array(vec![
                WireValue::from("x"),
                WireValue::Null,
                WireValue::Bool(true)
            ]))
        );
    }

    #[test]
    fn test_to_json_is_lossy() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let value = WireValue::object([
            ("when", WireValue::Date(date)),
            ("gone", WireValue::Undefined),
            ("tags", WireValue::Set(vec!["a".into()])),
            ("big", WireValue::BigInt(12345678901234567890)),
        ]);
        assert_eq!(
            value.to_json(),
            json!({
                "when": "2024-05-01T12:00:00Z",
                "gone": null,
                "tags": ["a"],
                "big": "12345678901234567890"
            })
        );
    }

    #[test]
    fn test_whole_numbers_are_integers() {
        assert_eq!(number_to_json(3.0).to_string(), "3");
        assert_eq!(number_to_json(3.5).to_string(), "3.5");
        assert_eq!(number_to_json(f64::NAN), JsonValue::Null);
    }

    #[test]
    fn test_special_number_text() {
        assert_eq!(special_number_text(-0.0), Some("-0"));
        assert_eq!(special_number_text(0.0), None);
        assert_eq!(special_number_text(f64::NEG_INFINITY), Some("-Infinity"));
        assert_eq!(special_number_text(1.5), None);
    }

    #[test]
    fn test_dates_outside_four_digit_years() {
        let far = Utc.with_ymd_and_hms(12000, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_date(&far), "+012000-03-04T05:06:07Z");
        assert_eq!(parse_date("+012000-03-04T05:06:07Z"), Ok(far));

        let ancient = Utc.with_ymd_and_hms(-271, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(format_date(&ancient), "-000271-02-01T00:00:00Z");
        assert_eq!(parse_date(&format_date(&ancient)), Ok(ancient));

        // The offset is applied after the year, so the day can roll back.
        assert_eq!(
            parse_date("+012000-01-01T00:30:00+01:00"),
            Ok(Utc.with_ymd_and_hms(11999, 12, 31, 23, 30, 0).unwrap())
        );
        assert!(parse_date("+012000-02-29T00:00:00Z").is_err());
    }

    #[test]
    fn test_typed_round_trip_through_serde() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Todo {
            title: String,
            done: bool,
            due: DateTime<Utc>,
        }

        let todo = Todo {
            title: "write tests".into(),
            done: false,
            due: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        let wire = WireValue::from_serializable(&todo).unwrap();
        assert_eq!(wire.get("title").and_then(WireValue::as_str), Some("write tests"));

        let with_date = WireValue::object([
            ("title", WireValue::from("write tests")),
            ("done", WireValue::Bool(false)),
            ("due", WireValue::Date(todo.due)),
        ]);
        let back: Todo = with_date.deserialize().unwrap();
        assert_eq!(back, todo);
    }
}
