//! Scalar normalization
//!
//! Cell values leave the ingestion/query boundary as a small tagged union so
//! that reports serialize the same way no matter which polars dtype produced
//! the value.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Scalar>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Null or whitespace-only text
    pub fn is_blank(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn float(value: f64) -> Self {
        if value.is_nan() {
            Scalar::Null
        } else {
            Scalar::Float(value)
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Int(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
            Scalar::List(items) => {
                serde_json::Value::Array(items.iter().map(Scalar::to_json).collect())
            }
        }
    }

    /// Key used when counting distinct values; nulls form one class
    pub(crate) fn distinct_key(&self) -> String {
        match self {
            Scalar::Null => "n:".to_string(),
            Scalar::Bool(b) => format!("b:{}", b),
            Scalar::Int(i) => format!("i:{}", i),
            // 1 and 1.0 compare equal in the source frame
            Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("i:{}", *f as i64),
            Scalar::Float(f) => format!("f:{}", f),
            Scalar::Text(s) => format!("s:{}", s),
            Scalar::List(_) => format!("l:{}", self),
        }
    }
}

/// Textual form used by the type inferrer: integral floats keep a trailing
/// `.0` and booleans render as `True`/`False`, so `1.0` is never mistaken for
/// the boolean token `1`.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "None"),
            Scalar::Bool(true) => write!(f, "True"),
            Scalar::Bool(false) => write!(f, "False"),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{:.1}", v)
            }
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "{}", s),
            Scalar::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

/// Normalize one polars cell.
///
/// NaN and nulls become `Null`, the integer/float/boolean families collapse to
/// `Int`/`Float`/`Bool`, temporal values become their string form, lists are
/// converted element-wise and anything else is rendered as text.
pub fn normalize(value: &AnyValue) -> Scalar {
    match value {
        AnyValue::Null => Scalar::Null,
        AnyValue::Boolean(b) => Scalar::Bool(*b),
        AnyValue::Int8(v) => Scalar::Int(*v as i64),
        AnyValue::Int16(v) => Scalar::Int(*v as i64),
        AnyValue::Int32(v) => Scalar::Int(*v as i64),
        AnyValue::Int64(v) => Scalar::Int(*v),
        AnyValue::UInt8(v) => Scalar::Int(*v as i64),
        AnyValue::UInt16(v) => Scalar::Int(*v as i64),
        AnyValue::UInt32(v) => Scalar::Int(*v as i64),
        AnyValue::UInt64(v) => match i64::try_from(*v) {
            Ok(i) => Scalar::Int(i),
            Err(_) => Scalar::Float(*v as f64),
        },
        AnyValue::Float32(v) => Scalar::float(*v as f64),
        AnyValue::Float64(v) => Scalar::float(*v),
        AnyValue::String(s) => Scalar::Text(s.to_string()),
        AnyValue::StringOwned(s) => Scalar::Text(s.to_string()),
        AnyValue::Date(_) | AnyValue::Datetime(..) | AnyValue::Time(_) | AnyValue::Duration(..) => {
            Scalar::Text(value.to_string())
        }
        AnyValue::List(series) => Scalar::List(series_values(series)),
        other => Scalar::Text(other.to_string()),
    }
}

/// All values of a series, normalized
pub fn series_values(series: &Series) -> Vec<Scalar> {
    (0..series.len())
        .map(|idx| match series.get(idx) {
            Ok(value) => normalize(&value),
            Err(_) => Scalar::Null,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_numeric_families() {
        assert_eq!(normalize(&AnyValue::Int32(7)), Scalar::Int(7));
        assert_eq!(normalize(&AnyValue::UInt64(u64::MAX)), Scalar::Float(u64::MAX as f64));
        assert_eq!(normalize(&AnyValue::Float32(1.5)), Scalar::Float(1.5));
        assert_eq!(normalize(&AnyValue::Float64(f64::NAN)), Scalar::Null);
        assert_eq!(normalize(&AnyValue::Boolean(true)), Scalar::Bool(true));
        assert_eq!(normalize(&AnyValue::Null), Scalar::Null);
    }

    #[test]
    fn test_normalize_temporal_to_text() {
        // 2024-01-01 is 19723 days after the epoch
        assert_eq!(normalize(&AnyValue::Date(19723)), Scalar::Text("2024-01-01".to_string()));
    }

    #[test]
    fn test_normalize_list() {
        let inner = Series::new("x", &[1i64, 2, 3]);
        assert_eq!(
            normalize(&AnyValue::List(inner)),
            Scalar::List(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)])
        );
    }

    #[test]
    fn test_series_values_with_nulls() {
        let s = Series::new("amount", &[Some(1.0f64), None, Some(2.5)]);
        assert_eq!(
            series_values(&s),
            vec![Scalar::Float(1.0), Scalar::Null, Scalar::Float(2.5)]
        );
    }

    #[test]
    fn test_display_matches_inference_rendering() {
        assert_eq!(Scalar::Float(1.0).to_string(), "1.0");
        assert_eq!(Scalar::Float(2.25).to_string(), "2.25");
        assert_eq!(Scalar::Int(1).to_string(), "1");
        assert_eq!(Scalar::Bool(false).to_string(), "False");
    }

    #[test]
    fn test_serializes_untagged() {
        let values = vec![Scalar::Null, Scalar::Int(3), Scalar::Text("a".into()), Scalar::Bool(true)];
        assert_eq!(serde_json::to_string(&values).unwrap(), r#"[null,3,"a",true]"#);
        assert_eq!(Scalar::Float(f64::INFINITY).to_json(), serde_json::Value::Null);
    }
}
