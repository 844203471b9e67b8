//! Column type inference and descriptive profiling
//!
//! The inferred kind is descriptive metadata only; the physical column types
//! come from the frame dtypes when the table is written.

use crate::scalar::{series_values, Scalar};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::Series;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Share of the non-null values a kind needs in order to win
const KIND_THRESHOLD: f64 = 0.8;

/// Sample values kept per column in an ingestion report
const PROFILE_SAMPLE_VALUES: usize = 5;

const BOOLEAN_TOKENS: [&str; 4] = ["true", "false", "0", "1"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%Y年%m月%d日",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Boolean,
    Number,
    Date,
    String,
}

/// Classify a column from its values.
///
/// Null and blank entries are dropped first; an empty remainder is `String`.
/// Then, in order, boolean, number and date each win when at least 80% of the
/// remaining values qualify.
pub fn infer_type(values: &[Scalar]) -> ColumnKind {
    let present: Vec<&Scalar> = values.iter().filter(|v| !v.is_blank()).collect();
    if present.is_empty() {
        return ColumnKind::String;
    }
    let total = present.len() as f64;
    let share = |count: usize| count as f64 / total >= KIND_THRESHOLD;

    let booleans = present.iter().filter(|v| is_boolean_like(v)).count();
    if share(booleans) {
        return ColumnKind::Boolean;
    }

    let numbers = present.iter().filter(|v| is_number_like(v)).count();
    if share(numbers) {
        return ColumnKind::Number;
    }

    let dates = present.iter().filter(|v| is_date_like(v)).count();
    if share(dates) {
        return ColumnKind::Date;
    }

    ColumnKind::String
}

fn is_boolean_like(value: &Scalar) -> bool {
    if matches!(value, Scalar::Bool(_)) {
        return true;
    }
    let text = value.to_string().to_lowercase();
    BOOLEAN_TOKENS.contains(&text.as_str())
}

fn is_number_like(value: &Scalar) -> bool {
    match value {
        Scalar::Int(_) | Scalar::Float(_) => true,
        Scalar::Bool(_) | Scalar::Null | Scalar::List(_) => false,
        Scalar::Text(s) => s.trim().parse::<f64>().is_ok(),
    }
}

fn is_date_like(value: &Scalar) -> bool {
    match value {
        Scalar::Text(s) => parse_date(s.trim()),
        _ => false,
    }
}

fn parse_date(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if DateTime::parse_from_rfc3339(text).is_ok() || DateTime::parse_from_rfc2822(text).is_ok() {
        return true;
    }
    if DATETIME_FORMATS
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(text, fmt).is_ok())
    {
        return true;
    }
    if DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(text, fmt).is_ok())
    {
        return true;
    }
    // Year-month only, e.g. 2024-03
    NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d").is_ok()
}

/// Descriptive statistics for one physical column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    pub nullable: bool,
    pub unique_values: usize,
    pub sample_values: Vec<Scalar>,
    pub comment_cn: Option<String>,
    pub original_name: Option<String>,
}

impl ColumnProfile {
    pub fn from_values(name: &str, values: &[Scalar]) -> Self {
        let non_null: Vec<&Scalar> = values.iter().filter(|v| !v.is_null()).collect();
        let distinct: HashSet<String> = values.iter().map(Scalar::distinct_key).collect();

        Self {
            name: name.to_string(),
            kind: infer_type(values),
            nullable: non_null.len() < values.len(),
            unique_values: distinct.len(),
            sample_values: non_null
                .into_iter()
                .take(PROFILE_SAMPLE_VALUES)
                .cloned()
                .collect(),
            comment_cn: None,
            original_name: None,
        }
    }

    pub fn from_series(series: &Series) -> Self {
        Self::from_values(series.name(), &series_values(series))
    }

    pub fn with_provenance(mut self, comment: Option<String>, original_name: Option<String>) -> Self {
        self.comment_cn = comment;
        self.original_name = original_name;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<Scalar> {
        values.iter().map(|v| Scalar::from(*v)).collect()
    }

    #[test]
    fn test_infer_type_examples() {
        assert_eq!(infer_type(&texts(&["1", "2", "3"])), ColumnKind::Number);
        assert_eq!(infer_type(&texts(&["2024-01-01", "2024-02-15"])), ColumnKind::Date);
        assert_eq!(infer_type(&texts(&["true", "0", "1"])), ColumnKind::Boolean);
        assert_eq!(infer_type(&texts(&["abc", "def"])), ColumnKind::String);
        assert_eq!(infer_type(&[]), ColumnKind::String);
        assert_eq!(infer_type(&[Scalar::Null, Scalar::from("  ")]), ColumnKind::String);
    }

    #[test]
    fn test_infer_type_threshold_is_inclusive() {
        // 4 of 5 = exactly 80%
        let values = texts(&["TRUE", "false", "1", "0", "maybe"]);
        assert_eq!(infer_type(&values), ColumnKind::Boolean);

        let values = texts(&["1.5", "2", "3e2", "x", "y"]);
        assert_eq!(infer_type(&values), ColumnKind::String);
    }

    #[test]
    fn test_infer_type_native_values() {
        assert_eq!(infer_type(&[Scalar::Bool(true), Scalar::Bool(false)]), ColumnKind::Boolean);
        assert_eq!(infer_type(&[Scalar::Int(0), Scalar::Int(1), Scalar::Null]), ColumnKind::Boolean);
        assert_eq!(infer_type(&[Scalar::Float(1.0), Scalar::Float(0.0)]), ColumnKind::Number);
        assert_eq!(infer_type(&[Scalar::Int(10), Scalar::Float(2.5)]), ColumnKind::Number);
    }

    #[test]
    fn test_infer_type_date_formats() {
        assert_eq!(
            infer_type(&texts(&["2024-01-01 10:00:00", "2024/02/15", "2024年3月1日"])),
            ColumnKind::Date
        );
        assert_eq!(infer_type(&texts(&["2024-03", "2024-04"])), ColumnKind::Date);
    }

    #[test]
    fn test_profile_counts_null_as_distinct_class() {
        let values = vec![
            Scalar::from("a"),
            Scalar::Null,
            Scalar::from("a"),
            Scalar::from("b"),
            Scalar::Null,
        ];
        let profile = ColumnProfile::from_values("code", &values);
        assert!(profile.nullable);
        assert_eq!(profile.unique_values, 3);
        assert_eq!(profile.sample_values, texts(&["a", "a", "b"]));
        assert_eq!(profile.kind, ColumnKind::String);
    }

    #[test]
    fn test_profile_caps_sample_values() {
        let values: Vec<Scalar> = (0..10).map(Scalar::Int).collect();
        let profile = ColumnProfile::from_values("n", &values);
        assert!(!profile.nullable);
        assert_eq!(profile.unique_values, 10);
        assert_eq!(profile.sample_values.len(), 5);
        assert_eq!(profile.kind, ColumnKind::Number);
    }

    #[test]
    fn test_profile_serializes_type_field() {
        let profile = ColumnProfile::from_values("flag", &[Scalar::Bool(true)])
            .with_provenance(Some("标记".to_string()), Some("标记".to_string()));
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["type"], "boolean");
        assert_eq!(json["comment_cn"], "标记");
    }
}
