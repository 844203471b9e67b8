//! Naming plans for uploaded tables
//!
//! A naming oracle (usually an LLM) may propose an English table name, a
//! Chinese display comment, per-column names/comments and sample questions.
//! Its output is untrusted: the plan is validated as a whole and any defect
//! discards it, so the pipeline falls back to local naming.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Sample questions stored per table
pub const MAX_SAMPLE_QUESTIONS: usize = 4;

/// Free-form completion service used to produce naming plans
#[async_trait]
pub trait NamingOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingColumn {
    pub source_name: String,
    pub column_name_en: String,
    pub column_comment_cn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingPlan {
    pub table_name_en: String,
    pub table_comment_cn: String,
    pub columns: Vec<NamingColumn>,
    #[serde(default)]
    pub sample_questions: Vec<String>,
}

/// Result of asking the oracle for a plan
#[derive(Debug, Clone, PartialEq)]
pub enum NamingOutcome {
    Plan(NamingPlan),
    Invalid(String),
    Absent,
}

impl NamingOutcome {
    pub fn into_plan(self) -> Option<NamingPlan> {
        match self {
            NamingOutcome::Plan(plan) => Some(plan),
            NamingOutcome::Invalid(_) | NamingOutcome::Absent => None,
        }
    }
}

/// Column suggestion keyed by the exact original header
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSuggestion {
    pub column_name_en: String,
    pub column_comment_cn: String,
}

impl NamingPlan {
    /// Suggestions with both a source and a target name; empty comments fall
    /// back to the source name.
    pub fn column_suggestions(&self) -> HashMap<String, ColumnSuggestion> {
        let mut suggestions = HashMap::new();
        for column in &self.columns {
            if column.source_name.is_empty() || column.column_name_en.is_empty() {
                continue;
            }
            let comment = if column.column_comment_cn.is_empty() {
                column.source_name.clone()
            } else {
                column.column_comment_cn.clone()
            };
            suggestions.insert(
                column.source_name.clone(),
                ColumnSuggestion {
                    column_name_en: column.column_name_en.clone(),
                    column_comment_cn: comment,
                },
            );
        }
        suggestions
    }
}

/// Ask the oracle for a naming plan.
///
/// Returns `Absent` without calling anything when no oracle is configured or
/// there are no columns. Oracle errors, timeouts and malformed output never
/// escape: they degrade to `Absent`/`Invalid`.
pub async fn propose_naming(
    oracle: Option<&dyn NamingOracle>,
    timeout: Duration,
    filename: &str,
    original_columns: &[String],
    sample_rows: &[Map<String, Value>],
) -> NamingOutcome {
    let oracle = match oracle {
        Some(oracle) if !original_columns.is_empty() => oracle,
        _ => return NamingOutcome::Absent,
    };

    let prompt = build_naming_prompt(filename, original_columns, sample_rows);
    let raw = match tokio::time::timeout(timeout, oracle.complete(&prompt)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            warn!("LLM naming fallback for {}: {}", filename, e);
            return NamingOutcome::Absent;
        }
        Err(_) => {
            warn!("LLM naming timed out after {:?} for {}", timeout, filename);
            return NamingOutcome::Absent;
        }
    };

    let outcome = parse_naming_plan(&raw);
    match &outcome {
        NamingOutcome::Plan(plan) => debug!("naming plan for {}: {:?}", filename, plan),
        NamingOutcome::Invalid(reason) => warn!("Discarding naming plan for {}: {}", filename, reason),
        NamingOutcome::Absent => {}
    }
    outcome
}

pub fn build_naming_prompt(
    filename: &str,
    original_columns: &[String],
    sample_rows: &[Map<String, Value>],
) -> String {
    let payload = json!({
        "filename": filename,
        "columns": original_columns,
        "sample_rows": sample_rows,
    });

    format!(
        r#"Generate a strict JSON naming plan for SQL table/columns.
JSON schema:
{{
  "table_name_en": "sales_orders",
  "table_comment_cn": "销售订单",
  "sample_questions": [
    "最近30天订单趋势如何？",
    "销售额最高的前10个产品是什么？",
    "按地区统计订单量分布",
    "复购率最高的客户是谁？"
  ],
  "columns": [
    {{
      "source_name": "原字段",
      "column_name_en": "order_id",
      "column_comment_cn": "订单编号"
    }}
  ]
}}
Rules:
1) table_name_en and column_name_en must match ^[a-zA-Z_][a-zA-Z0-9_]*$.
2) Keep semantic meaning.
3) sample_questions must contain exactly 4 practical analysis questions in Chinese.
4) Return JSON only.
Input: {}"#,
        payload
    )
}

/// Locate the first top-level `{...}` span, skipping braces inside strings.
///
/// Unbalanced input falls back to the span between the first `{` and the
/// last `}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse and validate raw oracle text into a plan
pub fn parse_naming_plan(raw: &str) -> NamingOutcome {
    let cleaned = raw.trim().replace("```json", "").replace("```", "");
    let Some(span) = extract_json_object(&cleaned) else {
        return NamingOutcome::Invalid("no JSON object in response".to_string());
    };
    let value: Value = match serde_json::from_str(span) {
        Ok(value) => value,
        Err(e) => return NamingOutcome::Invalid(format!("malformed JSON: {}", e)),
    };
    match validate_plan(&value) {
        Ok(plan) => NamingOutcome::Plan(plan),
        Err(reason) => NamingOutcome::Invalid(reason),
    }
}

fn validate_plan(value: &Value) -> std::result::Result<NamingPlan, String> {
    let object = value.as_object().ok_or("plan is not a JSON object")?;

    let table_name_en = object
        .get("table_name_en")
        .and_then(Value::as_str)
        .ok_or("table_name_en must be a string")?;
    let table_comment_cn = object
        .get("table_comment_cn")
        .and_then(Value::as_str)
        .ok_or("table_comment_cn must be a string")?;
    let columns = object
        .get("columns")
        .and_then(Value::as_array)
        .ok_or("columns must be a list")?;

    let sample_questions = match object.get("sample_questions") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| value_text(Some(item)).trim().to_string())
            .filter(|q| !q.is_empty())
            .collect(),
        Some(_) => return Err("sample_questions must be a list".to_string()),
    };

    let mut planned_columns = Vec::with_capacity(columns.len());
    for (idx, item) in columns.iter().enumerate() {
        let entry = item
            .as_object()
            .ok_or_else(|| format!("columns[{}] is not an object", idx))?;
        planned_columns.push(NamingColumn {
            source_name: value_text(entry.get("source_name")),
            column_name_en: value_text(entry.get("column_name_en")),
            column_comment_cn: value_text(entry.get("column_comment_cn")),
        });
    }

    Ok(NamingPlan {
        table_name_en: table_name_en.to_string(),
        table_comment_cn: table_comment_cn.to_string(),
        columns: planned_columns,
        sample_questions,
    })
}

fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// The four templated questions used when the oracle gives fewer than four
pub fn default_sample_questions(table_comment: &str, original_columns: &[String]) -> Vec<String> {
    let focus_columns = if original_columns.is_empty() {
        "主要字段".to_string()
    } else {
        original_columns
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("、")
    };

    vec![
        format!("{}一共有多少条数据？", table_comment),
        format!("{}最近30天的趋势如何？", table_comment),
        format!("按{}分组统计，Top 10 是什么？", focus_columns),
        format!("{}里是否有异常值或缺失值？", table_comment),
    ]
}

/// Plan questions first, padded with the defaults to exactly four
pub fn resolve_sample_questions(
    plan: Option<&NamingPlan>,
    table_comment: &str,
    original_columns: &[String],
) -> Vec<String> {
    let mut questions: Vec<String> = plan
        .map(|p| p.sample_questions.iter().take(MAX_SAMPLE_QUESTIONS).cloned().collect())
        .unwrap_or_default();

    if questions.len() < MAX_SAMPLE_QUESTIONS {
        questions.extend(default_sample_questions(table_comment, original_columns));
        questions.truncate(MAX_SAMPLE_QUESTIONS);
    }
    questions
}
