//! Normalising raw evaluator output into per-metric score columns.
//!
//! Every backend returns JSON in its own shape. A [`ScoreExtractor`] turns
//! that into a [`ScoreMap`]: one column per [`Metric`], exactly one entry
//! per evaluated row, `None` where the evaluator gave nothing usable.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::Metric;

pub type ScoreMap = BTreeMap<Metric, Vec<Option<f64>>>;

/// A score in `[0, 1]`, or `None`.
///
/// Numbers and numeric strings are accepted. `null`, NaN, infinities,
/// out-of-range values and anything else map to `None`; nothing is
/// coerced to zero.
pub fn parse_optional_score(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (number.is_finite() && (0.0..=1.0).contains(&number)).then_some(number)
}

pub trait ScoreExtractor: Send + Sync {
    /// Columns for `rows` evaluated interactions, padded or cut to length.
    fn extract(&self, raw: &Value, rows: usize) -> ScoreMap;
}

/// An all-`None` map, used when the evaluator failed outright.
pub fn empty_scores(rows: usize) -> ScoreMap {
    Metric::ALL
        .into_iter()
        .map(|m| (m, vec![None; rows]))
        .collect()
}

fn fit(mut column: Vec<Option<f64>>, rows: usize) -> Vec<Option<f64>> {
    column.resize(rows, None);
    column
}

/// `{"faithfulness": [..], "answer_relevancy": [..]}`, optionally nested
/// under a `"scores"` key. Missing columns become all-`None`.
pub struct ColumnarExtractor;

impl ScoreExtractor for ColumnarExtractor {
    fn extract(&self, raw: &Value, rows: usize) -> ScoreMap {
        let root = raw.get("scores").unwrap_or(raw);
        Metric::ALL
            .into_iter()
            .map(|metric| {
                let column = root
                    .get(metric.as_str())
                    .and_then(Value::as_array)
                    .map(|values| values.iter().map(parse_optional_score).collect())
                    .unwrap_or_default();
                (metric, fit(column, rows))
            })
            .collect()
    }
}

/// `[{"faithfulness": .., "answer_relevancy": ..}, ..]`, one object per
/// row. Non-object rows contribute `None` for every metric.
pub struct RowExtractor;

impl ScoreExtractor for RowExtractor {
    fn extract(&self, raw: &Value, rows: usize) -> ScoreMap {
        let items = raw.as_array().map(Vec::as_slice).unwrap_or(&[]);
        Metric::ALL
            .into_iter()
            .map(|metric| {
                let column = items
                    .iter()
                    .map(|row| row.get(metric.as_str()).and_then(parse_optional_score))
                    .collect();
                (metric, fit(column, rows))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_optional_score() {
        assert_eq!(parse_optional_score(&json!(0.75)), Some(0.75));
        assert_eq!(parse_optional_score(&json!("0.5")), Some(0.5));
        assert_eq!(parse_optional_score(&json!(1)), Some(1.0));
        assert_eq!(parse_optional_score(&json!(null)), None);
        assert_eq!(parse_optional_score(&json!("n/a")), None);
        assert_eq!(parse_optional_score(&json!(1.2)), None);
        assert_eq!(parse_optional_score(&json!(-0.1)), None);
        assert_eq!(parse_optional_score(&json!("NaN")), None);
        assert_eq!(parse_optional_score(&json!({"v": 0.3})), None);
    }

    #[test]
    fn test_columnar_pads_and_tolerates_missing_columns() {
        let raw = json!({"faithfulness": [0.9, null, "0.7"]});
        let map = ColumnarExtractor.extract(&raw, 4);
        assert_eq!(
            map[&Metric::Faithfulness],
            vec![Some(0.9), None, Some(0.7), None]
        );
        assert_eq!(map[&Metric::AnswerRelevancy], vec![None; 4]);
    }

    #[test]
    fn test_columnar_nested_under_scores() {
        let raw = json!({"scores": {"answer_relevancy": [0.8, 0.6, 0.4]}});
        let map = ColumnarExtractor.extract(&raw, 2);
        assert_eq!(map[&Metric::AnswerRelevancy], vec![Some(0.8), Some(0.6)]);
    }

    #[test]
    fn test_row_extractor() {
        let raw = json!([
            {"faithfulness": 1.0, "answer_relevancy": 0.5},
            null,
            {"faithfulness": "bad"}
        ]);
        let map = RowExtractor.extract(&raw, 3);
        assert_eq!(map[&Metric::Faithfulness], vec![Some(1.0), None, None]);
        assert_eq!(map[&Metric::AnswerRelevancy], vec![Some(0.5), None, None]);
    }
}
