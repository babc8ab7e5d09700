//! Condition evaluation against an [`IndicatorTable`].

use thiserror::Error;

use super::document::{CompareOp, Comparison, Condition, IndicatorRef, Operand};
use super::table::IndicatorTable;

/// Tolerance for `eq`.
pub const EQ_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("indicator `{indicator_id}` field `{field}` has no value")]
    MissingValue { indicator_id: String, field: String },
    #[error("`between` needs a {{min, max}} right operand")]
    BetweenWithoutRange,
    #[error("`{0:?}` cannot compare against a range")]
    RangeWithScalarOp(CompareOp),
}

fn lookup(table: &IndicatorTable, r: &IndicatorRef) -> Result<f64, ConditionError> {
    table
        .get(&r.indicator_id, &r.field)
        .ok_or_else(|| ConditionError::MissingValue {
            indicator_id: r.indicator_id.clone(),
            field: r.field.clone(),
        })
}

/// Evaluate a condition tree. `all: []` is true, `any: []` is false.
///
/// Groups short-circuit, so a missing value only errors if it is reached.
pub fn evaluate(condition: &Condition, table: &IndicatorTable) -> Result<bool, ConditionError> {
    match condition {
        Condition::All { all } => {
            for c in all {
                if !evaluate(c, table)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Any { any } => {
            for c in any {
                if evaluate(c, table)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Compare(cmp) => compare(cmp, table),
    }
}

fn compare(cmp: &Comparison, table: &IndicatorTable) -> Result<bool, ConditionError> {
    let left = lookup(table, &cmp.left)?;
    match (&cmp.right, cmp.op) {
        (Operand::Range { min, max }, CompareOp::Between) => Ok(left >= *min && left <= *max),
        (Operand::Range { .. }, op) => Err(ConditionError::RangeWithScalarOp(op)),
        (_, CompareOp::Between) => Err(ConditionError::BetweenWithoutRange),
        (Operand::Value { value }, op) => Ok(apply(op, left, *value)),
        (Operand::Indicator(r), op) => Ok(apply(op, left, lookup(table, r)?)),
    }
}

fn apply(op: CompareOp, left: f64, right: f64) -> bool {
    match op {
        CompareOp::Gt => left > right,
        CompareOp::Lt => left < right,
        CompareOp::Gte => left >= right,
        CompareOp::Lte => left <= right,
        CompareOp::Eq => (left - right).abs() <= EQ_EPSILON,
        CompareOp::Between => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{keys, FeatureSnapshot};
    use crate::rules::document::IndicatorDef;
    use chrono::{TimeZone, Utc};

    fn table() -> IndicatorTable {
        let catalog = vec![
            IndicatorDef {
                id: "rsi".into(),
                kind: "rsi".into(),
                params: Default::default(),
            },
            IndicatorDef {
                id: "ema_fast".into(),
                kind: "ema".into(),
                params: [("period".to_string(), 20.0)].into_iter().collect(),
            },
            IndicatorDef {
                id: "ema_slow".into(),
                kind: "ema".into(),
                params: [("period".to_string(), 50.0)].into_iter().collect(),
            },
        ];
        let snap = FeatureSnapshot::new(Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap(), 1.0, 1.0, 1.0, 1.0, 0.0)
            .with(keys::RSI, 30.0)
            .with(keys::EMA_FAST, 105.0)
            .with(keys::EMA_SLOW, 100.0);
        IndicatorTable::build(&catalog, &snap)
    }

    fn leaf(json: &str) -> Condition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn scalar_ops() {
        let t = table();
        assert!(evaluate(&leaf(r#"{"left":{"indicator_id":"rsi"},"op":"lt","right":{"value":35}}"#), &t).unwrap());
        assert!(evaluate(&leaf(r#"{"left":{"indicator_id":"rsi"},"op":"gte","right":{"value":30}}"#), &t).unwrap());
        assert!(evaluate(&leaf(r#"{"left":{"indicator_id":"rsi"},"op":"eq","right":{"value":30}}"#), &t).unwrap());
        assert!(!evaluate(&leaf(r#"{"left":{"indicator_id":"rsi"},"op":"gt","right":{"value":30}}"#), &t).unwrap());
    }

    #[test]
    fn indicator_vs_indicator() {
        let t = table();
        let c = leaf(
            r#"{"left":{"indicator_id":"ema_fast"},"op":"gt","right":{"indicator_id":"ema_slow","field":"value"}}"#,
        );
        assert!(evaluate(&c, &t).unwrap());
    }

    #[test]
    fn between_is_inclusive() {
        let t = table();
        let c = leaf(r#"{"left":{"indicator_id":"rsi"},"op":"between","right":{"min":30,"max":40}}"#);
        assert!(evaluate(&c, &t).unwrap());
        let bad = leaf(r#"{"left":{"indicator_id":"rsi"},"op":"between","right":{"value":30}}"#);
        assert_eq!(evaluate(&bad, &t), Err(ConditionError::BetweenWithoutRange));
    }

    #[test]
    fn groups_and_short_circuit() {
        let t = table();
        let any = leaf(
            r#"{"any":[
                {"left":{"indicator_id":"rsi"},"op":"lt","right":{"value":50}},
                {"left":{"indicator_id":"missing"},"op":"gt","right":{"value":1}}
            ]}"#,
        );
        assert!(evaluate(&any, &t).unwrap());
        let all = leaf(
            r#"{"all":[
                {"left":{"indicator_id":"rsi"},"op":"lt","right":{"value":50}},
                {"left":{"indicator_id":"missing"},"op":"gt","right":{"value":1}}
            ]}"#,
        );
        assert!(matches!(evaluate(&all, &t), Err(ConditionError::MissingValue { .. })));
        assert!(evaluate(&Condition::All { all: vec![] }, &t).unwrap());
        assert!(!evaluate(&Condition::Any { any: vec![] }, &t).unwrap());
    }
}
