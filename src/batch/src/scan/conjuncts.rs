// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Normalizes a flat conjunction over tuple slots into per-key-column value
//! ranges, IS NULL conditions, pushdown filters, and the residual predicates
//! the scanner re-checks row by row.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use shale_common::catalog::TableDesc;
use shale_common::row::Row;
use shale_common::types::{LogicalType, ScalarImpl};

use super::value_range::{
    ColumnValueRange, ColumnValueRangeImpl, PushdownFilter, PushdownOp,
};
use crate::error::{ScanError, ScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub type RowPredicateFn = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// One member of the scan's conjunction.
#[derive(Clone)]
pub enum Conjunct {
    Binary {
        column: String,
        op: BinaryOp,
        literal: ScalarImpl,
    },
    InList {
        column: String,
        values: Vec<ScalarImpl>,
    },
    IsNull {
        column: String,
    },
    Like {
        column: String,
        pattern: String,
    },
    /// An opaque predicate the planner could not express structurally; it
    /// always stays residual.
    Custom {
        vectorizable: bool,
        predicate: RowPredicateFn,
    },
}

impl fmt::Debug for Conjunct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary {
                column,
                op,
                literal,
            } => write!(f, "Binary({column} {op:?} {literal})"),
            Self::InList { column, values } => write!(f, "InList({column}, {values:?})"),
            Self::IsNull { column } => write!(f, "IsNull({column})"),
            Self::Like { column, pattern } => write!(f, "Like({column}, {pattern:?})"),
            Self::Custom { vectorizable, .. } => write!(f, "Custom(vectorizable={vectorizable})"),
        }
    }
}

impl Conjunct {
    /// Evaluates this conjunct against one decoded row. NULL fails every
    /// shape except `IS NULL`.
    pub fn evaluate(&self, row: &Row, table: &TableDesc) -> bool {
        let datum_of = |column: &str| table.column_ordinal(column).map(|i| row.datum(i));
        match self {
            Self::Binary {
                column,
                op,
                literal,
            } => match datum_of(column) {
                Some(Some(value)) => match op {
                    BinaryOp::Eq => value == literal,
                    BinaryOp::Ne => value != literal,
                    BinaryOp::Lt => value < literal,
                    BinaryOp::Le => value <= literal,
                    BinaryOp::Gt => value > literal,
                    BinaryOp::Ge => value >= literal,
                },
                _ => false,
            },
            Self::InList { column, values } => match datum_of(column) {
                Some(Some(value)) => values.contains(value),
                _ => false,
            },
            Self::IsNull { column } => matches!(datum_of(column), Some(None)),
            Self::Like { column, pattern } => match datum_of(column) {
                Some(Some(ScalarImpl::Utf8(value))) => like_match(pattern, value),
                _ => false,
            },
            Self::Custom { predicate, .. } => predicate(row),
        }
    }
}

/// SQL LIKE with `%` (any sequence) and `_` (one character).
pub fn like_match(pattern: &str, input: &str) -> bool {
    fn rec(pattern: &[char], input: &[char]) -> bool {
        match pattern.first() {
            None => input.is_empty(),
            Some('%') => (0..=input.len()).any(|i| rec(&pattern[1..], &input[i..])),
            Some('_') => !input.is_empty() && rec(&pattern[1..], &input[1..]),
            Some(&c) => input.first() == Some(&c) && rec(&pattern[1..], &input[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let input: Vec<char> = input.chars().collect();
    rec(&pattern, &input)
}

/// The normalizer's verdict on one conjunction.
#[derive(Debug, Default)]
pub struct NormalizedConjuncts {
    /// One range per referenced key column.
    pub column_ranges: BTreeMap<String, ColumnValueRangeImpl>,
    /// Columns constrained to be NULL.
    pub null_columns: Vec<String>,
    /// Wire-level filters handed to the storage layer.
    pub pushdown_filters: Vec<PushdownFilter>,
    /// Residuals a vectorized evaluator could run per batch.
    pub vectorized_residuals: Vec<Conjunct>,
    /// Residuals that need row-at-a-time evaluation.
    pub row_residuals: Vec<Conjunct>,
}

impl NormalizedConjuncts {
    /// Any contradiction makes the whole scan trivially empty.
    pub fn has_empty_range(&self) -> bool {
        self.column_ranges
            .values()
            .any(|r| r.is_empty_value_range())
    }

    pub fn all_residuals(&self) -> impl Iterator<Item = &Conjunct> {
        self.vectorized_residuals
            .iter()
            .chain(self.row_residuals.iter())
    }
}

/// How a literal lands in the value domain of a slot after coercion.
enum Coerced {
    Value(ScalarImpl),
    /// The literal is below every value of the slot's type.
    BelowMin,
    /// The literal is above every value of the slot's type.
    AboveMax,
}

fn integer_domain(ty: LogicalType) -> Option<(i128, i128)> {
    let domain = match ty {
        LogicalType::TinyInt => (i8::MIN as i128, i8::MAX as i128),
        LogicalType::UnsignedTinyInt => (0, u8::MAX as i128),
        LogicalType::SmallInt => (i16::MIN as i128, i16::MAX as i128),
        LogicalType::UnsignedSmallInt => (0, u16::MAX as i128),
        LogicalType::Int => (i32::MIN as i128, i32::MAX as i128),
        LogicalType::UnsignedInt => (0, u32::MAX as i128),
        LogicalType::BigInt => (i64::MIN as i128, i64::MAX as i128),
        LogicalType::UnsignedBigInt => (0, u64::MAX as i128),
        LogicalType::LargeInt => (i128::MIN, i128::MAX),
        _ => return None,
    };
    Some(domain)
}

fn integer_scalar(ty: LogicalType, value: i128) -> ScalarImpl {
    match ty {
        LogicalType::TinyInt => ScalarImpl::Int8(value as i8),
        LogicalType::UnsignedTinyInt => ScalarImpl::UInt8(value as u8),
        LogicalType::SmallInt => ScalarImpl::Int16(value as i16),
        LogicalType::UnsignedSmallInt => ScalarImpl::UInt16(value as u16),
        LogicalType::Int => ScalarImpl::Int32(value as i32),
        LogicalType::UnsignedInt => ScalarImpl::UInt32(value as u32),
        LogicalType::BigInt => ScalarImpl::Int64(value as i64),
        LogicalType::UnsignedBigInt => ScalarImpl::UInt64(value as u64),
        LogicalType::LargeInt => ScalarImpl::Int128(value),
        _ => unreachable!("not an integer type"),
    }
}

/// Coerces a literal into a slot's domain. Integer literals widen freely;
/// a literal outside a narrower slot's domain clamps to `BelowMin` or
/// `AboveMax` so the caller can truncate the *range*, never the literal.
fn coerce_literal(literal: &ScalarImpl, ty: LogicalType) -> ScanResult<Coerced> {
    if let Some((min, max)) = integer_domain(ty) {
        let value = literal.as_integral().ok_or_else(|| {
            ScanError::Plan(format!("literal {literal} is not an integer"))
        })?;
        return Ok(if value < min {
            Coerced::BelowMin
        } else if value > max {
            Coerced::AboveMax
        } else {
            Coerced::Value(integer_scalar(ty, value))
        });
    }
    let coerced = match (ty, literal) {
        (LogicalType::Float, ScalarImpl::Float32(_)) => literal.clone(),
        (LogicalType::Float, ScalarImpl::Float64(v)) => ScalarImpl::Float32(*v as f32),
        (LogicalType::Double | LogicalType::DiscreteDouble, ScalarImpl::Float64(_)) => {
            literal.clone()
        }
        (LogicalType::Double | LogicalType::DiscreteDouble, ScalarImpl::Float32(v)) => {
            ScalarImpl::Float64(*v as f64)
        }
        (LogicalType::Date, ScalarImpl::Date(_)) => literal.clone(),
        (LogicalType::DateTime, ScalarImpl::DateTime(_)) => literal.clone(),
        (LogicalType::Decimal { .. }, ScalarImpl::Decimal(_)) => literal.clone(),
        (
            LogicalType::Char { .. } | LogicalType::Varchar { .. } | LogicalType::Hll,
            ScalarImpl::Utf8(_),
        ) => literal.clone(),
        _ => {
            return Err(ScanError::Plan(format!(
                "literal {literal} mismatches column type {ty:?}"
            )))
        }
    };
    Ok(Coerced::Value(coerced))
}

/// A fresh full range in the element type matching `ty`.
fn new_range(column: &str, ty: LogicalType) -> Option<ColumnValueRangeImpl> {
    let range = match ty {
        LogicalType::TinyInt => ColumnValueRangeImpl::Int8(ColumnValueRange::new(column)),
        LogicalType::UnsignedTinyInt => ColumnValueRangeImpl::UInt8(ColumnValueRange::new(column)),
        LogicalType::SmallInt => ColumnValueRangeImpl::Int16(ColumnValueRange::new(column)),
        LogicalType::UnsignedSmallInt => {
            ColumnValueRangeImpl::UInt16(ColumnValueRange::new(column))
        }
        LogicalType::Int => ColumnValueRangeImpl::Int32(ColumnValueRange::new(column)),
        LogicalType::UnsignedInt => ColumnValueRangeImpl::UInt32(ColumnValueRange::new(column)),
        LogicalType::BigInt => ColumnValueRangeImpl::Int64(ColumnValueRange::new(column)),
        LogicalType::UnsignedBigInt => ColumnValueRangeImpl::UInt64(ColumnValueRange::new(column)),
        LogicalType::LargeInt => ColumnValueRangeImpl::Int128(ColumnValueRange::new(column)),
        LogicalType::Float => ColumnValueRangeImpl::Float32(ColumnValueRange::new(column)),
        LogicalType::Double | LogicalType::DiscreteDouble => {
            ColumnValueRangeImpl::Float64(ColumnValueRange::new(column))
        }
        LogicalType::Date => ColumnValueRangeImpl::Date(ColumnValueRange::new(column)),
        LogicalType::DateTime => ColumnValueRangeImpl::DateTime(ColumnValueRange::new(column)),
        LogicalType::Decimal { .. } => {
            ColumnValueRangeImpl::Decimal(ColumnValueRange::new(column))
        }
        LogicalType::Char { .. } | LogicalType::Varchar { .. } | LogicalType::Hll => {
            ColumnValueRangeImpl::Utf8(ColumnValueRange::new(column))
        }
        LogicalType::Struct | LogicalType::List | LogicalType::Map => return None,
    };
    Some(range)
}

/// Turns one conjunction into ranges, null conditions, pushdown filters and
/// residuals. Running it twice over the same input yields identical output.
pub fn normalize_conjuncts(
    table: &TableDesc,
    conjuncts: &[Conjunct],
) -> ScanResult<NormalizedConjuncts> {
    let mut normalized = NormalizedConjuncts::default();

    for conjunct in conjuncts {
        match conjunct {
            Conjunct::Binary {
                column,
                op,
                literal,
            } => {
                if !normalize_binary(&mut normalized, table, column, *op, literal)? {
                    normalized.vectorized_residuals.push(conjunct.clone());
                }
            }
            Conjunct::InList { column, values } => {
                if !normalize_in_list(&mut normalized, table, column, values)? {
                    normalized.vectorized_residuals.push(conjunct.clone());
                }
            }
            Conjunct::IsNull { column } => {
                normalized.null_columns.push(column.clone());
                normalized.pushdown_filters.push(PushdownFilter {
                    column: column.clone(),
                    op: PushdownOp::IsNull,
                    operands: vec![],
                });
            }
            Conjunct::Like { .. } => {
                normalized.row_residuals.push(conjunct.clone());
            }
            Conjunct::Custom { vectorizable, .. } => {
                if *vectorizable {
                    normalized.vectorized_residuals.push(conjunct.clone());
                } else {
                    normalized.row_residuals.push(conjunct.clone());
                }
            }
        }
    }

    for range in normalized.column_ranges.values() {
        normalized
            .pushdown_filters
            .extend(range.to_pushdown_filters());
    }
    Ok(normalized)
}

/// Returns whether the predicate was absorbed (range or pushdown filter);
/// `false` leaves it to the caller as a residual.
fn normalize_binary(
    normalized: &mut NormalizedConjuncts,
    table: &TableDesc,
    column: &str,
    op: BinaryOp,
    literal: &ScalarImpl,
) -> ScanResult<bool> {
    let Some(ordinal) = table.column_ordinal(column) else {
        return Err(ScanError::Plan(format!("unknown column {column}")));
    };
    let ty = table.column(ordinal).logical_type;
    if table.key_position(column).is_none() {
        return Ok(false);
    }
    let Some(fresh) = new_range(column, ty) else {
        return Ok(false);
    };
    let coerced = coerce_literal(literal, ty)?;

    // `!=` is not a single interval; it is pushed down as-is and re-checked
    // as a residual.
    if op == BinaryOp::Ne {
        if let Coerced::Value(value) = coerced {
            normalized.pushdown_filters.push(PushdownFilter {
                column: column.to_string(),
                op: PushdownOp::Ne,
                operands: vec![value],
            });
        }
        // Out-of-domain literal: every row satisfies `!=`, nothing to push.
        return Ok(false);
    }

    let mut range = fresh;
    match (op, coerced) {
        (BinaryOp::Eq, Coerced::Value(v)) => range.add_fixed_scalar(&v)?,
        (BinaryOp::Eq, _) => range.mark_empty(),

        (BinaryOp::Lt, Coerced::Value(v)) => {
            range.add_scalar_bounds(Bound::Unbounded, Bound::Excluded(v))?
        }
        (BinaryOp::Le, Coerced::Value(v)) => {
            range.add_scalar_bounds(Bound::Unbounded, Bound::Included(v))?
        }
        // `col < lit` with lit above the domain is always true: no range.
        (BinaryOp::Lt | BinaryOp::Le, Coerced::AboveMax) => return Ok(true),
        (BinaryOp::Lt | BinaryOp::Le, Coerced::BelowMin) => range.mark_empty(),

        (BinaryOp::Gt, Coerced::Value(v)) => {
            range.add_scalar_bounds(Bound::Excluded(v), Bound::Unbounded)?
        }
        (BinaryOp::Ge, Coerced::Value(v)) => {
            range.add_scalar_bounds(Bound::Included(v), Bound::Unbounded)?
        }
        (BinaryOp::Gt | BinaryOp::Ge, Coerced::BelowMin) => return Ok(true),
        (BinaryOp::Gt | BinaryOp::Ge, Coerced::AboveMax) => range.mark_empty(),

        (BinaryOp::Ne, _) => unreachable!("handled above"),
    }
    merge_range(normalized, column, ty, range)?;
    Ok(true)
}

fn normalize_in_list(
    normalized: &mut NormalizedConjuncts,
    table: &TableDesc,
    column: &str,
    values: &[ScalarImpl],
) -> ScanResult<bool> {
    let Some(ordinal) = table.column_ordinal(column) else {
        return Err(ScanError::Plan(format!("unknown column {column}")));
    };
    let ty = table.column(ordinal).logical_type;
    if table.key_position(column).is_none() {
        return Ok(false);
    }
    let Some(mut range) = new_range(column, ty) else {
        return Ok(false);
    };

    let mut admitted = 0usize;
    for value in values {
        match coerce_literal(value, ty)? {
            Coerced::Value(v) => {
                range.add_fixed_scalar(&v)?;
                admitted += 1;
            }
            // Out-of-domain list entries can never match; drop them.
            Coerced::BelowMin | Coerced::AboveMax => {}
        }
    }
    if admitted == 0 {
        range.mark_empty();
    }
    merge_range(normalized, column, ty, range)?;
    Ok(true)
}

fn merge_range(
    normalized: &mut NormalizedConjuncts,
    column: &str,
    ty: LogicalType,
    range: ColumnValueRangeImpl,
) -> ScanResult<()> {
    match normalized.column_ranges.get_mut(column) {
        Some(existing) => existing.intersect(&range),
        None => {
            let mut slot = new_range(column, ty)
                .ok_or_else(|| ScanError::Plan(format!("column {column} has no range type")))?;
            slot.intersect(&range)?;
            normalized.column_ranges.insert(column.to_string(), slot);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shale_common::catalog::ColumnDesc;

    fn test_table() -> TableDesc {
        TableDesc::new(
            vec![
                ColumnDesc::new("a", 1, LogicalType::Int),
                ColumnDesc::new("b", 2, LogicalType::Int),
                ColumnDesc::new("c", 3, LogicalType::BigInt),
                ColumnDesc::new("d", 4, LogicalType::Varchar { len: 32 }),
                ColumnDesc::new("t", 5, LogicalType::TinyInt),
                ColumnDesc::new("v", 6, LogicalType::Int).nullable(),
            ],
            // Key order: a, b, c, d, t.
            vec![0, 1, 2, 3, 4],
        )
    }

    fn eq(column: &str, literal: ScalarImpl) -> Conjunct {
        Conjunct::Binary {
            column: column.into(),
            op: BinaryOp::Eq,
            literal,
        }
    }

    #[test]
    fn test_classic_pushdown_split() {
        let table = test_table();
        let conjuncts = vec![
            eq("a", ScalarImpl::Int32(5)),
            Conjunct::InList {
                column: "b".into(),
                values: vec![ScalarImpl::Int32(1), ScalarImpl::Int32(2)],
            },
            Conjunct::Binary {
                column: "c".into(),
                op: BinaryOp::Gt,
                literal: ScalarImpl::Int64(7),
            },
            Conjunct::Like {
                column: "d".into(),
                pattern: "x%".into(),
            },
        ];
        let normalized = normalize_conjuncts(&table, &conjuncts).unwrap();

        assert_eq!(normalized.column_ranges.len(), 3);
        assert!(normalized.column_ranges["a"].is_fixed_value_range());
        assert!(normalized.column_ranges["b"].is_fixed_value_range());
        match &normalized.column_ranges["c"] {
            ColumnValueRangeImpl::Int64(r) => {
                assert_eq!(
                    r.interval_bounds(),
                    Some((Bound::Excluded(7), Bound::Unbounded))
                );
            }
            other => panic!("unexpected range {other:?}"),
        }
        assert_eq!(normalized.row_residuals.len(), 1);
        assert!(normalized.vectorized_residuals.is_empty());
        // a = 5, b IN (1,2), c > 7.
        assert_eq!(normalized.pushdown_filters.len(), 3);
    }

    #[test]
    fn test_literal_widening_and_truncation() {
        let table = test_table();

        // t < 1000 over TINYINT is always true: no range, no residual.
        let normalized = normalize_conjuncts(
            &table,
            &[Conjunct::Binary {
                column: "t".into(),
                op: BinaryOp::Lt,
                literal: ScalarImpl::Int64(1000),
            }],
        )
        .unwrap();
        assert!(normalized.column_ranges.is_empty());
        assert!(normalized.pushdown_filters.is_empty());
        assert!(normalized.all_residuals().next().is_none());

        // t > 1000 over TINYINT is always false: the range goes empty.
        let normalized = normalize_conjuncts(
            &table,
            &[Conjunct::Binary {
                column: "t".into(),
                op: BinaryOp::Gt,
                literal: ScalarImpl::Int64(1000),
            }],
        )
        .unwrap();
        assert!(normalized.has_empty_range());

        // An i64 literal narrows onto an INT slot when it fits.
        let normalized =
            normalize_conjuncts(&table, &[eq("a", ScalarImpl::Int64(5))]).unwrap();
        assert!(normalized.column_ranges["a"].is_fixed_value_range());
    }

    #[test]
    fn test_is_null_and_ne() {
        let table = test_table();
        let normalized = normalize_conjuncts(
            &table,
            &[
                Conjunct::IsNull { column: "v".into() },
                Conjunct::Binary {
                    column: "a".into(),
                    op: BinaryOp::Ne,
                    literal: ScalarImpl::Int32(3),
                },
            ],
        )
        .unwrap();
        assert_eq!(normalized.null_columns, vec!["v".to_string()]);
        assert!(normalized
            .pushdown_filters
            .iter()
            .any(|f| f.op == PushdownOp::IsNull && f.column == "v"));
        // != stays residual and pushes a Ne filter; no range is built.
        assert!(normalized
            .pushdown_filters
            .iter()
            .any(|f| f.op == PushdownOp::Ne && f.column == "a"));
        assert!(normalized.column_ranges.is_empty());
        assert_eq!(normalized.vectorized_residuals.len(), 1);
    }

    #[test]
    fn test_non_key_column_stays_residual() {
        let table = test_table();
        let normalized =
            normalize_conjuncts(&table, &[eq("v", ScalarImpl::Int32(1))]).unwrap();
        assert!(normalized.column_ranges.is_empty());
        assert_eq!(normalized.vectorized_residuals.len(), 1);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let table = test_table();
        let conjuncts = vec![
            eq("a", ScalarImpl::Int32(5)),
            Conjunct::InList {
                column: "b".into(),
                values: vec![ScalarImpl::Int32(2), ScalarImpl::Int32(1)],
            },
            Conjunct::Binary {
                column: "c".into(),
                op: BinaryOp::Le,
                literal: ScalarImpl::Int64(9),
            },
        ];
        let first = normalize_conjuncts(&table, &conjuncts).unwrap();
        let second = normalize_conjuncts(&table, &conjuncts).unwrap();
        assert_eq!(first.column_ranges, second.column_ranges);
        assert_eq!(first.pushdown_filters, second.pushdown_filters);

        // Conjoining a range with itself changes nothing either.
        for (column, range) in &first.column_ranges {
            let mut doubled = range.clone();
            doubled.intersect(range).unwrap();
            assert_eq!(&doubled, range, "column {column}");
        }
    }

    #[test]
    fn test_conjunct_evaluate() {
        let table = test_table();
        let row = Row::new(vec![
            Some(ScalarImpl::Int32(5)),
            Some(ScalarImpl::Int32(1)),
            Some(ScalarImpl::Int64(8)),
            Some(ScalarImpl::Utf8("xylophone".into())),
            Some(ScalarImpl::Int8(0)),
            None,
        ]);
        assert!(eq("a", ScalarImpl::Int32(5)).evaluate(&row, &table));
        assert!(!eq("a", ScalarImpl::Int32(6)).evaluate(&row, &table));
        assert!(Conjunct::Like {
            column: "d".into(),
            pattern: "x%".into()
        }
        .evaluate(&row, &table));
        assert!(!Conjunct::Like {
            column: "d".into(),
            pattern: "x_".into()
        }
        .evaluate(&row, &table));
        assert!(Conjunct::IsNull { column: "v".into() }.evaluate(&row, &table));
        // NULL fails ordinary comparisons.
        assert!(!eq("v", ScalarImpl::Int32(0)).evaluate(&row, &table));
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("x%", "x"));
        assert!(like_match("%phone", "xylophone"));
        assert!(like_match("x_l%", "xylophone"));
        assert!(!like_match("x", "xy"));
        assert!(like_match("%", ""));
        assert!(!like_match("_", ""));
    }
}
