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

//! Typed value-range representation of predicates over one column: a finite
//! value set (IN / =), an interval with independently open or closed ends,
//! or the contradiction. Ranges merge under conjunction and lower into the
//! wire-level pushdown filter format.

use std::collections::BTreeSet;
use std::ops::Bound;

use ordered_float::OrderedFloat;
use shale_common::types::{Datum, ScalarImpl};

use crate::error::{ScanError, ScanResult};

/// Element types a range can hold. Implementors map to and from the scalar
/// wire values.
pub trait RangeValue: Clone + Ord + std::fmt::Debug {
    fn to_scalar(&self) -> ScalarImpl;
    fn from_scalar(scalar: &ScalarImpl) -> Option<Self>;
}

macro_rules! impl_range_value {
    ( $( { $variant:ident, $ty:ty } ),* ) => {
        $(
            impl RangeValue for $ty {
                fn to_scalar(&self) -> ScalarImpl {
                    ScalarImpl::$variant(self.clone().into())
                }

                fn from_scalar(scalar: &ScalarImpl) -> Option<Self> {
                    match scalar {
                        ScalarImpl::$variant(v) => Some(v.clone().into()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

/// Every element type a range can be tagged with; other modules dispatch
/// over the same list.
macro_rules! for_all_range_variants {
    ($macro:ident) => {
        $macro! {
            { Bool, bool },
            { Int8, i8 },
            { Int16, i16 },
            { Int32, i32 },
            { Int64, i64 },
            { Int128, i128 },
            { UInt8, u8 },
            { UInt16, u16 },
            { UInt32, u32 },
            { UInt64, u64 },
            { Float32, OrderedFloat<f32> },
            { Float64, OrderedFloat<f64> },
            { Decimal, shale_common::types::Decimal },
            { Date, shale_common::types::Date },
            { DateTime, shale_common::types::DateTime },
            { Utf8, String }
        }
    };
}

pub(crate) use for_all_range_variants;

impl_range_value! {
    { Bool, bool },
    { Int8, i8 },
    { Int16, i16 },
    { Int32, i32 },
    { Int64, i64 },
    { Int128, i128 },
    { UInt8, u8 },
    { UInt16, u16 },
    { UInt32, u32 },
    { UInt64, u64 },
    { Decimal, shale_common::types::Decimal },
    { Date, shale_common::types::Date },
    { DateTime, shale_common::types::DateTime },
    { Utf8, String }
}

impl RangeValue for OrderedFloat<f32> {
    fn to_scalar(&self) -> ScalarImpl {
        ScalarImpl::Float32(self.0)
    }

    fn from_scalar(scalar: &ScalarImpl) -> Option<Self> {
        match scalar {
            ScalarImpl::Float32(v) => Some(OrderedFloat(*v)),
            _ => None,
        }
    }
}

impl RangeValue for OrderedFloat<f64> {
    fn to_scalar(&self) -> ScalarImpl {
        ScalarImpl::Float64(self.0)
    }

    fn from_scalar(scalar: &ScalarImpl) -> Option<Self> {
        match scalar {
            ScalarImpl::Float64(v) => Some(OrderedFloat(*v)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RangeRepr<T> {
    /// Rejects every row.
    Empty,
    /// A finite set of admissible values (IN-list or a single fixed value).
    Set(BTreeSet<T>),
    /// A single interval; both ends unbounded means the full range.
    Interval {
        low: Bound<T>,
        high: Bound<T>,
    },
}

/// Predicate representation over one column of element type `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValueRange<T> {
    column: String,
    repr: RangeRepr<T>,
}

fn max_low<T: Ord + Clone>(a: &Bound<T>, b: &Bound<T>) -> Bound<T> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y).clone()),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y).clone()),
        (Bound::Included(x), Bound::Excluded(y)) | (Bound::Excluded(y), Bound::Included(x)) => {
            if y >= x {
                Bound::Excluded(y.clone())
            } else {
                Bound::Included(x.clone())
            }
        }
    }
}

fn min_high<T: Ord + Clone>(a: &Bound<T>, b: &Bound<T>) -> Bound<T> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y).clone()),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y).clone()),
        (Bound::Included(x), Bound::Excluded(y)) | (Bound::Excluded(y), Bound::Included(x)) => {
            if y <= x {
                Bound::Excluded(y.clone())
            } else {
                Bound::Included(x.clone())
            }
        }
    }
}

fn interval_is_empty<T: Ord>(low: &Bound<T>, high: &Bound<T>) -> bool {
    match (low, high) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
    }
}

fn bounds_contain<T: Ord>(low: &Bound<T>, high: &Bound<T>, value: &T) -> bool {
    let above_low = match low {
        Bound::Unbounded => true,
        Bound::Included(a) => value >= a,
        Bound::Excluded(a) => value > a,
    };
    let below_high = match high {
        Bound::Unbounded => true,
        Bound::Included(b) => value <= b,
        Bound::Excluded(b) => value < b,
    };
    above_low && below_high
}

impl<T: RangeValue> ColumnValueRange<T> {
    /// A full range: rejects nothing.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            repr: RangeRepr::Interval {
                low: Bound::Unbounded,
                high: Bound::Unbounded,
            },
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Admits one more fixed value (IN-list accumulation). Only meaningful
    /// while the range is still full or already a set.
    pub fn add_fixed_value(&mut self, value: T) -> ScanResult<()> {
        match &mut self.repr {
            RangeRepr::Set(set) => {
                set.insert(value);
                Ok(())
            }
            RangeRepr::Interval {
                low: Bound::Unbounded,
                high: Bound::Unbounded,
            } => {
                self.repr = RangeRepr::Set(BTreeSet::from([value]));
                Ok(())
            }
            RangeRepr::Empty => Ok(()),
            RangeRepr::Interval { .. } => Err(ScanError::Plan(format!(
                "cannot add a fixed value to a bounded range over column {}",
                self.column
            ))),
        }
    }

    /// Conjoins an interval constraint.
    pub fn add_range(&mut self, low: Bound<T>, high: Bound<T>) -> ScanResult<()> {
        match &mut self.repr {
            RangeRepr::Empty => {}
            RangeRepr::Set(set) => {
                set.retain(|v| bounds_contain(&low, &high, v));
                if set.is_empty() {
                    self.repr = RangeRepr::Empty;
                }
            }
            RangeRepr::Interval {
                low: cur_low,
                high: cur_high,
            } => {
                let new_low = max_low(cur_low, &low);
                let new_high = min_high(cur_high, &high);
                self.repr = if interval_is_empty(&new_low, &new_high) {
                    RangeRepr::Empty
                } else {
                    RangeRepr::Interval {
                        low: new_low,
                        high: new_high,
                    }
                };
            }
        }
        Ok(())
    }

    /// Conjunction with another range over the same column.
    pub fn intersect(&mut self, other: &Self) {
        match &other.repr {
            RangeRepr::Empty => self.repr = RangeRepr::Empty,
            RangeRepr::Set(other_set) => match &mut self.repr {
                RangeRepr::Empty => {}
                RangeRepr::Set(set) => {
                    set.retain(|v| other_set.contains(v));
                    if set.is_empty() {
                        self.repr = RangeRepr::Empty;
                    }
                }
                RangeRepr::Interval { low, high } => {
                    let filtered: BTreeSet<T> = other_set
                        .iter()
                        .filter(|v| bounds_contain(low, high, v))
                        .cloned()
                        .collect();
                    self.repr = if filtered.is_empty() {
                        RangeRepr::Empty
                    } else {
                        RangeRepr::Set(filtered)
                    };
                }
            },
            RangeRepr::Interval { low, high } => {
                // `add_range` never fails on interval input.
                let _ = self.add_range(low.clone(), high.clone());
            }
        }
    }

    pub fn mark_empty(&mut self) {
        self.repr = RangeRepr::Empty;
    }

    pub fn is_empty_value_range(&self) -> bool {
        matches!(self.repr, RangeRepr::Empty)
    }

    pub fn is_fixed_value_range(&self) -> bool {
        matches!(self.repr, RangeRepr::Set(_))
    }

    pub fn is_full_value_range(&self) -> bool {
        matches!(
            self.repr,
            RangeRepr::Interval {
                low: Bound::Unbounded,
                high: Bound::Unbounded,
            }
        )
    }

    pub fn fixed_values(&self) -> Option<&BTreeSet<T>> {
        match &self.repr {
            RangeRepr::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn interval_bounds(&self) -> Option<(Bound<T>, Bound<T>)> {
        match &self.repr {
            RangeRepr::Interval { low, high } => Some((low.clone(), high.clone())),
            _ => None,
        }
    }

    /// Lowers this range into wire-level filters for the storage layer.
    pub fn to_pushdown_filters(&self) -> Vec<PushdownFilter> {
        match &self.repr {
            RangeRepr::Empty => vec![],
            RangeRepr::Set(set) => {
                let operands: Vec<ScalarImpl> = set.iter().map(|v| v.to_scalar()).collect();
                let op = if operands.len() == 1 {
                    PushdownOp::Eq
                } else {
                    PushdownOp::In
                };
                vec![PushdownFilter {
                    column: self.column.clone(),
                    op,
                    operands,
                }]
            }
            RangeRepr::Interval { low, high } => {
                let mut filters = Vec::new();
                match low {
                    Bound::Included(v) => filters.push(PushdownFilter {
                        column: self.column.clone(),
                        op: PushdownOp::Ge,
                        operands: vec![v.to_scalar()],
                    }),
                    Bound::Excluded(v) => filters.push(PushdownFilter {
                        column: self.column.clone(),
                        op: PushdownOp::Gt,
                        operands: vec![v.to_scalar()],
                    }),
                    Bound::Unbounded => {}
                }
                match high {
                    Bound::Included(v) => filters.push(PushdownFilter {
                        column: self.column.clone(),
                        op: PushdownOp::Le,
                        operands: vec![v.to_scalar()],
                    }),
                    Bound::Excluded(v) => filters.push(PushdownFilter {
                        column: self.column.clone(),
                        op: PushdownOp::Lt,
                        operands: vec![v.to_scalar()],
                    }),
                    Bound::Unbounded => {}
                }
                filters
            }
        }
    }
}

macro_rules! def_range_impl {
    ( $( { $variant:ident, $ty:ty } ),* ) => {
        /// Type-tagged range; dispatch is a match on the tag.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ColumnValueRangeImpl {
            $( $variant(ColumnValueRange<$ty>), )*
        }

        impl ColumnValueRangeImpl {
            pub fn column(&self) -> &str {
                match self {
                    $( Self::$variant(r) => r.column(), )*
                }
            }

            pub fn is_empty_value_range(&self) -> bool {
                match self {
                    $( Self::$variant(r) => r.is_empty_value_range(), )*
                }
            }

            pub fn is_fixed_value_range(&self) -> bool {
                match self {
                    $( Self::$variant(r) => r.is_fixed_value_range(), )*
                }
            }

            pub fn is_full_value_range(&self) -> bool {
                match self {
                    $( Self::$variant(r) => r.is_full_value_range(), )*
                }
            }

            pub fn mark_empty(&mut self) {
                match self {
                    $( Self::$variant(r) => r.mark_empty(), )*
                }
            }

            pub fn to_pushdown_filters(&self) -> Vec<PushdownFilter> {
                match self {
                    $( Self::$variant(r) => r.to_pushdown_filters(), )*
                }
            }

            /// Admits `value` as a fixed value; the scalar must match the
            /// range's element type.
            pub fn add_fixed_scalar(&mut self, value: &ScalarImpl) -> ScanResult<()> {
                match self {
                    $(
                        Self::$variant(r) => {
                            let v = RangeValue::from_scalar(value).ok_or_else(|| {
                                ScanError::Plan(format!(
                                    "literal {value} mismatches range over column {}",
                                    r.column()
                                ))
                            })?;
                            r.add_fixed_value(v)
                        }
                    )*
                }
            }

            /// Conjoins an interval given as scalar bounds.
            pub fn add_scalar_bounds(
                &mut self,
                low: Bound<ScalarImpl>,
                high: Bound<ScalarImpl>,
            ) -> ScanResult<()> {
                fn convert<V: RangeValue>(
                    bound: Bound<ScalarImpl>,
                    column: &str,
                ) -> ScanResult<Bound<V>> {
                    Ok(match bound {
                        Bound::Unbounded => Bound::Unbounded,
                        Bound::Included(s) => {
                            Bound::Included(V::from_scalar(&s).ok_or_else(|| {
                                ScanError::Plan(format!(
                                    "literal {s} mismatches range over column {column}"
                                ))
                            })?)
                        }
                        Bound::Excluded(s) => {
                            Bound::Excluded(V::from_scalar(&s).ok_or_else(|| {
                                ScanError::Plan(format!(
                                    "literal {s} mismatches range over column {column}"
                                ))
                            })?)
                        }
                    })
                }
                match self {
                    $(
                        Self::$variant(r) => {
                            let column = r.column().to_string();
                            let low = convert(low, &column)?;
                            let high = convert(high, &column)?;
                            r.add_range(low, high)
                        }
                    )*
                }
            }

            /// Conjunction with another range over the same column and type.
            pub fn intersect(&mut self, other: &Self) -> ScanResult<()> {
                match (self, other) {
                    $( (Self::$variant(a), Self::$variant(b)) => {
                        a.intersect(b);
                        Ok(())
                    } )*
                    (a, b) => Err(ScanError::Plan(format!(
                        "range type mismatch over column {}: {:?} vs {:?}",
                        a.column(),
                        a,
                        b
                    ))),
                }
            }
        }
    };
}

for_all_range_variants! { def_range_impl }

/// Operators of the wire-level pushdown filter format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushdownOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    IsNull,
}

/// One filter the storage layer applies before returning rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PushdownFilter {
    pub column: String,
    pub op: PushdownOp,
    pub operands: Vec<ScalarImpl>,
}

impl PushdownFilter {
    /// Evaluates the filter against one decoded datum. NULL satisfies only
    /// `IS NULL`.
    pub fn matches(&self, datum: &Datum) -> bool {
        match (self.op, datum) {
            (PushdownOp::IsNull, d) => d.is_none(),
            (_, None) => false,
            (PushdownOp::Eq, Some(v)) => self.operands.first() == Some(v),
            (PushdownOp::Ne, Some(v)) => self.operands.first() != Some(v),
            (PushdownOp::Lt, Some(v)) => self.operands.first().is_some_and(|o| v < o),
            (PushdownOp::Le, Some(v)) => self.operands.first().is_some_and(|o| v <= o),
            (PushdownOp::Gt, Some(v)) => self.operands.first().is_some_and(|o| v > o),
            (PushdownOp::Ge, Some(v)) => self.operands.first().is_some_and(|o| v >= o),
            (PushdownOp::In, Some(v)) => self.operands.contains(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(column: &str) -> ColumnValueRange<i32> {
        ColumnValueRange::new(column)
    }

    #[test]
    fn test_fixed_and_interval_intersection() {
        let mut in_list = range("a");
        in_list.add_fixed_value(1).unwrap();
        in_list.add_fixed_value(5).unwrap();
        in_list.add_fixed_value(9).unwrap();

        let mut gt3 = range("a");
        gt3.add_range(Bound::Excluded(3), Bound::Unbounded).unwrap();

        in_list.intersect(&gt3);
        assert!(in_list.is_fixed_value_range());
        assert_eq!(
            in_list.fixed_values().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![5, 9]
        );
    }

    #[test]
    fn test_interval_intersection_open_closed() {
        let mut r = range("a");
        r.add_range(Bound::Included(0), Bound::Included(10)).unwrap();
        r.add_range(Bound::Excluded(0), Bound::Unbounded).unwrap();
        assert_eq!(
            r.interval_bounds(),
            Some((Bound::Excluded(0), Bound::Included(10)))
        );

        r.add_range(Bound::Unbounded, Bound::Excluded(5)).unwrap();
        assert_eq!(
            r.interval_bounds(),
            Some((Bound::Excluded(0), Bound::Excluded(5)))
        );
    }

    #[test]
    fn test_empty_after_contradiction() {
        let mut r = range("a");
        r.add_range(Bound::Included(10), Bound::Unbounded).unwrap();
        r.add_range(Bound::Unbounded, Bound::Included(5)).unwrap();
        assert!(r.is_empty_value_range());

        let mut r = range("a");
        r.add_fixed_value(7).unwrap();
        r.add_range(Bound::Excluded(7), Bound::Unbounded).unwrap();
        assert!(r.is_empty_value_range());
    }

    #[test]
    fn test_intersection_is_idempotent() {
        let mut a = range("k");
        a.add_fixed_value(1).unwrap();
        a.add_fixed_value(2).unwrap();
        let snapshot = a.clone();
        a.intersect(&snapshot);
        assert_eq!(a, snapshot);

        let mut b = range("k");
        b.add_range(Bound::Excluded(3), Bound::Included(9)).unwrap();
        let snapshot = b.clone();
        b.intersect(&snapshot);
        assert_eq!(b, snapshot);
    }

    #[test]
    fn test_pushdown_filters() {
        let mut r = range("c");
        r.add_range(Bound::Excluded(7), Bound::Unbounded).unwrap();
        let filters = r.to_pushdown_filters();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].op, PushdownOp::Gt);
        assert_eq!(filters[0].operands, vec![ScalarImpl::Int32(7)]);
        assert!(filters[0].matches(&Some(ScalarImpl::Int32(8))));
        assert!(!filters[0].matches(&Some(ScalarImpl::Int32(7))));
        assert!(!filters[0].matches(&None));

        let mut r = range("b");
        r.add_fixed_value(1).unwrap();
        r.add_fixed_value(2).unwrap();
        let filters = r.to_pushdown_filters();
        assert_eq!(filters[0].op, PushdownOp::In);
        assert_eq!(filters[0].operands.len(), 2);
    }

    #[test]
    fn test_impl_dispatch() {
        let mut a = ColumnValueRangeImpl::Int32(ColumnValueRange::new("a"));
        a.add_fixed_scalar(&ScalarImpl::Int32(5)).unwrap();
        assert!(a.is_fixed_value_range());

        let mut b = ColumnValueRangeImpl::Int32(ColumnValueRange::new("a"));
        b.add_scalar_bounds(
            Bound::Included(ScalarImpl::Int32(0)),
            Bound::Included(ScalarImpl::Int32(3)),
        )
        .unwrap();
        a.intersect(&b).unwrap();
        assert!(a.is_empty_value_range());

        // Mixing element types is a plan error.
        let mut c = ColumnValueRangeImpl::Int64(ColumnValueRange::new("a"));
        assert!(c.intersect(&b).is_err());
        assert!(c
            .add_fixed_scalar(&ScalarImpl::Utf8("x".into()))
            .is_err());
    }
}
