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

//! Scan keys: ordered per-key-column range prefixes composed into concrete
//! key bounds, used to prune tablet scan ranges and to bound scanners.

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use shale_common::types::ScalarImpl;
use shale_storage::segment::Segment;

use super::value_range::{for_all_range_variants, ColumnValueRangeImpl, RangeValue};
use crate::error::{ScanError, ScanResult};

/// A concrete key prefix: one value per extended key column.
pub type KeyTuple = Vec<ScalarImpl>;

/// Bounds composed from the scan key. A missing suffix (shorter tuple)
/// means unbounded in that direction.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub begin: KeyTuple,
    pub begin_include: bool,
    pub end: KeyTuple,
    pub end_include: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended,
    /// The column's range cannot extend the key; composition stops here and
    /// the suffix stays with residual evaluation.
    Stopped,
}

/// Builder composing per-column ranges into parallel begin/end key tuples.
///
/// Fixed-value ranges multiply the tuples (cartesian product, capped by
/// `max_key_count`); the first interval range closes the key, and nothing
/// may extend it afterwards.
#[derive(Debug)]
pub struct ScanKeys {
    begin_keys: Vec<KeyTuple>,
    end_keys: Vec<KeyTuple>,
    begin_include: bool,
    end_include: bool,
    has_range_value: bool,
    max_key_count: usize,
}

impl ScanKeys {
    pub fn new(max_key_count: usize) -> Self {
        Self {
            begin_keys: vec![],
            end_keys: vec![],
            begin_include: true,
            end_include: true,
            has_range_value: false,
            max_key_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin_keys.is_empty()
    }

    /// Length of the composed key prefix.
    pub fn prefix_len(&self) -> usize {
        self.begin_keys.first().map_or(0, |k| k.len())
    }

    pub fn extend(&mut self, range: &ColumnValueRangeImpl) -> ScanResult<ExtendOutcome> {
        macro_rules! dispatch {
            ( $( { $variant:ident, $ty:ty } ),* ) => {
                match range {
                    $( ColumnValueRangeImpl::$variant(r) => self.extend_typed(r), )*
                }
            };
        }
        for_all_range_variants! { dispatch }
    }

    fn extend_typed<T: RangeValue>(
        &mut self,
        range: &super::value_range::ColumnValueRange<T>,
    ) -> ScanResult<ExtendOutcome> {
        if self.has_range_value || range.is_full_value_range() {
            return Ok(ExtendOutcome::Stopped);
        }
        if range.is_empty_value_range() {
            return Err(ScanError::Plan(format!(
                "cannot extend a scan key with the empty range over column {}",
                range.column()
            )));
        }

        if let Some(values) = range.fixed_values() {
            let base = self.begin_keys.len().max(1);
            if base * values.len() > self.max_key_count {
                tracing::debug!(
                    column = range.column(),
                    keys = base * values.len(),
                    "scan key explosion capped; suffix left to residual evaluation"
                );
                return Ok(ExtendOutcome::Stopped);
            }
            if self.begin_keys.is_empty() {
                for value in values {
                    self.begin_keys.push(vec![value.to_scalar()]);
                    self.end_keys.push(vec![value.to_scalar()]);
                }
            } else {
                let mut begin_keys = Vec::with_capacity(base * values.len());
                let mut end_keys = Vec::with_capacity(base * values.len());
                for (begin, end) in self.begin_keys.iter().zip(self.end_keys.iter()) {
                    for value in values {
                        let mut b = begin.clone();
                        b.push(value.to_scalar());
                        begin_keys.push(b);
                        let mut e = end.clone();
                        e.push(value.to_scalar());
                        end_keys.push(e);
                    }
                }
                self.begin_keys = begin_keys;
                self.end_keys = end_keys;
            }
            return Ok(ExtendOutcome::Extended);
        }

        // A single (partial) interval closes the key.
        let (low, high) = range
            .interval_bounds()
            .expect("non-set non-empty range is an interval");
        if self.begin_keys.is_empty() {
            self.begin_keys.push(vec![]);
            self.end_keys.push(vec![]);
        }
        match low {
            Bound::Included(v) => {
                for key in &mut self.begin_keys {
                    key.push(v.to_scalar());
                }
            }
            Bound::Excluded(v) => {
                for key in &mut self.begin_keys {
                    key.push(v.to_scalar());
                }
                self.begin_include = false;
            }
            Bound::Unbounded => {}
        }
        match high {
            Bound::Included(v) => {
                for key in &mut self.end_keys {
                    key.push(v.to_scalar());
                }
            }
            Bound::Excluded(v) => {
                for key in &mut self.end_keys {
                    key.push(v.to_scalar());
                }
                self.end_include = false;
            }
            Bound::Unbounded => {}
        }
        self.has_range_value = true;
        Ok(ExtendOutcome::Extended)
    }

    /// The composed key ranges, one per begin/end tuple pair.
    pub fn key_ranges(&self) -> Vec<KeyRange> {
        self.begin_keys
            .iter()
            .zip(self.end_keys.iter())
            .map(|(begin, end)| KeyRange {
                begin: begin.clone(),
                begin_include: self.begin_include,
                end: end.clone(),
                end_include: self.end_include,
            })
            .collect()
    }
}

/// Lexicographic comparison over the common prefix; equal prefixes compare
/// `Equal` regardless of length (the caller decides what the missing suffix
/// means).
pub fn prefix_cmp(a: &[ScalarImpl], b: &[ScalarImpl]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Whether a composed key range overlaps a tablet's `[start_key, end_key]`.
/// Prefix-equal boundaries count as overlapping: pruning must never drop a
/// range that could hold matching rows.
pub fn key_range_overlaps(range: &KeyRange, start_key: &[ScalarImpl], end_key: &[ScalarImpl]) -> bool {
    if !range.end.is_empty()
        && !start_key.is_empty()
        && prefix_cmp(&range.end, start_key) == Ordering::Less
    {
        return false;
    }
    if !range.begin.is_empty()
        && !end_key.is_empty()
        && prefix_cmp(end_key, &range.begin) == Ordering::Less
    {
        return false;
    }
    true
}

/// A tablet-addressed I/O unit handed to the scan node by the planner.
#[derive(Clone)]
pub struct ScanRangeParams {
    pub tablet_id: u64,
    pub version: u64,
    pub segment: Arc<Segment>,
    pub start_key: KeyTuple,
    pub end_key: KeyTuple,
    pub hosts: Vec<String>,
}

/// The intersection of a scan range with one composed key range, restricted
/// to a granule-aligned row interval. One scanner runs per sub-range.
#[derive(Clone)]
pub struct SubScanRange {
    pub tablet_id: u64,
    pub version: u64,
    pub segment: Arc<Segment>,
    pub begin_row: usize,
    pub end_row: usize,
    pub key_range: Option<KeyRange>,
}

/// Splits a scan range into at most `pieces` granule-aligned sub-ranges of
/// near-equal row count. Sub-ranges come out in segment order, so runs of
/// identical keys that straddle a cut stay with the lower-indexed sub-range
/// and ordered merging stays stable.
pub fn split_scan_range(
    params: &ScanRangeParams,
    key_range: Option<&KeyRange>,
    pieces: usize,
) -> Vec<SubScanRange> {
    let num_rows = params.segment.num_rows();
    let granules = params.segment.num_granules();
    if num_rows == 0 || granules == 0 {
        return vec![];
    }
    let pieces = pieces.clamp(1, granules);
    let stride = params.segment.index_stride();

    let base = granules / pieces;
    let extra = granules % pieces;
    let mut sub_ranges = Vec::with_capacity(pieces);
    let mut granule = 0usize;
    for piece in 0..pieces {
        let count = base + usize::from(piece < extra);
        let begin_row = granule * stride;
        let end_row = ((granule + count) * stride).min(num_rows);
        sub_ranges.push(SubScanRange {
            tablet_id: params.tablet_id,
            version: params.version,
            segment: params.segment.clone(),
            begin_row,
            end_row,
            key_range: key_range.cloned(),
        });
        granule += count;
    }
    sub_ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::value_range::ColumnValueRange;

    fn fixed_range(column: &str, values: &[i32]) -> ColumnValueRangeImpl {
        let mut range = ColumnValueRange::<i32>::new(column);
        for &v in values {
            range.add_fixed_value(v).unwrap();
        }
        ColumnValueRangeImpl::Int32(range)
    }

    fn interval_range(column: &str, low: Bound<i64>, high: Bound<i64>) -> ColumnValueRangeImpl {
        let mut range = ColumnValueRange::<i64>::new(column);
        range.add_range(low, high).unwrap();
        ColumnValueRangeImpl::Int64(range)
    }

    #[test]
    fn test_fixed_then_interval_composition() {
        let mut keys = ScanKeys::new(1024);
        assert_eq!(
            keys.extend(&fixed_range("a", &[5])).unwrap(),
            ExtendOutcome::Extended
        );
        assert_eq!(
            keys.extend(&fixed_range("b", &[1, 2])).unwrap(),
            ExtendOutcome::Extended
        );
        assert_eq!(
            keys.extend(&interval_range("c", Bound::Excluded(7), Bound::Unbounded))
                .unwrap(),
            ExtendOutcome::Extended
        );
        // After an interval, further columns may not extend the key.
        assert_eq!(
            keys.extend(&fixed_range("d", &[9])).unwrap(),
            ExtendOutcome::Stopped
        );

        assert_eq!(keys.prefix_len(), 3);
        let ranges = keys.key_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(
            ranges[0].begin,
            vec![
                ScalarImpl::Int32(5),
                ScalarImpl::Int32(1),
                ScalarImpl::Int64(7)
            ]
        );
        assert!(!ranges[0].begin_include);
        assert_eq!(ranges[0].end, vec![ScalarImpl::Int32(5), ScalarImpl::Int32(1)]);
        assert!(ranges[0].end_include);
        assert_eq!(ranges[1].begin[1], ScalarImpl::Int32(2));
    }

    #[test]
    fn test_full_range_stops_composition() {
        let mut keys = ScanKeys::new(1024);
        let full = ColumnValueRangeImpl::Int32(ColumnValueRange::new("a"));
        assert_eq!(keys.extend(&full).unwrap(), ExtendOutcome::Stopped);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_key_explosion_cap() {
        let mut keys = ScanKeys::new(4);
        keys.extend(&fixed_range("a", &[1, 2])).unwrap();
        // 2 × 3 = 6 > 4: stop, leaving b to residual evaluation.
        assert_eq!(
            keys.extend(&fixed_range("b", &[7, 8, 9])).unwrap(),
            ExtendOutcome::Stopped
        );
        assert_eq!(keys.prefix_len(), 1);
    }

    #[test]
    fn test_range_pruning() {
        let mut keys = ScanKeys::new(1024);
        keys.extend(&fixed_range("a", &[5])).unwrap();
        let ranges = keys.key_ranges();
        assert_eq!(ranges.len(), 1);

        // Tablet [start=(3,_), end=(6,_)] holds a=5: overlap.
        assert!(key_range_overlaps(
            &ranges[0],
            &[ScalarImpl::Int32(3)],
            &[ScalarImpl::Int32(6)]
        ));
        // Tablet [start=(10,_), end=(20,_)] cannot: pruned.
        assert!(!key_range_overlaps(
            &ranges[0],
            &[ScalarImpl::Int32(10)],
            &[ScalarImpl::Int32(20)]
        ));
        // Unbounded tablet sides always overlap.
        assert!(key_range_overlaps(&ranges[0], &[], &[]));
    }

    #[test]
    fn test_prefix_cmp_semantics() {
        let a = vec![ScalarImpl::Int32(5), ScalarImpl::Int32(1)];
        let b = vec![ScalarImpl::Int32(5)];
        assert_eq!(prefix_cmp(&a, &b), Ordering::Equal);
        let c = vec![ScalarImpl::Int32(6)];
        assert_eq!(prefix_cmp(&a, &c), Ordering::Less);
    }
}
