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

//! The per-sub-range scanner: opens column readers against the segment,
//! decodes rows in key order, applies pushdown filters and residual
//! predicates, and emits bounded row batches.

use std::cmp::Ordering;
use std::sync::Arc;

use shale_common::catalog::TableDesc;
use shale_common::row::{Row, RowBatch};
use shale_storage::reader::ColumnReader;
use shale_storage::SegmentError;

use super::conjuncts::Conjunct;
use super::scan_key::{KeyRange, SubScanRange};
use super::value_range::PushdownFilter;
use crate::error::ScanResult;
use crate::monitor::ScanMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Open,
    Running,
    Drained,
    Closed,
}

/// Decodes one sub-scan-range. Rows come out in segment (key) order; the
/// first codec error drains the scanner for good.
pub struct Scanner {
    id: usize,
    table: Arc<TableDesc>,
    sub_range: SubScanRange,
    pushdown_filters: Arc<Vec<PushdownFilter>>,
    residuals: Arc<Vec<Conjunct>>,
    batch_capacity: usize,
    metrics: Arc<ScanMetrics>,
    state: ScannerState,
    readers: Vec<ColumnReader>,
    next_row: usize,
}

impl Scanner {
    pub fn new(
        id: usize,
        table: Arc<TableDesc>,
        sub_range: SubScanRange,
        pushdown_filters: Arc<Vec<PushdownFilter>>,
        residuals: Arc<Vec<Conjunct>>,
        batch_capacity: usize,
        metrics: Arc<ScanMetrics>,
    ) -> Self {
        let begin_row = sub_range.begin_row;
        Self {
            id,
            table,
            sub_range,
            pushdown_filters,
            residuals,
            batch_capacity,
            metrics,
            state: ScannerState::Idle,
            readers: vec![],
            next_row: begin_row,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Resolves column readers against the segment's streams and positions
    /// them at the sub-range's first row.
    pub fn open(&mut self) -> ScanResult<()> {
        debug_assert_eq!(self.state, ScannerState::Idle);
        let segment = &self.sub_range.segment;
        let mut readers = Vec::with_capacity(self.table.columns.len());
        for ordinal in 0..self.table.columns.len() {
            let mut reader = ColumnReader::create(ordinal, &self.table, segment)?;
            reader.init(segment)?;
            readers.push(reader);
        }

        let begin_row = self.sub_range.begin_row;
        if begin_row < segment.num_rows() {
            let granule = segment.granule_of_row(begin_row);
            let entry = segment.granule_entry(granule)?;
            let within = (begin_row - granule * segment.index_stride()) as u64;
            for reader in &mut readers {
                reader.seek(entry)?;
                if within > 0 {
                    reader.skip(within)?;
                }
            }
        }

        self.readers = readers;
        self.state = ScannerState::Open;
        Ok(())
    }

    /// Produces the next batch of up to `batch_capacity` matching rows, or
    /// `None` once the sub-range is exhausted.
    pub fn next_batch(&mut self) -> ScanResult<Option<RowBatch>> {
        match self.state {
            ScannerState::Open | ScannerState::Running => self.state = ScannerState::Running,
            ScannerState::Drained => return Ok(None),
            ScannerState::Idle | ScannerState::Closed => {
                return Err(SegmentError::NotInited.into())
            }
        }

        let timer = self.metrics.scan_batch_duration.start_timer();
        let mut batch = RowBatch::with_capacity(self.batch_capacity);
        while !batch.is_full() && self.next_row < self.sub_range.end_row {
            let row = match self.decode_row() {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(scanner = self.id, error = %e, "scanner failed");
                    self.state = ScannerState::Drained;
                    timer.observe_duration();
                    return Err(e);
                }
            };
            self.next_row += 1;
            self.metrics.rows_scanned.inc();

            if let Some(key_range) = &self.sub_range.key_range {
                match self.row_vs_key_range(&row, key_range) {
                    RowPlacement::BeforeBegin => {
                        self.metrics.rows_filtered.inc();
                        continue;
                    }
                    RowPlacement::AfterEnd => {
                        // Rows are in key order; nothing further can match.
                        self.state = ScannerState::Drained;
                        break;
                    }
                    RowPlacement::Within => {}
                }
            }

            if !self.row_matches(&row) {
                self.metrics.rows_filtered.inc();
                continue;
            }
            self.metrics.rows_returned.inc();
            batch.push(row);
        }
        timer.observe_duration();

        if self.next_row >= self.sub_range.end_row {
            self.state = ScannerState::Drained;
        }
        if batch.is_empty() && self.state == ScannerState::Drained {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    /// Releases readers. Safe to call in any state.
    pub fn close(&mut self) {
        self.readers.clear();
        self.state = ScannerState::Closed;
    }

    fn decode_row(&mut self) -> ScanResult<Row> {
        let mut row = Row::empty(self.table.columns.len());
        for reader in &mut self.readers {
            reader.next()?;
            reader.attach(&mut row);
        }
        Ok(row)
    }

    /// Lexicographic comparison of the row's key prefix against a bound
    /// tuple. NULL key values sort first.
    fn key_prefix_cmp(&self, row: &Row, bound: &[shale_common::types::ScalarImpl]) -> Ordering {
        for (&ordinal, bound_value) in self.table.key_column_ordinals.iter().zip(bound.iter()) {
            match row.datum(ordinal) {
                None => return Ordering::Less,
                Some(value) => match value.cmp(bound_value) {
                    Ordering::Equal => continue,
                    other => return other,
                },
            }
        }
        Ordering::Equal
    }

    fn row_vs_key_range(&self, row: &Row, key_range: &KeyRange) -> RowPlacement {
        if !key_range.begin.is_empty() {
            match self.key_prefix_cmp(row, &key_range.begin) {
                Ordering::Less => return RowPlacement::BeforeBegin,
                Ordering::Equal if !key_range.begin_include => return RowPlacement::BeforeBegin,
                _ => {}
            }
        }
        if !key_range.end.is_empty() {
            match self.key_prefix_cmp(row, &key_range.end) {
                Ordering::Greater => return RowPlacement::AfterEnd,
                Ordering::Equal if !key_range.end_include => return RowPlacement::AfterEnd,
                _ => {}
            }
        }
        RowPlacement::Within
    }

    fn row_matches(&self, row: &Row) -> bool {
        for filter in self.pushdown_filters.iter() {
            let Some(ordinal) = self.table.column_ordinal(&filter.column) else {
                continue;
            };
            if !filter.matches(row.datum(ordinal)) {
                return false;
            }
        }
        self.residuals.iter().all(|c| c.evaluate(row, &self.table))
    }
}

enum RowPlacement {
    BeforeBegin,
    Within,
    AfterEnd,
}
