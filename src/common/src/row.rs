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

use std::mem;

use crate::types::Datum;

/// One materialized tuple. Slot order follows the table column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(pub Vec<Datum>);

impl Row {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values)
    }

    /// A row with `arity` NULL slots, ready for readers to attach into.
    pub fn empty(arity: usize) -> Self {
        Self(vec![None; arity])
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn datum(&self, ordinal: usize) -> &Datum {
        &self.0[ordinal]
    }

    pub fn values(&self) -> &[Datum] {
        &self.0
    }
}

/// A bounded container of decoded rows. Produced by one scanner, owned by it
/// until handed to a queue, after which ownership moves to the consumer.
#[derive(Debug, Default)]
pub struct RowBatch {
    rows: Vec<Row>,
    capacity: usize,
}

impl RowBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    pub fn push(&mut self, row: Row) {
        debug_assert!(!self.is_full());
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Moves the row at `idx` out, leaving an empty row behind. Used by the
    /// sort-preserving merge, which consumes a batch row by row while the
    /// batch itself stays alive until its last row is taken.
    pub fn take_row(&mut self, idx: usize) -> Row {
        mem::take(&mut self.rows[idx])
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarImpl;

    #[test]
    fn test_row_batch_capacity() {
        let mut batch = RowBatch::with_capacity(2);
        assert!(batch.is_empty());
        batch.push(Row::new(vec![Some(ScalarImpl::Int32(1))]));
        assert!(!batch.is_full());
        batch.push(Row::new(vec![Some(ScalarImpl::Int32(2))]));
        assert!(batch.is_full());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_take_row() {
        let mut batch = RowBatch::with_capacity(2);
        batch.push(Row::new(vec![Some(ScalarImpl::Utf8("keep".into()))]));
        let row = batch.take_row(0);
        assert_eq!(row.datum(0), &Some(ScalarImpl::Utf8("keep".into())));
        // The slot stays allocated but empty; batch length is unchanged.
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0].arity(), 0);
    }
}
