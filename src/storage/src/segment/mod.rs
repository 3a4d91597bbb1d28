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

//! The segment model: an immutable blob of column streams described by a
//! footer, plus the row index that makes decoding restartable every
//! `index_stride` rows.

pub mod builder;
mod stream;

use std::collections::HashMap;

use bytes::Bytes;
pub use stream::{StreamReader, StreamWriter};

use crate::error::{SegmentError, SegmentResult};
use shale_common::catalog::ColumnUniqueId;

/// The kinds of byte channels a column may own inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    /// One bit per row: 1 = value present, 0 = NULL.
    Present,
    Data,
    Length,
    Secondary,
    DictionaryData,
    RowIndex,
}

/// Key of one stream: the owning column plus the channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName {
    pub unique_id: ColumnUniqueId,
    pub kind: StreamKind,
}

impl StreamName {
    pub fn new(unique_id: ColumnUniqueId, kind: StreamKind) -> Self {
        Self { unique_id, kind }
    }
}

/// Footer entry locating one stream inside the segment blob.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: StreamName,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingKind {
    Direct,
    Dictionary,
}

/// Per-column encoding descriptor from the segment footer.
#[derive(Debug, Clone, Copy)]
pub struct ColumnEncoding {
    pub kind: EncodingKind,
    pub dictionary_size: u32,
}

impl Default for ColumnEncoding {
    fn default() -> Self {
        Self {
            kind: EncodingKind::Direct,
            dictionary_size: 0,
        }
    }
}

/// Opaque ordered list of per-stream offsets letting a column's readers
/// resume at a granule boundary without rescanning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position(Vec<u64>);

impl Position {
    pub fn push(&mut self, value: u64) {
        self.0.push(value);
    }

    pub fn values(&self) -> &[u64] {
        &self.0
    }

    pub fn provider(&self) -> PositionProvider<'_> {
        PositionProvider {
            values: &self.0,
            cursor: 0,
        }
    }
}

/// Hands out position offsets to the readers of one column, in reader
/// declaration order. Every reader consumes exactly as many entries as its
/// stream count, so the provider needs no per-stream addressing.
#[derive(Debug)]
pub struct PositionProvider<'a> {
    values: &'a [u64],
    cursor: usize,
}

impl PositionProvider<'_> {
    pub fn next_offset(&mut self) -> SegmentResult<u64> {
        let value = self
            .values
            .get(self.cursor)
            .copied()
            .ok_or(SegmentError::InputParameter("position entries exhausted"))?;
        self.cursor += 1;
        Ok(value)
    }
}

/// One row-index granule boundary: the restart position of every column.
#[derive(Debug, Clone, Default)]
pub struct RowIndexEntry {
    columns: HashMap<ColumnUniqueId, Position>,
}

impl RowIndexEntry {
    pub fn insert(&mut self, unique_id: ColumnUniqueId, position: Position) {
        self.columns.insert(unique_id, position);
    }

    pub fn position(&self, unique_id: ColumnUniqueId) -> Option<&Position> {
        self.columns.get(&unique_id)
    }
}

/// An immutable columnar unit read by one scanner.
#[derive(Debug)]
pub struct Segment {
    data: Bytes,
    streams: Vec<StreamInfo>,
    stream_index: HashMap<StreamName, usize>,
    encodings: HashMap<ColumnUniqueId, ColumnEncoding>,
    row_index: Vec<RowIndexEntry>,
    index_stride: usize,
    num_rows: usize,
}

impl Segment {
    pub(crate) fn new(
        data: Bytes,
        streams: Vec<StreamInfo>,
        encodings: HashMap<ColumnUniqueId, ColumnEncoding>,
        row_index: Vec<RowIndexEntry>,
        index_stride: usize,
        num_rows: usize,
    ) -> Self {
        let stream_index = streams
            .iter()
            .enumerate()
            .map(|(i, info)| (info.name, i))
            .collect();
        Self {
            data,
            streams,
            stream_index,
            encodings,
            row_index,
            index_stride,
            num_rows,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn index_stride(&self) -> usize {
        self.index_stride
    }

    pub fn num_granules(&self) -> usize {
        self.row_index.len()
    }

    pub fn granule_of_row(&self, row: usize) -> usize {
        row / self.index_stride
    }

    pub fn granule_entry(&self, granule: usize) -> SegmentResult<&RowIndexEntry> {
        self.row_index
            .get(granule)
            .ok_or(SegmentError::InputParameter("granule out of range"))
    }

    pub fn has_stream(&self, name: StreamName) -> bool {
        self.stream_index.contains_key(&name)
    }

    /// True when the segment holds any stream of the column, i.e. the column
    /// was written when the segment was produced.
    pub fn has_column(&self, unique_id: ColumnUniqueId) -> bool {
        self.streams.iter().any(|s| s.name.unique_id == unique_id)
    }

    /// Opens a cursor over one stream payload.
    pub fn stream(&self, name: StreamName) -> SegmentResult<StreamReader> {
        let idx = self
            .stream_index
            .get(&name)
            .ok_or(SegmentError::StreamNotFound {
                unique_id: name.unique_id,
                kind: name.kind,
            })?;
        let info = &self.streams[*idx];
        Ok(StreamReader::new(
            self.data.slice(info.offset..info.offset + info.length),
        ))
    }

    pub fn encoding(&self, unique_id: ColumnUniqueId) -> ColumnEncoding {
        self.encodings.get(&unique_id).copied().unwrap_or_default()
    }
}
