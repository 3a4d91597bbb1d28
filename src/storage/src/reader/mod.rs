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

//! Per-type column readers. A reader owns the codec cursors of one column's
//! streams, tracks presence, and decodes one logical row at a time into a
//! tuple slot.

mod decimal;
mod float;
mod integer;
mod string;
mod synthetic;

use decimal::{DecimalReader, LargeIntReader};
use float::FloatReader;
use integer::{IntReader, TinyIntReader};
use shale_common::catalog::{ColumnUniqueId, TableDesc};
use shale_common::row::Row;
use shale_common::types::{Datum, LogicalType};
use string::StringReader;
use synthetic::SyntheticReader;

use crate::codec::BitFieldReader;
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{PositionProvider, RowIndexEntry, Segment, StreamKind, StreamName};

/// Seeking a data stream may legitimately land at its end when every row in
/// the granule is NULL; callers opt into swallowing that case.
fn tolerate_stream_eof(result: SegmentResult<()>, tolerate: bool) -> SegmentResult<()> {
    match result {
        Err(SegmentError::StreamEof) if tolerate => Ok(()),
        other => other,
    }
}

/// The presence side of a column: the PRESENT bit stream when the column is
/// nullable in this segment, or a constant "present" otherwise.
struct PresentStream {
    reader: Option<BitFieldReader>,
}

impl PresentStream {
    fn absent() -> Self {
        Self { reader: None }
    }

    fn init(unique_id: ColumnUniqueId, segment: &Segment) -> SegmentResult<Self> {
        let name = StreamName::new(unique_id, StreamKind::Present);
        let reader = if segment.has_stream(name) {
            Some(BitFieldReader::new(segment.stream(name)?))
        } else {
            None
        };
        Ok(Self { reader })
    }

    fn exists(&self) -> bool {
        self.reader.is_some()
    }

    /// Advances one row; returns whether a physical value follows.
    fn advance(&mut self) -> SegmentResult<bool> {
        match &mut self.reader {
            Some(reader) => reader.next(),
            None => Ok(true),
        }
    }

    /// Counts present bits over `rows` logical rows, advancing past them.
    /// This is what turns a logical row skip into a physical value skip.
    fn count_present(&mut self, rows: u64) -> SegmentResult<u64> {
        match &mut self.reader {
            Some(reader) => {
                let mut present = 0;
                for _ in 0..rows {
                    if reader.next()? {
                        present += 1;
                    }
                }
                Ok(present)
            }
            None => Ok(rows),
        }
    }

    fn seek(&mut self, provider: &mut PositionProvider<'_>) -> SegmentResult<()> {
        match &mut self.reader {
            Some(reader) => reader.seek(provider),
            None => Ok(()),
        }
    }
}

/// Closed set of decoder shapes; the factory picks one per
/// `(logical_type, encoding)`.
enum ReaderVariant {
    TinyInt(TinyIntReader),
    Int(IntReader),
    Float(FloatReader),
    Decimal(DecimalReader),
    LargeInt(LargeIntReader),
    String(StringReader),
    Synthetic(SyntheticReader),
}

impl ReaderVariant {
    fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        match self {
            Self::TinyInt(r) => r.init(segment),
            Self::Int(r) => r.init(segment),
            Self::Float(r) => r.init(segment),
            Self::Decimal(r) => r.init(segment),
            Self::LargeInt(r) => r.init(segment),
            Self::String(r) => r.init(segment),
            Self::Synthetic(_) => Ok(()),
        }
    }

    fn next_value(&mut self) -> SegmentResult<Datum> {
        match self {
            Self::TinyInt(r) => r.next_value().map(Some),
            Self::Int(r) => r.next_value().map(Some),
            Self::Float(r) => r.next_value().map(Some),
            Self::Decimal(r) => r.next_value().map(Some),
            Self::LargeInt(r) => r.next_value().map(Some),
            Self::String(r) => r.next_value().map(Some),
            Self::Synthetic(r) => Ok(r.next_value()),
        }
    }

    fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        match self {
            Self::TinyInt(r) => r.skip_values(count),
            Self::Int(r) => r.skip_values(count),
            Self::Float(r) => r.skip_values(count),
            Self::Decimal(r) => r.skip_values(count),
            Self::LargeInt(r) => r.skip_values(count),
            Self::String(r) => r.skip_values(count),
            Self::Synthetic(_) => Ok(()),
        }
    }

    fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        match self {
            Self::TinyInt(r) => r.seek_values(provider, tolerate_eof),
            Self::Int(r) => r.seek_values(provider, tolerate_eof),
            Self::Float(r) => r.seek_values(provider, tolerate_eof),
            Self::Decimal(r) => r.seek_values(provider, tolerate_eof),
            Self::LargeInt(r) => r.seek_values(provider, tolerate_eof),
            Self::String(r) => r.seek_values(provider, tolerate_eof),
            Self::Synthetic(_) => Ok(()),
        }
    }

    fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }
}

/// Decoder of one schema column within one segment. Owns its sub-column
/// readers; every operation propagates to them in declaration order.
pub struct ColumnReader {
    ordinal: usize,
    unique_id: ColumnUniqueId,
    present: PresentStream,
    variant: ReaderVariant,
    sub_readers: Vec<ColumnReader>,
    value: Datum,
}

impl ColumnReader {
    /// Builds the reader tree for one column, resolving its shape against
    /// the segment's encoding table. Columns the segment never wrote get a
    /// synthetic reader, or fail hard when they are non-nullable and declare
    /// no default.
    pub fn create(ordinal: usize, table: &TableDesc, segment: &Segment) -> SegmentResult<Self> {
        let desc = table.column(ordinal);
        if !desc.logical_type.is_supported() {
            return Err(SegmentError::UnsupportedType(desc.logical_type));
        }

        let variant = if !segment.has_column(desc.unique_id) {
            match &desc.default_value {
                Some(default) => ReaderVariant::Synthetic(SyntheticReader::with_default(
                    default.clone(),
                )),
                None if desc.is_nullable => {
                    tracing::debug!(column = %desc.name, "synthesizing NULL for absent column");
                    ReaderVariant::Synthetic(SyntheticReader::null())
                }
                None => {
                    return Err(SegmentError::InitFailed(format!(
                        "column {} is absent from the segment, not nullable, and declares no default",
                        desc.name
                    )))
                }
            }
        } else {
            match desc.logical_type {
                LogicalType::TinyInt | LogicalType::UnsignedTinyInt => ReaderVariant::TinyInt(
                    TinyIntReader::new(desc.unique_id, desc.logical_type),
                ),
                LogicalType::SmallInt
                | LogicalType::UnsignedSmallInt
                | LogicalType::Int
                | LogicalType::UnsignedInt
                | LogicalType::BigInt
                | LogicalType::UnsignedBigInt
                | LogicalType::Date
                | LogicalType::DateTime
                | LogicalType::DiscreteDouble => {
                    ReaderVariant::Int(IntReader::new(desc.unique_id, desc.logical_type))
                }
                LogicalType::Float => ReaderVariant::Float(FloatReader::f32(desc.unique_id)),
                LogicalType::Double => ReaderVariant::Float(FloatReader::f64(desc.unique_id)),
                LogicalType::Decimal { .. } => {
                    ReaderVariant::Decimal(DecimalReader::new(desc.unique_id))
                }
                LogicalType::LargeInt => {
                    ReaderVariant::LargeInt(LargeIntReader::new(desc.unique_id))
                }
                LogicalType::Char { len } => {
                    ReaderVariant::String(StringReader::fixed(desc.unique_id, len))
                }
                LogicalType::Varchar { len } => {
                    ReaderVariant::String(StringReader::variable(desc.unique_id, len))
                }
                LogicalType::Hll => ReaderVariant::String(StringReader::variable(
                    desc.unique_id,
                    desc.logical_type.max_length().unwrap(),
                )),
                LogicalType::Struct | LogicalType::List | LogicalType::Map => {
                    unreachable!("rejected above")
                }
            }
        };

        let sub_readers = desc
            .sub_column_ordinals
            .iter()
            .map(|&sub| Self::create(sub, table, segment))
            .collect::<SegmentResult<Vec<_>>>()?;

        Ok(Self {
            ordinal,
            unique_id: desc.unique_id,
            present: PresentStream::absent(),
            variant,
            sub_readers,
            value: None,
        })
    }

    /// Resolves stream cursors; dictionary columns materialize their table
    /// here so row decoding stays O(1).
    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        if !self.variant.is_synthetic() {
            self.present = PresentStream::init(self.unique_id, segment)?;
            self.variant.init(segment)?;
        }
        for sub in &mut self.sub_readers {
            sub.init(segment)?;
        }
        Ok(())
    }

    /// Advances one logical row. When a PRESENT stream exists, the data
    /// stream is consumed only on a set bit; this keeps all streams of the
    /// column aligned.
    pub fn next(&mut self) -> SegmentResult<()> {
        let present = self.present.advance()?;
        self.value = if present {
            self.variant.next_value()?
        } else {
            None
        };
        for sub in &mut self.sub_readers {
            sub.next()?;
        }
        Ok(())
    }

    /// Writes the value decoded by the last `next` into the output tuple.
    pub fn attach(&self, row: &mut Row) {
        row.0[self.ordinal] = self.value.clone();
        for sub in &self.sub_readers {
            sub.attach(row);
        }
    }

    /// Skips `rows` logical rows: presence bits are consumed for all of
    /// them, data values only for the present ones.
    pub fn skip(&mut self, rows: u64) -> SegmentResult<()> {
        let physical = self.present.count_present(rows)?;
        self.variant.skip_values(physical)?;
        for sub in &mut self.sub_readers {
            sub.skip(rows)?;
        }
        Ok(())
    }

    /// Repositions to a granule boundary. Streams seek in declaration order
    /// (PRESENT first), each consuming its own offsets from the column's
    /// position entry.
    pub fn seek(&mut self, entry: &RowIndexEntry) -> SegmentResult<()> {
        match entry.position(self.unique_id) {
            Some(position) => {
                let mut provider = position.provider();
                self.present.seek(&mut provider)?;
                self.variant
                    .seek_values(&mut provider, self.present.exists())?;
            }
            None => {
                if !self.variant.is_synthetic() {
                    return Err(SegmentError::InputParameter(
                        "row index entry misses a stored column",
                    ));
                }
            }
        }
        for sub in &mut self.sub_readers {
            sub.seek(entry)?;
        }
        Ok(())
    }

    pub fn value(&self) -> &Datum {
        &self.value
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use shale_common::catalog::ColumnDesc;
    use shale_common::types::{Date, DateTime, Decimal, ScalarImpl};

    use super::*;
    use crate::codec::RunLengthIntegerWriter;
    use crate::segment::builder::SegmentBuilder;
    use crate::segment::{ColumnEncoding, EncodingKind, StreamInfo};

    fn open_readers(table: &TableDesc, segment: &Segment) -> Vec<ColumnReader> {
        (0..table.columns.len())
            .map(|ordinal| {
                let mut reader = ColumnReader::create(ordinal, table, segment).unwrap();
                reader.init(segment).unwrap();
                reader
            })
            .collect()
    }

    fn read_rows(table: &TableDesc, segment: &Segment, count: usize) -> Vec<Row> {
        let mut readers = open_readers(table, segment);
        (0..count)
            .map(|_| {
                let mut row = Row::empty(table.columns.len());
                for reader in &mut readers {
                    reader.next().unwrap();
                    reader.attach(&mut row);
                }
                row
            })
            .collect()
    }

    #[test]
    fn test_nullable_column_alignment() {
        let table = TableDesc::new(
            vec![ColumnDesc::new("v", 1, LogicalType::BigInt).nullable()],
            vec![],
        );
        let mut builder = SegmentBuilder::new(table.clone(), 1024, 0.3);
        let data = [Some(10), None, Some(20), Some(30), None, Some(40)];
        for v in data {
            builder
                .push_row(Row::new(vec![v.map(ScalarImpl::Int64)]))
                .unwrap();
        }
        let segment = builder.finish().unwrap();

        let rows = read_rows(&table, &segment, 6);
        let decoded: Vec<Option<i64>> = rows
            .iter()
            .map(|r| match r.datum(0) {
                Some(ScalarImpl::Int64(v)) => Some(*v),
                None => None,
                other => panic!("unexpected datum {other:?}"),
            })
            .collect();
        assert_eq!(decoded, data);

        // A logical skip consumes presence bits for all rows but data values
        // only for the present ones.
        let mut readers = open_readers(&table, &segment);
        readers[0].skip(4).unwrap();
        readers[0].next().unwrap();
        assert_eq!(readers[0].value(), &None);
        readers[0].next().unwrap();
        assert_eq!(readers[0].value(), &Some(ScalarImpl::Int64(40)));
    }

    #[test]
    fn test_dictionary_round_trip() {
        let table = TableDesc::new(
            vec![ColumnDesc::new("s", 7, LogicalType::Varchar { len: 16 })],
            vec![],
        );
        let mut builder = SegmentBuilder::new(table.clone(), 1024, 0.9);
        let words = ["alpha", "beta", "beta", "gamma", "alpha"];
        for w in words {
            builder
                .push_row(Row::new(vec![Some(ScalarImpl::Utf8(w.into()))]))
                .unwrap();
        }
        let segment = builder.finish().unwrap();
        assert_eq!(segment.encoding(7).kind, EncodingKind::Dictionary);
        assert_eq!(segment.encoding(7).dictionary_size, 3);

        let rows = read_rows(&table, &segment, 5);
        for (row, expected) in rows.iter().zip(words) {
            assert_eq!(row.datum(0), &Some(ScalarImpl::Utf8(expected.into())));
        }
    }

    #[test]
    fn test_dictionary_invalid_code() {
        // Hand-assemble a segment whose code stream points one past the
        // dictionary: [0, 1, 1, 2, 0, 3] over ["alpha", "beta", "gamma"].
        let mut codes = RunLengthIntegerWriter::new(false);
        for c in [0i64, 1, 1, 2, 0, 3] {
            codes.write(c);
        }
        let mut lengths = RunLengthIntegerWriter::new(false);
        for l in [5i64, 4, 5] {
            lengths.write(l);
        }
        let mut blob = Vec::new();
        let mut streams = Vec::new();
        for (kind, payload) in [
            (StreamKind::Data, codes.finish()),
            (StreamKind::Length, lengths.finish()),
            (
                StreamKind::DictionaryData,
                bytes::Bytes::from_static(b"alphabetagamma"),
            ),
        ] {
            streams.push(StreamInfo {
                name: StreamName::new(7, kind),
                offset: blob.len(),
                length: payload.len(),
            });
            blob.extend_from_slice(&payload);
        }
        let mut encodings = std::collections::HashMap::new();
        encodings.insert(
            7,
            ColumnEncoding {
                kind: EncodingKind::Dictionary,
                dictionary_size: 3,
            },
        );
        let segment = Segment::new(
            bytes::Bytes::from(blob),
            streams,
            encodings,
            vec![RowIndexEntry::default()],
            1024,
            6,
        );

        let table = TableDesc::new(
            vec![ColumnDesc::new("s", 7, LogicalType::Varchar { len: 16 })],
            vec![],
        );
        let mut readers = open_readers(&table, &segment);
        let reader = &mut readers[0];
        let expected = ["alpha", "beta", "beta", "gamma", "alpha"];
        for word in expected {
            reader.next().unwrap();
            assert_eq!(reader.value(), &Some(ScalarImpl::Utf8(word.into())));
        }
        assert_matches!(reader.next(), Err(SegmentError::BufferOverflow(_)));
    }

    #[test]
    fn test_typed_columns_round_trip() {
        let table = TableDesc::new(
            vec![
                ColumnDesc::new("t", 1, LogicalType::TinyInt),
                ColumnDesc::new("u", 2, LogicalType::UnsignedInt),
                ColumnDesc::new("f", 3, LogicalType::Float),
                ColumnDesc::new("d", 4, LogicalType::Double),
                ColumnDesc::new(
                    "m",
                    5,
                    LogicalType::Decimal {
                        precision: 27,
                        scale: 9,
                    },
                ),
                ColumnDesc::new("l", 6, LogicalType::LargeInt),
                ColumnDesc::new("day", 7, LogicalType::Date),
                ColumnDesc::new("ts", 8, LogicalType::DateTime),
                ColumnDesc::new("c", 9, LogicalType::Char { len: 6 }),
            ],
            vec![],
        );
        let rows = vec![
            Row::new(vec![
                Some(ScalarImpl::Int8(-8)),
                Some(ScalarImpl::UInt32(u32::MAX)),
                Some(ScalarImpl::Float32(1.5)),
                Some(ScalarImpl::Float64(-2.25)),
                Some(ScalarImpl::Decimal(Decimal::new(12, 340_000_000))),
                Some(ScalarImpl::Int128(-(1i128 << 100))),
                Some(ScalarImpl::Date(Date::from_ymd(2022, 7, 1).unwrap())),
                Some(ScalarImpl::DateTime(DateTime::from_timestamp(1_656_633_600))),
                Some(ScalarImpl::Utf8("ab".into())),
            ]),
            Row::new(vec![
                Some(ScalarImpl::Int8(100)),
                Some(ScalarImpl::UInt32(0)),
                Some(ScalarImpl::Float32(-0.0)),
                Some(ScalarImpl::Float64(f64::MAX)),
                Some(ScalarImpl::Decimal(Decimal::new(-1, -500_000_000))),
                Some(ScalarImpl::Int128(i128::MAX)),
                Some(ScalarImpl::Date(Date::from_days(0))),
                Some(ScalarImpl::DateTime(DateTime::from_timestamp(-1))),
                Some(ScalarImpl::Utf8("abcdef".into())),
            ]),
        ];
        let mut builder = SegmentBuilder::new(table.clone(), 1024, 0.0);
        for row in &rows {
            builder.push_row(row.clone()).unwrap();
        }
        let segment = builder.finish().unwrap();

        let decoded = read_rows(&table, &segment, 2);
        // CHAR comes back space-trimmed; everything else bit-exact.
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_seek_to_granule() {
        let table = TableDesc::new(
            vec![
                ColumnDesc::new("k", 1, LogicalType::BigInt),
                ColumnDesc::new("s", 2, LogicalType::Varchar { len: 24 }).nullable(),
            ],
            vec![],
        );
        let stride = 1000;
        let mut builder = SegmentBuilder::new(table.clone(), stride, 0.0);
        let num_rows = 2500;
        for i in 0..num_rows {
            let s = if i % 7 == 0 {
                None
            } else {
                Some(ScalarImpl::Utf8(format!("value-{i}")))
            };
            builder
                .push_row(Row::new(vec![Some(ScalarImpl::Int64(i as i64)), s]))
                .unwrap();
        }
        let segment = builder.finish().unwrap();
        assert_eq!(segment.num_granules(), 3);

        for granule in 0..3 {
            let start = granule * stride;
            let mut readers = open_readers(&table, &segment);
            let entry = segment.granule_entry(granule).unwrap();
            for reader in &mut readers {
                reader.seek(entry).unwrap();
            }
            // Reading after the seek must match the sequential suffix.
            for i in start..(start + 40).min(num_rows) {
                let mut row = Row::empty(2);
                for reader in &mut readers {
                    reader.next().unwrap();
                    reader.attach(&mut row);
                }
                assert_eq!(row.datum(0), &Some(ScalarImpl::Int64(i as i64)));
                if i % 7 == 0 {
                    assert_eq!(row.datum(1), &None);
                } else {
                    assert_eq!(row.datum(1), &Some(ScalarImpl::Utf8(format!("value-{i}"))));
                }
            }
        }
    }

    #[test]
    fn test_absent_column_synthesis() {
        // The segment only stores column 1; columns 2..4 are schema-only.
        let stored = TableDesc::new(vec![ColumnDesc::new("k", 1, LogicalType::Int)], vec![]);
        let mut builder = SegmentBuilder::new(stored, 16, 0.3);
        builder
            .push_row(Row::new(vec![Some(ScalarImpl::Int32(5))]))
            .unwrap();
        let segment = builder.finish().unwrap();

        let table = TableDesc::new(
            vec![
                ColumnDesc::new("k", 1, LogicalType::Int),
                ColumnDesc::new("with_default", 2, LogicalType::Int)
                    .with_default(Some(ScalarImpl::Int32(42))),
                ColumnDesc::new("nullable", 3, LogicalType::Int).nullable(),
            ],
            vec![],
        );
        let rows = read_rows(&table, &segment, 1);
        assert_eq!(rows[0].datum(0), &Some(ScalarImpl::Int32(5)));
        assert_eq!(rows[0].datum(1), &Some(ScalarImpl::Int32(42)));
        assert_eq!(rows[0].datum(2), &None);

        // Absent, non-nullable, no default: a schema error at open.
        let bad = TableDesc::new(
            vec![ColumnDesc::new("strict", 4, LogicalType::Int)],
            vec![],
        );
        assert!(matches!(
            ColumnReader::create(0, &bad, &segment),
            Err(SegmentError::InitFailed(_))
        ));
    }

    #[test]
    fn test_skip_equals_read_and_drop_with_nulls() {
        let table = TableDesc::new(
            vec![ColumnDesc::new("v", 1, LogicalType::Int).nullable()],
            vec![],
        );
        let mut rng = StdRng::seed_from_u64(3);
        let data: Vec<Option<i32>> = (0..500)
            .map(|i| rng.gen_bool(0.6).then_some(i))
            .collect();
        let mut builder = SegmentBuilder::new(table.clone(), 64, 0.3);
        for v in &data {
            builder
                .push_row(Row::new(vec![v.map(ScalarImpl::Int32)]))
                .unwrap();
        }
        let segment = builder.finish().unwrap();

        for skip in [0usize, 1, 63, 64, 65, 200, 499] {
            let mut readers = open_readers(&table, &segment);
            readers[0].skip(skip as u64).unwrap();
            readers[0].next().unwrap();
            assert_eq!(
                readers[0].value(),
                &data[skip].map(ScalarImpl::Int32),
                "skip {skip}"
            );
        }
    }
}
