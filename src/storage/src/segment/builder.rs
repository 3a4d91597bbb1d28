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

//! Assembles immutable segments from rows: encodes one set of streams per
//! column, cuts a row-index entry every `index_stride` rows, and picks
//! DIRECT or DICTIONARY encoding for string columns by distinct-value
//! ratio.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

use super::{
    ColumnEncoding, EncodingKind, Position, RowIndexEntry, Segment, StreamInfo, StreamKind,
    StreamName, StreamWriter,
};
use crate::codec::{BitFieldWriter, RunLengthByteWriter, RunLengthIntegerWriter};
use crate::error::{SegmentError, SegmentResult};
use shale_common::catalog::{ColumnDesc, TableDesc};
use shale_common::row::Row;
use shale_common::types::{Datum, LogicalType, ScalarImpl};

pub struct SegmentBuilder {
    table: TableDesc,
    index_stride: usize,
    dictionary_threshold: f64,
    rows: Vec<Row>,
}

impl SegmentBuilder {
    pub fn new(table: TableDesc, index_stride: usize, dictionary_threshold: f64) -> Self {
        debug_assert!(index_stride > 0);
        Self {
            table,
            index_stride,
            dictionary_threshold,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Row) -> SegmentResult<()> {
        if row.arity() != self.table.columns.len() {
            return Err(SegmentError::InputParameter("row arity mismatches schema"));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn finish(self) -> SegmentResult<Segment> {
        let num_rows = self.rows.len();
        let num_granules = num_rows.div_ceil(self.index_stride);
        let mut row_index = vec![RowIndexEntry::default(); num_granules];
        let mut encodings: HashMap<u32, ColumnEncoding> = HashMap::new();
        let mut blob = Vec::new();
        let mut streams = Vec::new();

        for (ordinal, desc) in self.table.columns.iter().enumerate() {
            if !desc.logical_type.is_supported() {
                return Err(SegmentError::UnsupportedType(desc.logical_type));
            }
            let values: Vec<&Datum> = self.rows.iter().map(|r| r.datum(ordinal)).collect();

            let mut present = if desc.is_nullable {
                Some(BitFieldWriter::new())
            } else {
                None
            };
            let mut writer = ValueWriter::create(desc, &values, self.dictionary_threshold)?;

            for (row, datum) in values.iter().enumerate() {
                if row % self.index_stride == 0 {
                    let mut position = Position::default();
                    if let Some(present) = &present {
                        present.record_position(&mut position);
                    }
                    writer.record_position(&mut position);
                    row_index[row / self.index_stride].insert(desc.unique_id, position);
                }
                match (datum, &mut present) {
                    (Some(value), p) => {
                        if let Some(p) = p {
                            p.write(true);
                        }
                        writer.write(desc, value)?;
                    }
                    (None, Some(p)) => p.write(false),
                    (None, None) => {
                        return Err(SegmentError::InputParameter(
                            "NULL value in non-nullable column",
                        ))
                    }
                }
            }

            if let Some(present) = present {
                append_stream(
                    &mut blob,
                    &mut streams,
                    StreamName::new(desc.unique_id, StreamKind::Present),
                    present.finish(),
                );
            }
            if let Some(encoding) = writer.encoding() {
                encodings.insert(desc.unique_id, encoding);
            }
            for (kind, payload) in writer.into_streams() {
                append_stream(
                    &mut blob,
                    &mut streams,
                    StreamName::new(desc.unique_id, kind),
                    payload,
                );
            }
        }

        Ok(Segment::new(
            Bytes::from(blob),
            streams,
            encodings,
            row_index,
            self.index_stride,
            num_rows,
        ))
    }
}

fn append_stream(
    blob: &mut Vec<u8>,
    streams: &mut Vec<StreamInfo>,
    name: StreamName,
    payload: Bytes,
) {
    streams.push(StreamInfo {
        name,
        offset: blob.len(),
        length: payload.len(),
    });
    blob.extend_from_slice(&payload);
}

/// Per-column stream encoder; the shape mirrors the reader variants.
enum ValueWriter {
    TinyInt(RunLengthByteWriter),
    Int(RunLengthIntegerWriter),
    Float(StreamWriter),
    Double(StreamWriter),
    Decimal {
        int_writer: RunLengthIntegerWriter,
        frac_writer: RunLengthIntegerWriter,
    },
    LargeInt {
        high_writer: RunLengthIntegerWriter,
        low_writer: RunLengthIntegerWriter,
    },
    StringDirect {
        data: StreamWriter,
        lengths: RunLengthIntegerWriter,
    },
    StringDictionary {
        codes: RunLengthIntegerWriter,
        dictionary: BTreeMap<String, u64>,
        dictionary_data: Bytes,
        dictionary_lengths: Bytes,
    },
}

impl ValueWriter {
    fn create(
        desc: &ColumnDesc,
        values: &[&Datum],
        dictionary_threshold: f64,
    ) -> SegmentResult<Self> {
        let writer = match desc.logical_type {
            LogicalType::TinyInt | LogicalType::UnsignedTinyInt => {
                Self::TinyInt(RunLengthByteWriter::new())
            }
            LogicalType::SmallInt
            | LogicalType::Int
            | LogicalType::BigInt
            | LogicalType::Date
            | LogicalType::DateTime
            | LogicalType::DiscreteDouble => Self::Int(RunLengthIntegerWriter::new(true)),
            LogicalType::UnsignedSmallInt
            | LogicalType::UnsignedInt
            | LogicalType::UnsignedBigInt => Self::Int(RunLengthIntegerWriter::new(false)),
            LogicalType::Float => Self::Float(StreamWriter::new()),
            LogicalType::Double => Self::Double(StreamWriter::new()),
            LogicalType::Decimal { .. } => Self::Decimal {
                int_writer: RunLengthIntegerWriter::new(true),
                frac_writer: RunLengthIntegerWriter::new(true),
            },
            LogicalType::LargeInt => Self::LargeInt {
                high_writer: RunLengthIntegerWriter::new(true),
                low_writer: RunLengthIntegerWriter::new(true),
            },
            LogicalType::Char { .. } | LogicalType::Varchar { .. } | LogicalType::Hll => {
                Self::create_string(desc, values, dictionary_threshold)?
            }
            other => return Err(SegmentError::UnsupportedType(other)),
        };
        Ok(writer)
    }

    fn create_string(
        desc: &ColumnDesc,
        values: &[&Datum],
        dictionary_threshold: f64,
    ) -> SegmentResult<Self> {
        let mut distinct = BTreeMap::new();
        let mut total = 0usize;
        for datum in values {
            if let Some(value) = datum {
                total += 1;
                distinct.insert(stored_string(desc, value)?, 0u64);
            }
        }
        let use_dictionary =
            total > 0 && (distinct.len() as f64) / (total as f64) <= dictionary_threshold;
        if !use_dictionary {
            return Ok(Self::StringDirect {
                data: StreamWriter::new(),
                lengths: RunLengthIntegerWriter::new(false),
            });
        }

        for (code, slot) in distinct.values_mut().enumerate() {
            *slot = code as u64;
        }
        let mut dictionary_data = StreamWriter::new();
        let mut dictionary_lengths = RunLengthIntegerWriter::new(false);
        for item in distinct.keys() {
            dictionary_lengths.write(item.len() as i64);
            dictionary_data.write_all(item.as_bytes());
        }
        Ok(Self::StringDictionary {
            codes: RunLengthIntegerWriter::new(false),
            dictionary: distinct,
            dictionary_data: dictionary_data.finish(),
            dictionary_lengths: dictionary_lengths.finish(),
        })
    }

    /// Records restart offsets in the same order the matching reader seeks
    /// its streams.
    fn record_position(&self, position: &mut Position) {
        match self {
            Self::TinyInt(writer) => writer.record_position(position),
            Self::Int(writer) => writer.record_position(position),
            Self::Float(out) | Self::Double(out) => position.push(out.len() as u64),
            Self::Decimal {
                int_writer,
                frac_writer,
            } => {
                int_writer.record_position(position);
                frac_writer.record_position(position);
            }
            Self::LargeInt {
                high_writer,
                low_writer,
            } => {
                high_writer.record_position(position);
                low_writer.record_position(position);
            }
            Self::StringDirect { data, lengths } => {
                position.push(data.len() as u64);
                lengths.record_position(position);
            }
            Self::StringDictionary { codes, .. } => codes.record_position(position),
        }
    }

    fn write(&mut self, desc: &ColumnDesc, value: &ScalarImpl) -> SegmentResult<()> {
        match (self, value) {
            (Self::TinyInt(writer), ScalarImpl::Int8(v)) => writer.write(*v as u8),
            (Self::TinyInt(writer), ScalarImpl::UInt8(v)) => writer.write(*v),
            (Self::Int(writer), v) => writer.write(integral_repr(v)?),
            (Self::Float(out), ScalarImpl::Float32(v)) => out.write_all(&v.to_le_bytes()),
            (Self::Double(out), ScalarImpl::Float64(v)) => out.write_all(&v.to_le_bytes()),
            (
                Self::Decimal {
                    int_writer,
                    frac_writer,
                },
                ScalarImpl::Decimal(v),
            ) => {
                int_writer.write(v.int_part());
                frac_writer.write(v.frac_part());
            }
            (
                Self::LargeInt {
                    high_writer,
                    low_writer,
                },
                ScalarImpl::Int128(v),
            ) => {
                high_writer.write((v >> 64) as i64);
                low_writer.write(*v as u64 as i64);
            }
            (Self::StringDirect { data, lengths }, v) => {
                let stored = stored_string(desc, v)?;
                lengths.write(stored.len() as i64);
                data.write_all(stored.as_bytes());
            }
            (
                Self::StringDictionary {
                    codes, dictionary, ..
                },
                v,
            ) => {
                let stored = stored_string(desc, v)?;
                let code = dictionary
                    .get(&stored)
                    .copied()
                    .ok_or(SegmentError::InputParameter("value missing from dictionary"))?;
                codes.write(code as i64);
            }
            _ => return Err(SegmentError::InputParameter("value mismatches column type")),
        }
        Ok(())
    }

    fn encoding(&self) -> Option<ColumnEncoding> {
        match self {
            Self::StringDirect { .. } => Some(ColumnEncoding {
                kind: EncodingKind::Direct,
                dictionary_size: 0,
            }),
            Self::StringDictionary { dictionary, .. } => Some(ColumnEncoding {
                kind: EncodingKind::Dictionary,
                dictionary_size: dictionary.len() as u32,
            }),
            _ => None,
        }
    }

    fn into_streams(self) -> Vec<(StreamKind, Bytes)> {
        match self {
            Self::TinyInt(writer) => vec![(StreamKind::Data, writer.finish())],
            Self::Int(writer) => vec![(StreamKind::Data, writer.finish())],
            Self::Float(out) | Self::Double(out) => vec![(StreamKind::Data, out.finish())],
            Self::Decimal {
                int_writer,
                frac_writer,
            } => vec![
                (StreamKind::Data, int_writer.finish()),
                (StreamKind::Secondary, frac_writer.finish()),
            ],
            Self::LargeInt {
                high_writer,
                low_writer,
            } => vec![
                (StreamKind::Data, high_writer.finish()),
                (StreamKind::Secondary, low_writer.finish()),
            ],
            Self::StringDirect { data, lengths } => vec![
                (StreamKind::Data, data.finish()),
                (StreamKind::Length, lengths.finish()),
            ],
            Self::StringDictionary {
                codes,
                dictionary_data,
                dictionary_lengths,
                ..
            } => vec![
                (StreamKind::Data, codes.finish()),
                (StreamKind::Length, dictionary_lengths),
                (StreamKind::DictionaryData, dictionary_data),
            ],
        }
    }
}

/// The `i64` carried on the integer codec for each integer-family scalar.
/// Unsigned values travel as raw bit patterns.
fn integral_repr(value: &ScalarImpl) -> SegmentResult<i64> {
    Ok(match value {
        ScalarImpl::Int16(v) => *v as i64,
        ScalarImpl::UInt16(v) => *v as i64,
        ScalarImpl::Int32(v) => *v as i64,
        ScalarImpl::UInt32(v) => *v as i64,
        ScalarImpl::Int64(v) => *v,
        ScalarImpl::UInt64(v) => *v as i64,
        ScalarImpl::Date(v) => v.days() as i64,
        ScalarImpl::DateTime(v) => v.timestamp(),
        // Discrete doubles hold integral values by contract.
        ScalarImpl::Float64(v) => *v as i64,
        _ => return Err(SegmentError::InputParameter("value mismatches column type")),
    })
}

/// The byte form a string value takes in the segment: CHAR pads with
/// trailing spaces to the declared length, everything else is stored as is.
fn stored_string(desc: &ColumnDesc, value: &ScalarImpl) -> SegmentResult<String> {
    let text = match value {
        ScalarImpl::Utf8(s) => s,
        _ => return Err(SegmentError::InputParameter("value mismatches column type")),
    };
    match desc.logical_type {
        LogicalType::Char { len } => {
            if text.len() > len as usize {
                return Err(SegmentError::BufferOverflow(format!(
                    "CHAR({len}) value of {} bytes",
                    text.len()
                )));
            }
            let mut padded = text.clone();
            padded.extend(std::iter::repeat(' ').take(len as usize - text.len()));
            Ok(padded)
        }
        LogicalType::Varchar { len } => {
            if text.len() > len as usize {
                return Err(SegmentError::BufferOverflow(format!(
                    "VARCHAR({len}) value of {} bytes",
                    text.len()
                )));
            }
            Ok(text.clone())
        }
        _ => Ok(text.clone()),
    }
}
