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

use shale_common::catalog::ColumnUniqueId;
use shale_common::types::{Date, DateTime, LogicalType, ScalarImpl};

use super::tolerate_stream_eof;
use crate::codec::{RunLengthByteReader, RunLengthIntegerReader};
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{PositionProvider, Segment, StreamKind, StreamName};

/// Reader for TINYINT columns: one byte-RLE DATA stream.
pub(crate) struct TinyIntReader {
    unique_id: ColumnUniqueId,
    logical_type: LogicalType,
    data: Option<RunLengthByteReader>,
}

impl TinyIntReader {
    pub fn new(unique_id: ColumnUniqueId, logical_type: LogicalType) -> Self {
        Self {
            unique_id,
            logical_type,
            data: None,
        }
    }

    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        let stream = segment.stream(StreamName::new(self.unique_id, StreamKind::Data))?;
        self.data = Some(RunLengthByteReader::new(stream));
        Ok(())
    }

    fn data(&mut self) -> SegmentResult<&mut RunLengthByteReader> {
        self.data.as_mut().ok_or(SegmentError::NotInited)
    }

    pub fn next_value(&mut self) -> SegmentResult<ScalarImpl> {
        let signed = matches!(self.logical_type, LogicalType::TinyInt);
        let byte = self.data()?.next()?;
        Ok(if signed {
            ScalarImpl::Int8(byte as i8)
        } else {
            ScalarImpl::UInt8(byte)
        })
    }

    pub fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        self.data()?.skip(count)
    }

    pub fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        let reader = self.data.as_mut().ok_or(SegmentError::NotInited)?;
        tolerate_stream_eof(reader.seek(provider), tolerate_eof)
    }
}

/// Reader for the integer family stored through the 64-bit RLE codec:
/// SMALLINT through BIGINT (signed and unsigned), DATE, DATETIME and
/// DISCRETE_DOUBLE.
pub(crate) struct IntReader {
    unique_id: ColumnUniqueId,
    logical_type: LogicalType,
    data: Option<RunLengthIntegerReader>,
}

impl IntReader {
    pub fn new(unique_id: ColumnUniqueId, logical_type: LogicalType) -> Self {
        Self {
            unique_id,
            logical_type,
            data: None,
        }
    }

    fn signed(&self) -> bool {
        !matches!(
            self.logical_type,
            LogicalType::UnsignedSmallInt | LogicalType::UnsignedInt | LogicalType::UnsignedBigInt
        )
    }

    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        let stream = segment.stream(StreamName::new(self.unique_id, StreamKind::Data))?;
        self.data = Some(RunLengthIntegerReader::new(stream, self.signed()));
        Ok(())
    }

    fn data(&mut self) -> SegmentResult<&mut RunLengthIntegerReader> {
        self.data.as_mut().ok_or(SegmentError::NotInited)
    }

    pub fn next_value(&mut self) -> SegmentResult<ScalarImpl> {
        let logical_type = self.logical_type;
        let raw = self.data()?.next()?;
        let value = match logical_type {
            LogicalType::SmallInt => ScalarImpl::Int16(raw as i16),
            LogicalType::UnsignedSmallInt => ScalarImpl::UInt16(raw as u64 as u16),
            LogicalType::Int => ScalarImpl::Int32(raw as i32),
            LogicalType::UnsignedInt => ScalarImpl::UInt32(raw as u64 as u32),
            LogicalType::BigInt => ScalarImpl::Int64(raw),
            LogicalType::UnsignedBigInt => ScalarImpl::UInt64(raw as u64),
            LogicalType::Date => ScalarImpl::Date(Date::from_days(raw as i32)),
            LogicalType::DateTime => ScalarImpl::DateTime(DateTime::from_timestamp(raw)),
            LogicalType::DiscreteDouble => ScalarImpl::Float64(raw as f64),
            other => return Err(SegmentError::UnsupportedType(other)),
        };
        Ok(value)
    }

    pub fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        self.data()?.skip(count)
    }

    pub fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        let reader = self.data.as_mut().ok_or(SegmentError::NotInited)?;
        tolerate_stream_eof(reader.seek(provider), tolerate_eof)
    }
}
