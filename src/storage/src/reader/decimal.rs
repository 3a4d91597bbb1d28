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
use shale_common::types::{Decimal, ScalarImpl};

use super::tolerate_stream_eof;
use crate::codec::RunLengthIntegerReader;
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{PositionProvider, Segment, StreamKind, StreamName};

/// DECIMAL columns: the integral part rides DATA, the fractional part rides
/// SECONDARY, both signed RLE integer streams.
pub(crate) struct DecimalReader {
    unique_id: ColumnUniqueId,
    int_reader: Option<RunLengthIntegerReader>,
    frac_reader: Option<RunLengthIntegerReader>,
}

impl DecimalReader {
    pub fn new(unique_id: ColumnUniqueId) -> Self {
        Self {
            unique_id,
            int_reader: None,
            frac_reader: None,
        }
    }

    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        let int_stream = segment.stream(StreamName::new(self.unique_id, StreamKind::Data))?;
        let frac_stream = segment.stream(StreamName::new(self.unique_id, StreamKind::Secondary))?;
        self.int_reader = Some(RunLengthIntegerReader::new(int_stream, true));
        self.frac_reader = Some(RunLengthIntegerReader::new(frac_stream, true));
        Ok(())
    }

    fn readers(
        &mut self,
    ) -> SegmentResult<(&mut RunLengthIntegerReader, &mut RunLengthIntegerReader)> {
        match (self.int_reader.as_mut(), self.frac_reader.as_mut()) {
            (Some(int_reader), Some(frac_reader)) => Ok((int_reader, frac_reader)),
            _ => Err(SegmentError::NotInited),
        }
    }

    pub fn next_value(&mut self) -> SegmentResult<ScalarImpl> {
        let (int_reader, frac_reader) = self.readers()?;
        let int_part = int_reader.next()?;
        let frac_part = frac_reader.next()?;
        Ok(ScalarImpl::Decimal(Decimal::new(int_part, frac_part)))
    }

    pub fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        let (int_reader, frac_reader) = self.readers()?;
        int_reader.skip(count)?;
        frac_reader.skip(count)
    }

    /// Seeks DATA then SECONDARY, in declaration order.
    pub fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        let (int_reader, frac_reader) = self.readers()?;
        tolerate_stream_eof(int_reader.seek(provider), tolerate_eof)?;
        tolerate_stream_eof(frac_reader.seek(provider), tolerate_eof)
    }
}

/// LARGEINT (128-bit) columns: high 64 bits in DATA, low 64 bits in
/// SECONDARY, both signed RLE integer streams.
pub(crate) struct LargeIntReader {
    unique_id: ColumnUniqueId,
    high_reader: Option<RunLengthIntegerReader>,
    low_reader: Option<RunLengthIntegerReader>,
}

impl LargeIntReader {
    pub fn new(unique_id: ColumnUniqueId) -> Self {
        Self {
            unique_id,
            high_reader: None,
            low_reader: None,
        }
    }

    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        let high_stream = segment.stream(StreamName::new(self.unique_id, StreamKind::Data))?;
        let low_stream = segment.stream(StreamName::new(self.unique_id, StreamKind::Secondary))?;
        self.high_reader = Some(RunLengthIntegerReader::new(high_stream, true));
        self.low_reader = Some(RunLengthIntegerReader::new(low_stream, true));
        Ok(())
    }

    fn readers(
        &mut self,
    ) -> SegmentResult<(&mut RunLengthIntegerReader, &mut RunLengthIntegerReader)> {
        match (self.high_reader.as_mut(), self.low_reader.as_mut()) {
            (Some(high_reader), Some(low_reader)) => Ok((high_reader, low_reader)),
            _ => Err(SegmentError::NotInited),
        }
    }

    pub fn next_value(&mut self) -> SegmentResult<ScalarImpl> {
        let (high_reader, low_reader) = self.readers()?;
        let high = high_reader.next()?;
        let low = low_reader.next()?;
        let value = ((high as i128) << 64) | (low as u64 as i128);
        Ok(ScalarImpl::Int128(value))
    }

    pub fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        let (high_reader, low_reader) = self.readers()?;
        high_reader.skip(count)?;
        low_reader.skip(count)
    }

    /// Seeks DATA then SECONDARY, in declaration order.
    pub fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        let (high_reader, low_reader) = self.readers()?;
        tolerate_stream_eof(high_reader.seek(provider), tolerate_eof)?;
        tolerate_stream_eof(low_reader.seek(provider), tolerate_eof)
    }
}
