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
use shale_common::types::ScalarImpl;

use super::tolerate_stream_eof;
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{PositionProvider, Segment, StreamKind, StreamName, StreamReader};

/// FLOAT and DOUBLE columns: raw little-endian IEEE-754 words, no RLE.
pub(crate) struct FloatReader {
    unique_id: ColumnUniqueId,
    /// Value width in bytes: 4 for FLOAT, 8 for DOUBLE.
    width: usize,
    data: Option<StreamReader>,
}

impl FloatReader {
    pub fn f32(unique_id: ColumnUniqueId) -> Self {
        Self {
            unique_id,
            width: 4,
            data: None,
        }
    }

    pub fn f64(unique_id: ColumnUniqueId) -> Self {
        Self {
            unique_id,
            width: 8,
            data: None,
        }
    }

    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        self.data = Some(segment.stream(StreamName::new(self.unique_id, StreamKind::Data))?);
        Ok(())
    }

    fn data(&mut self) -> SegmentResult<&mut StreamReader> {
        self.data.as_mut().ok_or(SegmentError::NotInited)
    }

    pub fn next_value(&mut self) -> SegmentResult<ScalarImpl> {
        let width = self.width;
        let stream = self.data()?;
        if width == 4 {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf)?;
            Ok(ScalarImpl::Float32(f32::from_le_bytes(buf)))
        } else {
            let mut buf = [0u8; 8];
            stream.read_exact(&mut buf)?;
            Ok(ScalarImpl::Float64(f64::from_le_bytes(buf)))
        }
    }

    pub fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        let width = self.width;
        self.data()?.skip(count as usize * width)
    }

    /// Consumes a single byte offset.
    pub fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        let offset = provider.next_offset()?;
        let stream = self.data.as_mut().ok_or(SegmentError::NotInited)?;
        tolerate_stream_eof(stream.seek(offset as usize), tolerate_eof)
    }
}
