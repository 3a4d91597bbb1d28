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

use bytes::Bytes;

use crate::error::{SegmentError, SegmentResult};

/// Cursor over one immutable stream payload inside a segment.
///
/// Reads past the end report `DataEof` (nothing left at all) or `ShortRead`
/// (a prefix was available); seeks beyond the end report `StreamEof`.
#[derive(Debug, Clone)]
pub struct StreamReader {
    data: Bytes,
    pos: usize,
}

impl StreamReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> SegmentResult<u8> {
        if self.pos >= self.data.len() {
            return Err(SegmentError::DataEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Returns a zero-copy slice of the next `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> SegmentResult<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let available = self.remaining();
        if available == 0 {
            return Err(SegmentError::DataEof);
        }
        if available < len {
            return Err(SegmentError::ShortRead {
                expected: len,
                actual: available,
            });
        }
        let slice = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> SegmentResult<()> {
        let slice = self.read_slice(buf.len())?;
        buf.copy_from_slice(&slice);
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> SegmentResult<()> {
        if self.remaining() < len {
            return Err(SegmentError::DataEof);
        }
        self.pos += len;
        Ok(())
    }

    pub fn seek(&mut self, offset: usize) -> SegmentResult<()> {
        if offset > self.data.len() {
            return Err(SegmentError::StreamEof);
        }
        self.pos = offset;
        Ok(())
    }
}

/// Append-only buffer a codec writer emits into while a segment is built.
#[derive(Debug, Default)]
pub struct StreamWriter {
    data: Vec<u8>,
}

impl StreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn write_all(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.data)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_read_and_seek() {
        let mut reader = StreamReader::new(Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_slice(2).unwrap().as_ref(), &[2, 3]);
        reader.seek(0).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 1);
        reader.seek(4).unwrap();
        assert_matches!(reader.read_u8(), Err(SegmentError::DataEof));
        assert_matches!(reader.seek(5), Err(SegmentError::StreamEof));
    }

    #[test]
    fn test_short_read() {
        let mut reader = StreamReader::new(Bytes::from_static(&[1, 2]));
        assert_matches!(
            reader.read_slice(3),
            Err(SegmentError::ShortRead {
                expected: 3,
                actual: 2
            })
        );
    }
}
