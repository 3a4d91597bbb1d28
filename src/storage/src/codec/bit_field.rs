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

use super::{RunLengthByteReader, RunLengthByteWriter};
use crate::error::SegmentResult;
use crate::segment::{Position, PositionProvider, StreamReader};

/// One bit per row, packed MSB-first into bytes that are then run-length
/// encoded. Present streams use it: 1 = value present, 0 = NULL.
pub struct BitFieldWriter {
    byte_writer: RunLengthByteWriter,
    current: u8,
    bits_left: u8,
}

impl Default for BitFieldWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitFieldWriter {
    pub fn new() -> Self {
        Self {
            byte_writer: RunLengthByteWriter::new(),
            current: 0,
            bits_left: 8,
        }
    }

    pub fn write(&mut self, bit: bool) {
        if bit {
            self.current |= 1 << (self.bits_left - 1);
        }
        self.bits_left -= 1;
        if self.bits_left == 0 {
            self.byte_writer.write(self.current);
            self.current = 0;
            self.bits_left = 8;
        }
    }

    /// Appends the byte-codec offsets plus the bit offset inside the pending
    /// byte, three values in total.
    pub fn record_position(&self, position: &mut Position) {
        self.byte_writer.record_position(position);
        position.push((8 - self.bits_left) as u64);
    }

    pub fn finish(mut self) -> Bytes {
        if self.bits_left != 8 {
            self.byte_writer.write(self.current);
        }
        self.byte_writer.finish()
    }
}

/// Decoder for bit streams; see [`BitFieldWriter`].
pub struct BitFieldReader {
    byte_reader: RunLengthByteReader,
    current: u8,
    bits_left: u8,
}

impl BitFieldReader {
    pub fn new(stream: StreamReader) -> Self {
        Self {
            byte_reader: RunLengthByteReader::new(stream),
            current: 0,
            bits_left: 0,
        }
    }

    pub fn next(&mut self) -> SegmentResult<bool> {
        if self.bits_left == 0 {
            self.current = self.byte_reader.next()?;
            self.bits_left = 8;
        }
        self.bits_left -= 1;
        Ok((self.current >> self.bits_left) & 1 == 1)
    }

    pub fn skip(&mut self, count: u64) -> SegmentResult<()> {
        let in_byte = (self.bits_left as u64).min(count);
        self.bits_left -= in_byte as u8;
        let mut remaining = count - in_byte;
        let whole_bytes = remaining / 8;
        if whole_bytes > 0 {
            self.byte_reader.skip(whole_bytes)?;
            remaining -= whole_bytes * 8;
        }
        if remaining > 0 {
            self.current = self.byte_reader.next()?;
            self.bits_left = 8 - remaining as u8;
        }
        Ok(())
    }

    /// Consumes three offsets: two for the underlying byte codec and one bit
    /// offset within the restart byte.
    pub fn seek(&mut self, provider: &mut PositionProvider<'_>) -> SegmentResult<()> {
        self.byte_reader.seek(provider)?;
        let bit_offset = provider.next_offset()?;
        debug_assert!(bit_offset < 8);
        if bit_offset > 0 {
            self.current = self.byte_reader.next()?;
            self.bits_left = 8 - bit_offset as u8;
        } else {
            self.bits_left = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::error::SegmentError;

    fn encode(bits: &[bool]) -> Bytes {
        let mut writer = BitFieldWriter::new();
        for &b in bits {
            writer.write(b);
        }
        writer.finish()
    }

    #[test]
    fn test_round_trip() {
        let bits = [true, false, true, true, false, true];
        let mut reader = BitFieldReader::new(StreamReader::new(encode(&bits)));
        for &b in &bits {
            assert_eq!(reader.next().unwrap(), b);
        }
    }

    #[test]
    fn test_long_uniform_runs() {
        for value in [true, false] {
            let bits = vec![value; 4096];
            let mut reader = BitFieldReader::new(StreamReader::new(encode(&bits)));
            for _ in 0..4096 {
                assert_eq!(reader.next().unwrap(), value);
            }
            assert_matches!(reader.next(), Err(SegmentError::DataEof));
        }
    }

    #[test]
    fn test_skip_matches_read() {
        let mut rng = StdRng::seed_from_u64(7);
        let bits: Vec<bool> = (0..1000).map(|_| rng.gen_bool(0.7)).collect();
        let encoded = encode(&bits);
        for skip in [0usize, 1, 7, 8, 9, 63, 64, 65, 999] {
            let mut reader = BitFieldReader::new(StreamReader::new(encoded.clone()));
            reader.skip(skip as u64).unwrap();
            assert_eq!(reader.next().unwrap(), bits[skip], "skip {skip}");
        }
    }

    #[test]
    fn test_seek_mid_byte() {
        let mut writer = BitFieldWriter::new();
        let mut bits = Vec::new();
        let mut position = Position::default();
        let mut rng = StdRng::seed_from_u64(11);
        for i in 0..200 {
            if i == 77 {
                writer.record_position(&mut position);
            }
            let b = rng.gen_bool(0.5);
            writer.write(b);
            bits.push(b);
        }
        let encoded = writer.finish();

        let mut reader = BitFieldReader::new(StreamReader::new(encoded));
        let mut provider = position.provider();
        reader.seek(&mut provider).unwrap();
        for expected in &bits[77..] {
            assert_eq!(reader.next().unwrap(), *expected);
        }
    }
}
