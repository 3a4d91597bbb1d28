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
use crate::segment::{Position, StreamReader, StreamWriter};

/// A control byte precedes each run: values `0..=127` announce
/// `control + 3` repetitions of the following byte, and `-1..=-128` (as
/// `i8`) announce that many literal bytes.
pub const MIN_REPEAT: usize = 3;
pub const MAX_LITERAL: usize = 128;
pub const MAX_REPEAT: usize = 127 + MIN_REPEAT;

/// Run-length encoder for byte streams.
pub struct RunLengthByteWriter {
    out: StreamWriter,
    literals: [u8; MAX_LITERAL],
    num_literals: usize,
    repeat: bool,
    tail_run_length: usize,
}

impl Default for RunLengthByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLengthByteWriter {
    pub fn new() -> Self {
        Self {
            out: StreamWriter::new(),
            literals: [0; MAX_LITERAL],
            num_literals: 0,
            repeat: false,
            tail_run_length: 0,
        }
    }

    fn write_values(&mut self) {
        if self.num_literals == 0 {
            return;
        }
        if self.repeat {
            self.out.write_u8((self.num_literals - MIN_REPEAT) as u8);
            self.out.write_u8(self.literals[0]);
        } else {
            self.out.write_u8((-(self.num_literals as i32)) as u8);
            self.out.write_all(&self.literals[..self.num_literals]);
        }
        self.repeat = false;
        self.tail_run_length = 0;
        self.num_literals = 0;
    }

    pub fn write(&mut self, value: u8) {
        if self.num_literals == 0 {
            self.literals[0] = value;
            self.num_literals = 1;
            self.tail_run_length = 1;
        } else if self.repeat {
            if value == self.literals[0] {
                self.num_literals += 1;
                if self.num_literals == MAX_REPEAT {
                    self.write_values();
                }
            } else {
                self.write_values();
                self.literals[0] = value;
                self.num_literals = 1;
                self.tail_run_length = 1;
            }
        } else {
            if value == self.literals[self.num_literals - 1] {
                self.tail_run_length += 1;
            } else {
                self.tail_run_length = 1;
            }
            if self.tail_run_length == MIN_REPEAT {
                // The trailing bytes turn into a repeat run; flush whatever
                // precedes them as literals first.
                if self.num_literals + 1 == MIN_REPEAT {
                    self.repeat = true;
                    self.num_literals += 1;
                } else {
                    self.num_literals -= MIN_REPEAT - 1;
                    self.write_values();
                    self.literals[0] = value;
                    self.repeat = true;
                    self.num_literals = MIN_REPEAT;
                }
            } else {
                self.literals[self.num_literals] = value;
                self.num_literals += 1;
                if self.num_literals == MAX_LITERAL {
                    self.write_values();
                }
            }
        }
    }

    pub fn flush(&mut self) {
        self.write_values();
    }

    /// Appends this writer's restart offsets: the stream offset the next run
    /// will start at, and how many buffered values precede the restart row
    /// within that run.
    pub fn record_position(&self, position: &mut Position) {
        position.push(self.out.len() as u64);
        position.push(self.num_literals as u64);
    }

    pub fn finish(mut self) -> Bytes {
        self.write_values();
        self.out.finish()
    }
}

/// Run-length decoder for byte streams.
pub struct RunLengthByteReader {
    stream: StreamReader,
    literals: [u8; MAX_LITERAL],
    num_literals: usize,
    used: usize,
    repeat: bool,
}

impl RunLengthByteReader {
    pub fn new(stream: StreamReader) -> Self {
        Self {
            stream,
            literals: [0; MAX_LITERAL],
            num_literals: 0,
            used: 0,
            repeat: false,
        }
    }

    fn read_values(&mut self) -> SegmentResult<()> {
        let control = self.stream.read_u8()? as i8;
        self.used = 0;
        if control >= 0 {
            self.repeat = true;
            self.num_literals = control as usize + MIN_REPEAT;
            self.literals[0] = self.stream.read_u8().map_err(|e| match e {
                SegmentError::DataEof => SegmentError::ShortRead {
                    expected: 1,
                    actual: 0,
                },
                other => other,
            })?;
        } else {
            self.repeat = false;
            self.num_literals = (-(control as i32)) as usize;
            self.stream
                .read_exact(&mut self.literals[..self.num_literals])
                .map_err(|e| match e {
                    SegmentError::DataEof => SegmentError::ShortRead {
                        expected: self.num_literals,
                        actual: 0,
                    },
                    other => other,
                })?;
        }
        Ok(())
    }

    pub fn next(&mut self) -> SegmentResult<u8> {
        if self.used == self.num_literals {
            self.read_values()?;
        }
        let value = if self.repeat {
            self.literals[0]
        } else {
            self.literals[self.used]
        };
        self.used += 1;
        Ok(value)
    }

    pub fn skip(&mut self, mut count: u64) -> SegmentResult<()> {
        while count > 0 {
            if self.used == self.num_literals {
                self.read_values()?;
            }
            let available = (self.num_literals - self.used) as u64;
            let taken = available.min(count);
            self.used += taken as usize;
            count -= taken;
        }
        Ok(())
    }

    /// Consumes two offsets: the stream offset of a run boundary and the
    /// count of values to drop within that run.
    pub fn seek(&mut self, provider: &mut crate::segment::PositionProvider<'_>) -> SegmentResult<()> {
        let offset = provider.next_offset()?;
        let within = provider.next_offset()?;
        self.stream.seek(offset as usize)?;
        self.num_literals = 0;
        self.used = 0;
        self.skip(within)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn round_trip(values: &[u8]) -> (Bytes, Vec<u8>) {
        let mut writer = RunLengthByteWriter::new();
        for &v in values {
            writer.write(v);
        }
        let encoded = writer.finish();
        let mut reader = RunLengthByteReader::new(StreamReader::new(encoded.clone()));
        let decoded: Vec<u8> = (0..values.len()).map(|_| reader.next().unwrap()).collect();
        (encoded, decoded)
    }

    #[test]
    fn test_round_trip_mixed() {
        let mut values = vec![7, 7, 7, 7, 1, 2, 3, 9, 9, 9];
        values.extend(0..=200u8);
        let (_, decoded) = round_trip(&values);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_run_length_boundaries() {
        for len in [1usize, 2, 3, 127, 128, 129, 130, 131, 300] {
            let values = vec![42u8; len];
            let (_, decoded) = round_trip(&values);
            assert_eq!(decoded, values, "run length {len}");
        }
        // A long literal stretch with no repeats crosses the 128 flush point.
        let values: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        let (_, decoded) = round_trip(&values);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_repeat_encoding_is_compact() {
        let values = vec![5u8; MAX_REPEAT];
        let (encoded, _) = round_trip(&values);
        // One control byte plus one value byte.
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0], (MAX_REPEAT - MIN_REPEAT) as u8);
        assert_eq!(encoded[1], 5);
    }

    #[test]
    fn test_skip_matches_read() {
        let mut values = vec![1, 1, 1, 1, 2, 3, 4, 5];
        values.extend(vec![9u8; 140]);
        values.extend(0..100u8);
        let mut writer = RunLengthByteWriter::new();
        for &v in &values {
            writer.write(v);
        }
        let encoded = writer.finish();

        for skip in [0usize, 1, 3, 7, 100, values.len() - 1] {
            let mut reader = RunLengthByteReader::new(StreamReader::new(encoded.clone()));
            reader.skip(skip as u64).unwrap();
            assert_eq!(reader.next().unwrap(), values[skip], "skip {skip}");
        }
    }

    #[test]
    fn test_seek_restarts_at_recorded_position() {
        let mut writer = RunLengthByteWriter::new();
        let mut values = Vec::new();
        let mut position = Position::default();
        for i in 0..500u32 {
            if i == 256 {
                writer.record_position(&mut position);
            }
            let v = if i < 250 { 8 } else { (i % 17) as u8 };
            writer.write(v);
            values.push(v);
        }
        let encoded = writer.finish();

        let mut reader = RunLengthByteReader::new(StreamReader::new(encoded));
        let mut provider = position.provider();
        reader.seek(&mut provider).unwrap();
        for expected in &values[256..] {
            assert_eq!(reader.next().unwrap(), *expected);
        }
        assert_matches!(reader.next(), Err(SegmentError::DataEof));
    }

    #[test]
    fn test_eof() {
        let (encoded, _) = round_trip(&[1, 2, 3, 3, 3]);
        let mut reader = RunLengthByteReader::new(StreamReader::new(encoded));
        reader.skip(5).unwrap();
        assert_matches!(reader.next(), Err(SegmentError::DataEof));
    }
}
