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

//! Run-length coding for 64-bit integers with three sub-encodings chosen
//! per run:
//!
//! * **short repeat** — `3..=10` repetitions of one value, stored once;
//! * **direct** — up to 256 values bit-packed at the run's maximum width;
//! * **patched base** — up to 256 values as a base plus bit-packed deltas,
//!   with an optional patch list overriding the few outliers that would
//!   otherwise blow up the delta width.
//!
//! A signed stream maps values through zigzag first so small magnitudes of
//! either sign stay narrow.
//!
//! Run headers carry the full run geometry, so `skip` advances over packed
//! bytes without unpacking a single value.

use bytes::Bytes;

use super::{
    bit_width, byte_width, pack_bits, packed_len, unpack_bits_at, zigzag_decode, zigzag_encode,
};
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{Position, PositionProvider, StreamReader, StreamWriter};

pub const MIN_REPEAT: usize = 3;
pub const MAX_SHORT_REPEAT: usize = 10;
pub const MAX_RUN_LENGTH: usize = 256;
pub const MAX_PATCHES: usize = 31;

const MODE_SHORT_REPEAT: u8 = 0;
const MODE_DIRECT: u8 = 1;
const MODE_PATCHED_BASE: u8 = 2;

/// Run-length encoder for 64-bit integer streams.
pub struct RunLengthIntegerWriter {
    out: StreamWriter,
    signed: bool,
    literals: Vec<i64>,
    tail_run_length: usize,
}

impl RunLengthIntegerWriter {
    pub fn new(signed: bool) -> Self {
        Self {
            out: StreamWriter::new(),
            signed,
            literals: Vec::with_capacity(MAX_RUN_LENGTH),
            tail_run_length: 0,
        }
    }

    fn map(&self, value: i64) -> u64 {
        if self.signed {
            zigzag_encode(value)
        } else {
            value as u64
        }
    }

    pub fn write(&mut self, value: i64) {
        if self.literals.last() == Some(&value) {
            self.tail_run_length += 1;
        } else {
            self.tail_run_length = 1;
        }
        self.literals.push(value);

        if self.tail_run_length == MIN_REPEAT && self.literals.len() > MIN_REPEAT {
            // A repeat is forming at the tail; flush everything before it so
            // the repeat starts a run of its own.
            let keep = self.literals.split_off(self.literals.len() - MIN_REPEAT);
            let prefix = std::mem::replace(&mut self.literals, keep);
            self.write_literal_run(&prefix);
        }
        if self.literals.len() == MAX_RUN_LENGTH {
            self.flush_buffer();
        }
    }

    pub fn flush(&mut self) {
        self.flush_buffer();
    }

    /// Appends this writer's restart offsets: the stream offset the next run
    /// will start at and the count of buffered values preceding the restart
    /// row.
    pub fn record_position(&self, position: &mut Position) {
        position.push(self.out.len() as u64);
        position.push(self.literals.len() as u64);
    }

    pub fn finish(mut self) -> Bytes {
        self.flush_buffer();
        self.out.finish()
    }

    fn flush_buffer(&mut self) {
        if self.literals.is_empty() {
            return;
        }
        let values = std::mem::take(&mut self.literals);
        if self.tail_run_length == values.len()
            && (MIN_REPEAT..=MAX_SHORT_REPEAT).contains(&values.len())
        {
            self.write_short_repeat(values[0], values.len());
        } else {
            self.write_literal_run(&values);
        }
        self.tail_run_length = 0;
    }

    fn write_short_repeat(&mut self, value: i64, count: usize) {
        let mapped = self.map(value);
        let width = byte_width(mapped);
        self.out.write_u8(
            (MODE_SHORT_REPEAT << 6) | (((width - 1) as u8) << 3) | (count - MIN_REPEAT) as u8,
        );
        self.out.write_all(&mapped.to_be_bytes()[8 - width..]);
    }

    /// Picks the cheaper of direct and patched-base for a buffered run.
    fn write_literal_run(&mut self, values: &[i64]) {
        debug_assert!(!values.is_empty() && values.len() <= MAX_RUN_LENGTH);
        let mapped: Vec<u64> = values.iter().map(|&v| self.map(v)).collect();
        let max_width = mapped.iter().map(|&v| bit_width(v)).max().unwrap();

        let base = *mapped.iter().min().unwrap();
        let deltas: Vec<u64> = mapped.iter().map(|&v| v - base).collect();
        let delta_widths: Vec<usize> = deltas.iter().map(|&d| bit_width(d)).collect();
        let delta_max_width = *delta_widths.iter().max().unwrap();
        let mut sorted_widths = delta_widths.clone();
        sorted_widths.sort_unstable();
        let p90_width = sorted_widths[(values.len() * 9).div_ceil(10) - 1];
        let patch_count = delta_widths.iter().filter(|&&w| w > p90_width).count();
        let base_bytes = byte_width(base);

        let direct_cost = 2 + packed_len(values.len(), max_width);
        let patched_full_cost = 3 + base_bytes + packed_len(values.len(), delta_max_width);
        let patched_90_cost = if patch_count > 0 && patch_count <= MAX_PATCHES {
            Some(3 + base_bytes + packed_len(values.len(), p90_width) + 9 * patch_count)
        } else {
            None
        };

        let best_patched = match patched_90_cost {
            Some(cost) if cost < patched_full_cost => (cost, p90_width),
            _ => (patched_full_cost, delta_max_width),
        };

        if direct_cost <= best_patched.0 {
            self.out
                .write_u8((MODE_DIRECT << 6) | (max_width - 1) as u8);
            self.out.write_u8((values.len() - 1) as u8);
            let mut packed = Vec::with_capacity(packed_len(values.len(), max_width));
            pack_bits(&mut packed, &mapped, max_width);
            self.out.write_all(&packed);
        } else {
            let width = best_patched.1;
            let patches: Vec<(usize, u64)> = deltas
                .iter()
                .enumerate()
                .filter(|(_, &d)| bit_width(d) > width)
                .map(|(i, _)| (i, mapped[i]))
                .collect();
            debug_assert!(patches.len() <= MAX_PATCHES);
            let clipped: Vec<u64> = deltas
                .iter()
                .map(|&d| if bit_width(d) > width { 0 } else { d })
                .collect();

            self.out
                .write_u8((MODE_PATCHED_BASE << 6) | (width - 1) as u8);
            self.out.write_u8((values.len() - 1) as u8);
            self.out
                .write_u8((((base_bytes - 1) as u8) << 5) | patches.len() as u8);
            self.out.write_all(&base.to_be_bytes()[8 - base_bytes..]);
            let mut packed = Vec::with_capacity(packed_len(values.len(), width));
            pack_bits(&mut packed, &clipped, width);
            self.out.write_all(&packed);
            for (pos, value) in patches {
                self.out.write_u8(pos as u8);
                self.out.write_all(&value.to_be_bytes());
            }
        }
    }
}

enum RunData {
    Repeat(u64),
    Direct {
        packed: Bytes,
        width: usize,
    },
    Patched {
        packed: Bytes,
        width: usize,
        base: u64,
        patches: Vec<(usize, u64)>,
    },
}

struct Run {
    count: usize,
    consumed: usize,
    data: RunData,
}

impl Run {
    fn value_at(&self, index: usize) -> u64 {
        match &self.data {
            RunData::Repeat(value) => *value,
            RunData::Direct { packed, width } => unpack_bits_at(packed, *width, index),
            RunData::Patched {
                packed,
                width,
                base,
                patches,
            } => match patches.iter().find(|(pos, _)| *pos == index) {
                Some((_, value)) => *value,
                None => base + unpack_bits_at(packed, *width, index),
            },
        }
    }
}

/// Run-length decoder for 64-bit integer streams.
pub struct RunLengthIntegerReader {
    stream: StreamReader,
    signed: bool,
    run: Option<Run>,
}

impl RunLengthIntegerReader {
    pub fn new(stream: StreamReader, signed: bool) -> Self {
        Self {
            stream,
            signed,
            run: None,
        }
    }

    fn read_be_value(&mut self, width: usize) -> SegmentResult<u64> {
        let mut buf = [0u8; 8];
        self.stream
            .read_exact(&mut buf[8 - width..])
            .map_err(truncated)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn load_run(&mut self) -> SegmentResult<()> {
        let header = self.stream.read_u8()?;
        let run = match header >> 6 {
            MODE_SHORT_REPEAT => {
                let width = ((header >> 3) & 0x7) as usize + 1;
                let count = (header & 0x7) as usize + MIN_REPEAT;
                let value = self.read_be_value(width)?;
                Run {
                    count,
                    consumed: 0,
                    data: RunData::Repeat(value),
                }
            }
            MODE_DIRECT => {
                let width = (header & 0x3f) as usize + 1;
                let count = self.stream.read_u8().map_err(truncated)? as usize + 1;
                let packed = self
                    .stream
                    .read_slice(packed_len(count, width))
                    .map_err(truncated)?;
                Run {
                    count,
                    consumed: 0,
                    data: RunData::Direct { packed, width },
                }
            }
            MODE_PATCHED_BASE => {
                let width = (header & 0x3f) as usize + 1;
                let count = self.stream.read_u8().map_err(truncated)? as usize + 1;
                let patch_header = self.stream.read_u8().map_err(truncated)?;
                let base_bytes = ((patch_header >> 5) & 0x7) as usize + 1;
                let patch_count = (patch_header & 0x1f) as usize;
                let base = self.read_be_value(base_bytes)?;
                let packed = self
                    .stream
                    .read_slice(packed_len(count, width))
                    .map_err(truncated)?;
                let mut patches = Vec::with_capacity(patch_count);
                for _ in 0..patch_count {
                    let pos = self.stream.read_u8().map_err(truncated)? as usize;
                    let value = self.read_be_value(8)?;
                    patches.push((pos, value));
                }
                Run {
                    count,
                    consumed: 0,
                    data: RunData::Patched {
                        packed,
                        width,
                        base,
                        patches,
                    },
                }
            }
            _ => {
                return Err(SegmentError::BufferOverflow(format!(
                    "invalid integer run header {header:#04x}"
                )))
            }
        };
        self.run = Some(run);
        Ok(())
    }

    pub fn next(&mut self) -> SegmentResult<i64> {
        if self.run.as_ref().map_or(true, |r| r.consumed == r.count) {
            self.load_run()?;
        }
        let run = self.run.as_mut().unwrap();
        let mapped = run.value_at(run.consumed);
        run.consumed += 1;
        Ok(if self.signed {
            zigzag_decode(mapped)
        } else {
            mapped as i64
        })
    }

    /// Skips `count` values. Proportional to the number of runs traversed;
    /// packed runs are jumped over without unpacking.
    pub fn skip(&mut self, mut count: u64) -> SegmentResult<()> {
        while count > 0 {
            if self.run.as_ref().map_or(true, |r| r.consumed == r.count) {
                self.load_run()?;
            }
            let run = self.run.as_mut().unwrap();
            let available = (run.count - run.consumed) as u64;
            let taken = available.min(count);
            run.consumed += taken as usize;
            count -= taken;
        }
        Ok(())
    }

    /// Consumes two offsets: a run-boundary stream offset and the count of
    /// values to drop within that run.
    pub fn seek(&mut self, provider: &mut PositionProvider<'_>) -> SegmentResult<()> {
        let offset = provider.next_offset()?;
        let within = provider.next_offset()?;
        self.stream.seek(offset as usize)?;
        self.run = None;
        self.skip(within)
    }
}

/// A run header promised more payload than the stream holds.
fn truncated(err: SegmentError) -> SegmentError {
    match err {
        SegmentError::DataEof => SegmentError::ShortRead {
            expected: 1,
            actual: 0,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn encode(values: &[i64], signed: bool) -> Bytes {
        let mut writer = RunLengthIntegerWriter::new(signed);
        for &v in values {
            writer.write(v);
        }
        writer.finish()
    }

    fn decode_all(encoded: Bytes, count: usize, signed: bool) -> Vec<i64> {
        let mut reader = RunLengthIntegerReader::new(StreamReader::new(encoded), signed);
        (0..count).map(|_| reader.next().unwrap()).collect()
    }

    fn assert_round_trip(values: &[i64], signed: bool) {
        let encoded = encode(values, signed);
        assert_eq!(decode_all(encoded, values.len(), signed), values);
    }

    #[test]
    fn test_mixed_runs() {
        let mut values = vec![7, 7, 7, 1, 2, 3, 4, 50, 50];
        values.extend(0..=128);
        let encoded = encode(&values, true);
        assert_eq!(decode_all(encoded.clone(), values.len(), true), values);

        let mut reader = RunLengthIntegerReader::new(StreamReader::new(encoded.clone()), true);
        reader.skip(3).unwrap();
        assert_eq!(reader.next().unwrap(), 1);

        let mut reader = RunLengthIntegerReader::new(StreamReader::new(encoded), true);
        reader.skip(8).unwrap();
        assert_eq!(reader.next().unwrap(), 50);
    }

    #[test]
    fn test_boundary_values() {
        assert_round_trip(&[0, 1, -1, i64::MIN, i64::MAX, 0], true);
        // Unsigned streams carry u64 bit patterns through i64.
        let unsigned = [0i64, 1, u32::MAX as i64, u64::MAX as i64];
        let encoded = encode(&unsigned, false);
        let decoded = decode_all(encoded, unsigned.len(), false);
        assert_eq!(decoded[3] as u64, u64::MAX);
        assert_eq!(decoded, unsigned);
    }

    #[test]
    fn test_run_length_boundaries() {
        for len in [1usize, 2, 3, 127, 128, 129, 130, 256, 257, 1000] {
            let values = vec![77i64; len];
            assert_round_trip(&values, true);
            let distinct: Vec<i64> = (0..len as i64).map(|i| i * 37 - 1000).collect();
            assert_round_trip(&distinct, true);
        }
    }

    #[test]
    fn test_short_repeat_encoding() {
        let encoded = encode(&[5, 5, 5, 5, 5], true);
        // header + one value byte (zigzag(5) = 10 fits one byte)
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0] >> 6, MODE_SHORT_REPEAT);
    }

    #[test]
    fn test_patched_base_handles_outliers() {
        // 200 small values with a couple of huge outliers: the run should
        // stay narrow and still decode exactly.
        let mut values: Vec<i64> = (0..200).map(|i| 1000 + (i % 50)).collect();
        values[17] = i64::MAX / 3;
        values[111] = i64::MAX / 2;
        let encoded = encode(&values, true);
        // Far smaller than 200 full-width values.
        assert!(encoded.len() < 200 * 8 / 2);
        assert_eq!(decode_all(encoded, values.len(), true), values);
    }

    #[test]
    fn test_skip_equals_read_and_drop() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut values = Vec::new();
        for _ in 0..40 {
            match rng.gen_range(0..3) {
                0 => values.extend(vec![rng.gen_range(-100..100); rng.gen_range(1..20)]),
                1 => values.extend((0..rng.gen_range(1..300)).map(|_| rng.gen::<i64>() >> 40)),
                _ => values.push(rng.gen()),
            }
        }
        let encoded = encode(&values, true);
        for skip in [0usize, 1, 5, 17, 255, 256, 257, values.len() - 1] {
            let mut reader =
                RunLengthIntegerReader::new(StreamReader::new(encoded.clone()), true);
            reader.skip(skip as u64).unwrap();
            assert_eq!(reader.next().unwrap(), values[skip], "skip {skip}");
        }
    }

    #[test]
    fn test_seek_restartability() {
        let mut writer = RunLengthIntegerWriter::new(true);
        let mut values = Vec::new();
        let mut positions = Vec::new();
        for i in 0..2000i64 {
            // 500 is deliberately off the 256-value run boundary so most
            // recorded positions restart mid-run.
            if i % 500 == 0 {
                let mut position = Position::default();
                writer.record_position(&mut position);
                positions.push(position);
            }
            let v = match i % 3 {
                0 => 9,
                1 => i * 31,
                _ => -i,
            };
            writer.write(v);
            values.push(v);
        }
        let encoded = writer.finish();

        for (entry, position) in positions.iter().enumerate() {
            let start = entry * 500;
            let mut reader =
                RunLengthIntegerReader::new(StreamReader::new(encoded.clone()), true);
            let mut provider = position.provider();
            reader.seek(&mut provider).unwrap();
            for expected in &values[start..] {
                assert_eq!(reader.next().unwrap(), *expected);
            }
            assert_matches!(reader.next(), Err(SegmentError::DataEof));
        }
    }

    #[test]
    fn test_eof_at_stream_end() {
        let encoded = encode(&[1, 2, 3], true);
        let mut reader = RunLengthIntegerReader::new(StreamReader::new(encoded), true);
        reader.skip(3).unwrap();
        assert_matches!(reader.next(), Err(SegmentError::DataEof));
    }
}
