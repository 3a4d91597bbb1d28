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
use crate::codec::RunLengthIntegerReader;
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{EncodingKind, PositionProvider, Segment, StreamKind, StreamName, StreamReader};

/// Direct string encoding: a LENGTH stream of unsigned RLE integers followed
/// by that many raw bytes per value on DATA.
struct DirectDecoder {
    data: StreamReader,
    lengths: RunLengthIntegerReader,
}

impl DirectDecoder {
    fn init(unique_id: ColumnUniqueId, segment: &Segment) -> SegmentResult<Self> {
        let data = segment.stream(StreamName::new(unique_id, StreamKind::Data))?;
        let length_stream = segment.stream(StreamName::new(unique_id, StreamKind::Length))?;
        Ok(Self {
            data,
            lengths: RunLengthIntegerReader::new(length_stream, false),
        })
    }

    fn next(&mut self) -> SegmentResult<String> {
        let len = self.lengths.next()? as u64;
        let bytes = self.data.read_slice(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SegmentError::BufferOverflow("string holds invalid utf-8".into()))
    }

    fn skip(&mut self, count: u64) -> SegmentResult<()> {
        let mut total = 0u64;
        for _ in 0..count {
            total += self.lengths.next()? as u64;
        }
        self.data.skip(total as usize)
    }

    fn seek(&mut self, provider: &mut PositionProvider<'_>) -> SegmentResult<()> {
        let offset = provider.next_offset()?;
        // Every string in the granule may be empty, leaving the data stream
        // at its end while lengths still decode; that is not a failure.
        tolerate_stream_eof(self.data.seek(offset as usize), true)?;
        self.lengths.seek(provider)
    }
}

/// Dictionary string encoding: codes on DATA index into a table built once
/// at init from DICTIONARY_DATA plus entry lengths on LENGTH. Lookup is O(1)
/// per row.
struct DictionaryDecoder {
    dictionary: Vec<String>,
    codes: RunLengthIntegerReader,
}

impl DictionaryDecoder {
    fn init(
        unique_id: ColumnUniqueId,
        dictionary_size: u32,
        segment: &Segment,
    ) -> SegmentResult<Self> {
        let mut dictionary_data =
            segment.stream(StreamName::new(unique_id, StreamKind::DictionaryData))?;
        let length_stream = segment.stream(StreamName::new(unique_id, StreamKind::Length))?;
        let mut lengths = RunLengthIntegerReader::new(length_stream, false);

        let mut dictionary = Vec::with_capacity(dictionary_size as usize);
        for entry in 0..dictionary_size {
            let len = lengths.next().map_err(|e| {
                SegmentError::InitFailed(format!(
                    "dictionary of column {unique_id} truncated at entry {entry}: {e}"
                ))
            })? as u64;
            let bytes = dictionary_data.read_slice(len as usize)?;
            let item = String::from_utf8(bytes.to_vec()).map_err(|_| {
                SegmentError::BufferOverflow("dictionary entry holds invalid utf-8".into())
            })?;
            dictionary.push(item);
        }

        let code_stream = segment.stream(StreamName::new(unique_id, StreamKind::Data))?;
        Ok(Self {
            dictionary,
            codes: RunLengthIntegerReader::new(code_stream, false),
        })
    }

    fn next(&mut self) -> SegmentResult<String> {
        let code = self.codes.next()? as u64;
        self.dictionary
            .get(code as usize)
            .cloned()
            .ok_or_else(|| {
                SegmentError::BufferOverflow(format!(
                    "dictionary code {code} out of range, dictionary size {}",
                    self.dictionary.len()
                ))
            })
    }

    fn skip(&mut self, count: u64) -> SegmentResult<()> {
        self.codes.skip(count)
    }

    fn seek(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        tolerate_stream_eof(self.codes.seek(provider), tolerate_eof)
    }
}

enum StringDecoder {
    Direct(DirectDecoder),
    Dictionary(DictionaryDecoder),
}

/// Reader shared by VARCHAR, HLL and CHAR columns. CHAR values are stored
/// space-padded to their declared length and trimmed back on read.
pub(crate) struct StringReader {
    unique_id: ColumnUniqueId,
    max_length: u32,
    fixed_length: bool,
    decoder: Option<StringDecoder>,
}

impl StringReader {
    pub fn variable(unique_id: ColumnUniqueId, max_length: u32) -> Self {
        Self {
            unique_id,
            max_length,
            fixed_length: false,
            decoder: None,
        }
    }

    pub fn fixed(unique_id: ColumnUniqueId, length: u32) -> Self {
        Self {
            unique_id,
            max_length: length,
            fixed_length: true,
            decoder: None,
        }
    }

    pub fn init(&mut self, segment: &Segment) -> SegmentResult<()> {
        let encoding = segment.encoding(self.unique_id);
        let decoder = match encoding.kind {
            EncodingKind::Direct => {
                StringDecoder::Direct(DirectDecoder::init(self.unique_id, segment)?)
            }
            EncodingKind::Dictionary => StringDecoder::Dictionary(DictionaryDecoder::init(
                self.unique_id,
                encoding.dictionary_size,
                segment,
            )?),
        };
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decoder(&mut self) -> SegmentResult<&mut StringDecoder> {
        self.decoder.as_mut().ok_or(SegmentError::NotInited)
    }

    pub fn next_value(&mut self) -> SegmentResult<ScalarImpl> {
        let max_length = self.max_length;
        let fixed_length = self.fixed_length;
        let value = match self.decoder()? {
            StringDecoder::Direct(d) => d.next()?,
            StringDecoder::Dictionary(d) => d.next()?,
        };
        if value.len() > max_length as usize {
            return Err(SegmentError::BufferOverflow(format!(
                "string of {} bytes exceeds declared length {max_length}",
                value.len()
            )));
        }
        let value = if fixed_length {
            value.trim_end_matches(' ').to_string()
        } else {
            value
        };
        Ok(ScalarImpl::Utf8(value))
    }

    pub fn skip_values(&mut self, count: u64) -> SegmentResult<()> {
        match self.decoder()? {
            StringDecoder::Direct(d) => d.skip(count),
            StringDecoder::Dictionary(d) => d.skip(count),
        }
    }

    pub fn seek_values(
        &mut self,
        provider: &mut PositionProvider<'_>,
        tolerate_eof: bool,
    ) -> SegmentResult<()> {
        match self.decoder()? {
            StringDecoder::Direct(d) => d.seek(provider),
            StringDecoder::Dictionary(d) => d.seek(provider, tolerate_eof),
        }
    }
}
