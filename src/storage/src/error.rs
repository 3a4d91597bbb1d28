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

use shale_common::types::LogicalType;
use thiserror::Error;

use crate::segment::StreamKind;

/// Errors raised by the segment codecs and column readers.
///
/// `StreamEof` and `DataEof` double as sentinels: seeking a fully-null
/// column's data stream legitimately hits `StreamEof`, and `DataEof` at the
/// natural end of a scan is end-of-stream rather than a failure. Everything
/// else is fatal for the reader that raised it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegmentError {
    #[error("invalid input parameter: {0}")]
    InputParameter(&'static str),

    #[error("reader is not initialized")]
    NotInited,

    #[error("stream not found: column {unique_id}, kind {kind:?}")]
    StreamNotFound {
        unique_id: u32,
        kind: StreamKind,
    },

    #[error("column stream hit end of data")]
    StreamEof,

    #[error("no more values in column")]
    DataEof,

    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    #[error("short read on column stream: expected {expected} bytes, got {actual}")]
    ShortRead {
        expected: usize,
        actual: usize,
    },

    #[error("failed to initialize reader: {0}")]
    InitFailed(String),

    #[error("unsupported column type {0:?}")]
    UnsupportedType(LogicalType),

    #[error("scan cancelled")]
    Cancelled,
}

pub type SegmentResult<T> = Result<T, SegmentError>;
